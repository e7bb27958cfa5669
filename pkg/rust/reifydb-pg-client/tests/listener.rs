// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

mod common;

use std::{
	sync::{
		Arc, Mutex,
		atomic::{AtomicBool, AtomicUsize, Ordering},
	},
	time::Duration,
};

use common::{collect, connect, connect_and_notify, payloads, start_server};
use reifydb_pg_client::{
	Connection, Error, Notification, NotificationListener, Result,
	listener::{channel, from_fn},
};
use reifydb_testing::util::wait::wait_for;

#[derive(Default)]
struct CountingListener {
	received: AtomicUsize,
	errors: AtomicUsize,
	fail_on: Option<&'static str>,
}

impl NotificationListener for CountingListener {
	fn handle_notification(&self, notification: &Notification) -> Result<()> {
		if self.fail_on == Some(notification.payload()) {
			return Err(Error::listener(format!("cannot handle {}", notification.payload())));
		}
		self.received.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}

	fn handle_error(&self, _error: Error) {
		self.errors.fetch_add(1, Ordering::SeqCst);
	}
}

#[test]
fn test_failing_listener_does_not_affect_others() {
	let server = start_server();
	let conn = connect(&server);
	conn.execute("LISTEN mynotification").unwrap();

	let failing = Arc::new(CountingListener {
		fail_on: Some("7"),
		..Default::default()
	});
	let healthy = Arc::new(CountingListener::default());
	assert!(conn.add_notification_listener(failing.clone()));
	assert!(conn.add_notification_listener(healthy.clone()));

	let other = connect(&server);
	for i in 0..=10 {
		other.notify("mynotification", Some(i.to_string().as_str())).unwrap();
	}

	// pull consumers see every notification as well
	assert_eq!(collect(&conn, 11, Duration::from_secs(5)).len(), 11);

	assert_eq!(failing.received.load(Ordering::SeqCst), 10);
	assert_eq!(failing.errors.load(Ordering::SeqCst), 1);
	assert_eq!(healthy.received.load(Ordering::SeqCst), 11);
	assert_eq!(healthy.errors.load(Ordering::SeqCst), 0);
}

#[test]
fn test_listener_called_before_execute_returns() {
	let server = start_server();
	let conn = connect(&server);

	let seen = Arc::new(Mutex::new(Vec::new()));
	let sink = seen.clone();
	conn.add_notification_listener(Arc::new(from_fn(move |n: &Notification| {
		sink.lock().unwrap().push(n.payload().to_string());
		Ok(())
	})));

	conn.execute("LISTEN c; NOTIFY c, 'mine'").unwrap();
	assert_eq!(*seen.lock().unwrap(), vec!["mine"]);
}

#[test]
fn test_channel_listener() {
	let server = start_server();
	let conn = connect(&server);
	conn.listen("orders").unwrap();

	let (listener, receiver) = channel();
	conn.add_notification_listener(Arc::new(listener));

	connect_and_notify(&server, "orders", Some("{\"id\":1}"));
	collect(&conn, 1, Duration::from_secs(5));

	let notification = receiver.recv_timeout(Duration::from_secs(1)).unwrap();
	assert_eq!(notification.channel(), "orders");
	assert_eq!(notification.payload(), "{\"id\":1}");
}

#[test]
fn test_listener_may_use_the_connection() {
	let server = start_server();
	let conn = connect(&server);
	conn.listen("work").unwrap();

	let handled = Arc::new(AtomicUsize::new(0));
	let listener: Arc<dyn NotificationListener> = {
		let conn = conn.clone();
		let handled = handled.clone();
		Arc::new(from_fn(move |_: &Notification| {
			conn.execute("SELECT 1")?;
			handled.fetch_add(1, Ordering::SeqCst);
			Ok(())
		}))
	};
	conn.add_notification_listener(listener.clone());

	connect_and_notify(&server, "work", None);
	collect(&conn, 1, Duration::from_secs(5));
	assert_eq!(handled.load(Ordering::SeqCst), 1);

	drop(listener);
	conn.close();
}

#[test]
fn test_close_releases_listeners_holding_the_connection() {
	let server = start_server();
	let conn = connect(&server);
	wait_for(|| server.session_count() == 1, "session registered");

	struct Holder {
		_conn: Connection,
		dropped: Arc<AtomicBool>,
	}

	impl NotificationListener for Holder {
		fn handle_notification(&self, _notification: &Notification) -> Result<()> {
			Ok(())
		}
	}

	impl Drop for Holder {
		fn drop(&mut self) {
			self.dropped.store(true, Ordering::SeqCst);
		}
	}

	let dropped = Arc::new(AtomicBool::new(false));
	conn.add_notification_listener(Arc::new(Holder {
		_conn: conn.clone(),
		dropped: dropped.clone(),
	}));

	conn.close();
	assert!(dropped.load(Ordering::SeqCst));
	assert!(format!("{:?}", conn).contains("listeners: 0"));
	wait_for(|| server.session_count() == 0, "session closed");
}

#[test]
fn test_server_disconnect_releases_listeners() {
	let server = start_server();
	let conn = connect(&server);
	conn.listen("c").unwrap();

	let counting = Arc::new(CountingListener::default());
	conn.add_notification_listener(counting.clone());
	assert_eq!(Arc::strong_count(&counting), 2);

	server.disconnect_all();
	assert!(conn.poll_notifications_timeout(Duration::ZERO).is_err());
	assert_eq!(Arc::strong_count(&counting), 1);
}

#[test]
fn test_removed_listener_receives_nothing() {
	let server = start_server();
	let conn = connect(&server);
	conn.listen("c").unwrap();

	let counting = Arc::new(CountingListener::default());
	let listener: Arc<dyn NotificationListener> = counting.clone();
	assert!(conn.add_notification_listener(listener.clone()));
	assert!(!conn.add_notification_listener(listener.clone()));

	conn.notify("c", Some("one")).unwrap();
	assert_eq!(counting.received.load(Ordering::SeqCst), 1);

	assert!(conn.remove_notification_listener(&listener));
	assert!(!conn.remove_notification_listener(&listener));

	conn.notify("c", Some("two")).unwrap();
	assert_eq!(counting.received.load(Ordering::SeqCst), 1);
	assert_eq!(payloads(&conn.poll_notifications().unwrap()), vec!["one", "two"]);
}

#[test]
fn test_listener_only_consumer() {
	let server = start_server();
	let conn = connect(&server);
	conn.listen("c").unwrap();

	let counting = Arc::new(CountingListener::default());
	conn.add_notification_listener(counting.clone());

	let other = connect(&server);
	for payload in ["a", "b", "c"] {
		other.notify("c", Some(payload)).unwrap();
	}

	// any read drives delivery, e.g. a statement
	wait_for(
		|| {
			conn.execute("SELECT 1").unwrap();
			counting.received.load(Ordering::SeqCst) == 3
		},
		"listener received all notifications",
	);
}

#[test]
fn test_interrupt_during_dispatch() {
	let server = start_server();
	let conn = connect(&server);
	conn.listen("c").unwrap();

	let interrupted = Arc::new(AtomicUsize::new(0));

	struct Interrupting(Connection);

	impl NotificationListener for Interrupting {
		fn handle_notification(&self, _notification: &Notification) -> Result<()> {
			self.0.interrupt_handle().interrupt();
			Ok(())
		}
	}

	struct Late(Arc<AtomicUsize>);

	impl NotificationListener for Late {
		fn handle_notification(&self, _notification: &Notification) -> Result<()> {
			Ok(())
		}

		fn handle_interrupted(&self) {
			self.0.fetch_add(1, Ordering::SeqCst);
		}
	}

	let first: Arc<dyn NotificationListener> = Arc::new(Interrupting(conn.clone()));
	conn.add_notification_listener(first.clone());
	conn.add_notification_listener(Arc::new(Late(interrupted.clone())));

	conn.notify("c", None).unwrap();
	assert_eq!(interrupted.load(Ordering::SeqCst), 1);

	// the notification itself is still available to pull consumers
	assert_eq!(conn.poll_notifications().unwrap().len(), 1);

	conn.remove_notification_listener(&first);
	conn.close();
}
