// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Push-style notification listeners.
//!
//! Listeners are invoked synchronously on the thread whose read discovered
//! the notifications. A listener may run commands on the connection it is
//! registered with, but it must not block on that connection's
//! notification polling.

mod adapter;

use std::{
	any::Any,
	panic::{AssertUnwindSafe, catch_unwind},
	sync::Arc,
};

pub use adapter::{ChannelListener, FnListener, channel, from_fn};
use reifydb_runtime::{interrupt::Interrupt, sync::rwlock::RwLock};
use tracing::{debug, warn};

use crate::{Error, Notification, Result};

pub trait NotificationListener: Send + Sync {
	/// Called once per notification, in arrival order.
	fn handle_notification(&self, notification: &Notification) -> Result<()>;

	/// Receives the error returned (or the panic raised) by this listener's
	/// own `handle_notification`.
	fn handle_error(&self, error: Error) {
		let _ = error;
	}

	/// Called when dispatch is interrupted before this listener received the
	/// current notification.
	fn handle_interrupted(&self) {}
}

/// Outcome of dispatching one batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
	pub delivered: usize,
	pub failed: usize,
	pub interrupted: bool,
}

type Listeners = Arc<Vec<Arc<dyn NotificationListener>>>;

/// Ordered set of listeners keyed by `Arc` identity.
///
/// Mutations replace the list, so a dispatch in progress keeps iterating the
/// snapshot it started with.
#[derive(Default)]
pub struct ListenerRegistry {
	listeners: RwLock<Listeners>,
}

fn same_listener(a: &Arc<dyn NotificationListener>, b: &Arc<dyn NotificationListener>) -> bool {
	// compare data pointers only; vtable pointers are not unique per type
	Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

impl ListenerRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Append `listener`. Returns `false` if this exact listener is already
	/// registered.
	pub fn register(&self, listener: Arc<dyn NotificationListener>) -> bool {
		let mut listeners = self.listeners.write();
		if listeners.iter().any(|l| same_listener(l, &listener)) {
			return false;
		}

		let mut next = Vec::with_capacity(listeners.len() + 1);
		next.extend(listeners.iter().cloned());
		next.push(listener);
		*listeners = Arc::new(next);
		true
	}

	/// Remove `listener`. Returns `false` if it was not registered.
	pub fn unregister(&self, listener: &Arc<dyn NotificationListener>) -> bool {
		let mut listeners = self.listeners.write();
		let Some(position) = listeners.iter().position(|l| same_listener(l, listener)) else {
			return false;
		};

		let mut next: Vec<_> = listeners.iter().cloned().collect();
		next.remove(position);
		*listeners = Arc::new(next);
		true
	}

	/// Drop every registration. Dispatches already running keep their
	/// snapshot.
	pub fn clear(&self) {
		*self.listeners.write() = Arc::new(Vec::new());
	}

	pub fn len(&self) -> usize {
		self.listeners.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	fn snapshot(&self) -> Listeners {
		self.listeners.read().clone()
	}

	/// Deliver `notifications` to every registered listener.
	///
	/// Notifications are delivered in order; for each one, listeners are
	/// called in registration order. A failing listener gets its own error
	/// back through `handle_error` and delivery continues. When `interrupt`
	/// is raised, the listeners still waiting for the current notification
	/// get `handle_interrupted` and the rest of the batch is abandoned.
	pub fn dispatch(&self, notifications: &[Notification], interrupt: &Interrupt) -> DispatchReport {
		let mut report = DispatchReport::default();

		let listeners = self.snapshot();
		if listeners.is_empty() || notifications.is_empty() {
			return report;
		}

		for notification in notifications {
			for (idx, listener) in listeners.iter().enumerate() {
				if interrupt.take() {
					for remaining in &listeners[idx..] {
						remaining.handle_interrupted();
					}
					report.interrupted = true;
					debug!(
						delivered = report.delivered,
						failed = report.failed,
						"notification dispatch interrupted"
					);
					return report;
				}

				let outcome = catch_unwind(AssertUnwindSafe(|| listener.handle_notification(notification)));
				let error = match outcome {
					Ok(Ok(())) => {
						report.delivered += 1;
						continue;
					}
					Ok(Err(err)) => err,
					Err(panic) => Error::ListenerPanicked(panic_message(panic.as_ref())),
				};

				report.failed += 1;
				warn!(channel = notification.channel(), error = %error, "notification listener failed");
				listener.handle_error(error);
			}
		}

		report
	}
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
	if let Some(message) = panic.downcast_ref::<&str>() {
		message.to_string()
	} else if let Some(message) = panic.downcast_ref::<String>() {
		message.clone()
	} else {
		"unknown panic".to_string()
	}
}

#[cfg(test)]
mod tests {
	use std::sync::{
		Arc, Mutex,
		atomic::{AtomicUsize, Ordering},
	};

	use reifydb_runtime::interrupt::Interrupt;

	use super::{ListenerRegistry, NotificationListener};
	use crate::{Error, Notification, Result};

	#[derive(Default)]
	struct Recording {
		seen: Mutex<Vec<String>>,
		errors: AtomicUsize,
		interrupted: AtomicUsize,
		fail_on: Option<&'static str>,
	}

	impl Recording {
		fn failing_on(payload: &'static str) -> Self {
			Self {
				fail_on: Some(payload),
				..Default::default()
			}
		}

		fn seen(&self) -> Vec<String> {
			self.seen.lock().unwrap().clone()
		}
	}

	impl NotificationListener for Recording {
		fn handle_notification(&self, notification: &Notification) -> Result<()> {
			if self.fail_on == Some(notification.payload()) {
				return Err(Error::listener("rejected"));
			}
			self.seen.lock().unwrap().push(notification.payload().to_string());
			Ok(())
		}

		fn handle_error(&self, _error: Error) {
			self.errors.fetch_add(1, Ordering::SeqCst);
		}

		fn handle_interrupted(&self) {
			self.interrupted.fetch_add(1, Ordering::SeqCst);
		}
	}

	fn batch(payloads: &[&str]) -> Vec<Notification> {
		payloads.iter().map(|p| Notification::new("test", *p, 1)).collect()
	}

	#[test]
	fn test_register_is_identity_keyed() {
		let registry = ListenerRegistry::new();
		let listener: Arc<dyn NotificationListener> = Arc::new(Recording::default());
		let twin: Arc<dyn NotificationListener> = Arc::new(Recording::default());

		assert!(registry.register(listener.clone()));
		assert!(!registry.register(listener.clone()));
		assert!(registry.register(twin.clone()));
		assert_eq!(registry.len(), 2);

		assert!(registry.unregister(&listener));
		assert!(!registry.unregister(&listener));
		assert_eq!(registry.len(), 1);
	}

	#[test]
	fn test_delivery_order() {
		let registry = ListenerRegistry::new();
		let first = Arc::new(Recording::default());
		let second = Arc::new(Recording::default());
		registry.register(first.clone());
		registry.register(second.clone());

		let report = registry.dispatch(&batch(&["A", "B", "C"]), &Interrupt::new());

		assert_eq!(report.delivered, 6);
		assert_eq!(first.seen(), vec!["A", "B", "C"]);
		assert_eq!(second.seen(), vec!["A", "B", "C"]);
	}

	#[test]
	fn test_registration_order_per_notification() {
		let order = Arc::new(Mutex::new(Vec::new()));
		let registry = ListenerRegistry::new();

		for name in ["one", "two", "three"] {
			let order = order.clone();
			registry.register(Arc::new(super::from_fn(move |n: &Notification| {
				order.lock().unwrap().push(format!("{}:{}", name, n.payload()));
				Ok(())
			})));
		}

		registry.dispatch(&batch(&["x", "y"]), &Interrupt::new());
		assert_eq!(*order.lock().unwrap(), vec!["one:x", "two:x", "three:x", "one:y", "two:y", "three:y"]);
	}

	#[test]
	fn test_failing_listener_is_isolated() {
		let registry = ListenerRegistry::new();
		let healthy = Arc::new(Recording::default());
		let failing = Arc::new(Recording::failing_on("7"));
		let other = Arc::new(Recording::default());
		registry.register(healthy.clone());
		registry.register(failing.clone());
		registry.register(other.clone());

		let payloads: Vec<String> = (0..=10).map(|i| i.to_string()).collect();
		let notifications: Vec<_> = payloads.iter().map(|p| Notification::new("test", p.as_str(), 1)).collect();
		let report = registry.dispatch(&notifications, &Interrupt::new());

		assert_eq!(report.failed, 1);
		assert_eq!(healthy.seen().len(), 11);
		assert_eq!(other.seen().len(), 11);
		assert_eq!(failing.seen().len(), 10);
		assert_eq!(failing.errors.load(Ordering::SeqCst), 1);
		assert_eq!(healthy.errors.load(Ordering::SeqCst), 0);
		assert_eq!(other.errors.load(Ordering::SeqCst), 0);
	}

	#[test]
	fn test_panicking_listener_is_isolated() {
		struct Panicking {
			errors: Mutex<Vec<String>>,
		}

		impl NotificationListener for Panicking {
			fn handle_notification(&self, _notification: &Notification) -> Result<()> {
				panic!("boom");
			}

			fn handle_error(&self, error: Error) {
				self.errors.lock().unwrap().push(error.to_string());
			}
		}

		let registry = ListenerRegistry::new();
		let panicking = Arc::new(Panicking {
			errors: Mutex::new(Vec::new()),
		});
		let healthy = Arc::new(Recording::default());
		registry.register(panicking.clone());
		registry.register(healthy.clone());

		let report = registry.dispatch(&batch(&["a"]), &Interrupt::new());

		assert_eq!(report.failed, 1);
		assert_eq!(healthy.seen(), vec!["a"]);
		assert_eq!(*panicking.errors.lock().unwrap(), vec!["listener panicked: boom"]);
	}

	#[test]
	fn test_interrupt_reaches_remaining_listeners() {
		struct Interrupting {
			interrupt: Interrupt,
		}

		impl NotificationListener for Interrupting {
			fn handle_notification(&self, _notification: &Notification) -> Result<()> {
				self.interrupt.interrupt();
				Ok(())
			}
		}

		let interrupt = Interrupt::new();
		let registry = ListenerRegistry::new();
		let before = Arc::new(Recording::default());
		let after_one = Arc::new(Recording::default());
		let after_two = Arc::new(Recording::default());
		registry.register(before.clone());
		registry.register(Arc::new(Interrupting {
			interrupt: interrupt.clone(),
		}));
		registry.register(after_one.clone());
		registry.register(after_two.clone());

		let report = registry.dispatch(&batch(&["first", "second"]), &interrupt);

		assert!(report.interrupted);
		assert_eq!(report.delivered, 2);
		assert_eq!(before.seen(), vec!["first"]);
		assert_eq!(before.interrupted.load(Ordering::SeqCst), 0);
		assert!(after_one.seen().is_empty());
		assert_eq!(after_one.interrupted.load(Ordering::SeqCst), 1);
		assert_eq!(after_two.interrupted.load(Ordering::SeqCst), 1);
		assert!(!interrupt.is_interrupted());
	}

	#[test]
	fn test_registration_during_dispatch() {
		struct Registering {
			registry: Arc<ListenerRegistry>,
			added: Arc<Recording>,
		}

		impl NotificationListener for Registering {
			fn handle_notification(&self, _notification: &Notification) -> Result<()> {
				self.registry.register(self.added.clone());
				Ok(())
			}
		}

		let registry = Arc::new(ListenerRegistry::new());
		let added = Arc::new(Recording::default());
		registry.register(Arc::new(Registering {
			registry: registry.clone(),
			added: added.clone(),
		}));

		let report = registry.dispatch(&batch(&["a", "b"]), &Interrupt::new());

		// the running dispatch keeps its snapshot
		assert_eq!(report.delivered, 2);
		assert!(added.seen().is_empty());
		assert_eq!(registry.len(), 2);

		registry.dispatch(&batch(&["c"]), &Interrupt::new());
		assert_eq!(added.seen(), vec!["c"]);
	}

	#[test]
	fn test_clear_releases_listeners() {
		let registry = ListenerRegistry::new();
		let listener = Arc::new(Recording::default());
		registry.register(listener.clone());
		assert_eq!(Arc::strong_count(&listener), 2);

		registry.clear();
		assert!(registry.is_empty());
		assert_eq!(Arc::strong_count(&listener), 1);
		assert_eq!(registry.dispatch(&batch(&["a"]), &Interrupt::new()).delivered, 0);
		assert!(listener.seen().is_empty());
	}

	#[test]
	fn test_empty_registry() {
		let registry = ListenerRegistry::new();
		assert!(registry.is_empty());
		assert_eq!(registry.dispatch(&batch(&["a"]), &Interrupt::new()), Default::default());
	}
}
