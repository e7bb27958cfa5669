// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use std::time::{Duration, Instant};

use reifydb_pg_client::{Connection, ConnectionConfig, Notification};
use reifydb_testing::{TestServer, init_tracing};

pub fn start_server() -> TestServer {
	init_tracing();
	TestServer::start()
}

pub fn config(server: &TestServer) -> ConnectionConfig {
	ConnectionConfig::new()
		.host("127.0.0.1")
		.port(server.port())
		.user("test")
		.application_name("notify-test")
		.connect_timeout(Duration::from_secs(5))
}

pub fn connect(server: &TestServer) -> Connection {
	Connection::connect(config(server)).unwrap()
}

/// Raise a notification from a separate session.
#[allow(dead_code)]
pub fn connect_and_notify(server: &TestServer, channel: &str, payload: Option<&str>) {
	let conn = connect(server);
	conn.notify(channel, payload).unwrap();
	conn.close();
}

/// Poll until `count` notifications have been collected or `timeout` passes.
#[allow(dead_code)]
pub fn collect(conn: &Connection, count: usize, timeout: Duration) -> Vec<Notification> {
	let deadline = Instant::now() + timeout;
	let mut received = Vec::new();

	while received.len() < count {
		let now = Instant::now();
		if now >= deadline {
			break;
		}
		received.extend(conn.poll_notifications_timeout(deadline - now).unwrap());
	}
	received
}

#[allow(dead_code)]
pub fn payloads(notifications: &[Notification]) -> Vec<String> {
	notifications.iter().map(|n| n.payload().to_string()).collect()
}
