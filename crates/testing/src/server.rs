// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! In-process server speaking enough of the PostgreSQL protocol to exercise
//! `LISTEN`/`NOTIFY` over real sockets.
//!
//! Every session runs on its own thread. Notifications raised by a query are
//! delivered when the query completes, to every session listening on the
//! channel (the sender included, before its `ReadyForQuery`). A query that
//! fails delivers nothing.

use std::{
	collections::{HashMap, HashSet},
	io::{self, ErrorKind, Read, Write},
	net::{Shutdown, SocketAddr, TcpListener, TcpStream},
	sync::{
		Arc,
		atomic::{AtomicBool, AtomicI32, Ordering},
	},
	thread::{self, JoinHandle},
	time::Duration,
};

use reifydb_pgwire::{
	Authentication, BackendMessage, ErrorFields, FrontendMessage, StartupMessage, TransactionStatus, WireError,
};
use reifydb_runtime::sync::mutex::Mutex;
use tracing::{debug, trace};

use crate::statement::{self, Statement};

/// Interval for checking the shutdown flag while accepting.
const SHUTDOWN_CHECK_INTERVAL: Duration = Duration::from_millis(10);

const FIRST_BACKEND_PID: i32 = 4000;

#[derive(Debug, thiserror::Error)]
enum SessionError {
	#[error(transparent)]
	Io(#[from] io::Error),
	#[error(transparent)]
	Wire(#[from] WireError),
}

type Result<T> = std::result::Result<T, SessionError>;

struct SessionHandle {
	channels: HashSet<String>,
	writer: Arc<Mutex<TcpStream>>,
	// used to cut the session off
	socket: TcpStream,
}

struct Hub {
	password: Option<String>,
	next_pid: AtomicI32,
	sessions: Mutex<HashMap<i32, SessionHandle>>,
}

impl Hub {
	/// Deliver to every session listening on `channel`.
	fn publish(&self, sender_pid: i32, channel: &str, payload: &str) {
		let message = BackendMessage::NotificationResponse {
			process_id: sender_pid,
			channel: channel.to_string(),
			payload: payload.to_string(),
		};
		let mut bytes = Vec::new();
		if message.encode(&mut bytes).is_err() {
			return;
		}

		let sessions = self.sessions.lock();
		for (pid, session) in sessions.iter() {
			if !session.channels.contains(channel) {
				continue;
			}
			let mut writer = session.writer.lock();
			if let Err(err) = writer.write_all(&bytes).and_then(|_| writer.flush()) {
				trace!(pid, error = %err, "notification not delivered");
			}
		}
	}

	fn update_channels(&self, pid: i32, f: impl FnOnce(&mut HashSet<String>)) {
		if let Some(session) = self.sessions.lock().get_mut(&pid) {
			f(&mut session.channels);
		}
	}
}

/// A PostgreSQL-protocol test server on an ephemeral localhost port.
///
/// Stops, dropping every session, when dropped.
pub struct TestServer {
	addr: SocketAddr,
	hub: Arc<Hub>,
	shutdown: Arc<AtomicBool>,
	acceptor: Option<JoinHandle<()>>,
}

impl TestServer {
	/// Start a server accepting any user without a password.
	pub fn start() -> Self {
		Self::spawn(None)
	}

	/// Start a server requiring cleartext `password` from every user.
	pub fn start_with_password(password: &str) -> Self {
		Self::spawn(Some(password.to_string()))
	}

	fn spawn(password: Option<String>) -> Self {
		let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind test server");
		listener.set_nonblocking(true).expect("failed to configure test server");
		let addr = listener.local_addr().expect("failed to get local addr");

		let hub = Arc::new(Hub {
			password,
			next_pid: AtomicI32::new(FIRST_BACKEND_PID),
			sessions: Mutex::new(HashMap::new()),
		});
		let shutdown = Arc::new(AtomicBool::new(false));

		let acceptor = {
			let hub = hub.clone();
			let shutdown = shutdown.clone();
			thread::Builder::new()
				.name("pg-test-acceptor".to_string())
				.spawn(move || accept_loop(listener, hub, shutdown))
				.expect("failed to spawn acceptor thread")
		};

		debug!(%addr, "test server started");
		Self {
			addr,
			hub,
			shutdown,
			acceptor: Some(acceptor),
		}
	}

	pub fn addr(&self) -> SocketAddr {
		self.addr
	}

	pub fn port(&self) -> u16 {
		self.addr.port()
	}

	/// Number of sessions currently connected.
	pub fn session_count(&self) -> usize {
		self.hub.sessions.lock().len()
	}

	/// Raise a notification as if sent by a backend with process id 0.
	pub fn notify(&self, channel: &str, payload: &str) {
		self.hub.publish(0, channel, payload);
	}

	/// Drop every session without a goodbye, like a server crash.
	pub fn disconnect_all(&self) {
		let sessions = self.hub.sessions.lock();
		for session in sessions.values() {
			let _ = session.socket.shutdown(Shutdown::Both);
		}
	}

	pub fn stop(self) {
		drop(self);
	}
}

impl Drop for TestServer {
	fn drop(&mut self) {
		self.shutdown.store(true, Ordering::Relaxed);
		if let Some(acceptor) = self.acceptor.take() {
			let _ = acceptor.join();
		}
		self.disconnect_all();
	}
}

fn accept_loop(listener: TcpListener, hub: Arc<Hub>, shutdown: Arc<AtomicBool>) {
	while !shutdown.load(Ordering::Relaxed) {
		match listener.accept() {
			Ok((stream, peer)) => {
				let hub = hub.clone();
				let spawned = thread::Builder::new().name("pg-test-session".to_string()).spawn(move || {
					if let Err(err) = serve(stream, hub) {
						trace!(%peer, error = %err, "session ended");
					}
				});
				if let Err(err) = spawned {
					debug!(error = %err, "failed to spawn session thread");
				}
			}
			Err(err) if err.kind() == ErrorKind::WouldBlock => thread::sleep(SHUTDOWN_CHECK_INTERVAL),
			Err(err) => {
				debug!(error = %err, "accept failed");
				thread::sleep(SHUTDOWN_CHECK_INTERVAL);
			}
		}
	}
}

fn serve(stream: TcpStream, hub: Arc<Hub>) -> Result<()> {
	stream.set_nonblocking(false)?;
	stream.set_nodelay(true)?;

	let mut session = Session {
		pid: hub.next_pid.fetch_add(1, Ordering::Relaxed),
		writer: Arc::new(Mutex::new(stream.try_clone()?)),
		reader: stream,
		buffer: Vec::new(),
		hub,
	};

	let result = session.run();
	session.hub.sessions.lock().remove(&session.pid);
	result
}

struct Session {
	pid: i32,
	reader: TcpStream,
	writer: Arc<Mutex<TcpStream>>,
	buffer: Vec<u8>,
	hub: Arc<Hub>,
}

impl Session {
	fn run(&mut self) -> Result<()> {
		let Some(params) = self.startup()? else {
			return Ok(());
		};
		if !self.authenticate(&params)? {
			return Ok(());
		}

		self.hub.sessions.lock().insert(
			self.pid,
			SessionHandle {
				channels: HashSet::new(),
				writer: self.writer.clone(),
				socket: self.reader.try_clone()?,
			},
		);

		let mut greeting = vec![
			BackendMessage::Authentication(Authentication::Ok),
			parameter("server_version", "16.0"),
			parameter("server_encoding", "UTF8"),
			parameter("client_encoding", "UTF8"),
		];
		if let Some(name) = find(&params, "application_name") {
			greeting.push(parameter("application_name", name));
		}
		greeting.push(BackendMessage::BackendKeyData {
			process_id: self.pid,
			secret_key: self.pid.wrapping_mul(7919),
		});
		greeting.push(BackendMessage::ReadyForQuery(TransactionStatus::Idle));
		self.send(&greeting)?;
		debug!(pid = self.pid, "session ready");

		while let Some(message) = self.read_message()? {
			match message {
				FrontendMessage::Query(sql) => self.query(&sql)?,
				FrontendMessage::Terminate => break,
				other => {
					self.send(&[BackendMessage::ErrorResponse(ErrorFields::new(
						"FATAL",
						"08P01",
						format!("unexpected message {:?}", other),
					))])?;
					break;
				}
			}
		}
		Ok(())
	}

	/// Read the startup packet, declining SSL. `None` if the client went away
	/// or only wanted to cancel.
	fn startup(&mut self) -> Result<Option<Vec<(String, String)>>> {
		loop {
			let message = loop {
				if let Some((message, consumed)) = StartupMessage::decode(&self.buffer)? {
					self.buffer.drain(..consumed);
					break message;
				}
				if !self.fill()? {
					return Ok(None);
				}
			};

			match message {
				StartupMessage::SslRequest => self.writer.lock().write_all(b"N")?,
				StartupMessage::CancelRequest {
					..
				} => return Ok(None),
				StartupMessage::Startup {
					params,
				} => return Ok(Some(params)),
			}
		}
	}

	fn authenticate(&mut self, params: &[(String, String)]) -> Result<bool> {
		let Some(expected) = self.hub.password.clone() else {
			return Ok(true);
		};

		self.send(&[BackendMessage::Authentication(Authentication::CleartextPassword)])?;
		let user = find(params, "user").unwrap_or_default().to_string();

		match self.read_message()? {
			Some(FrontendMessage::Password(password)) if password == expected => Ok(true),
			Some(_) => {
				self.send(&[BackendMessage::ErrorResponse(ErrorFields::new(
					"FATAL",
					"28P01",
					format!("password authentication failed for user \"{}\"", user),
				))])?;
				Ok(false)
			}
			None => Ok(false),
		}
	}

	fn query(&mut self, sql: &str) -> Result<()> {
		let statements = statement::split(sql);
		if statements.is_empty() {
			return self.send(&[
				BackendMessage::EmptyQueryResponse,
				BackendMessage::ReadyForQuery(TransactionStatus::Idle),
			]);
		}

		let mut pending: Vec<(String, String)> = Vec::new();
		let mut failed = false;

		for sql in statements {
			let statement = match statement::parse(sql) {
				Ok(statement) => statement,
				Err((code, message)) => {
					self.send(&[BackendMessage::ErrorResponse(ErrorFields::new("ERROR", code, message))])?;
					failed = true;
					break;
				}
			};
			trace!(pid = self.pid, ?statement, "executing");

			let responses = match statement {
				Statement::Listen(channel) => {
					self.hub.update_channels(self.pid, |channels| {
						channels.insert(channel);
					});
					vec![BackendMessage::CommandComplete("LISTEN".to_string())]
				}
				Statement::Unlisten(channel) => {
					self.hub.update_channels(self.pid, |channels| match channel {
						Some(channel) => {
							channels.remove(&channel);
						}
						None => channels.clear(),
					});
					vec![BackendMessage::CommandComplete("UNLISTEN".to_string())]
				}
				Statement::Notify {
					channel,
					payload,
				} => {
					queue(&mut pending, channel, payload);
					vec![BackendMessage::CommandComplete("NOTIFY".to_string())]
				}
				Statement::PgNotify {
					channel,
					payload,
				} => {
					queue(&mut pending, channel, payload);
					single_row("pg_notify", Some(String::new()))
				}
				Statement::SelectInt(value) => single_row("?column?", Some(value.to_string())),
				Statement::SelectBackendPid => single_row("pg_backend_pid", Some(self.pid.to_string())),
				Statement::SelectSleep(duration) => {
					thread::sleep(duration);
					single_row("pg_sleep", Some(String::new()))
				}
			};
			self.send(&responses)?;
		}

		if !failed {
			for (channel, payload) in &pending {
				self.hub.publish(self.pid, channel, payload);
			}
		}

		self.send(&[BackendMessage::ReadyForQuery(TransactionStatus::Idle)])
	}

	fn read_message(&mut self) -> Result<Option<FrontendMessage>> {
		loop {
			if let Some((message, consumed)) = FrontendMessage::decode(&self.buffer)? {
				self.buffer.drain(..consumed);
				return Ok(Some(message));
			}
			if !self.fill()? {
				return Ok(None);
			}
		}
	}

	/// Read more input. `false` at end of stream.
	fn fill(&mut self) -> Result<bool> {
		let mut chunk = [0u8; 4096];
		loop {
			match self.reader.read(&mut chunk) {
				Ok(0) => return Ok(false),
				Ok(n) => {
					self.buffer.extend_from_slice(&chunk[..n]);
					return Ok(true);
				}
				Err(err) if err.kind() == ErrorKind::Interrupted => continue,
				Err(err) => return Err(err.into()),
			}
		}
	}

	fn send(&self, messages: &[BackendMessage]) -> Result<()> {
		let mut bytes = Vec::new();
		for message in messages {
			message.encode(&mut bytes)?;
		}
		let mut writer = self.writer.lock();
		writer.write_all(&bytes)?;
		writer.flush()?;
		Ok(())
	}
}

/// Identical notifications raised by one query are delivered once.
fn queue(pending: &mut Vec<(String, String)>, channel: String, payload: String) {
	let entry = (channel, payload);
	if !pending.contains(&entry) {
		pending.push(entry);
	}
}

fn parameter(name: &str, value: &str) -> BackendMessage {
	BackendMessage::ParameterStatus {
		name: name.to_string(),
		value: value.to_string(),
	}
}

fn single_row(column: &str, value: Option<String>) -> Vec<BackendMessage> {
	vec![
		BackendMessage::RowDescription(vec![column.to_string()]),
		BackendMessage::DataRow(vec![value.map(String::into_bytes)]),
		BackendMessage::CommandComplete("SELECT 1".to_string()),
	]
}

fn find<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
	params.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
}
