// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! A single server session.
//!
//! The socket lives behind the wire mutex. Every read of it, whether for a
//! statement or for a poll, moves notification frames into the mailbox and
//! collects them into a batch that is handed to the listeners once the wire
//! mutex has been released.

use std::{
	collections::HashMap,
	fmt,
	io::{self, ErrorKind},
	net::{Shutdown, TcpStream},
	sync::{
		Arc,
		atomic::{AtomicU8, Ordering},
	},
	time::{Duration, Instant},
};

use reifydb_pgwire::{Authentication, BackendMessage, FrontendMessage, StartupMessage, WireError};
use reifydb_runtime::{
	interrupt::Interrupt,
	sync::{mutex::Mutex, rwlock::RwLock},
};
use tracing::{debug, trace, warn};

use crate::{
	ConnectionConfig, Error, Notification, Result, ServerError,
	listener::{ListenerRegistry, NotificationListener},
	mailbox::Mailbox,
	transport::{ReadMode, Transport},
	utils::{quote_ident, quote_literal},
};

/// Longest single read or mailbox wait inside a timed poll.
pub(crate) const POLL_SLICE: Duration = Duration::from_millis(50);

/// How long `close` waits for the wire to send `Terminate`.
const TERMINATE_WAIT: Duration = Duration::from_millis(20);

const OPEN: u8 = 0;
const CLOSING: u8 = 1;
const CLOSED: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
	Open,
	Closing,
	Closed,
}

impl ConnectionState {
	fn from_u8(value: u8) -> Self {
		match value {
			OPEN => ConnectionState::Open,
			CLOSING => ConnectionState::Closing,
			_ => ConnectionState::Closed,
		}
	}
}

/// Outcome of a simple query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
	/// One `CommandComplete` tag per executed statement, e.g. `LISTEN`.
	pub tags: Vec<String>,
	/// Columns of the last result set.
	pub columns: Vec<String>,
	/// Rows of the last result set, text format.
	pub rows: Vec<Vec<Option<String>>>,
}

/// A connection to a PostgreSQL-protocol server.
///
/// Clones share the same session. The session closes when [`close`] is called
/// or the last clone is dropped.
///
/// [`close`]: Connection::close
#[derive(Clone)]
pub struct Connection {
	inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
	wire: Mutex<Transport>,
	// second handle on the socket so close never needs the wire
	shutdown: TcpStream,
	state: AtomicU8,
	mailbox: Mailbox,
	listeners: ListenerRegistry,
	interrupt: Interrupt,
	backend_pid: i32,
	parameters: RwLock<HashMap<String, String>>,
}

impl Connection {
	/// Open a session and complete the startup handshake.
	pub fn connect(config: ConnectionConfig) -> Result<Self> {
		config.validate()?;

		let mut transport = Transport::connect(&config.host, config.port, config.connect_timeout)?;
		transport.send_startup(&StartupMessage::Startup {
			params: config.startup_params(),
		})?;

		// no deadline when the timeout does not fit in an Instant
		let deadline = Instant::now().checked_add(config.connect_timeout);
		let mut parameters = HashMap::new();
		let mut backend_pid = 0;

		loop {
			let mode = match deadline {
				Some(deadline) => {
					let remaining = deadline.saturating_duration_since(Instant::now());
					if remaining.is_zero() {
						return Err(io::Error::new(
							ErrorKind::TimedOut,
							"timed out waiting for server startup",
						)
						.into());
					}
					ReadMode::Timeout(remaining)
				}
				None => ReadMode::Blocking,
			};

			let Some(message) = transport.receive(mode)? else {
				continue;
			};

			match message {
				BackendMessage::Authentication(Authentication::Ok) => {}
				BackendMessage::Authentication(Authentication::CleartextPassword) => {
					let password = config.password.clone().ok_or(Error::PasswordRequired)?;
					transport.send(&FrontendMessage::Password(password))?;
				}
				BackendMessage::Authentication(Authentication::Md5Password {
					..
				}) => return Err(Error::UnsupportedAuthentication(5)),
				BackendMessage::Authentication(Authentication::Other(code)) => {
					return Err(Error::UnsupportedAuthentication(code));
				}
				BackendMessage::ParameterStatus {
					name,
					value,
				} => {
					parameters.insert(name, value);
				}
				BackendMessage::BackendKeyData {
					process_id,
					..
				} => backend_pid = process_id,
				BackendMessage::NoticeResponse(fields) => {
					debug!(code = fields.code(), message = fields.message(), "server notice");
				}
				BackendMessage::ErrorResponse(fields) => return Err(Error::Server(ServerError::from(&fields))),
				BackendMessage::ReadyForQuery(_) => break,
				other => {
					return Err(Error::UnexpectedMessage {
						phase: "startup",
						message: format!("{:?}", other),
					});
				}
			}
		}

		let shutdown = transport.shutdown_handle()?;
		debug!(host = %config.host, port = config.port, backend_pid, "connected");

		Ok(Self {
			inner: Arc::new(ConnectionInner {
				wire: Mutex::new(transport),
				shutdown,
				state: AtomicU8::new(OPEN),
				mailbox: Mailbox::new(),
				listeners: ListenerRegistry::new(),
				interrupt: Interrupt::new(),
				backend_pid,
				parameters: RwLock::new(parameters),
			}),
		})
	}

	/// Run `sql` through the simple query protocol. `sql` may hold several
	/// `;` separated statements.
	///
	/// Notifications read while waiting for the result are queued and handed
	/// to the listeners before this returns.
	pub fn execute(&self, sql: &str) -> Result<CommandResult> {
		if sql.contains('\0') {
			return Err(WireError::EmbeddedNul.into());
		}
		self.ensure_open()?;

		let mut batch = Vec::new();
		let result = {
			let mut transport = self.inner.wire.lock();
			self.ensure_open()?;
			self.run_query(&mut transport, sql, &mut batch)
		};
		self.dispatch(batch);
		result
	}

	/// `LISTEN` on `channel`. The name is quoted, so it is case sensitive.
	pub fn listen(&self, channel: &str) -> Result<()> {
		self.execute(&format!("LISTEN {}", quote_ident(channel))).map(|_| ())
	}

	pub fn unlisten(&self, channel: &str) -> Result<()> {
		self.execute(&format!("UNLISTEN {}", quote_ident(channel))).map(|_| ())
	}

	pub fn unlisten_all(&self) -> Result<()> {
		self.execute("UNLISTEN *").map(|_| ())
	}

	/// `NOTIFY` on `channel`, optionally with a payload.
	pub fn notify(&self, channel: &str, payload: Option<&str>) -> Result<()> {
		let sql = match payload {
			Some(payload) => format!("NOTIFY {}, {}", quote_ident(channel), quote_literal(payload)),
			None => format!("NOTIFY {}", quote_ident(channel)),
		};
		self.execute(&sql).map(|_| ())
	}

	/// Return the notifications received so far without waiting.
	///
	/// When no other thread is using the connection, input that is already
	/// available on the socket is read first.
	pub fn poll_notifications(&self) -> Result<Vec<Notification>> {
		self.ensure_open()?;

		let mut batch = Vec::new();
		let read = match self.inner.wire.try_lock() {
			Some(mut transport) => self.read_idle(&mut transport, ReadMode::NonBlocking, &mut batch),
			None => Ok(()),
		};
		self.dispatch(batch);
		read?;

		Ok(self.inner.mailbox.drain_non_blocking())
	}

	/// Return the notifications received so far, waiting up to `timeout` for
	/// the first one to arrive. `Duration::ZERO` waits without limit, as does
	/// a timeout too large to form a deadline.
	///
	/// An elapsed timeout yields an empty `Vec`. The wait fails with
	/// [`Error::ConnectionClosed`] when the connection closes and with
	/// [`Error::Interrupted`] when the [`interrupt_handle`] is raised.
	///
	/// [`interrupt_handle`]: Connection::interrupt_handle
	pub fn poll_notifications_timeout(&self, timeout: Duration) -> Result<Vec<Notification>> {
		let deadline = if timeout.is_zero() {
			None
		} else {
			Instant::now().checked_add(timeout)
		};

		loop {
			self.ensure_open()?;

			let pending = self.inner.mailbox.drain_non_blocking();
			if !pending.is_empty() {
				return Ok(pending);
			}
			if self.inner.interrupt.take() {
				return Err(Error::Interrupted);
			}

			let slice = match deadline {
				None => POLL_SLICE,
				Some(deadline) => {
					let now = Instant::now();
					if now >= deadline {
						return Ok(Vec::new());
					}
					(deadline - now).min(POLL_SLICE)
				}
			};

			match self.inner.wire.try_lock() {
				Some(mut transport) => {
					let mut batch = Vec::new();
					let read = self.read_idle(&mut transport, ReadMode::Timeout(slice), &mut batch);
					drop(transport);
					self.dispatch(batch);
					read?;
				}
				None => {
					// another thread owns the wire; whatever it reads lands in
					// the mailbox
					let batch = self.inner.mailbox.drain_blocking(slice, &self.inner.interrupt)?;
					if !batch.is_empty() {
						return Ok(batch);
					}
				}
			}
		}
	}

	/// Register a listener. Returns `false` if it is already registered.
	pub fn add_notification_listener(&self, listener: Arc<dyn NotificationListener>) -> bool {
		self.inner.listeners.register(listener)
	}

	/// Unregister a listener. Returns `false` if it was not registered.
	pub fn remove_notification_listener(&self, listener: &Arc<dyn NotificationListener>) -> bool {
		self.inner.listeners.unregister(listener)
	}

	/// Token that interrupts a blocked [`poll_notifications_timeout`] or a
	/// listener dispatch in progress on this connection.
	///
	/// [`poll_notifications_timeout`]: Connection::poll_notifications_timeout
	pub fn interrupt_handle(&self) -> Interrupt {
		self.inner.interrupt.clone()
	}

	/// Close the session. Idempotent; releases every thread waiting for
	/// notifications and drops the registered listeners.
	pub fn close(&self) {
		self.inner.close();
	}

	pub fn state(&self) -> ConnectionState {
		ConnectionState::from_u8(self.inner.state.load(Ordering::Acquire))
	}

	pub fn is_closed(&self) -> bool {
		self.state() != ConnectionState::Open
	}

	/// Process id of the server backend serving this session.
	pub fn backend_pid(&self) -> i32 {
		self.inner.backend_pid
	}

	/// A server parameter reported through `ParameterStatus`, such as
	/// `server_version`.
	pub fn parameter(&self, name: &str) -> Option<String> {
		self.inner.parameters.read().get(name).cloned()
	}

	fn ensure_open(&self) -> Result<()> {
		if self.inner.state.load(Ordering::Acquire) == OPEN {
			Ok(())
		} else {
			Err(Error::ConnectionClosed)
		}
	}

	fn run_query(&self, transport: &mut Transport, sql: &str, batch: &mut Vec<Notification>) -> Result<CommandResult> {
		transport.send(&FrontendMessage::Query(sql.to_string())).map_err(|err| match err {
			// rejected by the encoder, nothing reached the socket
			Error::Wire(_) => err,
			err => self.inner.fail(err),
		})?;

		let mut result = CommandResult::default();
		let mut error = None;

		loop {
			let Some(message) = self.receive(transport, ReadMode::Blocking, batch)? else {
				continue;
			};

			match message {
				BackendMessage::RowDescription(columns) => {
					result.columns = columns;
					result.rows.clear();
				}
				BackendMessage::DataRow(values) => {
					result.rows.push(
						values.into_iter()
							.map(|v| v.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
							.collect(),
					);
				}
				BackendMessage::CommandComplete(tag) => result.tags.push(tag),
				BackendMessage::EmptyQueryResponse => {}
				BackendMessage::ErrorResponse(fields) => {
					if error.is_none() {
						error = Some(Error::Server(ServerError::from(&fields)));
					}
				}
				BackendMessage::ReadyForQuery(_) => break,
				other => {
					warn!(message = ?other, "unexpected message during query");
					if error.is_none() {
						error = Some(Error::UnexpectedMessage {
							phase: "query",
							message: format!("{:?}", other),
						});
					}
				}
			}
		}

		match error {
			Some(err) => Err(err),
			None => Ok(result),
		}
	}

	/// Read whatever the server sends outside a query. The first read waits
	/// according to `mode`, the rest only take what is already available.
	fn read_idle(&self, transport: &mut Transport, mode: ReadMode, batch: &mut Vec<Notification>) -> Result<()> {
		let mut mode = mode;
		loop {
			match transport.receive(mode) {
				Ok(Some(message)) => {
					if let Some(message) = self.handle_async(message, batch) {
						self.handle_unsolicited(message);
					}
				}
				Ok(None) => return Ok(()),
				Err(err) => return Err(self.inner.fail(err)),
			}
			mode = ReadMode::NonBlocking;
		}
	}

	/// Next message that is not asynchronous, or `None` if `mode` gave up.
	fn receive(
		&self,
		transport: &mut Transport,
		mode: ReadMode,
		batch: &mut Vec<Notification>,
	) -> Result<Option<BackendMessage>> {
		loop {
			let message = match transport.receive(mode) {
				Ok(Some(message)) => message,
				Ok(None) => return Ok(None),
				Err(err) => return Err(self.inner.fail(err)),
			};
			if let Some(message) = self.handle_async(message, batch) {
				return Ok(Some(message));
			}
		}
	}

	/// Consume asynchronous messages, hand back everything else.
	fn handle_async(&self, message: BackendMessage, batch: &mut Vec<Notification>) -> Option<BackendMessage> {
		match message {
			BackendMessage::NotificationResponse {
				process_id,
				channel,
				payload,
			} => {
				trace!(channel = %channel, process_id, "notification received");
				let notification = Notification::new(channel, payload, process_id);
				self.inner.mailbox.push(notification.clone());
				batch.push(notification);
				None
			}
			BackendMessage::ParameterStatus {
				name,
				value,
			} => {
				self.inner.parameters.write().insert(name, value);
				None
			}
			BackendMessage::NoticeResponse(fields) => {
				debug!(code = fields.code(), message = fields.message(), "server notice");
				None
			}
			other => Some(other),
		}
	}

	fn handle_unsolicited(&self, message: BackendMessage) {
		match message {
			BackendMessage::ErrorResponse(fields) => {
				// typically a FATAL right before the server drops the session
				warn!(
					severity = fields.severity(),
					code = fields.code(),
					message = fields.message(),
					"server error outside a query"
				);
			}
			other => warn!(message = ?other, "ignoring unexpected message"),
		}
	}

	fn dispatch(&self, batch: Vec<Notification>) {
		if batch.is_empty() || self.inner.listeners.is_empty() {
			return;
		}
		let report = self.inner.listeners.dispatch(&batch, &self.inner.interrupt);
		trace!(
			delivered = report.delivered,
			failed = report.failed,
			interrupted = report.interrupted,
			"notifications dispatched"
		);
	}
}

impl ConnectionInner {
	fn close(&self) {
		if self.state.compare_exchange(OPEN, CLOSING, Ordering::AcqRel, Ordering::Acquire).is_err() {
			return;
		}

		if let Some(mut transport) = self.wire.try_lock_for(TERMINATE_WAIT) {
			let _ = transport.send(&FrontendMessage::Terminate);
		}
		let _ = self.shutdown.shutdown(Shutdown::Both);

		self.state.store(CLOSED, Ordering::Release);
		self.mailbox.close();
		// listeners may hold a clone of the connection
		self.listeners.clear();
		debug!(backend_pid = self.backend_pid, "connection closed");
	}

	/// Tear the session down after a transport failure and map the error the
	/// caller sees.
	fn fail(&self, err: Error) -> Error {
		let previous = self.state.swap(CLOSED, Ordering::AcqRel);
		let _ = self.shutdown.shutdown(Shutdown::Both);
		self.mailbox.close();
		self.listeners.clear();

		if previous != OPEN {
			return Error::ConnectionClosed;
		}
		match err {
			Error::ConnectionClosed => {
				debug!(backend_pid = self.backend_pid, "server closed the connection");
				Error::ConnectionClosed
			}
			err => {
				warn!(backend_pid = self.backend_pid, error = %err, "connection lost");
				err
			}
		}
	}
}

impl Drop for ConnectionInner {
	fn drop(&mut self) {
		self.close();
	}
}

impl fmt::Debug for Connection {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Connection")
			.field("backend_pid", &self.inner.backend_pid)
			.field("state", &self.state())
			.field("listeners", &self.inner.listeners.len())
			.field("pending", &self.inner.mailbox.len())
			.finish()
	}
}
