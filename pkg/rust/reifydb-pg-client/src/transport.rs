// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use std::{
	io::{self, ErrorKind, Read, Write},
	net::{SocketAddr, TcpStream, ToSocketAddrs},
	time::Duration,
};

use reifydb_pgwire::{BackendMessage, FrontendMessage, StartupMessage};
use tracing::trace;

use crate::{Error, Result};

const READ_CHUNK: usize = 8192;

/// How [`Transport::receive`] waits for bytes when no complete message is
/// buffered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadMode {
	Blocking,
	/// Wait at most this long for the next chunk.
	Timeout(Duration),
	NonBlocking,
}

/// A framed socket: writes whole frontend messages and reads whole backend
/// messages, keeping partial input buffered between calls.
pub(crate) struct Transport {
	stream: TcpStream,
	read_buffer: Vec<u8>,
	mode: ReadMode,
}

impl Transport {
	pub(crate) fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self> {
		let addrs: Vec<SocketAddr> = (host, port).to_socket_addrs()?.collect();

		let mut last_err = None;
		for addr in addrs {
			match TcpStream::connect_timeout(&addr, timeout) {
				Ok(stream) => {
					stream.set_nodelay(true)?;
					trace!(%addr, "tcp connected");
					return Ok(Self {
						stream,
						read_buffer: Vec::with_capacity(READ_CHUNK),
						mode: ReadMode::Blocking,
					});
				}
				Err(err) => last_err = Some(err),
			}
		}

		Err(last_err
			.unwrap_or_else(|| io::Error::new(ErrorKind::NotFound, format!("could not resolve {}", host)))
			.into())
	}

	/// A second handle on the socket, used to shut it down without owning the
	/// transport.
	pub(crate) fn shutdown_handle(&self) -> Result<TcpStream> {
		Ok(self.stream.try_clone()?)
	}

	pub(crate) fn send_startup(&mut self, message: &StartupMessage) -> Result<()> {
		let mut out = Vec::new();
		message.encode(&mut out)?;
		self.write(&out)
	}

	pub(crate) fn send(&mut self, message: &FrontendMessage) -> Result<()> {
		let mut out = Vec::new();
		message.encode(&mut out)?;
		self.write(&out)
	}

	fn write(&mut self, bytes: &[u8]) -> Result<()> {
		if self.mode == ReadMode::NonBlocking {
			self.set_mode(ReadMode::Blocking)?;
		}
		self.stream.write_all(bytes)?;
		self.stream.flush()?;
		Ok(())
	}

	/// Read the next backend message.
	///
	/// Returns `Ok(None)` when `mode` gave up waiting before a complete
	/// message was available; partial input stays buffered. End of stream
	/// fails with [`Error::ConnectionClosed`].
	pub(crate) fn receive(&mut self, mode: ReadMode) -> Result<Option<BackendMessage>> {
		loop {
			if let Some((message, consumed)) = BackendMessage::decode(&self.read_buffer)? {
				self.read_buffer.drain(..consumed);
				return Ok(Some(message));
			}

			self.set_mode(mode)?;

			let mut chunk = [0u8; READ_CHUNK];
			match self.stream.read(&mut chunk) {
				Ok(0) => return Err(Error::ConnectionClosed),
				Ok(n) => self.read_buffer.extend_from_slice(&chunk[..n]),
				Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
					return Ok(None);
				}
				Err(e) if e.kind() == ErrorKind::Interrupted => continue,
				Err(e) => return Err(e.into()),
			}
		}
	}

	fn set_mode(&mut self, mode: ReadMode) -> Result<()> {
		if self.mode == mode {
			return Ok(());
		}

		match mode {
			ReadMode::NonBlocking => self.stream.set_nonblocking(true)?,
			ReadMode::Blocking => {
				self.stream.set_nonblocking(false)?;
				self.stream.set_read_timeout(None)?;
			}
			ReadMode::Timeout(timeout) => {
				self.stream.set_nonblocking(false)?;
				// a zero read timeout is rejected by the OS layer
				self.stream.set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
			}
		}
		self.mode = mode;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use std::{
		io::{Read, Write},
		net::TcpListener,
		thread,
		time::{Duration, Instant},
	};

	use reifydb_pgwire::{BackendMessage, FrontendMessage};

	use super::{ReadMode, Transport};
	use crate::Error;

	fn pair() -> (Transport, std::net::TcpStream) {
		let listener = TcpListener::bind("127.0.0.1:0").unwrap();
		let port = listener.local_addr().unwrap().port();
		let transport = Transport::connect("127.0.0.1", port, Duration::from_secs(5)).unwrap();
		let (server, _) = listener.accept().unwrap();
		(transport, server)
	}

	fn encoded(message: &BackendMessage) -> Vec<u8> {
		let mut out = Vec::new();
		message.encode(&mut out).unwrap();
		out
	}

	#[test]
	fn test_non_blocking_without_data() {
		let (mut transport, _server) = pair();
		assert!(transport.receive(ReadMode::NonBlocking).unwrap().is_none());
	}

	#[test]
	fn test_timeout_without_data() {
		let (mut transport, _server) = pair();

		let start = Instant::now();
		assert!(transport.receive(ReadMode::Timeout(Duration::from_millis(100))).unwrap().is_none());
		assert!(start.elapsed() >= Duration::from_millis(90));
	}

	#[test]
	fn test_message_split_across_reads() {
		let (mut transport, mut server) = pair();
		let bytes = encoded(&BackendMessage::NotificationResponse {
			process_id: 3,
			channel: "c".to_string(),
			payload: "p".to_string(),
		});

		server.write_all(&bytes[..4]).unwrap();
		server.flush().unwrap();
		thread::sleep(Duration::from_millis(50));
		assert!(transport.receive(ReadMode::NonBlocking).unwrap().is_none());

		server.write_all(&bytes[4..]).unwrap();
		let message = transport.receive(ReadMode::Timeout(Duration::from_secs(5))).unwrap().unwrap();
		assert!(matches!(message, BackendMessage::NotificationResponse { process_id: 3, .. }));
	}

	#[test]
	fn test_send_after_non_blocking_read() {
		let (mut transport, mut server) = pair();
		assert!(transport.receive(ReadMode::NonBlocking).unwrap().is_none());

		transport.send(&FrontendMessage::Terminate).unwrap();

		let mut buf = [0u8; 5];
		server.read_exact(&mut buf).unwrap();
		assert_eq!(buf, [b'X', 0, 0, 0, 4]);
	}

	#[test]
	fn test_eof_is_connection_closed() {
		let (mut transport, server) = pair();
		drop(server);
		assert!(matches!(transport.receive(ReadMode::Blocking), Err(Error::ConnectionClosed)));
	}
}
