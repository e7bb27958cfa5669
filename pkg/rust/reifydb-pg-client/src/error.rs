// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use std::{fmt, io};

use reifydb_pgwire::{ErrorFields, WireError};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	/// The connection was closed, locally or by the server.
	#[error("connection has been closed")]
	ConnectionClosed,

	/// A blocking wait was interrupted through the connection's interrupt handle.
	#[error("wait for notifications was interrupted")]
	Interrupted,

	#[error("I/O error: {0}")]
	Io(#[from] io::Error),

	#[error("protocol error: {0}")]
	Wire(#[from] WireError),

	#[error("{0}")]
	Server(ServerError),

	#[error("invalid connection configuration: {0}")]
	InvalidConfig(String),

	#[error("server requested unsupported authentication method {0}")]
	UnsupportedAuthentication(i32),

	#[error("server requested a password but none was configured")]
	PasswordRequired,

	#[error("unexpected message during {phase}: {message}")]
	UnexpectedMessage {
		phase: &'static str,
		message: String,
	},

	/// Raised by listener implementations from `handle_notification`.
	#[error("listener failed: {0}")]
	Listener(String),

	#[error("listener panicked: {0}")]
	ListenerPanicked(String),
}

impl Error {
	pub fn listener(message: impl Into<String>) -> Self {
		Error::Listener(message.into())
	}

	/// SQLSTATE of a server error.
	pub fn code(&self) -> Option<&str> {
		match self {
			Error::Server(err) => Some(&err.code),
			_ => None,
		}
	}
}

/// An `ErrorResponse` reported by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
	pub severity: String,
	pub code: String,
	pub message: String,
	pub detail: Option<String>,
	pub hint: Option<String>,
}

impl From<&ErrorFields> for ServerError {
	fn from(fields: &ErrorFields) -> Self {
		Self {
			severity: fields.severity().to_string(),
			code: fields.code().to_string(),
			message: fields.message().to_string(),
			detail: fields.detail().map(str::to_string),
			hint: fields.hint().map(str::to_string),
		}
	}
}

impl fmt::Display for ServerError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} {}: {}", self.severity, self.code, self.message)?;
		if let Some(detail) = &self.detail {
			write!(f, " ({})", detail)?;
		}
		Ok(())
	}
}
