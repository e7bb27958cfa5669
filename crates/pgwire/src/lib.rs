// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Message codec for the PostgreSQL frontend/backend protocol (version 3).
//!
//! Both directions are covered: the client encodes [`FrontendMessage`]s and
//! decodes [`BackendMessage`]s, the test server does the reverse. Decoders
//! work on a byte buffer and return `Ok(None)` until a complete message is
//! available, together with the number of bytes the message occupied.

pub mod backend;
mod buf;
pub mod error;
pub mod frontend;

pub use backend::{Authentication, BackendMessage, ErrorFields, TransactionStatus};
pub use error::WireError;
pub use frontend::{FrontendMessage, StartupMessage};

/// Protocol version 3.0 as sent in the startup packet.
pub const PROTOCOL_VERSION: i32 = 196608;

/// Largest message the server accepts, length prefix included.
pub const MAX_MESSAGE_LEN: usize = 0x3fff_ffff;

pub type Result<T> = std::result::Result<T, WireError>;
