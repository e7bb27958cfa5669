// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Blocking PostgreSQL-protocol client focused on `LISTEN`/`NOTIFY`.
//!
//! Notifications can be consumed two ways, and every notification goes to
//! both:
//!
//! - pull: [`Connection::poll_notifications`] returns what has arrived,
//!   [`Connection::poll_notifications_timeout`] waits for it;
//! - push: [`NotificationListener`]s registered with
//!   [`Connection::add_notification_listener`] are called on whichever thread
//!   read the notifications off the socket.
//!
//! ```ignore
//! let conn = Connection::connect(ConnectionConfig::new().port(5432))?;
//! conn.listen("orders")?;
//! for notification in conn.poll_notifications_timeout(Duration::from_secs(10))? {
//!     println!("{}: {}", notification.channel(), notification.payload());
//! }
//! ```

mod config;
mod connection;
mod error;
pub mod listener;
mod mailbox;
mod notification;
mod transport;
mod utils;

pub use config::{ConnectionConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_PORT};
pub use connection::{CommandResult, Connection, ConnectionState};
pub use error::{Error, Result, ServerError};
pub use listener::{DispatchReport, ListenerRegistry, NotificationListener};
pub use mailbox::Mailbox;
pub use notification::Notification;
pub use reifydb_runtime::interrupt::Interrupt;
