// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use serde::{Deserialize, Serialize};

/// An asynchronous notification raised by `NOTIFY` on a channel this
/// connection listens on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Notification {
	channel: String,
	payload: String,
	process_id: i32,
}

impl Notification {
	pub fn new(channel: impl Into<String>, payload: impl Into<String>, process_id: i32) -> Self {
		Self {
			channel: channel.into(),
			payload: payload.into(),
			process_id,
		}
	}

	/// Channel the notification was raised on.
	pub fn channel(&self) -> &str {
		&self.channel
	}

	/// Payload string; empty when `NOTIFY` was issued without one.
	pub fn payload(&self) -> &str {
		&self.payload
	}

	/// Process id of the notifying server backend.
	pub fn process_id(&self) -> i32 {
		self.process_id
	}
}
