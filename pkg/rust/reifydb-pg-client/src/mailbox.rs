// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Buffer of notifications that have been read from the wire but not yet
//! handed to a pull caller.
//!
//! Every push wakes all waiters; each waiter re-checks the buffer after waking,
//! so when several threads wait at once the first to re-acquire the lock takes
//! the whole batch and the others go back to waiting. Closing the mailbox wakes
//! everybody and makes every current and future wait fail.

use std::{
	collections::VecDeque,
	time::{Duration, Instant},
};

use reifydb_runtime::{
	interrupt::Interrupt,
	sync::{condvar::Condvar, mutex::Mutex},
};
use tracing::trace;

use crate::{Error, Notification, Result};

/// Interval for checking interrupts during a blocked wait.
pub(crate) const INTERRUPT_CHECK_INTERVAL: Duration = Duration::from_millis(10);

struct MailboxState {
	queue: VecDeque<Notification>,
	closed: bool,
}

pub struct Mailbox {
	state: Mutex<MailboxState>,
	available: Condvar,
}

impl Mailbox {
	pub fn new() -> Self {
		Self {
			state: Mutex::new(MailboxState {
				queue: VecDeque::new(),
				closed: false,
			}),
			available: Condvar::new(),
		}
	}

	/// Append a notification and wake all waiters.
	///
	/// Returns `false` if the mailbox is closed; the notification is dropped.
	pub fn push(&self, notification: Notification) -> bool {
		self.push_all(std::iter::once(notification)) == 1
	}

	/// Append notifications in order and wake all waiters. Returns how many
	/// were queued.
	pub fn push_all(&self, notifications: impl IntoIterator<Item = Notification>) -> usize {
		let mut state = self.state.lock();
		if state.closed {
			return 0;
		}

		let before = state.queue.len();
		state.queue.extend(notifications);
		let added = state.queue.len() - before;
		drop(state);

		if added > 0 {
			self.available.notify_all();
		}
		added
	}

	/// Remove and return everything currently buffered. Never blocks.
	pub fn drain_non_blocking(&self) -> Vec<Notification> {
		self.state.lock().queue.drain(..).collect()
	}

	/// Remove and return the buffered batch, waiting for one if necessary.
	///
	/// A non-empty buffer is returned without waiting. Otherwise this waits
	/// until notifications arrive, `timeout` elapses (an empty `Vec` is
	/// returned), the mailbox is closed ([`Error::ConnectionClosed`]) or
	/// `interrupt` is raised ([`Error::Interrupted`]). A zero `timeout`, or
	/// one too large to form a deadline, waits without limit.
	pub fn drain_blocking(&self, timeout: Duration, interrupt: &Interrupt) -> Result<Vec<Notification>> {
		let deadline = if timeout.is_zero() {
			None
		} else {
			Instant::now().checked_add(timeout)
		};

		let mut state = self.state.lock();
		loop {
			if !state.queue.is_empty() {
				return Ok(state.queue.drain(..).collect());
			}
			if state.closed {
				return Err(Error::ConnectionClosed);
			}
			if interrupt.take() {
				return Err(Error::Interrupted);
			}

			let wait = match deadline {
				None => INTERRUPT_CHECK_INTERVAL,
				Some(deadline) => {
					let now = Instant::now();
					if now >= deadline {
						return Ok(Vec::new());
					}
					(deadline - now).min(INTERRUPT_CHECK_INTERVAL)
				}
			};
			self.available.wait_for(&mut state, wait);
		}
	}

	/// Close the mailbox, discard pending notifications and release all
	/// waiters.
	pub fn close(&self) {
		let mut state = self.state.lock();
		if state.closed {
			return;
		}
		state.closed = true;
		let discarded = state.queue.len();
		state.queue.clear();
		drop(state);

		trace!(discarded, "mailbox closed");
		self.available.notify_all();
	}

	pub fn is_closed(&self) -> bool {
		self.state.lock().closed
	}

	pub fn len(&self) -> usize {
		self.state.lock().queue.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

impl Default for Mailbox {
	fn default() -> Self {
		Self::new()
	}
}
