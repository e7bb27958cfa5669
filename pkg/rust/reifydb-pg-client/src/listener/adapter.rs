// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use crossbeam_channel::{Receiver, Sender, unbounded};

use super::NotificationListener;
use crate::{Error, Notification, Result};

/// Listener backed by a closure.
pub struct FnListener<F> {
	f: F,
}

/// Wrap a closure as a [`NotificationListener`].
pub fn from_fn<F>(f: F) -> FnListener<F>
where
	F: Fn(&Notification) -> Result<()> + Send + Sync,
{
	FnListener {
		f,
	}
}

impl<F> NotificationListener for FnListener<F>
where
	F: Fn(&Notification) -> Result<()> + Send + Sync,
{
	fn handle_notification(&self, notification: &Notification) -> Result<()> {
		(self.f)(notification)
	}
}

/// Forwards every notification into a channel so it can be consumed on
/// another thread.
pub struct ChannelListener {
	sender: Sender<Notification>,
}

/// Create a listener together with the receiving end of its channel.
///
/// Once the receiver is dropped, every delivery fails with
/// [`Error::Listener`].
pub fn channel() -> (ChannelListener, Receiver<Notification>) {
	let (sender, receiver) = unbounded();
	(
		ChannelListener {
			sender,
		},
		receiver,
	)
}

impl NotificationListener for ChannelListener {
	fn handle_notification(&self, notification: &Notification) -> Result<()> {
		self.sender.send(notification.clone()).map_err(|_| Error::listener("notification receiver disconnected"))
	}
}
