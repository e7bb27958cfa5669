// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Interrupt tokens.
//!
//! Threads cannot be interrupted from the outside, so blocking operations take
//! an [`Interrupt`] and poll it while they wait. Observing a raised interrupt
//! through [`Interrupt::take`] also clears it, so a single `interrupt()` call
//! aborts exactly one wait.

use std::sync::{
	Arc,
	atomic::{AtomicBool, Ordering},
};

/// A shared, clonable interrupt flag.
#[derive(Clone, Debug, Default)]
pub struct Interrupt {
	raised: Arc<AtomicBool>,
}

impl Interrupt {
	pub fn new() -> Self {
		Self::default()
	}

	/// Raise the interrupt.
	pub fn interrupt(&self) {
		self.raised.store(true, Ordering::SeqCst);
	}

	/// Check if an interrupt is pending without clearing it.
	pub fn is_interrupted(&self) -> bool {
		self.raised.load(Ordering::SeqCst)
	}

	/// Consume a pending interrupt. Returns `true` if one was raised.
	pub fn take(&self) -> bool {
		self.raised.swap(false, Ordering::SeqCst)
	}
}
