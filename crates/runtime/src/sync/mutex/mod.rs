// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Mutex synchronization primitive.
//!
//! Thin wrapper over `parking_lot::Mutex`. Lock acquisition is eventually
//! fair, so a thread that keeps re-locking cannot starve another one waiting
//! on the same mutex.

use std::{
	fmt,
	ops::{Deref, DerefMut},
	time::Duration,
};

/// A mutual exclusion primitive for protecting shared data.
pub struct Mutex<T> {
	inner: parking_lot::Mutex<T>,
}

impl<T: fmt::Debug> fmt::Debug for Mutex<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Mutex").field("data", &self.inner).finish()
	}
}

impl<T> Mutex<T> {
	/// Creates a new mutex.
	#[inline]
	pub fn new(value: T) -> Self {
		Self {
			inner: parking_lot::Mutex::new(value),
		}
	}

	/// Acquires the mutex, blocking until it is available.
	#[inline]
	pub fn lock(&self) -> MutexGuard<'_, T> {
		MutexGuard {
			inner: self.inner.lock(),
		}
	}

	/// Attempts to acquire the mutex without blocking.
	#[inline]
	pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
		self.inner.try_lock().map(|inner| MutexGuard {
			inner,
		})
	}

	/// Attempts to acquire the mutex, giving up after `timeout`.
	#[inline]
	pub fn try_lock_for(&self, timeout: Duration) -> Option<MutexGuard<'_, T>> {
		self.inner.try_lock_for(timeout).map(|inner| MutexGuard {
			inner,
		})
	}

	/// Consumes the mutex and returns the protected value.
	#[inline]
	pub fn into_inner(self) -> T {
		self.inner.into_inner()
	}
}

impl<T: Default> Default for Mutex<T> {
	fn default() -> Self {
		Self::new(T::default())
	}
}

/// A guard providing mutable access to the data protected by a Mutex.
pub struct MutexGuard<'a, T> {
	pub(in crate::sync) inner: parking_lot::MutexGuard<'a, T>,
}

impl<'a, T> Deref for MutexGuard<'a, T> {
	type Target = T;

	fn deref(&self) -> &T {
		&self.inner
	}
}

impl<'a, T> DerefMut for MutexGuard<'a, T> {
	fn deref_mut(&mut self) -> &mut T {
		&mut self.inner
	}
}
