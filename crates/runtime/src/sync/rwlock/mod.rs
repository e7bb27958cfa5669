// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! RwLock synchronization primitive.

pub type RwLockReadGuard<'a, T> = parking_lot::RwLockReadGuard<'a, T>;
pub type RwLockWriteGuard<'a, T> = parking_lot::RwLockWriteGuard<'a, T>;

/// A reader-writer lock.
#[derive(Debug, Default)]
pub struct RwLock<T> {
	inner: parking_lot::RwLock<T>,
}

impl<T> RwLock<T> {
	#[inline]
	pub fn new(value: T) -> Self {
		Self {
			inner: parking_lot::RwLock::new(value),
		}
	}

	#[inline]
	pub fn read(&self) -> RwLockReadGuard<'_, T> {
		self.inner.read()
	}

	#[inline]
	pub fn write(&self) -> RwLockWriteGuard<'_, T> {
		self.inner.write()
	}
}
