//! Caller-side locking for allocators shared between threads
//!
//! The allocators themselves are single-writer and lock-free of any
//! synchronization. When one has to be reached from several threads, the
//! caller wraps it in [`Shared`] and every operation goes through the lock.

use parking_lot::{Mutex, MutexGuard};

/// An allocator behind a mutex
pub struct Shared<A> {
    inner: Mutex<A>,
}

impl<A> Shared<A> {
    pub fn new(allocator: A) -> Self {
        Self {
            inner: Mutex::new(allocator),
        }
    }

    /// Lock the allocator for a sequence of operations
    pub fn lock(&self) -> MutexGuard<'_, A> {
        self.inner.lock()
    }

    /// Run one closure with the allocator locked
    pub fn with<R>(&self, f: impl FnOnce(&mut A) -> R) -> R {
        f(&mut self.inner.lock())
    }

    pub fn into_inner(self) -> A {
        self.inner.into_inner()
    }
}
