//! Tracing decorator for the system allocation layer
//!
//! [`Traced`] wraps any [`SystemMemory`] and logs every call with the
//! caller's source location, the requested size and the resulting pointer.
//! Control flow is unchanged: results are passed through as-is.

use core::panic::Location;
use core::ptr::NonNull;

use super::{AllocatorStats, SystemMemory};
use crate::error::Result;

/// Logging wrapper with the same contract as the wrapped allocator
#[derive(Debug, Clone, Copy, Default)]
pub struct Traced<S> {
    inner: S,
}

impl<S: SystemMemory> Traced<S> {
    pub const fn new(inner: S) -> Self {
        Self { inner }
    }

    /// The wrapped allocator
    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

fn report(site: &Location<'_>, op: &str, size: usize, result: &Result<NonNull<u8>>) {
    match result {
        Ok(ptr) => log::debug!("[{}] {} {} bytes -> {:p}", site, op, size, ptr.as_ptr()),
        Err(err) => log::warn!("[{}] {} {} bytes failed: {}", site, op, size, err),
    }
}

impl<S: SystemMemory> SystemMemory for Traced<S> {
    fn stats(&self) -> &AllocatorStats {
        self.inner.stats()
    }

    #[track_caller]
    fn alloc(&self, size: usize) -> Result<NonNull<u8>> {
        let result = self.inner.alloc(size);
        report(Location::caller(), "alloc", size, &result);
        result
    }

    #[track_caller]
    fn alloc_aligned(&self, size: usize, alignment: usize) -> Result<NonNull<u8>> {
        let result = self.inner.alloc_aligned(size, alignment);
        match &result {
            Ok(ptr) => log::debug!(
                "[{}] alloc_aligned {} bytes (align {}) -> {:p}",
                Location::caller(),
                size,
                alignment,
                ptr.as_ptr()
            ),
            Err(err) => log::warn!(
                "[{}] alloc_aligned {} bytes (align {}) failed: {}",
                Location::caller(),
                size,
                alignment,
                err
            ),
        }
        result
    }

    #[track_caller]
    unsafe fn realloc(
        &self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Result<NonNull<u8>> {
        let result = self.inner.realloc(ptr, old_size, new_size);
        match &result {
            Ok(new_ptr) => log::debug!(
                "[{}] realloc {:p} {} -> {} bytes -> {:p}",
                Location::caller(),
                ptr.as_ptr(),
                old_size,
                new_size,
                new_ptr.as_ptr()
            ),
            Err(err) => log::warn!(
                "[{}] realloc {:p} {} -> {} bytes failed: {}",
                Location::caller(),
                ptr.as_ptr(),
                old_size,
                new_size,
                err
            ),
        }
        result
    }

    #[track_caller]
    unsafe fn free(&self, ptr: NonNull<u8>, size: usize) {
        log::debug!("[{}] free {} bytes at {:p}", Location::caller(), size, ptr.as_ptr());
        self.inner.free(ptr, size);
    }

    #[track_caller]
    unsafe fn free_aligned(&self, ptr: NonNull<u8>, size: usize, alignment: usize) {
        log::debug!(
            "[{}] free_aligned {} bytes (align {}) at {:p}",
            Location::caller(),
            size,
            alignment,
            ptr.as_ptr()
        );
        self.inner.free_aligned(ptr, size, alignment);
    }

    #[track_caller]
    fn page_alloc(&self, page_count: usize) -> Result<NonNull<u8>> {
        let result = self.inner.page_alloc(page_count);
        report(
            Location::caller(),
            "page_alloc",
            page_count * self.inner.page_size(),
            &result,
        );
        result
    }

    #[track_caller]
    unsafe fn page_free(&self, ptr: NonNull<u8>, page_count: usize) {
        log::debug!(
            "[{}] page_free {} pages at {:p}",
            Location::caller(),
            page_count,
            ptr.as_ptr()
        );
        self.inner.page_free(ptr, page_count);
    }

    fn page_size(&self) -> usize {
        self.inner.page_size()
    }
}
