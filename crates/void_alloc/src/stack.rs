//! Stack allocator - LIFO bump allocation over a borrowed buffer

use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use core::ptr::{self, NonNull};

use crate::align::{aligned_size, check_alignment, place_aligned};
use crate::error::{AllocError, Result};
use crate::MemoryUsage;

/// Stack allocator - bump allocation with LIFO release
///
/// Allocations are carved off the front of the free region and released by
/// rewinding the top. Callers must pop in reverse push order with the same
/// sizes; the allocator only detects pops larger than what is allocated,
/// not misordered ones. Released bytes are zeroed.
///
/// The buffer is borrowed, so the allocator cannot outlive it.
pub struct StackAllocator<'a> {
    /// Start of the borrowed buffer
    base: NonNull<u8>,
    /// Buffer length in bytes
    capacity: usize,
    /// Offset of the first free byte
    current: usize,
    _buffer: PhantomData<&'a mut [u8]>,
}

// Safety: the allocator has exclusive access to its buffer through the
// `&'a mut` borrow it was built from.
unsafe impl Send for StackAllocator<'_> {}

impl<'a> StackAllocator<'a> {
    /// Wrap the whole of `buffer`
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self {
            capacity: buffer.len(),
            base: NonNull::from(buffer).cast(),
            current: 0,
            _buffer: PhantomData,
        }
    }

    /// Wrap the first `capacity` bytes of `buffer`
    pub fn with_capacity(capacity: usize, buffer: &'a mut [u8]) -> Result<Self> {
        if buffer.len() < capacity {
            return Err(AllocError::BufferTooSmall {
                required: capacity,
                provided: buffer.len(),
            });
        }
        Ok(Self::new(&mut buffer[..capacity]))
    }

    /// Reserve `size` bytes at the top of the stack
    pub fn push(&mut self, size: usize) -> Result<NonNull<u8>> {
        let available = self.remaining_memory();
        if size > available {
            return Err(AllocError::OutOfSpace { requested: size, available });
        }

        let ptr = unsafe { self.base.as_ptr().add(self.current) };
        self.current += size;

        Ok(unsafe { NonNull::new_unchecked(ptr) })
    }

    /// Reserve `size` bytes on an `alignment` boundary
    pub fn push_aligned(&mut self, size: usize, alignment: usize) -> Result<NonNull<u8>> {
        check_alignment(alignment)?;
        let raw = self.push(aligned_size(size, alignment))?;
        Ok(unsafe { place_aligned(raw, alignment) })
    }

    /// Release the top `size` bytes and zero them
    pub fn pop(&mut self, size: usize) -> Result<()> {
        if size > self.current {
            return Err(AllocError::InvalidRange {
                requested: size,
                allocated: self.current,
            });
        }

        self.current -= size;
        unsafe { ptr::write_bytes(self.base.as_ptr().add(self.current), 0, size) };
        Ok(())
    }

    /// Release an allocation made by [`StackAllocator::push_aligned`]
    pub fn pop_aligned(&mut self, size: usize, alignment: usize) -> Result<()> {
        check_alignment(alignment)?;
        self.pop(aligned_size(size, alignment))
    }

    /// Release everything and zero the whole buffer
    pub fn clear(&mut self) {
        unsafe { ptr::write_bytes(self.base.as_ptr(), 0, self.capacity) };
        self.current = 0;
    }

    /// Bytes still available above the top
    pub fn remaining_memory(&self) -> usize {
        self.capacity - self.current
    }

    /// Get the current top position
    pub fn current_position(&self) -> usize {
        self.current
    }

    /// Get a marker for the current stack position
    pub fn marker(&self) -> StackMarker {
        StackMarker(self.current)
    }

    /// Release everything pushed after `marker`, zeroing it.
    ///
    /// Markers above the current top are ignored.
    pub fn rollback(&mut self, marker: StackMarker) {
        if marker.0 <= self.current {
            let released = self.current - marker.0;
            unsafe { ptr::write_bytes(self.base.as_ptr().add(marker.0), 0, released) };
            self.current = marker.0;
        }
    }

    /// Open a scope that rolls back on drop
    pub fn scope(&mut self) -> StackScope<'_, 'a> {
        StackScope {
            marker: self.marker(),
            stack: self,
        }
    }
}

impl MemoryUsage for StackAllocator<'_> {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn used(&self) -> usize {
        self.current
    }
}

/// Marker for stack position
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StackMarker(usize);

impl StackMarker {
    /// Offset recorded by this marker
    pub fn offset(self) -> usize {
        self.0
    }
}

/// Scoped stack allocator guard
///
/// Derefs to the stack; everything pushed through it is released when the
/// guard drops. Used for per-frame scratch memory.
pub struct StackScope<'s, 'a> {
    stack: &'s mut StackAllocator<'a>,
    marker: StackMarker,
}

impl<'a> Deref for StackScope<'_, 'a> {
    type Target = StackAllocator<'a>;

    fn deref(&self) -> &Self::Target {
        self.stack
    }
}

impl DerefMut for StackScope<'_, '_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.stack
    }
}

impl Drop for StackScope<'_, '_> {
    fn drop(&mut self) {
        self.stack.rollback(self.marker);
    }
}
