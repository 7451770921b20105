//! # void_alloc - Engine Allocator Layer
//!
//! The allocators every other engine subsystem draws its memory from:
//! - Stack: LIFO bump allocation over a borrowed buffer
//! - Block: fixed-size block pool with a one-byte-per-block free-list
//! - System: usage-tracked OS heap and page allocation, with a tracing decorator
//! - Align: alignment arithmetic and the back-pointer scheme for aligned allocations
//!
//! ## Usage
//!
//! Arenas are reserved from the system layer once at startup, then the
//! allocators are built over them:
//!
//! ```rust,no_run
//! use void_alloc::{EngineMemory, MemoryConfig};
//!
//! let system = void_alloc::system::engine_system();
//! let mut memory = EngineMemory::reserve(MemoryConfig::default(), &system)?;
//! let (mut frame, mut pool) = memory.allocators()?;
//!
//! let scratch = frame.push(256)?;
//! let object = pool.alloc_aligned(48, 16)?;
//! pool.free_aligned(object, 48, 16)?;
//! frame.pop(256)?;
//! # let _ = scratch;
//! # Ok::<(), void_alloc::AllocError>(())
//! ```
//!
//! ## Threading
//!
//! Every allocator is single-writer: operations take `&mut self` and never
//! lock. Wrap an allocator in [`Shared`] to reach it from several threads.

pub mod align;
pub mod block;
pub mod config;
pub mod error;
pub mod shared;
pub mod stack;
pub mod system;

pub use block::{BlockAllocator, BlockStats};
pub use config::{EngineMemory, MemoryConfig};
pub use error::{AllocError, Result};
pub use shared::Shared;
pub use stack::{StackAllocator, StackMarker, StackScope};
pub use system::{AllocatorStats, PageBuffer, SystemAllocator, SystemMemory, Traced};

/// Capacity reporting shared by the buffer-backed allocators
pub trait MemoryUsage {
    /// Get the total capacity
    fn capacity(&self) -> usize;

    /// Get the currently used memory
    fn used(&self) -> usize;

    /// Get the available memory
    fn available(&self) -> usize {
        self.capacity() - self.used()
    }
}

pub mod prelude {
    pub use crate::{BlockAllocator, MemoryUsage, Shared, StackAllocator, StackScope};
    pub use crate::{AllocatorStats, SystemAllocator, SystemMemory, Traced};
    pub use crate::{EngineMemory, MemoryConfig};
    pub use crate::align::{align_down, align_up, aligned_size, is_aligned};
    pub use crate::error::{AllocError, Result};
}
