//! Error types for the allocator layer

use thiserror::Error;

/// Result type for allocator operations
pub type Result<T> = core::result::Result<T, AllocError>;

/// Errors reported by the allocators and the system layer.
///
/// Every failure leaves the allocator exactly as it was before the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// Not enough trailing capacity, or no contiguous free run long enough
    #[error("Out of space: requested {requested} bytes, {available} available")]
    OutOfSpace {
        requested: usize,
        available: usize,
    },

    /// Release of more bytes than are currently allocated
    #[error("Invalid range: tried to release {requested} bytes, only {allocated} allocated")]
    InvalidRange {
        requested: usize,
        allocated: usize,
    },

    /// Zero-sized request where a real region is required
    #[error("Zero-sized allocation")]
    ZeroSize,

    /// Alignment is zero or not a power of two
    #[error("Alignment {0} is not a power of two")]
    InvalidAlignment(usize),

    /// Pointer does not belong to this allocator, or is not block-aligned
    #[error("Pointer does not belong to this allocator")]
    ForeignPointer,

    /// Backing buffer cannot hold the allocator
    #[error("Buffer too small: {required} bytes required, {provided} provided")]
    BufferTooSmall {
        required: usize,
        provided: usize,
    },

    /// The OS heap refused the request
    #[error("Heap allocation of {size} bytes failed")]
    HeapExhausted {
        size: usize,
    },

    /// The OS refused to map pages
    #[error("Mapping {pages} pages failed")]
    PageMapFailed {
        pages: usize,
    },
}
