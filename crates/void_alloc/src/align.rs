//! Alignment arithmetic and the back-pointer scheme used by aligned allocations
//!
//! An aligned allocation over-reserves `size + alignment - 1 + W` bytes
//! (`W` = pointer width), places the returned pointer on the requested
//! boundary and stores the raw base in the `W` bytes right before it:
//!
//! ```text
//! raw                      aligned (multiple of alignment)
//!  │                          │
//!  ▼                          ▼
//!  ┌─────────┬───────────────┬──────────────────────────┬────────┐
//!  │ padding │  raw pointer  │        user bytes        │ slack  │
//!  └─────────┴───────────────┴──────────────────────────┴────────┘
//!             ◄───── W ─────►◄───────── size ──────────►
//! ```

use core::mem;
use core::ptr::NonNull;

use crate::error::{AllocError, Result};

/// Width of the back-pointer slot stored before every aligned pointer
pub const POINTER_WIDTH: usize = mem::size_of::<usize>();

/// Align a value up to the given alignment
#[inline]
pub const fn align_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

/// Align a value down to the given alignment
#[inline]
pub const fn align_down(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    value & !(align - 1)
}

/// Check if a pointer is aligned
#[inline]
pub fn is_aligned(ptr: *const u8, align: usize) -> bool {
    (ptr as usize) & (align - 1) == 0
}

/// Reject alignments that are zero or not a power of two
#[inline]
pub fn check_alignment(alignment: usize) -> Result<()> {
    if alignment.is_power_of_two() {
        Ok(())
    } else {
        Err(AllocError::InvalidAlignment(alignment))
    }
}

/// Bytes to request from a backing allocator so that `size` bytes can be
/// placed on an `alignment` boundary with room for the back-pointer.
#[inline]
pub const fn aligned_size(size: usize, alignment: usize) -> usize {
    size.saturating_add(POINTER_WIDTH).saturating_add(alignment - 1)
}

/// Place an aligned pointer inside a region starting at `raw` and record
/// `raw` in the slot immediately before it.
///
/// # Safety
/// `raw` must point to at least `aligned_size(size, alignment)` writable
/// bytes and `alignment` must be a non-zero power of two.
pub unsafe fn place_aligned(raw: NonNull<u8>, alignment: usize) -> NonNull<u8> {
    let base = raw.as_ptr() as usize;
    let target = align_up(base + POINTER_WIDTH, alignment);

    let aligned = raw.as_ptr().add(target - base);
    aligned
        .sub(POINTER_WIDTH)
        .cast::<*mut u8>()
        .write_unaligned(raw.as_ptr());

    NonNull::new_unchecked(aligned)
}

/// Read back the raw base stored by [`place_aligned`].
///
/// # Safety
/// `aligned` must have been produced by [`place_aligned`] and the region
/// must still be live.
pub unsafe fn recover_raw(aligned: NonNull<u8>) -> NonNull<u8> {
    let raw = aligned
        .as_ptr()
        .sub(POINTER_WIDTH)
        .cast::<*mut u8>()
        .read_unaligned();

    NonNull::new_unchecked(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up_down() {
        assert_eq!(align_up(13, 8), 16);
        assert_eq!(align_up(16, 8), 16);
        assert_eq!(align_down(13, 8), 8);
        assert_eq!(align_up(1, 4096), 4096);
        assert_eq!(align_up(4097, 4096), 8192);
    }

    #[test]
    fn test_aligned_size() {
        assert_eq!(aligned_size(10, 16), 10 + POINTER_WIDTH + 15);
        assert_eq!(aligned_size(0, 1), POINTER_WIDTH);
        assert_eq!(aligned_size(usize::MAX, 8), usize::MAX);
    }

    #[test]
    fn test_check_alignment() {
        assert!(check_alignment(64).is_ok());
        assert_eq!(check_alignment(0), Err(AllocError::InvalidAlignment(0)));
        assert_eq!(check_alignment(24), Err(AllocError::InvalidAlignment(24)));
    }

    #[test]
    fn test_place_and_recover() {
        let mut buffer = [0u8; 256];

        for alignment in [4usize, 8, 16, 32, 64] {
            for skew in 0..8 {
                let raw = NonNull::new(buffer[skew..].as_mut_ptr()).unwrap();
                let aligned = unsafe { place_aligned(raw, alignment) };

                assert!(is_aligned(aligned.as_ptr(), alignment));
                assert!(aligned.as_ptr() as usize - POINTER_WIDTH >= raw.as_ptr() as usize);
                assert!(
                    aligned.as_ptr() as usize + 1
                        <= raw.as_ptr() as usize + aligned_size(1, alignment)
                );
                assert_eq!(unsafe { recover_raw(aligned) }, raw);
            }
        }
    }
}
