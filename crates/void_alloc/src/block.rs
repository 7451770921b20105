//! Block allocator - fixed-size block pool with an in-buffer free-list
//!
//! The allocator lives entirely inside one caller-supplied buffer:
//!
//! ```text
//! ┌──────────────┬──────────────────────┬──────────┬──────────┬─────┬──────────┐
//! │    header    │  flags (1 byte each) │ block 0  │ block 1  │ ... │ block n-1│
//! │ size | count │  0 = free, 1 = used  │          │          │     │          │
//! └──────────────┴──────────────────────┴──────────┴──────────┴─────┴──────────┘
//! ```
//!
//! An allocation takes a contiguous run of blocks found by a first-fit scan
//! of the flags. No size is stored per allocation: callers pass the same
//! size back on free and realloc.

use core::marker::PhantomData;
use core::mem;
use core::ptr::{self, NonNull};

use crate::align::{aligned_size, check_alignment, place_aligned, recover_raw, POINTER_WIDTH};
use crate::error::{AllocError, Result};
use crate::MemoryUsage;

const FREE: u8 = 0;
const USED: u8 = 1;

/// Fixed fields written at the start of the buffer, read back by
/// [`BlockAllocator::attach`]
#[repr(C)]
struct BlockHeader {
    block_size: usize,
    block_count: usize,
}

const HEADER_SIZE: usize = mem::size_of::<BlockHeader>();

/// Pool allocator over fixed-size blocks
///
/// Allocation is a linear first-fit scan, O(block_count) worst case. There
/// is no compaction. Freed bytes are zeroed.
pub struct BlockAllocator<'a> {
    /// Free-list flags, `block_count` bytes
    flags: NonNull<u8>,
    /// First block
    blocks: NonNull<u8>,
    block_size: usize,
    block_count: usize,
    _buffer: PhantomData<&'a mut [u8]>,
}

// Safety: the allocator has exclusive access to its buffer through the
// `&'a mut` borrow it was built from.
unsafe impl Send for BlockAllocator<'_> {}

impl<'a> BlockAllocator<'a> {
    /// Bytes of backing storage needed for `block_count` blocks of `block_size`
    pub const fn memory_requirement(block_count: usize, block_size: usize) -> usize {
        HEADER_SIZE
            .saturating_add(block_count)
            .saturating_add(block_count.saturating_mul(block_size))
    }

    /// Lay the allocator out over `buffer`.
    ///
    /// The free-list is zeroed here, so the buffer does not need to be
    /// zero-initialized.
    pub fn new(block_count: usize, block_size: usize, buffer: &'a mut [u8]) -> Result<Self> {
        if block_size == 0 || block_count == 0 {
            return Err(AllocError::ZeroSize);
        }

        let required = Self::memory_requirement(block_count, block_size);
        if buffer.len() < required {
            return Err(AllocError::BufferTooSmall {
                required,
                provided: buffer.len(),
            });
        }

        let base = buffer.as_mut_ptr();
        unsafe {
            base.cast::<BlockHeader>().write_unaligned(BlockHeader {
                block_size,
                block_count,
            });

            let flags = base.add(HEADER_SIZE);
            ptr::write_bytes(flags, FREE, block_count);

            Ok(Self {
                flags: NonNull::new_unchecked(flags),
                blocks: NonNull::new_unchecked(flags.add(block_count)),
                block_size,
                block_count,
                _buffer: PhantomData,
            })
        }
    }

    /// Re-open a pool previously laid out over `buffer` by
    /// [`BlockAllocator::new`], keeping its free-list and block contents.
    pub fn attach(buffer: &'a mut [u8]) -> Result<Self> {
        if buffer.len() < HEADER_SIZE {
            return Err(AllocError::BufferTooSmall {
                required: HEADER_SIZE,
                provided: buffer.len(),
            });
        }

        let base = buffer.as_mut_ptr();
        let BlockHeader {
            block_size,
            block_count,
        } = unsafe { base.cast::<BlockHeader>().read_unaligned() };

        if block_size == 0 || block_count == 0 {
            return Err(AllocError::ZeroSize);
        }
        let required = Self::memory_requirement(block_count, block_size);
        if buffer.len() < required {
            return Err(AllocError::BufferTooSmall {
                required,
                provided: buffer.len(),
            });
        }

        unsafe {
            let flags = base.add(HEADER_SIZE);
            Ok(Self {
                flags: NonNull::new_unchecked(flags),
                blocks: NonNull::new_unchecked(flags.add(block_count)),
                block_size,
                block_count,
                _buffer: PhantomData,
            })
        }
    }

    /// Allocate a contiguous run of blocks holding `size` bytes
    pub fn alloc(&mut self, size: usize) -> Result<NonNull<u8>> {
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }

        let needed = self.blocks_needed(size);
        let start = self.find_free_run(needed).ok_or(AllocError::OutOfSpace {
            requested: size,
            available: self.largest_free_run() * self.block_size,
        })?;

        self.mark(start, needed, USED);
        Ok(self.block_ptr(start))
    }

    /// Allocate `size` bytes on an `alignment` boundary
    pub fn alloc_aligned(&mut self, size: usize, alignment: usize) -> Result<NonNull<u8>> {
        check_alignment(alignment)?;
        let raw = self.alloc(aligned_size(size, alignment))?;
        Ok(unsafe { place_aligned(raw, alignment) })
    }

    /// Release `size` bytes at `ptr`, zeroing them.
    ///
    /// Fails without side effects if `ptr` is not a block start of this
    /// allocator or the blocks covering `size` are not all in use.
    pub fn free(&mut self, ptr: NonNull<u8>, size: usize) -> Result<()> {
        let start = self.index_of(ptr)?;
        let count = self.blocks_needed(size);
        self.check_used(start, count, size)?;

        unsafe { ptr::write_bytes(ptr.as_ptr(), 0, size) };
        self.mark(start, count, FREE);
        Ok(())
    }

    /// Release an allocation made by [`BlockAllocator::alloc_aligned`]
    pub fn free_aligned(&mut self, ptr: NonNull<u8>, size: usize, alignment: usize) -> Result<()> {
        check_alignment(alignment)?;

        // The back-pointer slot must itself lie inside block storage.
        let addr = ptr.as_ptr() as usize;
        let blocks = self.blocks.as_ptr() as usize;
        if addr < blocks + POINTER_WIDTH || addr > blocks + self.storage_len() {
            return Err(AllocError::ForeignPointer);
        }

        let raw = unsafe { recover_raw(ptr) };
        self.free(raw, aligned_size(size, alignment))
    }

    /// Resize the allocation at `ptr` from `old_size` to `new_size` bytes.
    ///
    /// Returns the same pointer when the block count is unchanged, when
    /// shrinking, or when the blocks right after the allocation are free.
    /// Otherwise allocates a new run, copies `old_size` bytes and frees the
    /// old run. If that fallback fails the old allocation is left intact.
    pub fn realloc(
        &mut self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Result<NonNull<u8>> {
        if new_size == 0 {
            return Err(AllocError::ZeroSize);
        }

        let start = self.index_of(ptr)?;
        let old_blocks = self.blocks_needed(old_size);
        let new_blocks = self.blocks_needed(new_size);
        self.check_used(start, old_blocks, old_size)?;

        if new_blocks == old_blocks {
            return Ok(ptr);
        }

        if new_blocks < old_blocks {
            let kept = new_blocks * self.block_size;
            unsafe { ptr::write_bytes(ptr.as_ptr().add(kept), 0, old_size - kept) };
            self.mark(start + new_blocks, old_blocks - new_blocks, FREE);
            return Ok(ptr);
        }

        if new_blocks > self.block_count {
            return Err(AllocError::OutOfSpace {
                requested: new_size,
                available: self.largest_free_run() * self.block_size,
            });
        }

        let tail = start + old_blocks;
        let extra = new_blocks - old_blocks;
        let neighbours_free = tail
            .checked_add(extra)
            .filter(|&end| end <= self.block_count)
            .is_some_and(|end| self.flags()[tail..end].iter().all(|&f| f == FREE));
        if neighbours_free {
            self.mark(tail, extra, USED);
            return Ok(ptr);
        }

        let new_ptr = self.alloc(new_size)?;
        unsafe { ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), old_size) };
        self.free(ptr, old_size)?;

        Ok(new_ptr)
    }

    /// Release every block and zero all block storage
    pub fn clear(&mut self) {
        unsafe {
            ptr::write_bytes(self.flags.as_ptr(), FREE, self.block_count);
            ptr::write_bytes(self.blocks.as_ptr(), 0, self.storage_len());
        }
    }

    /// Get the block size
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Get the total number of blocks
    pub fn block_count(&self) -> usize {
        self.block_count
    }

    /// Whether block `index` is part of a live allocation
    pub fn is_block_used(&self, index: usize) -> bool {
        self.flags().get(index).is_some_and(|&f| f == USED)
    }

    /// Block index of a pointer returned by [`BlockAllocator::alloc`]
    pub fn index_of(&self, ptr: NonNull<u8>) -> Result<usize> {
        let offset = (ptr.as_ptr() as usize)
            .checked_sub(self.blocks.as_ptr() as usize)
            .ok_or(AllocError::ForeignPointer)?;

        if offset >= self.storage_len() || offset % self.block_size != 0 {
            return Err(AllocError::ForeignPointer);
        }
        Ok(offset / self.block_size)
    }

    /// Get the number of allocated blocks
    pub fn allocated_count(&self) -> usize {
        self.flags().iter().filter(|&&f| f == USED).count()
    }

    /// Get the number of free blocks
    pub fn free_count(&self) -> usize {
        self.block_count - self.allocated_count()
    }

    /// Length of the longest run of free blocks
    pub fn largest_free_run(&self) -> usize {
        let mut best = 0;
        let mut run = 0;
        for &flag in self.flags() {
            if flag == FREE {
                run += 1;
                best = best.max(run);
            } else {
                run = 0;
            }
        }
        best
    }

    /// Get statistics
    pub fn stats(&self) -> BlockStats {
        let allocated_blocks = self.allocated_count();
        BlockStats {
            block_size: self.block_size,
            total_blocks: self.block_count,
            allocated_blocks,
            free_blocks: self.block_count - allocated_blocks,
            largest_free_run: self.largest_free_run(),
        }
    }

    fn flags(&self) -> &[u8] {
        unsafe { core::slice::from_raw_parts(self.flags.as_ptr(), self.block_count) }
    }

    fn storage_len(&self) -> usize {
        self.block_count * self.block_size
    }

    fn blocks_needed(&self, size: usize) -> usize {
        size.div_ceil(self.block_size)
    }

    fn block_ptr(&self, index: usize) -> NonNull<u8> {
        unsafe { NonNull::new_unchecked(self.blocks.as_ptr().add(index * self.block_size)) }
    }

    /// First-fit scan for `needed` contiguous free blocks
    fn find_free_run(&self, needed: usize) -> Option<usize> {
        let mut run = 0;
        for (index, &flag) in self.flags().iter().enumerate() {
            if flag == FREE {
                run += 1;
                if run == needed {
                    return Some(index + 1 - needed);
                }
            } else {
                run = 0;
            }
        }
        None
    }

    /// Every block in `start..start + count` must be in use
    fn check_used(&self, start: usize, count: usize, size: usize) -> Result<()> {
        let held = self.flags()[start..]
            .iter()
            .take_while(|&&f| f == USED)
            .count();

        if count > held {
            return Err(AllocError::InvalidRange {
                requested: size,
                allocated: held * self.block_size,
            });
        }
        Ok(())
    }

    fn mark(&mut self, start: usize, count: usize, flag: u8) {
        debug_assert!(start + count <= self.block_count);
        unsafe { ptr::write_bytes(self.flags.as_ptr().add(start), flag, count) };
    }
}

impl MemoryUsage for BlockAllocator<'_> {
    fn capacity(&self) -> usize {
        self.storage_len()
    }

    fn used(&self) -> usize {
        self.allocated_count() * self.block_size
    }
}

/// Block allocator statistics
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockStats {
    pub block_size: usize,
    pub total_blocks: usize,
    pub allocated_blocks: usize,
    pub free_blocks: usize,
    pub largest_free_run: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::is_aligned;

    fn buffer_for(block_count: usize, block_size: usize) -> Vec<u8> {
        vec![0xEE; BlockAllocator::memory_requirement(block_count, block_size)]
    }

    #[test]
    fn test_memory_requirement() {
        assert_eq!(BlockAllocator::memory_requirement(4, 16), HEADER_SIZE + 4 + 64);
    }

    #[test]
    fn test_new_rejects_small_buffer() {
        let mut buffer = vec![0u8; 10];
        assert!(matches!(
            BlockAllocator::new(4, 16, &mut buffer),
            Err(AllocError::BufferTooSmall { provided: 10, .. })
        ));
        assert!(matches!(
            BlockAllocator::new(4, 0, &mut buffer),
            Err(AllocError::ZeroSize)
        ));
    }

    #[test]
    fn test_new_zeroes_free_list() {
        let mut buffer = buffer_for(8, 8);
        let pool = BlockAllocator::new(8, 8, &mut buffer).unwrap();

        assert_eq!(pool.free_count(), 8);
        assert_eq!(pool.largest_free_run(), 8);
    }

    #[test]
    fn test_first_fit_reuses_hole() {
        let mut buffer = buffer_for(8, 16);
        let mut pool = BlockAllocator::new(8, 16, &mut buffer).unwrap();

        let a = pool.alloc(16).unwrap();
        let b = pool.alloc(32).unwrap();
        let c = pool.alloc(16).unwrap();
        assert_eq!(pool.index_of(a), Ok(0));
        assert_eq!(pool.index_of(b), Ok(1));
        assert_eq!(pool.index_of(c), Ok(3));

        pool.free(b, 32).unwrap();
        let d = pool.alloc(20).unwrap();
        assert_eq!(d, b);

        let e = pool.alloc(48).unwrap();
        assert_eq!(pool.index_of(e), Ok(4));
    }

    #[test]
    fn test_alloc_out_of_space() {
        let mut buffer = buffer_for(4, 16);
        let mut pool = BlockAllocator::new(4, 16, &mut buffer).unwrap();

        pool.alloc(16).unwrap();
        let middle = pool.alloc(16).unwrap();
        pool.alloc(16).unwrap();
        pool.free(middle, 16).unwrap();

        // Two free blocks, but not contiguous.
        assert_eq!(
            pool.alloc(32),
            Err(AllocError::OutOfSpace { requested: 32, available: 16 })
        );
        assert_eq!(pool.allocated_count(), 2);
        assert_eq!(pool.alloc(0), Err(AllocError::ZeroSize));
    }

    #[test]
    fn test_free_validates_pointer_and_range() {
        let mut buffer = buffer_for(4, 16);
        let mut pool = BlockAllocator::new(4, 16, &mut buffer).unwrap();

        let ptr = pool.alloc(16).unwrap();
        let inside = unsafe { NonNull::new_unchecked(ptr.as_ptr().add(3)) };

        assert_eq!(pool.free(inside, 16), Err(AllocError::ForeignPointer));
        assert_eq!(
            pool.free(ptr, 40),
            Err(AllocError::InvalidRange { requested: 40, allocated: 16 })
        );
        assert!(pool.is_block_used(0));

        let mut other = [0u8; 4];
        let foreign = NonNull::new(other.as_mut_ptr()).unwrap();
        assert_eq!(pool.free(foreign, 4), Err(AllocError::ForeignPointer));
    }

    #[test]
    fn test_realloc_shrink_releases_tail() {
        let mut buffer = buffer_for(4, 16);
        let mut pool = BlockAllocator::new(4, 16, &mut buffer).unwrap();

        let ptr = pool.alloc(64).unwrap();
        let same = pool.realloc(ptr, 64, 20).unwrap();

        assert_eq!(same, ptr);
        assert!(pool.is_block_used(1));
        assert!(!pool.is_block_used(2));
        assert!(!pool.is_block_used(3));
    }

    #[test]
    fn test_realloc_relocates_when_blocked() {
        let mut buffer = buffer_for(8, 16);
        let mut pool = BlockAllocator::new(8, 16, &mut buffer).unwrap();

        let a = pool.alloc(16).unwrap();
        let _guard = pool.alloc(16).unwrap();
        unsafe {
            for i in 0..16 {
                *a.as_ptr().add(i) = i as u8 + 1;
            }
        }

        let moved = pool.realloc(a, 16, 40).unwrap();
        assert_ne!(moved, a);
        assert_eq!(pool.index_of(moved), Ok(2));
        assert!(!pool.is_block_used(0));
        unsafe {
            for i in 0..16 {
                assert_eq!(*moved.as_ptr().add(i), i as u8 + 1);
            }
        }
    }

    #[test]
    fn test_realloc_failure_keeps_old() {
        let mut buffer = buffer_for(3, 16);
        let mut pool = BlockAllocator::new(3, 16, &mut buffer).unwrap();

        let a = pool.alloc(16).unwrap();
        let _b = pool.alloc(16).unwrap();
        unsafe { a.as_ptr().write_bytes(9, 16) };

        assert!(matches!(
            pool.realloc(a, 16, 48),
            Err(AllocError::OutOfSpace { .. })
        ));
        assert!(pool.is_block_used(0));
        assert_eq!(unsafe { *a.as_ptr().add(15) }, 9);
    }

    #[test]
    fn test_aligned_alloc_and_free() {
        let mut buffer = buffer_for(32, 16);
        let mut pool = BlockAllocator::new(32, 16, &mut buffer).unwrap();

        for alignment in [4usize, 8, 16, 32, 64] {
            let ptr = pool.alloc_aligned(24, alignment).unwrap();
            assert!(is_aligned(ptr.as_ptr(), alignment));

            let raw = unsafe { recover_raw(ptr) };
            assert_eq!(pool.index_of(raw), Ok(0));

            pool.free_aligned(ptr, 24, alignment).unwrap();
            assert_eq!(pool.allocated_count(), 0);
        }
    }

    #[test]
    fn test_clear() {
        let mut buffer = buffer_for(4, 8);
        let mut pool = BlockAllocator::new(4, 8, &mut buffer).unwrap();

        let ptr = pool.alloc(30).unwrap();
        unsafe { ptr.as_ptr().write_bytes(5, 30) };
        pool.clear();

        assert_eq!(pool.stats().free_blocks, 4);
        drop(pool);
        assert!(buffer[HEADER_SIZE..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_realloc_huge_request_is_out_of_space() {
        let mut buffer = buffer_for(8, 1);
        let mut pool = BlockAllocator::new(8, 1, &mut buffer).unwrap();

        pool.alloc(1).unwrap();
        let b = pool.alloc(1).unwrap();

        assert!(matches!(
            pool.realloc(b, 1, usize::MAX),
            Err(AllocError::OutOfSpace { requested: usize::MAX, .. })
        ));
        assert!(matches!(
            pool.alloc(usize::MAX),
            Err(AllocError::OutOfSpace { .. })
        ));
        assert_eq!(pool.allocated_count(), 2);
        assert!(pool.is_block_used(1));
    }

    #[test]
    fn test_realloc_rejects_overstated_old_size() {
        let mut buffer = buffer_for(4, 16);
        let mut pool = BlockAllocator::new(4, 16, &mut buffer).unwrap();

        let ptr = pool.alloc(16).unwrap();
        assert_eq!(
            pool.realloc(ptr, 40, 60),
            Err(AllocError::InvalidRange { requested: 40, allocated: 16 })
        );
        assert_eq!(pool.allocated_count(), 1);
    }

    #[test]
    fn test_free_aligned_rejects_foreign_pointer() {
        let mut buffer = buffer_for(4, 16);
        let mut pool = BlockAllocator::new(4, 16, &mut buffer).unwrap();
        let ptr = pool.alloc_aligned(8, 8).unwrap();

        let mut other = [0u8; 64];
        let foreign = NonNull::new(other[32..].as_mut_ptr()).unwrap();
        assert_eq!(pool.free_aligned(foreign, 8, 8), Err(AllocError::ForeignPointer));

        let first_block = pool.block_ptr(0);
        assert_eq!(pool.free_aligned(first_block, 8, 8), Err(AllocError::ForeignPointer));

        assert_eq!(pool.allocated_count(), 2);
        pool.free_aligned(ptr, 8, 8).unwrap();
        assert_eq!(pool.allocated_count(), 0);
    }

    #[test]
    fn test_attach_reads_header() {
        let mut buffer = buffer_for(6, 16);
        {
            let mut pool = BlockAllocator::new(6, 16, &mut buffer).unwrap();
            pool.alloc(40).unwrap();
        }

        let pool = BlockAllocator::attach(&mut buffer).unwrap();
        assert_eq!(pool.block_size(), 16);
        assert_eq!(pool.block_count(), 6);
        assert_eq!(pool.allocated_count(), 3);

        let mut short = vec![0u8; 4];
        assert!(matches!(
            BlockAllocator::attach(&mut short),
            Err(AllocError::BufferTooSmall { .. })
        ));
    }

    #[test]
    fn test_stats() {
        let mut buffer = buffer_for(6, 8);
        let mut pool = BlockAllocator::new(6, 8, &mut buffer).unwrap();

        pool.alloc(8).unwrap();
        let hole = pool.alloc(8).unwrap();
        pool.alloc(8).unwrap();
        pool.free(hole, 8).unwrap();

        assert_eq!(
            pool.stats(),
            BlockStats {
                block_size: 8,
                total_blocks: 6,
                allocated_blocks: 2,
                free_blocks: 4,
                largest_free_run: 3,
            }
        );
        assert_eq!(pool.used(), 16);
        assert_eq!(pool.available(), 32);
    }
}
