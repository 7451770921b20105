//! System allocation layer - usage-tracked OS heap and page allocation
//!
//! Everything the engine reserves from the operating system goes through a
//! [`SystemMemory`] implementation so that outstanding heap bytes and mapped
//! pages can be observed at any time. The stack and block allocators never
//! call into this layer; their backing buffers are obtained from it once at
//! startup.

mod platform;
pub mod trace;

use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::alloc::{self as heap, Layout};

use crate::align::{aligned_size, check_alignment, place_aligned, recover_raw};
use crate::error::{AllocError, Result};

pub use trace::Traced;

/// Alignment of every plain heap allocation
const HEAP_ALIGN: usize = core::mem::align_of::<usize>();

/// Outstanding heap bytes and mapped pages.
///
/// Counters use relaxed atomics: every update is a single independent
/// increment or decrement, and snapshots are diagnostics, not
/// synchronization points. A snapshot taken while another thread is
/// allocating may be stale by that one call.
#[derive(Debug, Default)]
pub struct AllocatorStats {
    heap_bytes: AtomicUsize,
    pages: AtomicUsize,
}

impl AllocatorStats {
    /// Create zeroed counters
    pub const fn new() -> Self {
        Self {
            heap_bytes: AtomicUsize::new(0),
            pages: AtomicUsize::new(0),
        }
    }

    /// Heap bytes currently allocated
    pub fn heap_usage(&self) -> usize {
        self.heap_bytes.load(Ordering::Relaxed)
    }

    /// Pages currently mapped
    pub fn page_usage(&self) -> usize {
        self.pages.load(Ordering::Relaxed)
    }

    /// Heap bytes plus mapped pages expressed in bytes
    pub fn total_usage(&self) -> usize {
        self.heap_usage() + self.page_usage() * platform::page_size()
    }

    fn add_heap(&self, bytes: usize) {
        self.heap_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    fn sub_heap(&self, bytes: usize) {
        self.heap_bytes.fetch_sub(bytes, Ordering::Relaxed);
    }

    fn add_pages(&self, pages: usize) {
        self.pages.fetch_add(pages, Ordering::Relaxed);
    }

    fn sub_pages(&self, pages: usize) {
        self.pages.fetch_sub(pages, Ordering::Relaxed);
    }
}

/// Process-wide counters used by [`SystemAllocator::global`]
pub static GLOBAL_STATS: AllocatorStats = AllocatorStats::new();

/// Heap bytes outstanding through the global system allocator
pub fn heap_usage() -> usize {
    GLOBAL_STATS.heap_usage()
}

/// Pages outstanding through the global system allocator
pub fn page_usage() -> usize {
    GLOBAL_STATS.page_usage()
}

/// Total bytes outstanding through the global system allocator
pub fn total_usage() -> usize {
    GLOBAL_STATS.total_usage()
}

/// Size of one OS page in bytes
pub fn page_size() -> usize {
    platform::page_size()
}

/// Usage-tracked access to the OS heap and page allocator.
///
/// Sizes passed to the release functions must match the sizes used at
/// allocation time; no size header is stored with the memory.
pub trait SystemMemory {
    /// Counters this allocator reports into
    fn stats(&self) -> &AllocatorStats;

    /// Allocate `size` bytes from the heap. The memory is not zeroed.
    fn alloc(&self, size: usize) -> Result<NonNull<u8>>;

    /// Allocate `size` bytes on an `alignment` boundary.
    fn alloc_aligned(&self, size: usize, alignment: usize) -> Result<NonNull<u8>> {
        check_alignment(alignment)?;
        let raw = self.alloc(aligned_size(size, alignment))?;
        Ok(unsafe { place_aligned(raw, alignment) })
    }

    /// Resize a heap allocation, moving it if needed.
    ///
    /// # Safety
    /// `ptr` must come from [`SystemMemory::alloc`] on this allocator with
    /// `old_size` bytes. On success `ptr` is invalidated.
    unsafe fn realloc(&self, ptr: NonNull<u8>, old_size: usize, new_size: usize)
        -> Result<NonNull<u8>>;

    /// Release a heap allocation.
    ///
    /// # Safety
    /// `ptr` must come from [`SystemMemory::alloc`] with exactly `size` bytes.
    unsafe fn free(&self, ptr: NonNull<u8>, size: usize);

    /// Release an allocation made by [`SystemMemory::alloc_aligned`].
    ///
    /// # Safety
    /// `ptr`, `size` and `alignment` must match the aligned allocation.
    unsafe fn free_aligned(&self, ptr: NonNull<u8>, size: usize, alignment: usize) {
        debug_assert!(alignment.is_power_of_two());
        let raw = recover_raw(ptr);
        self.free(raw, aligned_size(size, alignment));
    }

    /// Map `page_count` zero-filled pages.
    fn page_alloc(&self, page_count: usize) -> Result<NonNull<u8>>;

    /// Unmap pages obtained from [`SystemMemory::page_alloc`].
    ///
    /// # Safety
    /// `ptr` must come from `page_alloc` with exactly `page_count` pages.
    unsafe fn page_free(&self, ptr: NonNull<u8>, page_count: usize);

    /// Size of one OS page in bytes
    fn page_size(&self) -> usize {
        platform::page_size()
    }

    fn heap_usage(&self) -> usize {
        self.stats().heap_usage()
    }

    fn page_usage(&self) -> usize {
        self.stats().page_usage()
    }

    fn total_usage(&self) -> usize {
        self.stats().total_usage()
    }
}

/// Plain system allocator reporting into a borrowed [`AllocatorStats`]
#[derive(Debug, Clone, Copy)]
pub struct SystemAllocator<'s> {
    stats: &'s AllocatorStats,
}

impl SystemAllocator<'static> {
    /// Allocator reporting into [`GLOBAL_STATS`]
    pub const fn global() -> Self {
        Self { stats: &GLOBAL_STATS }
    }
}

impl<'s> SystemAllocator<'s> {
    /// Allocator reporting into caller-owned counters
    pub const fn with_stats(stats: &'s AllocatorStats) -> Self {
        Self { stats }
    }
}

impl Default for SystemAllocator<'static> {
    fn default() -> Self {
        Self::global()
    }
}

fn heap_layout(size: usize) -> Result<Layout> {
    if size == 0 {
        return Err(AllocError::ZeroSize);
    }
    Layout::from_size_align(size, HEAP_ALIGN).map_err(|_| AllocError::HeapExhausted { size })
}

impl SystemMemory for SystemAllocator<'_> {
    fn stats(&self) -> &AllocatorStats {
        self.stats
    }

    fn alloc(&self, size: usize) -> Result<NonNull<u8>> {
        let layout = heap_layout(size)?;
        let ptr = NonNull::new(unsafe { heap::alloc(layout) })
            .ok_or(AllocError::HeapExhausted { size })?;

        self.stats.add_heap(size);
        Ok(ptr)
    }

    unsafe fn realloc(
        &self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Result<NonNull<u8>> {
        let old_layout = heap_layout(old_size)?;
        heap_layout(new_size)?;

        let new_ptr = NonNull::new(heap::realloc(ptr.as_ptr(), old_layout, new_size))
            .ok_or(AllocError::HeapExhausted { size: new_size })?;

        if new_size >= old_size {
            self.stats.add_heap(new_size - old_size);
        } else {
            self.stats.sub_heap(old_size - new_size);
        }
        Ok(new_ptr)
    }

    unsafe fn free(&self, ptr: NonNull<u8>, size: usize) {
        let Ok(layout) = heap_layout(size) else {
            return;
        };
        heap::dealloc(ptr.as_ptr(), layout);
        self.stats.sub_heap(size);
    }

    fn page_alloc(&self, page_count: usize) -> Result<NonNull<u8>> {
        if page_count == 0 {
            return Err(AllocError::ZeroSize);
        }
        let len = page_count
            .checked_mul(platform::page_size())
            .ok_or(AllocError::PageMapFailed { pages: page_count })?;

        let ptr = unsafe { platform::request_memory(len) }
            .ok_or(AllocError::PageMapFailed { pages: page_count })?;

        self.stats.add_pages(page_count);
        Ok(ptr)
    }

    unsafe fn page_free(&self, ptr: NonNull<u8>, page_count: usize) {
        if page_count == 0 {
            return;
        }
        platform::return_memory(ptr.as_ptr(), page_count * platform::page_size());
        self.stats.sub_pages(page_count);
    }
}

/// System allocator used by engine bootstrap code.
///
/// With the `tracking` feature every call is logged through [`Traced`].
#[cfg(feature = "tracking")]
pub type EngineSystem = Traced<SystemAllocator<'static>>;

#[cfg(not(feature = "tracking"))]
pub type EngineSystem = SystemAllocator<'static>;

/// The engine's system allocator, reporting into [`GLOBAL_STATS`]
#[cfg(feature = "tracking")]
pub fn engine_system() -> EngineSystem {
    Traced::new(SystemAllocator::global())
}

#[cfg(not(feature = "tracking"))]
pub fn engine_system() -> EngineSystem {
    SystemAllocator::global()
}

/// Page mapping owned for the lifetime of the value and unmapped on drop.
///
/// This is the usual source of backing storage for the stack and block
/// allocators: one mapping reserved at startup, borrowed by an allocator.
///
/// Construction is `#[track_caller]`, so a [`Traced`] system logs the
/// mapping at the caller's site. The unmap in `Drop` is logged at this
/// module's line; drop glue cannot forward a caller location.
pub struct PageBuffer<'m, S: SystemMemory> {
    system: &'m S,
    ptr: NonNull<u8>,
    pages: usize,
}

impl<'m, S: SystemMemory> PageBuffer<'m, S> {
    /// Map enough whole pages to hold `len` bytes
    #[track_caller]
    pub fn with_len(system: &'m S, len: usize) -> Result<Self> {
        let pages = len.div_ceil(system.page_size()).max(1);
        Self::with_pages(system, pages)
    }

    /// Map exactly `pages` pages
    #[track_caller]
    pub fn with_pages(system: &'m S, pages: usize) -> Result<Self> {
        let ptr = system.page_alloc(pages)?;
        Ok(Self { system, ptr, pages })
    }

    /// Number of mapped pages
    pub fn pages(&self) -> usize {
        self.pages
    }

    /// Mapped length in bytes
    pub fn len(&self) -> usize {
        self.pages * self.system.page_size()
    }

    pub fn is_empty(&self) -> bool {
        self.pages == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.len()) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len()) }
    }
}

impl<S: SystemMemory> Drop for PageBuffer<'_, S> {
    fn drop(&mut self) {
        unsafe { self.system.page_free(self.ptr, self.pages) };
    }
}
