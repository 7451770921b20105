//! OS page mapping primitives
//!
//! The allocator layer only needs three things from the kernel: map a
//! read-write anonymous region, unmap it, and report the page size.

use core::ptr::NonNull;
use std::sync::OnceLock;

/// Low level page operations, one implementation per target family.
trait PlatformMemory {
    /// Map `len` bytes of zeroed read-write memory. `None` if the kernel refuses.
    unsafe fn request_memory(len: usize) -> Option<NonNull<u8>>;

    /// Return a mapping of `len` bytes starting at `addr` to the kernel.
    unsafe fn return_memory(addr: *mut u8, len: usize);

    /// Virtual memory page size in bytes.
    fn query_page_size() -> usize;
}

/// Marker type the platform impls hang off.
struct Os;

static PAGE_SIZE: OnceLock<usize> = OnceLock::new();

/// Page size of the running machine, queried once.
#[inline]
pub(crate) fn page_size() -> usize {
    *PAGE_SIZE.get_or_init(Os::query_page_size)
}

#[inline]
pub(crate) unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
    Os::request_memory(len)
}

#[inline]
pub(crate) unsafe fn return_memory(addr: *mut u8, len: usize) {
    Os::return_memory(addr, len);
}

#[cfg(unix)]
mod unix {
    use super::{Os, PlatformMemory};

    use core::ptr::{self, NonNull};
    use libc::{c_int, c_void, off_t, size_t};

    impl PlatformMemory for Os {
        unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
            const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;
            const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
            const FD: c_int = -1;
            const OFFSET: off_t = 0;

            let addr = libc::mmap(ptr::null_mut(), len as size_t, PROT, FLAGS, FD, OFFSET);

            if addr == libc::MAP_FAILED {
                return None;
            }

            NonNull::new(addr.cast::<u8>())
        }

        unsafe fn return_memory(addr: *mut u8, len: usize) {
            libc::munmap(addr as *mut c_void, len as size_t);
        }

        fn query_page_size() -> usize {
            unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) as usize }
        }
    }
}

#[cfg(windows)]
mod windows {
    use super::{Os, PlatformMemory};

    use core::ffi::c_void;
    use core::mem::MaybeUninit;
    use core::ptr::NonNull;

    use windows::Win32::System::{Memory, SystemInformation};

    impl PlatformMemory for Os {
        unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
            let flags = Memory::MEM_RESERVE | Memory::MEM_COMMIT;
            let addr = Memory::VirtualAlloc(None, len, flags, Memory::PAGE_READWRITE);

            NonNull::new(addr.cast())
        }

        unsafe fn return_memory(addr: *mut u8, _len: usize) {
            // MEM_RELEASE frees the whole reservation; size must be zero.
            let _ = Memory::VirtualFree(addr as *mut c_void, 0, Memory::MEM_RELEASE);
        }

        fn query_page_size() -> usize {
            let mut info = MaybeUninit::uninit();
            unsafe {
                SystemInformation::GetSystemInfo(info.as_mut_ptr());
                info.assume_init().dwPageSize as usize
            }
        }
    }
}
