//! Page-granular backend over anonymous mappings.
//!
//! Every block is its own `mmap` and is released with `munmap`, so a freed
//! address goes straight back to the kernel and may be handed out again by
//! the very next allocation. That is exactly the reuse pattern the ticket
//! sequencer has to order correctly.

use super::backend::{Backend, BackendError};
use super::space::MemorySpace;
use std::io;
use std::ptr::NonNull;

#[derive(Debug, Clone, Copy, Default)]
pub struct PageBackend;

impl PageBackend {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// OS page size.
    pub fn page_size() -> usize {
        // Safety: sysconf has no preconditions.
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        usize::try_from(size).ok().filter(|&s| s > 0).unwrap_or(4096)
    }

    /// Bytes actually mapped for a `bytes`-byte request.
    #[inline]
    pub fn mapped_size(bytes: usize) -> Option<usize> {
        bytes.checked_next_multiple_of(Self::page_size())
    }
}

impl Backend for PageBackend {
    fn alloc(&self, space: MemorySpace, bytes: usize) -> Result<NonNull<u8>, BackendError> {
        if !space.is_valid() {
            return Err(BackendError::UnsupportedSpace(space));
        }
        let size = Self::mapped_size(bytes)
            .filter(|&s| s > 0)
            .ok_or(BackendError::InvalidLayout { bytes, align: Self::page_size() })?;

        // Safety: FFI call to mmap.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ENOMEM) {
                return Err(BackendError::OutOfMemory { space, bytes });
            }
            return Err(BackendError::Os(err));
        }

        NonNull::new(ptr.cast::<u8>()).ok_or_else(|| {
            BackendError::Os(io::Error::other("mmap returned null"))
        })
    }

    unsafe fn free(&self, space: MemorySpace, ptr: NonNull<u8>, bytes: usize) -> Result<(), BackendError> {
        if !space.is_valid() {
            return Err(BackendError::UnsupportedSpace(space));
        }
        let size = Self::mapped_size(bytes)
            .ok_or(BackendError::InvalidLayout { bytes, align: Self::page_size() })?;
        // Safety: caller guarantees ptr/size describe a live mapping from `alloc`.
        if unsafe { libc::munmap(ptr.as_ptr().cast(), size) } != 0 {
            return Err(BackendError::Os(io::Error::last_os_error()));
        }
        Ok(())
    }

    unsafe fn copy(
        &self,
        dst: NonNull<u8>,
        src: NonNull<u8>,
        bytes: usize,
        _dst_space: MemorySpace,
        _src_space: MemorySpace,
    ) -> Result<(), BackendError> {
        // Safety: upheld by caller; mappings are plain process memory.
        unsafe { std::ptr::copy(src.as_ptr().cast_const(), dst.as_ptr(), bytes) };
        Ok(())
    }
}
