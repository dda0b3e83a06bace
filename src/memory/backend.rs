use super::space::MemorySpace;
use std::alloc::Layout;
use std::ptr::NonNull;

/// Alignment `HeapBackend` hands out by default. Matches the minimum
/// alignment accelerator runtimes guarantee for their allocations.
pub const DEFAULT_ALIGNMENT: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("out of {space} memory allocating {bytes} bytes")]
    OutOfMemory { space: MemorySpace, bytes: usize },
    #[error("invalid layout: {bytes} bytes aligned to {align}")]
    InvalidLayout { bytes: usize, align: usize },
    #[error("unsupported memory space: {0}")]
    UnsupportedSpace(MemorySpace),
    #[error("OS memory call failed: {0}")]
    Os(#[from] std::io::Error),
}

/// Raw allocate / free / copy primitives for every memory space.
///
/// The manager never inspects which backend it drives. Implementations are
/// called concurrently and without ordering: `alloc` and `free` may run on
/// several threads at once, and the bookkeeping for a call may be applied
/// after a later call's backend work has finished.
pub trait Backend: Send + Sync {
    /// Allocate `bytes` (> 0) bytes in `space`.
    fn alloc(&self, space: MemorySpace, bytes: usize) -> Result<NonNull<u8>, BackendError>;

    /// Release a block.
    ///
    /// # Safety
    /// `ptr` must have been returned by `alloc(space, bytes)` on this backend
    /// and not freed since.
    unsafe fn free(&self, space: MemorySpace, ptr: NonNull<u8>, bytes: usize) -> Result<(), BackendError>;

    /// Copy `bytes` bytes from `src` to `dst`. Ranges may overlap.
    ///
    /// # Safety
    /// `src` must be readable and `dst` writable for `bytes` bytes in their
    /// respective spaces.
    unsafe fn copy(
        &self,
        dst: NonNull<u8>,
        src: NonNull<u8>,
        bytes: usize,
        dst_space: MemorySpace,
        src_space: MemorySpace,
    ) -> Result<(), BackendError>;
}

impl<T: Backend + ?Sized> Backend for &T {
    fn alloc(&self, space: MemorySpace, bytes: usize) -> Result<NonNull<u8>, BackendError> {
        (**self).alloc(space, bytes)
    }

    unsafe fn free(&self, space: MemorySpace, ptr: NonNull<u8>, bytes: usize) -> Result<(), BackendError> {
        // Safety: forwarded to the caller.
        unsafe { (**self).free(space, ptr, bytes) }
    }

    unsafe fn copy(
        &self,
        dst: NonNull<u8>,
        src: NonNull<u8>,
        bytes: usize,
        dst_space: MemorySpace,
        src_space: MemorySpace,
    ) -> Result<(), BackendError> {
        // Safety: forwarded to the caller.
        unsafe { (**self).copy(dst, src, bytes, dst_space, src_space) }
    }
}

/// Backend serving every space from the global heap.
///
/// Stands in for an accelerator runtime on machines without one: device,
/// host and managed blocks are all ordinary host memory, so any space can be
/// read and written directly.
#[derive(Debug, Clone, Copy)]
pub struct HeapBackend {
    align: usize,
}

impl Default for HeapBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl HeapBackend {
    #[must_use]
    pub const fn new() -> Self {
        Self { align: DEFAULT_ALIGNMENT }
    }

    /// Heap backend with a custom block alignment (a power of two).
    ///
    /// # Errors
    ///
    /// Returns `BackendError::InvalidLayout` if `align` is not a power of two.
    pub fn with_alignment(align: usize) -> Result<Self, BackendError> {
        if !align.is_power_of_two() {
            return Err(BackendError::InvalidLayout { bytes: 0, align });
        }
        Ok(Self { align })
    }

    #[inline]
    pub fn alignment(&self) -> usize {
        self.align
    }

    fn layout(&self, bytes: usize) -> Result<Layout, BackendError> {
        Layout::from_size_align(bytes, self.align).map_err(|_| BackendError::InvalidLayout {
            bytes,
            align: self.align,
        })
    }
}

impl Backend for HeapBackend {
    fn alloc(&self, space: MemorySpace, bytes: usize) -> Result<NonNull<u8>, BackendError> {
        if !space.is_valid() {
            return Err(BackendError::UnsupportedSpace(space));
        }
        if bytes == 0 {
            return Err(BackendError::InvalidLayout { bytes, align: self.align });
        }
        let layout = self.layout(bytes)?;
        // Safety: layout has non-zero size.
        let ptr = unsafe { std::alloc::alloc(layout) };
        NonNull::new(ptr).ok_or(BackendError::OutOfMemory { space, bytes })
    }

    unsafe fn free(&self, space: MemorySpace, ptr: NonNull<u8>, bytes: usize) -> Result<(), BackendError> {
        if !space.is_valid() {
            return Err(BackendError::UnsupportedSpace(space));
        }
        let layout = self.layout(bytes)?;
        // Safety: caller guarantees ptr came from `alloc` with the same size,
        // and the alignment is fixed per backend.
        unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) };
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
        // Safety: upheld by caller; all spaces are host memory here.
        unsafe { std::ptr::copy(src.as_ptr().cast_const(), dst.as_ptr(), bytes) };
        Ok(())
    }
}

/// Backend chosen for this build target.
#[cfg(all(unix, not(any(loom, miri))))]
pub type DefaultBackend = super::vm::PageBackend;

/// Backend chosen for this build target.
#[cfg(not(all(unix, not(any(loom, miri)))))]
pub type DefaultBackend = HeapBackend;

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let oom = BackendError::OutOfMemory { space: MemorySpace::Device, bytes: 64 };
        assert_eq!(oom.to_string(), "out of device memory allocating 64 bytes");
        let layout = BackendError::InvalidLayout { bytes: 0, align: 256 };
        assert_eq!(layout.to_string(), "invalid layout: 0 bytes aligned to 256");
        let space = BackendError::UnsupportedSpace(MemorySpace::Invalid);
        assert_eq!(space.to_string(), "unsupported memory space: invalid");
        let os: BackendError = std::io::Error::other("boom").into();
        assert!(matches!(os, BackendError::Os(_)));
    }

    #[test]
    fn test_heap_alloc_write_free() {
        let backend = HeapBackend::new();
        let ptr = backend.alloc(MemorySpace::Device, 128).expect("alloc failed");
        assert_eq!(ptr.as_ptr() as usize % DEFAULT_ALIGNMENT, 0);
        // Safety: Test code.
        unsafe {
            ptr.as_ptr().write_bytes(0x5A, 128);
            assert_eq!(*ptr.as_ptr().add(127), 0x5A);
            backend.free(MemorySpace::Device, ptr, 128).expect("free failed");
        }
    }

    #[test]
    fn test_heap_rejects_zero_and_invalid_space() {
        let backend = HeapBackend::new();
        assert!(matches!(
            backend.alloc(MemorySpace::Host, 0),
            Err(BackendError::InvalidLayout { bytes: 0, .. })
        ));
        assert!(matches!(
            backend.alloc(MemorySpace::Invalid, 64),
            Err(BackendError::UnsupportedSpace(MemorySpace::Invalid))
        ));
    }

    #[test]
    fn test_heap_copy_between_spaces() {
        let backend = HeapBackend::new();
        let src = backend.alloc(MemorySpace::Host, 16).unwrap();
        let dst = backend.alloc(MemorySpace::Device, 16).unwrap();
        // Safety: Test code.
        unsafe {
            for i in 0..16u8 {
                src.as_ptr().add(usize::from(i)).write(i);
            }
            backend.copy(dst, src, 16, MemorySpace::Device, MemorySpace::Host).unwrap();
            let copied = std::slice::from_raw_parts(dst.as_ptr(), 16);
            assert_eq!(copied, (0..16u8).collect::<Vec<_>>().as_slice());
            backend.free(MemorySpace::Host, src, 16).unwrap();
            backend.free(MemorySpace::Device, dst, 16).unwrap();
        }
    }

    #[test]
    fn test_with_alignment() {
        assert!(HeapBackend::with_alignment(3).is_err());
        let backend = HeapBackend::with_alignment(4096).unwrap();
        assert_eq!(backend.alignment(), 4096);
        let ptr = backend.alloc(MemorySpace::Managed, 10).unwrap();
        assert_eq!(ptr.as_ptr() as usize % 4096, 0);
        // Safety: Test code.
        unsafe { backend.free(MemorySpace::Managed, ptr, 10).unwrap() };
    }
}
