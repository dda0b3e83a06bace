//! Test-only backends.

use super::backend::{Backend, BackendError};
use super::space::MemorySpace;
use crate::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use crate::sync::{lock, Mutex};
use std::ptr::NonNull;

const FAKE_BASE: usize = 0x1000_0000;
const FAKE_STRIDE: usize = 0x1_0000;

/// Hands out fake, never-dereferenced addresses.
///
/// Freed addresses go on a LIFO list and are reused by the next `alloc`,
/// mimicking a runtime that recycles a just-freed block immediately.
/// Addresses are `FAKE_STRIDE` apart, so blocks up to that size never
/// overlap.
pub(crate) struct FakeBackend {
    next: AtomicUsize,
    free_list: Mutex<Vec<usize>>,
    fail_next_allocs: AtomicUsize,
    panic_next_frees: AtomicUsize,
    pub allocs: AtomicU64,
    pub frees: AtomicU64,
    pub copies: AtomicU64,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            next: AtomicUsize::new(FAKE_BASE),
            free_list: Mutex::new(Vec::new()),
            fail_next_allocs: AtomicUsize::new(0),
            panic_next_frees: AtomicUsize::new(0),
            allocs: AtomicU64::new(0),
            frees: AtomicU64::new(0),
            copies: AtomicU64::new(0),
        }
    }

    /// Make the next `n` allocations fail with `OutOfMemory`.
    pub fn fail_next_allocs(&self, n: usize) {
        self.fail_next_allocs.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` frees panic before releasing anything.
    pub fn panic_next_frees(&self, n: usize) {
        self.panic_next_frees.store(n, Ordering::SeqCst);
    }

    pub fn count(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::SeqCst)
    }
}

impl Backend for FakeBackend {
    fn alloc(&self, space: MemorySpace, bytes: usize) -> Result<NonNull<u8>, BackendError> {
        if !space.is_valid() {
            return Err(BackendError::UnsupportedSpace(space));
        }
        let failing = self
            .fail_next_allocs
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing || bytes > FAKE_STRIDE {
            return Err(BackendError::OutOfMemory { space, bytes });
        }

        self.allocs.fetch_add(1, Ordering::SeqCst);
        let addr = match lock(&self.free_list).pop() {
            Some(addr) => addr,
            None => self.next.fetch_add(FAKE_STRIDE, Ordering::SeqCst),
        };
        NonNull::new(addr as *mut u8).ok_or(BackendError::OutOfMemory { space, bytes })
    }

    unsafe fn free(&self, _space: MemorySpace, ptr: NonNull<u8>, _bytes: usize) -> Result<(), BackendError> {
        let panicking = self
            .panic_next_frees
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if panicking {
            panic!("fake backend: free of {ptr:p} failed");
        }
        self.frees.fetch_add(1, Ordering::SeqCst);
        lock(&self.free_list).push(ptr.as_ptr() as usize);
        Ok(())
    }

    unsafe fn copy(
        &self,
        _dst: NonNull<u8>,
        _src: NonNull<u8>,
        _bytes: usize,
        _dst_space: MemorySpace,
        _src_space: MemorySpace,
    ) -> Result<(), BackendError> {
        self.copies.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
