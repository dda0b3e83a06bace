use super::backend::{Backend, BackendError, DefaultBackend};
use super::config::MemoryManagerConfig;
use super::contract::ensures;
use super::registry::AllocationRegistry;
use super::space::MemorySpace;
use super::stats::{LeakReport, MemoryStats, RejectionCounters, SpaceStats};
use super::ticket::TicketSequencer;
use crate::sync::OnceLock;
use std::ptr::NonNull;

/// Tracked allocation over the device, host and managed memory spaces.
///
/// Owns one [`AllocationRegistry`] per space and a single
/// [`TicketSequencer`] shared by all of them. Backend calls run unordered;
/// the registry update that follows each `allocate`/`deallocate` is applied
/// in ticket order across *all* spaces, so a freed address that the backend
/// recycles is always deregistered before it is registered again.
///
/// Nothing here returns an error: rejected calls log a diagnostic, bump a
/// counter in [`MemoryStats`] and report failure through their return value.
pub struct MemoryManager<B: Backend = DefaultBackend> {
    backend: B,
    /// Indexed by `MemorySpace::index()`.
    registries: [AllocationRegistry; 3],
    sequencer: TicketSequencer,
    rejections: RejectionCounters,
    config: MemoryManagerConfig,
}

impl Default for MemoryManager<DefaultBackend> {
    fn default() -> Self {
        Self::new(DefaultBackend::default())
    }
}

impl<B: Backend> MemoryManager<B> {
    #[must_use]
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, MemoryManagerConfig::default())
    }

    #[must_use]
    pub fn with_config(backend: B, config: MemoryManagerConfig) -> Self {
        let verify = config.verify_invariants;
        Self {
            backend,
            registries: MemorySpace::ALL.map(|space| AllocationRegistry::new(space, verify)),
            sequencer: TicketSequencer::new(),
            rejections: RejectionCounters::new(),
            config,
        }
    }

    #[inline]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[inline]
    pub fn config(&self) -> &MemoryManagerConfig {
        &self.config
    }

    #[inline]
    fn registry(&self, space: MemorySpace) -> Option<&AllocationRegistry> {
        space.index().map(|i| &self.registries[i])
    }

    fn managed(&self) -> &AllocationRegistry {
        &self.registries[2]
    }

    fn reject(&self, op: &str, message: std::fmt::Arguments<'_>) {
        if self.config.log_rejections {
            log::warn!("[memory] {op}: {message}");
        }
    }

    fn backend_failed(&self, op: &str, err: &BackendError) {
        self.rejections.backend_failures.incr();
        log::error!("[memory] {op}: backend call failed: {err}");
    }

    /// Allocate `bytes` bytes in `space` and register the block.
    ///
    /// Returns `None` for a zero-byte request, an `Invalid` space or a
    /// backend failure; none of these consume a ticket or touch a counter
    /// of the registry.
    pub fn allocate(&self, bytes: usize, space: MemorySpace) -> Option<NonNull<u8>> {
        if bytes == 0 {
            self.rejections.allocations.incr();
            self.reject("allocate", format_args!("number of bytes is 0"));
            return None;
        }
        let Some(registry) = self.registry(space) else {
            self.rejections.allocations.incr();
            self.reject("allocate", format_args!("unsupported memory space {space}"));
            return None;
        };

        let ptr = match self.backend.alloc(space, bytes) {
            Ok(ptr) => ptr,
            Err(e) => {
                self.rejections.allocations.incr();
                self.backend_failed("allocate", &e);
                return None;
            }
        };

        // Ticket after the backend call: the address exists before its
        // registration is ordered.
        let ticket = {
            let turn = self.sequencer.reserve().wait();
            registry.register(ptr.as_ptr() as usize, bytes);
            turn.ticket()
        };

        ensures!(
            self.space_of(ptr.as_ptr()) == space,
            "allocate: {:p} not found in {space} registry",
            ptr
        );
        log::trace!("[memory] allocate: {bytes} bytes in {space} at {ptr:p} (ticket {})", ticket.number());
        Some(ptr)
    }

    /// Free a block previously returned by [`allocate`](Self::allocate) for
    /// `space`.
    ///
    /// Null pointers, pointers this manager does not track in `space` and
    /// second frees are rejected before the backend is touched. The block is
    /// freed with the size it was registered with; a different `bytes` is
    /// only logged.
    ///
    /// Returns `false` if the call was rejected or the backend free failed
    /// (the block is deregistered in that case all the same).
    pub fn deallocate(&self, ptr: *mut u8, bytes: usize, space: MemorySpace) -> bool {
        let Some(block) = NonNull::new(ptr) else {
            self.rejections.deallocations.incr();
            self.reject("deallocate", format_args!("deallocating null pointer not possible"));
            return false;
        };
        let Some(registry) = self.registry(space) else {
            self.rejections.deallocations.incr();
            self.reject("deallocate", format_args!("unsupported memory space {space}"));
            return false;
        };

        let addr = ptr as usize;
        // Blocks are never registered with size 0, so 0 means "not present".
        let registered = registry.size_of(addr);
        if registered == 0 {
            self.rejections.deallocations.incr();
            self.reject(
                "deallocate",
                format_args!("deallocating unknown pointer {ptr:p} or double freeing in {space} not possible"),
            );
            return false;
        }
        if registered != bytes {
            self.reject(
                "deallocate",
                format_args!("{ptr:p} was allocated with {registered} bytes, not {bytes}; freeing {registered}"),
            );
        }

        // Ticket before the backend call: once the address is back with the
        // backend it may be handed out again, and that allocation must queue
        // behind this deregistration. If the free unwinds, the claim still
        // retires the ticket and the block stays registered.
        let claim = self.sequencer.reserve();

        // Safety: `block` is registered in `space`, so it came from
        // `self.backend.alloc(space, registered)` and has not been freed.
        let freed = unsafe { self.backend.free(space, block, registered) };
        if let Err(e) = &freed {
            self.backend_failed("deallocate", e);
        }

        let ticket = {
            let turn = claim.wait();
            registry.deregister(addr);
            turn.ticket()
        };

        log::trace!("[memory] deallocate: {registered} bytes in {space} at {ptr:p} (ticket {})", ticket.number());
        freed.is_ok()
    }

    /// Copy `bytes` bytes from `src` to `dst`.
    ///
    /// Unless `external_memory` is set, each endpoint must lie inside one
    /// live block of its own space's registry or of the managed registry;
    /// otherwise nothing is copied and `false` is returned. A copy of 0
    /// bytes is a no-op that succeeds.
    ///
    /// Validation takes only the registries' own locks, not a ticket: a
    /// concurrent `deallocate` of either block may land before or after the
    /// check.
    ///
    /// # Safety
    /// - With `external_memory`, `src` must be readable and `dst` writable
    ///   for `bytes` bytes.
    /// - Neither block may be deallocated while the copy runs.
    pub unsafe fn copy(
        &self,
        dst: *mut u8,
        src: *const u8,
        bytes: usize,
        dst_space: MemorySpace,
        src_space: MemorySpace,
        external_memory: bool,
    ) -> bool {
        if bytes == 0 {
            return true;
        }
        let (Some(dst_block), Some(src_block)) = (NonNull::new(dst), NonNull::new(src.cast_mut())) else {
            self.rejections.copies.incr();
            self.reject("copy", format_args!("copying from or to null pointer not possible"));
            return false;
        };

        if !external_memory {
            if !self.covers(dst as usize, bytes, dst_space) {
                self.rejections.copies.incr();
                self.reject(
                    "copy",
                    format_args!("copying to unknown destination {dst:p} ({bytes} bytes, {dst_space}) not possible"),
                );
                return false;
            }
            if !self.covers(src as usize, bytes, src_space) {
                self.rejections.copies.incr();
                self.reject(
                    "copy",
                    format_args!("copying from unknown source {src:p} ({bytes} bytes, {src_space}) not possible"),
                );
                return false;
            }
        }

        // Safety: both ranges validated above or vouched for by the caller.
        match unsafe { self.backend.copy(dst_block, src_block, bytes, dst_space, src_space) } {
            Ok(()) => true,
            Err(e) => {
                self.rejections.copies.incr();
                self.backend_failed("copy", &e);
                false
            }
        }
    }

    /// `[addr, addr + bytes)` inside one live block of `space` or of the
    /// managed space.
    fn covers(&self, addr: usize, bytes: usize, space: MemorySpace) -> bool {
        self.registry(space).is_some_and(|r| r.contains_subrange(addr, bytes))
            || self.managed().contains_subrange(addr, bytes)
    }

    /// Space whose registry holds a block starting exactly at `ptr`, probing
    /// device, host, managed in that order. `Invalid` if none does.
    pub fn space_of(&self, ptr: *const u8) -> MemorySpace {
        let addr = ptr as usize;
        self.registries
            .iter()
            .find(|r| r.contains(addr))
            .map_or(MemorySpace::Invalid, AllocationRegistry::space)
    }

    /// Registered size of the block starting at `ptr`, `0` if unknown.
    pub fn size_of(&self, ptr: *const u8) -> usize {
        let size = self
            .registry(self.space_of(ptr))
            .map_or(0, |r| r.size_of(ptr as usize));
        if size == 0 {
            self.reject(
                "size_of",
                format_args!("{ptr:p} not allocated by this manager or not pointing to the first element, returning 0"),
            );
        }
        size
    }

    fn space_counter(&self, op: &str, space: MemorySpace, read: impl FnOnce(&AllocationRegistry) -> u64) -> u64 {
        match self.registry(space) {
            Some(registry) => read(registry),
            None => {
                self.reject(op, format_args!("unsupported memory space {space}"));
                0
            }
        }
    }

    /// Blocks ever registered in `space`.
    pub fn allocation_count(&self, space: MemorySpace) -> u64 {
        self.space_counter("allocation_count", space, AllocationRegistry::total_registrations)
    }

    /// Blocks ever deregistered in `space`.
    pub fn deallocation_count(&self, space: MemorySpace) -> u64 {
        self.space_counter("deallocation_count", space, AllocationRegistry::total_deregistrations)
    }

    /// Blocks currently live in `space`.
    pub fn live_count(&self, space: MemorySpace) -> usize {
        self.registry(space).map_or(0, AllocationRegistry::live_count)
    }

    /// Bytes currently live in `space`.
    pub fn live_bytes(&self, space: MemorySpace) -> usize {
        self.registry(space).map_or(0, AllocationRegistry::live_bytes)
    }

    /// Whether every registry satisfies its counter invariant.
    pub fn is_consistent(&self) -> bool {
        self.registries.iter().all(AllocationRegistry::is_consistent)
    }

    pub fn stats(&self) -> MemoryStats {
        let [device, host, managed]: [SpaceStats; 3] = self.registries.each_ref().map(AllocationRegistry::stats);
        MemoryStats {
            device,
            host,
            managed,
            rejected_allocations: self.rejections.allocations.get(),
            rejected_deallocations: self.rejections.deallocations.get(),
            rejected_copies: self.rejections.copies.get(),
            backend_failures: self.rejections.backend_failures.get(),
        }
    }

    /// Spaces that still hold live blocks.
    pub fn leak_report(&self) -> LeakReport {
        LeakReport {
            leaks: self
                .registries
                .iter()
                .map(|r| (r.space(), r.stats()))
                .filter(|(_, s)| s.live_count > 0)
                .map(|(space, s)| (space, s.live_count, s.live_bytes))
                .collect(),
        }
    }
}

impl<B: Backend> Drop for MemoryManager<B> {
    fn drop(&mut self) {
        if self.config.report_leaks_on_drop {
            let report = self.leak_report();
            if !report.is_clean() {
                log::warn!("[memory] leaked allocations at teardown: {report}");
            }
        }
        if !self.config.release_on_drop {
            return;
        }
        // `&mut self`: no caller can hold a ticket, so registries are
        // mutated directly.
        for registry in &self.registries {
            for (addr, size) in registry.live_records() {
                if let Some(block) = NonNull::new(addr as *mut u8) {
                    // Safety: registered blocks came from this backend and
                    // are still live.
                    if let Err(e) = unsafe { self.backend.free(registry.space(), block, size) } {
                        log::error!("[memory] teardown: freeing {block:p} in {} failed: {e}", registry.space());
                    }
                }
                registry.deregister(addr);
            }
        }
    }
}

static GLOBAL_MEMORY_MANAGER: OnceLock<MemoryManager<DefaultBackend>> = OnceLock::new();

/// Process-wide manager over [`DefaultBackend`], created on first use.
///
/// Never dropped, so it never reports leaks by itself; call
/// [`leak_report`](MemoryManager::leak_report) before exit instead.
pub struct GlobalMemoryManager;

impl GlobalMemoryManager {
    pub fn get() -> &'static MemoryManager<DefaultBackend> {
        GLOBAL_MEMORY_MANAGER.get_or_init(MemoryManager::default)
    }

    pub fn allocate(bytes: usize, space: MemorySpace) -> Option<NonNull<u8>> {
        Self::get().allocate(bytes, space)
    }

    pub fn deallocate(ptr: *mut u8, bytes: usize, space: MemorySpace) -> bool {
        Self::get().deallocate(ptr, bytes, space)
    }

    /// # Safety
    /// Same contract as [`MemoryManager::copy`].
    pub unsafe fn copy(
        dst: *mut u8,
        src: *const u8,
        bytes: usize,
        dst_space: MemorySpace,
        src_space: MemorySpace,
        external_memory: bool,
    ) -> bool {
        // Safety: forwarded to the caller.
        unsafe { Self::get().copy(dst, src, bytes, dst_space, src_space, external_memory) }
    }

    pub fn space_of(ptr: *const u8) -> MemorySpace {
        Self::get().space_of(ptr)
    }

    pub fn size_of(ptr: *const u8) -> usize {
        Self::get().size_of(ptr)
    }

    pub fn allocation_count(space: MemorySpace) -> u64 {
        Self::get().allocation_count(space)
    }

    pub fn deallocation_count(space: MemorySpace) -> u64 {
        Self::get().deallocation_count(space)
    }
}
