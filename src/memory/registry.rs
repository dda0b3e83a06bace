use super::contract::{self, contract_check, ensures, expects};
use super::space::MemorySpace;
use super::stats::SpaceStats;
use crate::sync::{lock, Mutex};
use std::collections::BTreeMap;

/// Live records of one memory space plus lifetime counters.
///
/// Invariant (whenever the lock is not held): `registrations -
/// deregistrations == pointers.len()`.
struct Records {
    /// Block start address -> block size in bytes. Ordered by address so the
    /// sub-range query can bound its scan.
    pointers: BTreeMap<usize, usize>,
    live_bytes: usize,
    registrations: u64,
    deregistrations: u64,
}

impl Records {
    const fn new() -> Self {
        Self {
            pointers: BTreeMap::new(),
            live_bytes: 0,
            registrations: 0,
            deregistrations: 0,
        }
    }

    fn is_consistent(&self) -> bool {
        self.registrations
            .checked_sub(self.deregistrations)
            .is_some_and(|live| live == self.pointers.len() as u64)
    }

    /// True iff `[addr, addr + size)` lies inside one single live block.
    ///
    /// Blocks never overlap, so only the last block starting at or before
    /// `addr` can cover the range. A range straddling two adjacent blocks is
    /// not covered.
    fn covers(&self, addr: usize, size: usize) -> bool {
        let Some(end) = addr.checked_add(size) else {
            return false;
        };
        self.pointers
            .range(..=addr)
            .next_back()
            .is_some_and(|(&start, &len)| start.checked_add(len).is_some_and(|block_end| end <= block_end))
    }
}

/// Bookkeeping for the live allocations of one [`MemorySpace`].
///
/// All operations take the registry's own lock, so they are safe to call
/// concurrently. Mutations are additionally ordered process-wide by the
/// manager's [`TicketSequencer`](super::ticket::TicketSequencer); queries
/// (the copy path) only contend on this lock.
pub(crate) struct AllocationRegistry {
    space: MemorySpace,
    records: Mutex<Records>,
    /// Re-check the invariant around mutations even in unchecked builds.
    verify_invariants: bool,
}

impl AllocationRegistry {
    pub fn new(space: MemorySpace, verify_invariants: bool) -> Self {
        Self {
            space,
            records: Mutex::new(Records::new()),
            verify_invariants,
        }
    }

    #[inline]
    pub fn space(&self) -> MemorySpace {
        self.space
    }

    /// Record a freshly allocated block.
    ///
    /// Precondition: `addr` is not registered. Checked builds panic on a
    /// violation; unchecked builds log it and leave the registry untouched.
    /// Returns whether the record was inserted.
    pub fn register(&self, addr: usize, size: usize) -> bool {
        let mut records = lock(&self.records);
        let present = records.pointers.contains_key(&addr);
        expects!(!present, "{} registry: {addr:#x} is already registered", self.space);
        self.verify(&records, "before register");
        if present {
            log::error!(
                "[memory] register: {addr:#x} already registered in {} registry, ignoring",
                self.space
            );
            return false;
        }

        records.pointers.insert(addr, size);
        records.live_bytes = records.live_bytes.saturating_add(size);
        records.registrations += 1;

        ensures!(
            records.pointers.contains_key(&addr),
            "{} registry: {addr:#x} missing after register",
            self.space
        );
        self.verify(&records, "after register");
        true
    }

    /// Drop the record of a block being freed.
    ///
    /// Precondition: `addr` is registered. Same violation policy as
    /// [`register`](Self::register). Returns the size the block was
    /// registered with.
    pub fn deregister(&self, addr: usize) -> Option<usize> {
        let mut records = lock(&self.records);
        let present = records.pointers.contains_key(&addr);
        expects!(present, "{} registry: {addr:#x} is not registered", self.space);
        self.verify(&records, "before deregister");

        let Some(size) = records.pointers.remove(&addr) else {
            log::error!(
                "[memory] deregister: {addr:#x} not registered in {} registry, ignoring",
                self.space
            );
            return None;
        };
        records.live_bytes = records.live_bytes.saturating_sub(size);
        records.deregistrations += 1;

        ensures!(
            !records.pointers.contains_key(&addr),
            "{} registry: {addr:#x} still present after deregister",
            self.space
        );
        self.verify(&records, "after deregister");
        Some(size)
    }

    /// Exact start-address lookup.
    pub fn contains(&self, addr: usize) -> bool {
        lock(&self.records).pointers.contains_key(&addr)
    }

    /// True iff `[addr, addr + size)` lies entirely inside one live block.
    pub fn contains_subrange(&self, addr: usize, size: usize) -> bool {
        lock(&self.records).covers(addr, size)
    }

    /// Size of the block starting at `addr`, `0` if unknown.
    pub fn size_of(&self, addr: usize) -> usize {
        lock(&self.records).pointers.get(&addr).copied().unwrap_or(0)
    }

    /// Blocks currently registered. Nonzero at teardown means a leak.
    pub fn live_count(&self) -> usize {
        lock(&self.records).pointers.len()
    }

    pub fn live_bytes(&self) -> usize {
        lock(&self.records).live_bytes
    }

    pub fn total_registrations(&self) -> u64 {
        lock(&self.records).registrations
    }

    pub fn total_deregistrations(&self) -> u64 {
        lock(&self.records).deregistrations
    }

    pub fn is_consistent(&self) -> bool {
        lock(&self.records).is_consistent()
    }

    /// Consistent snapshot of all counters, taken under one lock.
    pub fn stats(&self) -> SpaceStats {
        let records = lock(&self.records);
        SpaceStats {
            live_count: records.pointers.len(),
            live_bytes: records.live_bytes,
            total_registrations: records.registrations,
            total_deregistrations: records.deregistrations,
        }
    }

    /// `(addr, size)` of every live block, in address order.
    pub fn live_records(&self) -> Vec<(usize, usize)> {
        lock(&self.records).pointers.iter().map(|(&a, &s)| (a, s)).collect()
    }

    fn verify(&self, records: &Records, stage: &str) {
        if !(contract::ENABLED || self.verify_invariants) {
            return;
        }
        let consistent = records.is_consistent();
        contract_check!(
            "invariant",
            consistent,
            "{} registry inconsistent {stage}: {} registrations, {} deregistrations, {} live",
            self.space,
            records.registrations,
            records.deregistrations,
            records.pointers.len()
        );
        if !consistent {
            log::error!(
                "[memory] {} registry inconsistent {stage}: {} registrations, {} deregistrations, {} live",
                self.space,
                records.registrations,
                records.deregistrations,
                records.pointers.len()
            );
        }
    }
}
