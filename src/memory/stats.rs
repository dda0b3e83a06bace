//! Diagnostic counters and snapshots.
//!
//! Rejection counters use `Relaxed` ordering. Individual values are
//! eventually consistent and a `MemoryStats` snapshot may be transiently
//! inconsistent across counters. Per-space figures come from one registry
//! lock each and are exact for that space.

use super::space::MemorySpace;
use crate::sync::atomic::{AtomicU64, Ordering};
use std::fmt;

/// Monotonic diagnostic event counter.
pub(crate) struct Counter(AtomicU64);

impl Counter {
    #[cfg(not(loom))]
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    #[cfg(loom)]
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    #[inline]
    pub fn incr(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Rejection tallies kept by a manager.
pub(crate) struct RejectionCounters {
    pub allocations: Counter,
    pub deallocations: Counter,
    pub copies: Counter,
    pub backend_failures: Counter,
}

impl RejectionCounters {
    pub fn new() -> Self {
        Self {
            allocations: Counter::new(),
            deallocations: Counter::new(),
            copies: Counter::new(),
            backend_failures: Counter::new(),
        }
    }
}

/// Counters of one memory space's registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpaceStats {
    pub live_count: usize,
    pub live_bytes: usize,
    pub total_registrations: u64,
    pub total_deregistrations: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub device: SpaceStats,
    pub host: SpaceStats,
    pub managed: SpaceStats,
    /// `allocate` calls refused: zero size or backend failure.
    pub rejected_allocations: u64,
    /// `deallocate` calls refused: null, unknown pointer or double free.
    pub rejected_deallocations: u64,
    /// `copy` calls refused: unvalidated endpoint or backend failure.
    pub rejected_copies: u64,
    pub backend_failures: u64,
}

impl MemoryStats {
    #[must_use]
    pub fn space(&self, space: MemorySpace) -> Option<&SpaceStats> {
        match space {
            MemorySpace::Device => Some(&self.device),
            MemorySpace::Host => Some(&self.host),
            MemorySpace::Managed => Some(&self.managed),
            MemorySpace::Invalid => None,
        }
    }

    pub fn total_live_bytes(&self) -> usize {
        self.device.live_bytes + self.host.live_bytes + self.managed.live_bytes
    }
}

/// Spaces that still hold live allocations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeakReport {
    /// `(space, live_count, live_bytes)` for every space with live blocks.
    pub leaks: Vec<(MemorySpace, usize, usize)>,
}

impl LeakReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.leaks.is_empty()
    }
}

impl fmt::Display for LeakReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_clean() {
            return f.write_str("no leaked allocations");
        }
        for (i, (space, count, bytes)) in self.leaks.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{space}: {count} blocks ({bytes} bytes)")?;
        }
        Ok(())
    }
}
