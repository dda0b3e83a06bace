use std::fmt;

/// Memory space an allocation lives in.
///
/// `Device` and `Host` are disjoint. `Managed` blocks are visible from both
/// sides, so the copy path accepts a `Managed` block for either endpoint.
/// `Invalid` is what [`space_of`](crate::MemoryManager::space_of) answers for
/// pointers no registry knows; it never owns a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MemorySpace {
    Device,
    Host,
    Managed,
    Invalid,
}

impl MemorySpace {
    /// The spaces that own a registry, in `space_of` probe order.
    pub const ALL: [MemorySpace; 3] = [MemorySpace::Device, MemorySpace::Host, MemorySpace::Managed];

    /// Index into per-space tables, `None` for `Invalid`.
    #[inline]
    pub(crate) const fn index(self) -> Option<usize> {
        match self {
            MemorySpace::Device => Some(0),
            MemorySpace::Host => Some(1),
            MemorySpace::Managed => Some(2),
            MemorySpace::Invalid => None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.index().is_some()
    }
}

impl fmt::Display for MemorySpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MemorySpace::Device => "device",
            MemorySpace::Host => "host",
            MemorySpace::Managed => "managed",
            MemorySpace::Invalid => "invalid",
        };
        f.write_str(name)
    }
}
