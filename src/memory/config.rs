/// Tunables for a [`MemoryManager`](crate::MemoryManager).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryManagerConfig {
    /// Re-check every registry's `registrations - deregistrations == live`
    /// invariant around each mutation, logging any breach. Always on in
    /// checked builds, where a breach panics instead. Default: off in
    /// unchecked builds.
    pub verify_invariants: bool,

    /// Log a diagnostic for every rejected allocate / deallocate / copy /
    /// lookup. Rejection counters in `MemoryStats` are kept regardless.
    /// Default: true.
    pub log_rejections: bool,

    /// On drop, log every space that still holds live blocks. Default: true.
    pub report_leaks_on_drop: bool,

    /// On drop, hand every still-registered block back to the backend.
    /// Default: true.
    pub release_on_drop: bool,
}

impl Default for MemoryManagerConfig {
    fn default() -> Self {
        Self {
            verify_invariants: cfg!(any(debug_assertions, feature = "contracts")),
            log_rejections: true,
            report_leaks_on_drop: true,
            release_on_drop: true,
        }
    }
}

impl MemoryManagerConfig {
    /// Defaults with diagnostics silenced; counters still update.
    #[must_use]
    pub fn quiet() -> Self {
        Self {
            log_rejections: false,
            report_leaks_on_drop: false,
            ..Self::default()
        }
    }
}
