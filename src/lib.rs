#[cfg(not(target_pointer_width = "64"))]
compile_error!("spacemem supports only 64-bit targets.");

pub(crate) mod sync;

// public module: implementation details stay pub(crate)
pub mod memory;

// manager
pub use memory::manager::{GlobalMemoryManager, MemoryManager};
pub use memory::config::MemoryManagerConfig;
pub use memory::space::MemorySpace;

// backends
pub use memory::backend::{Backend, BackendError, DefaultBackend, HeapBackend, DEFAULT_ALIGNMENT};
#[cfg(all(unix, not(any(loom, miri))))]
pub use memory::vm::PageBackend;

// stats
pub use memory::stats::{LeakReport, MemoryStats, SpaceStats};
