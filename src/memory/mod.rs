pub(crate) mod backend;
pub(crate) mod config;
pub(crate) mod contract;
pub(crate) mod integration;
pub(crate) mod manager;
pub(crate) mod registry;
pub(crate) mod space;
pub(crate) mod stats;
pub(crate) mod ticket;
#[cfg(all(unix, not(any(loom, miri))))]
pub(crate) mod vm;

#[cfg(test)]
pub(crate) mod testing;
