//! Precondition / postcondition checks.
//!
//! Active in checked builds: `debug_assertions` or the `contracts` feature.
//! A violated contract is a client bug, so it is logged and panics. The
//! release profile sets `panic = "abort"`, which turns that into a process
//! abort.

/// True when contract checks are compiled in.
pub(crate) const ENABLED: bool = cfg!(any(debug_assertions, feature = "contracts"));

macro_rules! contract_check {
    ($kind:literal, $cond:expr, $($arg:tt)+) => {
        if $crate::memory::contract::ENABLED && !($cond) {
            log::error!("[memory] {} violated: {}", $kind, format_args!($($arg)+));
            panic!("{} violated: {}", $kind, format_args!($($arg)+));
        }
    };
}
pub(crate) use contract_check;

/// Precondition check.
macro_rules! expects {
    ($cond:expr, $($arg:tt)+) => {
        $crate::memory::contract::contract_check!("precondition", $cond, $($arg)+)
    };
}
pub(crate) use expects;

/// Postcondition check.
macro_rules! ensures {
    ($cond:expr, $($arg:tt)+) => {
        $crate::memory::contract::contract_check!("postcondition", $cond, $($arg)+)
    };
}
pub(crate) use ensures;
