//! FILENAME: core/pivot-matrix/src/logging.rs
//! Category-tagged logging macros on top of the `log` facade.
//!
//! Usage mirrors the rest of the codebase: a category first, then format
//! arguments, e.g. `log_info!("MATRIX", "cycle {} done", generation)`.
//! The category becomes the `log` target so hosts can filter per subsystem.
//! The library never installs a logger.

#[doc(hidden)]
pub use log as __log;

#[macro_export]
macro_rules! log_debug {
    ($cat:expr, $($arg:tt)*) => {
        $crate::logging::__log::debug!(target: $cat, $($arg)*)
    };
}

#[macro_export]
macro_rules! log_info {
    ($cat:expr, $($arg:tt)*) => {
        $crate::logging::__log::info!(target: $cat, $($arg)*)
    };
}

#[macro_export]
macro_rules! log_warn {
    ($cat:expr, $($arg:tt)*) => {
        $crate::logging::__log::warn!(target: $cat, $($arg)*)
    };
}

#[macro_export]
macro_rules! log_error {
    ($cat:expr, $($arg:tt)*) => {
        $crate::logging::__log::error!(target: $cat, $($arg)*)
    };
}

/// Elapsed milliseconds since `start`, for perf log lines.
pub fn elapsed_ms(start: std::time::Instant) -> u128 {
    start.elapsed().as_millis()
}
