//! Feature-gated tracing macros.
//!
//! With the `logging` feature the macros forward to `tracing`; without it
//! they expand to nothing, so they must be used in statement position.
//!
//! ```rust,ignore
//! use crate::logging::{debug, trace};
//!
//! trace!(ctype = ct.cname(), "ctype interned");
//! debug!(symbol = name, address = address, "symbol resolved");
//! ```
//!
//! Events by level:
//! - `trace`: type interning, allocations, closures, native calls
//! - `debug`: struct completion, symbol lookup, release, configuration
//! - `info`: libraries opened and closed
//! - `warn`: implicit conversions and failing callbacks
//! - `error`: `onerror` handlers that fail in turn

#[cfg(feature = "logging")]
macro_rules! log_trace {
    ($($arg:tt)*) => { tracing::trace!($($arg)*) }
}

#[cfg(not(feature = "logging"))]
macro_rules! log_trace {
    ($($arg:tt)*) => {};
}

#[cfg(feature = "logging")]
macro_rules! log_debug {
    ($($arg:tt)*) => { tracing::debug!($($arg)*) }
}

#[cfg(not(feature = "logging"))]
macro_rules! log_debug {
    ($($arg:tt)*) => {};
}

#[cfg(feature = "logging")]
macro_rules! log_info {
    ($($arg:tt)*) => { tracing::info!($($arg)*) }
}

#[cfg(not(feature = "logging"))]
macro_rules! log_info {
    ($($arg:tt)*) => {};
}

#[cfg(feature = "logging")]
macro_rules! log_warn {
    ($($arg:tt)*) => { tracing::warn!($($arg)*) }
}

#[cfg(not(feature = "logging"))]
macro_rules! log_warn {
    ($($arg:tt)*) => {};
}

#[cfg(feature = "logging")]
macro_rules! log_error {
    ($($arg:tt)*) => { tracing::error!($($arg)*) }
}

#[cfg(not(feature = "logging"))]
macro_rules! log_error {
    ($($arg:tt)*) => {};
}

pub(crate) use log_debug as debug;
pub(crate) use log_error as error;
pub(crate) use log_info as info;
pub(crate) use log_trace as trace;
pub(crate) use log_warn as warn;

#[cfg(test)]
mod tests {
    use super::{debug, error, info, trace, warn};

    #[test]
    fn test_every_level_takes_fields() {
        let name = "f";
        trace!(ctype = name, "ctype interned");
        debug!(symbol = name, address = 0usize, "symbol resolved");
        info!(path = name, "library loaded");
        warn!(callback = name, "callback raised");
        error!(callback = name, error = %name, "onerror failed");
        let _ = name;
    }
}
