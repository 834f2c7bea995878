//! Crate-internal logging facade.
//!
//! Forwards to `tracing` when the `tracing` feature is enabled. Without it the
//! format arguments are still type-checked but nothing is emitted.
#![allow(unused_macros)]

macro_rules! cdm_log {
    ($level:ident, $($arg:tt)+) => {{
        #[cfg(feature = "tracing")]
        {
            tracing::$level!(target: "clearkey_cdm", $($arg)+);
        }
        #[cfg(not(feature = "tracing"))]
        {
            if false {
                let _ = format_args!($($arg)+);
            }
        }
    }};
}

macro_rules! trace {
    ($($arg:tt)+) => { cdm_log!(trace, $($arg)+) };
}

macro_rules! debug {
    ($($arg:tt)+) => { cdm_log!(debug, $($arg)+) };
}

macro_rules! warn {
    ($($arg:tt)+) => { cdm_log!(warn, $($arg)+) };
}

macro_rules! error {
    ($($arg:tt)+) => { cdm_log!(error, $($arg)+) };
}
