//! Structured logging for the s3frame workspace.
//!
//! Thin layer over `emit`, configured from the `S3FRAME_LOG` environment
//! variable: `off` (default), `debug`, `info`, `warn`, or `error`.

use std::sync::Once;

// Re-export emit so the macros can expand in downstream crates.
pub use emit;

static INIT: Once = Once::new();

/// Initialize logging from `S3FRAME_LOG`. Safe to call more than once;
/// only the first call has any effect.
pub fn init_diagnostics() {
    INIT.call_once(|| {
        let level = std::env::var("S3FRAME_LOG").unwrap_or_else(|_| "off".to_string());

        let min_level = match level.as_str() {
            "off" => return,
            "debug" => emit::Level::Debug,
            "info" => emit::Level::Info,
            "warn" => emit::Level::Warn,
            "error" => emit::Level::Error,
            other => {
                eprintln!("Unknown S3FRAME_LOG value '{other}', using 'info'");
                emit::Level::Info
            }
        };

        let rt = emit::setup()
            .emit_to(emit_term::stderr())
            .emit_when(emit::level::min_filter(min_level))
            .init();

        // The runtime must outlive every emit call site.
        std::mem::forget(rt);
    });
}

pub use init_diagnostics as init;

/// Log operations a user would expect to see in normal usage
/// (query started, rows returned).
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::emit::info!($($arg)*)
    };
}

/// Log internal detail useful when debugging (payload sizes, inferred
/// schemas, per-column decisions).
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::emit::debug!($($arg)*)
    };
}

/// Log recoverable oddities (fallbacks, ignored events).
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::emit::warn!($($arg)*)
    };
}

/// Log failures that abort the current query.
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::emit::error!($($arg)*)
    };
}
