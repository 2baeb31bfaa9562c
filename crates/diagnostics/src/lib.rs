//! Lightweight structured logging for the MirrorFS workspace.
//!
//! Wraps `emit` so every crate logs the same way without owning any setup.
//!
//! Usage:
//! - Set MIRRORFS_LOG=off (default) - no logs
//! - Set MIRRORFS_LOG=error|warn|info|debug - minimum emitted level

use std::sync::Once;

// Re-export emit so macros can use it
pub use emit;

static INIT: Once = Once::new();

/// Initialize diagnostics based on the MIRRORFS_LOG environment variable.
///
/// Call once at startup. Safe to call multiple times; subsequent calls are
/// ignored.
pub fn init_diagnostics() {
    INIT.call_once(|| {
        let log_level = std::env::var("MIRRORFS_LOG").unwrap_or_else(|_| "off".to_string());

        let min_level = match log_level.as_str() {
            "off" => return,
            "debug" => emit::Level::Debug,
            "info" => emit::Level::Info,
            "warn" => emit::Level::Warn,
            "error" => emit::Level::Error,
            other => {
                eprintln!("Warning: Unknown MIRRORFS_LOG value '{}', using 'info'", other);
                emit::Level::Info
            }
        };

        let rt = emit::setup()
            .emit_to(emit_term::stderr())
            .emit_when(emit::level::min_filter(min_level))
            .init();

        // The emitter must outlive every caller; there is no shutdown hook.
        std::mem::forget(rt);
    });
}

/// Log basic operations (root materialization, event batches, stream opens).
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::emit::info!($($arg)*)
    };
}

/// Log detailed diagnostics (cache hits, reconciliation steps, byte counts).
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::emit::debug!($($arg)*)
    };
}

/// Log recoverable conditions (integrity mismatches, skipped event steps).
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::emit::warn!($($arg)*)
    };
}

/// Log serious failures (store corruption, inconsistent records).
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::emit::error!($($arg)*)
    };
}

/// Re-export the init function for convenience
pub use init_diagnostics as init;
