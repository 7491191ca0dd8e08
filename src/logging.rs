//! Tracing setup and the per-service structured logging helpers used by
//! output capture and the supervisor (ambient stack, SPEC_FULL.md §10).

use crate::config::LogLevel;

/// Initialize the global tracing subscriber at the given base level.
/// Safe to call once per process; a second call is a silent no-op via
/// `tracing_subscriber`'s own guard.
pub fn init_tracing(level: LogLevel) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("orchestrator={level}")));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .try_init();
}

/// Info-level log tagged with `service` and `stream`, used for stdout
/// pass-through (spec.md §4.6: "stdout at info").
#[macro_export]
macro_rules! svc_info {
    ($service:expr, $stream:expr, $($arg:tt)*) => {
        tracing::info!(service = %$service, stream = $stream, $($arg)*)
    };
}

/// Error-level log tagged with `service` and `stream`, used for stderr
/// pass-through (spec.md §4.6: "Lines from stderr are logged at error").
#[macro_export]
macro_rules! svc_error {
    ($service:expr, $stream:expr, $($arg:tt)*) => {
        tracing::error!(service = %$service, stream = $stream, $($arg)*)
    };
}

/// Warn-level log tagged with just `service`, used for supervisor and
/// service-manager state transitions.
#[macro_export]
macro_rules! svc_warn {
    ($service:expr, $($arg:tt)*) => {
        tracing::warn!(service = %$service, $($arg)*)
    };
}

/// Info-level log tagged with just `service`, used for supervisor and
/// service-manager lifecycle events (start/stop/restart) that aren't tied
/// to a particular output stream.
#[macro_export]
macro_rules! svc_note {
    ($service:expr, $($arg:tt)*) => {
        tracing::info!(service = %$service, $($arg)*)
    };
}
