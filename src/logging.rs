//! Logging setup (SPEC_FULL.md §6.2).
//!
//! A non-blocking file appender writes the structured per-run log at debug
//! level; a second layer prints human-readable progress to stdout at the
//! level the caller selected. Grounded in `freddiehaddad-oxidized`'s
//! `ox-bin` binary, which wires the same `tracing` + `tracing-subscriber` +
//! `tracing-appender` trio.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Must be kept alive for the lifetime of the process; dropping it flushes
/// and stops the background writer thread.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

pub fn init(log_path: &Path, stdout_level: &str) -> LoggingGuard {
    let log_dir = log_path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = log_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "falconz.log".to_string());

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_span_events(FmtSpan::CLOSE)
        .with_filter(EnvFilter::new("debug"));

    let stdout_filter = EnvFilter::try_from_env("RUST_LOG")
        .unwrap_or_else(|_| EnvFilter::new(stdout_level.to_string()));
    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .without_time()
        .with_filter(stdout_filter);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stdout_layer)
        .init();

    LoggingGuard { _file_guard: guard }
}
