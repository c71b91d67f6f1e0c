//! Shared logging initialization for ralph-admin binaries.

use std::sync::OnceLock;

/// Environment variable selecting the log level.
pub const LOG_ENV: &str = "RALPH_ADMIN_LOG";

static INIT: OnceLock<()> = OnceLock::new();

fn parse_level(value: Option<&str>) -> tracing::Level {
    match value.unwrap_or("warn").trim().to_ascii_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::WARN,
    }
}

/// Initialize process-level tracing output from `RALPH_ADMIN_LOG`.
///
/// Output goes to stderr so command output on stdout stays machine-readable.
/// Safe to call multiple times; only the first call installs the subscriber.
/// Never returns an error.
pub fn init() {
    if INIT.get().is_some() {
        return;
    }
    let level = parse_level(std::env::var(LOG_ENV).ok().as_deref());
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
    let _ = INIT.set(());
}
