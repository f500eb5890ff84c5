//! Tracing/logging initialization.

use tracing_subscriber::EnvFilter;

/// Install the process-wide fmt subscriber, filtered by `RUST_LOG`
/// (default `info`). JSON output when `json` is set.
///
/// Safe to call multiple times; later calls are no-ops.
pub fn init(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
