//! Tracing initialization for the node binary.

use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber.
///
/// `default_filter` applies when `RUST_LOG` is unset, e.g. `"info"` or
/// `"consort_cft=debug,info"`. Safe to call more than once; later calls
/// are no-ops.
pub fn init_telemetry(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
