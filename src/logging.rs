//! Opt-in tracing setup for embedding applications.

use tracing_subscriber::EnvFilter;

/// Install a global tracing subscriber honoring `RUST_LOG`.
///
/// Library consumers that already configure tracing should skip this;
/// calling it twice is a no-op.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("driftsync=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
