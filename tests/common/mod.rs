//! Shared helpers for integration tests.

use std::sync::Arc;
use std::time::Duration;

use driftsync::adapters::{MemoryCacheStore, MemoryCoordination, MockRemoteBridge};
use driftsync::config::SyncConfig;
use driftsync::engine::SyncEngine;
use driftsync::queue::RetryPolicy;

/// Config with millisecond-scale timings so tests run fast.
pub fn fast_config() -> SyncConfig {
    SyncConfig {
        retry: RetryPolicy {
            base_delay_ms: 1,
            factor: 2.0,
            max_delay_ms: 10,
            max_retries: 3,
        },
        sweep_interval_ms: 50,
        grace_window_ms: 5_000,
        ..SyncConfig::default()
    }
}

/// Build an engine over shared collaborators (for multi-instance tests).
pub fn engine_with(
    bridge: &MockRemoteBridge,
    cache: &MemoryCacheStore,
    coordination: &MemoryCoordination,
) -> Arc<SyncEngine> {
    SyncEngine::new(
        fast_config(),
        Arc::new(bridge.clone()),
        Arc::new(cache.clone()),
        Arc::new(coordination.clone()),
    )
}

/// Poll until `condition` holds or the timeout elapses.
pub async fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
