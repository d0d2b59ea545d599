//! Engine configuration.
//!
//! Every timing constant lives here as an override-able field;
//! environment variables supply deployment values without code changes.

use std::env;

use crate::adapters::DEFAULT_BASE_URL;
use crate::queue::RetryPolicy;

/// Configuration for one [`SyncEngine`](crate::engine::SyncEngine) instance.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Base URL of the authoritative backend.
    pub remote_base_url: String,
    /// Identity of the local user, stamped on optimistic threads.
    pub owner_id: String,
    /// Backoff parameters for the retry scheduler.
    pub retry: RetryPolicy,
    /// How long an unconfirmed optimistic entity stays trusted.
    pub grace_window_ms: u64,
    /// TTL for regular distributed locks.
    pub lock_ttl_ms: u64,
    /// Client-side bound on a lock acquisition attempt, distinct from the
    /// lock's own TTL.
    pub lock_acquire_timeout_ms: u64,
    /// Liveness window for presence entries.
    pub presence_window_ms: u64,
    /// Interval of the background sweep (grace-window purge + heartbeat).
    pub sweep_interval_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            remote_base_url: DEFAULT_BASE_URL.to_string(),
            owner_id: "local".to_string(),
            retry: RetryPolicy::default(),
            grace_window_ms: 5_000,
            lock_ttl_ms: 5_000,
            lock_acquire_timeout_ms: 750,
            presence_window_ms: 30_000,
            sweep_interval_ms: 1_000,
        }
    }
}

impl SyncConfig {
    /// Build a config from defaults overlaid with `DRIFTSYNC_*` environment
    /// variables. Unparseable values fall back silently to the default.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = env::var("DRIFTSYNC_REMOTE_URL") {
            config.remote_base_url = url;
        }
        if let Ok(owner) = env::var("DRIFTSYNC_OWNER_ID") {
            config.owner_id = owner;
        }
        config.retry.base_delay_ms =
            env_ms("DRIFTSYNC_RETRY_BASE_MS", config.retry.base_delay_ms);
        config.retry.max_delay_ms = env_ms("DRIFTSYNC_RETRY_MAX_MS", config.retry.max_delay_ms);
        config.grace_window_ms = env_ms("DRIFTSYNC_GRACE_WINDOW_MS", config.grace_window_ms);
        config.lock_ttl_ms = env_ms("DRIFTSYNC_LOCK_TTL_MS", config.lock_ttl_ms);
        config
    }

    pub fn grace_window(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.grace_window_ms as i64)
    }
}

fn env_ms(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}
