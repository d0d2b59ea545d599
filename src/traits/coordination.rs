//! Coordination service trait abstraction.
//!
//! A shared, low-latency key-value store with atomic conditional set, TTL
//! expiry, and publish/subscribe, reachable by every client instance of one
//! logical session. Distributed locks and cross-tab events are built on it.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::SyncResult;

/// A message received on a subscribed channel.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinationMessage {
    pub channel: String,
    pub payload: String,
}

/// Stream of messages delivered to a subscriber.
pub type SubscriptionStream = Pin<Box<dyn Stream<Item = CoordinationMessage> + Send>>;

/// Trait for the shared key-value + pub/sub service.
#[async_trait]
pub trait CoordinationService: Send + Sync {
    /// Read a key. Expired entries read as absent.
    async fn get(&self, key: &str) -> SyncResult<Option<String>>;

    /// Write a key without expiry.
    async fn set(&self, key: &str, value: &str) -> SyncResult<()>;

    /// Write a key with a TTL in milliseconds.
    ///
    /// With `only_if_absent`, the write succeeds only when no live value
    /// exists for the key (atomic set-if-not-exists — the distributed lock
    /// primitive). Returns whether the write was applied.
    async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl_ms: u64,
        only_if_absent: bool,
    ) -> SyncResult<bool>;

    /// Delete a key.
    async fn delete(&self, key: &str) -> SyncResult<()>;

    /// Publish a payload to all current subscribers of a channel.
    async fn publish(&self, channel: &str, payload: &str) -> SyncResult<()>;

    /// Subscribe to a channel. The stream ends when the service shuts down
    /// or the subscriber falls too far behind.
    async fn subscribe(&self, channel: &str) -> SyncResult<SubscriptionStream>;
}
