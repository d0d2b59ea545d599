//! Cross-tab coordinator: distributed locks and state broadcast.
//!
//! Serializes conflicting actions across tabs/devices through the
//! coordination service's atomic conditional-set (with TTL as crash
//! protection), and fans state changes out on per-thread channels. Received
//! events feed the same reducer merge paths as local data — the merge
//! algorithm is shared, not duplicated.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{SyncError, SyncResult};
use crate::models::{Message, Thread};
use crate::state::{SharedState, SyncEvent};
use crate::traits::{CoordinationService, SubscriptionStream};

/// A state change broadcast to sibling instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CrossTabEvent {
    OptimisticMessage { message: Message },
    MessageConfirmed { provisional_id: String, message: Message },
    MessageRemoved { message_id: String },
    ThreadUpserted { thread: Thread },
    ThreadRemoved { thread_id: String },
}

/// Wire envelope carrying the originating instance id so receivers can
/// ignore their own broadcasts.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Envelope {
    origin: String,
    #[serde(flatten)]
    event: CrossTabEvent,
}

/// Presence document written under `presence:{instance_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PresenceEntry {
    instance_id: String,
    timestamp_ms: i64,
}

/// Coordinates lock acquisition and event broadcast for one engine instance.
pub struct CrossTabCoordinator {
    service: Arc<dyn CoordinationService>,
    instance_id: String,
    lock_ttl_ms: u64,
    acquire_timeout_ms: u64,
    presence_window_ms: u64,
}

impl CrossTabCoordinator {
    pub fn new(
        service: Arc<dyn CoordinationService>,
        instance_id: String,
        lock_ttl_ms: u64,
        acquire_timeout_ms: u64,
        presence_window_ms: u64,
    ) -> Self {
        Self {
            service,
            instance_id,
            lock_ttl_ms,
            acquire_timeout_ms,
            presence_window_ms,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Try to take a named distributed lock.
    ///
    /// A single atomic set-if-absent with TTL; the stored value is this
    /// instance's id. The attempt itself races a client-side timeout so a
    /// slow coordination service cannot block the caller for the lock's
    /// full TTL.
    pub async fn acquire_lock(&self, resource: &str) -> SyncResult<bool> {
        let key = lock_key(resource);
        let attempt = self
            .service
            .set_with_ttl(&key, &self.instance_id, self.lock_ttl_ms, true);

        match tokio::time::timeout(Duration::from_millis(self.acquire_timeout_ms), attempt).await
        {
            Ok(result) => {
                let acquired = result?;
                debug!(resource, acquired, "Lock acquisition attempt");
                Ok(acquired)
            }
            Err(_) => Err(SyncError::Coordination {
                message: format!("lock acquisition for '{}' timed out", resource),
            }),
        }
    }

    /// Release a lock this instance holds.
    ///
    /// Ownership is checked first: after TTL expiry another instance may
    /// have taken the lock, and releasing someone else's lock would break
    /// mutual exclusion. A non-owned lock is left untouched.
    pub async fn release_lock(&self, resource: &str) -> SyncResult<()> {
        let key = lock_key(resource);
        match self.service.get(&key).await? {
            Some(holder) if holder == self.instance_id => {
                self.service.delete(&key).await?;
                Ok(())
            }
            Some(holder) => {
                warn!(
                    resource,
                    holder, "Skipping release of lock held by another instance"
                );
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Broadcast a state change on a thread's channel.
    pub async fn publish(&self, thread_id: &str, event: CrossTabEvent) -> SyncResult<()> {
        let envelope = Envelope {
            origin: self.instance_id.clone(),
            event,
        };
        let payload = serde_json::to_string(&envelope).map_err(|err| SyncError::Coordination {
            message: format!("failed to encode cross-tab event: {}", err),
        })?;
        self.service.publish(&thread_channel(thread_id), &payload).await
    }

    /// Broadcast a thread-level change on the shared threads channel.
    pub async fn publish_thread_event(&self, event: CrossTabEvent) -> SyncResult<()> {
        let envelope = Envelope {
            origin: self.instance_id.clone(),
            event,
        };
        let payload = serde_json::to_string(&envelope).map_err(|err| SyncError::Coordination {
            message: format!("failed to encode cross-tab event: {}", err),
        })?;
        self.service.publish(THREADS_CHANNEL, &payload).await
    }

    /// Subscribe to a thread's channel.
    pub async fn subscribe_thread(&self, thread_id: &str) -> SyncResult<SubscriptionStream> {
        self.service.subscribe(&thread_channel(thread_id)).await
    }

    /// Subscribe to the shared threads channel.
    pub async fn subscribe_threads(&self) -> SyncResult<SubscriptionStream> {
        self.service.subscribe(THREADS_CHANNEL).await
    }

    /// Decode an incoming payload, ignoring our own broadcasts and anything
    /// malformed.
    pub fn decode(&self, payload: &str) -> Option<CrossTabEvent> {
        match serde_json::from_str::<Envelope>(payload) {
            Ok(envelope) if envelope.origin == self.instance_id => None,
            Ok(envelope) => Some(envelope.event),
            Err(err) => {
                warn!(error = %err, "Dropping malformed cross-tab payload");
                None
            }
        }
    }

    /// Merge a sibling instance's event into the local state machine.
    ///
    /// Each variant maps onto the reducer path the local flow uses for the
    /// same change, so both sides converge on identical merge behavior.
    pub fn apply(&self, state: &SharedState, event: CrossTabEvent) {
        match event {
            CrossTabEvent::OptimisticMessage { message } => {
                state.dispatch(SyncEvent::OptimisticMessageAdded(message));
            }
            CrossTabEvent::MessageConfirmed {
                provisional_id,
                message,
            } => {
                state.dispatch(SyncEvent::MessageConfirmed {
                    provisional_id,
                    message,
                });
            }
            CrossTabEvent::MessageRemoved { message_id } => {
                state.dispatch(SyncEvent::MessageRemoved { message_id });
            }
            CrossTabEvent::ThreadUpserted { thread } => {
                state.dispatch(SyncEvent::ThreadUpserted(thread));
            }
            CrossTabEvent::ThreadRemoved { thread_id } => {
                state.dispatch(SyncEvent::ThreadRemoved(thread_id));
            }
        }
    }

    /// Write this instance's presence entry.
    ///
    /// Entries are timestamped and actively pruned by their writer once
    /// stale beyond the liveness window; the TTL is only the backstop for
    /// crashed holders.
    pub async fn heartbeat(&self) -> SyncResult<()> {
        let key = presence_key(&self.instance_id);

        if let Some(raw) = self.service.get(&key).await? {
            let stale = serde_json::from_str::<PresenceEntry>(&raw)
                .map(|entry| {
                    Utc::now().timestamp_millis() - entry.timestamp_ms
                        > self.presence_window_ms as i64
                })
                .unwrap_or(true);
            if stale {
                self.service.delete(&key).await?;
            }
        }

        let entry = PresenceEntry {
            instance_id: self.instance_id.clone(),
            timestamp_ms: Utc::now().timestamp_millis(),
        };
        let payload = serde_json::to_string(&entry).map_err(|err| SyncError::Coordination {
            message: format!("failed to encode presence entry: {}", err),
        })?;
        self.service
            .set_with_ttl(&key, &payload, self.presence_window_ms, false)
            .await?;
        Ok(())
    }

    /// Remove this instance's presence entry on shutdown.
    pub async fn clear_presence(&self) -> SyncResult<()> {
        self.service.delete(&presence_key(&self.instance_id)).await
    }
}

/// Channel carrying thread-level events for all threads.
const THREADS_CHANNEL: &str = "threads";

fn thread_channel(thread_id: &str) -> String {
    format!("thread:{}", thread_id)
}

fn lock_key(resource: &str) -> String {
    format!("lock:{}", resource)
}

fn presence_key(instance_id: &str) -> String {
    format!("presence:{}", instance_id)
}
