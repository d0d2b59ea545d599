//! In-process coordination service.
//!
//! Implements the full [`CoordinationService`] contract — atomic
//! conditional set, TTL expiry, publish/subscribe — against shared
//! in-process state. Cloned handles see the same data, which makes this
//! adapter both the production path for same-process tabs and the test
//! double for multi-instance scenarios.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::SyncResult;
use crate::traits::{CoordinationMessage, CoordinationService, SubscriptionStream};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }
}

#[derive(Default)]
struct Inner {
    entries: Mutex<HashMap<String, Entry>>,
    subscribers: Mutex<HashMap<String, Vec<mpsc::Sender<CoordinationMessage>>>>,
}

/// Shared in-process coordination service.
#[derive(Clone, Default)]
pub struct MemoryCoordination {
    inner: Arc<Inner>,
}

impl MemoryCoordination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (non-expired) keys, for tests and debugging.
    pub fn live_key_count(&self) -> usize {
        let entries = self.inner.entries.lock().unwrap();
        entries.values().filter(|e| !e.is_expired()).count()
    }
}

#[async_trait]
impl CoordinationService for MemoryCoordination {
    async fn get(&self, key: &str) -> SyncResult<Option<String>> {
        let mut entries = self.inner.entries.lock().unwrap();
        match entries.get(key) {
            Some(entry) if entry.is_expired() => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> SyncResult<()> {
        let mut entries = self.inner.entries.lock().unwrap();
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl_ms: u64,
        only_if_absent: bool,
    ) -> SyncResult<bool> {
        let mut entries = self.inner.entries.lock().unwrap();

        // Check-and-set happens under one lock acquisition, which is what
        // makes this the mutual-exclusion primitive.
        let live = entries.get(key).map(|e| !e.is_expired()).unwrap_or(false);
        if only_if_absent && live {
            return Ok(false);
        }

        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + Duration::from_millis(ttl_ms)),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> SyncResult<()> {
        let mut entries = self.inner.entries.lock().unwrap();
        entries.remove(key);
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> SyncResult<()> {
        let senders = {
            let subscribers = self.inner.subscribers.lock().unwrap();
            subscribers.get(channel).cloned().unwrap_or_default()
        };

        let message = CoordinationMessage {
            channel: channel.to_string(),
            payload: payload.to_string(),
        };
        let mut closed = false;
        for sender in &senders {
            if sender.try_send(message.clone()).is_err() {
                closed = true;
            }
        }

        if closed {
            let mut subscribers = self.inner.subscribers.lock().unwrap();
            if let Some(list) = subscribers.get_mut(channel) {
                list.retain(|s| !s.is_closed());
            }
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> SyncResult<SubscriptionStream> {
        let (tx, rx) = mpsc::channel(64);
        {
            let mut subscribers = self.inner.subscribers.lock().unwrap();
            subscribers.entry(channel.to_string()).or_default().push(tx);
        }

        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|message| (message, rx))
        });
        Ok(Box::pin(stream))
    }
}
