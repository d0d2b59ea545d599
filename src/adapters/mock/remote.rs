//! Mock Remote Sync Bridge for testing.
//!
//! Records every call for verification and returns configurable results:
//! scripted failures are consumed in order, after which calls succeed with
//! generated authoritative entities.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{SyncError, SyncResult};
use crate::models::{Message, MessagePatch, MessageRole, Thread, ThreadPatch};
use crate::traits::{GenerateRequest, RemoteSyncBridge};

/// A recorded bridge call for verification in tests.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    /// Method name, e.g. `"create_message"`.
    pub method: String,
    /// Primary argument (thread id, message id, or title).
    pub target: String,
}

/// Mock implementation of [`RemoteSyncBridge`].
#[derive(Clone, Default)]
pub struct MockRemoteBridge {
    inner: Arc<MockInner>,
}

#[derive(Default)]
struct MockInner {
    calls: Mutex<Vec<RecordedCall>>,
    scripted_failures: Mutex<Vec<SyncError>>,
    threads: Mutex<Vec<Thread>>,
    messages: Mutex<HashMap<String, Vec<Message>>>,
    next_id: AtomicU64,
}

impl MockRemoteBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a failure; each scripted failure is consumed by exactly one
    /// call, in order, before calls start succeeding again.
    pub fn push_failure(&self, error: SyncError) {
        self.inner.scripted_failures.lock().unwrap().push(error);
    }

    /// Preload the authoritative thread listing.
    pub fn set_threads(&self, threads: Vec<Thread>) {
        *self.inner.threads.lock().unwrap() = threads;
    }

    /// Preload the authoritative messages of one thread.
    pub fn set_messages(&self, thread_id: &str, messages: Vec<Message>) {
        self.inner
            .messages
            .lock()
            .unwrap()
            .insert(thread_id.to_string(), messages);
    }

    /// All recorded calls.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.inner.calls.lock().unwrap().clone()
    }

    /// Number of calls to one method.
    pub fn call_count(&self, method: &str) -> usize {
        self.inner
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.method == method)
            .count()
    }

    fn record(&self, method: &str, target: &str) {
        self.inner.calls.lock().unwrap().push(RecordedCall {
            method: method.to_string(),
            target: target.to_string(),
        });
    }

    fn take_failure(&self) -> Option<SyncError> {
        let mut failures = self.inner.scripted_failures.lock().unwrap();
        if failures.is_empty() {
            None
        } else {
            Some(failures.remove(0))
        }
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait]
impl RemoteSyncBridge for MockRemoteBridge {
    async fn list_threads(&self) -> SyncResult<Vec<Thread>> {
        self.record("list_threads", "");
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        Ok(self.inner.threads.lock().unwrap().clone())
    }

    async fn create_thread(
        &self,
        title: &str,
        provider: &str,
        model: &str,
    ) -> SyncResult<Thread> {
        self.record("create_thread", title);
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        let now = Utc::now();
        let thread = Thread {
            id: self.next_id("t"),
            title: title.to_string(),
            owner_id: "user-1".to_string(),
            last_message_at: now,
            provider: provider.to_string(),
            model: model.to_string(),
            version: 1,
            is_optimistic: false,
            last_modified: now,
        };
        self.inner.threads.lock().unwrap().push(thread.clone());
        Ok(thread)
    }

    async fn update_thread(&self, id: &str, patch: &ThreadPatch) -> SyncResult<()> {
        self.record("update_thread", id);
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        let mut threads = self.inner.threads.lock().unwrap();
        if let Some(thread) = threads.iter_mut().find(|t| t.id == id) {
            patch.apply_to(thread);
        }
        Ok(())
    }

    async fn delete_thread(&self, id: &str) -> SyncResult<()> {
        self.record("delete_thread", id);
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        self.inner.threads.lock().unwrap().retain(|t| t.id != id);
        self.inner.messages.lock().unwrap().remove(id);
        Ok(())
    }

    async fn list_messages(&self, thread_id: &str) -> SyncResult<Vec<Message>> {
        self.record("list_messages", thread_id);
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        Ok(self
            .inner
            .messages
            .lock()
            .unwrap()
            .get(thread_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_message(
        &self,
        thread_id: &str,
        role: MessageRole,
        content: &str,
        _attachment_ids: &[String],
    ) -> SyncResult<Message> {
        self.record("create_message", thread_id);
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        let message = Message {
            id: self.next_id("m"),
            thread_id: thread_id.to_string(),
            role,
            content: content.to_string(),
            created_at: Utc::now(),
            version: 1,
            is_optimistic: false,
            is_streaming: false,
        };
        self.inner
            .messages
            .lock()
            .unwrap()
            .entry(thread_id.to_string())
            .or_default()
            .push(message.clone());
        Ok(message)
    }

    async fn update_message(&self, id: &str, patch: &MessagePatch) -> SyncResult<()> {
        self.record("update_message", id);
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        let mut messages = self.inner.messages.lock().unwrap();
        for list in messages.values_mut() {
            if let Some(message) = list.iter_mut().find(|m| m.id == id) {
                patch.apply_to(message);
            }
        }
        Ok(())
    }

    async fn delete_message(&self, id: &str) -> SyncResult<()> {
        self.record("delete_message", id);
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        let mut messages = self.inner.messages.lock().unwrap();
        for list in messages.values_mut() {
            list.retain(|m| m.id != id);
        }
        Ok(())
    }

    async fn generate_response(&self, request: &GenerateRequest) -> SyncResult<()> {
        self.record("generate_response", &request.thread_id);
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NetworkError;

    #[tokio::test]
    async fn test_create_thread_generates_entity() {
        let bridge = MockRemoteBridge::new();
        let thread = bridge
            .create_thread("Hello", "anthropic", "claude-3")
            .await
            .unwrap();
        assert_eq!(thread.title, "Hello");
        assert!(!thread.is_optimistic);

        let listed = bridge.list_threads().await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn test_scripted_failures_consumed_in_order() {
        let bridge = MockRemoteBridge::new();
        bridge.push_failure(SyncError::Network(NetworkError::Timeout {
            operation: "test".to_string(),
        }));

        assert!(bridge.list_threads().await.is_err());
        assert!(bridge.list_threads().await.is_ok());
    }

    #[tokio::test]
    async fn test_calls_are_recorded() {
        let bridge = MockRemoteBridge::new();
        bridge
            .create_message("t1", MessageRole::User, "hi", &[])
            .await
            .unwrap();
        bridge.list_messages("t1").await.unwrap();

        assert_eq!(bridge.call_count("create_message"), 1);
        assert_eq!(bridge.call_count("list_messages"), 1);
        assert_eq!(bridge.calls()[0].target, "t1");
    }
}
