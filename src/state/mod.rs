//! Sync state machine: the single in-memory state tree and its reducer.
//!
//! The tree uses an arena/index layout — `ThreadId → Thread`,
//! `ThreadId → Vec<MessageId>`, `MessageId → Message` — so lookups and
//! updates are O(1) and there is no ownership cycle between threads and
//! messages.

pub mod event;
pub mod reducer;

pub use event::SyncEvent;
pub use reducer::reduce;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::Duration;

use crate::models::{Message, PendingOperation, Thread};

/// The aggregate state tree.
///
/// Owned exclusively by the dispatch path; all other components read it
/// through accessors and mutate it only by dispatching [`SyncEvent`]s.
#[derive(Debug)]
pub struct SyncState {
    pub(crate) threads: HashMap<String, Thread>,
    pub(crate) messages: HashMap<String, Message>,
    pub(crate) thread_messages: HashMap<String, Vec<String>>,
    pub(crate) selected_thread_id: Option<String>,
    pub(crate) online: bool,
    pub(crate) syncing: bool,
    pub(crate) pending_operations: Vec<PendingOperation>,
    pub(crate) operation_locks: HashSet<String>,
    pub(crate) error: Option<String>,
    /// How long an unconfirmed optimistic message stays trusted during merge.
    pub(crate) grace_window: Duration,
}

impl SyncState {
    /// Create an empty state tree. Starts online; connectivity flips on the
    /// first failed remote call or an explicit `OnlineChanged`.
    pub fn new(grace_window: Duration) -> Self {
        Self {
            threads: HashMap::new(),
            messages: HashMap::new(),
            thread_messages: HashMap::new(),
            selected_thread_id: None,
            online: true,
            syncing: false,
            pending_operations: Vec::new(),
            operation_locks: HashSet::new(),
            error: None,
            grace_window,
        }
    }

    /// All threads, most recent activity first.
    pub fn threads(&self) -> Vec<&Thread> {
        let mut threads: Vec<&Thread> = self.threads.values().collect();
        threads.sort_by(|a, b| {
            b.last_message_at
                .cmp(&a.last_message_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        threads
    }

    /// Look up one thread.
    pub fn thread(&self, id: &str) -> Option<&Thread> {
        self.threads.get(id)
    }

    /// Messages of one thread in display order (ascending by timestamp).
    pub fn messages_for(&self, thread_id: &str) -> Vec<&Message> {
        self.thread_messages
            .get(thread_id)
            .map(|ids| ids.iter().filter_map(|id| self.messages.get(id)).collect())
            .unwrap_or_default()
    }

    /// Look up one message.
    pub fn message(&self, id: &str) -> Option<&Message> {
        self.messages.get(id)
    }

    pub fn selected_thread_id(&self) -> Option<&str> {
        self.selected_thread_id.as_deref()
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing
    }

    pub fn pending_operations(&self) -> &[PendingOperation] {
        &self.pending_operations
    }

    /// Whether an in-process operation lock is held.
    pub fn is_locked(&self, key: &str) -> bool {
        self.operation_locks.contains(key)
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn grace_window(&self) -> Duration {
        self.grace_window
    }
}

/// Immutable view of the state handed to the UI layer.
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    /// Threads, most recent activity first.
    pub threads: Vec<Thread>,
    /// Cached message lists per thread, ascending by timestamp.
    pub messages_by_thread: HashMap<String, Vec<Message>>,
    pub selected_thread_id: Option<String>,
    pub online: bool,
    pub syncing: bool,
    pub pending_operations: Vec<PendingOperation>,
    pub error: Option<String>,
}

/// Shared handle to the state tree.
///
/// Dispatch applies the reducer synchronously under the lock: each event is
/// atomic, and events from one instance apply strictly in arrival order.
#[derive(Clone)]
pub struct SharedState {
    inner: Arc<Mutex<SyncState>>,
}

impl SharedState {
    pub fn new(state: SyncState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    /// Apply one event to the tree.
    pub fn dispatch(&self, event: SyncEvent) {
        let mut state = self.inner.lock().expect("sync state lock poisoned");
        reduce(&mut state, event);
    }

    /// Read from the tree under the lock.
    pub fn with<R>(&self, f: impl FnOnce(&SyncState) -> R) -> R {
        let state = self.inner.lock().expect("sync state lock poisoned");
        f(&state)
    }

    /// Clone out a UI-facing snapshot.
    pub fn snapshot(&self) -> StateSnapshot {
        self.with(|state| StateSnapshot {
            threads: state.threads().into_iter().cloned().collect(),
            messages_by_thread: state
                .thread_messages
                .keys()
                .map(|thread_id| {
                    (
                        thread_id.clone(),
                        state.messages_for(thread_id).into_iter().cloned().collect(),
                    )
                })
                .collect(),
            selected_thread_id: state.selected_thread_id.clone(),
            online: state.online,
            syncing: state.syncing,
            pending_operations: state.pending_operations.clone(),
            error: state.error.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageRole;
    use chrono::Utc;

    fn thread(id: &str, minutes_ago: i64) -> Thread {
        let ts = Utc::now() - Duration::minutes(minutes_ago);
        Thread {
            id: id.to_string(),
            title: format!("Thread {}", id),
            owner_id: "user-1".to_string(),
            last_message_at: ts,
            provider: "anthropic".to_string(),
            model: "claude-3".to_string(),
            version: 1,
            is_optimistic: false,
            last_modified: ts,
        }
    }

    #[test]
    fn test_threads_sorted_by_recency() {
        let mut state = SyncState::new(Duration::seconds(5));
        reduce(
            &mut state,
            SyncEvent::ThreadsReceived(vec![thread("a", 30), thread("b", 5), thread("c", 60)]),
        );

        let ids: Vec<&str> = state.threads().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_shared_state_snapshot() {
        let shared = SharedState::new(SyncState::new(Duration::seconds(5)));
        shared.dispatch(SyncEvent::ThreadsReceived(vec![thread("a", 1)]));
        shared.dispatch(SyncEvent::ThreadSelected(Some("a".to_string())));
        shared.dispatch(SyncEvent::MessagesReceived {
            thread_id: "a".to_string(),
            messages: vec![Message {
                id: "m1".to_string(),
                thread_id: "a".to_string(),
                role: MessageRole::User,
                content: "hi".to_string(),
                created_at: Utc::now(),
                version: 1,
                is_optimistic: false,
                is_streaming: false,
            }],
        });

        let snapshot = shared.snapshot();
        assert_eq!(snapshot.threads.len(), 1);
        assert_eq!(snapshot.selected_thread_id.as_deref(), Some("a"));
        assert_eq!(snapshot.messages_by_thread["a"].len(), 1);
        assert!(snapshot.online);
        assert!(snapshot.error.is_none());
    }
}
