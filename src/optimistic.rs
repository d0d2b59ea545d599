//! Optimistic update manager.
//!
//! Every mutating user action first produces a provisional entity with a
//! temporary identifier, inserted into the state machine before any network
//! I/O — the UI never waits on latency. The manager owns the life of those
//! entities: confirmation replaces them with their authoritative
//! counterpart, rollback removes them, and a provisional→confirmed id map
//! redirects late references (a retry targeting a thread that has since
//! been confirmed, a cross-tab event addressed to the old id).

use std::collections::{HashMap, HashSet};

use chrono::{Duration, Utc};
use tracing::{debug, warn};

use crate::models::{is_optimistic_id, Message, MessageRole, Thread};
use crate::state::{SharedState, SyncEvent};

/// What kind of entity a provisional id refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntityKind {
    Thread,
    Message,
}

/// Tracks provisional entities and their reconciliation outcome.
pub struct OptimisticManager {
    state: SharedState,
    /// Kind of each live provisional entity.
    live: HashMap<String, EntityKind>,
    /// Provisional id → authoritative id, for redirecting late references.
    confirmed: HashMap<String, String>,
    /// Entities whose backing operation failed permanently. Kept visible
    /// for context, exempt from the grace-window sweep.
    preserved: HashSet<String>,
}

impl OptimisticManager {
    pub fn new(state: SharedState) -> Self {
        Self {
            state,
            live: HashMap::new(),
            confirmed: HashMap::new(),
            preserved: HashSet::new(),
        }
    }

    /// Create a provisional thread and insert it into the state tree.
    pub fn begin_thread(
        &mut self,
        title: String,
        owner_id: String,
        provider: String,
        model: String,
    ) -> Thread {
        let thread = Thread::optimistic(title, owner_id, provider, model);
        self.live.insert(thread.id.clone(), EntityKind::Thread);
        self.state
            .dispatch(SyncEvent::OptimisticThreadAdded(thread.clone()));
        thread
    }

    /// Create a provisional message and insert it into the state tree.
    pub fn begin_message(
        &mut self,
        thread_id: String,
        role: MessageRole,
        content: String,
    ) -> Message {
        let message = Message::optimistic(thread_id, role, content);
        self.live.insert(message.id.clone(), EntityKind::Message);
        self.state
            .dispatch(SyncEvent::OptimisticMessageAdded(message.clone()));
        message
    }

    /// Replace a provisional thread with its authoritative counterpart.
    pub fn confirm_thread(&mut self, provisional_id: &str, thread: Thread) {
        self.live.remove(provisional_id);
        self.confirmed
            .insert(provisional_id.to_string(), thread.id.clone());
        debug!(provisional_id, confirmed_id = %thread.id, "Thread confirmed");
        self.state.dispatch(SyncEvent::ThreadConfirmed {
            provisional_id: provisional_id.to_string(),
            thread,
        });
    }

    /// Replace a provisional message with its authoritative counterpart.
    pub fn confirm_message(&mut self, provisional_id: &str, message: Message) {
        self.live.remove(provisional_id);
        self.confirmed
            .insert(provisional_id.to_string(), message.id.clone());
        debug!(provisional_id, confirmed_id = %message.id, "Message confirmed");
        self.state.dispatch(SyncEvent::MessageConfirmed {
            provisional_id: provisional_id.to_string(),
            message,
        });
    }

    /// Remove a provisional entity after a terminal first-attempt failure,
    /// restoring the prior visible state.
    pub fn rollback(&mut self, provisional_id: &str) {
        match self.live.remove(provisional_id) {
            Some(EntityKind::Thread) => {
                self.state
                    .dispatch(SyncEvent::OptimisticThreadRemoved(provisional_id.to_string()));
            }
            Some(EntityKind::Message) => {
                self.state
                    .dispatch(SyncEvent::OptimisticMessageRemoved(provisional_id.to_string()));
            }
            None => {
                warn!(provisional_id, "Rollback for unknown provisional entity");
            }
        }
        self.preserved.remove(provisional_id);
    }

    /// Keep a provisional entity visible although its operation failed
    /// permanently. The user can still see what they tried to send; the
    /// entity is exempted from the grace-window sweep and never persisted.
    pub fn preserve(&mut self, provisional_id: &str) {
        if self.live.contains_key(provisional_id) {
            self.preserved.insert(provisional_id.to_string());
        }
    }

    /// Resolve an id through the provisional→confirmed mapping.
    /// Non-provisional and still-unconfirmed ids come back unchanged.
    pub fn resolve<'a>(&'a self, id: &'a str) -> &'a str {
        self.confirmed.get(id).map(String::as_str).unwrap_or(id)
    }

    /// Whether this id refers to a provisional entity that has not been
    /// confirmed yet.
    pub fn is_unconfirmed(&self, id: &str) -> bool {
        is_optimistic_id(id) && !self.confirmed.contains_key(id)
    }

    /// Drop a provisional entity from tracking without touching state.
    /// Used when the entity was removed through another path (user deleted
    /// an unsent message).
    pub fn forget(&mut self, provisional_id: &str) {
        self.live.remove(provisional_id);
        self.preserved.remove(provisional_id);
    }

    /// Purge unconfirmed optimistic entities older than the grace window.
    ///
    /// Entities referenced by a still-queued operation are skipped: while
    /// the queue holds the user's intent the entity stays trusted however
    /// long connectivity is gone. Preserved (permanently failed) entities
    /// are skipped too.
    pub fn purge_expired(&mut self, grace_window: Duration) {
        let now = Utc::now();
        let queued_ids: HashSet<String> = self.state.with(|s| {
            s.pending_operations()
                .iter()
                .filter_map(|op| op.optimistic_id.clone())
                .collect()
        });

        let expired: Vec<(String, EntityKind)> = self.state.with(|s| {
            self.live
                .iter()
                .filter(|(id, _)| !queued_ids.contains(*id))
                .filter(|(id, _)| !self.preserved.contains(*id))
                .filter(|(id, kind)| match kind {
                    EntityKind::Thread => s
                        .thread(id)
                        .map(|t| now - t.last_modified > grace_window)
                        .unwrap_or(true),
                    EntityKind::Message => s
                        .message(id)
                        .map(|m| m.age_at(now) > grace_window)
                        .unwrap_or(true),
                })
                .map(|(id, kind)| (id.clone(), *kind))
                .collect()
        });

        for (id, kind) in expired {
            debug!(provisional_id = %id, "Purging expired optimistic entity");
            self.live.remove(&id);
            match kind {
                EntityKind::Thread => self
                    .state
                    .dispatch(SyncEvent::OptimisticThreadRemoved(id)),
                EntityKind::Message => self
                    .state
                    .dispatch(SyncEvent::OptimisticMessageRemoved(id)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OperationPayload, PendingOperation};
    use crate::state::SyncState;
    use chrono::Utc;

    fn setup() -> (SharedState, OptimisticManager) {
        let state = SharedState::new(SyncState::new(Duration::seconds(5)));
        let manager = OptimisticManager::new(state.clone());
        (state, manager)
    }

    fn authoritative_thread(id: &str) -> Thread {
        let now = Utc::now();
        Thread {
            id: id.to_string(),
            title: "Confirmed".to_string(),
            owner_id: "user-1".to_string(),
            last_message_at: now,
            provider: "anthropic".to_string(),
            model: "claude-3".to_string(),
            version: 1,
            is_optimistic: false,
            last_modified: now,
        }
    }

    #[test]
    fn test_begin_thread_inserts_provisional() {
        let (state, mut manager) = setup();
        let thread = manager.begin_thread(
            "Hello".to_string(),
            "user-1".to_string(),
            "anthropic".to_string(),
            "claude-3".to_string(),
        );

        assert!(thread.is_provisional());
        assert!(state.with(|s| s.thread(&thread.id).is_some()));
    }

    #[test]
    fn test_confirm_thread_replaces_and_maps() {
        let (state, mut manager) = setup();
        let provisional = manager.begin_thread(
            "Hello".to_string(),
            "user-1".to_string(),
            "anthropic".to_string(),
            "claude-3".to_string(),
        );

        manager.confirm_thread(&provisional.id, authoritative_thread("t-real"));

        assert!(state.with(|s| s.thread(&provisional.id).is_none()));
        assert!(state.with(|s| s.thread("t-real").is_some()));
        assert_eq!(manager.resolve(&provisional.id), "t-real");
        assert!(!manager.is_unconfirmed(&provisional.id));
    }

    #[test]
    fn test_rollback_removes_message() {
        let (state, mut manager) = setup();
        let message =
            manager.begin_message("t1".to_string(), MessageRole::User, "hi".to_string());
        assert!(state.with(|s| s.message(&message.id).is_some()));

        manager.rollback(&message.id);
        assert!(state.with(|s| s.message(&message.id).is_none()));
    }

    #[test]
    fn test_resolve_passes_through_unknown_ids() {
        let (_, manager) = setup();
        assert_eq!(manager.resolve("t-real"), "t-real");
        assert!(manager.is_unconfirmed("optimistic-abc"));
        assert!(!manager.is_unconfirmed("t-real"));
    }

    #[test]
    fn test_purge_removes_only_expired_unreferenced_entities() {
        let (state, mut manager) = setup();

        // Old message, no queued operation: purged.
        let old = manager.begin_message("t1".to_string(), MessageRole::User, "old".to_string());
        state.dispatch(SyncEvent::OptimisticMessageRemoved(old.id.clone()));
        let mut aged = Message::optimistic("t1".to_string(), MessageRole::User, "old".to_string());
        aged.id = old.id.clone();
        aged.created_at = Utc::now() - Duration::seconds(60);
        state.dispatch(SyncEvent::OptimisticMessageAdded(aged));

        // Fresh message: kept.
        let fresh =
            manager.begin_message("t1".to_string(), MessageRole::User, "fresh".to_string());

        manager.purge_expired(Duration::seconds(5));

        assert!(state.with(|s| s.message(&old.id).is_none()));
        assert!(state.with(|s| s.message(&fresh.id).is_some()));
    }

    #[test]
    fn test_purge_skips_entities_with_queued_operation() {
        let (state, mut manager) = setup();
        let msg = manager.begin_message("t1".to_string(), MessageRole::User, "hi".to_string());

        // Back-date the entity past the grace window.
        state.dispatch(SyncEvent::OptimisticMessageRemoved(msg.id.clone()));
        let mut aged = Message::optimistic("t1".to_string(), MessageRole::User, "hi".to_string());
        aged.id = msg.id.clone();
        aged.created_at = Utc::now() - Duration::seconds(60);
        state.dispatch(SyncEvent::OptimisticMessageAdded(aged));

        state.dispatch(SyncEvent::OperationEnqueued(PendingOperation::new(
            OperationPayload::CreateMessage {
                thread_id: "t1".to_string(),
                role: MessageRole::User,
                content: "hi".to_string(),
                attachment_ids: Vec::new(),
            },
            Some(msg.id.clone()),
        )));

        manager.purge_expired(Duration::seconds(5));
        assert!(
            state.with(|s| s.message(&msg.id).is_some()),
            "queued intent keeps the optimistic entity alive"
        );
    }

    #[test]
    fn test_purge_skips_preserved_entities() {
        let (state, mut manager) = setup();
        let msg = manager.begin_message("t1".to_string(), MessageRole::User, "hi".to_string());
        state.dispatch(SyncEvent::OptimisticMessageRemoved(msg.id.clone()));
        let mut aged = Message::optimistic("t1".to_string(), MessageRole::User, "hi".to_string());
        aged.id = msg.id.clone();
        aged.created_at = Utc::now() - Duration::seconds(60);
        state.dispatch(SyncEvent::OptimisticMessageAdded(aged));

        manager.preserve(&msg.id);
        manager.purge_expired(Duration::seconds(5));

        assert!(state.with(|s| s.message(&msg.id).is_some()));
    }
}
