//! The sync engine: composition root and UI action surface.
//!
//! Wires the state machine, optimistic manager, pending queue, coordinator,
//! and the external collaborators together. Every component is
//! constructor-injected; lifecycle (`open`/`close`) is owned here and
//! nowhere else.
//!
//! Control flow for a mutating action: provisional entity → reducer applies
//! instantly → remote call (or queue when offline/failing) → authoritative
//! result reconciled → cache persisted → siblings notified.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::coordinator::{CrossTabCoordinator, CrossTabEvent};
use crate::error::{NetworkError, StorageError, SyncError, SyncResult};
use crate::models::{
    Message, MessagePatch, MessageRole, OperationPayload, PendingOperation, Thread, ThreadPatch,
    title_from_content,
};
use crate::optimistic::OptimisticManager;
use crate::queue;
use crate::state::{SharedState, StateSnapshot, SyncEvent, SyncState};
use crate::traits::{
    CoordinationService, GenerateRequest, LocalCacheStore, RemoteSyncBridge,
    METADATA_SELECTED_THREAD,
};

/// Degrading wrapper around the local cache store.
///
/// The first failing call disables the cache for the rest of the process
/// lifetime: the engine keeps running memory-only instead of crashing or
/// hammering a broken disk.
pub struct CacheGuard {
    store: Arc<dyn LocalCacheStore>,
    enabled: AtomicBool,
}

impl CacheGuard {
    pub fn new(store: Arc<dyn LocalCacheStore>) -> Self {
        Self {
            store,
            enabled: AtomicBool::new(true),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn disable(&self, err: &StorageError) {
        if self.enabled.swap(false, Ordering::SeqCst) {
            warn!(error = %err, "Local cache failed, continuing memory-only");
        }
    }

    fn note<T>(&self, result: Result<T, StorageError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                self.disable(&err);
                None
            }
        }
    }

    pub async fn get_threads(&self) -> Vec<Thread> {
        if !self.is_enabled() {
            return Vec::new();
        }
        self.note(self.store.get_threads().await).unwrap_or_default()
    }

    pub async fn save_thread(&self, thread: &Thread) {
        if self.is_enabled() {
            self.note(self.store.save_thread(thread).await);
        }
    }

    pub async fn update_thread(&self, thread: &Thread) {
        if self.is_enabled() {
            self.note(self.store.update_thread(thread).await);
        }
    }

    pub async fn delete_thread(&self, id: &str) {
        if self.is_enabled() {
            self.note(self.store.delete_thread(id).await);
        }
    }

    pub async fn get_messages(&self, thread_id: &str) -> Vec<Message> {
        if !self.is_enabled() {
            return Vec::new();
        }
        self.note(self.store.get_messages(thread_id).await)
            .unwrap_or_default()
    }

    pub async fn save_message(&self, message: &Message) {
        if self.is_enabled() {
            self.note(self.store.save_message(message).await);
        }
    }

    pub async fn update_message(&self, message: &Message) {
        if self.is_enabled() {
            self.note(self.store.update_message(message).await);
        }
    }

    pub async fn delete_message(&self, id: &str, thread_id: &str) {
        if self.is_enabled() {
            self.note(self.store.delete_message(id, thread_id).await);
        }
    }

    pub async fn get_metadata(&self, key: &str) -> Option<String> {
        if !self.is_enabled() {
            return None;
        }
        self.note(self.store.get_metadata(key).await).flatten()
    }

    pub async fn set_metadata(&self, key: &str, value: &str) {
        if self.is_enabled() {
            self.note(self.store.set_metadata(key, value).await);
        }
    }
}

/// The synchronization engine.
///
/// One instance per tab/process. Construct with [`SyncEngine::new`], start
/// background work with [`open`](SyncEngine::open), and always call
/// [`close`](SyncEngine::close) on teardown so timers cancel deterministically
/// and queued intent is persisted.
pub struct SyncEngine {
    config: SyncConfig,
    state: SharedState,
    optimistic: Mutex<OptimisticManager>,
    bridge: Arc<dyn RemoteSyncBridge>,
    cache: Arc<CacheGuard>,
    coordinator: Arc<CrossTabCoordinator>,
    drain_flag: AtomicBool,
    drain_notify: Arc<Notify>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    thread_listener: Mutex<Option<JoinHandle<()>>>,
    /// Back-reference handed to spawned workers.
    weak_self: Weak<SyncEngine>,
}

impl SyncEngine {
    /// Assemble an engine from its collaborators.
    pub fn new(
        config: SyncConfig,
        bridge: Arc<dyn RemoteSyncBridge>,
        cache: Arc<dyn LocalCacheStore>,
        coordination: Arc<dyn CoordinationService>,
    ) -> Arc<Self> {
        let state = SharedState::new(SyncState::new(config.grace_window()));
        let instance_id = format!("engine-{}", Uuid::new_v4());
        let coordinator = Arc::new(CrossTabCoordinator::new(
            coordination,
            instance_id,
            config.lock_ttl_ms,
            config.lock_acquire_timeout_ms,
            config.presence_window_ms,
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Arc::new_cyclic(|weak_self| Self {
            optimistic: Mutex::new(OptimisticManager::new(state.clone())),
            state,
            config,
            bridge,
            cache: Arc::new(CacheGuard::new(cache)),
            coordinator,
            drain_flag: AtomicBool::new(false),
            drain_notify: Arc::new(Notify::new()),
            shutdown_tx,
            shutdown_rx,
            tasks: Mutex::new(Vec::new()),
            thread_listener: Mutex::new(None),
            weak_self: weak_self.clone(),
        })
    }

    fn strong_self(&self) -> Arc<SyncEngine> {
        self.weak_self
            .upgrade()
            .expect("engine alive while spawning workers")
    }

    /// This instance's unique id, as used for lock ownership and presence.
    pub fn instance_id(&self) -> &str {
        self.coordinator.instance_id()
    }

    /// UI-facing snapshot of the current state.
    pub fn snapshot(&self) -> StateSnapshot {
        self.state.snapshot()
    }

    /// Start the engine: restore persisted state, spawn background workers,
    /// and pull a fresh authoritative listing.
    pub async fn open(&self) {
        info!(instance_id = self.instance_id(), "Opening sync engine");

        // Restore queued intent from the previous run.
        if let Some(raw) = self.cache.get_metadata(queue::queue_metadata_key()).await {
            let restored = queue::deserialize_queue(&raw);
            if !restored.is_empty() {
                info!(count = restored.len(), "Restoring persisted pending queue");
            }
            for op in restored {
                self.state.dispatch(SyncEvent::OperationEnqueued(op));
            }
        }

        // Cache-first thread listing for instant UI.
        let cached = self.cache.get_threads().await;
        if !cached.is_empty() {
            self.state.dispatch(SyncEvent::ThreadsReceived(cached));
        }

        self.spawn_workers().await;

        // Restore selection; this also subscribes its channel and loads
        // cached messages.
        if let Some(selected) = self.cache.get_metadata(METADATA_SELECTED_THREAD).await {
            if !selected.is_empty() {
                let _ = self.select_thread(Some(selected)).await;
            }
        }

        self.refresh_threads().await;
        self.drain_notify.notify_one();
    }

    /// Stop background work, persist the queue, and release coordination
    /// state. Queued operations are intentionally left in the cache so the
    /// next start resumes draining them.
    pub async fn close(&self) {
        info!(instance_id = self.instance_id(), "Closing sync engine");
        let _ = self.shutdown_tx.send(true);

        if let Some(handle) = self.thread_listener.lock().unwrap().take() {
            handle.abort();
        }
        let handles: Vec<JoinHandle<()>> = self.tasks.lock().unwrap().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }

        self.persist_queue().await;
        if let Err(err) = self.coordinator.clear_presence().await {
            debug!(error = %err, "Failed to clear presence on shutdown");
        }
    }

    // ===== UI action surface =====

    /// Switch the selected thread.
    ///
    /// Message caches for both the previous and new selection are dropped
    /// before anything loads; a late response for the old thread is rejected
    /// by the reducer's selection guard.
    pub async fn select_thread(&self, thread_id: Option<String>) -> SyncResult<()> {
        let resolved = thread_id.map(|id| {
            let optimistic = self.optimistic.lock().unwrap();
            optimistic.resolve(&id).to_string()
        });

        self.state
            .dispatch(SyncEvent::ThreadSelected(resolved.clone()));
        self.swap_thread_listener(resolved.clone()).await;

        match &resolved {
            Some(id) => {
                self.cache.set_metadata(METADATA_SELECTED_THREAD, id).await;
                self.refresh_messages(id).await;
            }
            None => {
                self.cache.set_metadata(METADATA_SELECTED_THREAD, "").await;
            }
        }
        Ok(())
    }

    /// Start a conversation: create a thread titled after the first message
    /// and send that message into it, both optimistically.
    pub async fn start_thread(
        &self,
        first_message: &str,
        provider: &str,
        model: &str,
    ) -> SyncResult<Thread> {
        let thread = self
            .create_thread(&title_from_content(first_message), provider, model)
            .await?;
        self.send_message(&thread.id, first_message).await?;
        Ok(thread)
    }

    /// Create a thread. Resolves with the authoritative entity when online,
    /// or with the provisional entity once the operation is durably queued.
    pub async fn create_thread(
        &self,
        title: &str,
        provider: &str,
        model: &str,
    ) -> SyncResult<Thread> {
        let title = title.to_string();
        let provisional = {
            let mut optimistic = self.optimistic.lock().unwrap();
            optimistic.begin_thread(
                title.clone(),
                self.config.owner_id.clone(),
                provider.to_string(),
                model.to_string(),
            )
        };

        let payload = OperationPayload::CreateThread {
            title,
            provider: provider.to_string(),
            model: model.to_string(),
        };

        if !self.is_online() {
            self.enqueue(payload, Some(provisional.id.clone())).await;
            return Ok(provisional);
        }

        match self
            .bridge
            .create_thread(&provisional.title, provider, model)
            .await
        {
            Ok(thread) => {
                {
                    let mut optimistic = self.optimistic.lock().unwrap();
                    optimistic.confirm_thread(&provisional.id, thread.clone());
                }
                self.cache.save_thread(&thread).await;
                self.broadcast_thread(CrossTabEvent::ThreadUpserted {
                    thread: thread.clone(),
                })
                .await;
                Ok(thread)
            }
            Err(err) if err.is_retryable() => {
                self.note_connectivity(&err);
                self.enqueue(payload, Some(provisional.id.clone())).await;
                Ok(provisional)
            }
            Err(err) => {
                let mut optimistic = self.optimistic.lock().unwrap();
                optimistic.rollback(&provisional.id);
                Err(err)
            }
        }
    }

    /// Send a user message into a thread. Resolves with the authoritative
    /// message when online, or with the provisional one once queued.
    pub async fn send_message(
        &self,
        thread_id: &str,
        content: &str,
    ) -> SyncResult<Message> {
        self.create_message_internal(thread_id, MessageRole::User, content, &[])
            .await
    }

    /// Create a message with an explicit role and attachments.
    pub async fn create_message(
        &self,
        thread_id: &str,
        role: MessageRole,
        content: &str,
        attachment_ids: &[String],
    ) -> SyncResult<Message> {
        self.create_message_internal(thread_id, role, content, attachment_ids)
            .await
    }

    async fn create_message_internal(
        &self,
        thread_id: &str,
        role: MessageRole,
        content: &str,
        attachment_ids: &[String],
    ) -> SyncResult<Message> {
        let (resolved, thread_unconfirmed) = {
            let optimistic = self.optimistic.lock().unwrap();
            let resolved = optimistic.resolve(thread_id).to_string();
            let unconfirmed = optimistic.is_unconfirmed(&resolved);
            (resolved, unconfirmed)
        };

        let provisional = {
            let mut optimistic = self.optimistic.lock().unwrap();
            optimistic.begin_message(resolved.clone(), role, content.to_string())
        };
        self.broadcast_message(
            &resolved,
            CrossTabEvent::OptimisticMessage {
                message: provisional.clone(),
            },
        )
        .await;

        let payload = OperationPayload::CreateMessage {
            thread_id: resolved.clone(),
            role,
            content: content.to_string(),
            attachment_ids: attachment_ids.to_vec(),
        };

        // A message for a thread the server does not know yet can only be
        // delivered after that thread's create operation confirms.
        if thread_unconfirmed || !self.is_online() {
            self.enqueue(payload, Some(provisional.id.clone())).await;
            return Ok(provisional);
        }

        match self
            .bridge
            .create_message(&resolved, role, content, attachment_ids)
            .await
        {
            Ok(message) => {
                self.finish_message_confirmation(&provisional.id, &message).await;
                Ok(message)
            }
            Err(err) if err.is_retryable() => {
                self.note_connectivity(&err);
                self.enqueue(payload, Some(provisional.id.clone())).await;
                Ok(provisional)
            }
            Err(err) => {
                let mut optimistic = self.optimistic.lock().unwrap();
                optimistic.rollback(&provisional.id);
                Err(err)
            }
        }
    }

    /// Apply a partial update to a thread.
    pub async fn update_thread(
        &self,
        thread_id: &str,
        patch: ThreadPatch,
    ) -> SyncResult<()> {
        let resolved = {
            let optimistic = self.optimistic.lock().unwrap();
            optimistic.resolve(thread_id).to_string()
        };

        let updated = self.state.with(|s| {
            s.thread(&resolved).map(|thread| {
                let mut updated = thread.clone();
                patch.apply_to(&mut updated);
                updated
            })
        });
        let Some(updated) = updated else {
            return Err(SyncError::Rejected {
                status: 404,
                message: format!("unknown thread '{}'", thread_id),
            });
        };

        self.state.dispatch(SyncEvent::ThreadUpserted(updated.clone()));
        if !updated.is_optimistic {
            self.cache.update_thread(&updated).await;
        }
        self.broadcast_thread(CrossTabEvent::ThreadUpserted {
            thread: updated.clone(),
        })
        .await;

        let payload = OperationPayload::UpdateThread {
            thread_id: resolved.clone(),
            patch: patch.clone(),
        };

        let unconfirmed = {
            let optimistic = self.optimistic.lock().unwrap();
            optimistic.is_unconfirmed(&resolved)
        };
        if unconfirmed || !self.is_online() {
            self.enqueue(payload, None).await;
            return Ok(());
        }

        match self.bridge.update_thread(&resolved, &patch).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_retryable() => {
                self.note_connectivity(&err);
                self.enqueue(payload, None).await;
                Ok(())
            }
            Err(err) => {
                // The local LWW copy is now ahead of the server; pull the
                // authoritative listing back in.
                self.refresh_threads().await;
                Err(err)
            }
        }
    }

    /// Delete a thread. Guarded by a cross-tab lock so two tabs cannot race
    /// conflicting actions on the same thread.
    pub async fn delete_thread(&self, thread_id: &str) -> SyncResult<()> {
        let resolved = {
            let optimistic = self.optimistic.lock().unwrap();
            optimistic.resolve(thread_id).to_string()
        };
        let resource = format!("thread:{}", resolved);

        if !self.coordinator.acquire_lock(&resource).await? {
            return Err(SyncError::LockContention { resource });
        }

        let result = self.delete_thread_locked(&resolved).await;
        if let Err(err) = self.coordinator.release_lock(&resource).await {
            debug!(error = %err, "Failed to release thread lock");
        }
        result
    }

    async fn delete_thread_locked(&self, resolved: &str) -> SyncResult<()> {
        let unconfirmed = {
            let optimistic = self.optimistic.lock().unwrap();
            optimistic.is_unconfirmed(resolved)
        };

        self.state
            .dispatch(SyncEvent::ThreadRemoved(resolved.to_string()));
        self.cache.delete_thread(resolved).await;
        self.broadcast_thread(CrossTabEvent::ThreadRemoved {
            thread_id: resolved.to_string(),
        })
        .await;

        if unconfirmed {
            // The server never learned about this thread: cancel its queued
            // create (and dependent message creates) instead of calling out.
            self.cancel_operations_for(resolved).await;
            let mut optimistic = self.optimistic.lock().unwrap();
            optimistic.forget(resolved);
            return Ok(());
        }

        let payload = OperationPayload::DeleteThread {
            thread_id: resolved.to_string(),
        };
        if !self.is_online() {
            self.enqueue(payload, None).await;
            return Ok(());
        }

        match self.bridge.delete_thread(resolved).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_retryable() => {
                self.note_connectivity(&err);
                self.enqueue(payload, None).await;
                Ok(())
            }
            Err(err) => {
                self.refresh_threads().await;
                Err(err)
            }
        }
    }

    /// Apply a partial update to a message.
    pub async fn update_message(
        &self,
        message_id: &str,
        patch: MessagePatch,
    ) -> SyncResult<()> {
        let resolved = {
            let optimistic = self.optimistic.lock().unwrap();
            optimistic.resolve(message_id).to_string()
        };

        let updated = self.state.with(|s| {
            s.message(&resolved).map(|message| {
                let mut updated = message.clone();
                patch.apply_to(&mut updated);
                updated
            })
        });
        let Some(updated) = updated else {
            return Err(SyncError::Rejected {
                status: 404,
                message: format!("unknown message '{}'", message_id),
            });
        };

        self.state
            .dispatch(SyncEvent::MessageUpserted(updated.clone()));
        if !updated.is_optimistic {
            self.cache.update_message(&updated).await;
        }
        self.broadcast_message(
            &updated.thread_id.clone(),
            CrossTabEvent::MessageConfirmed {
                provisional_id: resolved.clone(),
                message: updated.clone(),
            },
        )
        .await;

        let payload = OperationPayload::UpdateMessage {
            message_id: resolved.clone(),
            patch: patch.clone(),
        };

        let unconfirmed = {
            let optimistic = self.optimistic.lock().unwrap();
            optimistic.is_unconfirmed(&resolved)
        };
        if unconfirmed || !self.is_online() {
            self.enqueue(payload, None).await;
            return Ok(());
        }

        match self.bridge.update_message(&resolved, &patch).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_retryable() => {
                self.note_connectivity(&err);
                self.enqueue(payload, None).await;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Delete a message.
    pub async fn delete_message(&self, message_id: &str) -> SyncResult<()> {
        let resolved = {
            let optimistic = self.optimistic.lock().unwrap();
            optimistic.resolve(message_id).to_string()
        };

        let Some(message) = self.state.with(|s| s.message(&resolved).cloned()) else {
            return Err(SyncError::Rejected {
                status: 404,
                message: format!("unknown message '{}'", message_id),
            });
        };

        self.state.dispatch(SyncEvent::MessageRemoved {
            message_id: resolved.clone(),
        });
        self.cache.delete_message(&resolved, &message.thread_id).await;
        self.broadcast_message(
            &message.thread_id,
            CrossTabEvent::MessageRemoved {
                message_id: resolved.clone(),
            },
        )
        .await;

        let unconfirmed = {
            let optimistic = self.optimistic.lock().unwrap();
            optimistic.is_unconfirmed(&resolved)
        };
        if unconfirmed {
            self.cancel_operations_for(&resolved).await;
            let mut optimistic = self.optimistic.lock().unwrap();
            optimistic.forget(&resolved);
            return Ok(());
        }

        let payload = OperationPayload::DeleteMessage {
            message_id: resolved.clone(),
            thread_id: message.thread_id.clone(),
        };
        if !self.is_online() {
            self.enqueue(payload, None).await;
            return Ok(());
        }

        match self.bridge.delete_message(&resolved).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_retryable() => {
                self.note_connectivity(&err);
                self.enqueue(payload, None).await;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Ask the backend to generate an assistant response. Opaque to the
    /// sync core; the generated message arrives through the normal
    /// data-received path.
    pub async fn generate_response(
        &self,
        thread_id: &str,
        user_message_id: &str,
        api_key: Option<String>,
        system_prompt: Option<String>,
    ) -> SyncResult<()> {
        let (thread_id, user_message_id) = {
            let optimistic = self.optimistic.lock().unwrap();
            (
                optimistic.resolve(thread_id).to_string(),
                optimistic.resolve(user_message_id).to_string(),
            )
        };
        let Some(thread) = self.state.with(|s| s.thread(&thread_id).cloned()) else {
            return Err(SyncError::Rejected {
                status: 404,
                message: format!("unknown thread '{}'", thread_id),
            });
        };

        self.bridge
            .generate_response(&GenerateRequest {
                thread_id,
                user_message_id,
                provider: thread.provider,
                model: thread.model,
                api_key,
                system_prompt,
            })
            .await
    }

    /// Reset a queued operation's retry budget and kick a drain pass.
    pub async fn retry_operation(&self, operation_id: &str) -> SyncResult<()> {
        let op = self.state.with(|s| {
            s.pending_operations()
                .iter()
                .find(|op| op.id == operation_id)
                .cloned()
        });
        let Some(mut op) = op else {
            return Err(SyncError::Rejected {
                status: 404,
                message: format!("unknown operation '{}'", operation_id),
            });
        };

        op.retry_count = 0;
        self.state.dispatch(SyncEvent::OperationUpdated(op));
        self.persist_queue().await;
        self.drain_notify.notify_one();
        Ok(())
    }

    /// Dismiss the visible error.
    pub fn clear_error(&self) {
        self.state.dispatch(SyncEvent::ErrorCleared);
    }

    /// Report a connectivity change (e.g. from the host's online/offline
    /// events). Going online kicks the queue drain.
    pub fn set_online(&self, online: bool) {
        let was_online = self.is_online();
        self.state.dispatch(SyncEvent::OnlineChanged(online));
        if online && !was_online {
            self.drain_notify.notify_one();
        }
    }

    /// Pull the authoritative thread listing and reconcile it.
    pub async fn refresh_threads(&self) {
        self.state.dispatch(SyncEvent::SyncingChanged(true));
        match self.bridge.list_threads().await {
            Ok(threads) => {
                for thread in &threads {
                    self.cache.save_thread(thread).await;
                }
                self.state.dispatch(SyncEvent::ThreadsReceived(threads));
                self.set_online(true);
            }
            Err(err) => {
                debug!(error = %err, "Thread refresh failed");
                self.note_connectivity(&err);
            }
        }
        self.state.dispatch(SyncEvent::SyncingChanged(false));
    }

    /// Load one thread's messages: cache first for instant display, then
    /// the authoritative listing. Both go through the reducer's selection
    /// guard, so responses for an unselected thread are dropped.
    pub async fn refresh_messages(&self, thread_id: &str) {
        let cached = self.cache.get_messages(thread_id).await;
        if !cached.is_empty() {
            self.state.dispatch(SyncEvent::MessagesReceived {
                thread_id: thread_id.to_string(),
                messages: cached,
            });
        }

        match self.bridge.list_messages(thread_id).await {
            Ok(messages) => {
                for message in &messages {
                    self.cache.save_message(message).await;
                }
                self.state.dispatch(SyncEvent::MessagesReceived {
                    thread_id: thread_id.to_string(),
                    messages,
                });
            }
            Err(err) => {
                debug!(error = %err, thread_id, "Message refresh failed");
                self.note_connectivity(&err);
            }
        }
    }

    // ===== Internals =====

    fn is_online(&self) -> bool {
        self.state.with(|s| s.is_online())
    }

    /// Flip the online flag off for connection-level failures. Server-side
    /// errors (5xx, 429) leave it on — the network is fine, the backend is
    /// not.
    fn note_connectivity(&self, err: &SyncError) {
        if matches!(
            err,
            SyncError::Network(
                NetworkError::ConnectionFailed { .. }
                    | NetworkError::DnsResolutionFailed { .. }
                    | NetworkError::Timeout { .. }
            )
        ) {
            self.state.dispatch(SyncEvent::OnlineChanged(false));
        }
    }

    async fn enqueue(&self, payload: OperationPayload, optimistic_id: Option<String>) {
        let op = PendingOperation::new(payload, optimistic_id);
        debug!(kind = op.kind().as_str(), "Queueing operation");
        self.state.dispatch(SyncEvent::OperationEnqueued(op));
        self.persist_queue().await;
        if self.is_online() {
            self.drain_notify.notify_one();
        }
    }

    async fn persist_queue(&self) {
        let ops = self
            .state
            .with(|s| s.pending_operations().to_vec());
        self.cache
            .set_metadata(queue::queue_metadata_key(), &queue::serialize_queue(&ops))
            .await;
    }

    /// Drop queued operations that target a never-confirmed provisional id.
    async fn cancel_operations_for(&self, provisional_id: &str) {
        let doomed: Vec<String> = self.state.with(|s| {
            s.pending_operations()
                .iter()
                .filter(|op| {
                    op.optimistic_id.as_deref() == Some(provisional_id)
                        || operation_target(&op.payload) == provisional_id
                })
                .map(|op| op.id.clone())
                .collect()
        });
        for id in doomed {
            self.state.dispatch(SyncEvent::OperationRemoved(id));
        }
        self.persist_queue().await;
    }

    async fn finish_message_confirmation(&self, provisional_id: &str, message: &Message) {
        {
            let mut optimistic = self.optimistic.lock().unwrap();
            optimistic.confirm_message(provisional_id, message.clone());
        }
        self.cache.save_message(message).await;
        self.broadcast_message(
            &message.thread_id,
            CrossTabEvent::MessageConfirmed {
                provisional_id: provisional_id.to_string(),
                message: message.clone(),
            },
        )
        .await;
    }

    async fn broadcast_message(&self, thread_id: &str, event: CrossTabEvent) {
        if let Err(err) = self.coordinator.publish(thread_id, event).await {
            debug!(error = %err, "Cross-tab publish failed");
        }
    }

    async fn broadcast_thread(&self, event: CrossTabEvent) {
        if let Err(err) = self.coordinator.publish_thread_event(event).await {
            debug!(error = %err, "Cross-tab publish failed");
        }
    }

    // ===== Background workers =====

    async fn spawn_workers(&self) {
        let drain = self.spawn_drain_worker();
        let sweeper = self.spawn_sweeper();
        let listener = self.spawn_threads_listener().await;
        let mut tasks = self.tasks.lock().unwrap();
        tasks.push(drain);
        tasks.push(sweeper);
        if let Some(listener) = listener {
            tasks.push(listener);
        }
    }

    fn spawn_drain_worker(&self) -> JoinHandle<()> {
        let engine = self.strong_self();
        let notify = Arc::clone(&self.drain_notify);
        let mut shutdown = self.shutdown_rx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = notify.notified() => engine.drain_queue().await,
                    _ = shutdown.changed() => break,
                }
            }
        })
    }

    /// The explicit scheduled task replacing a free-floating cleanup
    /// interval: purges expired optimistic entities and writes the presence
    /// heartbeat, until shutdown cancels it deterministically.
    fn spawn_sweeper(&self) -> JoinHandle<()> {
        let engine = self.strong_self();
        let mut shutdown = self.shutdown_rx.clone();
        let interval = Duration::from_millis(engine.config.sweep_interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        {
                            let mut optimistic = engine.optimistic.lock().unwrap();
                            optimistic.purge_expired(engine.config.grace_window());
                        }
                        if let Err(err) = engine.coordinator.heartbeat().await {
                            debug!(error = %err, "Presence heartbeat failed");
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        })
    }

    /// Subscribe to the shared threads channel, then hand the live stream to
    /// a worker. Subscribing before the spawn guarantees no broadcast is
    /// missed between `open` returning and the worker starting.
    async fn spawn_threads_listener(&self) -> Option<JoinHandle<()>> {
        let stream = match self.coordinator.subscribe_threads().await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(error = %err, "Failed to subscribe to threads channel");
                return None;
            }
        };
        let engine = self.strong_self();
        let mut shutdown = self.shutdown_rx.clone();
        Some(tokio::spawn(async move {
            let mut stream = stream;
            loop {
                tokio::select! {
                    message = stream.next() => {
                        let Some(message) = message else { break };
                        if let Some(event) = engine.coordinator.decode(&message.payload) {
                            engine.coordinator.apply(&engine.state, event);
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        }))
    }

    /// Replace the per-thread channel subscription when the selection
    /// changes. The subscription is live before this returns.
    async fn swap_thread_listener(&self, thread_id: Option<String>) {
        if let Some(previous) = self.thread_listener.lock().unwrap().take() {
            previous.abort();
        }
        let Some(thread_id) = thread_id else { return };

        let stream = match self.coordinator.subscribe_thread(&thread_id).await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(error = %err, thread_id, "Failed to subscribe to thread channel");
                return;
            }
        };
        let engine = self.strong_self();
        let mut shutdown = self.shutdown_rx.clone();
        let handle = tokio::spawn(async move {
            let mut stream = stream;
            loop {
                tokio::select! {
                    message = stream.next() => {
                        let Some(message) = message else { break };
                        if let Some(event) = engine.coordinator.decode(&message.payload) {
                            engine.coordinator.apply(&engine.state, event);
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });
        *self.thread_listener.lock().unwrap() = Some(handle);
    }

    // ===== Queue drain =====

    /// One mutually-exclusive drain pass. Processes queued operations in
    /// order; operations whose prerequisites are missing (a message for a
    /// thread that has not confirmed yet) are skipped and picked up by the
    /// next pass.
    async fn drain_queue(&self) {
        if self.drain_flag.swap(true, Ordering::SeqCst) {
            return;
        }
        self.state.dispatch(SyncEvent::SyncingChanged(true));

        let mut skipped: Vec<String> = Vec::new();
        loop {
            if !self.is_online() || *self.shutdown_rx.borrow() {
                break;
            }

            let next = self.state.with(|s| {
                s.pending_operations()
                    .iter()
                    .find(|op| {
                        !skipped.contains(&op.id)
                            && !s.is_locked(&operation_lock_key(op))
                    })
                    .cloned()
            });
            let Some(op) = next else { break };

            let lock_key = operation_lock_key(&op);
            self.state.dispatch(SyncEvent::LockAcquired(lock_key.clone()));
            let outcome = self.run_operation(op.clone()).await;
            self.state.dispatch(SyncEvent::LockReleased(lock_key));

            match outcome {
                OperationOutcome::Succeeded => {
                    self.state.dispatch(SyncEvent::OperationRemoved(op.id));
                    self.persist_queue().await;
                }
                OperationOutcome::Deferred => {
                    skipped.push(op.id);
                }
                OperationOutcome::PermanentlyFailed(err) => {
                    info!(
                        kind = op.kind().as_str(),
                        code = err.error_code(),
                        "Operation failed permanently"
                    );
                    self.state.dispatch(SyncEvent::OperationRemoved(op.id));
                    self.persist_queue().await;
                    self.state
                        .dispatch(SyncEvent::ErrorSet(err.user_message()));
                    // The optimistic entity stays visible: the user can see
                    // what they tried to send.
                    if let Some(provisional_id) = &op.optimistic_id {
                        let mut optimistic = self.optimistic.lock().unwrap();
                        optimistic.preserve(provisional_id);
                    }
                }
                OperationOutcome::Interrupted => break,
            }
        }

        self.state.dispatch(SyncEvent::SyncingChanged(false));
        self.drain_flag.store(false, Ordering::SeqCst);
    }

    /// Run one operation through its retry budget.
    async fn run_operation(&self, mut op: PendingOperation) -> OperationOutcome {
        loop {
            match self.execute_payload(&op).await {
                Ok(()) => return OperationOutcome::Succeeded,
                Err(SyncError::LockContention { .. }) => return OperationOutcome::Deferred,
                Err(err) if err.is_retryable() => {
                    if !self.config.retry.can_retry(op.retry_count) {
                        return OperationOutcome::PermanentlyFailed(err);
                    }
                    let delay = self.config.retry.delay_for(&op.id, op.retry_count);
                    op.retry_count += 1;
                    debug!(
                        kind = op.kind().as_str(),
                        retry = op.retry_count,
                        delay_ms = delay.as_millis() as u64,
                        "Retry scheduled"
                    );
                    self.state
                        .dispatch(SyncEvent::OperationUpdated(op.clone()));
                    self.persist_queue().await;

                    let mut shutdown = self.shutdown_rx.clone();
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => return OperationOutcome::Interrupted,
                    }
                }
                Err(err) => return OperationOutcome::PermanentlyFailed(err),
            }
        }
    }

    /// Translate one queued payload into a bridge call, resolving any
    /// provisional ids recorded before their entities confirmed.
    async fn execute_payload(&self, op: &PendingOperation) -> SyncResult<()> {
        match &op.payload {
            OperationPayload::CreateThread {
                title,
                provider,
                model,
            } => {
                let thread = self.bridge.create_thread(title, provider, model).await?;
                if let Some(provisional_id) = &op.optimistic_id {
                    let mut optimistic = self.optimistic.lock().unwrap();
                    optimistic.confirm_thread(provisional_id, thread.clone());
                }
                self.cache.save_thread(&thread).await;
                self.broadcast_thread(CrossTabEvent::ThreadUpserted { thread }).await;
                Ok(())
            }
            OperationPayload::CreateMessage {
                thread_id,
                role,
                content,
                attachment_ids,
            } => {
                let resolved = self.resolve_confirmed(thread_id)?;
                let message = self
                    .bridge
                    .create_message(&resolved, *role, content, attachment_ids)
                    .await?;
                if let Some(provisional_id) = &op.optimistic_id {
                    self.finish_message_confirmation(provisional_id, &message).await;
                } else {
                    self.cache.save_message(&message).await;
                }
                Ok(())
            }
            OperationPayload::UpdateThread { thread_id, patch } => {
                let resolved = self.resolve_confirmed(thread_id)?;
                self.bridge.update_thread(&resolved, patch).await
            }
            OperationPayload::DeleteThread { thread_id } => {
                let resolved = self.resolve_confirmed(thread_id)?;
                self.bridge.delete_thread(&resolved).await
            }
            OperationPayload::UpdateMessage { message_id, patch } => {
                let resolved = self.resolve_confirmed(message_id)?;
                self.bridge.update_message(&resolved, patch).await
            }
            OperationPayload::DeleteMessage { message_id, .. } => {
                let resolved = self.resolve_confirmed(message_id)?;
                self.bridge.delete_message(&resolved).await
            }
        }
    }

    /// Resolve an id that must be confirmed before the remote call can go
    /// out. Still-provisional targets defer the operation to a later pass
    /// (their own create is ahead of them in the queue).
    fn resolve_confirmed(&self, id: &str) -> SyncResult<String> {
        let optimistic = self.optimistic.lock().unwrap();
        let resolved = optimistic.resolve(id).to_string();
        if optimistic.is_unconfirmed(&resolved) {
            Err(SyncError::LockContention { resource: resolved })
        } else {
            Ok(resolved)
        }
    }
}

/// Outcome of running one queued operation through its retry budget.
enum OperationOutcome {
    Succeeded,
    /// Prerequisites missing; stay queued without burning retries.
    Deferred,
    PermanentlyFailed(SyncError),
    /// Shutdown arrived mid-wait; the queue stays persisted for next start.
    Interrupted,
}

fn operation_lock_key(op: &PendingOperation) -> String {
    format!("op:{}", op.dedup_key())
}

fn operation_target(payload: &OperationPayload) -> &str {
    match payload {
        OperationPayload::CreateThread { .. } => "",
        OperationPayload::UpdateThread { thread_id, .. } => thread_id,
        OperationPayload::DeleteThread { thread_id } => thread_id,
        OperationPayload::CreateMessage { thread_id, .. } => thread_id,
        OperationPayload::UpdateMessage { message_id, .. } => message_id,
        OperationPayload::DeleteMessage { message_id, .. } => message_id,
    }
}
