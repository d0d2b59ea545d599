//! Remote Sync Bridge trait abstraction.
//!
//! The thin interface to the authoritative backend. Implementations
//! translate intents into API calls and classify failures; they never
//! retry — retry is the scheduler's responsibility.

use async_trait::async_trait;

use crate::error::SyncResult;
use crate::models::{Message, MessagePatch, MessageRole, Thread, ThreadPatch};

/// Request for the opaque AI response generation call.
///
/// The engine treats generation as fire-and-forget: the generated message
/// arrives later through the normal data-received path.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateRequest {
    pub thread_id: String,
    pub user_message_id: String,
    pub provider: String,
    pub model: String,
    pub api_key: Option<String>,
    pub system_prompt: Option<String>,
}

/// Trait for authoritative store operations.
///
/// Create calls return the full authoritative entity (server id, timestamps,
/// version) so reconciliation does not require an immediate re-list.
///
/// # Example
///
/// ```ignore
/// use driftsync::traits::RemoteSyncBridge;
///
/// async fn newest_thread<B: RemoteSyncBridge>(bridge: &B) -> Option<String> {
///     let threads = bridge.list_threads().await.ok()?;
///     threads.first().map(|t| t.id.clone())
/// }
/// ```
#[async_trait]
pub trait RemoteSyncBridge: Send + Sync {
    /// List all threads visible to the current user.
    async fn list_threads(&self) -> SyncResult<Vec<Thread>>;

    /// Create a thread and return the authoritative entity.
    async fn create_thread(&self, title: &str, provider: &str, model: &str)
        -> SyncResult<Thread>;

    /// Apply a partial update to a thread.
    async fn update_thread(&self, id: &str, patch: &ThreadPatch) -> SyncResult<()>;

    /// Delete a thread and all its messages.
    async fn delete_thread(&self, id: &str) -> SyncResult<()>;

    /// List the messages of one thread, ordered ascending by timestamp.
    async fn list_messages(&self, thread_id: &str) -> SyncResult<Vec<Message>>;

    /// Create a message and return the authoritative entity.
    async fn create_message(
        &self,
        thread_id: &str,
        role: MessageRole,
        content: &str,
        attachment_ids: &[String],
    ) -> SyncResult<Message>;

    /// Apply a partial update to a message.
    async fn update_message(&self, id: &str, patch: &MessagePatch) -> SyncResult<()>;

    /// Delete a message.
    async fn delete_message(&self, id: &str) -> SyncResult<()>;

    /// Kick off AI response generation. Opaque to the sync core.
    async fn generate_response(&self, request: &GenerateRequest) -> SyncResult<()>;
}
