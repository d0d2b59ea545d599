//! Pending operation model for the offline queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::message::{MessagePatch, MessageRole};
use super::thread::ThreadPatch;

/// Kind of mutation a pending operation represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    CreateThread,
    UpdateThread,
    DeleteThread,
    CreateMessage,
    UpdateMessage,
    DeleteMessage,
}

impl OperationKind {
    /// Short label for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::CreateThread => "create_thread",
            OperationKind::UpdateThread => "update_thread",
            OperationKind::DeleteThread => "delete_thread",
            OperationKind::CreateMessage => "create_message",
            OperationKind::UpdateMessage => "update_message",
            OperationKind::DeleteMessage => "delete_message",
        }
    }
}

/// Typed payload of a pending operation.
///
/// Identifier fields may hold provisional ids; they are resolved through
/// the optimistic manager's mapping right before the remote call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationPayload {
    CreateThread {
        title: String,
        provider: String,
        model: String,
    },
    UpdateThread {
        thread_id: String,
        patch: ThreadPatch,
    },
    DeleteThread {
        thread_id: String,
    },
    CreateMessage {
        thread_id: String,
        role: MessageRole,
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attachment_ids: Vec<String>,
    },
    UpdateMessage {
        message_id: String,
        patch: MessagePatch,
    },
    DeleteMessage {
        message_id: String,
        thread_id: String,
    },
}

impl OperationPayload {
    /// The operation kind this payload encodes.
    pub fn kind(&self) -> OperationKind {
        match self {
            OperationPayload::CreateThread { .. } => OperationKind::CreateThread,
            OperationPayload::UpdateThread { .. } => OperationKind::UpdateThread,
            OperationPayload::DeleteThread { .. } => OperationKind::DeleteThread,
            OperationPayload::CreateMessage { .. } => OperationKind::CreateMessage,
            OperationPayload::UpdateMessage { .. } => OperationKind::UpdateMessage,
            OperationPayload::DeleteMessage { .. } => OperationKind::DeleteMessage,
        }
    }
}

/// A durably queued mutation awaiting delivery to the authoritative store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOperation {
    pub id: String,
    pub payload: OperationPayload,
    pub enqueued_at: DateTime<Utc>,
    pub retry_count: u32,
    /// Provisional id of the optimistic entity this operation backs, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimistic_id: Option<String>,
    /// Authoritative id once known (set on confirmation paths).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed_id: Option<String>,
}

impl PendingOperation {
    /// Create a fresh queued operation.
    pub fn new(payload: OperationPayload, optimistic_id: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            payload,
            enqueued_at: Utc::now(),
            retry_count: 0,
            optimistic_id,
            confirmed_id: None,
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.payload.kind()
    }

    /// Deduplication key: two operations with the same kind and payload are
    /// considered identical and never queued twice. The payload's serde
    /// representation already embeds the kind tag.
    pub fn dedup_key(&self) -> String {
        serde_json::to_string(&self.payload).unwrap_or_else(|_| format!("{:?}", self.payload))
    }
}
