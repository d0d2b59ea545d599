//! Chat message model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::thread::{is_optimistic_id, optimistic_id};

/// Role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

/// A single message within a thread.
///
/// Messages carry only a `thread_id` back-reference key; the owning
/// relationship lives in the state tree's per-thread index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub thread_id: String,
    pub role: MessageRole,
    pub content: String,
    /// Ordering key, ascending. Authoritative timestamp once confirmed,
    /// local creation time while optimistic.
    pub created_at: DateTime<Utc>,
    pub version: u64,
    #[serde(default)]
    pub is_optimistic: bool,
    /// Set while an assistant response is still being generated.
    #[serde(default)]
    pub is_streaming: bool,
}

impl Message {
    /// Create a provisional message for optimistic display.
    pub fn optimistic(thread_id: String, role: MessageRole, content: String) -> Self {
        Self {
            id: optimistic_id(),
            thread_id,
            role,
            content,
            created_at: Utc::now(),
            version: 0,
            is_optimistic: true,
            is_streaming: false,
        }
    }

    /// Last-write-wins ordering key, mirrors [`Thread::write_key`].
    ///
    /// [`Thread::write_key`]: super::Thread::write_key
    pub fn write_key(&self) -> (DateTime<Utc>, u64) {
        (self.created_at, self.version)
    }

    /// Whether this message's identifier is provisional.
    pub fn is_provisional(&self) -> bool {
        is_optimistic_id(&self.id)
    }

    /// Age of the message relative to `now`.
    pub fn age_at(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }

    /// Whether an authoritative message occupies the same logical slot as
    /// this optimistic one: same thread, same role, same content.
    pub fn matches_slot(&self, other: &Message) -> bool {
        self.thread_id == other.thread_id
            && self.role == other.role
            && self.content == other.content
    }
}

/// Partial update to a message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_streaming: Option<bool>,
}

impl MessagePatch {
    /// Apply this patch to a message, bumping its version.
    pub fn apply_to(&self, message: &mut Message) {
        if let Some(content) = &self.content {
            message.content = content.clone();
        }
        if let Some(is_streaming) = self.is_streaming {
            message.is_streaming = is_streaming;
        }
        message.version += 1;
    }
}
