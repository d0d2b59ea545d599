//! Conversation thread model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reserved prefix for provisional (optimistic) identifiers.
///
/// Entities carrying this prefix were created locally and have not been
/// confirmed by the authoritative store. They are never persisted as final
/// identifiers.
pub const OPTIMISTIC_ID_PREFIX: &str = "optimistic-";

/// Generate a fresh provisional identifier.
pub fn optimistic_id() -> String {
    format!("{}{}", OPTIMISTIC_ID_PREFIX, Uuid::new_v4())
}

/// Check whether an identifier is provisional.
pub fn is_optimistic_id(id: &str) -> bool {
    id.starts_with(OPTIMISTIC_ID_PREFIX)
}

/// A conversation thread.
///
/// Owns an ordered collection of messages, referenced by id through the
/// state tree's message index — never by pointer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub id: String,
    pub title: String,
    pub owner_id: String,
    /// Timestamp of the most recent message; threads sort by this, descending.
    pub last_message_at: DateTime<Utc>,
    /// Model provider for AI responses in this thread.
    pub provider: String,
    /// Model identifier within the provider.
    pub model: String,
    /// Monotonically non-decreasing per entity; ties broken by `last_modified`.
    pub version: u64,
    #[serde(default)]
    pub is_optimistic: bool,
    pub last_modified: DateTime<Utc>,
}

impl Thread {
    /// Create a provisional thread for optimistic display.
    pub fn optimistic(title: String, owner_id: String, provider: String, model: String) -> Self {
        let now = Utc::now();
        Self {
            id: optimistic_id(),
            title,
            owner_id,
            last_message_at: now,
            provider,
            model,
            version: 0,
            is_optimistic: true,
            last_modified: now,
        }
    }

    /// Last-write-wins ordering key. An incoming write is applied only if
    /// its key is not older than the stored one.
    pub fn write_key(&self) -> (DateTime<Utc>, u64) {
        (self.last_modified, self.version)
    }

    /// Whether this thread's identifier is provisional.
    pub fn is_provisional(&self) -> bool {
        is_optimistic_id(&self.id)
    }
}

/// Partial update to a thread. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl ThreadPatch {
    /// Apply this patch to a thread, bumping its version and timestamp.
    pub fn apply_to(&self, thread: &mut Thread) {
        if let Some(title) = &self.title {
            thread.title = title.clone();
        }
        if let Some(provider) = &self.provider {
            thread.provider = provider.clone();
        }
        if let Some(model) = &self.model {
            thread.model = model.clone();
        }
        thread.version += 1;
        thread.last_modified = Utc::now();
    }
}

/// Derive a thread title from its first message, truncating on a UTF-8
/// boundary when the content is long.
pub fn title_from_content(content: &str) -> String {
    if content.len() > 40 {
        let mut end = 37;
        while end > 0 && !content.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &content[..end])
    } else {
        content.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optimistic_thread_has_prefixed_id() {
        let thread = Thread::optimistic(
            "Hello".to_string(),
            "user-1".to_string(),
            "openai".to_string(),
            "gpt-4".to_string(),
        );
        assert!(thread.is_provisional());
        assert!(thread.is_optimistic);
        assert!(is_optimistic_id(&thread.id));
        assert_eq!(thread.version, 0);
    }

    #[test]
    fn test_is_optimistic_id() {
        assert!(is_optimistic_id("optimistic-abc"));
        assert!(!is_optimistic_id("thread-abc"));
        assert!(!is_optimistic_id(""));
    }

    #[test]
    fn test_patch_bumps_version_and_timestamp() {
        let mut thread = Thread::optimistic(
            "Title".to_string(),
            "user-1".to_string(),
            "openai".to_string(),
            "gpt-4".to_string(),
        );
        let before = thread.write_key();

        let patch = ThreadPatch {
            model: Some("gpt-4o".to_string()),
            ..Default::default()
        };
        patch.apply_to(&mut thread);

        assert_eq!(thread.model, "gpt-4o");
        assert_eq!(thread.title, "Title");
        assert_eq!(thread.version, 1);
        assert!(thread.write_key() > before);
    }

    #[test]
    fn test_title_from_content_short() {
        assert_eq!(title_from_content("Hello"), "Hello");
    }

    #[test]
    fn test_title_from_content_truncates_on_char_boundary() {
        let content = "ありがとうございますありがとうございますありがとうございます";
        let title = title_from_content(content);
        assert!(title.ends_with("..."));
        assert!(title.len() <= 40);
    }

    #[test]
    fn test_serialization_round_trip() {
        let thread = Thread::optimistic(
            "Hello".to_string(),
            "user-1".to_string(),
            "anthropic".to_string(),
            "claude-3".to_string(),
        );
        let json = serde_json::to_string(&thread).unwrap();
        assert!(json.contains("\"ownerId\""));
        assert!(json.contains("\"lastMessageAt\""));
        let back: Thread = serde_json::from_str(&json).unwrap();
        assert_eq!(thread, back);
    }
}
