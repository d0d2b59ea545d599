//! File-backed local cache store.
//!
//! Persists threads, messages, and metadata as JSON documents in a data
//! directory. Documents are small and rewritten whole; a corrupt file loads
//! as empty rather than failing startup.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::warn;

use crate::error::StorageError;
use crate::models::{is_optimistic_id, Message, Thread};
use crate::traits::LocalCacheStore;

const THREADS_FILE: &str = "threads.json";
const MESSAGES_FILE: &str = "messages.json";
const METADATA_FILE: &str = "metadata.json";

/// JSON-file implementation of [`LocalCacheStore`].
///
/// All access is serialized through one lock; the store is a persistence
/// layer, not a concurrency layer.
pub struct JsonFileCache {
    dir: PathBuf,
    io: Mutex<()>,
}

impl JsonFileCache {
    /// Create a cache rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            io: Mutex::new(()),
        })
    }

    /// Create a cache in the platform data directory (`driftsync/cache`).
    pub fn with_default_dir() -> Result<Self, StorageError> {
        let base = dirs::data_dir().ok_or(StorageError::Unavailable)?;
        Self::new(base.join("driftsync").join("cache"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn load_json<T: serde::de::DeserializeOwned + Default>(&self, file: &str) -> T {
        let path = self.dir.join(file);
        if !path.exists() {
            return T::default();
        }
        match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|err| {
                warn!(file, error = %err, "Discarding corrupt cache document");
                T::default()
            }),
            Err(err) => {
                warn!(file, error = %err, "Failed to read cache document");
                T::default()
            }
        }
    }

    fn save_json<T: serde::Serialize>(&self, file: &str, value: &T) -> Result<(), StorageError> {
        let json = serde_json::to_string_pretty(value)?;
        // Write-then-rename keeps a crash from truncating the document.
        let tmp = self.dir.join(format!("{}.tmp", file));
        fs::write(&tmp, json)?;
        fs::rename(&tmp, self.dir.join(file))?;
        Ok(())
    }

    fn load_threads(&self) -> Vec<Thread> {
        self.load_json(THREADS_FILE)
    }

    fn load_messages(&self) -> HashMap<String, Vec<Message>> {
        self.load_json(MESSAGES_FILE)
    }

    fn load_metadata(&self) -> HashMap<String, String> {
        self.load_json(METADATA_FILE)
    }
}

#[async_trait]
impl LocalCacheStore for JsonFileCache {
    async fn get_threads(&self) -> Result<Vec<Thread>, StorageError> {
        let _guard = self.io.lock().unwrap();
        Ok(self.load_threads())
    }

    async fn get_thread(&self, id: &str) -> Result<Option<Thread>, StorageError> {
        let _guard = self.io.lock().unwrap();
        Ok(self.load_threads().into_iter().find(|t| t.id == id))
    }

    async fn save_thread(&self, thread: &Thread) -> Result<(), StorageError> {
        // Provisional identifiers are never persisted as final ids.
        if is_optimistic_id(&thread.id) {
            return Ok(());
        }
        let _guard = self.io.lock().unwrap();
        let mut threads = self.load_threads();
        threads.retain(|t| t.id != thread.id);
        threads.push(thread.clone());
        self.save_json(THREADS_FILE, &threads)
    }

    async fn update_thread(&self, thread: &Thread) -> Result<(), StorageError> {
        if is_optimistic_id(&thread.id) {
            return Ok(());
        }
        let _guard = self.io.lock().unwrap();
        let mut threads = self.load_threads();
        let Some(slot) = threads.iter_mut().find(|t| t.id == thread.id) else {
            return Ok(());
        };
        *slot = thread.clone();
        self.save_json(THREADS_FILE, &threads)
    }

    async fn delete_thread(&self, id: &str) -> Result<(), StorageError> {
        let _guard = self.io.lock().unwrap();
        let mut threads = self.load_threads();
        threads.retain(|t| t.id != id);
        self.save_json(THREADS_FILE, &threads)?;

        let mut messages = self.load_messages();
        if messages.remove(id).is_some() {
            self.save_json(MESSAGES_FILE, &messages)?;
        }
        Ok(())
    }

    async fn get_messages(&self, thread_id: &str) -> Result<Vec<Message>, StorageError> {
        let _guard = self.io.lock().unwrap();
        let mut list = self
            .load_messages()
            .remove(thread_id)
            .unwrap_or_default();
        list.sort_by(|a, b| a.write_key().cmp(&b.write_key()));
        Ok(list)
    }

    async fn save_message(&self, message: &Message) -> Result<(), StorageError> {
        if is_optimistic_id(&message.id) {
            return Ok(());
        }
        let _guard = self.io.lock().unwrap();
        let mut messages = self.load_messages();
        let list = messages.entry(message.thread_id.clone()).or_default();
        list.retain(|m| m.id != message.id);
        list.push(message.clone());
        self.save_json(MESSAGES_FILE, &messages)
    }

    async fn update_message(&self, message: &Message) -> Result<(), StorageError> {
        if is_optimistic_id(&message.id) {
            return Ok(());
        }
        let _guard = self.io.lock().unwrap();
        let mut messages = self.load_messages();
        let Some(slot) = messages
            .get_mut(&message.thread_id)
            .and_then(|list| list.iter_mut().find(|m| m.id == message.id))
        else {
            return Ok(());
        };
        *slot = message.clone();
        self.save_json(MESSAGES_FILE, &messages)
    }

    async fn delete_message(&self, id: &str, thread_id: &str) -> Result<(), StorageError> {
        let _guard = self.io.lock().unwrap();
        let mut messages = self.load_messages();
        if let Some(list) = messages.get_mut(thread_id) {
            list.retain(|m| m.id != id);
            self.save_json(MESSAGES_FILE, &messages)?;
        }
        Ok(())
    }

    async fn get_metadata(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = self.io.lock().unwrap();
        Ok(self.load_metadata().remove(key))
    }

    async fn set_metadata(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let _guard = self.io.lock().unwrap();
        let mut metadata = self.load_metadata();
        metadata.insert(key.to_string(), value.to_string());
        self.save_json(METADATA_FILE, &metadata)
    }

    async fn clear(&self) -> Result<(), StorageError> {
        let _guard = self.io.lock().unwrap();
        for file in [THREADS_FILE, MESSAGES_FILE, METADATA_FILE] {
            let path = self.dir.join(file);
            if path.exists() {
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }

    async fn is_available(&self) -> bool {
        self.dir.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageRole;
    use chrono::Utc;
    use tempfile::tempdir;

    fn thread(id: &str) -> Thread {
        let now = Utc::now();
        Thread {
            id: id.to_string(),
            title: "Cached".to_string(),
            owner_id: "user-1".to_string(),
            last_message_at: now,
            provider: "anthropic".to_string(),
            model: "claude-3".to_string(),
            version: 1,
            is_optimistic: false,
            last_modified: now,
        }
    }

    fn message(id: &str, thread_id: &str) -> Message {
        Message {
            id: id.to_string(),
            thread_id: thread_id.to_string(),
            role: MessageRole::User,
            content: "hi".to_string(),
            created_at: Utc::now(),
            version: 1,
            is_optimistic: false,
            is_streaming: false,
        }
    }

    #[tokio::test]
    async fn test_thread_round_trip() {
        let dir = tempdir().unwrap();
        let cache = JsonFileCache::new(dir.path()).unwrap();

        cache.save_thread(&thread("t1")).await.unwrap();
        cache.save_thread(&thread("t2")).await.unwrap();

        let threads = cache.get_threads().await.unwrap();
        assert_eq!(threads.len(), 2);
        assert!(cache.get_thread("t1").await.unwrap().is_some());
        assert!(cache.get_thread("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_thread_upserts() {
        let dir = tempdir().unwrap();
        let cache = JsonFileCache::new(dir.path()).unwrap();

        cache.save_thread(&thread("t1")).await.unwrap();
        let mut updated = thread("t1");
        updated.title = "Renamed".to_string();
        cache.save_thread(&updated).await.unwrap();

        let threads = cache.get_threads().await.unwrap();
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].title, "Renamed");
    }

    #[tokio::test]
    async fn test_provisional_entities_never_persisted() {
        let dir = tempdir().unwrap();
        let cache = JsonFileCache::new(dir.path()).unwrap();

        let provisional = Thread::optimistic(
            "Draft".to_string(),
            "user-1".to_string(),
            "anthropic".to_string(),
            "claude-3".to_string(),
        );
        cache.save_thread(&provisional).await.unwrap();
        assert!(cache.get_threads().await.unwrap().is_empty());

        let msg = Message::optimistic("t1".to_string(), MessageRole::User, "hi".to_string());
        cache.save_message(&msg).await.unwrap();
        assert!(cache.get_messages("t1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_thread_drops_messages() {
        let dir = tempdir().unwrap();
        let cache = JsonFileCache::new(dir.path()).unwrap();

        cache.save_thread(&thread("t1")).await.unwrap();
        cache.save_message(&message("m1", "t1")).await.unwrap();
        cache.delete_thread("t1").await.unwrap();

        assert!(cache.get_threads().await.unwrap().is_empty());
        assert!(cache.get_messages("t1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_messages_sorted_ascending() {
        let dir = tempdir().unwrap();
        let cache = JsonFileCache::new(dir.path()).unwrap();

        let mut first = message("m1", "t1");
        first.created_at = Utc::now() - chrono::Duration::minutes(2);
        let second = message("m2", "t1");
        cache.save_message(&second).await.unwrap();
        cache.save_message(&first).await.unwrap();

        let list = cache.get_messages("t1").await.unwrap();
        assert_eq!(list[0].id, "m1");
        assert_eq!(list[1].id, "m2");
    }

    #[tokio::test]
    async fn test_metadata_round_trip() {
        let dir = tempdir().unwrap();
        let cache = JsonFileCache::new(dir.path()).unwrap();

        assert!(cache.get_metadata("k").await.unwrap().is_none());
        cache.set_metadata("k", "v").await.unwrap();
        assert_eq!(cache.get_metadata("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_corrupt_document_loads_empty() {
        let dir = tempdir().unwrap();
        let cache = JsonFileCache::new(dir.path()).unwrap();
        fs::write(dir.path().join(THREADS_FILE), "not valid json").unwrap();

        assert!(cache.get_threads().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear_removes_everything() {
        let dir = tempdir().unwrap();
        let cache = JsonFileCache::new(dir.path()).unwrap();

        cache.save_thread(&thread("t1")).await.unwrap();
        cache.set_metadata("k", "v").await.unwrap();
        cache.clear().await.unwrap();

        assert!(cache.get_threads().await.unwrap().is_empty());
        assert!(cache.get_metadata("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let cache = JsonFileCache::new(dir.path()).unwrap();
            cache.save_thread(&thread("t1")).await.unwrap();
            cache.set_metadata("selected", "t1").await.unwrap();
        }

        let reopened = JsonFileCache::new(dir.path()).unwrap();
        assert_eq!(reopened.get_threads().await.unwrap().len(), 1);
        assert_eq!(
            reopened.get_metadata("selected").await.unwrap().as_deref(),
            Some("t1")
        );
    }
}
