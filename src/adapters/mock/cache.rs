//! In-memory cache store with failure injection for testing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::StorageError;
use crate::models::{Message, Thread};
use crate::traits::LocalCacheStore;

/// In-memory implementation of [`LocalCacheStore`].
///
/// `set_failing(true)` makes every call return
/// [`StorageError::Unavailable`], which is how degraded-mode behavior is
/// exercised in tests.
#[derive(Clone, Default)]
pub struct MemoryCacheStore {
    inner: Arc<CacheInner>,
}

#[derive(Default)]
struct CacheInner {
    threads: Mutex<HashMap<String, Thread>>,
    messages: Mutex<HashMap<String, Vec<Message>>>,
    metadata: Mutex<HashMap<String, String>>,
    failing: AtomicBool,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle failure injection.
    pub fn set_failing(&self, failing: bool) {
        self.inner.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.inner.failing.load(Ordering::SeqCst) {
            Err(StorageError::Unavailable)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl LocalCacheStore for MemoryCacheStore {
    async fn get_threads(&self) -> Result<Vec<Thread>, StorageError> {
        self.check()?;
        Ok(self.inner.threads.lock().unwrap().values().cloned().collect())
    }

    async fn get_thread(&self, id: &str) -> Result<Option<Thread>, StorageError> {
        self.check()?;
        Ok(self.inner.threads.lock().unwrap().get(id).cloned())
    }

    async fn save_thread(&self, thread: &Thread) -> Result<(), StorageError> {
        self.check()?;
        self.inner
            .threads
            .lock()
            .unwrap()
            .insert(thread.id.clone(), thread.clone());
        Ok(())
    }

    async fn update_thread(&self, thread: &Thread) -> Result<(), StorageError> {
        self.check()?;
        let mut threads = self.inner.threads.lock().unwrap();
        if threads.contains_key(&thread.id) {
            threads.insert(thread.id.clone(), thread.clone());
        }
        Ok(())
    }

    async fn delete_thread(&self, id: &str) -> Result<(), StorageError> {
        self.check()?;
        self.inner.threads.lock().unwrap().remove(id);
        self.inner.messages.lock().unwrap().remove(id);
        Ok(())
    }

    async fn get_messages(&self, thread_id: &str) -> Result<Vec<Message>, StorageError> {
        self.check()?;
        let mut list = self
            .inner
            .messages
            .lock()
            .unwrap()
            .get(thread_id)
            .cloned()
            .unwrap_or_default();
        list.sort_by(|a, b| a.write_key().cmp(&b.write_key()));
        Ok(list)
    }

    async fn save_message(&self, message: &Message) -> Result<(), StorageError> {
        self.check()?;
        let mut messages = self.inner.messages.lock().unwrap();
        let list = messages.entry(message.thread_id.clone()).or_default();
        list.retain(|m| m.id != message.id);
        list.push(message.clone());
        Ok(())
    }

    async fn update_message(&self, message: &Message) -> Result<(), StorageError> {
        self.check()?;
        let mut messages = self.inner.messages.lock().unwrap();
        if let Some(slot) = messages
            .get_mut(&message.thread_id)
            .and_then(|list| list.iter_mut().find(|m| m.id == message.id))
        {
            *slot = message.clone();
        }
        Ok(())
    }

    async fn delete_message(&self, id: &str, thread_id: &str) -> Result<(), StorageError> {
        self.check()?;
        if let Some(list) = self.inner.messages.lock().unwrap().get_mut(thread_id) {
            list.retain(|m| m.id != id);
        }
        Ok(())
    }

    async fn get_metadata(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.check()?;
        Ok(self.inner.metadata.lock().unwrap().get(key).cloned())
    }

    async fn set_metadata(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.check()?;
        self.inner
            .metadata
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.check()?;
        self.inner.threads.lock().unwrap().clear();
        self.inner.messages.lock().unwrap().clear();
        self.inner.metadata.lock().unwrap().clear();
        Ok(())
    }

    async fn is_available(&self) -> bool {
        !self.inner.failing.load(Ordering::SeqCst)
    }
}
