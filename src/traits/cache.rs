//! Local cache store trait abstraction.
//!
//! Durable per-device storage for threads, messages, and metadata. The
//! engine wraps every call so that a failing store degrades the process to
//! memory-only operation instead of crashing it.

use async_trait::async_trait;

use crate::error::StorageError;
use crate::models::{Message, Thread};

/// Metadata key under which the pending-operation queue is persisted.
pub const METADATA_PENDING_OPERATIONS: &str = "pending_operations";

/// Metadata key under which the selected thread id is persisted.
pub const METADATA_SELECTED_THREAD: &str = "selected_thread";

/// Trait for durable per-device document storage.
///
/// Implementations treat threads and messages as plain documents; all
/// merge logic lives above this layer.
#[async_trait]
pub trait LocalCacheStore: Send + Sync {
    /// Load all cached threads.
    async fn get_threads(&self) -> Result<Vec<Thread>, StorageError>;

    /// Load one thread by id.
    async fn get_thread(&self, id: &str) -> Result<Option<Thread>, StorageError>;

    /// Insert or replace a thread.
    async fn save_thread(&self, thread: &Thread) -> Result<(), StorageError>;

    /// Replace an existing thread; a no-op when it was never cached.
    async fn update_thread(&self, thread: &Thread) -> Result<(), StorageError>;

    /// Remove a thread and all its messages.
    async fn delete_thread(&self, id: &str) -> Result<(), StorageError>;

    /// Load the cached messages of one thread, ordered ascending.
    async fn get_messages(&self, thread_id: &str) -> Result<Vec<Message>, StorageError>;

    /// Insert or replace a message.
    async fn save_message(&self, message: &Message) -> Result<(), StorageError>;

    /// Replace an existing message; a no-op when it was never cached.
    async fn update_message(&self, message: &Message) -> Result<(), StorageError>;

    /// Remove a message.
    async fn delete_message(&self, id: &str, thread_id: &str) -> Result<(), StorageError>;

    /// Read an opaque metadata value.
    async fn get_metadata(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write an opaque metadata value.
    async fn set_metadata(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Drop all cached data.
    async fn clear(&self) -> Result<(), StorageError>;

    /// Whether the store is currently usable.
    async fn is_available(&self) -> bool;
}
