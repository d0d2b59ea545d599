//! Pending operation queue: durable storage and retry policy.
//!
//! The queue itself lives in the state tree (`SyncState.pending_operations`)
//! and is mutated through reducer events; this module provides the retry
//! policy and the persistence glue that survives process restarts. The
//! drain loop lives in the engine, which owns the remote bridge.

pub mod retry;

pub use retry::RetryPolicy;

use tracing::warn;

use crate::models::PendingOperation;
use crate::traits::METADATA_PENDING_OPERATIONS;

/// Serialize the queue for the cache metadata slot.
pub fn serialize_queue(operations: &[PendingOperation]) -> String {
    serde_json::to_string(operations).unwrap_or_else(|err| {
        warn!(error = %err, "Failed to serialize pending queue");
        "[]".to_string()
    })
}

/// Deserialize a persisted queue; a corrupt document restores as empty
/// rather than wedging startup.
pub fn deserialize_queue(raw: &str) -> Vec<PendingOperation> {
    serde_json::from_str(raw).unwrap_or_else(|err| {
        warn!(error = %err, "Discarding corrupt pending queue document");
        Vec::new()
    })
}

/// Metadata key the queue persists under.
pub fn queue_metadata_key() -> &'static str {
    METADATA_PENDING_OPERATIONS
}
