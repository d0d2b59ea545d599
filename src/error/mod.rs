//! Unified error handling for the sync engine.
//!
//! The taxonomy follows how failures are handled, not where they come from:
//!
//! | Variant | Meaning | Retryable |
//! |---------|---------|-----------|
//! | `Network` | Timeout, reset, DNS, 5xx, 429 | Yes |
//! | `Rejected` | Validation/permission, other 4xx | No |
//! | `Storage` | Local cache failure, degrades to memory-only | No |
//! | `LockContention` | Resource held elsewhere, try again later | No |
//! | `Coordination` | Coordination service failure | Yes |
//!
//! Retryable errors never bubble to the caller after the initial attempt:
//! the originating call resolves once the operation is durably queued.
//! Terminal errors on the first attempt roll back optimistic state and are
//! returned directly.

mod category;
mod network;
mod storage;
mod sync_error;

pub use category::ErrorCategory;
pub use network::{classify_reqwest_error, NetworkError};
pub use storage::StorageError;
pub use sync_error::SyncError;

/// Result alias used throughout the engine.
pub type SyncResult<T> = Result<T, SyncError>;
