//! Trait abstractions for the engine's external collaborators.
//!
//! Every I/O boundary goes through one of these traits, enabling
//! dependency injection and mocking in tests:
//!
//! - [`RemoteSyncBridge`] - the authoritative backend (source of truth)
//! - [`LocalCacheStore`] - durable per-device document storage
//! - [`CoordinationService`] - shared KV + pub/sub for locks and cross-tab events

pub mod cache;
pub mod coordination;
pub mod remote;

pub use cache::{LocalCacheStore, METADATA_PENDING_OPERATIONS, METADATA_SELECTED_THREAD};
pub use coordination::{CoordinationMessage, CoordinationService, SubscriptionStream};
pub use remote::{GenerateRequest, RemoteSyncBridge};
