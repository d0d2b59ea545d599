//! driftsync - local-first synchronization engine for multi-device chat
//! clients.
//!
//! The engine keeps an instant, consistent in-memory state tree backed by an
//! authoritative remote store, tolerating network loss, concurrent
//! tabs/devices, and partial failures without ever showing duplicated or
//! cross-contaminated data.
//!
//! Entry point: [`engine::SyncEngine`], assembled from the trait seams in
//! [`traits`] (remote bridge, local cache, coordination service).

pub mod adapters;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod logging;
pub mod models;
pub mod optimistic;
pub mod queue;
pub mod state;
pub mod traits;

pub use config::SyncConfig;
pub use engine::SyncEngine;
pub use error::{SyncError, SyncResult};
pub use state::StateSnapshot;
