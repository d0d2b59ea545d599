//! Concrete implementations of the engine's trait seams.
//!
//! - [`HttpRemoteBridge`] - reqwest-based Remote Sync Bridge
//! - [`JsonFileCache`] - file-backed local cache store
//! - [`MemoryCoordination`] - in-process coordination service
//! - [`mock`] - recording mocks for tests

pub mod http_remote;
pub mod json_cache;
pub mod memory_coordination;
pub mod mock;

pub use http_remote::{HttpRemoteBridge, DEFAULT_BASE_URL};
pub use json_cache::JsonFileCache;
pub use memory_coordination::MemoryCoordination;
pub use mock::{MemoryCacheStore, MockRemoteBridge};
