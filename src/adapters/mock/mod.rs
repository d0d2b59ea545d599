//! Mock adapters for testing.

pub mod cache;
pub mod remote;

pub use cache::MemoryCacheStore;
pub use remote::{MockRemoteBridge, RecordedCall};
