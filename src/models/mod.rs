//! Core data model: threads, messages, pending operations.

mod message;
mod operation;
mod thread;

pub use message::{Message, MessagePatch, MessageRole};
pub use operation::{OperationKind, OperationPayload, PendingOperation};
pub use thread::{
    is_optimistic_id, optimistic_id, title_from_content, Thread, ThreadPatch,
    OPTIMISTIC_ID_PREFIX,
};
