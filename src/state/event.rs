//! Events consumed by the sync state machine.

use crate::models::{Message, PendingOperation, Thread};

/// A state transition input.
///
/// Every mutation of [`SyncState`](super::SyncState) happens by dispatching
/// one of these through the reducer; no component holds a writable reference
/// to the tree.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Authoritative thread listing arrived. Replaces all confirmed threads;
    /// unconfirmed optimistic threads survive the merge.
    ThreadsReceived(Vec<Thread>),

    /// Authoritative message listing for one thread arrived. Ignored unless
    /// the thread is currently selected (stale-response guard).
    MessagesReceived {
        thread_id: String,
        messages: Vec<Message>,
    },

    /// A single authoritative thread arrived or changed. Applied
    /// last-write-wins on `(last_modified, version)`.
    ThreadUpserted(Thread),

    /// A thread was deleted (locally or remotely).
    ThreadRemoved(String),

    /// An optimistic thread was confirmed: the provisional entity is
    /// replaced and its messages are re-homed under the authoritative id.
    ThreadConfirmed {
        provisional_id: String,
        thread: Thread,
    },

    /// A single authoritative message arrived or changed. Applied
    /// last-write-wins on `(created_at, version)`.
    MessageUpserted(Message),

    /// A message was deleted.
    MessageRemoved { message_id: String },

    /// An optimistic message was confirmed by its authoritative counterpart.
    MessageConfirmed {
        provisional_id: String,
        message: Message,
    },

    /// A provisional thread was created locally.
    OptimisticThreadAdded(Thread),

    /// A provisional thread was rolled back or purged.
    OptimisticThreadRemoved(String),

    /// A provisional message was created locally.
    OptimisticMessageAdded(Message),

    /// A provisional message was rolled back or purged.
    OptimisticMessageRemoved(String),

    /// The user switched threads. Clears cached messages for both the
    /// previous and the new selection before any load.
    ThreadSelected(Option<String>),

    /// Connectivity changed.
    OnlineChanged(bool),

    /// A sync pass started or finished.
    SyncingChanged(bool),

    /// A mutation could not reach the remote store and was queued.
    /// Deduplicated on `(kind, payload)`.
    OperationEnqueued(PendingOperation),

    /// A queued operation's bookkeeping changed (retry count).
    OperationUpdated(PendingOperation),

    /// A queued operation succeeded or failed permanently.
    OperationRemoved(String),

    /// An in-process operation lock was taken.
    LockAcquired(String),

    /// An in-process operation lock was released.
    LockReleased(String),

    /// A failure became user-visible.
    ErrorSet(String),

    /// The user dismissed the error.
    ErrorCleared,
}
