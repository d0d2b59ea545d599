//! The pure transition function of the sync state machine.
//!
//! `reduce` maps `(state, event)` to the next state by mutating the
//! exclusively-owned arena in place. Merge rules for authoritative vs
//! optimistic data live here and nowhere else — cross-tab events and remote
//! responses flow through the same paths.

use chrono::Utc;
use tracing::debug;

use crate::models::Message;

use super::{SyncEvent, SyncState};

/// Apply one event to the state tree.
pub fn reduce(state: &mut SyncState, event: SyncEvent) {
    match event {
        SyncEvent::ThreadsReceived(incoming) => threads_received(state, incoming),
        SyncEvent::MessagesReceived {
            thread_id,
            messages,
        } => messages_received(state, &thread_id, messages),
        SyncEvent::ThreadUpserted(thread) => thread_upserted(state, thread),
        SyncEvent::ThreadRemoved(id) => remove_thread(state, &id),
        SyncEvent::ThreadConfirmed {
            provisional_id,
            thread,
        } => thread_confirmed(state, &provisional_id, thread),
        SyncEvent::MessageUpserted(message) => message_upserted(state, message),
        SyncEvent::MessageRemoved { message_id } => remove_message(state, &message_id),
        SyncEvent::MessageConfirmed {
            provisional_id,
            message,
        } => {
            remove_message(state, &provisional_id);
            message_upserted(state, message);
        }
        SyncEvent::OptimisticThreadAdded(thread) => {
            state.thread_messages.entry(thread.id.clone()).or_default();
            state.threads.insert(thread.id.clone(), thread);
        }
        SyncEvent::OptimisticThreadRemoved(id) => remove_thread(state, &id),
        SyncEvent::OptimisticMessageAdded(message) => insert_message(state, message),
        SyncEvent::OptimisticMessageRemoved(id) => remove_message(state, &id),
        SyncEvent::ThreadSelected(selection) => thread_selected(state, selection),
        SyncEvent::OnlineChanged(online) => state.online = online,
        SyncEvent::SyncingChanged(syncing) => state.syncing = syncing,
        SyncEvent::OperationEnqueued(op) => {
            let key = op.dedup_key();
            if state
                .pending_operations
                .iter()
                .any(|existing| existing.dedup_key() == key)
            {
                debug!(kind = op.kind().as_str(), "Skipping duplicate enqueue");
            } else {
                state.pending_operations.push(op);
            }
        }
        SyncEvent::OperationUpdated(op) => {
            if let Some(existing) = state
                .pending_operations
                .iter_mut()
                .find(|existing| existing.id == op.id)
            {
                *existing = op;
            }
        }
        SyncEvent::OperationRemoved(id) => {
            state.pending_operations.retain(|op| op.id != id);
        }
        SyncEvent::LockAcquired(key) => {
            state.operation_locks.insert(key);
        }
        SyncEvent::LockReleased(key) => {
            state.operation_locks.remove(&key);
        }
        SyncEvent::ErrorSet(message) => state.error = Some(message),
        SyncEvent::ErrorCleared => state.error = None,
    }
}

/// Authoritative thread listing: replaces every confirmed thread, keeps
/// optimistic threads that have not been mapped to a confirmed id yet.
fn threads_received(state: &mut SyncState, incoming: Vec<crate::models::Thread>) {
    // A confirmed thread missing from the authoritative listing was deleted
    // remotely; drop it and its messages. Optimistic threads survive.
    let stale: Vec<String> = state
        .threads
        .values()
        .filter(|t| !t.is_optimistic && !incoming.iter().any(|inc| inc.id == t.id))
        .map(|t| t.id.clone())
        .collect();
    for id in stale {
        remove_thread(state, &id);
    }

    for thread in incoming {
        state.thread_messages.entry(thread.id.clone()).or_default();
        state.threads.insert(thread.id.clone(), thread);
    }
}

/// Authoritative message listing for one thread.
///
/// Rejected outright when the thread is not the current selection: a slow
/// response for a previously-viewed thread must never overwrite the visible
/// list. Optimistic messages survive the merge only while younger than the
/// grace window and not already represented by an authoritative message in
/// the same logical slot.
fn messages_received(state: &mut SyncState, thread_id: &str, messages: Vec<Message>) {
    if state.selected_thread_id.as_deref() != Some(thread_id) {
        debug!(thread_id, "Dropping message listing for unselected thread");
        return;
    }

    let now = Utc::now();
    let grace = state.grace_window;

    // Thread isolation: whatever the payload claims, only messages keyed to
    // this thread may enter its list.
    let mut merged: Vec<Message> = messages
        .into_iter()
        .filter(|m| m.thread_id == thread_id)
        .collect();

    let retained_optimistic: Vec<Message> = state
        .messages_for(thread_id)
        .into_iter()
        .filter(|m| m.is_optimistic)
        .filter(|m| m.age_at(now) <= grace)
        .filter(|m| !merged.iter().any(|auth| m.matches_slot(auth)))
        .cloned()
        .collect();
    merged.extend(retained_optimistic);

    merged.sort_by(|a, b| a.write_key().cmp(&b.write_key()).then(a.id.cmp(&b.id)));

    clear_thread_messages(state, thread_id);
    let ids: Vec<String> = merged.iter().map(|m| m.id.clone()).collect();
    for message in merged {
        state.messages.insert(message.id.clone(), message);
    }
    state.thread_messages.insert(thread_id.to_string(), ids);
}

/// Single-thread upsert with last-write-wins conflict resolution.
fn thread_upserted(state: &mut SyncState, thread: crate::models::Thread) {
    if let Some(existing) = state.threads.get(&thread.id) {
        if existing.write_key() > thread.write_key() {
            debug!(thread_id = %thread.id, "Ignoring stale thread write");
            return;
        }
    }
    state.thread_messages.entry(thread.id.clone()).or_default();
    state.threads.insert(thread.id.clone(), thread);
}

/// Single-message upsert with last-write-wins conflict resolution.
fn message_upserted(state: &mut SyncState, message: Message) {
    if let Some(existing) = state.messages.get(&message.id) {
        if existing.write_key() > message.write_key() {
            debug!(message_id = %message.id, "Ignoring stale message write");
            return;
        }
        // Same id stays in place in its thread list.
        state.messages.insert(message.id.clone(), message);
        return;
    }
    insert_message(state, message);
}

/// A confirmed thread replaces its provisional twin; messages cached under
/// the provisional id are re-homed so in-flight sends keep their context.
fn thread_confirmed(
    state: &mut SyncState,
    provisional_id: &str,
    thread: crate::models::Thread,
) {
    let orphaned = state
        .thread_messages
        .remove(provisional_id)
        .unwrap_or_default();
    state.threads.remove(provisional_id);

    let list = state.thread_messages.entry(thread.id.clone()).or_default();
    for message_id in orphaned {
        if let Some(message) = state.messages.get_mut(&message_id) {
            message.thread_id = thread.id.clone();
        }
        if !list.contains(&message_id) {
            list.push(message_id);
        }
    }

    if state.selected_thread_id.as_deref() == Some(provisional_id) {
        state.selected_thread_id = Some(thread.id.clone());
    }

    state.threads.insert(thread.id.clone(), thread);
}

/// Selection change. Cached messages for both the previous and the new
/// selection are dropped before anything loads, so no stale cross-thread
/// content is ever visible — isolation is chosen over responsiveness.
fn thread_selected(state: &mut SyncState, selection: Option<String>) {
    if let Some(previous) = state.selected_thread_id.clone() {
        clear_thread_messages(state, &previous);
    }
    if let Some(new) = &selection {
        clear_thread_messages(state, new);
    }
    state.selected_thread_id = selection;
}

fn insert_message(state: &mut SyncState, message: Message) {
    let thread_id = message.thread_id.clone();
    let id = message.id.clone();
    let key = message.write_key();
    state.messages.insert(id.clone(), message);

    let list = state.thread_messages.entry(thread_id).or_default();
    if !list.contains(&id) {
        // Insert in timestamp order; lists are short enough that a linear
        // scan beats re-sorting.
        let position = list
            .iter()
            .position(|existing| {
                state
                    .messages
                    .get(existing)
                    .map(|m| m.write_key() > key)
                    .unwrap_or(false)
            })
            .unwrap_or(list.len());
        list.insert(position, id);
    }
}

fn remove_message(state: &mut SyncState, message_id: &str) {
    if let Some(message) = state.messages.remove(message_id) {
        if let Some(list) = state.thread_messages.get_mut(&message.thread_id) {
            list.retain(|id| id != message_id);
        }
    }
}

fn remove_thread(state: &mut SyncState, thread_id: &str) {
    state.threads.remove(thread_id);
    if let Some(ids) = state.thread_messages.remove(thread_id) {
        for id in ids {
            state.messages.remove(&id);
        }
    }
    if state.selected_thread_id.as_deref() == Some(thread_id) {
        state.selected_thread_id = None;
    }
}

fn clear_thread_messages(state: &mut SyncState, thread_id: &str) {
    if let Some(ids) = state.thread_messages.insert(thread_id.to_string(), Vec::new()) {
        for id in ids {
            state.messages.remove(&id);
        }
    }
}
