//! End-to-end engine scenarios against mock collaborators.

mod common;

use std::sync::Arc;

use driftsync::adapters::{JsonFileCache, MemoryCacheStore, MemoryCoordination, MockRemoteBridge};
use driftsync::engine::SyncEngine;
use driftsync::error::SyncError;
use driftsync::models::ThreadPatch;

use common::{engine_with, fast_config, wait_for};

#[tokio::test]
async fn test_offline_send_drains_on_reconnect() {
    let bridge = MockRemoteBridge::new();
    let cache = MemoryCacheStore::new();
    let coordination = MemoryCoordination::new();
    let engine = engine_with(&bridge, &cache, &coordination);
    engine.open().await;

    let thread = engine
        .create_thread("Offline chat", "anthropic", "claude-3")
        .await
        .unwrap();
    engine.set_online(false);

    let provisional = engine.send_message(&thread.id, "hi").await.unwrap();
    assert!(provisional.is_optimistic);
    assert_eq!(engine.snapshot().pending_operations.len(), 1);

    engine.set_online(true);
    let drained = wait_for(|| engine.snapshot().pending_operations.is_empty()).await;
    assert!(drained, "queue should drain after reconnect");

    let snapshot = engine.snapshot();
    let messages = &snapshot.messages_by_thread[&thread.id];
    let count = messages.iter().filter(|m| m.content == "hi").count();
    assert_eq!(count, 1, "optimistic message reconciled without duplicate");

    engine.close().await;
}

#[tokio::test]
async fn test_thread_isolation_across_selects() {
    let bridge = MockRemoteBridge::new();
    let cache = MemoryCacheStore::new();
    let coordination = MemoryCoordination::new();
    let engine = engine_with(&bridge, &cache, &coordination);
    engine.open().await;

    let a = engine
        .create_thread("Thread A", "anthropic", "claude-3")
        .await
        .unwrap();
    let b = engine
        .create_thread("Thread B", "anthropic", "claude-3")
        .await
        .unwrap();
    engine.send_message(&a.id, "message in a").await.unwrap();
    engine.send_message(&b.id, "message in b").await.unwrap();

    engine.select_thread(Some(a.id.clone())).await.unwrap();
    engine.select_thread(Some(b.id.clone())).await.unwrap();

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.selected_thread_id.as_deref(), Some(b.id.as_str()));
    for message in &snapshot.messages_by_thread[&b.id] {
        assert_eq!(message.thread_id, b.id, "no cross-thread leakage");
    }
    assert!(
        snapshot
            .messages_by_thread
            .get(&a.id)
            .map(|m| m.is_empty())
            .unwrap_or(true),
        "previously selected thread's cache is cleared"
    );

    engine.close().await;
}

#[tokio::test]
async fn test_rejected_create_thread_rejects_caller() {
    let bridge = MockRemoteBridge::new();
    let cache = MemoryCacheStore::new();
    let coordination = MemoryCoordination::new();
    let engine = engine_with(&bridge, &cache, &coordination);
    engine.open().await;

    bridge.push_failure(SyncError::Rejected {
        status: 403,
        message: "forbidden".to_string(),
    });
    let err = engine
        .create_thread("Nope", "anthropic", "claude-3")
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Rejected { status: 403, .. }));
    assert!(engine.snapshot().threads.is_empty());

    engine.close().await;
}

#[tokio::test]
async fn test_concurrent_updates_settle_by_write_key() {
    let bridge = MockRemoteBridge::new();
    let cache = MemoryCacheStore::new();
    let coordination = MemoryCoordination::new();
    let engine = engine_with(&bridge, &cache, &coordination);
    engine.open().await;

    let thread = engine
        .create_thread("Chat", "anthropic", "claude-3")
        .await
        .unwrap();

    for model in ["a", "b", "c"] {
        engine
            .update_thread(
                &thread.id,
                ThreadPatch {
                    model: Some(model.to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }

    let snapshot = engine.snapshot();
    let updated = snapshot.threads.iter().find(|t| t.id == thread.id).unwrap();
    assert_eq!(updated.model, "c", "last applied write wins");
    assert!(updated.version > thread.version, "version is monotonic");

    engine.close().await;
}

#[tokio::test]
async fn test_restart_resumes_persisted_queue() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = MockRemoteBridge::new();
    let coordination = MemoryCoordination::new();

    // First run: go offline, queue a message, shut down.
    {
        let cache = JsonFileCache::new(dir.path()).unwrap();
        let engine = SyncEngine::new(
            fast_config(),
            Arc::new(bridge.clone()),
            Arc::new(cache),
            Arc::new(coordination.clone()),
        );
        engine.open().await;

        let thread = engine
            .create_thread("Persistent", "anthropic", "claude-3")
            .await
            .unwrap();
        engine.set_online(false);
        engine.send_message(&thread.id, "survives restart").await.unwrap();
        assert_eq!(engine.snapshot().pending_operations.len(), 1);

        engine.close().await;
    }
    assert_eq!(bridge.call_count("create_message"), 0);

    // Second run over the same cache directory: queue restored and drained.
    {
        let cache = JsonFileCache::new(dir.path()).unwrap();
        let engine = SyncEngine::new(
            fast_config(),
            Arc::new(bridge.clone()),
            Arc::new(cache),
            Arc::new(coordination.clone()),
        );
        engine.open().await;

        let drained = wait_for(|| engine.snapshot().pending_operations.is_empty()).await;
        assert!(drained, "restored queue should drain");
        assert_eq!(bridge.call_count("create_message"), 1);

        engine.close().await;
    }
}

#[tokio::test]
async fn test_selected_thread_restored_from_cache() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = MockRemoteBridge::new();
    let coordination = MemoryCoordination::new();

    let thread_id = {
        let cache = JsonFileCache::new(dir.path()).unwrap();
        let engine = SyncEngine::new(
            fast_config(),
            Arc::new(bridge.clone()),
            Arc::new(cache),
            Arc::new(coordination.clone()),
        );
        engine.open().await;
        let thread = engine
            .create_thread("Selected", "anthropic", "claude-3")
            .await
            .unwrap();
        engine.select_thread(Some(thread.id.clone())).await.unwrap();
        engine.close().await;
        thread.id
    };

    let cache = JsonFileCache::new(dir.path()).unwrap();
    let engine = SyncEngine::new(
        fast_config(),
        Arc::new(bridge.clone()),
        Arc::new(cache),
        Arc::new(coordination),
    );
    engine.open().await;
    assert_eq!(
        engine.snapshot().selected_thread_id.as_deref(),
        Some(thread_id.as_str())
    );
    engine.close().await;
}
