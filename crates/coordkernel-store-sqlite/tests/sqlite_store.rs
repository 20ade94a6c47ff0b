// coordkernel-store-sqlite/tests/sqlite_store.rs
// ============================================================================
// Module: SQLite Document Store Integration Tests
// Description: End-to-end coverage of the durable DocumentStore adapter.
// Purpose: Exercise concurrency, persistence, and size-limit behavior.
// ============================================================================

//! End-to-end coverage of the durable DocumentStore adapter, exercising
//! concurrency, persistence, and size-limit behavior.

use std::sync::Arc;

use coordkernel_core::DocPath;
use coordkernel_core::DocumentStore;
use coordkernel_core::TenantUid;
use coordkernel_store_sqlite::MAX_DOCUMENT_BYTES;
use coordkernel_store_sqlite::SqliteDocumentStore;
use coordkernel_store_sqlite::SqliteStoreConfig;
use coordkernel_store_sqlite::SqliteStoreMode;
use coordkernel_store_sqlite::SqliteSyncMode;
use serde_json::json;
use tempfile::tempdir;

fn config(dir: &tempfile::TempDir) -> SqliteStoreConfig {
    SqliteStoreConfig {
        path: dir.path().join("coordkernel.sqlite3"),
        busy_timeout_ms: 2_000,
        journal_mode: SqliteStoreMode::Wal,
        sync_mode: SqliteSyncMode::Normal,
    }
}

#[tokio::test]
async fn concurrent_increments_on_the_same_counter_never_lose_an_update() {
    let dir = tempdir().expect("tempdir");
    let store = Arc::new(SqliteDocumentStore::open(&config(&dir)).expect("open store"));
    let path = DocPath::global("usage", "2026-08");
    let mut handles = Vec::new();
    for _ in 0..20 {
        let store = Arc::clone(&store);
        let path = path.clone();
        handles.push(tokio::spawn(async move {
            store.increment(&path, "tasks_created", 1).await.expect("increment")
        }));
    }
    for handle in handles {
        handle.await.expect("join");
    }
    let doc = store.get_value(&path).await.expect("get");
    assert_eq!(doc["tasks_created"], 20);
}

#[tokio::test]
async fn concurrent_compare_and_swap_delivers_a_message_exactly_once() {
    let dir = tempdir().expect("tempdir");
    let store = Arc::new(SqliteDocumentStore::open(&config(&dir)).expect("open store"));
    let path = DocPath::global("relay", "m1");
    store.put_value(&path, json!({"status": "pending"})).await.expect("put");
    let mut handles = Vec::new();
    for _ in 0..10 {
        let store = Arc::clone(&store);
        let path = path.clone();
        handles.push(tokio::spawn(async move {
            store
                .compare_and_swap_field(&path, "status", &json!("pending"), json!("delivered"))
                .await
                .expect("cas")
        }));
    }
    let mut wins = 0;
    for handle in handles {
        if handle.await.expect("join") {
            wins += 1;
        }
    }
    assert_eq!(wins, 1, "exactly one concurrent poller should win the delivery race");
}

#[tokio::test]
async fn documents_larger_than_the_size_limit_are_rejected() {
    let dir = tempdir().expect("tempdir");
    let store = SqliteDocumentStore::open(&config(&dir)).expect("open store");
    let path = DocPath::global("blobs", "oversized");
    let oversized = "x".repeat(MAX_DOCUMENT_BYTES + 1);
    let result = store.put_value(&path, json!({ "payload": oversized })).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn tenant_scoped_and_global_paths_coexist() {
    let dir = tempdir().expect("tempdir");
    let store = SqliteDocumentStore::open(&config(&dir)).expect("open store");
    let tenant = TenantUid::new("acme");
    store
        .put_value(&DocPath::tenant_scoped(&tenant, "tasks", "t1"), json!({"status": "created"}))
        .await
        .expect("put tenant-scoped");
    store
        .put_value(&DocPath::global("apiKeys", "cb_abc123"), json!({"program_id": "p1"}))
        .await
        .expect("put global");
    let tenant_doc =
        store.get_value(&DocPath::tenant_scoped(&tenant, "tasks", "t1")).await.expect("get");
    let global_doc = store.get_value(&DocPath::global("apiKeys", "cb_abc123")).await.expect("get");
    assert_eq!(tenant_doc["status"], "created");
    assert_eq!(global_doc["program_id"], "p1");
}

#[tokio::test]
async fn reopening_after_drop_preserves_every_collection() {
    let dir = tempdir().expect("tempdir");
    let cfg = config(&dir);
    {
        let store = SqliteDocumentStore::open(&cfg).expect("open store");
        store
            .put_value(&DocPath::global("sessions", "sess-1"), json!({"program_id": "p1"}))
            .await
            .expect("put");
    }
    let reopened = SqliteDocumentStore::open(&cfg).expect("reopen store");
    let doc = reopened.get_value(&DocPath::global("sessions", "sess-1")).await.expect("get");
    assert_eq!(doc["program_id"], "p1");
}
