// coordkernel-broker/tests/broker_integration.rs
// ============================================================================
// Module: Broker Integration Tests
// Description: Cross-module coverage of the ledger writer and sync queue
//              against a shared store.
// Purpose: Exercise the two background-processing paths end to end.
// ============================================================================

//! Cross-module coverage of the ledger writer and sync queue against a
//! shared store, exercising the two background-processing paths end to end.

use std::sync::Arc;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use coordkernel_broker::LedgerRecord;
use coordkernel_broker::SyncExecutor;
use coordkernel_broker::SyncQueueEntry;
use coordkernel_broker::SyncQueueReport;
use coordkernel_broker::enqueue;
use coordkernel_broker::process_once;
use coordkernel_broker::spawn_ledger_writer;
use coordkernel_core::DocumentStore;
use coordkernel_core::InMemoryDocumentStore;
use coordkernel_core::LedgerEntry;
use coordkernel_core::LedgerEntryType;
use coordkernel_core::ProgramId;
use coordkernel_core::Query;
use coordkernel_core::TenantUid;
use coordkernel_core::Timestamp;
use serde_json::Value;

fn tenant() -> TenantUid {
    TenantUid::new("acme")
}

fn cost_entry() -> LedgerEntry {
    LedgerEntry {
        entry_type: LedgerEntryType::Cost,
        tool: "create_task".to_string(),
        program_id: ProgramId::new("builder-1"),
        endpoint: "mcp".to_string(),
        session_id: None,
        duration_ms: 12,
        success: true,
        error: None,
        correlation_id: "corr-1".into(),
        reason: None,
        timestamp: Timestamp::from_unix_millis(0),
    }
}

#[tokio::test]
async fn ledger_records_survive_a_channel_round_trip_into_the_store() {
    let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
    let (writer, _handle) = spawn_ledger_writer(Arc::clone(&store), 8);
    writer.record(LedgerRecord::Ledger {
        tenant: tenant(),
        entry: cost_entry(),
    });
    for _ in 0..50 {
        if writer.stats().written == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(writer.stats().written, 1);
    let entries = store
        .query_values(&format!("tenants/{}/ledger", tenant()), &Query::new())
        .await
        .expect("query");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["tool"], "create_task");
}

struct FlakyExecutor {
    failures_remaining: AtomicU32,
}

#[async_trait]
impl SyncExecutor for FlakyExecutor {
    async fn execute(&self, _entry: &SyncQueueEntry) -> Result<(), String> {
        if self.failures_remaining.fetch_sub(1, Ordering::Relaxed) > 0 {
            Err("mirror endpoint timed out".to_string())
        } else {
            Ok(())
        }
    }
}

#[tokio::test]
async fn a_sync_queue_entry_reconciles_after_its_flakiness_subsides() {
    let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
    let tenant = tenant();
    enqueue(&*store, &tenant, SyncQueueEntry {
        id: "mirror-1".to_string(),
        operation: "task_mirror".to_string(),
        payload: Value::Null,
        retry_count: 0,
        last_error: None,
        enqueued_at: Timestamp::from_unix_millis(0),
    })
    .await
    .expect("enqueue");

    let executor = FlakyExecutor {
        failures_remaining: AtomicU32::new(2),
    };

    let first = process_once(&store, &executor, &tenant, 10).await.expect("process");
    assert_eq!(first, SyncQueueReport {
        reconciled: 0,
        retried: 1,
        abandoned: 0,
    });
    let second = process_once(&store, &executor, &tenant, 10).await.expect("process");
    assert_eq!(second, SyncQueueReport {
        reconciled: 0,
        retried: 1,
        abandoned: 0,
    });
    let third = process_once(&store, &executor, &tenant, 10).await.expect("process");
    assert_eq!(third, SyncQueueReport {
        reconciled: 1,
        retried: 0,
        abandoned: 0,
    });
    let remaining = store
        .query_values(&format!("tenants/{tenant}/sync_queue"), &Query::new())
        .await
        .expect("query");
    assert!(remaining.is_empty());
}
