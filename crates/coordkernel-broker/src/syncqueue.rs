// coordkernel-broker/src/syncqueue.rs
// ============================================================================
// Module: Sync Queue
// Description: Mirror-write retry queue with exponential backoff and an
//              abandon threshold.
// Purpose: Let the dispatch module hand off a failed side effect instead of
//          failing the caller's request, and retry it on a control-loop cadence.
// Dependencies: coordkernel-core
// ============================================================================

//! ## Overview
//! When a side effect tied to `create_task`/`complete_task` fails (a mirror
//! write to an external system, distinct from the document write itself),
//! the dispatch module enqueues a [`SyncQueueEntry`] instead of failing the
//! caller's request. A control loop later drains the queue with
//! [`process_once`], retrying each entry through a caller-supplied
//! [`SyncExecutor`]. An entry that exhausts [`MAX_RETRIES`] attempts is
//! marked abandoned rather than retried forever.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use coordkernel_core::DocPath;
use coordkernel_core::DocumentStore;
use coordkernel_core::Query;
use coordkernel_core::SortOrder;
use coordkernel_core::StoreError;
use coordkernel_core::TenantUid;
use coordkernel_core::Timestamp;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

/// Retries allowed before an entry is marked abandoned (spec: 5).
pub const MAX_RETRIES: u32 = 5;

// ============================================================================
// SECTION: Queue Entry
// ============================================================================

/// One pending mirror-write retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncQueueEntry {
    /// Unique id of this queue entry, also its document id.
    pub id: String,
    /// Names the mirror operation for the executor to dispatch on.
    pub operation: String,
    /// Arbitrary JSON payload the executor needs to replay the operation.
    pub payload: Value,
    /// Attempts made so far.
    #[serde(default)]
    pub retry_count: u32,
    /// Error text from the most recent failed attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// When this entry was first enqueued; processing orders by this after
    /// `retry_count`, so older entries at the same retry tier go first.
    pub enqueued_at: Timestamp,
}

// ============================================================================
// SECTION: Executor
// ============================================================================

/// Executes one queued mirror operation. Implemented by the caller that
/// knows what `operation` strings mean (the dispatch module, in practice).
#[async_trait]
pub trait SyncExecutor: Send + Sync {
    /// Attempts the mirror write described by `entry`.
    ///
    /// # Errors
    /// Returns an error description on failure; the queue processor records
    /// it as `last_error` and retries on a later pass.
    async fn execute(&self, entry: &SyncQueueEntry) -> Result<(), String>;
}

// ============================================================================
// SECTION: Enqueue
// ============================================================================

/// Enqueues a new mirror-write retry for `tenant`.
///
/// # Errors
/// Returns [`StoreError`] on a storage failure.
pub async fn enqueue(
    store: &dyn DocumentStore,
    tenant: &TenantUid,
    entry: SyncQueueEntry,
) -> Result<(), StoreError> {
    let path = DocPath::tenant_scoped(tenant, "sync_queue", &entry.id);
    let value = serde_json::to_value(&entry).map_err(|err| StoreError::Codec(err.to_string()))?;
    store.put_value(&path, value).await
}

// ============================================================================
// SECTION: Processing
// ============================================================================

/// Outcome of one control-loop pass over a tenant's sync queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncQueueReport {
    /// Entries that succeeded and were removed (`SYNC_RECONCILED`).
    pub reconciled: u32,
    /// Entries that failed but remain queued for another attempt.
    pub retried: u32,
    /// Entries that exhausted their retries and were abandoned.
    pub abandoned: u32,
}

impl SyncQueueReport {
    /// Folds another report's counts into this one.
    fn merge(&mut self, other: Self) {
        self.reconciled += other.reconciled;
        self.retried += other.retried;
        self.abandoned += other.abandoned;
    }
}

/// Drains up to `batch_size` pending entries for `tenant`, ordered by
/// `(retry_count, enqueued_at)` so entries that have failed the least, or
/// failed longest ago, go first.
///
/// # Errors
/// Returns [`StoreError`] if the queue cannot be read or written.
pub async fn process_once(
    store: &Arc<dyn DocumentStore>,
    executor: &dyn SyncExecutor,
    tenant: &TenantUid,
    batch_size: u32,
) -> Result<SyncQueueReport, StoreError> {
    let collection_path = format!("tenants/{tenant}/sync_queue");
    let query = Query::new()
        .order_by("retry_count", SortOrder::Asc)
        .limited(batch_size);
    let pending = store.query_values(&collection_path, &query).await?;
    let mut report = SyncQueueReport::default();
    for raw in pending {
        let entry: SyncQueueEntry =
            serde_json::from_value(raw).map_err(|err| StoreError::Codec(err.to_string()))?;
        report.merge(process_entry(store, executor, tenant, entry).await?);
    }
    Ok(report)
}

/// Attempts one entry and applies the retry/abandon transition.
async fn process_entry(
    store: &Arc<dyn DocumentStore>,
    executor: &dyn SyncExecutor,
    tenant: &TenantUid,
    mut entry: SyncQueueEntry,
) -> Result<SyncQueueReport, StoreError> {
    let path = DocPath::tenant_scoped(tenant, "sync_queue", &entry.id);
    match executor.execute(&entry).await {
        Ok(()) => {
            store.delete(&path).await?;
            Ok(SyncQueueReport {
                reconciled: 1,
                ..SyncQueueReport::default()
            })
        }
        Err(message) => {
            entry.retry_count += 1;
            entry.last_error = Some(message);
            if entry.retry_count >= MAX_RETRIES {
                let abandoned_path = DocPath::tenant_scoped(tenant, "sync_queue_abandoned", &entry.id);
                let value =
                    serde_json::to_value(&entry).map_err(|err| StoreError::Codec(err.to_string()))?;
                store.put_value(&abandoned_path, value).await?;
                store.delete(&path).await?;
                Ok(SyncQueueReport {
                    abandoned: 1,
                    ..SyncQueueReport::default()
                })
            } else {
                let value =
                    serde_json::to_value(&entry).map_err(|err| StoreError::Codec(err.to_string()))?;
                store.put_value(&path, value).await?;
                Ok(SyncQueueReport {
                    retried: 1,
                    ..SyncQueueReport::default()
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use coordkernel_core::InMemoryDocumentStore;

    use super::*;

    struct AlwaysFails;

    #[async_trait]
    impl SyncExecutor for AlwaysFails {
        async fn execute(&self, _entry: &SyncQueueEntry) -> Result<(), String> {
            Err("mirror endpoint unreachable".to_string())
        }
    }

    struct AlwaysSucceeds;

    #[async_trait]
    impl SyncExecutor for AlwaysSucceeds {
        async fn execute(&self, _entry: &SyncQueueEntry) -> Result<(), String> {
            Ok(())
        }
    }

    fn entry(id: &str) -> SyncQueueEntry {
        SyncQueueEntry {
            id: id.to_string(),
            operation: "task_mirror".to_string(),
            payload: Value::Null,
            retry_count: 0,
            last_error: None,
            enqueued_at: Timestamp::from_unix_millis(0),
        }
    }

    #[tokio::test]
    async fn a_succeeding_executor_reconciles_and_removes_the_entry() {
        let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
        let tenant = TenantUid::new("acme");
        enqueue(&*store, &tenant, entry("q1")).await.expect("enqueue");
        let report = process_once(&store, &AlwaysSucceeds, &tenant, 10).await.expect("process");
        assert_eq!(report, SyncQueueReport {
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

    #[tokio::test]
    async fn a_failing_executor_retries_until_the_abandon_threshold() {
        let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
        let tenant = TenantUid::new("acme");
        enqueue(&*store, &tenant, entry("q1")).await.expect("enqueue");
        for attempt in 1..=MAX_RETRIES {
            let report = process_once(&store, &AlwaysFails, &tenant, 10).await.expect("process");
            if attempt < MAX_RETRIES {
                assert_eq!(report, SyncQueueReport {
                    reconciled: 0,
                    retried: 1,
                    abandoned: 0,
                });
            } else {
                assert_eq!(report, SyncQueueReport {
                    reconciled: 0,
                    retried: 0,
                    abandoned: 1,
                });
            }
        }
        let remaining = store
            .query_values(&format!("tenants/{tenant}/sync_queue"), &Query::new())
            .await
            .expect("query");
        assert!(remaining.is_empty());
        let abandoned = store
            .query_values(&format!("tenants/{tenant}/sync_queue_abandoned"), &Query::new())
            .await
            .expect("query");
        assert_eq!(abandoned.len(), 1);
    }
}
