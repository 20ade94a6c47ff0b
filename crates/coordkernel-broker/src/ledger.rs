// coordkernel-broker/src/ledger.rs
// ============================================================================
// Module: Fire-and-Forget Ledger Writer
// Description: Background writer for ledger, claim-event, and analytics records.
// Purpose: Let the gate and entity modules record audit/cost/analytics data
//          without blocking the caller on a store round trip.
// Dependencies: coordkernel-core, tokio
// ============================================================================

//! ## Overview
//! The gate and the dispatch/relay/pulse modules write three append-only
//! record kinds on every call: a ledger entry, an optional claim event, and
//! an analytics event. None of these writes may block the caller or fail
//! the request: a full channel or a store error simply increments a dropped
//! counter the caller can surface through an operational-metrics read later.
//! This mirrors the channel-backed, `try_send`-based delivery the dispatch
//! sinks use elsewhere in this workspace, generalized from one sink per
//! record kind to one bounded channel shared by all three.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use coordkernel_core::AnalyticsEvent;
use coordkernel_core::ClaimEvent;
use coordkernel_core::DocPath;
use coordkernel_core::DocumentStore;
use coordkernel_core::LedgerEntry;
use coordkernel_core::TenantUid;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

// ============================================================================
// SECTION: Records
// ============================================================================

/// One fire-and-forget record queued for durable storage.
#[derive(Debug, Clone)]
pub enum LedgerRecord {
    /// A per-tool-call cost or audit entry.
    Ledger {
        /// Tenant the entry belongs to.
        tenant: TenantUid,
        /// The entry itself.
        entry: LedgerEntry,
    },
    /// A claim contention-metrics record.
    Claim {
        /// Tenant the event belongs to.
        tenant: TenantUid,
        /// The event itself.
        event: ClaimEvent,
    },
    /// A metadata-only analytics event.
    Analytics {
        /// Tenant the event belongs to.
        tenant: TenantUid,
        /// The event itself.
        event: AnalyticsEvent,
    },
}

// ============================================================================
// SECTION: Counters
// ============================================================================

/// Shared counters surfaced through `get_operational_metrics`.
#[derive(Debug, Default)]
struct Counters {
    /// Records the background task successfully persisted.
    written: AtomicU64,
    /// Records dropped because the channel was full.
    queue_dropped: AtomicU64,
    /// Records the store rejected on write.
    store_failed: AtomicU64,
}

/// A point-in-time read of the writer's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LedgerWriterStats {
    /// Records successfully persisted.
    pub written: u64,
    /// Records dropped because the queue was full.
    pub queue_dropped: u64,
    /// Records the store rejected on write.
    pub store_failed: u64,
}

// ============================================================================
// SECTION: Writer Handle
// ============================================================================

/// Non-blocking handle used by call sites to enqueue a record.
#[derive(Clone)]
pub struct LedgerWriter {
    /// Sender into the background drain task.
    sender: mpsc::Sender<LedgerRecord>,
    /// Counters shared with the drain task.
    counters: Arc<Counters>,
}

impl LedgerWriter {
    /// Enqueues `record`. Never blocks; a full queue increments
    /// `queue_dropped` instead of applying backpressure to the caller.
    pub fn record(&self, record: LedgerRecord) {
        if self.sender.try_send(record).is_err() {
            self.counters.queue_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Returns a snapshot of the writer's counters.
    #[must_use]
    pub fn stats(&self) -> LedgerWriterStats {
        LedgerWriterStats {
            written: self.counters.written.load(Ordering::Relaxed),
            queue_dropped: self.counters.queue_dropped.load(Ordering::Relaxed),
            store_failed: self.counters.store_failed.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// SECTION: Drain Task
// ============================================================================

/// Counter used to keep generated document ids unique within a process.
static RECORD_SEQ: AtomicU64 = AtomicU64::new(0);

/// Spawns the background task that drains the channel into `store`, and
/// returns a [`LedgerWriter`] handle plus the task's join handle.
///
/// `capacity` bounds the channel: callers under sustained write pressure
/// degrade to dropped records rather than unbounded memory growth.
pub fn spawn_ledger_writer(
    store: Arc<dyn DocumentStore>,
    capacity: usize,
) -> (LedgerWriter, JoinHandle<()>) {
    let (sender, mut receiver) = mpsc::channel(capacity);
    let counters = Arc::new(Counters::default());
    let task_counters = Arc::clone(&counters);
    let handle = tokio::spawn(async move {
        while let Some(record) = receiver.recv().await {
            let path = record_path(&record);
            let value = record_body(&record);
            match store.put_value(&path, value).await {
                Ok(()) => {
                    task_counters.written.fetch_add(1, Ordering::Relaxed);
                }
                Err(_) => {
                    task_counters.store_failed.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    });
    (
        LedgerWriter {
            sender,
            counters,
        },
        handle,
    )
}

/// Picks the collection and id for one record, keeping ledger, claim, and
/// analytics entries in their own per-tenant collections.
fn record_path(record: &LedgerRecord) -> DocPath {
    let seq = RECORD_SEQ.fetch_add(1, Ordering::Relaxed);
    match record {
        LedgerRecord::Ledger {
            tenant,
            ..
        } => DocPath::tenant_scoped(tenant, "ledger", &format!("entry-{seq}")),
        LedgerRecord::Claim {
            tenant,
            event,
        } => DocPath::tenant_scoped(tenant, "claim_events", event.id.as_str()),
        LedgerRecord::Analytics {
            tenant,
            ..
        } => DocPath::tenant_scoped(tenant, "analytics_events", &format!("event-{seq}")),
    }
}

/// Extracts the serializable body for one record, discarding the tenant tag
/// now that it has been folded into the document path.
fn record_body(record: &LedgerRecord) -> serde_json::Value {
    match record {
        LedgerRecord::Ledger {
            entry,
            ..
        } => serde_json::to_value(entry).unwrap_or_default(),
        LedgerRecord::Claim {
            event,
            ..
        } => serde_json::to_value(event).unwrap_or_default(),
        LedgerRecord::Analytics {
            event,
            ..
        } => serde_json::to_value(event).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use coordkernel_core::AnalyticsEventType;
    use coordkernel_core::InMemoryDocumentStore;
    use coordkernel_core::ProgramId;
    use coordkernel_core::Timestamp;

    use super::*;

    fn tenant() -> TenantUid {
        TenantUid::new("acme")
    }

    #[tokio::test]
    async fn recorded_analytics_event_is_persisted() {
        let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
        let (writer, _handle) = spawn_ledger_writer(Arc::clone(&store), 16);
        writer.record(LedgerRecord::Analytics {
            tenant: tenant(),
            event: AnalyticsEvent {
                event_type: AnalyticsEventType::TaskLifecycle,
                program_id: ProgramId::new("builder-1"),
                session_id: None,
                tool: "create_task".to_string(),
                metadata: std::collections::BTreeMap::new(),
                timestamp: Timestamp::from_unix_millis(0),
            },
        });
        for _ in 0..50 {
            if writer.stats().written == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(writer.stats(), LedgerWriterStats {
            written: 1,
            queue_dropped: 0,
            store_failed: 0,
        });
        let scan = store
            .collection_group_scan_values("analytics_events", &coordkernel_core::Query::new())
            .await
            .expect("scan");
        assert_eq!(scan.len(), 1);
    }

    #[test]
    fn fresh_stats_are_zero() {
        let counters = Counters::default();
        assert_eq!(counters.written.load(Ordering::Relaxed), 0);
        assert_eq!(counters.queue_dropped.load(Ordering::Relaxed), 0);
        assert_eq!(counters.store_failed.load(Ordering::Relaxed), 0);
    }
}
