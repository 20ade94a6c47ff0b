// coordkernel-server/src/control_loops.rs
// ============================================================================
// Module: Control Loops
// Description: Background janitorial sweeps: wake daemon, orphan revival,
//              dream timeout, relay expiry/dead-letter, stale sessions,
//              sync-queue retry.
// Purpose: spec.md §4.12.
// Dependencies: coordkernel-core, coordkernel-broker
// ============================================================================

//! ## Overview
//! Per spec.md §4.12, these loops are not self-scheduled: "one external
//! scheduler invokes internal endpoints on fixed crons, each authenticated
//! with an internal bearer secret." Each function here is one such endpoint's
//! handler body — idempotent, bounded by `batch_size`, and called once per
//! invocation rather than looping internally. [`crate::transport::rest`]
//! wires these behind bearer-gated routes. Every loop returns a
//! [`ControlLoopReport`] rather than logging directly, so a caller can print
//! or aggregate it without this module depending on a logging framework.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use coordkernel_broker::LedgerRecord;
use coordkernel_broker::LedgerWriter;
use coordkernel_broker::SyncExecutor;
use coordkernel_core::AnalyticsEvent;
use coordkernel_core::AnalyticsEventType;
use coordkernel_core::DocPath;
use coordkernel_core::DocumentStore;
use coordkernel_core::EntityKind;
use coordkernel_core::ProgramId;
use coordkernel_core::Query;
use coordkernel_core::RelayMessage;
use coordkernel_core::RelayStatus;
use coordkernel_core::Session;
use coordkernel_core::Status;
use coordkernel_core::Task;
use coordkernel_core::TaskBody;
use coordkernel_core::TenantUid;
use coordkernel_core::Timestamp;
use coordkernel_core::core::relay::DEFAULT_TTL_SECONDS;
use coordkernel_core::transition;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::error::GateError;

// ============================================================================
// SECTION: Report
// ============================================================================

/// Outcome of one control-loop invocation.
#[derive(Debug, Clone, Default)]
pub struct ControlLoopReport {
    /// Documents examined this run.
    pub documents_scanned: u32,
    /// Documents actually mutated this run.
    pub documents_mutated: u32,
    /// Per-document error text; a failure here does not abort the rest of the batch.
    pub errors: Vec<String>,
}

impl ControlLoopReport {
    pub(crate) fn merge(&mut self, other: Self) {
        self.documents_scanned += other.documents_scanned;
        self.documents_mutated += other.documents_mutated;
        self.errors.extend(other.errors);
    }
}

// ============================================================================
// SECTION: Collection-Group Scan Helper
// ============================================================================

async fn scan_typed<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    collection_name: &str,
    query: &Query,
) -> Result<Vec<(TenantUid, T)>, GateError> {
    let raw = store.collection_group_scan_values(collection_name, query).await?;
    raw.into_iter()
        .map(|(tenant, value)| {
            serde_json::from_value(value)
                .map(|parsed| (tenant, parsed))
                .map_err(|err| GateError::Store(coordkernel_core::StoreError::Codec(err.to_string())))
        })
        .collect()
}

async fn record_event(
    ledger: &LedgerWriter,
    tenant: &TenantUid,
    event_type: AnalyticsEventType,
    tool: &str,
    program_id: &str,
    metadata: BTreeMap<String, String>,
    now: Timestamp,
) {
    ledger.record(LedgerRecord::Analytics {
        tenant: tenant.clone(),
        event: AnalyticsEvent {
            event_type,
            program_id: ProgramId::new(program_id),
            session_id: None,
            tool: tool.to_string(),
            metadata,
            timestamp: now,
        },
    });
}

// ============================================================================
// SECTION: 4.12.2 Orphan Revival
// ============================================================================

const ORPHAN_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Reverts active tasks whose claiming session has gone silent for 30
/// minutes back to `created`, clearing the claim fields.
///
/// # Errors
/// Returns [`GateError::Store`] on a storage failure.
pub async fn orphan_revival(
    store: &dyn DocumentStore,
    ledger: &LedgerWriter,
    batch_size: u32,
) -> Result<ControlLoopReport, GateError> {
    let now = store.server_timestamp();
    let query = Query::new().with_eq("status", json!(Status::Active)).limited(batch_size);
    let candidates: Vec<(TenantUid, Task)> = scan_typed(store, "tasks", &query).await?;

    let mut report = ControlLoopReport {
        documents_scanned: u32::try_from(candidates.len()).unwrap_or(u32::MAX),
        ..ControlLoopReport::default()
    };
    for (tenant, mut task) in candidates {
        let Some(last_heartbeat) = task.last_heartbeat else {
            continue;
        };
        if !last_heartbeat.plus(ORPHAN_HEARTBEAT_TIMEOUT).is_before(now) {
            continue;
        }
        task.status = match transition(EntityKind::Task, task.status, Status::Created) {
            Ok(status) => status,
            Err(err) => {
                report.errors.push(err.to_string());
                continue;
            }
        };
        task.session_id = None;
        task.started_at = None;
        task.last_heartbeat = None;
        task.revert_reason = Some("heartbeat_timeout".to_string());
        let path = DocPath::tenant_scoped(&tenant, "tasks", task.id.as_str());
        coordkernel_core::put_typed(store, &path, &task).await?;
        report.documents_mutated += 1;
        record_event(
            ledger,
            &tenant,
            AnalyticsEventType::TaskLifecycle,
            "orphan_revival",
            task.envelope.target.as_str(),
            BTreeMap::from([("event".to_string(), "TASK_REVIVED".to_string())]),
            now,
        )
        .await;
    }
    Ok(report)
}

// ============================================================================
// SECTION: 4.12.3 Dream Timeout Enforcement
// ============================================================================

/// Fails active dreams whose `started_at + timeout_hours` has passed.
///
/// # Errors
/// Returns [`GateError::Store`] on a storage failure.
pub async fn dream_timeout_enforcement(
    store: &dyn DocumentStore,
    ledger: &LedgerWriter,
    batch_size: u32,
) -> Result<ControlLoopReport, GateError> {
    let now = store.server_timestamp();
    let query = Query::new()
        .with_eq("status", json!(Status::Active))
        .with_eq("type", json!("dream"))
        .limited(batch_size);
    let candidates: Vec<(TenantUid, Task)> = scan_typed(store, "tasks", &query).await?;

    let mut report = ControlLoopReport {
        documents_scanned: u32::try_from(candidates.len()).unwrap_or(u32::MAX),
        ..ControlLoopReport::default()
    };
    for (tenant, mut task) in candidates {
        let TaskBody::Dream(block) = &task.body else {
            continue;
        };
        let Some(started_at) = task.started_at else {
            continue;
        };
        #[allow(clippy::cast_possible_truncation, reason = "timeout_hours is a small, caller-supplied config value")]
        let timeout = Duration::from_secs((block.timeout_hours * 3600.0) as u64);
        let deadline = started_at.plus(timeout);
        if !deadline.is_before(now) {
            continue;
        }
        let agent = block.agent.clone();
        task.status = match transition(EntityKind::Dream, task.status, Status::Failed) {
            Ok(status) => status,
            Err(err) => {
                report.errors.push(err.to_string());
                continue;
            }
        };
        if let TaskBody::Dream(block) = &mut task.body {
            block.outcome = Some("timed out".to_string());
        }
        let path = DocPath::tenant_scoped(&tenant, "tasks", task.id.as_str());
        coordkernel_core::put_typed(store, &path, &task).await?;
        report.documents_mutated += 1;
        record_event(
            ledger,
            &tenant,
            AnalyticsEventType::TaskLifecycle,
            "dream_timeout",
            &agent,
            BTreeMap::from([("event".to_string(), "DREAM_TIMED_OUT".to_string())]),
            now,
        )
        .await;
    }
    Ok(report)
}

// ============================================================================
// SECTION: 4.12.4 Relay Expiry
// ============================================================================

/// Three-way sweep over relay messages: expires pending messages past
/// `expires_at` or past the default TTL fallback, and deletes delivered
/// messages past twice the default TTL (retention cleanup). Deduplicates by
/// document path so a message matching more than one arm is only touched once.
///
/// # Errors
/// Returns [`GateError::Store`] on a storage failure.
pub async fn relay_expiry(
    store: &dyn DocumentStore,
    ledger: &LedgerWriter,
    batch_size: u32,
) -> Result<ControlLoopReport, GateError> {
    let now = store.server_timestamp();
    let mut report = ControlLoopReport::default();
    let mut touched: HashSet<String> = HashSet::new();

    let pending_query = Query::new().with_eq("status", json!(RelayStatus::Pending)).limited(batch_size);
    let pending: Vec<(TenantUid, RelayMessage)> = scan_typed(store, "relay", &pending_query).await?;
    report.documents_scanned += u32::try_from(pending.len()).unwrap_or(u32::MAX);
    for (tenant, mut message) in pending {
        let fallback_deadline = message.created_at.plus(Duration::from_secs(DEFAULT_TTL_SECONDS));
        if !message.is_expired(now) && !fallback_deadline.is_before(now) {
            continue;
        }
        let path = DocPath::tenant_scoped(&tenant, "relay", message.id.as_str());
        if !touched.insert(path.as_str().to_string()) {
            continue;
        }
        message.status = RelayStatus::Expired;
        coordkernel_core::put_typed(store, &path, &message).await?;
        report.documents_mutated += 1;
        record_event(
            ledger,
            &tenant,
            AnalyticsEventType::MessageLifecycle,
            "relay_expiry",
            message.envelope.target.as_str(),
            BTreeMap::from([("event".to_string(), "RELAY_EXPIRED".to_string())]),
            now,
        )
        .await;
    }

    let delivered_query = Query::new().with_eq("status", json!(RelayStatus::Delivered)).limited(batch_size);
    let delivered: Vec<(TenantUid, RelayMessage)> = scan_typed(store, "relay", &delivered_query).await?;
    report.documents_scanned += u32::try_from(delivered.len()).unwrap_or(u32::MAX);
    let retention = Duration::from_secs(2 * DEFAULT_TTL_SECONDS);
    for (tenant, message) in delivered {
        if !message.created_at.plus(retention).is_before(now) {
            continue;
        }
        let path = DocPath::tenant_scoped(&tenant, "relay", message.id.as_str());
        if !touched.insert(path.as_str().to_string()) {
            continue;
        }
        store.delete(&path).await?;
        report.documents_mutated += 1;
    }
    Ok(report)
}

// ============================================================================
// SECTION: 4.12.5 Dead-Letter Processing
// ============================================================================

/// A relay message that exhausted its delivery-attempt budget.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct DeadLetter {
    original: RelayMessage,
    original_path: String,
    dead_lettered_at: Timestamp,
}

const DEAD_LETTER_AGE_THRESHOLD: Duration = Duration::from_secs(60 * 60);

/// Bumps `delivery_attempts` on pending messages older than one hour;
/// messages that exhaust `max_delivery_attempts` move to the `dead_letters`
/// subcollection instead.
///
/// # Errors
/// Returns [`GateError::Store`] on a storage failure.
pub async fn dead_letter_processing(
    store: &dyn DocumentStore,
    ledger: &LedgerWriter,
    batch_size: u32,
) -> Result<ControlLoopReport, GateError> {
    let now = store.server_timestamp();
    let query = Query::new().with_eq("status", json!(RelayStatus::Pending)).limited(batch_size);
    let candidates: Vec<(TenantUid, RelayMessage)> = scan_typed(store, "relay", &query).await?;

    let mut report = ControlLoopReport {
        documents_scanned: u32::try_from(candidates.len()).unwrap_or(u32::MAX),
        ..ControlLoopReport::default()
    };
    for (tenant, mut message) in candidates {
        if !message.created_at.plus(DEAD_LETTER_AGE_THRESHOLD).is_before(now) {
            continue;
        }
        let path = DocPath::tenant_scoped(&tenant, "relay", message.id.as_str());
        if message.exhausted_delivery_attempts() {
            message.delivery_attempts += 1;
            let dead_letter = DeadLetter {
                original: message.clone(),
                original_path: path.as_str().to_string(),
                dead_lettered_at: now,
            };
            let dead_letter_path = DocPath::tenant_scoped(&tenant, "dead_letters", message.id.as_str());
            coordkernel_core::put_typed(store, &dead_letter_path, &dead_letter).await?;
            store.delete(&path).await?;
            report.documents_mutated += 1;
            record_event(
                ledger,
                &tenant,
                AnalyticsEventType::MessageLifecycle,
                "dead_letter_processing",
                message.envelope.target.as_str(),
                BTreeMap::from([("event".to_string(), "RELAY_DEAD_LETTERED".to_string())]),
                now,
            )
            .await;
        } else {
            message.delivery_attempts += 1;
            coordkernel_core::put_typed(store, &path, &message).await?;
            report.documents_mutated += 1;
        }
    }
    Ok(report)
}

// ============================================================================
// SECTION: 4.12.6 Stale Session Detector
// ============================================================================

const STALE_SESSION_THRESHOLD: Duration = Duration::from_secs(60 * 60);

/// Archives sessions whose heartbeat is older than the stale threshold.
///
/// # Errors
/// Returns [`GateError::Store`] on a storage failure.
pub async fn stale_session_detector(
    store: &dyn DocumentStore,
    batch_size: u32,
) -> Result<ControlLoopReport, GateError> {
    let now = store.server_timestamp();
    let query = Query::new().with_eq("archived", json!(false)).limited(batch_size);
    let candidates: Vec<(TenantUid, Session)> = scan_typed(store, "sessions", &query).await?;

    let mut report = ControlLoopReport {
        documents_scanned: u32::try_from(candidates.len()).unwrap_or(u32::MAX),
        ..ControlLoopReport::default()
    };
    for (tenant, mut session) in candidates {
        if !session.last_heartbeat.plus(STALE_SESSION_THRESHOLD).is_before(now) {
            continue;
        }
        session.archived = true;
        let path = DocPath::tenant_scoped(&tenant, "sessions", session.id.as_str());
        coordkernel_core::put_typed(store, &path, &session).await?;
        report.documents_mutated += 1;
    }
    Ok(report)
}

// ============================================================================
// SECTION: 4.12.7 Sync-Queue Processor
// ============================================================================

/// Drains each tenant's sync queue through `executor`, discovering tenants
/// via a collection-group scan rather than requiring a tenant list up front.
///
/// # Errors
/// Returns [`GateError::Store`] on a storage failure.
pub async fn sync_queue_processor(
    store: &std::sync::Arc<dyn DocumentStore>,
    executor: &dyn SyncExecutor,
    batch_size: u32,
) -> Result<ControlLoopReport, GateError> {
    let query = Query::new().limited(batch_size);
    let raw = store.collection_group_scan_values("sync_queue", &query).await?;
    let tenants: HashSet<TenantUid> = raw.into_iter().map(|(tenant, _value)| tenant).collect();

    let mut report = ControlLoopReport::default();
    for tenant in tenants {
        let queue_report = coordkernel_broker::process_once(store, executor, &tenant, batch_size).await?;
        report.documents_scanned += queue_report.reconciled + queue_report.retried + queue_report.abandoned;
        report.documents_mutated += queue_report.reconciled + queue_report.retried + queue_report.abandoned;
    }
    Ok(report)
}

// ============================================================================
// SECTION: 4.12.1 Wake Daemon
// ============================================================================

/// Host-listener integration the wake daemon probes and spawns against.
/// Kept as a trait so tests can supply a fake rather than reaching the network.
#[async_trait]
pub trait HostListener: Send + Sync {
    /// Probes the host-listener health endpoint.
    async fn probe_health(&self) -> bool;
    /// Requests that the host spawn a session for `target`.
    async fn spawn(&self, target: &str) -> Result<(), String>;
}

/// Consecutive-failure counter the wake daemon carries between invocations
/// so it can enter degraded mode after repeated health-probe failures.
#[derive(Debug, Default)]
pub struct WakeDaemonState {
    consecutive_failures: u32,
}

const DEGRADED_MODE_THRESHOLD: u32 = 3;

/// For each target with pending (`created`-status) tasks and no active
/// session, probes the host listener and requests a spawn. After three
/// consecutive health-probe failures, enters degraded mode and skips spawn
/// attempts until health recovers.
///
/// # Errors
/// Returns [`GateError::Store`] on a storage failure.
pub async fn wake_daemon(
    store: &dyn DocumentStore,
    ledger: &LedgerWriter,
    listener: &dyn HostListener,
    state: &mut WakeDaemonState,
    batch_size: u32,
) -> Result<ControlLoopReport, GateError> {
    let now = store.server_timestamp();
    if !listener.probe_health().await {
        state.consecutive_failures += 1;
        let mut report = ControlLoopReport::default();
        if state.consecutive_failures >= DEGRADED_MODE_THRESHOLD {
            report.errors.push("host_unreachable".to_string());
        }
        return Ok(report);
    }
    state.consecutive_failures = 0;

    let query = Query::new().with_eq("status", json!(Status::Created)).limited(batch_size);
    let pending: Vec<(TenantUid, Task)> = scan_typed(store, "tasks", &query).await?;

    let mut targets: BTreeMap<(TenantUid, String), u32> = BTreeMap::new();
    for (tenant, task) in &pending {
        *targets.entry((tenant.clone(), task.envelope.target.clone())).or_insert(0) += 1;
    }

    let mut report = ControlLoopReport {
        documents_scanned: u32::try_from(pending.len()).unwrap_or(u32::MAX),
        ..ControlLoopReport::default()
    };
    for (tenant, target) in targets.keys() {
        let active_sessions_query = Query::new()
            .with_eq("program_id", json!(target))
            .with_eq("status", json!(Status::Active))
            .limited(1);
        let active: Vec<Session> =
            coordkernel_core::query_typed(store, &format!("tenants/{tenant}/sessions"), &active_sessions_query)
                .await?;
        if !active.is_empty() {
            continue;
        }
        match listener.spawn(target).await {
            Ok(()) => {
                report.documents_mutated += 1;
                record_event(
                    ledger,
                    tenant,
                    AnalyticsEventType::SessionLifecycle,
                    "wake_daemon",
                    target,
                    BTreeMap::from([("event".to_string(), "PROGRAM_WAKE".to_string())]),
                    now,
                )
                .await;
            }
            Err(message) => report.errors.push(message),
        }
    }
    Ok(report)
}

// ============================================================================
// SECTION: HTTP Host Listener
// ============================================================================

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const SPAWN_TIMEOUT: Duration = Duration::from_secs(10);

/// [`HostListener`] backed by a real host-listener process, reached over
/// HTTP. Follows the same build-a-client-with-a-fixed-timeout shape as
/// [`coordkernel_broker::WebhookDispatcher`].
pub struct HttpHostListener {
    base_url: String,
    client: reqwest::Client,
}

impl HttpHostListener {
    /// Builds a listener against `WAKE_HOST_URL`. Returns `None` when the
    /// variable is unset or the client fails to build, since the wake
    /// daemon has no host listener to call in that case.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("WAKE_HOST_URL").ok()?;
        let client = reqwest::Client::builder().build().ok()?;
        Some(Self { base_url, client })
    }
}

#[async_trait]
impl HostListener for HttpHostListener {
    async fn probe_health(&self) -> bool {
        let url = format!("{}/health", self.base_url.trim_end_matches('/'));
        let Ok(response) = self.client.get(&url).timeout(PROBE_TIMEOUT).send().await else {
            return false;
        };
        response.status().is_success()
    }

    async fn spawn(&self, target: &str) -> Result<(), String> {
        let url = format!("{}/spawn", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .timeout(SPAWN_TIMEOUT)
            .json(&json!({"target": target}))
            .send()
            .await
            .map_err(|err| err.to_string())?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("host listener returned status {}", response.status()))
        }
    }
}
