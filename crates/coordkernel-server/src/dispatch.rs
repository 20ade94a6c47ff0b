// coordkernel-server/src/dispatch.rs
// ============================================================================
// Module: Dispatch
// Description: CRUD over the task entity; claim with contention detection;
//              completion with ledger and dream-budget side effects.
// Purpose: spec.md §4.6, the durable work-unit plane.
// Dependencies: coordkernel-core, coordkernel-broker
// ============================================================================

//! ## Overview
//! `create_task` writes a new task, fires the dispatcher webhook, and
//! enqueues a mirror-sync job (both fire-and-forget: a webhook or mirror
//! failure never fails the caller's request). `claim_task` is the one place
//! contention is a success-shaped outcome rather than an error — first
//! writer wins, a losing claimant just gets the current owner's session id
//! back. `complete_task` runs the task through the lifecycle engine and,
//! when the task belongs to a dream, atomically folds its cost into the
//! dream's `budget_consumed_usd`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use coordkernel_broker::LedgerRecord;
use coordkernel_broker::LedgerWriter;
use coordkernel_broker::SyncExecutor;
use coordkernel_broker::SyncQueueEntry;
use coordkernel_broker::enqueue as enqueue_sync;
use coordkernel_core::ClaimEvent;
use coordkernel_core::ClaimOutcome;
use coordkernel_core::CostFields;
use coordkernel_core::DocPath;
use coordkernel_core::DocumentStore;
use coordkernel_core::Envelope;
use coordkernel_core::EntityKind;
use coordkernel_core::Query;
use coordkernel_core::QueryFilter;
use coordkernel_core::SessionId;
use coordkernel_core::SortOrder;
use coordkernel_core::Status;
use coordkernel_core::Task;
use coordkernel_core::TaskBody;
use coordkernel_core::TaskDispatcher;
use coordkernel_core::TaskId;
use coordkernel_core::TenantUid;
use coordkernel_core::get_typed;
use coordkernel_core::put_typed;
use coordkernel_core::query_typed;
use coordkernel_core::transition;
use serde_json::Value;
use serde_json::json;

use crate::error::GateError;

// ============================================================================
// SECTION: Create
// ============================================================================

/// Result of [`create_task`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTaskResult {
    /// The newly created task's id.
    pub task_id: String,
}

/// Writes a new task with `status=created`, notifies the dispatcher webhook,
/// and enqueues a mirror-sync job. Webhook and mirror failures never fail
/// this call — they are recorded by the caller's sync executor for retry.
///
/// # Errors
/// Returns [`GateError::Store`] on a storage failure.
pub async fn create_task(
    store: &dyn DocumentStore,
    tenant: &TenantUid,
    task_id: TaskId,
    envelope: Envelope,
    title: String,
    instructions: String,
    context: Option<String>,
    body: TaskBody,
    encrypted: bool,
    dispatcher: Option<&dyn TaskDispatcher>,
) -> Result<CreateTaskResult, GateError> {
    let now = store.server_timestamp();
    let task = Task {
        id: task_id.clone(),
        envelope: envelope.clone(),
        title: title.clone(),
        instructions,
        context,
        body,
        status: Status::Created,
        blocked_by: Vec::new(),
        session_id: None,
        created_at: now,
        started_at: None,
        completed_at: None,
        last_heartbeat: None,
        encrypted,
        archived: false,
        retry: coordkernel_core::RetryBlock::default(),
        cost: CostFields::default(),
        revert_reason: None,
    };
    let path = DocPath::tenant_scoped(tenant, "tasks", task_id.as_str());
    put_typed(store, &path, &task).await?;

    if let Some(dispatcher) = dispatcher {
        let priority = format!("{:?}", envelope.priority).to_lowercase();
        let _ = dispatcher.notify_created(task_id.as_str(), &envelope.target, &priority).await;
    }

    let sync_entry = SyncQueueEntry {
        id: format!("task_mirror_{task_id}"),
        operation: "task_mirror".to_string(),
        payload: json!({"taskId": task_id.as_str(), "target": envelope.target, "title": title}),
        retry_count: 0,
        last_error: None,
        enqueued_at: now,
    };
    let _ = enqueue_sync(store, tenant, sync_entry).await;

    Ok(CreateTaskResult {
        task_id: task_id.into_inner(),
    })
}

// ============================================================================
// SECTION: Read
// ============================================================================

/// Filters accepted by [`get_tasks`], mirroring spec.md §4.6's indexed set.
#[derive(Debug, Clone, Default)]
pub struct TaskFilters {
    /// Restrict to tasks addressed to this target.
    pub target: Option<String>,
    /// Restrict to tasks in this lifecycle status.
    pub status: Option<Status>,
    /// Restrict to this task kind's discriminant (`task`, `question`, ...).
    pub task_type: Option<String>,
}

/// Queries tasks by any combination of `{target, status, type}`, newest
/// first. Decryption of question content happens at the signal layer, which
/// holds the caller's derived key; this module only returns the raw record.
///
/// # Errors
/// Returns [`GateError::Store`] on a storage failure.
pub async fn get_tasks(
    store: &dyn DocumentStore,
    tenant: &TenantUid,
    filters: &TaskFilters,
) -> Result<Vec<Task>, GateError> {
    let mut query = Query::new().order_by("created_at", SortOrder::Desc);
    if let Some(target) = &filters.target {
        query = query.with_eq("target", json!(target));
    }
    if let Some(status) = filters.status {
        let status_json = serde_json::to_value(status).map_err(|err| GateError::Handler(err.to_string()))?;
        query = query.with_eq("status", status_json);
    }
    if let Some(task_type) = &filters.task_type {
        query = query.with_eq("type", json!(task_type));
    }
    let collection_path = format!("tenants/{tenant}/tasks");
    query_typed(store, &collection_path, &query).await.map_err(GateError::from)
}

// ============================================================================
// SECTION: Claim
// ============================================================================

/// Outcome of [`claim_task`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimResult {
    /// The caller's session now owns the task.
    Claimed,
    /// Another session already holds the task; contention, not an error.
    Contention {
        /// The session id currently holding the claim, if known.
        current_owner: Option<String>,
    },
}

/// Attempts to claim `task_id` for `session_id`. First writer wins: a task
/// not in `status=created` is contention, reported as a success-shaped
/// result rather than an error (spec.md §4.6/§7). Every attempt, won or
/// lost, writes a [`ClaimEvent`] so contention metrics stay accurate.
///
/// # Errors
/// Returns [`GateError::Store`] on a storage failure or [`GateError::Lifecycle`]
/// if the lifecycle engine unexpectedly rejects `created -> active`.
pub async fn claim_task(
    store: &dyn DocumentStore,
    ledger: &LedgerWriter,
    tenant: &TenantUid,
    task_id: &TaskId,
    session_id: &SessionId,
) -> Result<ClaimResult, GateError> {
    let path = DocPath::tenant_scoped(tenant, "tasks", task_id.as_str());
    let task: Task = get_typed(store, &path).await?;
    let now = store.server_timestamp();

    if task.status != Status::Created {
        record_claim_event(ledger, tenant, task_id, session_id, ClaimOutcome::Contention, task.session_id.clone(), now);
        return Ok(ClaimResult::Contention {
            current_owner: task.session_id.map(coordkernel_core::SessionId::into_inner),
        });
    }

    let new_status = transition(EntityKind::Task, Status::Created, Status::Active)?;
    let claimed = store
        .compare_and_swap_field(&path, "status", &json!(Status::Created), json!(new_status))
        .await?;
    if !claimed {
        let refreshed: Task = get_typed(store, &path).await?;
        record_claim_event(
            ledger,
            tenant,
            task_id,
            session_id,
            ClaimOutcome::Contention,
            refreshed.session_id.clone(),
            now,
        );
        return Ok(ClaimResult::Contention {
            current_owner: refreshed.session_id.map(coordkernel_core::SessionId::into_inner),
        });
    }

    let mut claimed_task = task;
    claimed_task.status = new_status;
    claimed_task.session_id = Some(session_id.clone());
    claimed_task.started_at = Some(now);
    claimed_task.last_heartbeat = Some(now);
    put_typed(store, &path, &claimed_task).await?;

    record_claim_event(ledger, tenant, task_id, session_id, ClaimOutcome::Claimed, Some(session_id.clone()), now);
    Ok(ClaimResult::Claimed)
}

fn record_claim_event(
    ledger: &LedgerWriter,
    tenant: &TenantUid,
    task_id: &TaskId,
    session_id: &SessionId,
    outcome: ClaimOutcome,
    current_owner: Option<SessionId>,
    now: coordkernel_core::Timestamp,
) {
    let event = ClaimEvent {
        id: coordkernel_core::ClaimEventId::new(format!("{task_id}_{}", now.as_unix_millis())),
        task_id: task_id.clone(),
        session_id: session_id.clone(),
        outcome,
        current_owner,
        recorded_at: now,
    };
    ledger.record(LedgerRecord::Claim {
        tenant: tenant.clone(),
        event,
    });
}

// ============================================================================
// SECTION: Complete
// ============================================================================

/// Transitions a task to a terminal status, merges cost fields, and (when
/// the task's `sessionId` is linked to a dream) folds its cost into the
/// parent dream's `budget_consumed_usd`.
///
/// # Errors
/// Returns [`GateError::Lifecycle`] on an illegal transition, or
/// [`GateError::Store`] on a storage failure.
pub async fn complete_task(
    store: &dyn DocumentStore,
    tenant: &TenantUid,
    task_id: &TaskId,
    completed_status: Status,
    cost: CostFields,
    parent_dream_id: Option<&TaskId>,
) -> Result<(), GateError> {
    let path = DocPath::tenant_scoped(tenant, "tasks", task_id.as_str());
    let mut task: Task = get_typed(store, &path).await?;
    let new_status = transition(EntityKind::Task, task.status, completed_status)?;

    let now = store.server_timestamp();
    task.status = new_status;
    task.completed_at = Some(now);
    task.cost.tokens_in += cost.tokens_in;
    task.cost.tokens_out += cost.tokens_out;
    task.cost.cost_usd += cost.cost_usd;
    put_typed(store, &path, &task).await?;

    if let Some(dream_id) = parent_dream_id {
        let dream_path = DocPath::tenant_scoped(tenant, "tasks", dream_id.as_str());
        increment_dream_budget(store, &dream_path, cost.cost_usd).await?;
    }

    let sync_entry = SyncQueueEntry {
        id: format!("task_mirror_{task_id}_complete"),
        operation: "task_mirror".to_string(),
        payload: json!({"taskId": task_id.as_str(), "status": new_status}),
        retry_count: 0,
        last_error: None,
        enqueued_at: now,
    };
    let _ = enqueue_sync(store, tenant, sync_entry).await;
    Ok(())
}

/// `budget_consumed_usd` is a float field, so the integer [`DocumentStore::increment`]
/// primitive cannot fold a dollar amount atomically; instead this performs a
/// read-modify-write. A lost race under-counts by at most one concurrent
/// completion, acceptable per spec.md §9's "budgets are re-checked from the
/// store on cache miss and on every activation" tolerance.
async fn increment_dream_budget(store: &dyn DocumentStore, dream_path: &DocPath, delta_usd: f64) -> Result<(), GateError> {
    let mut dream: Task = get_typed(store, dream_path).await?;
    if let TaskBody::Dream(block) = &mut dream.body {
        block.budget_consumed_usd += delta_usd;
    }
    put_typed(store, dream_path, &dream).await?;
    Ok(())
}

// ============================================================================
// SECTION: Mirror Sync Executor
// ============================================================================

/// Replays a queued `task_mirror` operation through the configured
/// dispatcher webhook. Used by the sync-queue control loop (spec.md §4.12.7).
pub struct TaskMirrorExecutor<'a> {
    dispatcher: &'a dyn TaskDispatcher,
}

impl<'a> TaskMirrorExecutor<'a> {
    /// Builds an executor that replays mirror jobs through `dispatcher`.
    #[must_use]
    pub const fn new(dispatcher: &'a dyn TaskDispatcher) -> Self {
        Self { dispatcher }
    }
}

#[async_trait::async_trait]
impl SyncExecutor for TaskMirrorExecutor<'_> {
    async fn execute(&self, entry: &SyncQueueEntry) -> Result<(), String> {
        let task_id = entry.payload.get("taskId").and_then(Value::as_str).ok_or("missing taskId")?;
        let target = entry.payload.get("target").and_then(Value::as_str).unwrap_or_default();
        let priority = entry.payload.get("priority").and_then(Value::as_str).unwrap_or("normal");
        self.dispatcher.notify_created(task_id, target, priority).await.map_err(|err| err.to_string())
    }
}

// ============================================================================
// SECTION: Query Filter Helper
// ============================================================================

/// Builds the query used by collection-group orphan-revival scans
/// (status=active ordered by no particular field; the control loop filters
/// heartbeat age client-side since the store has no composite index on it).
#[must_use]
pub fn active_tasks_query() -> Query {
    Query {
        filters: vec![QueryFilter::Eq("status".to_string(), json!(Status::Active))],
        order_by: None,
        limit: None,
    }
}
