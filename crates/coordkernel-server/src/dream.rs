// coordkernel-server/src/dream.rs
// ============================================================================
// Module: Dream
// Description: Long-running budgeted run listing and activation.
// Purpose: spec.md §4.10.
// Dependencies: coordkernel-core
// ============================================================================

//! ## Overview
//! A dream is a `type=dream` task (see [`coordkernel_core::DreamBlock`]).
//! [`dream_peek`] lists dreams in a peekable state without claiming them;
//! [`dream_activate`] claims one for execution and invalidates
//! [`crate::gate::Gate`]'s per-`(tenant, program)` budget cache so the next
//! gated tool call re-reads the freshly activated budget instead of serving
//! a stale pre-activation verdict. Budget increments happen in
//! [`crate::dispatch::complete_task`], not here.

// ============================================================================
// SECTION: Imports
// ============================================================================

use coordkernel_core::DocPath;
use coordkernel_core::DocumentStore;
use coordkernel_core::EntityKind;
use coordkernel_core::Query;
use coordkernel_core::SortOrder;
use coordkernel_core::Status;
use coordkernel_core::Task;
use coordkernel_core::TaskBody;
use coordkernel_core::TaskId;
use coordkernel_core::TenantUid;
use coordkernel_core::get_typed;
use coordkernel_core::put_typed;
use coordkernel_core::query_typed;
use coordkernel_core::transition;
use serde_json::json;

use crate::error::GateError;
use crate::gate::Gate;

// ============================================================================
// SECTION: Peek
// ============================================================================

/// Lists dreams in `created` status (peekable but not yet activated),
/// newest first.
///
/// # Errors
/// Returns [`GateError::Store`] on a storage failure.
pub async fn dream_peek(store: &dyn DocumentStore, tenant: &TenantUid) -> Result<Vec<Task>, GateError> {
    let query = Query::new()
        .with_eq("type", json!("dream"))
        .with_eq("status", json!(Status::Created))
        .order_by("created_at", SortOrder::Desc);
    let collection_path = format!("tenants/{tenant}/tasks");
    let dreams: Vec<Task> = query_typed(store, &collection_path, &query).await?;
    Ok(dreams)
}

// ============================================================================
// SECTION: Activate
// ============================================================================

/// Transitions a dream `created -> active` and invalidates the gate's budget
/// cache for `(tenant, dream.agent)` so the very next gated call against this
/// program re-checks the freshly activated budget.
///
/// # Errors
/// Returns [`GateError::Lifecycle`] if the dream is not in `created` status,
/// [`GateError::Validation`] if the task is not a dream, or
/// [`GateError::Store`] on a storage failure.
pub async fn dream_activate(
    store: &dyn DocumentStore,
    gate: &Gate,
    tenant: &TenantUid,
    dream_id: &TaskId,
) -> Result<Task, GateError> {
    let path = DocPath::tenant_scoped(tenant, "tasks", dream_id.as_str());
    let mut dream: Task = get_typed(store, &path).await?;
    let TaskBody::Dream(block) = &dream.body else {
        return Err(GateError::Validation {
            message: format!("task `{dream_id}` is not a dream"),
        });
    };
    let agent = block.agent.clone();

    dream.status = transition(EntityKind::Dream, dream.status, Status::Active)?;
    let now = store.server_timestamp();
    dream.started_at = Some(now);
    put_typed(store, &path, &dream).await?;

    gate.invalidate_dream_cache(tenant, &agent).await;
    Ok(dream)
}

#[cfg(test)]
mod tests {
    use coordkernel_core::Action;
    use coordkernel_core::CostFields;
    use coordkernel_core::DreamBlock;
    use coordkernel_core::Envelope;
    use coordkernel_core::InMemoryDocumentStore;
    use coordkernel_core::Priority;
    use coordkernel_core::ProgramId;
    use coordkernel_core::RetryBlock;
    use std::sync::Arc;

    use super::*;
    use crate::rate_limit::RateLimiter;

    fn dream_task(id: &str, status: Status) -> Task {
        Task {
            id: TaskId::new(id),
            envelope: Envelope {
                source: ProgramId::new("architect"),
                target: "builder".to_string(),
                priority: Priority::Normal,
                action: Action::Queue,
                ttl: None,
                reply_to: None,
                thread_id: None,
                provenance: None,
                trace_id: None,
                span_id: None,
                parent_span_id: None,
                correlation_id: None,
                schema_version: coordkernel_core::core::envelope::SCHEMA_VERSION,
            },
            title: "nightly run".to_string(),
            instructions: String::new(),
            context: None,
            body: TaskBody::Dream(DreamBlock {
                agent: "builder".to_string(),
                budget_cap_usd: 5.0,
                budget_consumed_usd: 0.0,
                timeout_hours: 8.0,
                branch: "main".to_string(),
                outcome: None,
                morning_report: None,
            }),
            status,
            blocked_by: Vec::new(),
            session_id: None,
            created_at: coordkernel_core::Timestamp::from_unix_millis(0),
            started_at: None,
            completed_at: None,
            last_heartbeat: None,
            encrypted: false,
            archived: false,
            retry: RetryBlock::default(),
            cost: CostFields::default(),
            revert_reason: None,
        }
    }

    fn test_gate(store: Arc<dyn DocumentStore>) -> Gate {
        let (ledger, _handle) = coordkernel_broker::spawn_ledger_writer(Arc::clone(&store), 16);
        Gate::new(store, ledger, RateLimiter::new(coordkernel_config::RateLimitConfig::default()))
    }

    #[tokio::test]
    async fn dream_peek_returns_only_created_dreams() {
        let store = InMemoryDocumentStore::new();
        let tenant = TenantUid::new("acme");
        put_typed(&store, &DocPath::tenant_scoped(&tenant, "tasks", "d1"), &dream_task("d1", Status::Created))
            .await
            .expect("write");
        put_typed(&store, &DocPath::tenant_scoped(&tenant, "tasks", "d2"), &dream_task("d2", Status::Active))
            .await
            .expect("write");

        let peekable = dream_peek(&store, &tenant).await.expect("peek");
        assert_eq!(peekable.len(), 1);
        assert_eq!(peekable[0].id, TaskId::new("d1"));
    }

    #[tokio::test]
    async fn activate_transitions_to_active_and_invalidates_cache() {
        let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
        let tenant = TenantUid::new("acme");
        put_typed(store.as_ref(), &DocPath::tenant_scoped(&tenant, "tasks", "d1"), &dream_task("d1", Status::Created))
            .await
            .expect("write");
        let gate = test_gate(Arc::clone(&store));

        let activated = dream_activate(store.as_ref(), &gate, &tenant, &TaskId::new("d1")).await.expect("activate");
        assert_eq!(activated.status, Status::Active);
        assert!(activated.started_at.is_some());
    }
}
