//! Literal scenario coverage for the coordination kernel's domain modules.
// coordkernel-server/tests/domain_scenarios.rs
// ============================================================================
// Module: Domain Scenario Tests
// Description: Exercises claim contention, multicast fan-out, relay
//              dead-lettering, orphan revival, and lifecycle rejection
//              against an in-memory store, with no HTTP transport involved.
// Dependencies: coordkernel-core, coordkernel-broker, coordkernel-server
// ============================================================================

use std::sync::Arc;

use coordkernel_broker::spawn_ledger_writer;
use coordkernel_core::Action;
use coordkernel_core::CostFields;
use coordkernel_core::DocPath;
use coordkernel_core::DocumentStore;
use coordkernel_core::EntityKind;
use coordkernel_core::Envelope;
use coordkernel_core::InMemoryDocumentStore;
use coordkernel_core::MessageType;
use coordkernel_core::Priority;
use coordkernel_core::ProgramId;
use coordkernel_core::Query;
use coordkernel_core::RetryBlock;
use coordkernel_core::SessionId;
use coordkernel_core::Status;
use coordkernel_core::Task;
use coordkernel_core::TaskBody;
use coordkernel_core::TaskId;
use coordkernel_core::TenantUid;
use coordkernel_core::Timestamp;
use coordkernel_core::core::envelope::SCHEMA_VERSION;
use coordkernel_core::get_typed;
use coordkernel_core::put_typed;
use coordkernel_core::query_typed;
use coordkernel_core::transition;
use coordkernel_server::control_loops;
use coordkernel_server::dispatch;
use coordkernel_server::relay;

fn sample_envelope(source: &str, target: &str) -> Envelope {
    Envelope {
        source: ProgramId::new(source),
        target: target.to_string(),
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
        schema_version: SCHEMA_VERSION,
    }
}

fn sample_task(id: &str, target: &str, status: Status) -> Task {
    Task {
        id: TaskId::new(id),
        envelope: sample_envelope("architect", target),
        title: "build the thing".to_string(),
        instructions: String::new(),
        context: None,
        body: TaskBody::Task,
        status,
        blocked_by: Vec::new(),
        session_id: None,
        created_at: Timestamp::from_unix_millis(0),
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

// ============================================================================
// SECTION: Scenario 1 - Happy Claim
// ============================================================================

#[tokio::test]
async fn happy_claim_then_contended_second_claim() {
    let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
    let (ledger, _handle) = spawn_ledger_writer(Arc::clone(&store), 16);
    let tenant = TenantUid::new("acme");
    let task_id = TaskId::new("t1");
    put_typed(store.as_ref(), &DocPath::tenant_scoped(&tenant, "tasks", "t1"), &sample_task("t1", "builder", Status::Created))
        .await
        .expect("seed task");

    let first = dispatch::claim_task(store.as_ref(), &ledger, &tenant, &task_id, &SessionId::new("sess-1"))
        .await
        .expect("first claim");
    assert_eq!(first, dispatch::ClaimResult::Claimed);

    let claimed: Task = get_typed(store.as_ref(), &DocPath::tenant_scoped(&tenant, "tasks", "t1")).await.expect("read back");
    assert_eq!(claimed.status, Status::Active);
    assert_eq!(claimed.session_id, Some(SessionId::new("sess-1")));

    let second = dispatch::claim_task(store.as_ref(), &ledger, &tenant, &task_id, &SessionId::new("sess-2"))
        .await
        .expect("second claim");
    assert_eq!(
        second,
        dispatch::ClaimResult::Contention {
            current_owner: Some("sess-1".to_string())
        }
    );

    let unchanged: Task = get_typed(store.as_ref(), &DocPath::tenant_scoped(&tenant, "tasks", "t1")).await.expect("read back");
    assert_eq!(unchanged.session_id, Some(SessionId::new("sess-1")));
}

// ============================================================================
// SECTION: Scenario 3 - Relay Dead-Letter
// ============================================================================

#[tokio::test]
async fn two_sweeps_past_expiry_dead_letter_the_message() {
    let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
    let (ledger, _handle) = spawn_ledger_writer(Arc::clone(&store), 16);
    let tenant = TenantUid::new("acme");

    let ids = relay::send_message(
        store.as_ref(),
        &tenant,
        sample_envelope("architect", "builder"),
        MessageType::Ping,
        serde_json::json!({}),
        None,
        Some(1),
    )
    .await
    .expect("send");
    assert_eq!(ids.len(), 1);
    let message_id = ids[0].clone();

    // Force the message's maxDeliveryAttempts to 2 and back-date it past the
    // one-hour dead-letter age threshold, as if the scenario's TTL/attempt
    // window had already elapsed.
    let path = DocPath::tenant_scoped(&tenant, "relay", message_id.as_str());
    let mut message: coordkernel_core::RelayMessage = get_typed(store.as_ref(), &path).await.expect("read message");
    message.max_delivery_attempts = 2;
    // Far enough in the past that it clears the one-hour dead-letter age
    // threshold regardless of how far the in-memory store's tick clock has
    // advanced by the time this runs.
    message.created_at = Timestamp::from_unix_millis(-10_000_000);
    put_typed(store.as_ref(), &path, &message).await.expect("back-date message");

    let first_sweep = control_loops::dead_letter_processing(store.as_ref(), &ledger, 10).await.expect("first sweep");
    assert_eq!(first_sweep.documents_mutated, 1);
    let still_pending: coordkernel_core::RelayMessage = get_typed(store.as_ref(), &path).await.expect("read message");
    assert_eq!(still_pending.delivery_attempts, 1);
    assert_eq!(still_pending.status, coordkernel_core::RelayStatus::Pending);

    let second_sweep = control_loops::dead_letter_processing(store.as_ref(), &ledger, 10).await.expect("second sweep");
    assert_eq!(second_sweep.documents_mutated, 1);

    assert!(store.get_value_optional(&path).await.expect("query original").is_none());
    let dead_letter_path = DocPath::tenant_scoped(&tenant, "dead_letters", message_id.as_str());
    let archived = store.get_value(&dead_letter_path).await.expect("read dead letter");
    let original = archived.get("original").expect("original field");
    assert_eq!(original["delivery_attempts"], serde_json::json!(2));
    assert_eq!(original["status"], serde_json::json!("pending"));
}

// ============================================================================
// SECTION: Scenario 4 - Multicast Fan-Out
// ============================================================================

#[tokio::test]
async fn council_send_fans_out_to_six_programs_sharing_a_multicast_id() {
    let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
    let tenant = TenantUid::new("acme");

    let ids = relay::send_message(
        store.as_ref(),
        &tenant,
        sample_envelope("architect", "council"),
        MessageType::Directive,
        serde_json::json!({"text": "stand by"}),
        None,
        None,
    )
    .await
    .expect("send");
    assert_eq!(ids.len(), 6);

    let collection_path = format!("tenants/{tenant}/relay");
    let messages: Vec<coordkernel_core::RelayMessage> = query_typed(store.as_ref(), &collection_path, &Query::new()).await.expect("query");
    assert_eq!(messages.len(), 6);
    let multicast_id = messages[0].multicast_id.clone().expect("multicast id set");
    assert!(messages.iter().all(|message| message.multicast_id == Some(multicast_id.clone())));

    let mut targets: Vec<String> = messages.iter().map(|message| message.envelope.target.clone()).collect();
    targets.sort();
    targets.dedup();
    assert_eq!(targets.len(), 6);
}

// ============================================================================
// SECTION: Scenario 5 - Orphan Revival
// ============================================================================

#[tokio::test]
async fn stale_heartbeat_reverts_task_to_created() {
    let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
    let (ledger, _handle) = spawn_ledger_writer(Arc::clone(&store), 16);
    let tenant = TenantUid::new("acme");

    let mut task = sample_task("t1", "builder", Status::Active);
    task.session_id = Some(SessionId::new("sess-1"));
    task.started_at = Some(Timestamp::from_unix_millis(0));
    let now_millis = store.server_timestamp().as_unix_millis();
    task.last_heartbeat = Some(Timestamp::from_unix_millis(now_millis - 31 * 60 * 1000));
    let path = DocPath::tenant_scoped(&tenant, "tasks", "t1");
    put_typed(store.as_ref(), &path, &task).await.expect("seed task");

    let report = control_loops::orphan_revival(store.as_ref(), &ledger, 10).await.expect("orphan revival");
    assert_eq!(report.documents_mutated, 1);

    let reverted: Task = get_typed(store.as_ref(), &path).await.expect("read back");
    assert_eq!(reverted.status, Status::Created);
    assert_eq!(reverted.session_id, None);
    assert_eq!(reverted.revert_reason, Some("heartbeat_timeout".to_string()));
}

// ============================================================================
// SECTION: Scenario 6 - Lifecycle Reject
// ============================================================================

#[test]
fn illegal_task_and_dream_transitions_are_rejected_with_structured_errors() {
    let task_error = transition(EntityKind::Task, Status::Done, Status::Active).expect_err("done -> active must be illegal for tasks");
    assert_eq!(task_error.kind, EntityKind::Task);
    assert_eq!(task_error.from, Status::Done);
    assert_eq!(task_error.to, Status::Active);

    let dream_error = transition(EntityKind::Dream, Status::Blocked, Status::Active).expect_err("dreams have no blocked status");
    assert_eq!(dream_error.kind, EntityKind::Dream);
    assert_eq!(dream_error.from, Status::Blocked);
    assert_eq!(dream_error.to, Status::Active);
}
