//! End-to-end gate coverage for the dream-budget stop scenario.
// coordkernel-server/tests/gate_dream_budget.rs
// ============================================================================
// Module: Gate Dream-Budget Tests
// Description: Exercises the full seven-step gate pipeline against a real
//              API key record and an over-budget dream, confirming the
//              budget check short-circuits before the handler runs.
// Dependencies: coordkernel-core, coordkernel-broker, coordkernel-config,
//               coordkernel-server
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use coordkernel_broker::spawn_ledger_writer;
use coordkernel_core::Action;
use coordkernel_core::ApiKeyRecord;
use coordkernel_core::CostFields;
use coordkernel_core::DocPath;
use coordkernel_core::DocumentStore;
use coordkernel_core::DreamBlock;
use coordkernel_core::Envelope;
use coordkernel_core::InMemoryDocumentStore;
use coordkernel_core::Priority;
use coordkernel_core::ProgramId;
use coordkernel_core::RetryBlock;
use coordkernel_core::SessionId;
use coordkernel_core::Status;
use coordkernel_core::Task;
use coordkernel_core::TaskBody;
use coordkernel_core::TaskId;
use coordkernel_core::TenantUid;
use coordkernel_core::Timestamp;
use coordkernel_core::core::envelope::SCHEMA_VERSION;
use coordkernel_core::core::hashing::hash_api_key;
use coordkernel_core::put_typed;
use coordkernel_core::tooling::ToolName;
use coordkernel_server::GateError;
use coordkernel_server::gate::Gate;
use coordkernel_server::gate::GateRequest;
use coordkernel_server::rate_limit::RateLimiter;
use coordkernel_server::rate_limit::Tier;

const RAW_API_KEY: &str = "cb_test_dream_budget_key";

fn seeded_dream_task(agent: &str, session_id: &SessionId, budget_cap_usd: f64, budget_consumed_usd: f64) -> Task {
    Task {
        id: TaskId::new("dream-1"),
        envelope: Envelope {
            source: ProgramId::new("architect"),
            target: agent.to_string(),
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
        },
        title: "nightly run".to_string(),
        instructions: String::new(),
        context: None,
        body: TaskBody::Dream(DreamBlock {
            agent: agent.to_string(),
            budget_cap_usd,
            budget_consumed_usd,
            timeout_hours: 8.0,
            branch: "main".to_string(),
            outcome: None,
            morning_report: None,
        }),
        status: Status::Active,
        blocked_by: Vec::new(),
        session_id: Some(session_id.clone()),
        created_at: Timestamp::from_unix_millis(0),
        started_at: Some(Timestamp::from_unix_millis(0)),
        completed_at: None,
        last_heartbeat: None,
        encrypted: false,
        archived: false,
        retry: RetryBlock::default(),
        cost: CostFields::default(),
        revert_reason: None,
    }
}

async fn seed_api_key(store: &dyn DocumentStore, tenant: &TenantUid, program: &str) {
    let record = ApiKeyRecord {
        tenant_uid: tenant.clone(),
        program_id: ProgramId::new(program),
        label: "test key".to_string(),
        capabilities: vec!["*".to_string()],
        active: true,
        created_at: store.server_timestamp(),
        last_used_at: None,
        revoked_at: None,
    };
    let key_hash = hash_api_key(RAW_API_KEY);
    let path = DocPath::global("apiKeys", key_hash.as_str());
    put_typed(store, &path, &record).await.expect("seed api key");
}

fn test_gate(store: Arc<dyn DocumentStore>) -> Gate {
    let (ledger, _handle) = spawn_ledger_writer(Arc::clone(&store), 16);
    Gate::new(store, ledger, RateLimiter::new(coordkernel_config::RateLimitConfig::default()))
}

#[tokio::test]
async fn a_call_from_a_session_linked_to_an_over_budget_dream_is_refused() {
    let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
    let tenant = TenantUid::new("acme");
    seed_api_key(store.as_ref(), &tenant, "builder").await;

    let session_id = SessionId::new("sess-1");
    let dream = seeded_dream_task("builder", &session_id, 1.00, 1.05);
    put_typed(store.as_ref(), &DocPath::tenant_scoped(&tenant, "tasks", "dream-1"), &dream)
        .await
        .expect("seed dream");

    let gate = test_gate(Arc::clone(&store));
    let request = GateRequest {
        bearer_token: RAW_API_KEY.to_string(),
        client_ip: None,
        tool: ToolName::GetTasks,
        endpoint: "/v1/mcp".to_string(),
        claimed_source: None,
        session_id: Some(session_id),
        tier: Tier::Free,
    };

    let handler_ran = Arc::new(AtomicBool::new(false));
    let handler_ran_clone = Arc::clone(&handler_ran);
    let result = gate
        .call(request, move |_auth, _correlation_id| async move {
            handler_ran_clone.store(true, Ordering::SeqCst);
            Ok(serde_json::json!({}))
        })
        .await;

    assert!(!handler_ran.load(Ordering::SeqCst));
    match result.outcome {
        Err(GateError::Budget { reason }) => assert!(reason.starts_with("BUDGET_EXCEEDED")),
        other => panic!("expected a budget refusal, got {other:?}"),
    }
}

#[tokio::test]
async fn a_call_from_a_session_linked_to_a_within_budget_dream_reaches_the_handler() {
    let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
    let tenant = TenantUid::new("acme");
    seed_api_key(store.as_ref(), &tenant, "builder").await;

    let session_id = SessionId::new("sess-1");
    let dream = seeded_dream_task("builder", &session_id, 5.00, 1.00);
    put_typed(store.as_ref(), &DocPath::tenant_scoped(&tenant, "tasks", "dream-1"), &dream)
        .await
        .expect("seed dream");

    let gate = test_gate(Arc::clone(&store));
    let request = GateRequest {
        bearer_token: RAW_API_KEY.to_string(),
        client_ip: None,
        tool: ToolName::GetTasks,
        endpoint: "/v1/mcp".to_string(),
        claimed_source: None,
        session_id: Some(session_id),
        tier: Tier::Free,
    };

    let result = gate.call(request, |_auth, _correlation_id| async move { Ok(serde_json::json!({"ok": true})) }).await;

    assert_eq!(result.outcome.expect("handler should run"), serde_json::json!({"ok": true}));
}
