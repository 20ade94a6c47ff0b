// coordkernel-server/src/gate.rs
// ============================================================================
// Module: Gate
// Description: The invariant seven-step pipeline every tool call runs through.
// Purpose: spec.md §4.5 — auth, source-verify, capability, budget, rate-limit,
//          dispatch, fire-and-forget observability, in one shared chokepoint.
// Dependencies: coordkernel-core, coordkernel-broker, coordkernel-config, rand
// ============================================================================

//! ## Overview
//! Both transports ([`crate::transport::mcp`] and [`crate::transport::rest`])
//! call [`Gate::call`] instead of touching auth, capabilities, or the rate
//! limiter directly, so the seven steps in spec.md §4.5 run exactly once per
//! request regardless of which transport received it. Every step that
//! denies a call writes an audit ledger entry before returning; every step
//! that allows it falls through to the next. The module handler runs last,
//! wrapped so its duration is measured and its outcome feeds the fire-and-
//! forget ledger/usage/analytics writes (spec.md §4.11).

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use coordkernel_broker::LedgerRecord;
use coordkernel_broker::LedgerWriter;
use coordkernel_core::AnalyticsEvent;
use coordkernel_core::AnalyticsEventType;
use coordkernel_core::CorrelationId;
use coordkernel_core::DocPath;
use coordkernel_core::DocumentStore;
use coordkernel_core::LedgerEntry;
use coordkernel_core::LedgerEntryType;
use coordkernel_core::ProgramId;
use coordkernel_core::Query;
use coordkernel_core::SessionId;
use coordkernel_core::Status;
use coordkernel_core::Task;
use coordkernel_core::TaskBody;
use coordkernel_core::TenantUid;
use coordkernel_core::Timestamp;
use coordkernel_core::query_typed;
use coordkernel_core::tooling::ToolName;
use rand::Rng;
use tokio::sync::Mutex;

use crate::auth::AuthContext;
use crate::capabilities;
use crate::error::GateError;
use crate::rate_limit::RateLimiter;
use crate::rate_limit::Tier;
use crate::rate_limit::ToolClass;

// ============================================================================
// SECTION: Request / Result
// ============================================================================

/// Everything the gate needs to run one tool call's seven-step pipeline.
#[derive(Debug, Clone)]
pub struct GateRequest {
    /// Raw `Authorization: Bearer <token>` value.
    pub bearer_token: String,
    /// Source IP, used for the pre-auth per-IP window (unused post-auth).
    pub client_ip: Option<String>,
    /// The tool being invoked.
    pub tool: ToolName,
    /// The transport endpoint invoked, recorded on the ledger entry.
    pub endpoint: String,
    /// The `source` field from the caller's args, if present (step 3).
    pub claimed_source: Option<String>,
    /// The session in scope, if any (drives step 5 and the ledger entry).
    pub session_id: Option<SessionId>,
    /// The caller's rate-limit tier.
    pub tier: Tier,
}

/// Outcome of [`Gate::call`]: the correlation id generated for this request,
/// plus the handler's result (or the step that rejected it first).
#[derive(Debug)]
pub struct GateCallResult {
    /// Correlation id generated in step 1, present regardless of outcome.
    pub correlation_id: CorrelationId,
    /// The handler's JSON result, or the [`GateError`] that rejected the call.
    pub outcome: Result<serde_json::Value, GateError>,
}

// ============================================================================
// SECTION: Dream Budget Cache
// ============================================================================

/// Cached outcome of a dream-budget check, keyed by `(tenant, programId)`
/// per spec.md §4.5's 60-second cache.
#[derive(Debug, Clone)]
enum DreamCacheEntry {
    Ok,
    Killed,
    BudgetExceeded,
}

const DREAM_CACHE_TTL: Duration = Duration::from_secs(60);

// ============================================================================
// SECTION: Gate
// ============================================================================

/// The shared pipeline both transports invoke for every tool call.
pub struct Gate {
    store: Arc<dyn DocumentStore>,
    ledger: LedgerWriter,
    rate_limiter: RateLimiter,
    dream_cache: Mutex<HashMap<(String, String), (Instant, DreamCacheEntry)>>,
}

impl Gate {
    /// Builds a gate over `store`, writing fire-and-forget records through
    /// `ledger` and rate-limiting through `rate_limiter`.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, ledger: LedgerWriter, rate_limiter: RateLimiter) -> Self {
        Self {
            store,
            ledger,
            rate_limiter,
            dream_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Invalidates the dream-budget cache for `(tenant, programId)`, called
    /// on dream activation and on a kill so a stale `Ok` or `Killed` entry
    /// never outlives the mutation that invalidated it (spec.md §4.5).
    pub async fn invalidate_dream_cache(&self, tenant: &TenantUid, program_id: &str) {
        self.dream_cache.lock().await.remove(&(tenant.as_str().to_string(), program_id.to_string()));
    }

    /// Runs the seven-step pipeline, invoking `handler` only if every gate
    /// stage allows the call. `handler` receives the resolved [`AuthContext`]
    /// and the request's correlation id.
    pub async fn call<F, Fut>(&self, request: GateRequest, handler: F) -> GateCallResult
    where
        F: FnOnce(AuthContext, CorrelationId) -> Fut,
        Fut: Future<Output = Result<serde_json::Value, GateError>>,
    {
        let correlation_id = CorrelationId::new(generate_correlation_id());

        // Step 2: auth.
        let Some(auth) = crate::auth::resolve_auth(self.store.as_ref(), &request.bearer_token).await else {
            self.audit(None, &request, &correlation_id, false, Some("auth")).await;
            return GateCallResult {
                correlation_id,
                outcome: Err(GateError::Auth),
            };
        };

        // Step 3: source claim.
        if let Some(claimed) = &request.claimed_source {
            let actual = auth.program_id.as_str();
            if claimed != actual && !AuthContext::is_privileged_program(actual) {
                let err = GateError::Authorization {
                    required: claimed.clone(),
                    held: vec![actual.to_string()],
                };
                self.audit(Some(&auth), &request, &correlation_id, false, Some(&err.audit_reason())).await;
                return GateCallResult {
                    correlation_id,
                    outcome: Err(err),
                };
            }
        }

        // Step 4: capability.
        let required = capabilities::required_capability(request.tool);
        let check = capabilities::check(&auth.capabilities, required);
        if !check.allowed {
            let err = GateError::Authorization {
                required: check.required,
                held: check.held,
            };
            self.audit(Some(&auth), &request, &correlation_id, false, Some(&err.audit_reason())).await;
            return GateCallResult {
                correlation_id,
                outcome: Err(err),
            };
        }

        // Step 5: dream budget.
        if let Some(session_id) = &request.session_id
            && let Err(err) = self.check_dream_budget(&auth.tenant_uid, auth.program_id.as_str(), session_id).await
        {
            self.audit(Some(&auth), &request, &correlation_id, false, Some(&err.audit_reason())).await;
            return GateCallResult {
                correlation_id,
                outcome: Err(err),
            };
        }

        // Step 6: rate limit.
        let tool_class = if request.tool.is_read() { ToolClass::Read } else { ToolClass::Write };
        let rate_outcome = self.rate_limiter.check_key(auth.tenant_uid.as_str(), auth.program_id.as_str(), tool_class, request.tier).await;
        if let crate::rate_limit::RateLimitOutcome::Refused { retry_after_secs } = rate_outcome {
            let err = GateError::RateLimit { retry_after_secs };
            self.audit(Some(&auth), &request, &correlation_id, false, Some("rate_limit")).await;
            return GateCallResult {
                correlation_id,
                outcome: Err(err),
            };
        }

        // Step 7: invoke handler, measure duration, write fire-and-forget records.
        let started = Instant::now();
        let result = handler(auth.clone(), correlation_id.clone()).await;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match &result {
            Ok(_) => {
                self.record_success(&auth, &request, &correlation_id, duration_ms).await;
            }
            Err(err) => {
                self.record_failure(&auth, &request, &correlation_id, duration_ms, &err.audit_reason()).await;
            }
        }

        GateCallResult {
            correlation_id,
            outcome: result,
        }
    }

    async fn check_dream_budget(&self, tenant: &TenantUid, program_id: &str, session_id: &SessionId) -> Result<(), GateError> {
        let cache_key = (tenant.as_str().to_string(), program_id.to_string());
        {
            let cache = self.dream_cache.lock().await;
            if let Some((checked_at, entry)) = cache.get(&cache_key)
                && checked_at.elapsed() < DREAM_CACHE_TTL
            {
                return Self::dream_cache_entry_to_result(entry);
            }
        }

        let Some(dream) = self.find_active_dream_for_session(tenant, session_id).await? else {
            return Ok(());
        };
        let entry = if dream.status == Status::Failed || dream.status == Status::Archived {
            DreamCacheEntry::Killed
        } else if let TaskBody::Dream(block) = &dream.body
            && block.is_budget_exceeded()
        {
            DreamCacheEntry::BudgetExceeded
        } else {
            DreamCacheEntry::Ok
        };
        let result = Self::dream_cache_entry_to_result(&entry);
        self.dream_cache.lock().await.insert(cache_key, (Instant::now(), entry));
        result
    }

    fn dream_cache_entry_to_result(entry: &DreamCacheEntry) -> Result<(), GateError> {
        match entry {
            DreamCacheEntry::Ok => Ok(()),
            DreamCacheEntry::Killed => Err(GateError::Budget {
                reason: "DREAM_KILLED".to_string(),
            }),
            DreamCacheEntry::BudgetExceeded => Err(GateError::Budget {
                reason: "BUDGET_EXCEEDED".to_string(),
            }),
        }
    }

    /// Finds the dream task `session_id` is linked to, if any. A session is
    /// linked to a dream when it currently holds the claim on a task whose
    /// discriminant is `dream` (the data model carries no separate
    /// session-to-dream pointer; the claim is the link).
    async fn find_active_dream_for_session(&self, tenant: &TenantUid, session_id: &SessionId) -> Result<Option<Task>, GateError> {
        let collection_path = format!("tenants/{tenant}/tasks");
        let query = Query::new()
            .with_eq("session_id", serde_json::json!(session_id.as_str()))
            .with_eq("type", serde_json::json!("dream"))
            .limited(1);
        let mut dreams: Vec<Task> = query_typed(self.store.as_ref(), &collection_path, &query).await?;
        Ok(dreams.pop())
    }

    async fn audit(&self, auth: Option<&AuthContext>, request: &GateRequest, correlation_id: &CorrelationId, success: bool, reason: Option<&str>) {
        let program_id = auth.map_or_else(|| ProgramId::new("unknown"), |ctx| ctx.program_id.clone());
        let entry = LedgerEntry {
            entry_type: LedgerEntryType::Audit,
            tool: request.tool.as_str().to_string(),
            program_id,
            endpoint: request.endpoint.clone(),
            session_id: request.session_id.clone(),
            duration_ms: 0,
            success,
            error: None,
            correlation_id: correlation_id.clone(),
            reason: reason.map(ToString::to_string),
            timestamp: self.store.server_timestamp(),
        };
        let tenant = auth.map_or_else(|| TenantUid::new("unknown"), |ctx| ctx.tenant_uid.clone());
        self.ledger.record(LedgerRecord::Ledger { tenant, entry });
    }

    async fn record_success(&self, auth: &AuthContext, request: &GateRequest, correlation_id: &CorrelationId, duration_ms: u64) {
        let now = self.store.server_timestamp();
        let entry = LedgerEntry {
            entry_type: LedgerEntryType::Cost,
            tool: request.tool.as_str().to_string(),
            program_id: auth.program_id.clone(),
            endpoint: request.endpoint.clone(),
            session_id: request.session_id.clone(),
            duration_ms,
            success: true,
            error: None,
            correlation_id: correlation_id.clone(),
            reason: None,
            timestamp: now,
        };
        self.ledger.record(LedgerRecord::Ledger {
            tenant: auth.tenant_uid.clone(),
            entry,
        });
        self.increment_usage(&auth.tenant_uid, request.tool, now).await;
        self.ledger.record(LedgerRecord::Analytics {
            tenant: auth.tenant_uid.clone(),
            event: AnalyticsEvent {
                event_type: analytics_event_type(request.tool),
                program_id: auth.program_id.clone(),
                session_id: request.session_id.clone(),
                tool: request.tool.as_str().to_string(),
                metadata: std::collections::BTreeMap::new(),
                timestamp: now,
            },
        });
    }

    async fn record_failure(&self, auth: &AuthContext, request: &GateRequest, correlation_id: &CorrelationId, duration_ms: u64, reason: &str) {
        let entry = LedgerEntry {
            entry_type: LedgerEntryType::Audit,
            tool: request.tool.as_str().to_string(),
            program_id: auth.program_id.clone(),
            endpoint: request.endpoint.clone(),
            session_id: request.session_id.clone(),
            duration_ms,
            success: false,
            error: Some(reason.to_string()),
            correlation_id: correlation_id.clone(),
            reason: Some(reason.to_string()),
            timestamp: self.store.server_timestamp(),
        };
        self.ledger.record(LedgerRecord::Ledger {
            tenant: auth.tenant_uid.clone(),
            entry,
        });
    }

    /// `total_tool_calls` increments on every call; `tasks_created` /
    /// `sessions_started` / `messages_sent` increment only for the tool that
    /// produces them (spec.md §4.5 step 7).
    async fn increment_usage(&self, tenant: &TenantUid, tool: ToolName, now: Timestamp) {
        let month_key = unix_millis_to_month_key(now.as_unix_millis());
        let path = DocPath::tenant_scoped(tenant, "usage", &month_key);
        let _ = self.store.increment(&path, "total_tool_calls", 1).await;
        let extra_field = match tool {
            ToolName::CreateTask => Some("tasks_created"),
            ToolName::CreateSession => Some("sessions_started"),
            ToolName::SendMessage => Some("messages_sent"),
            _ => None,
        };
        if let Some(field) = extra_field {
            let _ = self.store.increment(&path, field, 1).await;
        }
    }
}

fn analytics_event_type(tool: ToolName) -> AnalyticsEventType {
    match tool {
        ToolName::CreateTask | ToolName::ClaimTask | ToolName::CompleteTask | ToolName::GetTasks => {
            AnalyticsEventType::TaskLifecycle
        }
        ToolName::SendMessage | ToolName::GetMessages => AnalyticsEventType::MessageLifecycle,
        ToolName::CreateSession | ToolName::UpdateSession | ToolName::ListSessions => AnalyticsEventType::SessionLifecycle,
        ToolName::AskQuestion
        | ToolName::GetResponse
        | ToolName::SendAlert
        | ToolName::DreamPeek
        | ToolName::DreamActivate
        | ToolName::GetOperationalMetrics => AnalyticsEventType::TaskLifecycle,
    }
}

fn generate_correlation_id() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 16] = rng.r#gen();
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

/// Converts Unix milliseconds to a `YYYY-MM` usage-doc key using the
/// civil-from-days algorithm (Howard Hinnant's `civil_from_days`, days since
/// the 1970-01-01 epoch), since [`coordkernel_core::core::ledger`] only
/// exposes calendar-to-ordinal helpers, not the inverse.
pub(crate) fn unix_millis_to_month_key(millis: i64) -> String {
    let days = millis.div_euclid(86_400_000);
    let z = days + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = if month <= 2 { y + 1 } else { y };
    format!("{year:04}-{month:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn month_key_matches_known_date() {
        // 2026-03-05T00:00:00Z
        assert_eq!(unix_millis_to_month_key(1_772_841_600_000), "2026-03");
    }

    #[test]
    fn month_key_handles_epoch() {
        assert_eq!(unix_millis_to_month_key(0), "1970-01");
    }

    #[tokio::test]
    async fn unauthenticated_call_is_rejected_before_the_handler_runs() {
        let store: Arc<dyn DocumentStore> = Arc::new(coordkernel_core::InMemoryDocumentStore::new());
        let (ledger, _handle) = coordkernel_broker::spawn_ledger_writer(Arc::clone(&store), 16);
        let gate = Gate::new(store, ledger, RateLimiter::new(coordkernel_config::RateLimitConfig::default()));
        let request = GateRequest {
            bearer_token: "cb_doesnotexist".to_string(),
            client_ip: None,
            tool: ToolName::GetTasks,
            endpoint: "/v1/mcp".to_string(),
            claimed_source: None,
            session_id: None,
            tier: Tier::Free,
        };
        let called = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let called_clone = Arc::clone(&called);
        let result = gate
            .call(request, move |_auth, _correlation_id| async move {
                called_clone.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(serde_json::json!({}))
            })
            .await;
        assert!(!called.load(std::sync::atomic::Ordering::SeqCst));
        assert!(matches!(result.outcome, Err(GateError::Auth)));
    }
}
