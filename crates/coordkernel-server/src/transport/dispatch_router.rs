// coordkernel-server/src/transport/dispatch_router.rs
// ============================================================================
// Module: Dispatch Router
// Description: Maps a tool name and its JSON arguments onto the dispatch,
//              relay, pulse, signal, and dream module functions.
// Purpose: spec.md §4.6-§4.10's argument contract, shared by MCP and REST.
// Dependencies: coordkernel-core, serde_json
// ============================================================================

//! ## Overview
//! Both transports resolve a tool call down to the same shape: a
//! [`ToolName`] and a JSON arguments object. [`invoke`] is where that shape
//! turns into a call against [`crate::dispatch`], [`crate::relay`],
//! [`crate::pulse`], [`crate::signal`], or [`crate::dream`]. Only
//! [`ToolName::CreateTask`] and [`ToolName::SendMessage`] carry a nested
//! `envelope` object; every other tool takes flat fields and the domain
//! module itself builds whatever envelope it needs internally.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use coordkernel_broker::LedgerWriter;
use coordkernel_core::CostFields;
use coordkernel_core::DocPath;
use coordkernel_core::DocumentStore;
use coordkernel_core::Envelope;
use coordkernel_core::ProgramId;
use coordkernel_core::SessionId;
use coordkernel_core::SessionIdMode;
use coordkernel_core::Status;
use coordkernel_core::TaskBody;
use coordkernel_core::TaskDispatcher;
use coordkernel_core::TaskId;
use coordkernel_core::get_typed_optional;
use coordkernel_core::tooling::ToolName;
use serde_json::Value;
use serde_json::json;

use crate::auth::AuthContext;
use crate::dispatch;
use crate::dream;
use crate::error::GateError;
use crate::gate::Gate;
use crate::pulse;
use crate::relay;
use crate::signal;
use crate::transport::AppState;

// ============================================================================
// SECTION: Tool Context
// ============================================================================

/// The subset of [`AppState`] a dispatched tool call needs, cloned cheaply
/// per call so [`invoke`] never borrows `AppState` across an `.await`.
#[derive(Clone)]
pub struct ToolContext {
    /// The document store every domain module reads and writes through.
    pub store: Arc<dyn DocumentStore>,
    /// Fire-and-forget ledger writer, shared with [`Gate`].
    pub ledger: LedgerWriter,
    /// The dispatcher webhook client, if configured.
    pub dispatcher: Option<Arc<dyn TaskDispatcher>>,
    /// Session-id enforcement mode applied to new pulse sessions.
    pub session_mode: SessionIdMode,
    /// Needed only by [`ToolName::DreamActivate`], to invalidate the gate's
    /// budget cache from inside the handler the gate itself invoked.
    pub gate: Arc<Gate>,
}

impl ToolContext {
    /// Builds a tool context from shared application state.
    #[must_use]
    pub fn from_state(state: &AppState) -> Self {
        Self {
            store: Arc::clone(&state.store),
            ledger: state.ledger.clone(),
            dispatcher: state.dispatcher.clone(),
            session_mode: state.config.session.id_mode,
            gate: Arc::clone(&state.gate),
        }
    }
}

// ============================================================================
// SECTION: Source-Claim Helper
// ============================================================================

/// The caller-claimed `source` program id the gate's step 3 verifies, or
/// `None` for tools that never carry an envelope of their own.
#[must_use]
pub fn claimed_source(tool: ToolName, arguments: &Value) -> Option<String> {
    match tool {
        ToolName::CreateTask | ToolName::SendMessage => arguments
            .get("envelope")
            .and_then(|envelope| envelope.get("source"))
            .and_then(Value::as_str)
            .map(ToString::to_string),
        _ => None,
    }
}

/// The `sessionId` argument, if present, used to drive the gate's dream
/// budget check (step 5).
#[must_use]
pub fn session_id_arg(arguments: &Value) -> Option<SessionId> {
    arguments.get("sessionId").and_then(Value::as_str).map(SessionId::new)
}

// ============================================================================
// SECTION: Argument Helpers
// ============================================================================

fn require_str(arguments: &Value, field: &str) -> Result<String, GateError> {
    arguments
        .get(field)
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .ok_or_else(|| GateError::Validation {
            message: format!("missing or non-string field `{field}`"),
        })
}

fn optional_str(arguments: &Value, field: &str) -> Option<String> {
    arguments.get(field).and_then(Value::as_str).map(ToString::to_string)
}

fn optional_u64(arguments: &Value, field: &str) -> Option<u64> {
    arguments.get(field).and_then(Value::as_u64)
}

fn optional_bool(arguments: &Value, field: &str) -> Option<bool> {
    arguments.get(field).and_then(Value::as_bool)
}

fn require_envelope(arguments: &Value) -> Result<Envelope, GateError> {
    let raw = arguments.get("envelope").ok_or_else(|| GateError::Validation {
        message: "missing field `envelope`".to_string(),
    })?;
    serde_json::from_value(raw.clone()).map_err(|err| GateError::Validation {
        message: format!("malformed envelope: {err}"),
    })
}

fn require_body(arguments: &Value) -> Result<TaskBody, GateError> {
    let raw = arguments.get("body").ok_or_else(|| GateError::Validation {
        message: "missing field `body`".to_string(),
    })?;
    serde_json::from_value(raw.clone()).map_err(|err| GateError::Validation {
        message: format!("malformed body: {err}"),
    })
}

fn parse_status(raw: &str) -> Result<Status, GateError> {
    serde_json::from_value(json!(raw)).map_err(|_err| GateError::Validation {
        message: format!("unrecognized status `{raw}`"),
    })
}

fn parse_message_type(raw: &str) -> Result<coordkernel_core::MessageType, GateError> {
    serde_json::from_value(json!(raw.to_uppercase())).map_err(|_err| GateError::Validation {
        message: format!("unrecognized message type `{raw}`"),
    })
}

fn require_cost(arguments: &Value) -> CostFields {
    arguments
        .get("cost")
        .and_then(|raw| serde_json::from_value(raw.clone()).ok())
        .unwrap_or_default()
}

// ============================================================================
// SECTION: Invoke
// ============================================================================

/// Runs `tool` against `arguments`, returning the JSON result a transport
/// hands back to its caller.
///
/// # Errors
/// Returns [`GateError::Validation`] when `arguments` does not carry the
/// fields `tool` requires, or whatever the invoked domain module returns.
pub async fn invoke(
    ctx: &ToolContext,
    auth: AuthContext,
    tool: ToolName,
    arguments: Value,
) -> Result<Value, GateError> {
    let store = ctx.store.as_ref();
    let tenant = &auth.tenant_uid;

    match tool {
        ToolName::CreateTask => {
            let task_id = TaskId::new(require_str(&arguments, "taskId")?);
            let envelope = require_envelope(&arguments)?;
            let title = require_str(&arguments, "title")?;
            let instructions = require_str(&arguments, "instructions")?;
            let context = optional_str(&arguments, "context");
            let body = require_body(&arguments)?;
            let encrypted = optional_bool(&arguments, "encrypted").unwrap_or(false);
            let dispatcher = ctx.dispatcher.as_deref();
            let result =
                dispatch::create_task(store, tenant, task_id, envelope, title, instructions, context, body, encrypted, dispatcher)
                    .await?;
            Ok(json!({"taskId": result.task_id}))
        }

        ToolName::GetTasks => {
            let filters = dispatch::TaskFilters {
                target: optional_str(&arguments, "target"),
                status: optional_str(&arguments, "status").map(|raw| parse_status(&raw)).transpose()?,
                task_type: optional_str(&arguments, "type"),
            };
            let tasks = dispatch::get_tasks(store, tenant, &filters).await?;
            Ok(json!({"tasks": tasks}))
        }

        ToolName::ClaimTask => {
            let task_id = TaskId::new(require_str(&arguments, "taskId")?);
            let session_id = SessionId::new(require_str(&arguments, "sessionId")?);
            match dispatch::claim_task(store, &ctx.ledger, tenant, &task_id, &session_id).await? {
                dispatch::ClaimResult::Claimed => Ok(json!({"claimed": true})),
                dispatch::ClaimResult::Contention { current_owner } => {
                    Ok(json!({"claimed": false, "currentOwner": current_owner}))
                }
            }
        }

        ToolName::CompleteTask => {
            let task_id = TaskId::new(require_str(&arguments, "taskId")?);
            let status = parse_status(&require_str(&arguments, "status")?)?;
            let cost = require_cost(&arguments);
            let parent_dream_id = optional_str(&arguments, "parentDreamId").map(TaskId::new);
            dispatch::complete_task(store, tenant, &task_id, status, cost, parent_dream_id.as_ref()).await?;
            Ok(json!({"completed": true}))
        }

        ToolName::SendMessage => {
            let envelope = require_envelope(&arguments)?;
            let message_type = parse_message_type(&require_str(&arguments, "messageType")?)?;
            let payload = arguments.get("payload").cloned().unwrap_or(Value::Null);
            let session_id = session_id_arg(&arguments);
            let ttl_seconds = optional_u64(&arguments, "ttlSeconds");
            let message_ids = relay::send_message(store, tenant, envelope, message_type, payload, session_id, ttl_seconds).await?;
            Ok(json!({"messageIds": message_ids}))
        }

        ToolName::GetMessages => {
            let program = ProgramId::new(auth.program_id.as_str());
            let session_id = session_id_arg(&arguments);
            let filters = relay::MessageFilters {
                since: None,
                include_delivered: optional_bool(&arguments, "includeDelivered").unwrap_or(false),
            };
            let messages = relay::get_messages(store, tenant, &program, session_id.as_ref(), filters).await?;
            Ok(json!({"messages": messages}))
        }

        ToolName::CreateSession => {
            let session_id = SessionId::new(require_str(&arguments, "sessionId")?);
            let program_id = ProgramId::new(auth.program_id.as_str());
            let name = optional_str(&arguments, "name");
            let session = pulse::create_session(store, tenant, session_id, program_id, name, ctx.session_mode).await?;
            Ok(serde_json::to_value(session).map_err(|err| GateError::Handler(err.to_string()))?)
        }

        ToolName::UpdateSession => {
            let session_id = SessionId::new(require_str(&arguments, "sessionId")?);
            let update = pulse::SessionUpdate {
                progress: optional_str(&arguments, "progress"),
                current_action: optional_str(&arguments, "currentAction"),
                close_as: optional_str(&arguments, "closeAs").map(|raw| parse_status(&raw)).transpose()?,
            };
            let session = pulse::update_session(store, tenant, &session_id, update).await?;
            Ok(serde_json::to_value(session).map_err(|err| GateError::Handler(err.to_string()))?)
        }

        ToolName::ListSessions => {
            let program_id = optional_str(&arguments, "programId").map(ProgramId::new);
            let sessions = pulse::list_sessions(store, tenant, program_id.as_ref()).await?;
            Ok(json!({"sessions": sessions}))
        }

        ToolName::AskQuestion => {
            let question_id = TaskId::new(require_str(&arguments, "questionId")?);
            let source = ProgramId::new(auth.program_id.as_str());
            let target = require_str(&arguments, "target")?;
            let prompt = require_str(&arguments, "prompt")?;
            let encryption_key = optional_bool(&arguments, "encrypted").unwrap_or(false).then_some(&auth.encryption_key);
            let task = signal::ask_question(store, tenant, question_id, source, target, prompt, encryption_key).await?;
            Ok(serde_json::to_value(task).map_err(|err| GateError::Handler(err.to_string()))?)
        }

        ToolName::GetResponse => {
            let question_id = TaskId::new(require_str(&arguments, "questionId")?);
            let encryption_key = Some(&auth.encryption_key);
            match signal::get_response(store, tenant, &question_id, encryption_key).await? {
                signal::QuestionResponse::Pending => Ok(json!({"pending": true})),
                signal::QuestionResponse::Answered(answer) => Ok(json!({"pending": false, "response": answer})),
            }
        }

        ToolName::SendAlert => {
            let alert_id = TaskId::new(require_str(&arguments, "alertId")?);
            let source = ProgramId::new(auth.program_id.as_str());
            let target = require_str(&arguments, "target")?;
            let message = require_str(&arguments, "message")?;
            let alert_type = require_str(&arguments, "alertType")?;
            signal::send_alert(store, tenant, alert_id, source, target, message, alert_type).await?;
            Ok(json!({"sent": true}))
        }

        ToolName::DreamPeek => {
            let dreams = dream::dream_peek(store, tenant).await?;
            Ok(json!({"dreams": dreams}))
        }

        ToolName::DreamActivate => {
            let dream_id = TaskId::new(require_str(&arguments, "dreamId")?);
            let activated = dream::dream_activate(store, ctx.gate.as_ref(), tenant, &dream_id).await?;
            Ok(serde_json::to_value(activated).map_err(|err| GateError::Handler(err.to_string()))?)
        }

        ToolName::GetOperationalMetrics => {
            let month_key = optional_str(&arguments, "month")
                .unwrap_or_else(|| crate::gate::unix_millis_to_month_key(store.server_timestamp().as_unix_millis()));
            let path = DocPath::tenant_scoped(tenant, "usage", &month_key);
            let usage: coordkernel_core::UsageCounter = get_typed_optional(store, &path).await?.unwrap_or_default();
            Ok(json!({"month": month_key, "usage": usage}))
        }
    }
}
