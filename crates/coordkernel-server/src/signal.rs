// coordkernel-server/src/signal.rs
// ============================================================================
// Module: Signal
// Description: Human<->agent question/response and alert fan-out.
// Purpose: spec.md §4.9.
// Dependencies: coordkernel-core, coordkernel-broker
// ============================================================================

//! ## Overview
//! A signal question rides as a `type=question` task so it shares dispatch's
//! lifecycle, claim, and audit plumbing; [`ask_question`] optionally encrypts
//! `prompt` under the caller's derived key, and [`get_response`] decrypts
//! `response` the same way once the human answers. [`send_alert`] produces a
//! short-TTL relay message *and* a mirrored task, so the alert shows up
//! whichever surface — push-notified mobile client or tool-polling program —
//! the human happens to be looking at (spec.md §4.9).

// ============================================================================
// SECTION: Imports
// ============================================================================

use coordkernel_core::Action;
use coordkernel_core::DocPath;
use coordkernel_core::DocumentStore;
use coordkernel_core::Envelope;
use coordkernel_core::MessageType;
use coordkernel_core::Priority;
use coordkernel_core::ProgramId;
use coordkernel_core::QuestionBlock;
use coordkernel_core::RetryBlock;
use coordkernel_core::Status;
use coordkernel_core::Task;
use coordkernel_core::TaskBody;
use coordkernel_core::TaskId;
use coordkernel_core::TenantUid;
use coordkernel_core::core::crypto::decrypt;
use coordkernel_core::core::crypto::encrypt;
use coordkernel_core::get_typed;
use coordkernel_core::put_typed;
use serde_json::Value;

use crate::error::GateError;
use crate::relay;

/// Default TTL for an alert's relay leg (spec.md §4.9: "short-TTL (1h)").
const ALERT_TTL_SECONDS: u64 = 3_600;

// ============================================================================
// SECTION: Ask / Answer
// ============================================================================

/// Writes a question task, optionally encrypting `prompt` under `encryption_key`.
///
/// # Errors
/// Returns [`GateError::Store`] on a storage failure.
pub async fn ask_question(
    store: &dyn DocumentStore,
    tenant: &TenantUid,
    question_id: TaskId,
    source: ProgramId,
    target: String,
    prompt: String,
    encryption_key: Option<&[u8; 32]>,
) -> Result<Task, GateError> {
    let now = store.server_timestamp();
    let (prompt, encrypted) = match encryption_key {
        Some(key) => (encrypt(prompt.as_bytes(), key), true),
        None => (prompt, false),
    };
    let task = Task {
        id: question_id.clone(),
        envelope: Envelope {
            source,
            target,
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
        title: "question".to_string(),
        instructions: String::new(),
        context: None,
        body: TaskBody::Question(QuestionBlock { prompt, response: None }),
        status: Status::Created,
        blocked_by: Vec::new(),
        session_id: None,
        created_at: now,
        started_at: None,
        completed_at: None,
        last_heartbeat: None,
        encrypted,
        archived: false,
        retry: RetryBlock::default(),
        cost: coordkernel_core::CostFields::default(),
        revert_reason: None,
    };
    let path = DocPath::tenant_scoped(tenant, "tasks", question_id.as_str());
    put_typed(store, &path, &task).await?;
    Ok(task)
}

/// Outcome of polling a question for its answer.
#[derive(Debug, Clone)]
pub enum QuestionResponse {
    /// No answer recorded yet.
    Pending,
    /// The human's answer, decrypted if the question was encrypted.
    Answered(String),
}

/// Reads a question task and decrypts its response field when present.
///
/// # Errors
/// Returns [`GateError::Store`] on a storage failure, or
/// [`GateError::Validation`] when the task is not a question or decryption fails.
pub async fn get_response(
    store: &dyn DocumentStore,
    tenant: &TenantUid,
    question_id: &TaskId,
    encryption_key: Option<&[u8; 32]>,
) -> Result<QuestionResponse, GateError> {
    let path = DocPath::tenant_scoped(tenant, "tasks", question_id.as_str());
    let task: Task = get_typed(store, &path).await?;
    let TaskBody::Question(question) = &task.body else {
        return Err(GateError::Validation {
            message: format!("task `{question_id}` is not a question"),
        });
    };
    let Some(response) = &question.response else {
        return Ok(QuestionResponse::Pending);
    };
    let answer = match (task.encrypted, encryption_key) {
        (true, Some(key)) => {
            let plaintext = decrypt(response, key).map_err(|_err| GateError::Validation {
                message: "question response failed to decrypt".to_string(),
            })?;
            String::from_utf8(plaintext).map_err(|_err| GateError::Validation {
                message: "question response is not valid UTF-8 after decryption".to_string(),
            })?
        }
        _ => response.clone(),
    };
    Ok(QuestionResponse::Answered(answer))
}

// ============================================================================
// SECTION: Alert
// ============================================================================

/// Sends an alert as both a short-TTL relay message and a mirrored
/// surfaceable task, so the human sees it on whichever surface they are on.
///
/// # Errors
/// Returns [`GateError::Store`] on a storage failure.
pub async fn send_alert(
    store: &dyn DocumentStore,
    tenant: &TenantUid,
    alert_id: TaskId,
    source: ProgramId,
    target: String,
    message: String,
    alert_type: String,
) -> Result<(), GateError> {
    let envelope = Envelope {
        source: source.clone(),
        target: target.clone(),
        priority: Priority::High,
        action: Action::Interrupt,
        ttl: None,
        reply_to: None,
        thread_id: None,
        provenance: None,
        trace_id: None,
        span_id: None,
        parent_span_id: None,
        correlation_id: None,
        schema_version: coordkernel_core::core::envelope::SCHEMA_VERSION,
    };

    relay::send_message(
        store,
        tenant,
        envelope.clone(),
        MessageType::Status,
        Value::String(message.clone()),
        None,
        Some(ALERT_TTL_SECONDS),
    )
    .await?;

    let now = store.server_timestamp();
    let task = Task {
        id: alert_id.clone(),
        envelope,
        title: alert_type,
        instructions: message,
        context: None,
        body: TaskBody::Task,
        status: Status::Created,
        blocked_by: Vec::new(),
        session_id: None,
        created_at: now,
        started_at: None,
        completed_at: None,
        last_heartbeat: None,
        encrypted: false,
        archived: false,
        retry: RetryBlock::default(),
        cost: coordkernel_core::CostFields::default(),
        revert_reason: None,
    };
    let path = DocPath::tenant_scoped(tenant, "tasks", alert_id.as_str());
    put_typed(store, &path, &task).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use coordkernel_core::InMemoryDocumentStore;

    use super::*;

    #[tokio::test]
    async fn ask_and_answer_round_trip_without_encryption() {
        let store = InMemoryDocumentStore::new();
        let tenant = TenantUid::new("acme");
        let question_id = TaskId::new("q-1");
        ask_question(
            &store,
            &tenant,
            question_id.clone(),
            ProgramId::new("builder"),
            "mobile".to_string(),
            "deploy now?".to_string(),
            None,
        )
        .await
        .expect("ask");

        let pending = get_response(&store, &tenant, &question_id, None).await.expect("poll");
        assert!(matches!(pending, QuestionResponse::Pending));

        let path = DocPath::tenant_scoped(&tenant, "tasks", question_id.as_str());
        let mut task: Task = get_typed(&store, &path).await.expect("read");
        if let TaskBody::Question(question) = &mut task.body {
            question.response = Some("yes".to_string());
        }
        put_typed(&store, &path, &task).await.expect("write");

        let answered = get_response(&store, &tenant, &question_id, None).await.expect("poll");
        assert!(matches!(answered, QuestionResponse::Answered(answer) if answer == "yes"));
    }

    #[tokio::test]
    async fn ask_and_answer_round_trip_with_encryption() {
        let store = InMemoryDocumentStore::new();
        let tenant = TenantUid::new("acme");
        let question_id = TaskId::new("q-2");
        let key = coordkernel_core::core::crypto::derive_identity_key("user-1");
        ask_question(
            &store,
            &tenant,
            question_id.clone(),
            ProgramId::new("builder"),
            "mobile".to_string(),
            "deploy now?".to_string(),
            Some(&key),
        )
        .await
        .expect("ask");

        let path = DocPath::tenant_scoped(&tenant, "tasks", question_id.as_str());
        let mut task: Task = get_typed(&store, &path).await.expect("read");
        if let TaskBody::Question(question) = &mut task.body {
            question.response = Some(encrypt(b"yes", &key));
        }
        put_typed(&store, &path, &task).await.expect("write");

        let answered = get_response(&store, &tenant, &question_id, Some(&key)).await.expect("poll");
        assert!(matches!(answered, QuestionResponse::Answered(answer) if answer == "yes"));
    }

    #[tokio::test]
    async fn send_alert_produces_both_a_relay_message_and_a_mirrored_task() {
        let store = InMemoryDocumentStore::new();
        let tenant = TenantUid::new("acme");
        send_alert(
            &store,
            &tenant,
            TaskId::new("alert-1"),
            ProgramId::new("sentinel"),
            "mobile".to_string(),
            "budget exceeded".to_string(),
            "budget".to_string(),
        )
        .await
        .expect("send alert");

        let messages = relay::get_messages(
            &store,
            &tenant,
            &ProgramId::new("mobile"),
            None,
            relay::MessageFilters::default(),
        )
        .await
        .expect("get messages");
        assert_eq!(messages.len(), 1);

        let path = DocPath::tenant_scoped(&tenant, "tasks", "alert-1");
        let task: Task = get_typed(&store, &path).await.expect("read mirrored task");
        assert_eq!(task.title, "budget");
    }
}
