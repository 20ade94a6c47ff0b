// coordkernel-server/src/pulse.rs
// ============================================================================
// Module: Pulse
// Description: Session create/update/list, heartbeat, compliance tracking.
// Purpose: spec.md §4.8, the program-session plane.
// Dependencies: coordkernel-core
// ============================================================================

//! ## Overview
//! A pulse session tracks one program's in-flight run. [`create_session`]
//! starts it (`created -> active`) and seeds an [`ComplianceBlock`] in
//! `Unregistered` state; [`update_session`] is the heartbeat path, bumping
//! `last_heartbeat`/`last_update` and optionally closing the session out
//! through the lifecycle engine; [`list_sessions`] returns the non-archived
//! set newest-first. Session-id format enforcement (lenient vs strict) is
//! [`coordkernel_core::validate_session_id`]; this module calls it but does
//! not own the policy.

// ============================================================================
// SECTION: Imports
// ============================================================================

use coordkernel_core::ComplianceBlock;
use coordkernel_core::DocPath;
use coordkernel_core::DocumentStore;
use coordkernel_core::EntityKind;
use coordkernel_core::ProgramId;
use coordkernel_core::Query;
use coordkernel_core::Session;
use coordkernel_core::SessionId;
use coordkernel_core::SessionIdMode;
use coordkernel_core::SortOrder;
use coordkernel_core::Status;
use coordkernel_core::get_typed;
use coordkernel_core::put_typed;
use coordkernel_core::query_typed;
use coordkernel_core::transition;
use coordkernel_core::validate_session_id;

use crate::error::GateError;

// ============================================================================
// SECTION: Create
// ============================================================================

/// Starts a new pulse session, transitioning it straight to `active` and
/// seeding compliance tracking in `Unregistered` state. Rejects a
/// malformed id outright in [`SessionIdMode::Strict`]; in
/// [`SessionIdMode::Lenient`] a malformed id is accepted and flagged via the
/// returned legacy marker.
///
/// # Errors
/// Returns [`GateError::Validation`] when `mode` is strict and the id fails
/// the format check, or [`GateError::Store`] on a storage failure.
pub async fn create_session(
    store: &dyn DocumentStore,
    tenant: &coordkernel_core::TenantUid,
    session_id: SessionId,
    program_id: ProgramId,
    name: Option<String>,
    mode: SessionIdMode,
) -> Result<Session, GateError> {
    let check = validate_session_id(session_id.as_str(), mode);
    if !check.accepted {
        return Err(GateError::Validation {
            message: format!("session id `{session_id}` does not match the required format"),
        });
    }

    let now = store.server_timestamp();
    let status = transition(EntityKind::Session, Status::Created, Status::Active)?;
    let session = Session {
        id: session_id.clone(),
        program_id,
        status,
        name,
        progress: None,
        current_action: None,
        created_at: now,
        last_update: now,
        last_heartbeat: now,
        compliance: Some(ComplianceBlock::default()),
        archived: false,
    };
    let path = DocPath::tenant_scoped(tenant, "sessions", session_id.as_str());
    put_typed(store, &path, &session).await?;
    Ok(session)
}

// ============================================================================
// SECTION: Update
// ============================================================================

/// Fields an `update_session` call may change. `None` leaves a field
/// untouched; heartbeat and `last_update` always advance.
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    /// New progress description, if changed.
    pub progress: Option<String>,
    /// New current-action description, if changed.
    pub current_action: Option<String>,
    /// A terminal status to transition into (`done` or `failed`), if the
    /// caller is closing the session out this call.
    pub close_as: Option<Status>,
}

/// Bumps `last_heartbeat`/`last_update`, applies any field changes, and — when
/// `update.close_as` is set — routes the status change through the lifecycle
/// engine rather than writing `status` directly.
///
/// # Errors
/// Returns [`GateError::Lifecycle`] when `close_as` names an illegal
/// transition, or [`GateError::Store`] on a storage failure.
pub async fn update_session(
    store: &dyn DocumentStore,
    tenant: &coordkernel_core::TenantUid,
    session_id: &SessionId,
    update: SessionUpdate,
) -> Result<Session, GateError> {
    let path = DocPath::tenant_scoped(tenant, "sessions", session_id.as_str());
    let mut session: Session = get_typed(store, &path).await?;
    let now = store.server_timestamp();

    session.last_heartbeat = now;
    session.last_update = now;
    if update.progress.is_some() {
        session.progress = update.progress;
    }
    if update.current_action.is_some() {
        session.current_action = update.current_action;
    }
    if let Some(target_status) = update.close_as {
        session.status = transition(EntityKind::Session, session.status, target_status)?;
    }

    put_typed(store, &path, &session).await?;
    Ok(session)
}

// ============================================================================
// SECTION: List
// ============================================================================

/// Returns non-archived sessions ordered by `last_update` descending,
/// optionally restricted to one program.
///
/// # Errors
/// Returns [`GateError::Store`] on a storage failure.
pub async fn list_sessions(
    store: &dyn DocumentStore,
    tenant: &coordkernel_core::TenantUid,
    program_id: Option<&ProgramId>,
) -> Result<Vec<Session>, GateError> {
    let mut query = Query::new().order_by("last_update", SortOrder::Desc);
    if let Some(program_id) = program_id {
        query = query.with_eq("program_id", serde_json::json!(program_id.as_str()));
    }
    let collection_path = format!("tenants/{tenant}/sessions");
    let sessions: Vec<Session> = query_typed(store, &collection_path, &query).await?;
    Ok(sessions.into_iter().filter(|session| !session.archived).collect())
}

#[cfg(test)]
mod tests {
    use coordkernel_core::InMemoryDocumentStore;
    use coordkernel_core::TenantUid;

    use super::*;

    #[tokio::test]
    async fn create_session_transitions_to_active_with_compliance_block() {
        let store = InMemoryDocumentStore::new();
        let tenant = TenantUid::new("acme");
        let session = create_session(
            &store,
            &tenant,
            SessionId::new("builder.task1"),
            ProgramId::new("builder"),
            None,
            SessionIdMode::Strict,
        )
        .await
        .expect("create");
        assert_eq!(session.status, Status::Active);
        assert!(session.compliance.is_some());
    }

    #[tokio::test]
    async fn strict_mode_rejects_malformed_session_id() {
        let store = InMemoryDocumentStore::new();
        let tenant = TenantUid::new("acme");
        let result = create_session(
            &store,
            &tenant,
            SessionId::new("bad id"),
            ProgramId::new("builder"),
            None,
            SessionIdMode::Strict,
        )
        .await;
        assert!(matches!(result, Err(GateError::Validation { .. })));
    }

    #[tokio::test]
    async fn update_session_bumps_heartbeat_and_can_close() {
        let store = InMemoryDocumentStore::new();
        let tenant = TenantUid::new("acme");
        let session_id = SessionId::new("builder.task1");
        create_session(&store, &tenant, session_id.clone(), ProgramId::new("builder"), None, SessionIdMode::Strict)
            .await
            .expect("create");

        let updated = update_session(
            &store,
            &tenant,
            &session_id,
            SessionUpdate {
                progress: Some("halfway".to_string()),
                current_action: None,
                close_as: Some(Status::Done),
            },
        )
        .await
        .expect("update");
        assert_eq!(updated.status, Status::Done);
        assert_eq!(updated.progress, Some("halfway".to_string()));
    }

    #[tokio::test]
    async fn list_sessions_excludes_archived() {
        let store = InMemoryDocumentStore::new();
        let tenant = TenantUid::new("acme");
        create_session(&store, &tenant, SessionId::new("builder.task1"), ProgramId::new("builder"), None, SessionIdMode::Strict)
            .await
            .expect("create");

        let archived_id = SessionId::new("builder.task2");
        create_session(&store, &tenant, archived_id.clone(), ProgramId::new("builder"), None, SessionIdMode::Strict)
            .await
            .expect("create");
        let path = DocPath::tenant_scoped(&tenant, "sessions", archived_id.as_str());
        let mut archived: Session = get_typed(&store, &path).await.expect("read");
        archived.archived = true;
        put_typed(&store, &path, &archived).await.expect("write");

        let sessions = list_sessions(&store, &tenant, None).await.expect("list");
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, SessionId::new("builder.task1"));
    }
}
