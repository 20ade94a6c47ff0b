// coordkernel-core/src/core/session.rs
// ============================================================================
// Module: Coordination Kernel Pulse Session
// Description: Session entity, compliance state machine, session-id validation.
// Purpose: Back the pulse module and the compliance/session-id rules (component 17).
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A pulse session tracks one program's in-flight run: its heartbeat, its
//! declared progress, and (optionally) a compliance sub-state machine that
//! tracks whether the program completed its boot checklist and keeps
//! journaling. Session ids follow a format convention that is advisory in
//! "lenient" mode and enforced in "strict" mode.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::ProgramId;
use crate::core::identifiers::SessionId;
use crate::core::lifecycle::Status;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Compliance State Machine
// ============================================================================

/// Compliance state for a session's boot and journaling behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceState {
    /// No boot checklist has been observed yet.
    Unregistered,
    /// Boot checklist is in progress.
    Booting,
    /// Boot checklist completed; journaling is current.
    Compliant,
    /// Journaling has gone stale once; next staleness degrades further.
    Warned,
    /// Journaling is stale beyond the warn threshold.
    Degraded,
}

/// Compliance tracking attached to a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ComplianceBlock {
    /// Current compliance state.
    #[serde(default = "default_compliance_state")]
    pub state: ComplianceState,
    /// Steps of the boot checklist completed so far.
    #[serde(default)]
    pub boot_checklist_done: Vec<String>,
    /// Number of journal entries recorded.
    #[serde(default)]
    pub journal_count: u32,
    /// History of state transitions, most recent last.
    #[serde(default)]
    pub state_history: Vec<ComplianceState>,
}

impl Default for ComplianceState {
    fn default() -> Self {
        Self::Unregistered
    }
}

/// Serde default for `compliance.state` on blocks deserialized without one.
const fn default_compliance_state() -> ComplianceState {
    ComplianceState::Unregistered
}

// ============================================================================
// SECTION: Session
// ============================================================================

/// A pulse session: one program's in-flight run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique session id.
    pub id: SessionId,
    /// The program this session belongs to.
    pub program_id: ProgramId,
    /// Current lifecycle status.
    pub status: Status,
    /// Human-readable session name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Free-text progress description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
    /// The action currently being performed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_action: Option<String>,
    /// When the session was created.
    pub created_at: Timestamp,
    /// Last time any session field was updated.
    pub last_update: Timestamp,
    /// Last heartbeat timestamp.
    pub last_heartbeat: Timestamp,
    /// Compliance tracking, if this session opted in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compliance: Option<ComplianceBlock>,
    /// Whether this session has been archived by the stale-session reaper.
    #[serde(default)]
    pub archived: bool,
}

// ============================================================================
// SECTION: Session-ID Validation
// ============================================================================

/// Enforcement mode for session-id format validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionIdMode {
    /// Non-conforming ids are accepted with a warning.
    Lenient,
    /// Non-conforming ids are rejected.
    Strict,
}

/// The outcome of validating a session id against the format rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdCheck {
    /// Whether the id conforms to the current `{program}[-{env}].{task}` shape.
    pub legacy: bool,
    /// Whether the id was accepted given the enforcement mode.
    pub accepted: bool,
}

/// Validates a session id against the `{program}[-{env}].{task}` convention.
///
/// Conforming ids match
/// `^([A-Za-z0-9_-]+)(?:-([A-Za-z0-9_-]+))?\.([A-Za-z0-9_-]+)$`.
/// Legacy shapes (`session_\d+`, or a bare alphanumeric token) are accepted
/// with `legacy=true`. In [`SessionIdMode::Lenient`] mode, anything else is
/// still accepted (but flagged non-legacy-compliant by virtue of failing
/// both shapes); in [`SessionIdMode::Strict`] mode it is rejected.
#[must_use]
pub fn validate_session_id(id: &str, mode: SessionIdMode) -> SessionIdCheck {
    if matches_current_shape(id) {
        return SessionIdCheck {
            legacy: false,
            accepted: true,
        };
    }

    if matches_legacy_shape(id) {
        return SessionIdCheck {
            legacy: true,
            accepted: true,
        };
    }

    SessionIdCheck {
        legacy: true,
        accepted: mode == SessionIdMode::Lenient,
    }
}

/// Matches `^([A-Za-z0-9_-]+)(?:-([A-Za-z0-9_-]+))?\.([A-Za-z0-9_-]+)$`.
fn matches_current_shape(id: &str) -> bool {
    let Some((head, task)) = id.split_once('.') else {
        return false;
    };
    !head.is_empty() && !task.is_empty() && is_token_charset(head) && is_token_charset(task)
}

/// Matches `session_\d+` or a bare alphanumeric/underscore/dash token with no dot.
fn matches_legacy_shape(id: &str) -> bool {
    if let Some(digits) = id.strip_prefix("session_") {
        return !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit());
    }
    !id.is_empty() && !id.contains('.') && is_token_charset(id)
}

/// `true` when every character is alphanumeric, `_`, or `-`.
fn is_token_charset(s: &str) -> bool {
    !s.is_empty()
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

#[cfg(test)]
mod tests {
    use super::SessionIdMode;
    use super::validate_session_id;

    #[test]
    fn legacy_numeric_session_is_accepted_as_legacy() {
        let check = validate_session_id("session_1234567890", SessionIdMode::Strict);
        assert!(check.legacy);
        assert!(check.accepted);
    }

    #[test]
    fn current_shape_is_accepted_as_non_legacy() {
        let check = validate_session_id("builder-prod.task1", SessionIdMode::Strict);
        assert!(!check.legacy);
        assert!(check.accepted);
    }

    #[test]
    fn malformed_id_is_rejected_in_strict_mode_only() {
        let strict = validate_session_id("bad id", SessionIdMode::Strict);
        assert!(!strict.accepted);

        let lenient = validate_session_id("bad id", SessionIdMode::Lenient);
        assert!(lenient.accepted);
        assert!(lenient.legacy);
    }
}
