// coordkernel-core/src/core/lifecycle.rs
// ============================================================================
// Module: Coordination Kernel Lifecycle Engine
// Description: Pure state machine validating and applying entity transitions.
// Purpose: Be the single gate on every entity's `status` field.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! Tasks, sessions, dreams, and sprint-stories all share one status
//! vocabulary but different transition tables. No module other than this one
//! may write a `status` field directly; every write goes through
//! [`transition`], which is pure and side-effect-free so it can be property
//! tested in isolation from the store.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Status
// ============================================================================

/// The shared lifecycle status vocabulary.
///
/// `Archived` is the terminal state chosen for this implementation; the
/// source material used `derezzed` and `archived` interchangeably across
/// different entity trees, which this engine treats as one vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Entity has been written but not yet claimed or activated.
    Created,
    /// Entity is in flight, owned by a session.
    Active,
    /// Entity is waiting on another entity (`blockedBy`).
    Blocked,
    /// Entity has begun its final transition but is not yet terminal.
    Completing,
    /// Entity finished successfully. Terminal.
    Done,
    /// Entity finished unsuccessfully, may retry depending on kind. Terminal
    /// unless the kind's table permits `Failed -> Created`.
    Failed,
    /// Entity is permanently retired. Terminal for every kind.
    Archived,
}

/// The entity kinds that route through the lifecycle engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A plain dispatch task (including `question` and `sprint` sub-types).
    Task,
    /// A pulse session.
    Session,
    /// A long-running budgeted dream task.
    Dream,
    /// A sprint-story sub-task of a sprint.
    SprintStory,
}

/// All seven statuses, in the fixed order the transition tables are defined over.
pub const ALL_STATUSES: [Status; 7] = [
    Status::Created,
    Status::Active,
    Status::Blocked,
    Status::Completing,
    Status::Done,
    Status::Failed,
    Status::Archived,
];

// ============================================================================
// SECTION: Errors
// ============================================================================

/// A rejected lifecycle transition, carrying enough context for a 409 response.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("illegal transition for {kind:?}: {from:?} -> {to:?}")]
pub struct LifecycleError {
    /// The entity kind the transition was attempted on.
    pub kind: EntityKind,
    /// The status the entity was in.
    pub from: Status,
    /// The status that was requested.
    pub to: Status,
}

// ============================================================================
// SECTION: Transition Tables
// ============================================================================

/// Returns the set of statuses `kind` may move to from `from`.
///
/// The table is total on [`ALL_STATUSES`]: every status has an entry, even
/// if that entry is empty (terminal).
fn allowed_targets(kind: EntityKind, from: Status) -> &'static [Status] {
    use Status::{Active, Archived, Blocked, Completing, Created, Done, Failed};

    match (kind, from) {
        // Archived has no outbound edges for any kind.
        (_, Archived) => &[],

        (EntityKind::Task, Created) => &[Active, Archived],
        (EntityKind::Task, Active) => &[Blocked, Completing, Done, Failed, Archived],
        (EntityKind::Task, Blocked) => &[Active, Archived],
        (EntityKind::Task, Completing) => &[Done, Failed, Archived],
        (EntityKind::Task, Done) => &[Archived],
        // Tasks retry: failed -> created -> active.
        (EntityKind::Task, Failed) => &[Created, Archived],

        (EntityKind::Session, Created) => &[Active, Archived],
        (EntityKind::Session, Active) => &[Done, Failed, Archived],
        (EntityKind::Session, Blocked) => &[],
        (EntityKind::Session, Completing) => &[Done, Failed, Archived],
        (EntityKind::Session, Done) => &[Archived],
        // Sessions do not retry.
        (EntityKind::Session, Failed) => &[Archived],

        // Dreams never enter Blocked and do not retry.
        (EntityKind::Dream, Created) => &[Active, Archived],
        (EntityKind::Dream, Active) => &[Completing, Done, Failed, Archived],
        (EntityKind::Dream, Blocked) => &[],
        (EntityKind::Dream, Completing) => &[Done, Failed, Archived],
        (EntityKind::Dream, Done) => &[Archived],
        (EntityKind::Dream, Failed) => &[Archived],

        (EntityKind::SprintStory, Created) => &[Active, Blocked, Archived],
        (EntityKind::SprintStory, Active) => &[Blocked, Completing, Done, Failed, Archived],
        (EntityKind::SprintStory, Blocked) => &[Active, Archived],
        (EntityKind::SprintStory, Completing) => &[Done, Failed, Archived],
        (EntityKind::SprintStory, Done) => &[Archived],
        (EntityKind::SprintStory, Failed) => &[Created, Archived],
    }
}

// ============================================================================
// SECTION: Public API
// ============================================================================

/// Returns `true` when `kind` may move from `from` to `to`.
#[must_use]
pub fn validate_transition(kind: EntityKind, from: Status, to: Status) -> bool {
    allowed_targets(kind, from).contains(&to)
}

/// Applies a transition, returning the new status or a [`LifecycleError`].
///
/// # Errors
/// Returns [`LifecycleError`] when `validate_transition` would return `false`.
pub fn transition(kind: EntityKind, from: Status, to: Status) -> Result<Status, LifecycleError> {
    if validate_transition(kind, from, to) {
        Ok(to)
    } else {
        Err(LifecycleError { kind, from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::ALL_STATUSES;
    use super::EntityKind;
    use super::Status;
    use super::allowed_targets;
    use super::transition;
    use super::validate_transition;

    const ALL_KINDS: [EntityKind; 4] = [
        EntityKind::Task,
        EntityKind::Session,
        EntityKind::Dream,
        EntityKind::SprintStory,
    ];

    #[test]
    fn archived_has_no_outbound_edges_for_any_kind() {
        for kind in ALL_KINDS {
            for to in ALL_STATUSES {
                assert!(!validate_transition(kind, Status::Archived, to));
            }
        }
    }

    #[test]
    fn every_kind_and_status_has_a_table_entry() {
        for kind in ALL_KINDS {
            for from in ALL_STATUSES {
                // Must not panic: every (kind, from) pair is handled explicitly.
                let _ = allowed_targets(kind, from);
            }
        }
    }

    #[test]
    fn tasks_retry_through_failed_then_created() {
        assert!(validate_transition(
            EntityKind::Task,
            Status::Failed,
            Status::Created
        ));
        assert!(validate_transition(
            EntityKind::Task,
            Status::Created,
            Status::Active
        ));
    }

    #[test]
    fn sessions_and_dreams_do_not_retry() {
        assert!(!validate_transition(
            EntityKind::Session,
            Status::Failed,
            Status::Created
        ));
        assert!(!validate_transition(
            EntityKind::Dream,
            Status::Failed,
            Status::Created
        ));
    }

    #[test]
    fn dreams_never_enter_blocked() {
        assert!(!validate_transition(
            EntityKind::Dream,
            Status::Active,
            Status::Blocked
        ));
        assert!(!validate_transition(
            EntityKind::Dream,
            Status::Created,
            Status::Blocked
        ));
    }

    #[test]
    fn rejected_transition_carries_structured_context() {
        let err = transition(EntityKind::Task, Status::Done, Status::Active)
            .expect_err("done -> active must be illegal");
        assert_eq!(err.kind, EntityKind::Task);
        assert_eq!(err.from, Status::Done);
        assert_eq!(err.to, Status::Active);
    }
}
