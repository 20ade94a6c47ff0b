// coordkernel-core/src/core/task.rs
// ============================================================================
// Module: Coordination Kernel Task
// Description: The unified dispatch work unit and its type-specific sub-blocks.
// Purpose: Represent `task | question | dream | sprint | sprint-story` as one
//          tagged variant rather than a flat record of optional fields.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A task is the unit dispatch hands out and claims. Its `type` tag selects
//! which sub-block is present; callers match on [`TaskBody`] rather than
//! probing a bag of optional fields.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::envelope::Envelope;
use crate::core::identifiers::SessionId;
use crate::core::identifiers::TaskId;
use crate::core::lifecycle::Status;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Type-Specific Sub-Blocks
// ============================================================================

/// Sub-block for `type=question`: a human-facing question with an optional
/// encrypted response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionBlock {
    /// The question text (subject to `encrypted`).
    pub prompt: String,
    /// The human's answer, once recorded (subject to `encrypted`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

/// Sub-block for `type=dream`: a long-running budgeted run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DreamBlock {
    /// The program that owns this dream's budget.
    pub agent: String,
    /// Hard spend ceiling in USD.
    pub budget_cap_usd: f64,
    /// Cumulative spend in USD, incremented as child tasks complete.
    #[serde(default)]
    pub budget_consumed_usd: f64,
    /// Wall-clock timeout from `startedAt`, in hours.
    pub timeout_hours: f64,
    /// Source branch this dream is working against.
    pub branch: String,
    /// Free-text outcome, set on completion or timeout.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    /// Morning-report summary, set when the dream is reviewed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub morning_report: Option<String>,
}

impl DreamBlock {
    /// Returns `true` once consumed spend has reached or exceeded the cap.
    #[must_use]
    pub fn is_budget_exceeded(&self) -> bool {
        self.budget_consumed_usd >= self.budget_cap_usd
    }
}

/// Sub-block for `type=sprint`: a grouping of sprint-story child tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SprintBlock {
    /// Ids of the sprint-story tasks that belong to this sprint.
    pub story_ids: Vec<TaskId>,
    /// Sprint goal text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
}

/// The type-discriminated body of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TaskBody {
    /// A plain work unit with no type-specific sub-block.
    Task,
    /// A human-facing question.
    Question(QuestionBlock),
    /// A long-running budgeted run.
    Dream(DreamBlock),
    /// A sprint grouping.
    Sprint(SprintBlock),
    /// A single story within a sprint.
    SprintStory,
}

// ============================================================================
// SECTION: Retry Block
// ============================================================================

/// How a failed task is allowed to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicy {
    /// The task never retries automatically.
    None,
    /// The task retries immediately on failure, up to `max_retries`.
    Immediate,
    /// The task retries after an exponential backoff, up to `max_retries`.
    Backoff,
}

/// One recorded retry attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryAttempt {
    /// When the retry was initiated.
    pub at: Timestamp,
    /// The failure reason that triggered this retry.
    pub reason: String,
}

/// Retry configuration and history carried on every task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RetryBlock {
    /// The retry policy in effect.
    #[serde(default)]
    pub policy: Option<RetryPolicy>,
    /// Maximum number of retries permitted.
    #[serde(default)]
    pub max_retries: u32,
    /// Number of retries consumed so far.
    #[serde(default)]
    pub retry_count: u32,
    /// History of past retry attempts.
    #[serde(default)]
    pub history: Vec<RetryAttempt>,
}

// ============================================================================
// SECTION: Cost Fields
// ============================================================================

/// Token and dollar cost fields merged onto a task at completion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct CostFields {
    /// Input tokens consumed.
    #[serde(default)]
    pub tokens_in: u64,
    /// Output tokens produced.
    #[serde(default)]
    pub tokens_out: u64,
    /// Total cost in USD.
    #[serde(default)]
    pub cost_usd: f64,
}

// ============================================================================
// SECTION: Task
// ============================================================================

/// The unified dispatch work unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task id.
    pub id: TaskId,
    /// Shared addressing envelope.
    #[serde(flatten)]
    pub envelope: Envelope,
    /// Short human title.
    pub title: String,
    /// Full instructions for the executing program.
    pub instructions: String,
    /// Free-form context payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Type-discriminated sub-block.
    #[serde(flatten)]
    pub body: TaskBody,
    /// Current lifecycle status.
    pub status: Status,
    /// Ids of tasks that must complete before this one may proceed.
    #[serde(default)]
    pub blocked_by: Vec<TaskId>,
    /// The session currently holding the claim, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// When the task was created.
    pub created_at: Timestamp,
    /// When the task was claimed (transitioned to active).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Timestamp>,
    /// When the task reached a terminal status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Timestamp>,
    /// Last heartbeat observed from the claiming session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<Timestamp>,
    /// Whether content fields are AES-256-CBC encrypted.
    #[serde(default)]
    pub encrypted: bool,
    /// Whether this task has been archived.
    #[serde(default)]
    pub archived: bool,
    /// Retry configuration and history.
    #[serde(default)]
    pub retry: RetryBlock,
    /// Token and dollar cost accrued by this task.
    #[serde(default)]
    pub cost: CostFields,
    /// Reason a revival control loop last reverted this task, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revert_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::DreamBlock;

    #[test]
    fn dream_budget_exceeded_at_or_above_cap() {
        let mut dream = DreamBlock {
            agent: "builder".to_string(),
            budget_cap_usd: 1.00,
            budget_consumed_usd: 0.50,
            timeout_hours: 8.0,
            branch: "main".to_string(),
            outcome: None,
            morning_report: None,
        };
        assert!(!dream.is_budget_exceeded());
        dream.budget_consumed_usd = 1.05;
        assert!(dream.is_budget_exceeded());
    }
}
