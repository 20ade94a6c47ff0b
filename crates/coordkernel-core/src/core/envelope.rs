// coordkernel-core/src/core/envelope.rs
// ============================================================================
// Module: Coordination Kernel Envelope
// Description: Addressing and correlation fields shared by tasks and relay messages.
// Purpose: Give dispatch and relay one common addressing shape.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Every task and relay message carries the same addressing envelope:
//! who sent it, who (or what group) it targets, how urgently, under what
//! action mode, and the correlation fields needed to stitch a request
//! across ledger, audit, and analytics writes.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::CorrelationId;
use crate::core::identifiers::ProgramId;
use crate::core::identifiers::SpanId;
use crate::core::identifiers::ThreadId;
use crate::core::identifiers::TraceId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Enumerations
// ============================================================================

/// Delivery priority for a task or relay message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Can wait behind other work.
    Low,
    /// Default priority.
    Normal,
    /// Should preempt queued work where the receiver supports it.
    High,
}

/// How the receiver should treat the envelope relative to its current work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Preempt whatever the receiver is doing now.
    Interrupt,
    /// Run immediately as a focused unit of work.
    Sprint,
    /// Run alongside the receiver's current work.
    Parallel,
    /// Enqueue behind current work, to run next.
    Queue,
    /// Defer indefinitely; only run when nothing else is pending.
    Backlog,
}

/// Optional TTL expressed either as a duration in seconds or an absolute
/// expiry timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Ttl {
    /// Seconds from creation.
    Seconds(u64),
    /// Absolute expiry time.
    At(Timestamp),
}

/// Optional model-provenance metadata attached by the sending program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    /// The model that produced the content, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Input token count charged to produce the content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_cost: Option<u64>,
    /// Confidence score in `[0, 1]`, if the producing model reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

// ============================================================================
// SECTION: Envelope
// ============================================================================

/// Current schema tag for the envelope and its carrying entities.
pub const SCHEMA_VERSION: u32 = 1;

/// Addressing and correlation fields shared by every task and relay message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// The program that authored this envelope.
    pub source: ProgramId,
    /// The program id or group name this envelope targets.
    pub target: String,
    /// Delivery priority.
    pub priority: Priority,
    /// How the receiver should treat this relative to its current work.
    pub action: Action,
    /// Optional time-to-live.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<Ttl>,
    /// Program or thread that responses should be routed to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ProgramId>,
    /// Conversation/thread grouping identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<ThreadId>,
    /// Model provenance metadata, if supplied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
    /// Cross-entity trace identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<TraceId>,
    /// Span identifier within the trace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span_id: Option<SpanId>,
    /// The span that caused this one, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<SpanId>,
    /// Per-request correlation id threaded through ledger/audit/analytics.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
    /// Schema version tag for forward compatibility.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
}

/// Serde default for `schema_version` on envelopes deserialized without one.
const fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}
