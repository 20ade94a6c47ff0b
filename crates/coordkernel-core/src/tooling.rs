// coordkernel-core/src/tooling.rs
// ============================================================================
// Module: Tooling Identifiers
// Description: Canonical tool identifiers shared by the MCP and REST transports.
// Purpose: Give dispatch/relay/pulse/signal/dream one tool-naming source of truth.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Canonical tool names reachable over both the MCP and REST transports.
//! These names are part of the external contract surface and are what the
//! capability map (§4.3 of the coordination design) keys its required
//! capabilities on.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// Canonical tool names for the coordination plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    /// Create a new dispatch task.
    CreateTask,
    /// List/filter tasks.
    GetTasks,
    /// Atomically claim a task for a session.
    ClaimTask,
    /// Mark a task done or failed and merge cost fields.
    CompleteTask,
    /// Enqueue a relay message (or multicast to a group).
    SendMessage,
    /// Poll and atomically mark-delivered pending relay messages.
    GetMessages,
    /// Start a pulse session.
    CreateSession,
    /// Heartbeat/update a pulse session.
    UpdateSession,
    /// List non-archived pulse sessions.
    ListSessions,
    /// Ask a human-facing question (optionally encrypted).
    AskQuestion,
    /// Poll for and decrypt a question's response.
    GetResponse,
    /// Send a short-TTL alert, mirrored to both relay and task surfaces.
    SendAlert,
    /// List peekable dreams.
    DreamPeek,
    /// Activate a dream, invalidating its budget cache entry.
    DreamActivate,
    /// Fetch operational metrics aggregated from the control-loop event stream.
    GetOperationalMetrics,
}

impl ToolName {
    /// Returns the canonical string name for the tool.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreateTask => "create_task",
            Self::GetTasks => "get_tasks",
            Self::ClaimTask => "claim_task",
            Self::CompleteTask => "complete_task",
            Self::SendMessage => "send_message",
            Self::GetMessages => "get_messages",
            Self::CreateSession => "create_session",
            Self::UpdateSession => "update_session",
            Self::ListSessions => "list_sessions",
            Self::AskQuestion => "ask_question",
            Self::GetResponse => "get_response",
            Self::SendAlert => "send_alert",
            Self::DreamPeek => "dream_peek",
            Self::DreamActivate => "dream_activate",
            Self::GetOperationalMetrics => "get_operational_metrics",
        }
    }

    /// Returns every known tool name in canonical order.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::CreateTask,
            Self::GetTasks,
            Self::ClaimTask,
            Self::CompleteTask,
            Self::SendMessage,
            Self::GetMessages,
            Self::CreateSession,
            Self::UpdateSession,
            Self::ListSessions,
            Self::AskQuestion,
            Self::GetResponse,
            Self::SendAlert,
            Self::DreamPeek,
            Self::DreamActivate,
            Self::GetOperationalMetrics,
        ]
    }

    /// Parses a tool name from its string representation.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "create_task" => Some(Self::CreateTask),
            "get_tasks" => Some(Self::GetTasks),
            "claim_task" => Some(Self::ClaimTask),
            "complete_task" => Some(Self::CompleteTask),
            "send_message" => Some(Self::SendMessage),
            "get_messages" => Some(Self::GetMessages),
            "create_session" => Some(Self::CreateSession),
            "update_session" => Some(Self::UpdateSession),
            "list_sessions" => Some(Self::ListSessions),
            "ask_question" => Some(Self::AskQuestion),
            "get_response" => Some(Self::GetResponse),
            "send_alert" => Some(Self::SendAlert),
            "dream_peek" => Some(Self::DreamPeek),
            "dream_activate" => Some(Self::DreamActivate),
            "get_operational_metrics" => Some(Self::GetOperationalMetrics),
            _ => None,
        }
    }

    /// Returns the tool's read/write class, used by the rate limiter's
    /// per-tool-class bucket.
    #[must_use]
    pub const fn is_read(self) -> bool {
        matches!(
            self,
            Self::GetTasks
                | Self::GetMessages
                | Self::ListSessions
                | Self::GetResponse
                | Self::DreamPeek
                | Self::GetOperationalMetrics
        )
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::ToolName;

    #[test]
    fn every_tool_name_round_trips_through_parse() {
        for tool in ToolName::all() {
            assert_eq!(ToolName::parse(tool.as_str()), Some(*tool));
        }
    }

    #[test]
    fn read_tools_are_a_strict_subset() {
        assert!(ToolName::GetTasks.is_read());
        assert!(!ToolName::CreateTask.is_read());
    }
}
