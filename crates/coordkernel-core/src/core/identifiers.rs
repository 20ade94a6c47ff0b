// coordkernel-core/src/core/identifiers.rs
// ============================================================================
// Module: Coordination Kernel Identifiers
// Description: Canonical opaque identifiers for tenants, programs, and entities.
// Purpose: Provide strongly typed, serializable IDs with stable string forms.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Identifiers are opaque newtypes over `String`. They serialize transparently
//! so that document-store paths and wire payloads read as plain strings, while
//! the type system keeps tenant ids, program ids, and entity ids from being
//! swapped at call sites.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Identifier Macro
// ============================================================================

/// Declares an opaque string identifier with the usual constructors and
/// conversions. Kept as a macro because the coordination plane carries a
/// couple dozen distinct id kinds that must never be interchanged silently.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier from any string-like value.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consumes the identifier, returning the owned string.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

// ============================================================================
// SECTION: Identifier Types
// ============================================================================

string_id!(
    /// Canonical tenant namespace identifier (SHA-256-derived or provider UID).
    TenantUid
);

string_id!(
    /// Named agent identity on the coordination plane; every API key binds to one.
    ProgramId
);

string_id!(
    /// Unified work-unit identifier (task / question / dream / sprint / sprint-story).
    TaskId
);

string_id!(
    /// Relay message identifier.
    MessageId
);

string_id!(
    /// Correlation identifier shared by every document produced by one multicast send.
    MulticastId
);

string_id!(
    /// Pulse session identifier, format-validated by the session-id compliance rules.
    SessionId
);

string_id!(
    /// MCP transport session identifier (16-byte hex handshake token).
    McpSessionId
);

string_id!(
    /// Per-request correlation identifier threaded through audit, ledger, and analytics.
    CorrelationId
);

string_id!(
    /// Cross-entity trace identifier.
    TraceId
);

string_id!(
    /// Span identifier within a trace.
    SpanId
);

string_id!(
    /// Conversation/thread grouping identifier for replies.
    ThreadId
);

string_id!(
    /// Mobile device registration identifier used for push fan-out.
    DeviceId
);

string_id!(
    /// Hex-encoded SHA-256 digest of a raw API key; the primary key of the key index.
    ApiKeyHash
);

string_id!(
    /// Claim-event identifier recorded for contention metrics.
    ClaimEventId
);

#[cfg(test)]
mod tests {
    use super::TaskId;

    #[test]
    fn round_trips_through_serde_as_plain_string() {
        let id = TaskId::new("task-123");
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, "\"task-123\"");
        let back: TaskId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, id);
    }

    #[test]
    fn displays_as_inner_string() {
        let id = TaskId::new("task-xyz");
        assert_eq!(id.to_string(), "task-xyz");
        assert_eq!(id.as_str(), "task-xyz");
    }
}
