// coordkernel-server/src/error.rs
// ============================================================================
// Module: Gate Error Taxonomy
// Description: The one error enum every tool invocation resolves to.
// Purpose: Give both transports (MCP, REST) a single source for wire errors.
// Dependencies: coordkernel-core, thiserror
// ============================================================================

//! ## Overview
//! `spec.md` §7 classifies failures into a fixed taxonomy (auth, authz,
//! budget, rate limit, validation, lifecycle conflict, contention, store,
//! handler exception). [`GateError`] realizes that taxonomy as one enum so
//! [`crate::transport::mcp`] and [`crate::transport::rest`] derive their
//! wire shape from the same source instead of drifting independently.
//! Contention is deliberately absent here: per spec.md §4.6/§7 a contended
//! claim is a success-shaped response, never an error.

use coordkernel_core::LifecycleError;
use coordkernel_core::StoreError;
use thiserror::Error;

// ============================================================================
// SECTION: GateError
// ============================================================================

/// Every failure a gated tool call can produce, carrying enough shape for
/// both transports to render their own wire error without re-classifying.
///
/// The JSON-RPC codes here are private, implementation-defined codes in the
/// `-32000..-32099` server-error range reserved by the JSON-RPC 2.0 spec;
/// they are distinct from the protocol-level codes (`-32600`, `-32601`,
/// `-32603`, `-32700`, `-32001`) that [`crate::transport::mcp`] uses for
/// malformed requests and session handshake failures.
#[derive(Debug, Error)]
pub enum GateError {
    /// Missing, unresolvable, or revoked bearer token.
    #[error("auth")]
    Auth,
    /// Capability mismatch or source-claim mismatch.
    #[error("authorization: requires {required}, held {held:?}")]
    Authorization {
        /// Capability (or claimed programId) required for the call.
        required: String,
        /// Capabilities (or the actual programId) the caller held.
        held: Vec<String>,
    },
    /// Dream budget exhausted or the dream was killed.
    #[error("budget: {reason}")]
    Budget {
        /// `DREAM_KILLED` or a `BUDGET_EXCEEDED`-prefixed reason string.
        reason: String,
    },
    /// Rate-limit window exceeded.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimit {
        /// Seconds the caller should wait before retrying.
        retry_after_secs: u64,
    },
    /// Tool argument shape failed validation.
    #[error("validation: {message}")]
    Validation {
        /// Human-readable description of the invalid argument.
        message: String,
    },
    /// The lifecycle engine rejected a transition.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    /// The document store reported an error.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// An uncaught exception inside a module handler.
    #[error("handler error: {0}")]
    Handler(String),
}

impl GateError {
    /// HTTP status this error maps to on the REST transport.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::Auth => 401,
            Self::Authorization { .. } | Self::Budget { .. } => 403,
            Self::RateLimit { .. } => 429,
            Self::Validation { .. } => 400,
            Self::Lifecycle(_) => 409,
            Self::Store(_) | Self::Handler(_) => 500,
        }
    }

    /// Implementation-defined JSON-RPC error code this error maps to.
    #[must_use]
    pub const fn json_rpc_code(&self) -> i64 {
        match self {
            Self::Auth => -32_010,
            Self::Authorization { .. } => -32_011,
            Self::Budget { .. } => -32_012,
            Self::RateLimit { .. } => -32_013,
            Self::Validation { .. } => -32_014,
            Self::Lifecycle(_) => -32_015,
            Self::Store(_) => -32_016,
            Self::Handler(_) => -32_017,
        }
    }

    /// The `reason` string an audit entry records for this error.
    #[must_use]
    pub fn audit_reason(&self) -> String {
        match self {
            Self::Auth => "auth".to_string(),
            Self::Authorization { .. } => "authorization".to_string(),
            Self::Budget { reason } => reason.clone(),
            Self::RateLimit { .. } => "rate_limit".to_string(),
            Self::Validation { message } => message.clone(),
            Self::Lifecycle(err) => err.to_string(),
            Self::Store(err) => err.to_string(),
            Self::Handler(message) => message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::GateError;

    #[test]
    fn auth_maps_to_401() {
        assert_eq!(GateError::Auth.http_status(), 401);
    }

    #[test]
    fn rate_limit_maps_to_429() {
        let err = GateError::RateLimit { retry_after_secs: 5 };
        assert_eq!(err.http_status(), 429);
    }

    #[test]
    fn budget_maps_to_403() {
        let err = GateError::Budget {
            reason: "BUDGET_EXCEEDED".to_string(),
        };
        assert_eq!(err.http_status(), 403);
        assert_eq!(err.audit_reason(), "BUDGET_EXCEEDED");
    }

    #[test]
    fn every_variant_has_a_distinct_json_rpc_code() {
        let codes = [
            GateError::Auth.json_rpc_code(),
            GateError::Authorization {
                required: "x".to_string(),
                held: vec![],
            }
            .json_rpc_code(),
            GateError::Budget { reason: "x".to_string() }.json_rpc_code(),
            GateError::RateLimit { retry_after_secs: 1 }.json_rpc_code(),
            GateError::Validation { message: "x".to_string() }.json_rpc_code(),
            GateError::Handler("x".to_string()).json_rpc_code(),
        ];
        let mut sorted = codes.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), codes.len());
    }
}
