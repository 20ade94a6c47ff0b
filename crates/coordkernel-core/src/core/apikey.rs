// coordkernel-core/src/core/apikey.rs
// ============================================================================
// Module: Coordination Kernel API Key Record
// Description: The global API-key index entry consulted by the auth resolver.
// Purpose: Represent an API key's binding, capabilities, and lifecycle fields.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Raw API keys are never stored; the index is keyed by the SHA-256 digest
//! of the key (see [`crate::core::hashing::hash_api_key`]) and this record is
//! the value found at that key.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::ProgramId;
use crate::core::identifiers::TenantUid;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: API Key Record
// ============================================================================

/// Raw API keys carry this fixed prefix so the transport can disambiguate
/// them from identity tokens without parsing further.
pub const API_KEY_PREFIX: &str = "cb_";

/// A single capability grant. `"*"` is the wildcard granting every capability.
pub const WILDCARD_CAPABILITY: &str = "*";

/// The global index entry for one API key, keyed by the key's SHA-256 hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    /// The tenant this key resolves to.
    pub tenant_uid: TenantUid,
    /// The program identity this key is bound to.
    pub program_id: ProgramId,
    /// Human-readable label for the key, shown in admin tooling.
    pub label: String,
    /// Capabilities granted by this key. `["*"]` grants all.
    pub capabilities: Vec<String>,
    /// Whether the key is currently usable.
    pub active: bool,
    /// When the key was created.
    pub created_at: Timestamp,
    /// Last time the key was successfully used to authenticate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<Timestamp>,
    /// When the key was revoked, if it has been.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<Timestamp>,
}

impl ApiKeyRecord {
    /// Returns `true` when the key is active and has not been revoked.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.active && self.revoked_at.is_none()
    }

    /// Returns `true` when `capability` is granted, either directly or via
    /// the `"*"` wildcard.
    #[must_use]
    pub fn grants(&self, capability: &str) -> bool {
        self.capabilities
            .iter()
            .any(|held| held == WILDCARD_CAPABILITY || held == capability)
    }
}

/// Identifies which bearer-token shape a caller presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BearerTokenShape {
    /// Raw API key, prefixed `cb_`.
    ApiKey,
    /// Identity (JWT) token, prefixed `eyJ`.
    IdentityToken,
    /// Neither recognized prefix.
    Unknown,
}

/// Classifies a bearer token by its prefix without validating it.
#[must_use]
pub fn classify_bearer_token(token: &str) -> BearerTokenShape {
    if token.starts_with(API_KEY_PREFIX) {
        BearerTokenShape::ApiKey
    } else if token.starts_with("eyJ") {
        BearerTokenShape::IdentityToken
    } else {
        BearerTokenShape::Unknown
    }
}
