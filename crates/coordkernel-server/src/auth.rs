// coordkernel-server/src/auth.rs
// ============================================================================
// Module: Auth Resolver
// Description: Bearer token -> AuthContext, canonical tenant resolution.
// Purpose: The first gate stage (spec.md §4.2).
// Dependencies: coordkernel-core
// ============================================================================

//! ## Overview
//! Two bearer shapes reach this resolver: a raw API key (`cb_<hex>`) and an
//! identity token (`eyJ...`). Both resolve to an [`AuthContext`] carrying the
//! caller's canonical tenant, program id, capability list, and a derived
//! content-encryption key. A `None` return means the gate answers 401; this
//! module never surfaces *why* a lookup failed beyond that boundary, per
//! spec.md §4.2's failure-mode list.

// ============================================================================
// SECTION: Imports
// ============================================================================

use coordkernel_core::ApiKeyRecord;
use coordkernel_core::BearerTokenShape;
use coordkernel_core::DocPath;
use coordkernel_core::DocumentStore;
use coordkernel_core::ProgramId;
use coordkernel_core::Query;
use coordkernel_core::QueryFilter;
use coordkernel_core::TenantUid;
use coordkernel_core::classify_bearer_token;
use coordkernel_core::core::apikey::WILDCARD_CAPABILITY;
use coordkernel_core::core::crypto::derive_api_key_key;
use coordkernel_core::core::crypto::derive_identity_key;
use coordkernel_core::core::hashing::hash_api_key;
use coordkernel_core::get_typed_optional;
use coordkernel_core::put_typed;
use serde::Deserialize;
use serde::Serialize;
use serde_json::json;

use crate::capabilities::default_capabilities_for;

// ============================================================================
// SECTION: AuthContext
// ============================================================================

/// How the caller authenticated. Carried so source-verification (gate step 3)
/// can recognize the two privileged program ids that may impersonate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// Resolved from a raw API key.
    ApiKey,
    /// Resolved from an identity token (mobile companion app).
    IdentityToken,
}

/// The resolved identity and grants for one request, produced once per
/// request at the gate and threaded through every downstream module.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// How this context was resolved.
    pub method: AuthMethod,
    /// Canonical tenant namespace every store path is composed from.
    pub tenant_uid: TenantUid,
    /// Program identity bound to the credential.
    pub program_id: ProgramId,
    /// Effective capability list (`["*"]` grants everything).
    pub capabilities: Vec<String>,
    /// Content-encryption key derived for this caller (spec.md §4.15).
    pub encryption_key: [u8; 32],
    /// SHA-256 hex of the raw API key, when resolved via the API-key path.
    pub api_key_hash: Option<String>,
}

impl AuthContext {
    /// Two program ids are documented as privileged impersonators
    /// (spec.md §9: "Source verification is semantic, not cryptographic").
    #[must_use]
    pub fn is_privileged_program(program_id: &str) -> bool {
        matches!(program_id, "legacy" | "mobile")
    }

    /// Whether this context's capability list grants `capability`.
    #[must_use]
    pub fn grants(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|held| held == WILDCARD_CAPABILITY || held == capability)
    }
}

// ============================================================================
// SECTION: Canonical Account Record
// ============================================================================

/// `canonical_accounts/{sha256(lowercase email)}` document shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalAccountRecord {
    /// The tenant UID every alternate UID below resolves to.
    pub canonical_uid: String,
    /// Identity-provider-specific UIDs that map onto `canonical_uid`.
    pub alternate_uids: Vec<String>,
}

// ============================================================================
// SECTION: Resolution
// ============================================================================

/// Resolves a bearer token to an [`AuthContext`], or `None` on any failure
/// (unknown key, inactive/revoked, malformed identity token).
pub async fn resolve_auth(store: &dyn DocumentStore, bearer_token: &str) -> Option<AuthContext> {
    match classify_bearer_token(bearer_token) {
        BearerTokenShape::ApiKey => resolve_api_key(store, bearer_token).await,
        BearerTokenShape::IdentityToken => resolve_identity_token(store, bearer_token).await,
        BearerTokenShape::Unknown => None,
    }
}

async fn resolve_api_key(store: &dyn DocumentStore, raw_key: &str) -> Option<AuthContext> {
    let key_hash = hash_api_key(raw_key);
    let path = DocPath::global("apiKeys", key_hash.as_str());
    let record: ApiKeyRecord = get_typed_optional(store, &path).await.ok()?.or(None)?;
    if !record.is_usable() {
        return None;
    }
    let tenant_uid = canonicalize_tenant(store, &record.tenant_uid).await;
    let capabilities = if record.capabilities.is_empty() {
        default_capabilities_for(record.program_id.as_str())
    } else {
        record.capabilities.clone()
    };
    let encryption_key = derive_api_key_key(raw_key, key_hash.as_str());
    touch_last_used_at(store, &path, &record).await;
    Some(AuthContext {
        method: AuthMethod::ApiKey,
        tenant_uid,
        program_id: record.program_id,
        capabilities,
        encryption_key,
        api_key_hash: Some(key_hash.into_inner()),
    })
}

/// Identity tokens are verified upstream (the companion mobile app's
/// identity provider); this resolver only extracts the `sub` claim from the
/// unverified payload segment. Verifying the signature would require an
/// identity-provider SDK this workspace does not carry — spec.md §1 scopes
/// the identity provider's own handshake out of this core. A malformed
/// token (wrong segment count, non-JSON payload, missing `sub`) resolves to
/// `None`, matching the documented "verification failure -> null" behavior.
async fn resolve_identity_token(store: &dyn DocumentStore, token: &str) -> Option<AuthContext> {
    let uid = extract_subject_claim(token)?;
    let tenant_uid = canonicalize_tenant(store, &TenantUid::new(uid)).await;
    let encryption_key = derive_identity_key(tenant_uid.as_str());
    Some(AuthContext {
        method: AuthMethod::IdentityToken,
        tenant_uid,
        program_id: ProgramId::new("mobile"),
        capabilities: default_capabilities_for("mobile"),
        encryption_key,
        api_key_hash: None,
    })
}

fn extract_subject_claim(token: &str) -> Option<String> {
    use base64::Engine as _;
    let payload_segment = token.split('.').nth(1)?;
    let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(payload_segment).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
    claims.get("sub")?.as_str().map(ToString::to_string)
}

/// Resolves `uid` to its canonical tenant via an array-contains lookup on
/// `canonical_accounts`; returns `uid` unchanged when no mapping exists.
async fn canonicalize_tenant(store: &dyn DocumentStore, uid: &TenantUid) -> TenantUid {
    let query = Query {
        filters: vec![QueryFilter::ArrayContains("alternate_uids".to_string(), json!(uid.as_str()))],
        order_by: None,
        limit: Some(1),
    };
    let Ok(results) = store.query_values("canonical_accounts", &query).await else {
        return uid.clone();
    };
    results
        .into_iter()
        .next()
        .and_then(|value| serde_json::from_value::<CanonicalAccountRecord>(value).ok())
        .map_or_else(|| uid.clone(), |record| TenantUid::new(record.canonical_uid))
}

/// Fire-and-forget `lastUsedAt` bump; failures are swallowed per spec.md §4.2
/// ("fire-and-forget update `lastUsedAt`") and §7's fire-and-forget policy.
async fn touch_last_used_at(store: &dyn DocumentStore, path: &DocPath, record: &ApiKeyRecord) {
    let mut updated = record.clone();
    updated.last_used_at = Some(store.server_timestamp());
    let _ = put_typed(store, path, &updated).await;
}

#[cfg(test)]
mod tests {
    use coordkernel_core::InMemoryDocumentStore;
    use coordkernel_core::core::hashing::hash_api_key;
    use coordkernel_core::put_typed;

    use super::*;

    fn sample_record(tenant: &str, program: &str) -> ApiKeyRecord {
        ApiKeyRecord {
            tenant_uid: TenantUid::new(tenant),
            program_id: ProgramId::new(program),
            label: "test key".to_string(),
            capabilities: vec![],
            active: true,
            created_at: coordkernel_core::core::time::Timestamp::from_unix_millis(0),
            last_used_at: None,
            revoked_at: None,
        }
    }

    #[tokio::test]
    async fn unknown_key_resolves_to_none() {
        let store = InMemoryDocumentStore::default();
        assert!(resolve_auth(&store, "cb_doesnotexist").await.is_none());
    }

    #[tokio::test]
    async fn revoked_key_resolves_to_none() {
        let store = InMemoryDocumentStore::default();
        let raw_key = "cb_sometoken";
        let mut record = sample_record("tenant-a", "builder");
        record.revoked_at = Some(coordkernel_core::core::time::Timestamp::from_unix_millis(1));
        let hash = hash_api_key(raw_key);
        let path = DocPath::global("apiKeys", hash.as_str());
        put_typed(&store, &path, &record).await.expect("seed key");
        assert!(resolve_auth(&store, raw_key).await.is_none());
    }

    #[tokio::test]
    async fn active_key_resolves_with_default_capabilities() {
        let store = InMemoryDocumentStore::default();
        let raw_key = "cb_sometoken";
        let record = sample_record("tenant-a", "builder");
        let hash = hash_api_key(raw_key);
        let path = DocPath::global("apiKeys", hash.as_str());
        put_typed(&store, &path, &record).await.expect("seed key");

        let ctx = resolve_auth(&store, raw_key).await.expect("resolves");
        assert_eq!(ctx.tenant_uid.as_str(), "tenant-a");
        assert_eq!(ctx.program_id.as_str(), "builder");
        assert!(!ctx.capabilities.is_empty());
    }

    #[tokio::test]
    async fn wildcard_capability_grants_everything() {
        let store = InMemoryDocumentStore::default();
        let raw_key = "cb_sometoken";
        let mut record = sample_record("tenant-a", "builder");
        record.capabilities = vec!["*".to_string()];
        let hash = hash_api_key(raw_key);
        let path = DocPath::global("apiKeys", hash.as_str());
        put_typed(&store, &path, &record).await.expect("seed key");

        let ctx = resolve_auth(&store, raw_key).await.expect("resolves");
        assert!(ctx.grants("dispatch.write"));
    }

    #[tokio::test]
    async fn canonical_account_redirects_tenant() {
        let store = InMemoryDocumentStore::default();
        let raw_key = "cb_sometoken";
        let record = sample_record("alt-uid", "builder");
        let hash = hash_api_key(raw_key);
        put_typed(&store, &DocPath::global("apiKeys", hash.as_str()), &record).await.expect("seed key");

        let canonical = CanonicalAccountRecord {
            canonical_uid: "canonical-tenant".to_string(),
            alternate_uids: vec!["alt-uid".to_string()],
        };
        let email_hash = coordkernel_core::core::hashing::hash_canonical_email("person@example.com");
        put_typed(&store, &DocPath::global("canonical_accounts", &email_hash), &canonical)
            .await
            .expect("seed canonical account");

        let ctx = resolve_auth(&store, raw_key).await.expect("resolves");
        assert_eq!(ctx.tenant_uid.as_str(), "canonical-tenant");
    }

    #[test]
    fn mobile_and_legacy_are_privileged() {
        assert!(AuthContext::is_privileged_program("mobile"));
        assert!(AuthContext::is_privileged_program("legacy"));
        assert!(!AuthContext::is_privileged_program("builder"));
    }
}
