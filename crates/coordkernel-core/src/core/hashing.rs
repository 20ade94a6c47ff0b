// coordkernel-core/src/core/hashing.rs
// ============================================================================
// Module: Coordination Kernel Hashing
// Description: SHA-256 digest utilities for API key fingerprints and audit ids.
// Purpose: Provide a single, constant-time-safe hashing surface for secrets.
// Dependencies: sha2, subtle
// ============================================================================

//! ## Overview
//! API keys are never stored in plaintext: the key index is keyed by the
//! SHA-256 digest of the raw key, and bearer-token comparisons are
//! constant-time. This module centralizes both so no call site rolls its own.

// ============================================================================
// SECTION: Imports
// ============================================================================

use sha2::Digest;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::core::identifiers::ApiKeyHash;

// ============================================================================
// SECTION: Digest Helpers
// ============================================================================

/// Hashes raw bytes with SHA-256 and returns the lowercase hex digest.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_encode(&hasher.finalize())
}

/// Hashes a raw API key into its index key.
#[must_use]
pub fn hash_api_key(raw_key: &str) -> ApiKeyHash {
    ApiKeyHash::new(sha256_hex(raw_key.as_bytes()))
}

/// Hashes a lowercased email address for the canonical-accounts index.
#[must_use]
pub fn hash_canonical_email(email: &str) -> String {
    sha256_hex(email.to_lowercase().as_bytes())
}

/// Compares two strings in constant time, returning `true` when equal.
///
/// Used for bearer-token and webhook-signature comparisons so that timing
/// differences cannot leak how many leading bytes matched.
#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

// ============================================================================
// SECTION: Hex Encoding
// ============================================================================

/// Encodes bytes as a lowercase hex string.
fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}
