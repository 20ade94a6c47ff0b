// coordkernel-core/src/core/crypto.rs
// ============================================================================
// Module: Coordination Kernel Crypto Utilities
// Description: PBKDF2 key derivation and AES-256-CBC content encryption.
// Purpose: Give every content-encrypting call site one reviewed implementation.
// Dependencies: pbkdf2, sha2, aes, cbc, base64, rand
// ============================================================================

//! ## Overview
//! User-visible text fields on question tasks and signal payloads are
//! encrypted with a key derived per caller (mobile identity token or API
//! key). Derivation is PBKDF2-HMAC-SHA-256; content encryption is
//! AES-256-CBC with a random IV per message, packed as
//! `base64(IV ∥ ciphertext)`. CBC (rather than an AEAD mode) is mandated so
//! ciphertext length and padding stay predictable across the mobile and
//! program clients that consume it without carrying an auth tag.

// ============================================================================
// SECTION: Imports
// ============================================================================

use aes::Aes256;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use cbc::Decryptor;
use cbc::Encryptor;
use cbc::cipher::BlockDecryptMut;
use cbc::cipher::BlockEncryptMut;
use cbc::cipher::KeyIvInit;
use cbc::cipher::block_padding::Pkcs7;
use pbkdf2::pbkdf2_hmac_array;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// PBKDF2 iteration count mandated for every derivation path.
pub const PBKDF2_ITERATIONS: u32 = 100_000;
/// Derived key size in bytes (AES-256).
pub const KEY_SIZE: usize = 32;
/// AES block / IV size in bytes.
pub const IV_SIZE: usize = 16;

/// Fixed salt prefix used for API-key-derived encryption keys; the
/// variable suffix is the first 16 hex characters of the key's SHA-256 hash.
pub const API_KEY_SALT_PREFIX: &str = "cachebash_e2e_v1_";

type Aes256CbcEnc = Encryptor<Aes256>;
type Aes256CbcDec = Decryptor<Aes256>;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Failures from content encryption/decryption.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The supplied ciphertext was not valid base64.
    #[error("ciphertext is not valid base64")]
    InvalidBase64,
    /// The decoded payload was shorter than one IV.
    #[error("ciphertext shorter than one IV")]
    Truncated,
    /// PKCS#7 unpadding or block decryption failed (wrong key or corrupt data).
    #[error("decryption failed: wrong key or corrupted ciphertext")]
    DecryptionFailed,
}

// ============================================================================
// SECTION: Key Derivation
// ============================================================================

/// Derives a 256-bit key from a passphrase and salt via PBKDF2-HMAC-SHA-256.
#[must_use]
pub fn derive_key(passphrase: &[u8], salt: &[u8]) -> [u8; KEY_SIZE] {
    pbkdf2_hmac_array::<Sha256, KEY_SIZE>(passphrase, salt, PBKDF2_ITERATIONS)
}

/// Derives the mobile/identity-token encryption key: `PBKDF2(uid, constant salt)`.
#[must_use]
pub fn derive_identity_key(uid: &str) -> [u8; KEY_SIZE] {
    derive_key(uid.as_bytes(), API_KEY_SALT_PREFIX.as_bytes())
}

/// Derives the API-key encryption key: `PBKDF2(raw_key, prefix ++ first 16 hex of key_hash)`.
#[must_use]
pub fn derive_api_key_key(raw_key: &str, key_hash_hex: &str) -> [u8; KEY_SIZE] {
    let mut salt = String::with_capacity(API_KEY_SALT_PREFIX.len() + 16);
    salt.push_str(API_KEY_SALT_PREFIX);
    salt.push_str(&key_hash_hex[..key_hash_hex.len().min(16)]);
    derive_key(raw_key.as_bytes(), salt.as_bytes())
}

// ============================================================================
// SECTION: Content Encryption
// ============================================================================

/// Encrypts `plaintext` under `key` with a random IV, returning `base64(IV ∥ ciphertext)`.
#[must_use]
pub fn encrypt(plaintext: &[u8], key: &[u8; KEY_SIZE]) -> String {
    let mut iv = [0u8; IV_SIZE];
    OsRng.fill_bytes(&mut iv);

    let ciphertext = Aes256CbcEnc::new(key.into(), &iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut out = Vec::with_capacity(IV_SIZE + ciphertext.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    BASE64.encode(out)
}

/// Decrypts a `base64(IV ∥ ciphertext)` payload produced by [`encrypt`].
///
/// # Errors
/// Returns [`CryptoError`] when the payload is not valid base64, is shorter
/// than one IV, or fails PKCS#7 unpadding under the given key.
pub fn decrypt(packed: &str, key: &[u8; KEY_SIZE]) -> Result<Vec<u8>, CryptoError> {
    let raw = BASE64.decode(packed).map_err(|_err| CryptoError::InvalidBase64)?;
    if raw.len() < IV_SIZE {
        return Err(CryptoError::Truncated);
    }
    let (iv, ciphertext) = raw.split_at(IV_SIZE);

    let mut buf = ciphertext.to_vec();
    let plaintext = Aes256CbcDec::new(key.into(), iv.into())
        .decrypt_padded_mut::<Pkcs7>(&mut buf)
        .map_err(|_err| CryptoError::DecryptionFailed)?;
    Ok(plaintext.to_vec())
}

#[cfg(test)]
mod tests {
    use super::decrypt;
    use super::derive_api_key_key;
    use super::derive_identity_key;
    use super::derive_key;
    use super::encrypt;

    #[test]
    fn round_trips_arbitrary_plaintext() {
        let key = derive_key(b"passphrase", b"salt");
        let packed = encrypt(b"hello, program", &key);
        let back = decrypt(&packed, &key).expect("decrypt");
        assert_eq!(back, b"hello, program");
    }

    #[test]
    fn two_encryptions_of_same_plaintext_differ() {
        let key = derive_key(b"passphrase", b"salt");
        let a = encrypt(b"same text", &key);
        let b = encrypt(b"same text", &key);
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let key = derive_key(b"correct", b"salt");
        let other = derive_key(b"wrong", b"salt");
        let packed = encrypt(b"secret", &key);
        assert!(decrypt(&packed, &other).is_err());
    }

    #[test]
    fn identity_and_api_key_derivations_are_deterministic_and_distinct() {
        let a = derive_identity_key("user-uid-1");
        let b = derive_identity_key("user-uid-1");
        assert_eq!(a, b);

        let k1 = derive_api_key_key("cb_abc123", "deadbeefcafebabe00112233");
        let k2 = derive_api_key_key("cb_abc123", "deadbeefcafebabe00112233");
        assert_eq!(k1, k2);
        assert_ne!(k1, a);
    }
}
