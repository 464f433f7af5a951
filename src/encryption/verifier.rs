//! Local password verifier
//!
//! The verifier is a domain-separated SHA-256 digest of the derived key. It
//! lets a caller reject a wrong password up front instead of watching every
//! record fail to decrypt.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use super::errors::{EncryptionError, EncryptionResult};
use super::kdf::derive_key;
use super::models::{EncryptionKey, TeamSecurityConfig};

const VERIFY_DOMAIN: &[u8] = b"SCOUT_VAULT_VERIFY";

fn verifier_digest(key: &EncryptionKey) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hasher.update(VERIFY_DOMAIN);
    hasher.finalize().into()
}

/// Create the verifier stored alongside the team config
pub fn make_verifier(key: &EncryptionKey) -> String {
    BASE64.encode(verifier_digest(key))
}

/// Compare a derived key against a stored verifier in constant time
pub fn key_matches_verifier(key: &EncryptionKey, verifier_b64: &str) -> EncryptionResult<bool> {
    let expected = BASE64
        .decode(verifier_b64.trim())
        .map_err(|e| EncryptionError::config(format!("stored verifier is not valid base64: {}", e)))?;
    let computed = verifier_digest(key);
    Ok(bool::from(computed.as_slice().ct_eq(expected.as_slice())))
}

/// Check a candidate password against the team config.
///
/// Only configuration problems are errors; a wrong password is `Ok(false)`.
pub fn check_password(password: &str, config: &TeamSecurityConfig) -> EncryptionResult<bool> {
    if !config.has_verifier() {
        return Err(EncryptionError::NotConfigured);
    }
    let key = derive_key(password, &config.kdf)?;
    key_matches_verifier(&key, &config.verifier_b64)
}

/// Verify a password and hand back the derived key for immediate use
pub fn verify_and_derive(password: &str, config: &TeamSecurityConfig) -> EncryptionResult<EncryptionKey> {
    if !config.has_verifier() {
        return Err(EncryptionError::NotConfigured);
    }
    let key = derive_key(password, &config.kdf)?;
    if key_matches_verifier(&key, &config.verifier_b64)? {
        Ok(key)
    } else {
        Err(EncryptionError::WrongPassword)
    }
}
