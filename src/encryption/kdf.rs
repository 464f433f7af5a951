//! Password-based key derivation (PBKDF2-HMAC-SHA256)

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;

use super::errors::{EncryptionError, EncryptionResult};
use super::models::{EncryptionKey, KdfConfig, KEY_SIZE, MIN_SALT_BYTES};

/// Generate a random per-team salt for key derivation
pub fn generate_salt() -> String {
    let mut salt = [0u8; MIN_SALT_BYTES];
    rand::thread_rng().fill_bytes(&mut salt);
    BASE64.encode(salt)
}

/// Decode and validate a stored salt.
pub fn decode_salt(salt_b64: &str) -> EncryptionResult<Vec<u8>> {
    if salt_b64.trim().is_empty() {
        return Err(EncryptionError::config("salt is missing"));
    }
    let salt = BASE64
        .decode(salt_b64.trim())
        .map_err(|e| EncryptionError::config(format!("salt is not valid base64: {}", e)))?;
    if salt.len() < MIN_SALT_BYTES {
        return Err(EncryptionError::config(format!(
            "salt must be at least {} bytes, got {}",
            MIN_SALT_BYTES,
            salt.len()
        )));
    }
    Ok(salt)
}

/// Derive the team key from a password and the team's stored KDF parameters.
///
/// Deterministic: the verifier and every decrypt depend on re-deriving the
/// same bytes later.
pub fn derive_key(password: &str, kdf: &KdfConfig) -> EncryptionResult<EncryptionKey> {
    if password.is_empty() {
        return Err(EncryptionError::config("password is required"));
    }
    if kdf.iterations == 0 {
        return Err(EncryptionError::config("iteration count must be positive"));
    }
    let salt = decode_salt(&kdf.salt_b64)?;

    let mut key = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, kdf.iterations, &mut key);
    let derived = EncryptionKey::new(key);
    zeroize::Zeroize::zeroize(&mut key);

    Ok(derived)
}

/// Derive on the blocking pool so a large work factor does not stall the runtime.
pub async fn derive_key_blocking(
    password: zeroize::Zeroizing<String>,
    kdf: KdfConfig,
) -> EncryptionResult<EncryptionKey> {
    tokio::task::spawn_blocking(move || derive_key(&password, &kdf))
        .await
        .map_err(|e| EncryptionError::KeyDerivationFailed(e.to_string()))?
}
