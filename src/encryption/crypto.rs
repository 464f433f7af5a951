//! Cryptographic operations for encryption/decryption

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use serde::{de::DeserializeOwned, Serialize};
use zeroize::Zeroizing;

use super::envelope::{ReportCryptoEnvelope, NONCE_SIZE};
use super::errors::{EncryptionError, EncryptionResult};
use super::models::{EncryptionKey, MAX_PLAINTEXT_BYTES, SUPPORTED_ENVELOPE_VERSIONS};
use crate::reports::SensitiveFields;

/// Generate a random nonce for encryption
fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

/// Associated data binding the ciphertext to its envelope version
fn associated_data(version: u32) -> Vec<u8> {
    format!("scout-report/v{}", version).into_bytes()
}

/// Encrypt data using ChaCha20-Poly1305 under a fresh random nonce
fn encrypt(
    plaintext: &[u8],
    key: &EncryptionKey,
    aad: &[u8],
) -> EncryptionResult<(Vec<u8>, [u8; NONCE_SIZE])> {
    let cipher = ChaCha20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|e| EncryptionError::EncryptionFailed(e.to_string()))?;

    let nonce_bytes = generate_nonce();
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, Payload { msg: plaintext, aad })
        .map_err(|e| EncryptionError::EncryptionFailed(e.to_string()))?;

    Ok((ciphertext, nonce_bytes))
}

/// Decrypt data using ChaCha20-Poly1305
fn decrypt(
    ciphertext: &[u8],
    key: &EncryptionKey,
    nonce_bytes: &[u8; NONCE_SIZE],
    aad: &[u8],
) -> EncryptionResult<Zeroizing<Vec<u8>>> {
    let cipher = ChaCha20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|_| EncryptionError::DecryptionFailed)?;

    let nonce = Nonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, Payload { msg: ciphertext, aad })
        .map(Zeroizing::new)
        .map_err(|_| EncryptionError::DecryptionFailed)
}

/// Encrypt a JSON-serializable value into an envelope
pub fn encrypt_json<T: Serialize>(
    value: &T,
    key: &EncryptionKey,
    version: u32,
) -> EncryptionResult<ReportCryptoEnvelope> {
    if !SUPPORTED_ENVELOPE_VERSIONS.contains(&version) {
        return Err(EncryptionError::UnsupportedVersion(version));
    }

    let json = Zeroizing::new(serde_json::to_vec(value)?);
    if json.len() > MAX_PLAINTEXT_BYTES {
        return Err(EncryptionError::PayloadTooLarge {
            size: json.len(),
            max: MAX_PLAINTEXT_BYTES,
        });
    }

    let (ciphertext, nonce) = encrypt(&json, key, &associated_data(version))?;
    Ok(ReportCryptoEnvelope::from_parts(version, &nonce, &ciphertext))
}

/// Decrypt and deserialize a JSON value from an envelope
pub fn decrypt_json<T: DeserializeOwned>(
    envelope: &ReportCryptoEnvelope,
    key: &EncryptionKey,
) -> EncryptionResult<T> {
    let (nonce, ciphertext) = envelope.decode()?;
    let plaintext = decrypt(&ciphertext, key, &nonce, &associated_data(envelope.version))?;
    serde_json::from_slice(&plaintext)
        .map_err(|e| EncryptionError::encoding(format!("decrypted payload is not valid JSON: {}", e)))
}

/// Encrypt one report's sensitive fields
pub fn encrypt_fields(
    key: &EncryptionKey,
    fields: &SensitiveFields,
    version: u32,
) -> EncryptionResult<ReportCryptoEnvelope> {
    encrypt_json(fields, key, version)
}

/// Decrypt one report's sensitive fields
pub fn decrypt_fields(
    key: &EncryptionKey,
    envelope: &ReportCryptoEnvelope,
) -> EncryptionResult<SensitiveFields> {
    decrypt_json(envelope, key)
}
