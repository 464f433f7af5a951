//! Encryption module for team scouting report protection
//!
//! This module provides:
//! - PBKDF2-HMAC-SHA256 password-based key derivation
//! - A local password verifier (digest of the derived key)
//! - ChaCha20-Poly1305 authenticated encryption of report fields
//! - The report envelope container and its wire encoding
//! - In-memory key cache for teams unlocked in this session

pub mod crypto;
pub mod envelope;
pub mod errors;
pub mod kdf;
pub mod manager;
pub mod models;
pub mod verifier;

// Re-export commonly used types
pub use crypto::{decrypt_fields, decrypt_json, encrypt_fields, encrypt_json};
pub use envelope::{from_wire, parse_envelope, to_wire, ReportCryptoEnvelope, NONCE_SIZE, TAG_SIZE};
pub use errors::{EncryptionError, EncryptionResult};
pub use kdf::{derive_key, derive_key_blocking, generate_salt};
pub use manager::{SessionKeyCache, SessionStats};
pub use models::{
    parse_enc_version, EncryptionKey, KdfConfig, TeamSecurityConfig, CURRENT_ENVELOPE_VERSION,
    DEFAULT_ENC_VERSION, DEFAULT_ITERATIONS, MAX_PLAINTEXT_BYTES, MIN_ITERATIONS, MIN_SALT_BYTES,
    SUPPORTED_ENVELOPE_VERSIONS,
};
pub use verifier::{check_password, make_verifier, verify_and_derive};
