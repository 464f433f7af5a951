//! Encryption data models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of the derived key and of the cipher key, in bytes
pub const KEY_SIZE: usize = 32;

/// Minimum decoded salt length accepted by the KDF
pub const MIN_SALT_BYTES: usize = 16;

/// Work factor floor for newly created team configs
pub const MIN_ITERATIONS: u32 = 100_000;

/// Work factor used when setup is not given one
pub const DEFAULT_ITERATIONS: u32 = 310_000;

/// Envelope format written by this version
pub const CURRENT_ENVELOPE_VERSION: u32 = 1;

/// Envelope formats this version can read
pub const SUPPORTED_ENVELOPE_VERSIONS: &[u32] = &[1];

/// Schema tag stored on the team config
pub const DEFAULT_ENC_VERSION: &str = "v1";

/// Envelope version named by a config's `encVersion` tag ("v1" -> 1), if supported
pub fn parse_enc_version(tag: &str) -> Option<u32> {
    tag.trim()
        .strip_prefix('v')
        .and_then(|v| v.parse::<u32>().ok())
        .filter(|v| SUPPORTED_ENVELOPE_VERSIONS.contains(v))
}

/// Upper bound on serialized sensitive-field JSON per report (1 MiB)
pub const MAX_PLAINTEXT_BYTES: usize = 1024 * 1024;

/// Key derivation parameters stored with a team
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KdfConfig {
    /// Random per-team salt (base64-encoded)
    #[serde(rename = "saltB64")]
    pub salt_b64: String,
    /// PBKDF2 iteration count
    pub iterations: u32,
}

impl KdfConfig {
    pub fn new(salt_b64: impl Into<String>, iterations: u32) -> Self {
        Self {
            salt_b64: salt_b64.into(),
            iterations,
        }
    }
}

/// Per-team security configuration persisted by the config store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamSecurityConfig {
    /// Whether the team's reports are (or are being) kept encrypted
    pub lock_enabled: bool,
    /// Envelope schema tag, e.g. "v1"
    pub enc_version: String,
    /// Key derivation parameters
    pub kdf: KdfConfig,
    /// Digest of the derived key, used to test a candidate password
    #[serde(rename = "verifierB64")]
    pub verifier_b64: String,
    /// When the current password was set
    pub configured_at: DateTime<Utc>,
    /// Optional password hint shown to team members
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hint: Option<String>,
}

impl TeamSecurityConfig {
    /// Create an unlocked config for a freshly derived verifier
    pub fn new(kdf: KdfConfig, verifier_b64: String, enc_version: impl Into<String>) -> Self {
        Self {
            lock_enabled: false,
            enc_version: enc_version.into(),
            kdf,
            verifier_b64,
            configured_at: Utc::now(),
            password_hint: None,
        }
    }

    pub fn with_hint(mut self, hint: Option<String>) -> Self {
        self.password_hint = hint.filter(|h| !h.trim().is_empty());
        self
    }

    /// A config without a verifier cannot prove a later unlock password.
    pub fn has_verifier(&self) -> bool {
        !self.verifier_b64.trim().is_empty()
    }
}

/// Encryption key with secure memory handling
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    /// The 256-bit key
    key: [u8; KEY_SIZE],
}

impl EncryptionKey {
    /// Create a new encryption key from raw bytes
    pub fn new(key: [u8; KEY_SIZE]) -> Self {
        Self { key }
    }

    /// Get the key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}
