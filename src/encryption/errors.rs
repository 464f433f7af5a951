//! Encryption error types

use thiserror::Error;

/// Errors that can occur during encryption operations
#[derive(Debug, Error)]
pub enum EncryptionError {
    #[error("Team encryption is not configured")]
    NotConfigured,

    #[error("Team is locked. Please unlock with password first.")]
    TeamLocked,

    #[error("Invalid password")]
    WrongPassword,

    #[error("Invalid encryption configuration: {0}")]
    Configuration(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Wrong key and tampered ciphertext are deliberately indistinguishable.
    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Invalid encrypted data format: {0}")]
    Encoding(String),

    #[error("Sensitive payload is {size} bytes, exceeding the {max} byte limit")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Unsupported envelope version: {0}")]
    UnsupportedVersion(u32),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl EncryptionError {
    /// Build a configuration error from any message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Build an encoding error from any message.
    pub fn encoding(msg: impl Into<String>) -> Self {
        Self::Encoding(msg.into())
    }
}

impl From<EncryptionError> for String {
    fn from(err: EncryptionError) -> Self {
        err.to_string()
    }
}

/// Result type alias for encryption operations
pub type EncryptionResult<T> = Result<T, EncryptionError>;
