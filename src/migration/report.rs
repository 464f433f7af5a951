//! Aggregate results of a bulk migration

use serde::{Deserialize, Serialize};

use crate::encryption::EncryptionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationDirection {
    /// Plaintext -> Encrypted
    Lock,
    /// Encrypted -> Plaintext
    Unlock,
}

/// Why a single record was not transformed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// Document could not be read as a scouting report
    MalformedRecord { message: String },
    /// Envelope present alongside plaintext sensitive fields
    MixedState,
    /// Authentication failed: wrong key or tampered ciphertext
    DecryptionFailed,
    /// Envelope or decrypted payload is structurally invalid
    Encoding { message: String },
    PayloadTooLarge { size: usize, max: usize },
    /// The store kept failing after every retry
    Persistence { attempts: u32, message: String },
    /// The store no longer has the record
    NotMatched,
}

impl FailureReason {
    /// Map a per-record cipher/codec error onto a failure reason
    pub fn from_encryption(err: &EncryptionError) -> Self {
        match err {
            EncryptionError::DecryptionFailed => Self::DecryptionFailed,
            EncryptionError::PayloadTooLarge { size, max } => Self::PayloadTooLarge {
                size: *size,
                max: *max,
            },
            other => Self::Encoding {
                message: other.to_string(),
            },
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MalformedRecord { message } => write!(f, "malformed record: {}", message),
            Self::MixedState => write!(f, "record has both plaintext fields and an envelope"),
            Self::DecryptionFailed => write!(f, "decryption failed (wrong key or tampered data)"),
            Self::Encoding { message } => write!(f, "encoding error: {}", message),
            Self::PayloadTooLarge { size, max } => {
                write!(f, "payload of {} bytes exceeds {} byte limit", size, max)
            }
            Self::Persistence { attempts, message } => {
                write!(f, "store update failed after {} attempt(s): {}", attempts, message)
            }
            Self::NotMatched => write!(f, "record no longer exists in the store"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFailure {
    pub id: String,
    pub reason: FailureReason,
}

/// Outcome of one lock or unlock run.
///
/// A migration is not all-or-nothing: records listed as succeeded are
/// persisted in their new state even when others failed or the run was
/// cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationReport {
    pub direction: MigrationDirection,
    /// Records fetched from the store
    pub considered: usize,
    /// Transformed and persisted (matched and modified)
    pub succeeded: usize,
    /// Already in the target state; nothing written
    pub already_in_target: usize,
    /// Written but the store reported no change
    pub matched_unmodified: usize,
    pub failures: Vec<RecordFailure>,
    /// Left untouched because the run was cancelled first
    pub not_attempted: usize,
    pub cancelled: bool,
}

impl MigrationReport {
    pub fn new(direction: MigrationDirection) -> Self {
        Self {
            direction,
            considered: 0,
            succeeded: 0,
            already_in_target: 0,
            matched_unmodified: 0,
            failures: Vec::new(),
            not_attempted: 0,
            cancelled: false,
        }
    }

    pub fn record_failure(&mut self, id: impl Into<String>, reason: FailureReason) {
        let id = id.into();
        log::warn!("{:?} skipped record {}: {}", self.direction, id, reason);
        self.failures.push(RecordFailure { id, reason });
    }

    /// Every record is now in the target state
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.not_attempted == 0 && !self.cancelled
    }

    /// Identifiers to target on a re-run
    pub fn failed_ids(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.id.as_str()).collect()
    }

    /// Nothing decrypted and every failure was an authentication failure:
    /// almost certainly the wrong key, so stop rather than retry.
    pub fn looks_like_wrong_key(&self) -> bool {
        self.succeeded == 0
            && self.matched_unmodified == 0
            && !self.failures.is_empty()
            && self
                .failures
                .iter()
                .all(|f| f.reason == FailureReason::DecryptionFailed)
    }

    pub fn summary(&self) -> String {
        let verb = match self.direction {
            MigrationDirection::Lock => "encrypted",
            MigrationDirection::Unlock => "decrypted",
        };
        let mut line = format!(
            "{} of {} report(s) {}, {} already done, {} failed",
            self.succeeded,
            self.considered,
            verb,
            self.already_in_target,
            self.failures.len()
        );
        if self.matched_unmodified > 0 {
            line.push_str(&format!(", {} unchanged by store", self.matched_unmodified));
        }
        if self.cancelled {
            line.push_str(&format!(", cancelled with {} not attempted", self.not_attempted));
        }
        line
    }
}

/// Outcome of a password rotation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationReport {
    /// Decrypt pass under the old password
    pub unlock: MigrationReport,
    /// Re-encrypt pass under the new password; absent when rotation stopped
    /// early or the team was unlocked
    pub lock: Option<MigrationReport>,
    /// Whether the stored config now holds the new salt and verifier
    pub config_rotated: bool,
}
