//! Persistence collaborators the encryption core drives.
//!
//! The core never owns storage: it reads a team's config and reports through
//! these traits and submits one [`ReportUpdate`] per transformed record.

mod file_store;
mod memory;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::encryption::{ReportCryptoEnvelope, TeamSecurityConfig};
use crate::reports::SensitiveFields;

pub use file_store::FileStore;
pub use memory::MemoryStore;

/// Key under which a report document carries its envelope
pub const ENVELOPE_KEY: &str = "crypto";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid identifier: {0:?}")]
    InvalidId(String),

    #[error("Data directory not found")]
    DataDirNotFound,

    #[error("Storage backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A report exactly as the store holds it. Parsing is left to the core so a
/// malformed document becomes a per-record failure rather than a fetch error.
#[derive(Debug, Clone, PartialEq)]
pub struct RawReport {
    pub id: String,
    pub document: Value,
}

impl RawReport {
    pub fn new(id: impl Into<String>, document: Value) -> Self {
        Self {
            id: id.into(),
            document,
        }
    }
}

/// What to do with a report's envelope. `Unset` removes the key entirely,
/// which is not the same as storing `null`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeChange {
    Set(ReportCryptoEnvelope),
    Unset,
}

/// Per-record write submitted by a migration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportUpdate {
    pub id: String,
    pub fields: SensitiveFields,
    pub envelope: EnvelopeChange,
}

impl ReportUpdate {
    /// Blank the sensitive fields and attach the envelope
    pub fn lock(id: impl Into<String>, envelope: ReportCryptoEnvelope) -> Self {
        Self {
            id: id.into(),
            fields: SensitiveFields::default(),
            envelope: EnvelopeChange::Set(envelope),
        }
    }

    /// Restore the sensitive fields and remove the envelope
    pub fn unlock(id: impl Into<String>, fields: SensitiveFields) -> Self {
        Self {
            id: id.into(),
            fields,
            envelope: EnvelopeChange::Unset,
        }
    }
}

/// Result of a single update, mirroring a document store's matched/modified counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateOutcome {
    pub matched: bool,
    pub modified: bool,
}

impl UpdateOutcome {
    pub fn not_matched() -> Self {
        Self::default()
    }
}

/// Config read / config write
#[async_trait]
pub trait SecurityConfigStore: Send + Sync {
    /// `None` means the team never set up encryption
    async fn load_config(&self, team_id: &str) -> StoreResult<Option<TeamSecurityConfig>>;

    async fn save_config(&self, team_id: &str, config: &TeamSecurityConfig) -> StoreResult<()>;
}

/// Record fetch / record update
#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn fetch_reports(&self, team_id: &str) -> StoreResult<Vec<RawReport>>;

    async fn update_report(&self, team_id: &str, update: &ReportUpdate) -> StoreResult<UpdateOutcome>;
}

/// Apply an update to a stored document, returning the new document.
///
/// Every sensitive key is written (blank values included) so no stale
/// plaintext survives a lock; unrelated keys are preserved.
pub fn apply_update(document: &Value, update: &ReportUpdate) -> StoreResult<Value> {
    let mut next = match document {
        Value::Object(map) => map.clone(),
        _ => {
            return Err(StoreError::Backend(format!(
                "report {} is not a JSON object",
                update.id
            )))
        }
    };

    if let Value::Object(fields) = serde_json::to_value(&update.fields)? {
        next.extend(fields);
    }

    match &update.envelope {
        EnvelopeChange::Set(envelope) => {
            next.insert(ENVELOPE_KEY.to_string(), serde_json::to_value(envelope)?);
        }
        EnvelopeChange::Unset => {
            next.remove(ENVELOPE_KEY);
        }
    }

    Ok(Value::Object(next))
}

/// Reject identifiers that could escape a directory or collide on disk
pub(crate) fn validate_id(id: &str) -> StoreResult<()> {
    let bad = id.is_empty()
        || id == "."
        || id == ".."
        || id.contains(['/', '\\', '\0'])
        || id.starts_with('.');
    if bad {
        Err(StoreError::InvalidId(id.to_string()))
    } else {
        Ok(())
    }
}
