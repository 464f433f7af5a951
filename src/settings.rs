//! Tunables for setup and migrations, loadable from a TOML file.
//!
//! ```toml
//! min_iterations = 100000
//! default_iterations = 310000
//! migration_concurrency = 8
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::encryption::{parse_enc_version, DEFAULT_ENC_VERSION, DEFAULT_ITERATIONS, MIN_ITERATIONS};

/// Most extra attempts a record update may get
pub const MAX_PERSIST_RETRIES: u32 = 10;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid setting: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultSettings {
    /// Lowest work factor setup accepts
    pub min_iterations: u32,
    /// Work factor for new configs when none is requested
    pub default_iterations: u32,
    /// Schema tag written to new team configs
    pub enc_version: String,
    /// Concurrent record updates during a migration
    pub migration_concurrency: usize,
    /// Extra attempts after a failed record update
    pub persist_retries: u32,
    /// Base delay between update attempts; grows linearly per attempt
    pub retry_backoff_ms: u64,
    /// Idle time before an unlocked session forgets its key
    pub session_timeout_secs: u64,
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            min_iterations: MIN_ITERATIONS,
            default_iterations: DEFAULT_ITERATIONS,
            enc_version: DEFAULT_ENC_VERSION.to_string(),
            migration_concurrency: 8,
            persist_retries: 2,
            retry_backoff_ms: 200,
            session_timeout_secs: 3600,
        }
    }
}

impl VaultSettings {
    pub fn from_toml_str(content: &str) -> Result<Self, SettingsError> {
        let settings: Self = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load from a file; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            log::debug!("No settings file at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.min_iterations == 0 {
            return Err(SettingsError::Invalid(
                "min_iterations must be positive".to_string(),
            ));
        }
        if self.default_iterations < self.min_iterations {
            return Err(SettingsError::Invalid(format!(
                "default_iterations ({}) is below min_iterations ({})",
                self.default_iterations, self.min_iterations
            )));
        }
        if self.migration_concurrency == 0 {
            return Err(SettingsError::Invalid(
                "migration_concurrency must be at least 1".to_string(),
            ));
        }
        if parse_enc_version(&self.enc_version).is_none() {
            return Err(SettingsError::Invalid(format!(
                "enc_version '{}' is not a supported encryption version",
                self.enc_version
            )));
        }
        if self.persist_retries > MAX_PERSIST_RETRIES {
            return Err(SettingsError::Invalid(format!(
                "persist_retries ({}) exceeds the maximum of {}",
                self.persist_retries, MAX_PERSIST_RETRIES
            )));
        }
        Ok(())
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }
}
