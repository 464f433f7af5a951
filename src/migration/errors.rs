//! Errors that stop a migration before any record is touched

use thiserror::Error;

use crate::encryption::EncryptionError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error(transparent)]
    Encryption(#[from] EncryptionError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Team {0} is locked; rotate the password to re-key it")]
    AlreadyLocked(String),
}

impl MigrationError {
    pub fn is_wrong_password(&self) -> bool {
        matches!(self, Self::Encryption(EncryptionError::WrongPassword))
    }

    pub fn is_not_configured(&self) -> bool {
        matches!(self, Self::Encryption(EncryptionError::NotConfigured))
    }
}

impl From<MigrationError> for String {
    fn from(err: MigrationError) -> Self {
        err.to_string()
    }
}

pub type MigrationResult<T> = Result<T, MigrationError>;
