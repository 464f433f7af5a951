//! Password-protected encryption of the sensitive fields of team scouting
//! reports.
//!
//! The [`encryption`] module holds the key derivation, verifier, cipher and
//! envelope codec. [`migration`] moves a whole team between plaintext and
//! encrypted storage through the collaborator traits in [`store`].

pub mod encryption;
pub mod migration;
pub mod reports;
pub mod settings;
pub mod store;

pub use encryption::{EncryptionError, EncryptionKey, SessionKeyCache, TeamSecurityConfig};
pub use migration::{MigrationError, MigrationReport, MigrationRunner, SetupOptions};
pub use settings::VaultSettings;
