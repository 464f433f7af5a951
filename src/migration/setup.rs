//! Team security setup (config write)

use zeroize::Zeroizing;

use super::errors::{MigrationError, MigrationResult};
use crate::encryption::kdf::decode_salt;
use crate::encryption::{
    derive_key_blocking, generate_salt, make_verifier, parse_enc_version, EncryptionError,
    EncryptionKey, KdfConfig, TeamSecurityConfig,
};
use crate::settings::VaultSettings;
use crate::store::SecurityConfigStore;

/// Caller choices for a new team password
#[derive(Debug, Clone, Default)]
pub struct SetupOptions {
    /// Work factor; the settings default when `None`
    pub iterations: Option<u32>,
    pub password_hint: Option<String>,
}

/// Validate the password and work factor against the settings floor.
pub(crate) fn resolve_iterations(
    password: &str,
    options: &SetupOptions,
    settings: &VaultSettings,
) -> MigrationResult<u32> {
    if password.is_empty() {
        return Err(EncryptionError::config("password is required").into());
    }
    let iterations = options.iterations.unwrap_or(settings.default_iterations);
    if iterations < settings.min_iterations {
        return Err(EncryptionError::config(format!(
            "iteration count {} is below the minimum of {}",
            iterations, settings.min_iterations
        ))
        .into());
    }
    Ok(iterations)
}

/// Derive the key for a new password and build the unlocked config around it.
pub(crate) async fn build_config(
    password: &str,
    salt_b64: String,
    iterations: u32,
    settings: &VaultSettings,
    password_hint: Option<String>,
) -> MigrationResult<(TeamSecurityConfig, EncryptionKey)> {
    if parse_enc_version(&settings.enc_version).is_none() {
        return Err(EncryptionError::config(format!(
            "unsupported encryption version '{}'",
            settings.enc_version
        ))
        .into());
    }
    let kdf = KdfConfig::new(salt_b64, iterations);
    let key = derive_key_blocking(Zeroizing::new(password.to_string()), kdf.clone()).await?;
    let config = TeamSecurityConfig::new(kdf, make_verifier(&key), settings.enc_version.clone())
        .with_hint(password_hint);
    Ok((config, key))
}

/// Create or replace a team's security config.
///
/// Keeps the team's existing salt when it has a valid one. Refuses to touch a
/// locked team: its records are encrypted under the current key, so changing
/// the password there goes through rotation.
pub async fn setup_team<C>(
    store: &C,
    settings: &VaultSettings,
    team_id: &str,
    password: &str,
    options: SetupOptions,
) -> MigrationResult<TeamSecurityConfig>
where
    C: SecurityConfigStore + ?Sized,
{
    let iterations = resolve_iterations(password, &options, settings)?;

    let existing = store.load_config(team_id).await?;
    if existing.as_ref().is_some_and(|c| c.lock_enabled) {
        return Err(MigrationError::AlreadyLocked(team_id.to_string()));
    }

    let salt_b64 = existing
        .map(|c| c.kdf.salt_b64)
        .filter(|salt| decode_salt(salt).is_ok())
        .unwrap_or_else(generate_salt);

    let (config, _key) =
        build_config(password, salt_b64, iterations, settings, options.password_hint).await?;
    store.save_config(team_id, &config).await?;

    log::info!(
        "Security configured for team {} ({} iterations)",
        team_id,
        config.kdf.iterations
    );
    Ok(config)
}
