use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use zeroize::Zeroizing;

use scout_vault_lib::migration::MigrationRunner;
use scout_vault_lib::settings::VaultSettings;
use scout_vault_lib::store::FileStore;

pub const PASSWORD_ENV: &str = "SCOUT_VAULT_PASSWORD";
pub const NEW_PASSWORD_ENV: &str = "SCOUT_VAULT_NEW_PASSWORD";

/// Shared application state for CLI commands
pub struct App {
    pub store: Arc<FileStore>,
    pub runner: MigrationRunner<FileStore, FileStore>,
}

impl App {
    /// Open the store at `data_dir`, or the default data directory
    pub fn new(data_dir: Option<PathBuf>, settings_path: Option<&Path>) -> Result<Self> {
        let data_dir = match data_dir {
            Some(dir) => dir,
            None => FileStore::default_data_dir().context("Failed to get data directory")?,
        };

        let settings = match settings_path {
            Some(path) => VaultSettings::load(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))?,
            None => VaultSettings::load(&data_dir.join("settings.toml"))
                .context("Failed to load settings")?,
        };
        log::debug!("Using store at {}", data_dir.display());

        let store = Arc::new(FileStore::new(data_dir));
        let runner = MigrationRunner::new(store.clone(), store.clone(), settings);
        Ok(Self { store, runner })
    }
}

/// Read a password from `env_var`, falling back to one line of stdin.
pub fn read_password(env_var: &str, prompt: &str) -> Result<Zeroizing<String>> {
    if let Ok(value) = std::env::var(env_var) {
        if !value.is_empty() {
            return Ok(Zeroizing::new(value));
        }
    }

    if crate::stdin_is_tty() {
        eprint!("{}: ", prompt);
        std::io::stderr().flush().ok();
    }
    let mut line = Zeroizing::new(String::new());
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read password from stdin")?;

    let password = Zeroizing::new(line.trim_end_matches(['\r', '\n']).to_string());
    if password.is_empty() {
        bail!("No password given (set {} or pipe it on stdin)", env_var);
    }
    Ok(password)
}
