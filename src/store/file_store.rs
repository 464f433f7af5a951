//! JSON-file store used by the CLI.
//!
//! Layout under the base path:
//! `teams/<team>/security.json` and `teams/<team>/reports/<id>.json`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::fs;

use super::{
    apply_update, validate_id, RawReport, ReportStore, ReportUpdate, SecurityConfigStore,
    StoreError, StoreResult, UpdateOutcome,
};
use crate::encryption::TeamSecurityConfig;

const CONFIG_FILE: &str = "security.json";
const REPORTS_DIR: &str = "reports";

#[derive(Debug, Clone)]
pub struct FileStore {
    base_path: PathBuf,
}

impl FileStore {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    /// Get the default data directory
    pub fn default_data_dir() -> StoreResult<PathBuf> {
        dirs::data_local_dir()
            .map(|p| p.join("scout-vault"))
            .ok_or(StoreError::DataDirNotFound)
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn team_dir(&self, team_id: &str) -> StoreResult<PathBuf> {
        validate_id(team_id)?;
        Ok(self.base_path.join("teams").join(team_id))
    }

    fn config_path(&self, team_id: &str) -> StoreResult<PathBuf> {
        Ok(self.team_dir(team_id)?.join(CONFIG_FILE))
    }

    fn reports_dir(&self, team_id: &str) -> StoreResult<PathBuf> {
        Ok(self.team_dir(team_id)?.join(REPORTS_DIR))
    }

    fn report_path(&self, team_id: &str, id: &str) -> StoreResult<PathBuf> {
        validate_id(id)?;
        Ok(self.reports_dir(team_id)?.join(format!("{}.json", id)))
    }

    /// List teams that have a directory in the store
    pub async fn list_teams(&self) -> StoreResult<Vec<String>> {
        let teams_dir = self.base_path.join("teams");
        if !fs::try_exists(&teams_dir).await? {
            return Ok(Vec::new());
        }

        let mut teams = Vec::new();
        let mut entries = fs::read_dir(&teams_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                teams.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        teams.sort();
        Ok(teams)
    }

    /// Write a report document, creating directories as needed
    pub async fn put_report(&self, team_id: &str, id: &str, document: &Value) -> StoreResult<()> {
        let path = self.report_path(team_id, id)?;
        write_json(&path, document).await
    }

    pub async fn load_report(&self, team_id: &str, id: &str) -> StoreResult<Value> {
        let path = self.report_path(team_id, id)?;
        if !fs::try_exists(&path).await? {
            return Err(StoreError::NotFound(format!("report {} in team {}", id, team_id)));
        }
        let content = fs::read_to_string(&path).await?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Write via a temp file and rename so a crash never leaves half a document.
async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let content = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl SecurityConfigStore for FileStore {
    async fn load_config(&self, team_id: &str) -> StoreResult<Option<TeamSecurityConfig>> {
        let path = self.config_path(team_id)?;
        if !fs::try_exists(&path).await? {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).await?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    async fn save_config(&self, team_id: &str, config: &TeamSecurityConfig) -> StoreResult<()> {
        let path = self.config_path(team_id)?;
        write_json(&path, config).await
    }
}

#[async_trait]
impl ReportStore for FileStore {
    async fn fetch_reports(&self, team_id: &str) -> StoreResult<Vec<RawReport>> {
        let dir = self.reports_dir(team_id)?;
        if !fs::try_exists(&dir).await? {
            return Ok(Vec::new());
        }

        let mut reports = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };

            let content = fs::read_to_string(&path).await?;
            // Unparseable files still surface so the migration can report them.
            let document = serde_json::from_str(&content).unwrap_or_else(|e| {
                log::warn!("Report file {:?} is not valid JSON: {}", path, e);
                Value::Null
            });
            reports.push(RawReport::new(id, document));
        }

        reports.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(reports)
    }

    async fn update_report(&self, team_id: &str, update: &ReportUpdate) -> StoreResult<UpdateOutcome> {
        let path = self.report_path(team_id, &update.id)?;
        if !fs::try_exists(&path).await? {
            return Ok(UpdateOutcome::not_matched());
        }

        let content = fs::read_to_string(&path).await?;
        let document: Value = serde_json::from_str(&content)?;
        let next = apply_update(&document, update)?;
        if next == document {
            return Ok(UpdateOutcome {
                matched: true,
                modified: false,
            });
        }

        write_json(&path, &next).await?;
        Ok(UpdateOutcome {
            matched: true,
            modified: true,
        })
    }
}
