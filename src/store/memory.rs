//! In-memory store for tests and embedding callers

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{
    apply_update, RawReport, ReportStore, ReportUpdate, SecurityConfigStore, StoreResult,
    UpdateOutcome,
};
use crate::encryption::TeamSecurityConfig;

/// Thread-safe store keyed by team id; reports are kept in id order.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    configs: Arc<RwLock<HashMap<String, TeamSecurityConfig>>>,
    reports: Arc<RwLock<HashMap<String, BTreeMap<String, Value>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_report(&self, team_id: &str, id: &str, document: Value) {
        self.reports
            .write()
            .await
            .entry(team_id.to_string())
            .or_default()
            .insert(id.to_string(), document);
    }

    pub async fn report(&self, team_id: &str, id: &str) -> Option<Value> {
        self.reports
            .read()
            .await
            .get(team_id)
            .and_then(|reports| reports.get(id))
            .cloned()
    }

    /// Snapshot of every document for a team
    pub async fn snapshot(&self, team_id: &str) -> BTreeMap<String, Value> {
        self.reports
            .read()
            .await
            .get(team_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl SecurityConfigStore for MemoryStore {
    async fn load_config(&self, team_id: &str) -> StoreResult<Option<TeamSecurityConfig>> {
        Ok(self.configs.read().await.get(team_id).cloned())
    }

    async fn save_config(&self, team_id: &str, config: &TeamSecurityConfig) -> StoreResult<()> {
        self.configs
            .write()
            .await
            .insert(team_id.to_string(), config.clone());
        Ok(())
    }
}

#[async_trait]
impl ReportStore for MemoryStore {
    async fn fetch_reports(&self, team_id: &str) -> StoreResult<Vec<RawReport>> {
        Ok(self
            .reports
            .read()
            .await
            .get(team_id)
            .map(|reports| {
                reports
                    .iter()
                    .map(|(id, doc)| RawReport::new(id.clone(), doc.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn update_report(&self, team_id: &str, update: &ReportUpdate) -> StoreResult<UpdateOutcome> {
        let mut reports = self.reports.write().await;
        let Some(document) = reports
            .get_mut(team_id)
            .and_then(|team| team.get_mut(&update.id))
        else {
            return Ok(UpdateOutcome::not_matched());
        };

        let next = apply_update(document, update)?;
        let modified = next != *document;
        if modified {
            *document = next;
        }
        Ok(UpdateOutcome {
            matched: true,
            modified,
        })
    }
}
