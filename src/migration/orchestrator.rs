//! Bulk lock / unlock of a team's report collection.
//!
//! The key is derived once per run. Records are classified and transformed
//! first, then the staged updates are written with bounded concurrency. A
//! failure on one record is recorded and the run moves on; configuration
//! problems and a wrong password stop the run before any record is read.

use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use zeroize::Zeroizing;

use super::errors::{MigrationError, MigrationResult};
use super::report::{FailureReason, MigrationDirection, MigrationReport, RotationReport};
use super::setup::{self, SetupOptions};
use crate::encryption::verifier::key_matches_verifier;
use crate::encryption::{
    encrypt_fields, generate_salt, verify_and_derive, EncryptionError, EncryptionKey,
    parse_enc_version, SessionKeyCache, TeamSecurityConfig,
};
use crate::reports::{open_report, strip_sensitive, RecordState, ScoutingReport};
use crate::settings::VaultSettings;
use crate::store::{RawReport, ReportStore, ReportUpdate, SecurityConfigStore, UpdateOutcome};

/// What to do with one fetched record
enum RecordPlan {
    AlreadyInTarget,
    Update(ReportUpdate),
    Fail(String, FailureReason),
}

/// How one staged update ended up
enum PersistOutcome {
    Modified,
    Unmodified,
    Failed(FailureReason),
    NotAttempted,
}

/// Drives setup, lock, unlock and rotation against the store collaborators.
pub struct MigrationRunner<C: ?Sized, R: ?Sized> {
    configs: Arc<C>,
    reports: Arc<R>,
    settings: VaultSettings,
    cancel: CancellationToken,
}

impl<C, R> MigrationRunner<C, R>
where
    C: SecurityConfigStore + ?Sized,
    R: ReportStore + ?Sized,
{
    pub fn new(configs: Arc<C>, reports: Arc<R>, settings: VaultSettings) -> Self {
        Self {
            configs,
            reports,
            settings,
            cancel: CancellationToken::new(),
        }
    }

    /// Use a caller-owned token; cancelling it stops the run between records.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn settings(&self) -> &VaultSettings {
        &self.settings
    }

    pub async fn setup_team(
        &self,
        team_id: &str,
        password: &str,
        options: SetupOptions,
    ) -> MigrationResult<TeamSecurityConfig> {
        setup::setup_team(self.configs.as_ref(), &self.settings, team_id, password, options).await
    }

    /// Stored config, or `NotConfigured` when there is none or it lacks a verifier
    pub async fn require_config(&self, team_id: &str) -> MigrationResult<TeamSecurityConfig> {
        match self.configs.load_config(team_id).await? {
            Some(config) if config.has_verifier() => Ok(config),
            _ => Err(EncryptionError::NotConfigured.into()),
        }
    }

    pub async fn check_password(&self, team_id: &str, password: &str) -> MigrationResult<bool> {
        let config = self.require_config(team_id).await?;
        match verified_key(&config, password).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_wrong_password() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Verify the password and derive the team key, e.g. to fill a session cache
    pub async fn unlock_key(&self, team_id: &str, password: &str) -> MigrationResult<EncryptionKey> {
        let config = self.require_config(team_id).await?;
        verified_key(&config, password).await
    }

    /// Empty key cache using the configured idle timeout
    pub fn session_cache(&self) -> SessionKeyCache {
        SessionKeyCache::with_timeout(self.settings.session_timeout())
    }

    /// Verify the password off-thread and keep the key in `cache`
    pub async fn open_session(
        &self,
        cache: &SessionKeyCache,
        team_id: &str,
        password: &str,
    ) -> MigrationResult<()> {
        let key = self.unlock_key(team_id, password).await?;
        cache.insert(team_id, key);
        Ok(())
    }

    /// Lock using the key cached for the team; `TeamLocked` when there is none.
    pub async fn lock_team_cached(
        &self,
        cache: &SessionKeyCache,
        team_id: &str,
    ) -> MigrationResult<MigrationReport> {
        let key = cache.key(team_id)?;
        self.lock_team_with_key(team_id, &key).await
    }

    /// Encrypt every plaintext report of the team.
    pub async fn lock_team(&self, team_id: &str, password: &str) -> MigrationResult<MigrationReport> {
        let config = self.require_config(team_id).await?;
        let key = verified_key(&config, password).await?;
        self.lock_with_config(team_id, config, &key).await
    }

    /// Lock with an already-derived key; the key must still match the verifier.
    pub async fn lock_team_with_key(
        &self,
        team_id: &str,
        key: &EncryptionKey,
    ) -> MigrationResult<MigrationReport> {
        let config = self.require_config(team_id).await?;
        if !key_matches_verifier(key, &config.verifier_b64)? {
            return Err(EncryptionError::WrongPassword.into());
        }
        self.lock_with_config(team_id, config, key).await
    }

    /// Decrypt every encrypted report of the team.
    pub async fn unlock_team(&self, team_id: &str, password: &str) -> MigrationResult<MigrationReport> {
        let config = self.require_config(team_id).await?;
        let key = verified_key(&config, password).await?;
        self.unlock_with_config(team_id, config, &key).await
    }

    /// Unlock with an already-derived key without consulting the verifier.
    ///
    /// A wrong key fails every encrypted record with `DecryptionFailed` and
    /// writes nothing; check [`MigrationReport::looks_like_wrong_key`].
    pub async fn unlock_team_with_key(
        &self,
        team_id: &str,
        key: &EncryptionKey,
    ) -> MigrationResult<MigrationReport> {
        let config = self.require_config(team_id).await?;
        self.unlock_with_config(team_id, config, key).await
    }

    /// Change the team password, keeping the team's lock state.
    ///
    /// A locked team has its records decrypted under the old key and
    /// re-encrypted under the new one. If any record cannot be decrypted the
    /// config is left as it was and the new password is not applied; the
    /// records already decrypted stay plaintext until the next lock run. An
    /// unlocked team only gets the new salt and verifier; its plaintext
    /// records are not encrypted.
    pub async fn rotate_password(
        &self,
        team_id: &str,
        old_password: &str,
        new_password: &str,
        options: SetupOptions,
    ) -> MigrationResult<RotationReport> {
        let config = self.require_config(team_id).await?;
        let iterations = setup::resolve_iterations(new_password, &options, &self.settings)?;
        let old_key = verified_key(&config, old_password).await?;

        // Derive the new key before touching records so a bad new password
        // cannot strand the team half-way.
        let (mut new_config, new_key) = setup::build_config(
            new_password,
            generate_salt(),
            iterations,
            &self.settings,
            options.password_hint.or(config.password_hint.clone()),
        )
        .await?;

        log::info!("Rotating password for team {}", team_id);
        let unlock = self
            .migrate(team_id, &old_key, MigrationDirection::Unlock, &config)
            .await?;
        if !unlock.is_complete() {
            log::warn!(
                "Rotation for team {} stopped: {}. Config unchanged.",
                team_id,
                unlock.summary()
            );
            return Ok(RotationReport {
                unlock,
                lock: None,
                config_rotated: false,
            });
        }

        // Written locked before any record is re-encrypted under the new key.
        new_config.lock_enabled = config.lock_enabled;
        self.configs.save_config(team_id, &new_config).await?;
        let lock = if new_config.lock_enabled {
            Some(self.lock_with_config(team_id, new_config, &new_key).await?)
        } else {
            None
        };

        Ok(RotationReport {
            unlock,
            lock,
            config_rotated: true,
        })
    }

    /// The config is marked locked before the first envelope is written, so
    /// setup can never replace the verifier of a team holding ciphertext.
    async fn lock_with_config(
        &self,
        team_id: &str,
        mut config: TeamSecurityConfig,
        key: &EncryptionKey,
    ) -> MigrationResult<MigrationReport> {
        envelope_version(&config)?;
        if !config.lock_enabled {
            config.lock_enabled = true;
            self.configs.save_config(team_id, &config).await?;
        }

        self.migrate(team_id, key, MigrationDirection::Lock, &config)
            .await
    }

    async fn unlock_with_config(
        &self,
        team_id: &str,
        mut config: TeamSecurityConfig,
        key: &EncryptionKey,
    ) -> MigrationResult<MigrationReport> {
        let report = self
            .migrate(team_id, key, MigrationDirection::Unlock, &config)
            .await?;

        // Failed records are still encrypted, so the team stays locked.
        if report.is_complete() && config.lock_enabled {
            config.lock_enabled = false;
            self.configs.save_config(team_id, &config).await?;
        }
        Ok(report)
    }

    async fn migrate(
        &self,
        team_id: &str,
        key: &EncryptionKey,
        direction: MigrationDirection,
        config: &TeamSecurityConfig,
    ) -> MigrationResult<MigrationReport> {
        let version = envelope_version(config)?;
        let raw_reports = self.reports.fetch_reports(team_id).await?;

        let mut report = MigrationReport::new(direction);
        report.considered = raw_reports.len();
        log::info!(
            "{:?} migration for team {} over {} report(s)",
            direction,
            team_id,
            report.considered
        );

        // Phase 1: classify and transform in memory.
        let mut staged = Vec::new();
        for (index, raw) in raw_reports.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                report.not_attempted = report.considered - index + staged.len();
                log::warn!("{:?} migration for team {} cancelled", direction, team_id);
                return Ok(report);
            }
            match plan_record(raw, key, direction, version) {
                RecordPlan::AlreadyInTarget => report.already_in_target += 1,
                RecordPlan::Update(update) => staged.push(update),
                RecordPlan::Fail(id, reason) => report.record_failure(id, reason),
            }
        }

        // Phase 2: persist staged updates.
        let outcomes: Vec<(String, PersistOutcome)> = stream::iter(staged)
            .map(|update| async move {
                if self.cancel.is_cancelled() {
                    return (update.id, PersistOutcome::NotAttempted);
                }
                let outcome = self.persist_with_retry(team_id, &update).await;
                (update.id, outcome)
            })
            .buffer_unordered(self.settings.migration_concurrency.max(1))
            .collect()
            .await;

        for (id, outcome) in outcomes {
            match outcome {
                PersistOutcome::Modified => report.succeeded += 1,
                PersistOutcome::Unmodified => report.matched_unmodified += 1,
                PersistOutcome::Failed(reason) => report.record_failure(id, reason),
                PersistOutcome::NotAttempted => {
                    report.cancelled = true;
                    report.not_attempted += 1;
                }
            }
        }
        report.failures.sort_by(|a, b| a.id.cmp(&b.id));

        log::info!("Team {}: {}", team_id, report.summary());
        Ok(report)
    }

    async fn persist_with_retry(&self, team_id: &str, update: &ReportUpdate) -> PersistOutcome {
        let attempts = self.settings.persist_retries.saturating_add(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.reports.update_report(team_id, update).await {
                Ok(UpdateOutcome {
                    matched: true,
                    modified: true,
                }) => return PersistOutcome::Modified,
                Ok(UpdateOutcome {
                    matched: true,
                    modified: false,
                }) => return PersistOutcome::Unmodified,
                Ok(UpdateOutcome { matched: false, .. }) => {
                    return PersistOutcome::Failed(FailureReason::NotMatched)
                }
                Err(err) if attempt < attempts => {
                    log::debug!(
                        "Update of report {} failed (attempt {}/{}): {}",
                        update.id,
                        attempt,
                        attempts,
                        err
                    );
                    tokio::time::sleep(self.settings.retry_backoff().saturating_mul(attempt)).await;
                }
                Err(err) => {
                    return PersistOutcome::Failed(FailureReason::Persistence {
                        attempts,
                        message: err.to_string(),
                    })
                }
            }
        }
    }
}

/// Verify on the blocking pool; PBKDF2 at real work factors takes a while.
async fn verified_key(config: &TeamSecurityConfig, password: &str) -> MigrationResult<EncryptionKey> {
    let config = config.clone();
    let password = Zeroizing::new(password.to_string());
    tokio::task::spawn_blocking(move || verify_and_derive(&password, &config))
        .await
        .map_err(|e| EncryptionError::KeyDerivationFailed(e.to_string()))?
        .map_err(MigrationError::from)
}

/// Envelope version to write for a config's `encVersion` tag ("v1" -> 1)
fn envelope_version(config: &TeamSecurityConfig) -> MigrationResult<u32> {
    parse_enc_version(&config.enc_version).ok_or_else(|| {
        EncryptionError::config(format!(
            "unsupported encryption version '{}'",
            config.enc_version
        ))
        .into()
    })
}

fn plan_record(
    raw: RawReport,
    key: &EncryptionKey,
    direction: MigrationDirection,
    version: u32,
) -> RecordPlan {
    let report: ScoutingReport = match serde_json::from_value(raw.document) {
        Ok(report) => report,
        Err(e) => {
            return RecordPlan::Fail(
                raw.id,
                FailureReason::MalformedRecord {
                    message: e.to_string(),
                },
            )
        }
    };

    match (direction, report.state()) {
        (_, RecordState::Mixed) => RecordPlan::Fail(raw.id, FailureReason::MixedState),
        (MigrationDirection::Lock, RecordState::Encrypted)
        | (MigrationDirection::Unlock, RecordState::Plaintext) => RecordPlan::AlreadyInTarget,
        (MigrationDirection::Lock, RecordState::Plaintext) => {
            let (_, fields) = strip_sensitive(&report);
            match encrypt_fields(key, &fields, version) {
                Ok(envelope) => {
                    log::debug!("Staged encryption of report {}", raw.id);
                    RecordPlan::Update(ReportUpdate::lock(raw.id, envelope))
                }
                Err(e) => RecordPlan::Fail(raw.id, FailureReason::from_encryption(&e)),
            }
        }
        (MigrationDirection::Unlock, RecordState::Encrypted) => match open_report(&report, key) {
            Ok(opened) => {
                log::debug!("Staged decryption of report {}", raw.id);
                RecordPlan::Update(ReportUpdate::unlock(raw.id, opened.sensitive))
            }
            Err(e) => RecordPlan::Fail(raw.id, FailureReason::from_encryption(&e)),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::*;
    use crate::store::{MemoryStore, StoreError, StoreResult};

    const PASSWORD: &str = "Gr@ppl3r!";

    fn fast_settings() -> VaultSettings {
        VaultSettings {
            min_iterations: 1_000,
            default_iterations: 1_000,
            retry_backoff_ms: 1,
            migration_concurrency: 3,
            ..VaultSettings::default()
        }
    }

    fn report_doc(id: &str) -> Value {
        json!({
            "id": id,
            "matchType": "competition",
            "eventName": "Pan Ams",
            "athleteFirstName": format!("Athlete {}", id),
            "athleteClub": "Checkmat",
            "athleteAttacks": ["armbar", "triangle"],
            "techniqueNotes": "Pulls guard early",
            "teamId": "team-1"
        })
    }

    async fn seeded(count: usize) -> (Arc<MemoryStore>, MigrationRunner<MemoryStore, MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        for i in 0..count {
            let id = format!("r{:02}", i);
            store.insert_report("team-1", &id, report_doc(&id)).await;
        }
        let runner = MigrationRunner::new(store.clone(), store.clone(), fast_settings());
        runner
            .setup_team("team-1", PASSWORD, SetupOptions::default())
            .await
            .unwrap();
        (store, runner)
    }

    #[tokio::test]
    async fn test_lock_then_unlock_restores_documents() {
        let (store, runner) = seeded(4).await;
        let before = store.snapshot("team-1").await;

        let locked = runner.lock_team("team-1", PASSWORD).await.unwrap();
        assert_eq!(locked.considered, 4);
        assert_eq!(locked.succeeded, 4);
        assert!(locked.is_complete());

        let doc = store.report("team-1", "r00").await.unwrap();
        assert_eq!(doc["athleteFirstName"], "");
        assert_eq!(doc["athleteAttacks"], json!([]));
        assert_eq!(doc["eventName"], "Pan Ams");
        assert_eq!(doc["teamId"], "team-1");
        assert_eq!(doc["crypto"]["version"], 1);
        assert!(runner.require_config("team-1").await.unwrap().lock_enabled);

        let unlocked = runner.unlock_team("team-1", PASSWORD).await.unwrap();
        assert_eq!(unlocked.succeeded, 4);
        assert!(!runner.require_config("team-1").await.unwrap().lock_enabled);

        // Blanked keys that were absent before come back as empty values.
        let after = store.snapshot("team-1").await;
        for (id, original) in before {
            let restored = &after[&id];
            assert!(restored.get("crypto").is_none());
            assert_eq!(restored["athleteFirstName"], original["athleteFirstName"]);
            assert_eq!(restored["athleteAttacks"], original["athleteAttacks"]);
            assert_eq!(restored["techniqueNotes"], original["techniqueNotes"]);
        }
    }

    #[tokio::test]
    async fn test_second_lock_is_idempotent() {
        let (store, runner) = seeded(3).await;
        runner.lock_team("team-1", PASSWORD).await.unwrap();
        let first = store.snapshot("team-1").await;

        let again = runner.lock_team("team-1", PASSWORD).await.unwrap();
        assert_eq!(again.succeeded, 0);
        assert_eq!(again.already_in_target, 3);
        assert_eq!(store.snapshot("team-1").await, first);
    }

    #[tokio::test]
    async fn test_unlock_skips_corrupted_record() {
        let (store, runner) = seeded(10).await;
        runner.lock_team("team-1", PASSWORD).await.unwrap();

        let mut doc = store.report("team-1", "r04").await.unwrap();
        let ct = doc["crypto"]["ciphertextB64"].as_str().unwrap().to_string();
        let mut bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, ct).unwrap();
        bytes[0] ^= 0x01;
        doc["crypto"]["ciphertextB64"] =
            json!(base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes));
        store.insert_report("team-1", "r04", doc.clone()).await;

        let report = runner.unlock_team("team-1", PASSWORD).await.unwrap();
        assert_eq!(report.considered, 10);
        assert_eq!(report.succeeded, 9);
        assert_eq!(report.failed_ids(), vec!["r04"]);
        assert_eq!(report.failures[0].reason, FailureReason::DecryptionFailed);
        assert!(!report.looks_like_wrong_key());

        // The corrupted record is untouched and the team stays locked.
        assert_eq!(store.report("team-1", "r04").await.unwrap(), doc);
        assert!(runner.require_config("team-1").await.unwrap().lock_enabled);
    }

    #[tokio::test]
    async fn test_wrong_password_is_fatal_and_writes_nothing() {
        let (store, runner) = seeded(3).await;
        runner.lock_team("team-1", PASSWORD).await.unwrap();
        let before = store.snapshot("team-1").await;

        let err = runner.unlock_team("team-1", "grappler").await.unwrap_err();
        assert!(err.is_wrong_password());
        let err = runner.lock_team("team-1", "grappler").await.unwrap_err();
        assert!(err.is_wrong_password());
        assert_eq!(store.snapshot("team-1").await, before);
        assert!(!runner.check_password("team-1", "grappler").await.unwrap());
        assert!(runner.check_password("team-1", PASSWORD).await.unwrap());
    }

    #[tokio::test]
    async fn test_wrong_key_fails_every_record() {
        let (store, runner) = seeded(5).await;
        runner.lock_team("team-1", PASSWORD).await.unwrap();
        let before = store.snapshot("team-1").await;

        let wrong = EncryptionKey::new([7u8; 32]);
        let report = runner.unlock_team_with_key("team-1", &wrong).await.unwrap();
        assert_eq!(report.failures.len(), 5);
        assert!(report.looks_like_wrong_key());
        assert_eq!(store.snapshot("team-1").await, before);

        let err = runner.lock_team_with_key("team-1", &wrong).await.unwrap_err();
        assert!(err.is_wrong_password());
    }

    #[tokio::test]
    async fn test_unconfigured_team() {
        let store = Arc::new(MemoryStore::new());
        store.insert_report("team-9", "r1", report_doc("r1")).await;
        let runner = MigrationRunner::new(store.clone(), store.clone(), fast_settings());

        assert!(runner.lock_team("team-9", PASSWORD).await.unwrap_err().is_not_configured());
        assert!(runner.check_password("team-9", PASSWORD).await.unwrap_err().is_not_configured());
        assert_eq!(store.report("team-9", "r1").await.unwrap(), report_doc("r1"));
    }

    #[tokio::test]
    async fn test_malformed_and_mixed_records_reported() {
        let (store, runner) = seeded(2).await;
        store
            .insert_report("team-1", "bad", json!({ "id": "bad", "athleteAttacks": "armbar" }))
            .await;
        let mut mixed = report_doc("mixed");
        mixed["crypto"] = json!({ "version": 1, "ivB64": "AAAAAAAAAAAAAAAA", "ciphertextB64": "" });
        store.insert_report("team-1", "mixed", mixed).await;

        let report = runner.lock_team("team-1", PASSWORD).await.unwrap();
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed_ids(), vec!["bad", "mixed"]);
        assert!(matches!(report.failures[0].reason, FailureReason::MalformedRecord { .. }));
        assert_eq!(report.failures[1].reason, FailureReason::MixedState);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_touches_nothing() {
        let (store, runner) = seeded(4).await;
        let before = store.snapshot("team-1").await;

        runner.cancellation_token().cancel();
        let report = runner.lock_team("team-1", PASSWORD).await.unwrap();
        assert!(report.cancelled);
        assert_eq!(report.not_attempted, 4);
        assert_eq!(report.succeeded, 0);
        assert!(!report.is_complete());
        assert_eq!(store.snapshot("team-1").await, before);
    }

    #[tokio::test]
    async fn test_rotation_rekeys_records() {
        let (store, runner) = seeded(3).await;
        runner.lock_team("team-1", PASSWORD).await.unwrap();
        let old_salt = runner.require_config("team-1").await.unwrap().kdf.salt_b64;

        let rotation = runner
            .rotate_password("team-1", PASSWORD, "n3w-Pa55", SetupOptions::default())
            .await
            .unwrap();
        assert!(rotation.config_rotated);
        assert_eq!(rotation.unlock.succeeded, 3);
        assert_eq!(rotation.lock.as_ref().unwrap().succeeded, 3);

        let config = runner.require_config("team-1").await.unwrap();
        assert!(config.lock_enabled);
        assert_ne!(config.kdf.salt_b64, old_salt);
        assert!(runner.unlock_team("team-1", PASSWORD).await.unwrap_err().is_wrong_password());

        let unlocked = runner.unlock_team("team-1", "n3w-Pa55").await.unwrap();
        assert_eq!(unlocked.succeeded, 3);
        assert_eq!(store.report("team-1", "r01").await.unwrap()["athleteFirstName"], "Athlete r01");
    }

    #[tokio::test]
    async fn test_rotation_keeps_config_on_failure() {
        let (store, runner) = seeded(2).await;
        runner.lock_team("team-1", PASSWORD).await.unwrap();
        let config = runner.require_config("team-1").await.unwrap();

        let mut doc = store.report("team-1", "r01").await.unwrap();
        doc["crypto"]["ivB64"] = json!("AAAAAAAAAAAAAAAA");
        store.insert_report("team-1", "r01", doc).await;

        let rotation = runner
            .rotate_password("team-1", PASSWORD, "n3w-Pa55", SetupOptions::default())
            .await
            .unwrap();
        assert!(!rotation.config_rotated);
        assert!(rotation.lock.is_none());
        assert_eq!(rotation.unlock.failed_ids(), vec!["r01"]);
        assert_eq!(runner.require_config("team-1").await.unwrap(), config);
    }

    /// Fails the first `flaky_failures` updates, and every update of `doomed`
    struct FlakyStore {
        inner: MemoryStore,
        flaky_failures: usize,
        calls: AtomicUsize,
        doomed: &'static str,
    }

    #[async_trait]
    impl ReportStore for FlakyStore {
        async fn fetch_reports(&self, team_id: &str) -> StoreResult<Vec<RawReport>> {
            self.inner.fetch_reports(team_id).await
        }

        async fn update_report(&self, team_id: &str, update: &ReportUpdate) -> StoreResult<UpdateOutcome> {
            if update.id == self.doomed {
                return Err(StoreError::Backend("write conflict".to_string()));
            }
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.flaky_failures {
                return Err(StoreError::Backend("timeout".to_string()));
            }
            self.inner.update_report(team_id, update).await
        }
    }

    #[tokio::test]
    async fn test_persist_retries_then_records_failure() {
        let (store, _) = seeded(3).await;
        let flaky = Arc::new(FlakyStore {
            inner: (*store).clone(),
            flaky_failures: 2,
            calls: AtomicUsize::new(0),
            doomed: "r02",
        });
        let runner = MigrationRunner::new(store.clone(), flaky, fast_settings());

        let report = runner.lock_team("team-1", PASSWORD).await.unwrap();
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed_ids(), vec!["r02"]);
        assert_eq!(
            report.failures[0].reason,
            FailureReason::Persistence {
                attempts: 3,
                message: "Storage backend error: write conflict".to_string()
            }
        );
        assert_eq!(store.report("team-1", "r02").await.unwrap(), report_doc("r02"));
    }

    #[tokio::test]
    async fn test_vanished_record_is_not_matched() {
        struct Vanishing(MemoryStore);

        #[async_trait]
        impl ReportStore for Vanishing {
            async fn fetch_reports(&self, team_id: &str) -> StoreResult<Vec<RawReport>> {
                let mut reports = self.0.fetch_reports(team_id).await?;
                reports.push(RawReport::new("ghost", report_doc("ghost")));
                Ok(reports)
            }

            async fn update_report(&self, team_id: &str, update: &ReportUpdate) -> StoreResult<UpdateOutcome> {
                self.0.update_report(team_id, update).await
            }
        }

        let (store, _) = seeded(1).await;
        let runner = MigrationRunner::new(
            store.clone(),
            Arc::new(Vanishing((*store).clone())),
            fast_settings(),
        );
        let report = runner.lock_team("team-1", PASSWORD).await.unwrap();
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failures[0].reason, FailureReason::NotMatched);
    }

    #[tokio::test]
    async fn test_session_cache_drives_lock() {
        let (store, runner) = seeded(2).await;
        let cache = runner.session_cache();
        assert_eq!(cache.auto_lock_timeout(), fast_settings().session_timeout());

        let err = runner.lock_team_cached(&cache, "team-1").await.unwrap_err();
        assert!(matches!(err, MigrationError::Encryption(EncryptionError::TeamLocked)));

        assert!(runner.open_session(&cache, "team-1", "nope").await.unwrap_err().is_wrong_password());
        runner.open_session(&cache, "team-1", PASSWORD).await.unwrap();
        assert!(cache.is_unlocked("team-1"));

        let report = runner.lock_team_cached(&cache, "team-1").await.unwrap();
        assert_eq!(report.succeeded, 2);
        assert!(store.report("team-1", "r00").await.unwrap().get("crypto").is_some());
    }

    /// Config store whose saves can be switched off
    struct UnreliableConfigs {
        inner: MemoryStore,
        saves_fail: AtomicBool,
    }

    #[async_trait]
    impl SecurityConfigStore for UnreliableConfigs {
        async fn load_config(&self, team_id: &str) -> StoreResult<Option<TeamSecurityConfig>> {
            self.inner.load_config(team_id).await
        }

        async fn save_config(&self, team_id: &str, config: &TeamSecurityConfig) -> StoreResult<()> {
            if self.saves_fail.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("down".to_string()));
            }
            self.inner.save_config(team_id, config).await
        }
    }

    #[tokio::test]
    async fn test_lock_writes_nothing_when_config_save_fails() {
        let store = Arc::new(MemoryStore::new());
        store.insert_report("t", "r1", report_doc("r1")).await;
        let configs = Arc::new(UnreliableConfigs {
            inner: (*store).clone(),
            saves_fail: AtomicBool::new(false),
        });
        let runner = MigrationRunner::new(configs.clone(), store.clone(), fast_settings());
        runner.setup_team("t", "pw", SetupOptions::default()).await.unwrap();

        configs.saves_fail.store(true, Ordering::SeqCst);
        let err = runner.lock_team("t", "pw").await.unwrap_err();
        assert!(matches!(err, MigrationError::Store(StoreError::Backend(_))));
        assert_eq!(store.report("t", "r1").await.unwrap(), report_doc("r1"));
        assert!(!runner.require_config("t").await.unwrap().lock_enabled);

        configs.saves_fail.store(false, Ordering::SeqCst);
        assert_eq!(runner.lock_team("t", "pw").await.unwrap().succeeded, 1);
        assert!(runner.require_config("t").await.unwrap().lock_enabled);

        // Ciphertext exists, so the verifier can no longer be replaced.
        let err = runner
            .setup_team("t", "other", SetupOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::AlreadyLocked(_)));
        assert_eq!(runner.unlock_team("t", "pw").await.unwrap().succeeded, 1);
    }

    #[tokio::test]
    async fn test_lock_accepts_null_fields() {
        let (store, runner) = seeded(0).await;
        let doc = json!({
            "id": "r1",
            "athleteFirstName": "Jane",
            "athleteClub": null,
            "athleteAttacks": null
        });
        store.insert_report("team-1", "r1", doc).await;

        let locked = runner.lock_team("team-1", PASSWORD).await.unwrap();
        assert_eq!(locked.succeeded, 1);
        assert!(locked.failures.is_empty());
        let stored = store.report("team-1", "r1").await.unwrap();
        assert_eq!(stored["athleteFirstName"], "");
        assert!(stored.get("crypto").is_some());

        runner.unlock_team("team-1", PASSWORD).await.unwrap();
        let restored = store.report("team-1", "r1").await.unwrap();
        assert_eq!(restored["athleteFirstName"], "Jane");
        assert_eq!(restored["athleteClub"], "");
        assert_eq!(restored["athleteAttacks"], json!([]));
    }

    /// Cancels the run as soon as its first update lands
    struct CancelAfterFirstWrite {
        inner: MemoryStore,
        token: CancellationToken,
    }

    #[async_trait]
    impl ReportStore for CancelAfterFirstWrite {
        async fn fetch_reports(&self, team_id: &str) -> StoreResult<Vec<RawReport>> {
            self.inner.fetch_reports(team_id).await
        }

        async fn update_report(&self, team_id: &str, update: &ReportUpdate) -> StoreResult<UpdateOutcome> {
            let outcome = self.inner.update_report(team_id, update).await;
            self.token.cancel();
            outcome
        }
    }

    #[tokio::test]
    async fn test_cancel_mid_run_keeps_persisted_records() {
        let store = Arc::new(MemoryStore::new());
        for i in 0..5 {
            let id = format!("r{:02}", i);
            store.insert_report("team-1", &id, report_doc(&id)).await;
        }
        let token = CancellationToken::new();
        let settings = VaultSettings {
            migration_concurrency: 1,
            ..fast_settings()
        };
        let reports = Arc::new(CancelAfterFirstWrite {
            inner: (*store).clone(),
            token: token.clone(),
        });
        let runner = MigrationRunner::new(store.clone(), reports, settings.clone())
            .with_cancellation(token);
        runner
            .setup_team("team-1", PASSWORD, SetupOptions::default())
            .await
            .unwrap();

        let report = runner.lock_team("team-1", PASSWORD).await.unwrap();
        assert!(report.cancelled);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.not_attempted, 4);
        assert!(report.failures.is_empty());
        assert!(!report.is_complete());

        let encrypted: Vec<String> = store
            .snapshot("team-1")
            .await
            .into_iter()
            .filter(|(_, doc)| doc.get("crypto").is_some())
            .map(|(id, _)| id)
            .collect();
        assert_eq!(encrypted, vec!["r00"]);
        assert!(runner.require_config("team-1").await.unwrap().lock_enabled);

        // A fresh run picks up where the cancelled one stopped.
        let rerun = MigrationRunner::new(store.clone(), store.clone(), settings);
        let report = rerun.lock_team("team-1", PASSWORD).await.unwrap();
        assert_eq!(report.already_in_target, 1);
        assert_eq!(report.succeeded, 4);
    }

    #[tokio::test]
    async fn test_rotation_keeps_unlocked_team_plaintext() {
        let (store, runner) = seeded(2).await;
        let before = store.snapshot("team-1").await;

        let rotation = runner
            .rotate_password("team-1", PASSWORD, "n3w-Pa55", SetupOptions::default())
            .await
            .unwrap();
        assert!(rotation.config_rotated);
        assert!(rotation.lock.is_none());
        assert_eq!(rotation.unlock.already_in_target, 2);
        assert_eq!(store.snapshot("team-1").await, before);

        let config = runner.require_config("team-1").await.unwrap();
        assert!(!config.lock_enabled);
        assert!(runner.check_password("team-1", "n3w-Pa55").await.unwrap());
        assert!(!runner.check_password("team-1", PASSWORD).await.unwrap());
    }

    #[test]
    fn test_envelope_version_from_tag() {
        let mut config = TeamSecurityConfig::new(
            crate::encryption::KdfConfig::new("c2FsdA==", 1),
            String::new(),
            "v1",
        );
        assert_eq!(envelope_version(&config).unwrap(), 1);
        config.enc_version = "v9".to_string();
        assert!(envelope_version(&config).is_err());
        config.enc_version = "one".to_string();
        assert!(envelope_version(&config).is_err());
    }
}
