//! In-memory cache of derived keys for teams unlocked in this session

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use super::errors::{EncryptionError, EncryptionResult};
use super::models::{EncryptionKey, TeamSecurityConfig};
use super::verifier::verify_and_derive;

/// Default auto-lock timeout (1 hour)
const DEFAULT_AUTO_LOCK_TIMEOUT: Duration = Duration::from_secs(3600);

/// Entry in the unlock cache
struct UnlockedEntry {
    key: EncryptionKey,
    last_accessed: Instant,
}

impl UnlockedEntry {
    fn new(key: EncryptionKey) -> Self {
        Self {
            key,
            last_accessed: Instant::now(),
        }
    }

    fn touch(&mut self) {
        self.last_accessed = Instant::now();
    }

    fn is_expired(&self, timeout: Duration) -> bool {
        self.last_accessed.elapsed() > timeout
    }
}

/// Holds derived keys for unlocked teams. Keys never leave process memory
/// and are zeroized when evicted.
pub struct SessionKeyCache {
    /// team_id -> key
    unlocked_teams: RwLock<HashMap<String, UnlockedEntry>>,
    /// Idle time after which a team locks itself
    auto_lock_timeout: Duration,
}

impl Default for SessionKeyCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionKeyCache {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_AUTO_LOCK_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            unlocked_teams: RwLock::new(HashMap::new()),
            auto_lock_timeout: timeout,
        }
    }

    pub fn auto_lock_timeout(&self) -> Duration {
        self.auto_lock_timeout
    }

    /// Verify the password against the team config and cache the derived key
    pub fn unlock(
        &self,
        team_id: &str,
        password: &str,
        config: &TeamSecurityConfig,
    ) -> EncryptionResult<()> {
        let key = verify_and_derive(password, config)?;
        self.insert(team_id, key);
        log::info!("Team {} unlocked for this session", team_id);
        Ok(())
    }

    /// Cache an already-verified key
    pub fn insert(&self, team_id: &str, key: EncryptionKey) {
        let mut teams = self
            .unlocked_teams
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        teams.insert(team_id.to_string(), UnlockedEntry::new(key));
    }

    /// Drop the key for a team
    pub fn lock(&self, team_id: &str) {
        let mut teams = self
            .unlocked_teams
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if teams.remove(team_id).is_some() {
            log::info!("Team {} locked", team_id);
        }
    }

    pub fn is_unlocked(&self, team_id: &str) -> bool {
        let teams = self
            .unlocked_teams
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        teams
            .get(team_id)
            .map(|entry| !entry.is_expired(self.auto_lock_timeout))
            .unwrap_or(false)
    }

    /// Get the key for an unlocked team, refreshing its idle timer
    pub fn key(&self, team_id: &str) -> EncryptionResult<EncryptionKey> {
        let mut teams = self
            .unlocked_teams
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        match teams.get_mut(team_id) {
            Some(entry) if entry.is_expired(self.auto_lock_timeout) => {
                teams.remove(team_id);
                Err(EncryptionError::TeamLocked)
            }
            Some(entry) => {
                entry.touch();
                Ok(entry.key.clone())
            }
            None => Err(EncryptionError::TeamLocked),
        }
    }

    pub fn unlocked_team_ids(&self) -> Vec<String> {
        let teams = self
            .unlocked_teams
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<String> = teams
            .iter()
            .filter(|(_, entry)| !entry.is_expired(self.auto_lock_timeout))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn lock_all(&self) {
        self.unlocked_teams
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Remove expired entries (auto-lock check)
    pub fn cleanup_expired(&self) {
        let timeout = self.auto_lock_timeout;
        self.unlocked_teams
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, entry| !entry.is_expired(timeout));
    }

    pub fn stats(&self) -> SessionStats {
        let teams = self
            .unlocked_teams
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        SessionStats {
            unlocked_teams: teams
                .values()
                .filter(|entry| !entry.is_expired(self.auto_lock_timeout))
                .count(),
            auto_lock_timeout_secs: self.auto_lock_timeout.as_secs(),
        }
    }
}

/// Statistics about the session cache
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SessionStats {
    pub unlocked_teams: usize,
    pub auto_lock_timeout_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encryption::kdf::{derive_key, generate_salt};
    use crate::encryption::models::KdfConfig;
    use crate::encryption::verifier::make_verifier;
    use std::thread;

    fn test_key() -> EncryptionKey {
        EncryptionKey::new([0u8; 32])
    }

    fn config_for(password: &str) -> TeamSecurityConfig {
        let kdf = KdfConfig::new(generate_salt(), 1_000);
        let key = derive_key(password, &kdf).unwrap();
        TeamSecurityConfig::new(kdf, make_verifier(&key), "v1")
    }

    #[test]
    fn test_unlock_lock() {
        let cache = SessionKeyCache::new();
        let config = config_for("pw");

        assert!(!cache.is_unlocked("judo-club"));
        assert!(matches!(cache.key("judo-club"), Err(EncryptionError::TeamLocked)));

        cache.unlock("judo-club", "pw", &config).unwrap();
        assert!(cache.is_unlocked("judo-club"));
        let key = cache.key("judo-club").unwrap();
        assert_eq!(make_verifier(&key), config.verifier_b64);

        cache.lock("judo-club");
        assert!(!cache.is_unlocked("judo-club"));
        assert!(cache.key("judo-club").is_err());
    }

    #[test]
    fn test_wrong_password_not_cached() {
        let cache = SessionKeyCache::new();
        let config = config_for("pw");

        assert!(matches!(
            cache.unlock("judo-club", "nope", &config),
            Err(EncryptionError::WrongPassword)
        ));
        assert!(!cache.is_unlocked("judo-club"));
    }

    #[test]
    fn test_auto_lock_timeout() {
        let cache = SessionKeyCache::with_timeout(Duration::from_millis(50));
        cache.insert("team-a", test_key());
        assert!(cache.is_unlocked("team-a"));

        thread::sleep(Duration::from_millis(100));

        assert!(!cache.is_unlocked("team-a"));
        assert!(cache.key("team-a").is_err());
    }

    #[test]
    fn test_lock_all_and_stats() {
        let cache = SessionKeyCache::new();
        assert_eq!(cache.stats().unlocked_teams, 0);

        cache.insert("team-b", test_key());
        cache.insert("team-a", test_key());
        assert_eq!(cache.unlocked_team_ids(), vec!["team-a", "team-b"]);
        assert_eq!(cache.stats().unlocked_teams, 2);
        assert_eq!(cache.stats().auto_lock_timeout_secs, 3600);

        cache.lock_all();
        assert!(cache.unlocked_team_ids().is_empty());
    }

    #[test]
    fn test_cleanup_expired() {
        let cache = SessionKeyCache::with_timeout(Duration::from_millis(20));
        cache.insert("team-a", test_key());
        thread::sleep(Duration::from_millis(50));
        cache.cleanup_expired();
        assert_eq!(cache.stats().unlocked_teams, 0);
    }
}
