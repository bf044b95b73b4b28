//! Process configuration
//!
//! Every knob is a CLI flag with an environment fallback so the same binary
//! runs from a shell, a cron entry, or a container without code changes.
//! `validate` runs once at startup; everything downstream may assume the
//! invariants it checks.

use std::fs;
use std::path::PathBuf;

use chrono::NaiveDate;
use clap::Parser;

use crate::progression::UnitConfig;
use crate::sync::{RetryPolicy, SyncSettings};
use crate::types::{CadenceError, Extension, Result};
use crate::vault::Keyring;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "cadence",
    about = "Mastery progression and habit-service sync engine"
)]
pub struct Args {
    /// Curriculum definition: JSON array of {id, label, tag} units
    #[arg(long, env = "CADENCE_UNITS_FILE", default_value = "units.json")]
    pub units_file: PathBuf,

    /// Directory holding one JSON snapshot per learner
    #[arg(long, env = "CADENCE_STATE_DIR", default_value = "state")]
    pub state_dir: PathBuf,

    #[arg(long, env = "CADENCE_ANKI_URL", default_value = "http://localhost:8765")]
    pub anki_url: String,

    #[arg(long, env = "CADENCE_HABITICA_URL", default_value = "https://habitica.com")]
    pub habitica_url: String,

    /// Habit extension to sync against
    #[arg(long, env = "CADENCE_EXTENSION", default_value = "habitica")]
    pub extension: Extension,

    /// Comma-separated usernames; omit to sync every provisioned user
    #[arg(long, env = "CADENCE_USERNAMES", value_delimiter = ',')]
    pub usernames: Option<Vec<String>>,

    /// Day to evaluate (YYYY-MM-DD); defaults to today (UTC)
    #[arg(long, env = "CADENCE_DATE")]
    pub date: Option<NaiveDate>,

    /// Run every derivation but skip scoring calls and persistence
    #[arg(long, env = "CADENCE_DRY_RUN", default_value_t = false)]
    pub dry_run: bool,

    /// In-memory stores and a fixed development vault key, no MongoDB
    #[arg(long, env = "CADENCE_DEV_MODE", default_value_t = false)]
    pub dev_mode: bool,

    #[arg(
        long,
        env = "CADENCE_MONGODB_URI",
        default_value = "mongodb://localhost:27017"
    )]
    pub mongodb_uri: String,

    #[arg(long, env = "CADENCE_MONGODB_DB", default_value = "cadence")]
    pub mongodb_db: String,

    /// Vault keys as comma-separated `version:base64-key` entries
    #[arg(long, env = "CADENCE_VAULT_KEYS")]
    pub vault_keys: Option<String>,

    /// Key version new encryptions use
    #[arg(long, env = "CADENCE_VAULT_ACTIVE_KEY")]
    pub vault_active_key: Option<u32>,

    /// Mastery ratio in (0, 1] at which a unit counts as completed
    #[arg(long, env = "CADENCE_MASTERY_THRESHOLD", default_value_t = 0.8)]
    pub mastery_threshold: f64,

    #[arg(long, env = "CADENCE_MIN_DAILY_REVIEWS", default_value_t = 20)]
    pub min_daily_reviews: u32,

    #[arg(long, env = "CADENCE_REVIEWS_PER_UP_EVENT", default_value_t = 20)]
    pub reviews_per_up_event: u32,

    #[arg(long, env = "CADENCE_MISSING_REVIEWS_PER_DOWN_EVENT", default_value_t = 5)]
    pub missing_reviews_per_down_event: u32,

    /// Card interval (days) at which a card counts as mastered
    #[arg(long, env = "CADENCE_MATURE_INTERVAL_DAYS", default_value_t = 21)]
    pub mature_interval_days: u32,

    #[arg(long, env = "CADENCE_REQUEST_TIMEOUT_MS", default_value_t = 30_000)]
    pub request_timeout_ms: u64,

    #[arg(long, env = "CADENCE_RETRY_MAX_ATTEMPTS", default_value_t = 3)]
    pub retry_max_attempts: u32,

    #[arg(long, env = "CADENCE_RETRY_BASE_DELAY_MS", default_value_t = 250)]
    pub retry_base_delay_ms: u64,

    #[arg(long, env = "CADENCE_RETRY_MAX_DELAY_MS", default_value_t = 5_000)]
    pub retry_max_delay_ms: u64,

    /// Bounded concurrency for batch syncs
    #[arg(long, env = "CADENCE_SYNC_WORKERS", default_value_t = 4)]
    pub sync_workers: usize,

    #[arg(long, env = "CADENCE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    pub fn validate(&self) -> Result<()> {
        if !(self.mastery_threshold > 0.0 && self.mastery_threshold <= 1.0) {
            return Err(CadenceError::Config(format!(
                "mastery-threshold must be in (0, 1], got {}",
                self.mastery_threshold
            )));
        }
        if self.reviews_per_up_event == 0 {
            return Err(CadenceError::Config(
                "reviews-per-up-event must be positive".into(),
            ));
        }
        if self.missing_reviews_per_down_event == 0 {
            return Err(CadenceError::Config(
                "missing-reviews-per-down-event must be positive".into(),
            ));
        }
        if self.mature_interval_days == 0 {
            return Err(CadenceError::Config(
                "mature-interval-days must be positive".into(),
            ));
        }
        if self.sync_workers == 0 {
            return Err(CadenceError::Config("sync-workers must be positive".into()));
        }
        if self.retry_max_attempts == 0 {
            return Err(CadenceError::Config(
                "retry-max-attempts must be positive".into(),
            ));
        }
        if !self.dev_mode && self.vault_keys.is_none() {
            return Err(CadenceError::Config(
                "vault-keys is required outside dev mode".into(),
            ));
        }
        if self.vault_keys.is_some() && self.vault_active_key.is_none() {
            return Err(CadenceError::Config(
                "vault-active-key is required when vault-keys is set".into(),
            ));
        }
        Ok(())
    }

    /// Build the vault keyring. Dev mode without explicit keys falls back
    /// to the fixed development key.
    pub fn keyring(&self) -> Result<Keyring> {
        match (&self.vault_keys, self.vault_active_key) {
            (Some(keys), Some(active)) => Keyring::parse(keys, active),
            (None, _) if self.dev_mode => Ok(Keyring::dev()),
            _ => Err(CadenceError::Config(
                "vault-keys is required outside dev mode".into(),
            )),
        }
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            mastery_threshold: self.mastery_threshold,
            min_daily_reviews: self.min_daily_reviews,
            reviews_per_up_event: self.reviews_per_up_event,
            missing_reviews_per_down_event: self.missing_reviews_per_down_event,
            mature_interval_days: self.mature_interval_days,
            sync_workers: self.sync_workers,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            base_delay_ms: self.retry_base_delay_ms,
            max_delay_ms: self.retry_max_delay_ms,
        }
    }
}

/// Load and validate the curriculum file.
pub fn load_units(path: &PathBuf) -> Result<Vec<UnitConfig>> {
    let raw = fs::read_to_string(path).map_err(|e| {
        CadenceError::Config(format!("Cannot read units file {}: {e}", path.display()))
    })?;

    let units: Vec<UnitConfig> = serde_json::from_str(&raw).map_err(|e| {
        CadenceError::Config(format!("Invalid units file {}: {e}", path.display()))
    })?;

    if units.is_empty() {
        return Err(CadenceError::Config(format!(
            "Units file {} defines no units",
            path.display()
        )));
    }

    let mut seen = std::collections::BTreeSet::new();
    for unit in &units {
        if unit.id.trim().is_empty() || unit.tag.trim().is_empty() {
            return Err(CadenceError::Config(format!(
                "Units file {}: every unit needs a non-empty id and tag",
                path.display()
            )));
        }
        if !seen.insert(unit.id.as_str()) {
            return Err(CadenceError::Config(format!(
                "Units file {}: duplicate unit id '{}'",
                path.display(),
                unit.id
            )));
        }
    }

    Ok(units)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn base_args() -> Args {
        Args::parse_from(["cadence", "--dev-mode"])
    }

    #[test]
    fn defaults_validate_in_dev_mode() {
        assert!(base_args().validate().is_ok());
    }

    #[test]
    fn production_requires_vault_keys() {
        let args = Args::parse_from(["cadence"]);
        let err = args.validate().unwrap_err();
        assert!(matches!(err, CadenceError::Config(_)));
    }

    #[test]
    fn vault_keys_require_an_active_version() {
        let args = Args::parse_from(["cadence", "--vault-keys", "1:abc"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn threshold_bounds_are_enforced() {
        let mut args = base_args();
        args.mastery_threshold = 0.0;
        assert!(args.validate().is_err());
        args.mastery_threshold = 1.5;
        assert!(args.validate().is_err());
        args.mastery_threshold = 1.0;
        assert!(args.validate().is_ok());
    }

    #[test]
    fn zero_divisors_are_rejected() {
        let mut args = base_args();
        args.reviews_per_up_event = 0;
        assert!(args.validate().is_err());

        let mut args = base_args();
        args.missing_reviews_per_down_event = 0;
        assert!(args.validate().is_err());
    }

    #[test]
    fn usernames_flag_splits_on_commas() {
        let args = Args::parse_from(["cadence", "--dev-mode", "--usernames", "alice,bob"]);
        assert_eq!(
            args.usernames,
            Some(vec!["alice".to_string(), "bob".to_string()])
        );
    }

    #[test]
    fn dev_mode_falls_back_to_dev_keyring() {
        let args = base_args();
        assert_eq!(args.keyring().unwrap().active_version(), 1);
    }

    #[test]
    fn load_units_round_trips_a_valid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"id":"u1","label":"Unit 1","tag":"unit::u1"}},
               {{"id":"u2","label":"Unit 2","tag":"unit::u2"}}]"#
        )
        .unwrap();

        let units = load_units(&file.path().to_path_buf()).unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].id, "u1");
        assert_eq!(units[1].tag, "unit::u2");
    }

    #[test]
    fn load_units_rejects_duplicates_and_empties() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"id":"u1","label":"A","tag":"t"}},{{"id":"u1","label":"B","tag":"t"}}]"#
        )
        .unwrap();
        assert!(matches!(
            load_units(&file.path().to_path_buf()).unwrap_err(),
            CadenceError::Config(_)
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[]").unwrap();
        assert!(load_units(&file.path().to_path_buf()).is_err());
    }
}
