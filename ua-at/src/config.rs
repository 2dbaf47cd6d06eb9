//! Engine configuration
//!
//! Policy constants are read from the `settings` table once at startup.
//! Missing or unparseable rows fall back to the built-in defaults.

use sqlx::SqlitePool;
use tracing::{info, warn};
use ua_common::config::TomlConfig;
use ua_common::db::settings::{get_setting, keys};

/// Tunables for scan ingestion, policy and the closer
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Arrival later than start + this many minutes is LATE
    pub late_threshold_minutes: i64,
    /// Minimum gap before a repeat scan advances `last_seen`
    pub cooldown_seconds: i64,
    /// LATE records per absence equivalent (L)
    pub late_per_absence: u32,
    pub semester_weeks: u32,
    /// Campus civil time, used by the closer
    pub campus_utc_offset_minutes: i32,
    /// Budget for everything after the audit append
    pub scan_timeout_ms: u64,
    /// Budget for the policy recompute inside a scan
    pub policy_timeout_ms: u64,
    pub closer_grace_minutes: i64,
    /// Upper bound on `database is locked` retries
    pub max_lock_wait_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            late_threshold_minutes: 10,
            cooldown_seconds: 5,
            late_per_absence: 4,
            semester_weeks: 16,
            campus_utc_offset_minutes: 0,
            scan_timeout_ms: 3000,
            policy_timeout_ms: 1500,
            closer_grace_minutes: 5,
            max_lock_wait_ms: 5000,
        }
    }
}

impl EngineConfig {
    /// Load from the settings table, falling back per key
    pub async fn load(db: &SqlitePool) -> Self {
        let defaults = Self::default();

        let config = Self {
            late_threshold_minutes: load_or(db, keys::LATE_THRESHOLD_MINUTES, defaults.late_threshold_minutes).await,
            cooldown_seconds: load_or(db, keys::COOLDOWN_SECONDS, defaults.cooldown_seconds).await,
            late_per_absence: load_or(db, keys::LATE_PER_ABSENCE, defaults.late_per_absence).await,
            semester_weeks: load_or(db, keys::SEMESTER_WEEKS, defaults.semester_weeks).await,
            campus_utc_offset_minutes: load_or(db, keys::CAMPUS_UTC_OFFSET_MINUTES, defaults.campus_utc_offset_minutes).await,
            scan_timeout_ms: load_or(db, keys::SCAN_TIMEOUT_MS, defaults.scan_timeout_ms).await,
            policy_timeout_ms: load_or(db, keys::POLICY_TIMEOUT_MS, defaults.policy_timeout_ms).await,
            closer_grace_minutes: load_or(db, keys::CLOSER_GRACE_MINUTES, defaults.closer_grace_minutes).await,
            max_lock_wait_ms: load_or(db, keys::MAX_LOCK_WAIT_MS, defaults.max_lock_wait_ms).await,
        }
        .sanitized();

        info!(
            late_threshold_minutes = config.late_threshold_minutes,
            cooldown_seconds = config.cooldown_seconds,
            late_per_absence = config.late_per_absence,
            semester_weeks = config.semester_weeks,
            campus_utc_offset_minutes = config.campus_utc_offset_minutes,
            "Engine configuration loaded"
        );

        config
    }

    /// Apply bootstrap TOML overrides
    pub fn apply_toml(mut self, toml: &TomlConfig) -> Self {
        if let Some(offset) = toml.campus_utc_offset_minutes {
            self.campus_utc_offset_minutes = offset;
        }
        self
    }

    /// Clamp values that would make the policy arithmetic meaningless
    fn sanitized(mut self) -> Self {
        if self.late_per_absence == 0 {
            warn!("late_per_absence must be at least 1, using 1");
            self.late_per_absence = 1;
        }
        if self.semester_weeks == 0 {
            warn!("semester_weeks must be at least 1, using 1");
            self.semester_weeks = 1;
        }
        self.late_threshold_minutes = self.late_threshold_minutes.max(0);
        self.cooldown_seconds = self.cooldown_seconds.max(0);
        self.closer_grace_minutes = self.closer_grace_minutes.max(0);
        self
    }
}

async fn load_or<T>(db: &SqlitePool, key: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Debug,
    T::Err: std::fmt::Display,
{
    match get_setting::<T>(db, key).await {
        Ok(Some(value)) => value,
        Ok(None) => {
            warn!("Setting '{}' missing, using default {:?}", key, default);
            default
        }
        Err(e) => {
            warn!("Setting '{}' unusable ({}), using default {:?}", key, e, default);
            default
        }
    }
}
