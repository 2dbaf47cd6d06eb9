//! Settings table accessors
//!
//! Runtime configuration lives in the `settings` key/value table. Values are
//! stored as text and parsed on read.

use crate::{Error, Result};
use sqlx::SqlitePool;

/// Setting keys read by the attendance engine
pub mod keys {
    pub const LATE_THRESHOLD_MINUTES: &str = "late_threshold_minutes";
    pub const COOLDOWN_SECONDS: &str = "cooldown_seconds";
    pub const LATE_PER_ABSENCE: &str = "late_per_absence";
    pub const SEMESTER_WEEKS: &str = "semester_weeks";
    pub const CAMPUS_UTC_OFFSET_MINUTES: &str = "campus_utc_offset_minutes";
    pub const SCAN_TIMEOUT_MS: &str = "scan_timeout_ms";
    pub const POLICY_TIMEOUT_MS: &str = "policy_timeout_ms";
    pub const CLOSER_GRACE_MINUTES: &str = "closer_grace_minutes";
    pub const MAX_LOCK_WAIT_MS: &str = "max_lock_wait_ms";
    pub const REGISTRATION_OVERRIDE: &str = "registration_override";
    pub const REGISTRATION_OPENS_ON: &str = "registration_opens_on";
    pub const REGISTRATION_CLOSES_ON: &str = "registration_closes_on";
    pub const REGISTRATION_DEFAULT_OPEN: &str = "registration_default_open";
}

/// Generic setting getter
///
/// **Returns:** Some(value) if the row exists, None if not set
pub async fn get_setting<T>(db: &SqlitePool, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await
        .map_err(Error::Database)?;

    match row {
        Some((value,)) => {
            let parsed = value
                .trim()
                .parse::<T>()
                .map_err(|e| Error::Config(format!("Parse setting '{}' failed: {}", key, e)))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

/// Generic setting setter (insert or replace)
pub async fn set_setting<T>(db: &SqlitePool, key: &str, value: T) -> Result<()>
where
    T: std::fmt::Display,
{
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await
    .map_err(Error::Database)?;

    Ok(())
}

/// Remove a setting; returns true if a row was deleted
pub async fn delete_setting(db: &SqlitePool, key: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM settings WHERE key = ?")
        .bind(key)
        .execute(db)
        .await
        .map_err(Error::Database)?;

    Ok(result.rows_affected() > 0)
}
