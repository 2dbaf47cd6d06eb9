//! Database initialization
//!
//! Creates the SQLite database on first run, applies the schema
//! (idempotent `CREATE ... IF NOT EXISTS`) and seeds default settings.

use crate::db::settings::keys;
use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::{debug, info};

/// Current schema version recorded in `schema_version`
pub const SCHEMA_VERSION: i64 = 1;

/// Settings seeded on first run; existing rows are never overwritten
pub const DEFAULT_SETTINGS: &[(&str, &str)] = &[
    (keys::LATE_THRESHOLD_MINUTES, "10"),
    (keys::COOLDOWN_SECONDS, "5"),
    (keys::LATE_PER_ABSENCE, "4"),
    (keys::SEMESTER_WEEKS, "16"),
    (keys::CAMPUS_UTC_OFFSET_MINUTES, "0"),
    (keys::SCAN_TIMEOUT_MS, "3000"),
    (keys::POLICY_TIMEOUT_MS, "1500"),
    (keys::CLOSER_GRACE_MINUTES, "5"),
    (keys::MAX_LOCK_WAIT_MS, "5000"),
    (keys::REGISTRATION_DEFAULT_OPEN, "false"),
];

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Readers are bursty: many reader devices can post at the same moment
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(16)
        .min_connections(2)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                // Per-connection pragmas; the pool may open new connections later
                sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                sqlx::query("PRAGMA busy_timeout = 5000").execute(&mut *conn).await?;
                Ok(())
            })
        })
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // WAL allows concurrent readers with one writer
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;

    create_schema(&pool).await?;
    init_default_settings(&pool).await?;

    Ok(pool)
}

/// Create every table, index and trigger (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_settings_table(pool).await?;
    create_users_table(pool).await?;
    create_sections_table(pool).await?;
    create_enrollments_table(pool).await?;
    create_tags_table(pool).await?;
    create_scan_events_table(pool).await?;
    create_attendance_table(pool).await?;
    create_notifications_table(pool).await?;

    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(SCHEMA_VERSION)
        .execute(pool)
        .await?;

    debug!("Schema version {} ready", SCHEMA_VERSION);
    Ok(())
}

/// Seed default settings without touching existing values
pub async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    for (key, value) in DEFAULT_SETTINGS {
        sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(pool)
            .await?;
    }
    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_users_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE,
            display_name TEXT NOT NULL DEFAULT '',
            role TEXT NOT NULL CHECK (role IN ('student', 'teacher', 'admin')),
            utc_offset_minutes INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_sections_table(pool: &SqlitePool) -> Result<()> {
    // Times are zero-padded HH:MM:SS so the CHECK compares correctly as text
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sections (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            course_code TEXT NOT NULL,
            course_name TEXT NOT NULL DEFAULT '',
            staff_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            year INTEGER NOT NULL,
            term TEXT NOT NULL CHECK (term IN ('first', 'second', 'summer')),
            class_name TEXT NOT NULL,
            day_bucket TEXT NOT NULL CHECK (day_bucket IN ('UTH', 'MW', 'FS')),
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            capacity INTEGER NOT NULL CHECK (capacity > 0),
            status TEXT NOT NULL DEFAULT 'active' CHECK (status IN ('active', 'inactive')),
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            CHECK (end_time > start_time),
            UNIQUE (course_code, staff_id, year, term, class_name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_sections_bucket ON sections(day_bucket, status, start_time)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_enrollments_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS enrollments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            identity_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            section_id INTEGER NOT NULL REFERENCES sections(id) ON DELETE CASCADE,
            warning_level INTEGER NOT NULL DEFAULT 0 CHECK (warning_level BETWEEN 0 AND 3),
            failed_due_to_attendance INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (identity_id, section_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_enrollments_section ON enrollments(section_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_tags_table(pool: &SqlitePool) -> Result<()> {
    // owner_id UNIQUE backs the 1:1 binding; assignment still checks both sides first
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tags (
            uid TEXT PRIMARY KEY,
            owner_id INTEGER UNIQUE REFERENCES users(id) ON DELETE SET NULL,
            created_at TEXT NOT NULL,
            assigned_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_scan_events_table(pool: &SqlitePool) -> Result<()> {
    // Audit trail: no foreign keys so deleting a user never rewrites history
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scan_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            uid TEXT NOT NULL,
            device_id TEXT,
            source_addr TEXT,
            status_hint TEXT NOT NULL DEFAULT 'SCAN',
            scanned_at TEXT NOT NULL,
            identity_id INTEGER,
            section_id INTEGER,
            metadata TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_scan_events_uid_time ON scan_events(uid, scanned_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_scan_events_time ON scan_events(scanned_at)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TRIGGER IF NOT EXISTS scan_events_append_only
        BEFORE UPDATE ON scan_events
        BEGIN
            SELECT RAISE(ABORT, 'scan_events is append-only');
        END
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_attendance_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS attendance (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            identity_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            section_id INTEGER NOT NULL REFERENCES sections(id) ON DELETE CASCADE,
            session_date TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('PRESENT', 'LATE', 'ABSENT')),
            first_seen TEXT,
            last_seen TEXT,
            device_id TEXT,
            first_scan_id INTEGER,
            last_scan_id INTEGER,
            source TEXT NOT NULL CHECK (source IN ('scan', 'closer')),
            created_at TEXT NOT NULL,
            UNIQUE (identity_id, section_id, session_date)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_attendance_section_date ON attendance(section_id, session_date)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_notifications_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS notifications (
            guid TEXT PRIMARY KEY,
            identity_id INTEGER NOT NULL,
            subject TEXT NOT NULL,
            body TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
