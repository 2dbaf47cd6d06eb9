//! Shared fixtures for ua-at integration tests
//!
//! Dates: 2025-03-04 is a Tuesday (UTH bucket), 2025-03-03 a Monday (MW).

#![allow(dead_code)]

use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use sqlx::SqlitePool;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use ua_at::catalog::{create_section, NewSection};
use ua_at::config::EngineConfig;
use ua_at::enrollments::enroll_unchecked_gate;
use ua_at::models::{DayBucket, Identity, IdentityRef, Role, SessionSeries, Term};
use ua_at::notify::NotificationSink;
use ua_at::users::{create_user, NewUser};
use ua_at::{tags, AppState};
use ua_common::db::init_database;
use ua_common::EventBus;

/// Test database plus wired application state
pub struct TestEnv {
    pub state: AppState,
    pub sink: Arc<RecordingSink>,
    // Dropped last so the database file outlives the pool
    pub _dir: TempDir,
}

impl TestEnv {
    pub fn db(&self) -> &SqlitePool {
        &self.state.db
    }
}

pub async fn test_env() -> TestEnv {
    test_env_with(EngineConfig::default()).await
}

pub async fn test_env_with(config: EngineConfig) -> TestEnv {
    test_env_with_sink(config, RecordingSink::default()).await
}

pub async fn test_env_with_sink(config: EngineConfig, sink: RecordingSink) -> TestEnv {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("ua.db")).await.unwrap();
    let sink = Arc::new(sink);
    let state = AppState::new(pool, config, sink.clone(), EventBus::new(64));
    TestEnv { state, sink, _dir: dir }
}

/// Notification sink that remembers what it was asked to send
#[derive(Default)]
pub struct RecordingSink {
    pub sent: Mutex<Vec<(i64, String)>>,
    /// Simulated delivery latency
    pub delay: Duration,
}

impl RecordingSink {
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl NotificationSink for RecordingSink {
    async fn send(&self, identity: &Identity, subject: &str, _body: &str) -> ua_common::Result<()> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.sent.lock().unwrap().push((identity.id, subject.to_string()));
        Ok(())
    }
}

pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
}

/// Tuesday 2025-03-04 at the given UTC time
pub fn tuesday(h: u32, min: u32, s: u32) -> DateTime<Utc> {
    at(2025, 3, 4, h, min, s)
}

pub fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

pub async fn student(db: &SqlitePool, username: &str) -> Identity {
    create_user(db, &NewUser::student(username, format!("Student {}", username)))
        .await
        .unwrap()
}

pub async fn teacher(db: &SqlitePool, username: &str) -> Identity {
    create_user(
        db,
        &NewUser {
            username: username.to_string(),
            display_name: format!("Teacher {}", username),
            role: Role::Teacher,
            utc_offset_minutes: 0,
        },
    )
    .await
    .unwrap()
}

pub async fn section(
    db: &SqlitePool,
    staff_id: i64,
    class_name: &str,
    bucket: DayBucket,
    start: NaiveTime,
    end: NaiveTime,
    capacity: i64,
) -> SessionSeries {
    create_section(
        db,
        &NewSection {
            course_code: "CS101".to_string(),
            course_name: "Intro to Computing".to_string(),
            staff_id,
            year: 2025,
            term: Term::Second,
            class_name: class_name.to_string(),
            day_bucket: bucket,
            start_time: start,
            end_time: end,
            capacity,
        },
    )
    .await
    .unwrap()
}

/// UTH 09:00-09:50 section taught by a fresh teacher
pub async fn morning_uth_section(db: &SqlitePool) -> SessionSeries {
    let staff = teacher(db, "t_morning").await;
    section(db, staff.id, "A", DayBucket::Uth, hm(9, 0), hm(9, 50), 40).await
}

/// Student enrolled in `section` who owns tag `uid`
pub async fn enrolled_student_with_tag(db: &SqlitePool, username: &str, uid: &str, section: &SessionSeries) -> Identity {
    let identity = student(db, username).await;
    enroll_unchecked_gate(db, identity.id, section.id).await.unwrap();
    tags::assign(db, uid, &IdentityRef::Id(identity.id), false, 1000)
        .await
        .unwrap();
    identity
}

pub async fn count_rows(db: &SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(db)
        .await
        .unwrap()
}

/// Insert a record directly, bypassing the ingestor
pub async fn seed_record(db: &SqlitePool, identity_id: i64, section_id: i64, date: &str, status: &str) {
    sqlx::query(
        "INSERT INTO attendance (identity_id, section_id, session_date, status, source, created_at)
         VALUES (?, ?, ?, ?, 'scan', '2025-01-01T00:00:00.000Z')",
    )
    .bind(identity_id)
    .bind(section_id)
    .bind(date)
    .bind(status)
    .execute(db)
    .await
    .unwrap();
}
