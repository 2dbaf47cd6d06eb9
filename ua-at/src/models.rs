//! Domain types for attendance tracking
//!
//! Row mapping lives next to each type (`from_row`), following the
//! stored text formats described in [`ua_common::time`].

use chrono::{DateTime, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use ua_common::time::{parse_db_date, parse_db_time, parse_db_timestamp};
use ua_common::{Error, Result};

// ============================================================================
// Identities (Users collaborator)
// ============================================================================

/// Role of an identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Teacher,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::Admin => "admin",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "student" => Ok(Role::Student),
            "teacher" => Ok(Role::Teacher),
            "admin" => Ok(Role::Admin),
            other => Err(Error::InvalidInput(format!("Unknown role '{}'", other))),
        }
    }
}

/// A person known to the system
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Identity {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub role: Role,
    /// Minutes east of UTC for this person's civil time
    pub utc_offset_minutes: i32,
}

impl Identity {
    /// Name shown on reader displays; falls back to the username
    pub fn display_label(&self) -> &str {
        let trimmed = self.display_name.trim();
        if trimmed.is_empty() {
            &self.username
        } else {
            trimmed
        }
    }

    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            display_name: row.try_get("display_name")?,
            role: Role::parse(&row.try_get::<String, _>("role")?)?,
            utc_offset_minutes: row.try_get("utc_offset_minutes")?,
        })
    }
}

/// How a caller names an identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityRef {
    Id(i64),
    Username(String),
}

impl std::fmt::Display for IdentityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdentityRef::Id(id) => write!(f, "id {}", id),
            IdentityRef::Username(name) => write!(f, "username '{}'", name),
        }
    }
}

// ============================================================================
// Schedule (Catalog collaborator)
// ============================================================================

/// Weekly meeting pattern of a section
///
/// Canonical weekday mapping:
///
/// | Weekday | Bucket |
/// |---|---|
/// | Sunday, Tuesday, Thursday | `UTH` |
/// | Monday, Wednesday | `MW` |
/// | Friday, Saturday | `FS` |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DayBucket {
    #[serde(rename = "UTH")]
    Uth,
    #[serde(rename = "MW")]
    Mw,
    #[serde(rename = "FS")]
    Fs,
}

impl DayBucket {
    pub const ALL: [DayBucket; 3] = [DayBucket::Uth, DayBucket::Mw, DayBucket::Fs];

    /// Bucket that meets on `weekday`
    pub fn for_weekday(weekday: Weekday) -> Self {
        match weekday {
            Weekday::Sun | Weekday::Tue | Weekday::Thu => DayBucket::Uth,
            Weekday::Mon | Weekday::Wed => DayBucket::Mw,
            Weekday::Fri | Weekday::Sat => DayBucket::Fs,
        }
    }

    /// Weekdays on which this bucket meets
    pub fn weekdays(&self) -> &'static [Weekday] {
        match self {
            DayBucket::Uth => &[Weekday::Sun, Weekday::Tue, Weekday::Thu],
            DayBucket::Mw => &[Weekday::Mon, Weekday::Wed],
            DayBucket::Fs => &[Weekday::Fri, Weekday::Sat],
        }
    }

    /// Meetings per week, used for planned session counts
    pub fn weekly_meetings(&self) -> u32 {
        self.weekdays().len() as u32
    }

    pub fn code(&self) -> &'static str {
        match self {
            DayBucket::Uth => "UTH",
            DayBucket::Mw => "MW",
            DayBucket::Fs => "FS",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "UTH" => Ok(DayBucket::Uth),
            "MW" => Ok(DayBucket::Mw),
            "FS" => Ok(DayBucket::Fs),
            other => Err(Error::InvalidInput(format!("Unknown day bucket '{}'", other))),
        }
    }
}

/// Academic term
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Term {
    First,
    Second,
    Summer,
}

impl Term {
    pub fn as_str(&self) -> &'static str {
        match self {
            Term::First => "first",
            Term::Second => "second",
            Term::Summer => "summer",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "first" => Ok(Term::First),
            "second" => Ok(Term::Second),
            "summer" => Ok(Term::Summer),
            other => Err(Error::InvalidInput(format!("Unknown term '{}'", other))),
        }
    }
}

/// Whether a section currently meets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionStatus {
    Active,
    Inactive,
}

impl SectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SectionStatus::Active => "active",
            SectionStatus::Inactive => "inactive",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "active" => Ok(SectionStatus::Active),
            "inactive" => Ok(SectionStatus::Inactive),
            other => Err(Error::InvalidInput(format!("Unknown section status '{}'", other))),
        }
    }
}

/// A recurring scheduled class meeting (a section)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSeries {
    pub id: i64,
    pub course_code: String,
    pub course_name: String,
    pub staff_id: i64,
    pub year: i32,
    pub term: Term,
    pub class_name: String,
    pub day_bucket: DayBucket,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub capacity: i64,
    pub status: SectionStatus,
}

impl SessionSeries {
    /// Inclusive on both ends of the scheduled window
    pub fn contains(&self, t: NaiveTime) -> bool {
        self.start_time <= t && t <= self.end_time
    }

    /// True when both sections meet on the same days at overlapping times
    pub fn clashes_with(&self, other: &SessionSeries) -> bool {
        self.day_bucket == other.day_bucket
            && self.start_time < other.end_time
            && other.start_time < self.end_time
    }

    /// Short label, e.g. `CS101 A (UTH 09:00-09:50)`
    pub fn label(&self) -> String {
        format!(
            "{} {} ({} {}-{})",
            self.course_code,
            self.class_name,
            self.day_bucket.code(),
            self.start_time.format("%H:%M"),
            self.end_time.format("%H:%M")
        )
    }

    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            course_code: row.try_get("course_code")?,
            course_name: row.try_get("course_name")?,
            staff_id: row.try_get("staff_id")?,
            year: row.try_get("year")?,
            term: Term::parse(&row.try_get::<String, _>("term")?)?,
            class_name: row.try_get("class_name")?,
            day_bucket: DayBucket::parse(&row.try_get::<String, _>("day_bucket")?)?,
            start_time: parse_db_time(&row.try_get::<String, _>("start_time")?)?,
            end_time: parse_db_time(&row.try_get::<String, _>("end_time")?)?,
            capacity: row.try_get("capacity")?,
            status: SectionStatus::parse(&row.try_get::<String, _>("status")?)?,
        })
    }
}

/// Identity × section membership with mutable policy state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Enrollment {
    pub id: i64,
    pub identity_id: i64,
    pub section_id: i64,
    /// 0-3, never decreases
    pub warning_level: u8,
    /// Set once the maximum level is reached, never cleared
    pub failed_due_to_attendance: bool,
}

impl Enrollment {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            identity_id: row.try_get("identity_id")?,
            section_id: row.try_get("section_id")?,
            warning_level: row.try_get::<i64, _>("warning_level")?.clamp(0, 3) as u8,
            failed_due_to_attendance: row.try_get::<i64, _>("failed_due_to_attendance")? != 0,
        })
    }
}

// ============================================================================
// Attendance
// ============================================================================

/// Outcome of one session for one identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AttendanceStatus {
    Present,
    Late,
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "PRESENT",
            AttendanceStatus::Late => "LATE",
            AttendanceStatus::Absent => "ABSENT",
        }
    }

    /// Title case for reader displays
    pub fn title(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "Present",
            AttendanceStatus::Late => "Late",
            AttendanceStatus::Absent => "Absent",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PRESENT" => Ok(AttendanceStatus::Present),
            "LATE" => Ok(AttendanceStatus::Late),
            "ABSENT" => Ok(AttendanceStatus::Absent),
            other => Err(Error::InvalidInput(format!("Unknown attendance status '{}'", other))),
        }
    }
}

/// What produced an attendance record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordSource {
    Scan,
    Closer,
}

impl RecordSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordSource::Scan => "scan",
            RecordSource::Closer => "closer",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "scan" => Ok(RecordSource::Scan),
            "closer" => Ok(RecordSource::Closer),
            other => Err(Error::Internal(format!("Unknown record source '{}'", other))),
        }
    }
}

/// One record per (identity, section, date)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceRecord {
    pub id: i64,
    pub identity_id: i64,
    pub section_id: i64,
    pub session_date: NaiveDate,
    pub status: AttendanceStatus,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub device_id: Option<String>,
    pub first_scan_id: Option<i64>,
    pub last_scan_id: Option<i64>,
    pub source: RecordSource,
}

impl AttendanceRecord {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            identity_id: row.try_get("identity_id")?,
            section_id: row.try_get("section_id")?,
            session_date: parse_db_date(&row.try_get::<String, _>("session_date")?)?,
            status: AttendanceStatus::parse(&row.try_get::<String, _>("status")?)?,
            first_seen: optional_timestamp(row, "first_seen")?,
            last_seen: optional_timestamp(row, "last_seen")?,
            device_id: row.try_get("device_id")?,
            first_scan_id: row.try_get("first_scan_id")?,
            last_scan_id: row.try_get("last_scan_id")?,
            source: RecordSource::parse(&row.try_get::<String, _>("source")?)?,
        })
    }
}

// ============================================================================
// Tags and scans
// ============================================================================

/// Advisory direction reported by a reader; never affects policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StatusHint {
    In,
    Out,
    #[default]
    Scan,
}

impl StatusHint {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusHint::In => "IN",
            StatusHint::Out => "OUT",
            StatusHint::Scan => "SCAN",
        }
    }

    /// Lenient parse: anything unrecognized is a plain scan
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "IN" => StatusHint::In,
            "OUT" => StatusHint::Out,
            _ => StatusHint::Scan,
        }
    }
}

/// Physical credential and its current owner
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tag {
    pub uid: String,
    pub owner_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
}

impl Tag {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            uid: row.try_get("uid")?,
            owner_id: row.try_get("owner_id")?,
            created_at: parse_db_timestamp(&row.try_get::<String, _>("created_at")?)?,
            assigned_at: optional_timestamp(row, "assigned_at")?,
        })
    }
}

/// Immutable audit record of one physical badge presentation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanEvent {
    pub id: i64,
    pub uid: String,
    pub device_id: Option<String>,
    pub source_addr: Option<String>,
    pub status_hint: StatusHint,
    pub scanned_at: DateTime<Utc>,
    pub identity_id: Option<i64>,
    pub section_id: Option<i64>,
    pub metadata: serde_json::Value,
}

impl ScanEvent {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        let metadata: String = row.try_get("metadata")?;
        Ok(Self {
            id: row.try_get("id")?,
            uid: row.try_get("uid")?,
            device_id: row.try_get("device_id")?,
            source_addr: row.try_get("source_addr")?,
            status_hint: StatusHint::parse_lenient(&row.try_get::<String, _>("status_hint")?),
            scanned_at: parse_db_timestamp(&row.try_get::<String, _>("scanned_at")?)?,
            identity_id: row.try_get("identity_id")?,
            section_id: row.try_get("section_id")?,
            metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
        })
    }
}

fn optional_timestamp(row: &SqliteRow, column: &str) -> Result<Option<DateTime<Utc>>> {
    row.try_get::<Option<String>, _>(column)?
        .map(|raw| parse_db_timestamp(&raw))
        .transpose()
}
