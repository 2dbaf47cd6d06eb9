//! Policy engine: absence equivalents, monotonic escalation, notify once

mod helpers;

use chrono::{Duration, NaiveDate};
use helpers::*;
use sqlx::SqlitePool;
use ua_at::enrollments::get_enrollment;
use ua_at::models::SessionSeries;
use ua_common::{Error, UaEvent};

/// Seed `count` records of `status` on consecutive past dates starting at `from`
async fn seed_many(db: &SqlitePool, identity_id: i64, section: &SessionSeries, from: NaiveDate, count: i64, status: &str) {
    for i in 0..count {
        let date = from + Duration::days(i);
        seed_record(db, identity_id, section.id, &date.format("%Y-%m-%d").to_string(), status).await;
    }
}

fn jan(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, day).unwrap()
}

#[tokio::test]
async fn test_twelfth_absence_escalates_to_first_warning() {
    let env = test_env().await;
    let section = morning_uth_section(env.db()).await;
    let s1 = enrolled_student_with_tag(env.db(), "s1", "T1", &section).await;

    seed_many(env.db(), s1.id, &section, jan(1), 11, "ABSENT").await;
    let before = env.state.policy.recompute(s1.id, section.id).await.unwrap();
    assert_eq!(before.state.absence_equivalent, 11);
    assert_eq!(before.state.planned_sessions, 48);
    assert_eq!(before.warning_level, 0);
    assert!(before.escalation.is_none());
    assert_eq!(env.sink.count(), 0);

    seed_record(env.db(), s1.id, section.id, "2025-01-12", "ABSENT").await;
    let after = env.state.policy.recompute(s1.id, section.id).await.unwrap();

    assert_eq!(after.state.absence_equivalent, 12);
    assert!((after.state.absence_percent - 25.0).abs() < 1e-9);
    assert_eq!(after.warning_level, 1);
    assert!(!after.failed_due_to_attendance);
    let escalation = after.escalation.unwrap();
    assert_eq!((escalation.previous_level, escalation.new_level), (0, 1));
    assert!(after.notified);
    assert_eq!(env.sink.count(), 1);

    let stored = get_enrollment(env.db(), s1.id, section.id).await.unwrap().unwrap();
    assert_eq!(stored.warning_level, 1);
}

#[tokio::test]
async fn test_recompute_without_change_does_not_renotify() {
    let env = test_env().await;
    let section = morning_uth_section(env.db()).await;
    let s1 = enrolled_student_with_tag(env.db(), "s1", "T1", &section).await;
    seed_many(env.db(), s1.id, &section, jan(1), 12, "ABSENT").await;

    env.state.policy.recompute(s1.id, section.id).await.unwrap();
    let again = env.state.policy.recompute(s1.id, section.id).await.unwrap();

    assert_eq!(again.warning_level, 1);
    assert!(again.escalation.is_none());
    assert!(!again.notified);
    assert_eq!(env.sink.count(), 1);
}

#[tokio::test]
async fn test_level_never_decreases() {
    let env = test_env().await;
    let section = morning_uth_section(env.db()).await;
    let s1 = enrolled_student_with_tag(env.db(), "s1", "T1", &section).await;
    seed_many(env.db(), s1.id, &section, jan(1), 12, "ABSENT").await;
    env.state.policy.recompute(s1.id, section.id).await.unwrap();

    // Corrections bring the count back under the first threshold
    sqlx::query("DELETE FROM attendance WHERE identity_id = ?")
        .bind(s1.id)
        .execute(env.db())
        .await
        .unwrap();

    let outcome = env.state.policy.recompute(s1.id, section.id).await.unwrap();
    assert_eq!(outcome.state.level, 0);
    assert_eq!(outcome.warning_level, 1);
    assert_eq!(env.sink.count(), 1);
}

#[tokio::test]
async fn test_four_lates_count_as_one_absence() {
    let env = test_env().await;
    let section = morning_uth_section(env.db()).await;
    let s1 = enrolled_student_with_tag(env.db(), "s1", "T1", &section).await;

    seed_many(env.db(), s1.id, &section, jan(1), 11, "ABSENT").await;
    seed_many(env.db(), s1.id, &section, jan(20), 3, "LATE").await;
    let three = env.state.policy.evaluate(s1.id, section.id).await.unwrap();
    assert_eq!(three.late_as_absence_count, 0);
    assert_eq!(three.level, 0);

    seed_record(env.db(), s1.id, section.id, "2025-01-23", "LATE").await;
    let outcome = env.state.policy.recompute(s1.id, section.id).await.unwrap();
    assert_eq!(outcome.state.late_count, 4);
    assert_eq!(outcome.state.late_as_absence_count, 1);
    assert_eq!(outcome.state.absence_equivalent, 12);
    assert_eq!(outcome.warning_level, 1);
}

#[tokio::test]
async fn test_present_records_do_not_count() {
    let env = test_env().await;
    let section = morning_uth_section(env.db()).await;
    let s1 = enrolled_student_with_tag(env.db(), "s1", "T1", &section).await;
    seed_many(env.db(), s1.id, &section, jan(1), 30, "PRESENT").await;

    let state = env.state.policy.evaluate(s1.id, section.id).await.unwrap();
    assert_eq!(state.present_count, 30);
    assert_eq!(state.absence_equivalent, 0);
    assert_eq!(state.level, 0);
}

#[tokio::test]
async fn test_jump_to_final_level_fails_once() {
    let env = test_env().await;
    let section = morning_uth_section(env.db()).await;
    let s1 = enrolled_student_with_tag(env.db(), "s1", "T1", &section).await;
    let mut rx = env.state.event_bus.subscribe();

    seed_many(env.db(), s1.id, &section, jan(1), 36, "ABSENT").await;
    let outcome = env.state.policy.recompute(s1.id, section.id).await.unwrap();

    assert_eq!(outcome.warning_level, 3);
    assert!(outcome.failed_due_to_attendance);
    let escalation = outcome.escalation.unwrap();
    assert_eq!((escalation.previous_level, escalation.new_level), (0, 3));
    assert!(escalation.failed);

    // One escalation, one notification
    assert_eq!(env.sink.count(), 1);
    let subject = env.sink.sent.lock().unwrap()[0].1.clone();
    assert!(subject.starts_with("Failed due to attendance"));

    match rx.recv().await.unwrap() {
        UaEvent::WarningEscalated { new_level, failed, .. } => {
            assert_eq!(new_level, 3);
            assert!(failed);
        }
        other => panic!("unexpected event {:?}", other),
    }

    let stored = get_enrollment(env.db(), s1.id, section.id).await.unwrap().unwrap();
    assert!(stored.failed_due_to_attendance);
}

#[tokio::test]
async fn test_each_level_notifies_once() {
    let env = test_env().await;
    let section = morning_uth_section(env.db()).await;
    let s1 = enrolled_student_with_tag(env.db(), "s1", "T1", &section).await;

    seed_many(env.db(), s1.id, &section, jan(1), 12, "ABSENT").await;
    env.state.policy.recompute(s1.id, section.id).await.unwrap();
    seed_many(env.db(), s1.id, &section, NaiveDate::from_ymd_opt(2025, 2, 1).unwrap(), 12, "ABSENT").await;
    let second = env.state.policy.recompute(s1.id, section.id).await.unwrap();

    assert_eq!(second.warning_level, 2);
    assert_eq!(env.sink.count(), 2);
    let subjects: Vec<String> = env.sink.sent.lock().unwrap().iter().map(|(_, s)| s.clone()).collect();
    assert!(subjects[0].starts_with("Attendance warning 1"));
    assert!(subjects[1].starts_with("Attendance warning 2"));
}

#[tokio::test]
async fn test_concurrent_recomputes_notify_once() {
    let env = test_env().await;
    let section = morning_uth_section(env.db()).await;
    let s1 = enrolled_student_with_tag(env.db(), "s1", "T1", &section).await;
    seed_many(env.db(), s1.id, &section, jan(1), 12, "ABSENT").await;

    let mut set = tokio::task::JoinSet::new();
    for _ in 0..5 {
        let policy = env.state.policy.clone();
        let (identity_id, section_id) = (s1.id, section.id);
        set.spawn(async move { policy.recompute(identity_id, section_id).await });
    }
    while let Some(joined) = set.join_next().await {
        assert_eq!(joined.unwrap().unwrap().warning_level, 1);
    }

    assert_eq!(env.sink.count(), 1);
}

#[tokio::test]
async fn test_recompute_requires_enrollment() {
    let env = test_env().await;
    let section = morning_uth_section(env.db()).await;
    let outsider = student(env.db(), "outsider").await;

    let err = env.state.policy.recompute(outsider.id, section.id).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    let err = env.state.policy.recompute(outsider.id, 9999).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_two_meeting_bucket_uses_smaller_plan() {
    let env = test_env().await;
    let staff = teacher(env.db(), "t").await;
    let mw = section(env.db(), staff.id, "M", ua_at::models::DayBucket::Mw, hm(13, 0), hm(14, 15), 30).await;
    let s1 = enrolled_student_with_tag(env.db(), "s1", "T1", &mw).await;

    // 32 planned: 8 absences is a quarter
    seed_many(env.db(), s1.id, &mw, jan(1), 8, "ABSENT").await;
    let outcome = env.state.policy.recompute(s1.id, mw.id).await.unwrap();
    assert_eq!(outcome.state.planned_sessions, 32);
    assert_eq!(outcome.warning_level, 1);
}

#[tokio::test]
async fn test_abandoned_recompute_still_notifies() {
    let env = test_env_with_sink(
        ua_at::config::EngineConfig::default(),
        RecordingSink::slow(std::time::Duration::from_millis(200)),
    )
    .await;
    let section = morning_uth_section(env.db()).await;
    let s1 = enrolled_student_with_tag(env.db(), "s1", "T1", &section).await;
    seed_many(env.db(), s1.id, &section, jan(1), 12, "ABSENT").await;
    let mut rx = env.state.event_bus.subscribe();

    let waited = tokio::time::timeout(
        std::time::Duration::from_millis(20),
        env.state.policy.recompute(s1.id, section.id),
    )
    .await;
    assert!(waited.is_err());

    match tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv()).await.unwrap().unwrap() {
        UaEvent::WarningEscalated { new_level, .. } => assert_eq!(new_level, 1),
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(env.sink.count(), 1);
}
