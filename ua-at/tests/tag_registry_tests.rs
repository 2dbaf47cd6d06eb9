//! Tag registry: resolution, double-sided conflicts, forced rebinding,
//! unassigned pick-list

mod helpers;

use helpers::*;
use ua_at::ingest::ScanRequest;
use ua_at::models::IdentityRef;
use ua_at::tags::{self, TagError};

#[tokio::test]
async fn test_resolve_normalizes_uid() {
    let env = test_env().await;
    let s1 = student(env.db(), "s1").await;
    tags::assign(env.db(), "04A1B2C3", &IdentityRef::Id(s1.id), false, 1000)
        .await
        .unwrap();

    let resolved = tags::resolve(env.db(), " 04:a1:b2:c3 ").await.unwrap();
    assert_eq!(resolved.map(|i| i.id), Some(s1.id));
}

#[tokio::test]
async fn test_resolve_unknown_and_unowned_are_none() {
    let env = test_env().await;
    assert!(tags::resolve(env.db(), "DEADBEEF").await.unwrap().is_none());

    tags::register_seen(env.db(), "DEADBEEF", tuesday(9, 0, 0)).await.unwrap();
    assert!(tags::resolve(env.db(), "DEADBEEF").await.unwrap().is_none());
}

#[tokio::test]
async fn test_assign_by_username() {
    let env = test_env().await;
    let s1 = student(env.db(), "s1").await;

    let binding = tags::assign(env.db(), "aa-bb", &IdentityRef::Username("s1".into()), false, 1000)
        .await
        .unwrap();

    assert_eq!(binding.uid, "AABB");
    assert_eq!(binding.identity_id, s1.id);
    assert!(binding.changed);
}

#[tokio::test]
async fn test_uid_owned_by_other_conflicts_without_force() {
    let env = test_env().await;
    let s1 = student(env.db(), "s1").await;
    let s2 = student(env.db(), "s2").await;
    tags::assign(env.db(), "T1", &IdentityRef::Id(s1.id), false, 1000).await.unwrap();

    let err = tags::assign(env.db(), "T1", &IdentityRef::Id(s2.id), false, 1000)
        .await
        .unwrap_err();

    match err {
        TagError::UidOwnedByOther { uid, owner_id, owner_username } => {
            assert_eq!(uid, "T1");
            assert_eq!(owner_id, s1.id);
            assert_eq!(owner_username, "s1");
        }
        other => panic!("expected UidOwnedByOther, got {:?}", other),
    }

    // Nothing changed
    let owner = tags::resolve(env.db(), "T1").await.unwrap().unwrap();
    assert_eq!(owner.id, s1.id);
}

#[tokio::test]
async fn test_identity_with_other_uid_conflicts_without_force() {
    let env = test_env().await;
    let s1 = student(env.db(), "s1").await;
    tags::assign(env.db(), "T1", &IdentityRef::Id(s1.id), false, 1000).await.unwrap();

    let err = tags::assign(env.db(), "T2", &IdentityRef::Id(s1.id), false, 1000)
        .await
        .unwrap_err();

    match err {
        TagError::IdentityHasOtherUid { identity_id, current_uid } => {
            assert_eq!(identity_id, s1.id);
            assert_eq!(current_uid, "T1");
        }
        other => panic!("expected IdentityHasOtherUid, got {:?}", other),
    }

    // The refused uid must not linger as a new tag row
    assert!(tags::get_tag(env.db(), "T2").await.unwrap().is_none());
}

#[tokio::test]
async fn test_identity_side_is_reported_first() {
    let env = test_env().await;
    let s1 = student(env.db(), "s1").await;
    let s2 = student(env.db(), "s2").await;
    tags::assign(env.db(), "T1", &IdentityRef::Id(s1.id), false, 1000).await.unwrap();
    tags::assign(env.db(), "T2", &IdentityRef::Id(s2.id), false, 1000).await.unwrap();

    // Both sides conflict: s1 holds T1 and T2 belongs to s2
    let err = tags::assign(env.db(), "T2", &IdentityRef::Id(s1.id), false, 1000)
        .await
        .unwrap_err();
    assert!(matches!(err, TagError::IdentityHasOtherUid { .. }));
}

#[tokio::test]
async fn test_force_rebinds_and_evicts_both_sides() {
    let env = test_env().await;
    let s1 = student(env.db(), "s1").await;
    let s2 = student(env.db(), "s2").await;
    tags::assign(env.db(), "T1", &IdentityRef::Id(s1.id), false, 1000).await.unwrap();
    tags::assign(env.db(), "T2", &IdentityRef::Id(s2.id), false, 1000).await.unwrap();

    let binding = tags::assign(env.db(), "T2", &IdentityRef::Id(s1.id), true, 1000)
        .await
        .unwrap();

    assert!(binding.changed);
    assert_eq!(binding.released_uid.as_deref(), Some("T1"));
    assert_eq!(binding.evicted_owner_id, Some(s2.id));

    assert_eq!(tags::resolve(env.db(), "T2").await.unwrap().map(|i| i.id), Some(s1.id));
    assert!(tags::resolve(env.db(), "T1").await.unwrap().is_none());

    // 1:1 holds in both directions
    let owned_by_s1: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tags WHERE owner_id = ?")
        .bind(s1.id)
        .fetch_one(env.db())
        .await
        .unwrap();
    let owned_by_s2: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tags WHERE owner_id = ?")
        .bind(s2.id)
        .fetch_one(env.db())
        .await
        .unwrap();
    assert_eq!(owned_by_s1, 1);
    assert_eq!(owned_by_s2, 0);
}

#[tokio::test]
async fn test_reassigning_same_binding_is_a_no_op() {
    let env = test_env().await;
    let s1 = student(env.db(), "s1").await;
    tags::assign(env.db(), "T1", &IdentityRef::Id(s1.id), false, 1000).await.unwrap();

    let again = tags::assign(env.db(), "t1", &IdentityRef::Id(s1.id), false, 1000)
        .await
        .unwrap();
    assert!(!again.changed);
}

#[tokio::test]
async fn test_unknown_identity_and_invalid_uid() {
    let env = test_env().await;
    let err = tags::assign(env.db(), "T1", &IdentityRef::Username("ghost".into()), false, 1000)
        .await
        .unwrap_err();
    assert!(matches!(err, TagError::UnknownIdentity(_)));

    let s1 = student(env.db(), "s1").await;
    let err = tags::assign(env.db(), " :: ", &IdentityRef::Id(s1.id), false, 1000)
        .await
        .unwrap_err();
    assert!(matches!(err, TagError::InvalidUid(_)));
}

#[tokio::test]
async fn test_concurrent_assignments_keep_one_owner() {
    let env = test_env().await;
    let mut ids = Vec::new();
    for i in 0..6 {
        ids.push(student(env.db(), &format!("s{}", i)).await.id);
    }

    let mut set = tokio::task::JoinSet::new();
    for id in ids {
        let db = env.db().clone();
        set.spawn(async move { tags::assign(&db, "SHARED", &IdentityRef::Id(id), false, 5000).await });
    }

    let mut winners = 0;
    while let Some(result) = set.join_next().await {
        match result.unwrap() {
            Ok(_) => winners += 1,
            Err(TagError::UidOwnedByOther { .. }) => {}
            Err(other) => panic!("unexpected error {:?}", other),
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_recent_unassigned_newest_first_and_distinct() {
    let env = test_env().await;
    let owner = student(env.db(), "owner").await;

    for (uid, minute) in [("AAA", 1), ("BBB", 2), ("AAA", 3), ("OWNED", 4), ("CCC", 5)] {
        env.state
            .ingestor
            .ingest(ScanRequest {
                uid: uid.to_string(),
                scanned_at: Some(tuesday(12, minute, 0)),
                ..Default::default()
            })
            .await
            .unwrap();
    }
    tags::assign(env.db(), "OWNED", &IdentityRef::Id(owner.id), false, 1000)
        .await
        .unwrap();

    let uids = tags::recent_unassigned_uids(env.db(), 10).await.unwrap();
    assert_eq!(uids, vec!["CCC", "AAA", "BBB"]);

    let limited = tags::recent_unassigned_uids(env.db(), 2).await.unwrap();
    assert_eq!(limited, vec!["CCC", "AAA"]);
}

#[tokio::test]
async fn test_recent_unassigned_includes_uids_without_tag_rows() {
    let env = test_env().await;

    // A uid present only in the scan log
    sqlx::query("INSERT INTO scan_events (uid, scanned_at) VALUES ('LOGONLY', '2025-03-04T10:00:00.000Z')")
        .execute(env.db())
        .await
        .unwrap();

    let uids = tags::recent_unassigned_uids(env.db(), 5).await.unwrap();
    assert_eq!(uids, vec!["LOGONLY"]);
}
