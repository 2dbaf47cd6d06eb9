//! Tag registry
//!
//! Maps a physical badge uid to at most one identity, and each identity to
//! at most one uid. Assignment reads both sides of the binding inside one
//! write transaction so conflicts are reported precisely instead of
//! surfacing as a bare UNIQUE failure.

use crate::models::{Identity, IdentityRef, Tag};
use crate::users;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{debug, info, warn};
use ua_common::db::retry_on_lock;
use ua_common::time::{now, parse_db_timestamp, to_db_timestamp};

/// Characters readers put between uid bytes
const UID_SEPARATORS: &[char] = &[' ', ':', '-', '.', '_'];

/// Tag registry failures
#[derive(Debug, Error)]
pub enum TagError {
    /// The uid is bound to someone else
    #[error("Tag {uid} is already assigned to {owner_username} (id {owner_id})")]
    UidOwnedByOther {
        uid: String,
        owner_id: i64,
        owner_username: String,
    },

    /// The identity already holds a different uid
    #[error("User {identity_id} already has tag {current_uid}")]
    IdentityHasOtherUid { identity_id: i64, current_uid: String },

    #[error("Invalid tag uid: '{0}'")]
    InvalidUid(String),

    #[error("Unknown identity: {0}")]
    UnknownIdentity(String),

    #[error(transparent)]
    Storage(#[from] ua_common::Error),
}

impl From<sqlx::Error> for TagError {
    fn from(err: sqlx::Error) -> Self {
        TagError::Storage(ua_common::Error::Database(err))
    }
}

/// Result of a successful assignment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagBinding {
    pub uid: String,
    pub identity_id: i64,
    pub username: String,
    /// False when the binding already existed
    pub changed: bool,
    /// Uid the identity held before a forced rebind
    #[serde(skip_serializing_if = "Option::is_none")]
    pub released_uid: Option<String>,
    /// Identity that owned the uid before a forced rebind
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evicted_owner_id: Option<i64>,
    pub assigned_at: DateTime<Utc>,
}

/// Canonical form of a reader-supplied uid
///
/// Trims, uppercases and strips separators, so `04:a1:b2:c3` and
/// `04A1B2C3` name the same tag. Returns `None` if nothing usable remains.
pub fn normalize_uid(raw: &str) -> Option<String> {
    let normalized: String = raw
        .trim()
        .chars()
        .filter(|c| !UID_SEPARATORS.contains(c))
        .flat_map(char::to_uppercase)
        .collect();

    if normalized.is_empty() || normalized.chars().any(|c| c.is_control() || c.is_whitespace()) {
        None
    } else {
        Some(normalized)
    }
}

/// Current owner of a uid
///
/// `None` for unknown uids, unowned uids and uids that do not normalize.
pub async fn resolve(db: &SqlitePool, uid: &str) -> ua_common::Result<Option<Identity>> {
    let Some(uid) = normalize_uid(uid) else {
        return Ok(None);
    };

    let row = sqlx::query(
        "SELECT u.id, u.username, u.display_name, u.role, u.utc_offset_minutes
         FROM tags t
         JOIN users u ON u.id = t.owner_id
         WHERE t.uid = ?",
    )
    .bind(&uid)
    .fetch_optional(db)
    .await?;

    row.as_ref().map(Identity::from_row).transpose()
}

/// Tag row for a uid, owned or not
pub async fn get_tag(db: &SqlitePool, uid: &str) -> ua_common::Result<Option<Tag>> {
    let Some(uid) = normalize_uid(uid) else {
        return Ok(None);
    };

    let row = sqlx::query("SELECT uid, owner_id, created_at, assigned_at FROM tags WHERE uid = ?")
        .bind(&uid)
        .fetch_optional(db)
        .await?;

    row.as_ref().map(Tag::from_row).transpose()
}

/// Create an unowned tag row for a uid seen for the first time
///
/// Returns true if a row was created.
pub async fn register_seen(db: &SqlitePool, uid: &str, seen_at: DateTime<Utc>) -> ua_common::Result<bool> {
    let result = sqlx::query(
        "INSERT INTO tags (uid, owner_id, created_at) VALUES (?, NULL, ?)
         ON CONFLICT(uid) DO NOTHING",
    )
    .bind(uid)
    .bind(to_db_timestamp(seen_at))
    .execute(db)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Bind `uid` to an identity
///
/// Without `force`, fails if the identity already holds a different uid
/// (checked first) or the uid belongs to a different identity. With
/// `force`, both prior bindings are released and the new one written.
pub async fn assign(
    db: &SqlitePool,
    uid: &str,
    identity: &IdentityRef,
    force: bool,
    max_lock_wait_ms: u64,
) -> Result<TagBinding, TagError> {
    let uid = normalize_uid(uid).ok_or_else(|| TagError::InvalidUid(uid.to_string()))?;
    let identity = users::resolve_identity(db, identity)
        .await?
        .ok_or_else(|| TagError::UnknownIdentity(identity.to_string()))?;

    let outcome = retry_on_lock("tag_assign", max_lock_wait_ms, || {
        assign_once(db, &uid, &identity, force)
    })
    .await?;

    match &outcome {
        Ok(binding) if binding.changed => info!(
            uid = %binding.uid,
            identity_id = binding.identity_id,
            force,
            released_uid = ?binding.released_uid,
            evicted_owner_id = ?binding.evicted_owner_id,
            "Tag assigned"
        ),
        Ok(binding) => debug!(uid = %binding.uid, identity_id = binding.identity_id, "Tag already assigned"),
        Err(conflict) => warn!(uid = %uid, identity_id = identity.id, "Tag assignment refused: {}", conflict),
    }

    outcome
}

/// One attempt of [`assign`]
///
/// The outer `Result` carries storage errors (retried on lock contention);
/// the inner one carries conflicts, which roll back and are not retried.
async fn assign_once(
    db: &SqlitePool,
    uid: &str,
    identity: &Identity,
    force: bool,
) -> ua_common::Result<Result<TagBinding, TagError>> {
    let mut tx = db.begin().await?;
    let ts = now();
    let ts_text = to_db_timestamp(ts);

    // First statement writes, so the transaction holds the write lock
    // before either side of the binding is read
    sqlx::query(
        "INSERT INTO tags (uid, owner_id, created_at) VALUES (?, NULL, ?)
         ON CONFLICT(uid) DO NOTHING",
    )
    .bind(uid)
    .bind(&ts_text)
    .execute(&mut *tx)
    .await?;

    let uid_owner: Option<(i64, String)> = sqlx::query_as(
        "SELECT u.id, u.username FROM tags t JOIN users u ON u.id = t.owner_id WHERE t.uid = ?",
    )
    .bind(uid)
    .fetch_optional(&mut *tx)
    .await?;

    let identity_uid: Option<String> = sqlx::query_scalar("SELECT uid FROM tags WHERE owner_id = ?")
        .bind(identity.id)
        .fetch_optional(&mut *tx)
        .await?;

    if matches!(&uid_owner, Some((owner_id, _)) if *owner_id == identity.id) {
        let assigned_at: Option<String> = sqlx::query_scalar("SELECT assigned_at FROM tags WHERE uid = ?")
            .bind(uid)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        return Ok(Ok(TagBinding {
            uid: uid.to_string(),
            identity_id: identity.id,
            username: identity.username.clone(),
            changed: false,
            released_uid: None,
            evicted_owner_id: None,
            assigned_at: assigned_at
                .as_deref()
                .map(parse_db_timestamp)
                .transpose()?
                .unwrap_or(ts),
        }));
    }

    let released_uid = identity_uid.filter(|current| current != uid);
    if let Some(current_uid) = &released_uid {
        if !force {
            return Ok(Err(TagError::IdentityHasOtherUid {
                identity_id: identity.id,
                current_uid: current_uid.clone(),
            }));
        }
    }

    if let Some((owner_id, owner_username)) = &uid_owner {
        if !force {
            return Ok(Err(TagError::UidOwnedByOther {
                uid: uid.to_string(),
                owner_id: *owner_id,
                owner_username: owner_username.clone(),
            }));
        }
    }

    // Release the identity's previous tag before taking the new one;
    // owner_id is UNIQUE
    if let Some(previous) = &released_uid {
        sqlx::query("UPDATE tags SET owner_id = NULL, assigned_at = NULL WHERE uid = ?")
            .bind(previous)
            .execute(&mut *tx)
            .await?;
    }

    sqlx::query("UPDATE tags SET owner_id = ?, assigned_at = ? WHERE uid = ?")
        .bind(identity.id)
        .bind(&ts_text)
        .bind(uid)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(Ok(TagBinding {
        uid: uid.to_string(),
        identity_id: identity.id,
        username: identity.username.clone(),
        changed: true,
        released_uid,
        evicted_owner_id: uid_owner.map(|(owner_id, _)| owner_id),
        assigned_at: ts,
    }))
}

/// Remove the owner of a uid; returns true if it had one
pub async fn unassign(db: &SqlitePool, uid: &str) -> ua_common::Result<bool> {
    let Some(uid) = normalize_uid(uid) else {
        return Ok(false);
    };
    let result = sqlx::query(
        "UPDATE tags SET owner_id = NULL, assigned_at = NULL WHERE uid = ? AND owner_id IS NOT NULL",
    )
    .bind(&uid)
    .execute(db)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Distinct uids recently seen by readers that have no owner
///
/// Newest first by last sighting. Uids only ever seen in the scan log
/// (no tag row) are included.
pub async fn recent_unassigned_uids(db: &SqlitePool, limit: u32) -> ua_common::Result<Vec<String>> {
    if limit == 0 {
        return Ok(Vec::new());
    }

    let uids: Vec<String> = sqlx::query_scalar(
        "SELECT se.uid
         FROM scan_events se
         LEFT JOIN tags t ON t.uid = se.uid
         WHERE t.owner_id IS NULL
         GROUP BY se.uid
         ORDER BY MAX(se.scanned_at) DESC, MAX(se.id) DESC
         LIMIT ?",
    )
    .bind(i64::from(limit))
    .fetch_all(db)
    .await?;

    Ok(uids)
}
