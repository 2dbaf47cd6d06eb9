//! Users collaborator
//!
//! Read access to identities plus a creation path used for seeding.

use crate::models::{Identity, IdentityRef, Role};
use sqlx::SqlitePool;
use ua_common::time::{now, to_db_timestamp};
use ua_common::{Error, Result};

const IDENTITY_COLUMNS: &str = "id, username, display_name, role, utc_offset_minutes";

/// Fields for a new identity
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub display_name: String,
    pub role: Role,
    pub utc_offset_minutes: i32,
}

impl NewUser {
    pub fn student(username: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            display_name: display_name.into(),
            role: Role::Student,
            utc_offset_minutes: 0,
        }
    }
}

/// Look up an identity by id or username
pub async fn resolve_identity(db: &SqlitePool, reference: &IdentityRef) -> Result<Option<Identity>> {
    let row = match reference {
        IdentityRef::Id(id) => {
            sqlx::query(&format!("SELECT {} FROM users WHERE id = ?", IDENTITY_COLUMNS))
                .bind(id)
                .fetch_optional(db)
                .await?
        }
        IdentityRef::Username(username) => {
            sqlx::query(&format!("SELECT {} FROM users WHERE username = ?", IDENTITY_COLUMNS))
                .bind(username.trim())
                .fetch_optional(db)
                .await?
        }
    };

    row.as_ref().map(Identity::from_row).transpose()
}

/// Look up an identity by id
pub async fn get_identity(db: &SqlitePool, id: i64) -> Result<Option<Identity>> {
    resolve_identity(db, &IdentityRef::Id(id)).await
}

/// Insert a new identity
///
/// Fails with [`Error::Conflict`] when the username is taken.
pub async fn create_user(db: &SqlitePool, user: &NewUser) -> Result<Identity> {
    let username = user.username.trim();
    if username.is_empty() {
        return Err(Error::InvalidInput("username must not be empty".to_string()));
    }

    let result = sqlx::query(
        "INSERT INTO users (username, display_name, role, utc_offset_minutes, created_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(username)
    .bind(user.display_name.trim())
    .bind(user.role.as_str())
    .bind(user.utc_offset_minutes)
    .bind(to_db_timestamp(now()))
    .execute(db)
    .await
    .map_err(Error::from)
    .map_err(|e| {
        if e.is_unique_violation() {
            Error::Conflict(format!("username '{}' already exists", username))
        } else {
            e
        }
    })?;

    Ok(Identity {
        id: result.last_insert_rowid(),
        username: username.to_string(),
        display_name: user.display_name.trim().to_string(),
        role: user.role,
        utc_offset_minutes: user.utc_offset_minutes,
    })
}
