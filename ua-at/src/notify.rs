//! Notification sinks
//!
//! Delivery is best effort: the policy engine logs a failed send and moves
//! on. Duplicate sends are bounded by the monotonic warning level.

use crate::models::Identity;
use async_trait::async_trait;
use serde_json::json;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use ua_common::time::{now, to_db_timestamp};
use ua_common::{Error, Result};
use uuid::Uuid;

/// Delivers a message to one identity
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, identity: &Identity, subject: &str, body: &str) -> Result<()>;
}

/// Writes notifications to the log only
#[derive(Debug, Default, Clone)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn send(&self, identity: &Identity, subject: &str, body: &str) -> Result<()> {
        info!(
            identity_id = identity.id,
            username = %identity.username,
            subject,
            body,
            "Notification"
        );
        Ok(())
    }
}

/// Persists notifications to the `notifications` table
#[derive(Clone)]
pub struct OutboxSink {
    db: SqlitePool,
}

impl OutboxSink {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl NotificationSink for OutboxSink {
    async fn send(&self, identity: &Identity, subject: &str, body: &str) -> Result<()> {
        let guid = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO notifications (guid, identity_id, subject, body, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(guid.to_string())
        .bind(identity.id)
        .bind(subject)
        .bind(body)
        .bind(to_db_timestamp(now()))
        .execute(&self.db)
        .await?;
        Ok(())
    }
}

/// POSTs notifications as JSON to an external endpoint
#[derive(Clone)]
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| Error::Config(format!("Webhook client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn send(&self, identity: &Identity, subject: &str, body: &str) -> Result<()> {
        let payload = json!({
            "identity_id": identity.id,
            "username": identity.username,
            "subject": subject,
            "body": body,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::Internal(format!("Webhook send failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Internal(format!("Webhook returned {}", response.status())));
        }
        Ok(())
    }
}

/// Sends to every inner sink; succeeds if at least one does
pub struct FanoutSink {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn NotificationSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl NotificationSink for FanoutSink {
    async fn send(&self, identity: &Identity, subject: &str, body: &str) -> Result<()> {
        let mut last_error = None;
        let mut delivered = false;

        for sink in &self.sinks {
            match sink.send(identity, subject, body).await {
                Ok(()) => delivered = true,
                Err(e) => {
                    warn!(identity_id = identity.id, "Notification sink failed: {}", e);
                    last_error = Some(e);
                }
            }
        }

        match (delivered, last_error) {
            (true, _) | (false, None) => Ok(()),
            (false, Some(e)) => Err(e),
        }
    }
}
