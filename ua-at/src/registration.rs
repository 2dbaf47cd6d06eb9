//! Registration gate
//!
//! Decides whether add/drop is open on a given date. Precedence:
//! explicit override > date window > static default.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use ua_common::db::settings::{delete_setting, get_setting, keys, set_setting};
use ua_common::time::parse_db_date;
use ua_common::{Error, Result};

/// Operator override of the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateOverride {
    Open,
    Closed,
}

impl GateOverride {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateOverride::Open => "open",
            GateOverride::Closed => "closed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "open" => Some(GateOverride::Open),
            "closed" => Some(GateOverride::Closed),
            _ => None,
        }
    }
}

/// Which rule decided the gate state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateReason {
    Override,
    Window,
    Default,
}

/// Inputs to the gate decision
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GateSettings {
    pub override_state: Option<GateOverride>,
    pub opens_on: Option<NaiveDate>,
    pub closes_on: Option<NaiveDate>,
    pub default_open: bool,
}

/// Effective gate state on one date
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GateState {
    pub date: NaiveDate,
    pub open: bool,
    pub reason: GateReason,
    #[serde(flatten)]
    pub settings: GateSettings,
}

/// Pure precedence rule
///
/// The window applies only when both ends are set; it is inclusive.
pub fn resolve_gate(settings: &GateSettings, date: NaiveDate) -> (bool, GateReason) {
    if let Some(state) = settings.override_state {
        return (state == GateOverride::Open, GateReason::Override);
    }
    if let (Some(opens), Some(closes)) = (settings.opens_on, settings.closes_on) {
        return (opens <= date && date <= closes, GateReason::Window);
    }
    (settings.default_open, GateReason::Default)
}

/// Gate backed by the settings table
#[derive(Clone)]
pub struct RegistrationGate {
    db: SqlitePool,
}

impl RegistrationGate {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn settings(&self) -> Result<GateSettings> {
        let override_raw: Option<String> = get_setting(&self.db, keys::REGISTRATION_OVERRIDE).await?;
        let opens_raw: Option<String> = get_setting(&self.db, keys::REGISTRATION_OPENS_ON).await?;
        let closes_raw: Option<String> = get_setting(&self.db, keys::REGISTRATION_CLOSES_ON).await?;
        let default_open: Option<bool> = get_setting(&self.db, keys::REGISTRATION_DEFAULT_OPEN).await?;

        let override_state = match override_raw.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(GateOverride::parse(raw).ok_or_else(|| {
                Error::Config(format!("registration_override '{}' is not open/closed", raw))
            })?),
        };

        Ok(GateSettings {
            override_state,
            opens_on: opens_raw.as_deref().map(parse_db_date).transpose()?,
            closes_on: closes_raw.as_deref().map(parse_db_date).transpose()?,
            default_open: default_open.unwrap_or(false),
        })
    }

    pub async fn state_on(&self, date: NaiveDate) -> Result<GateState> {
        let settings = self.settings().await?;
        let (open, reason) = resolve_gate(&settings, date);
        Ok(GateState {
            date,
            open,
            reason,
            settings,
        })
    }

    pub async fn is_open(&self, date: NaiveDate) -> Result<bool> {
        Ok(self.state_on(date).await?.open)
    }

    /// Set (`Some`) or clear (`None`) the operator override
    pub async fn set_override(&self, state: Option<GateOverride>) -> Result<()> {
        match state {
            Some(state) => set_setting(&self.db, keys::REGISTRATION_OVERRIDE, state.as_str()).await,
            None => delete_setting(&self.db, keys::REGISTRATION_OVERRIDE).await.map(|_| ()),
        }
    }

    /// Set the inclusive add/drop window
    pub async fn set_window(&self, opens_on: NaiveDate, closes_on: NaiveDate) -> Result<()> {
        if closes_on < opens_on {
            return Err(Error::InvalidInput("window closes before it opens".to_string()));
        }
        set_setting(&self.db, keys::REGISTRATION_OPENS_ON, opens_on).await?;
        set_setting(&self.db, keys::REGISTRATION_CLOSES_ON, closes_on).await
    }
}
