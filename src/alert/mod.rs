//! Price alerts and the rules that fire them
//!
//! An [`Alert`] is a persisted user rule: flag the alert when a symbol's price
//! crosses `target_price` in the direction given by its [`AlertCondition`].
//! Alerts are created through the catalog side of the store in the
//! `triggered = false` state and flipped exactly once, at trigger time, by the
//! [`TriggerCommitter`](committer::TriggerCommitter).

pub mod committer;
pub mod matcher;
pub mod postgres;
pub mod store;

pub use committer::TriggerCommitter;
pub use matcher::evaluate;
pub use postgres::{PgAlertStore, StoreConfig};
pub use store::{AlertCatalog, AlertStore, MemoryAlertStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AlertError, Result};

/// Alert identifier assigned by the store
pub type AlertId = i64;

/// User identifier assigned by the store
pub type UserId = i64;

/// Direction in which the price must cross the target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AlertCondition {
    /// Fires when the price is at or above the target
    Above,
    /// Fires when the price is at or below the target
    Below,
    /// Text found in storage that names neither direction
    Unrecognized(String),
}

impl AlertCondition {
    /// Parse stored condition text. Matching ignores case and surrounding whitespace.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case("ABOVE") {
            AlertCondition::Above
        } else if trimmed.eq_ignore_ascii_case("BELOW") {
            AlertCondition::Below
        } else {
            AlertCondition::Unrecognized(raw.to_string())
        }
    }

    /// Canonical text used on the wire and in storage
    pub fn as_str(&self) -> &str {
        match self {
            AlertCondition::Above => "ABOVE",
            AlertCondition::Below => "BELOW",
            AlertCondition::Unrecognized(raw) => raw,
        }
    }

    /// Whether this is one of the two supported directions
    pub fn is_recognized(&self) -> bool {
        !matches!(self, AlertCondition::Unrecognized(_))
    }
}

impl fmt::Display for AlertCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for AlertCondition {
    fn from(raw: String) -> Self {
        AlertCondition::parse(&raw)
    }
}

impl From<AlertCondition> for String {
    fn from(condition: AlertCondition) -> Self {
        condition.as_str().to_string()
    }
}

/// A persisted price alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub user_id: UserId,
    pub symbol: String,
    pub target_price: f64,
    pub condition: AlertCondition,
    pub triggered: bool,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    /// Whether `price` satisfies this alert's rule
    pub fn is_met_by(&self, price: f64) -> bool {
        matcher::evaluate(&self.condition, self.target_price, price)
    }
}

/// A registered user owning alerts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

/// Request to create an alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAlert {
    pub user_id: UserId,
    pub symbol: String,
    pub target_price: f64,
    pub condition: AlertCondition,
}

impl NewAlert {
    pub fn new(
        user_id: UserId,
        symbol: impl Into<String>,
        target_price: f64,
        condition: AlertCondition,
    ) -> Self {
        Self {
            user_id,
            symbol: symbol.into(),
            target_price,
            condition,
        }
    }

    /// Check the request and normalize the symbol to upper case.
    ///
    /// Unrecognized conditions are refused here so that storage only ever
    /// holds alerts that can fire.
    pub fn validate(self) -> Result<Self> {
        if self.user_id <= 0 {
            return Err(AlertError::InvalidAlert(
                "user_id must be positive".to_string(),
            ));
        }

        let symbol = self.symbol.trim().to_ascii_uppercase();
        if symbol.is_empty() {
            return Err(AlertError::InvalidAlert("symbol is required".to_string()));
        }

        if !self.target_price.is_finite() || self.target_price <= 0.0 {
            return Err(AlertError::InvalidAlert(
                "target_price must be positive".to_string(),
            ));
        }

        if !self.condition.is_recognized() {
            return Err(AlertError::InvalidAlert(format!(
                "condition must be ABOVE or BELOW, got '{}'",
                self.condition
            )));
        }

        Ok(Self { symbol, ..self })
    }
}
