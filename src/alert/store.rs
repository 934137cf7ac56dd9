//! Alert store contracts and the in-process implementation

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::BTreeMap;

use super::{Alert, AlertId, NewAlert, User, UserId};
use crate::error::{AlertError, Result};

/// The narrow store contract used by the evaluation pipeline.
///
/// Implementations must be safe to call concurrently from every partition
/// worker. `mark_alert_triggered` has to be a single conditional update
/// (`... WHERE triggered = false`) so that two workers racing on the same
/// alert cannot both observe a transition.
#[async_trait]
pub trait AlertStore: Send + Sync + 'static {
    /// All alerts for `symbol` that have not fired yet
    async fn active_alerts_by_symbol(&self, symbol: &str) -> Result<Vec<Alert>>;

    /// Flip `triggered` from false to true.
    ///
    /// Returns `true` only if this call performed the transition. An alert
    /// that is already triggered or does not exist yields `Ok(false)`: the
    /// conditional update simply matched nothing.
    async fn mark_alert_triggered(&self, alert_id: AlertId) -> Result<bool>;
}

/// Create/list operations used by the request/response side of the service.
#[async_trait]
pub trait AlertCatalog: Send + Sync + 'static {
    /// Register a user and return its id
    async fn create_user(&self, username: &str) -> Result<UserId>;

    /// Look a user up by name
    async fn user_by_username(&self, username: &str) -> Result<Option<User>>;

    /// Validate and persist a new alert in the active state
    async fn create_alert(&self, alert: NewAlert) -> Result<Alert>;

    /// Alerts for one user, or for everyone when `user_id` is `None`
    async fn alerts_by_user(&self, user_id: Option<UserId>, active_only: bool)
        -> Result<Vec<Alert>>;

    /// Every alert that has not fired
    async fn active_alerts(&self) -> Result<Vec<Alert>> {
        self.alerts_by_user(None, true).await
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    alerts: BTreeMap<AlertId, Alert>,
    users: BTreeMap<UserId, User>,
    next_alert_id: AlertId,
    next_user_id: UserId,
}

/// Alert store held entirely in memory.
///
/// Every operation runs under one lock, which makes the conditional trigger
/// update atomic in the same way a single `UPDATE` statement is.
#[derive(Debug, Default)]
pub struct MemoryAlertStore {
    state: RwLock<MemoryState>,
}

impl MemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an alert row as-is, bypassing validation.
    ///
    /// Useful for reproducing rows written by older producers.
    pub fn insert_raw(&self, alert: Alert) {
        let mut state = self.state.write();
        state.next_alert_id = state.next_alert_id.max(alert.id);
        state.alerts.insert(alert.id, alert);
    }

    /// Fetch a single alert by id
    pub fn get(&self, alert_id: AlertId) -> Option<Alert> {
        self.state.read().alerts.get(&alert_id).cloned()
    }

    /// Number of alerts that have fired
    pub fn triggered_count(&self) -> usize {
        self.state
            .read()
            .alerts
            .values()
            .filter(|alert| alert.triggered)
            .count()
    }
}

#[async_trait]
impl AlertStore for MemoryAlertStore {
    async fn active_alerts_by_symbol(&self, symbol: &str) -> Result<Vec<Alert>> {
        let state = self.state.read();
        Ok(state
            .alerts
            .values()
            .filter(|alert| !alert.triggered && alert.symbol == symbol)
            .cloned()
            .collect())
    }

    async fn mark_alert_triggered(&self, alert_id: AlertId) -> Result<bool> {
        let mut state = self.state.write();
        match state.alerts.get_mut(&alert_id) {
            Some(alert) if !alert.triggered => {
                alert.triggered = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl AlertCatalog for MemoryAlertStore {
    async fn create_user(&self, username: &str) -> Result<UserId> {
        let username = username.trim();
        if username.is_empty() {
            return Err(AlertError::InvalidAlert("username is required".to_string()));
        }

        let mut state = self.state.write();
        if state.users.values().any(|user| user.username == username) {
            return Err(AlertError::InvalidAlert(format!(
                "username '{}' already exists",
                username
            )));
        }

        state.next_user_id += 1;
        let id = state.next_user_id;
        state.users.insert(
            id,
            User {
                id,
                username: username.to_string(),
                created_at: Utc::now(),
            },
        );
        Ok(id)
    }

    async fn user_by_username(&self, username: &str) -> Result<Option<User>> {
        let state = self.state.read();
        Ok(state
            .users
            .values()
            .find(|user| user.username == username)
            .cloned())
    }

    async fn create_alert(&self, alert: NewAlert) -> Result<Alert> {
        let alert = alert.validate()?;

        let mut state = self.state.write();
        state.next_alert_id += 1;
        let stored = Alert {
            id: state.next_alert_id,
            user_id: alert.user_id,
            symbol: alert.symbol,
            target_price: alert.target_price,
            condition: alert.condition,
            triggered: false,
            created_at: Utc::now(),
        };
        state.alerts.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn alerts_by_user(
        &self,
        user_id: Option<UserId>,
        active_only: bool,
    ) -> Result<Vec<Alert>> {
        let state = self.state.read();
        Ok(state
            .alerts
            .values()
            .filter(|alert| user_id.map_or(true, |id| alert.user_id == id))
            .filter(|alert| !active_only || !alert.triggered)
            .cloned()
            .collect())
    }
}
