//! The persistence seam.
//!
//! [`AlertStore`] is the boundary to the relational store that owns alerts,
//! rules, action logs, the rule-processing outbox and escalation schedules.
//! Every method is a single round trip; the engine never holds a lock or a
//! transaction across calls.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AlertError, Result};
use crate::rule::AlertRule;
use crate::types::{
    ActionLog, Alert, AlertSeverity, AlertStatus, AlertType, EscalationSchedule, OutboxEntry,
    StatusChange,
};

/// Async access to the alert collections.
#[async_trait]
pub trait AlertStore: Send + Sync {
    // ============ Alerts ============

    /// Inserts an alert and its outbox entry atomically.
    async fn insert_alert(&self, alert: Alert, outbox: OutboxEntry) -> Result<Alert>;

    /// Fetches an alert by ID.
    async fn get_alert(&self, id: &str) -> Result<Option<Alert>>;

    /// Returns alerts matching the query, newest first.
    async fn find_alerts(&self, query: &AlertQuery) -> Result<Vec<Alert>>;

    /// Applies a status change to every listed alert the change permits.
    ///
    /// Unknown IDs and alerts whose current status is not in
    /// `change.allowed_from` are skipped. Returns the updated rows.
    async fn apply_status_change(
        &self,
        ids: &[String],
        change: &StatusChange,
    ) -> Result<Vec<Alert>>;

    /// Sets the auto-resolve deadline. Returns `None` if the alert is missing.
    async fn set_auto_resolve_at(&self, id: &str, at: DateTime<Utc>) -> Result<Option<Alert>>;

    /// Increments the escalation level of an active alert and optionally
    /// changes its severity. Returns `None` if the alert is missing or not active.
    async fn raise_escalation(
        &self,
        id: &str,
        severity: Option<AlertSeverity>,
    ) -> Result<Option<Alert>>;

    /// Hard-deletes an alert. Returns false if it did not exist.
    async fn delete_alert(&self, id: &str) -> Result<bool>;

    // ============ Rules ============

    /// Inserts a rule.
    async fn insert_rule(&self, rule: AlertRule) -> Result<AlertRule>;

    /// Fetches a rule by ID.
    async fn get_rule(&self, id: &str) -> Result<Option<AlertRule>>;

    /// Replaces a stored rule. Returns `None` if it does not exist.
    async fn update_rule(&self, rule: AlertRule) -> Result<Option<AlertRule>>;

    /// Hard-deletes a rule. Returns false if it did not exist.
    async fn delete_rule(&self, id: &str) -> Result<bool>;

    /// Returns every rule, newest first.
    async fn list_rules(&self) -> Result<Vec<AlertRule>>;

    /// Returns the enabled rules for exactly this type and severity.
    async fn matching_rules(
        &self,
        alert_type: AlertType,
        severity: AlertSeverity,
    ) -> Result<Vec<AlertRule>>;

    // ============ Action logs ============

    /// Appends an action-log row.
    async fn insert_action_log(&self, log: ActionLog) -> Result<()>;

    /// Returns the action-log rows of an alert, oldest first.
    async fn action_logs_for_alert(&self, alert_id: &str) -> Result<Vec<ActionLog>>;

    // ============ Outbox ============

    /// Returns up to `limit` pending entries available at `now`, oldest first.
    async fn pending_outbox(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<OutboxEntry>>;

    /// Marks an entry done. A store may drop done entries instead of
    /// keeping them.
    async fn complete_outbox(&self, id: &str) -> Result<()>;

    /// Records a failed attempt and defers the entry until `available_at`.
    async fn retry_outbox(&self, id: &str, error: &str, available_at: DateTime<Utc>)
    -> Result<()>;

    /// Records a final failed attempt and marks the entry dead.
    async fn bury_outbox(&self, id: &str, error: &str) -> Result<()>;

    // ============ Escalations ============

    /// Stores a schedule unless the alert already has one. Returns true if stored.
    async fn schedule_escalation(&self, schedule: EscalationSchedule) -> Result<bool>;

    /// Replaces the alert's schedule.
    async fn reschedule_escalation(&self, schedule: EscalationSchedule) -> Result<()>;

    /// Returns schedules due at `now`, earliest first.
    async fn due_escalations(&self, now: DateTime<Utc>) -> Result<Vec<EscalationSchedule>>;

    /// Removes the alert's schedule, if any.
    async fn cancel_escalation(&self, alert_id: &str) -> Result<()>;
}

/// Awaits a store call, failing with `StoreTimeout` once `timeout` elapses.
pub async fn bounded<T, F>(operation: &'static str, timeout: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(timeout, call)
        .await
        .unwrap_or_else(|_| {
            Err(AlertError::StoreTimeout {
                operation,
                secs: timeout.as_secs(),
            })
        })
}

/// Filter for [`AlertStore::find_alerts`].
///
/// Empty sets match everything. `search` is a case-insensitive substring
/// match across the title, message and string metadata values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertQuery {
    /// Status membership.
    #[serde(default)]
    pub statuses: Vec<AlertStatus>,
    /// Type membership.
    #[serde(default)]
    pub types: Vec<AlertType>,
    /// Severity membership.
    #[serde(default)]
    pub severities: Vec<AlertSeverity>,
    /// District equality.
    #[serde(default)]
    pub district: Option<String>,
    /// Device equality.
    #[serde(default)]
    pub device_id: Option<String>,
    /// Only alerts with `auto_resolve_at <= this`.
    #[serde(default)]
    pub auto_resolve_due_by: Option<DateTime<Utc>>,
    /// Pattern across text fields.
    #[serde(default)]
    pub search: Option<String>,
    /// Maximum rows to return.
    #[serde(default)]
    pub limit: Option<usize>,
    /// Rows to skip.
    #[serde(default)]
    pub offset: usize,
}

impl AlertQuery {
    /// Creates a query that matches every alert.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Query for active alerts whose auto-resolve deadline has passed.
    #[must_use]
    pub fn auto_resolve_due(now: DateTime<Utc>) -> Self {
        Self {
            statuses: vec![AlertStatus::Active],
            auto_resolve_due_by: Some(now),
            ..Self::default()
        }
    }

    /// Adds a status to match.
    #[must_use]
    pub fn with_status(mut self, status: AlertStatus) -> Self {
        self.statuses.push(status);
        self
    }

    /// Adds a type to match.
    #[must_use]
    pub fn with_type(mut self, alert_type: AlertType) -> Self {
        self.types.push(alert_type);
        self
    }

    /// Adds a severity to match.
    #[must_use]
    pub fn with_severity(mut self, severity: AlertSeverity) -> Self {
        self.severities.push(severity);
        self
    }

    /// Restricts to one district.
    #[must_use]
    pub fn in_district(mut self, district: impl Into<String>) -> Self {
        self.district = Some(district.into());
        self
    }

    /// Restricts to one device.
    #[must_use]
    pub fn for_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    /// Sets the search pattern.
    #[must_use]
    pub fn search(mut self, pattern: impl Into<String>) -> Self {
        self.search = Some(pattern.into());
        self
    }

    /// Sets limit and offset.
    #[must_use]
    pub const fn page(mut self, limit: usize, offset: usize) -> Self {
        self.limit = Some(limit);
        self.offset = offset;
        self
    }

    /// Returns true if the alert passes every filter. Paging is not applied.
    #[must_use]
    pub fn matches(&self, alert: &Alert) -> bool {
        if !self.statuses.is_empty() && !self.statuses.contains(&alert.status) {
            return false;
        }
        if !self.types.is_empty() && !self.types.contains(&alert.alert_type) {
            return false;
        }
        if !self.severities.is_empty() && !self.severities.contains(&alert.severity) {
            return false;
        }
        if let Some(district) = &self.district {
            if alert.district() != Some(district.as_str()) {
                return false;
            }
        }
        if let Some(device_id) = &self.device_id {
            if alert.device_id.as_deref() != Some(device_id.as_str()) {
                return false;
            }
        }
        if let Some(due_by) = self.auto_resolve_due_by {
            if !alert.auto_resolve_at.is_some_and(|at| at <= due_by) {
                return false;
            }
        }
        if let Some(pattern) = &self.search {
            return text_matches(alert, &pattern.to_lowercase());
        }
        true
    }
}

fn text_matches(alert: &Alert, needle: &str) -> bool {
    alert.title.to_lowercase().contains(needle)
        || alert.message.to_lowercase().contains(needle)
        || alert.metadata.values().any(|value| match value {
            Value::String(s) => s.to_lowercase().contains(needle),
            _ => false,
        })
}
