//! The alert lifecycle engine.
//!
//! [`AlertEngine`] is the entry point of the alerting system. It persists new
//! alerts together with an outbox entry, matches them against rules, fans out
//! notifications, schedules escalation and auto-resolve deadlines, and applies
//! status changes. It holds no state of its own: every decision is written
//! back to the [`AlertStore`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::dispatcher::Dispatcher;
use crate::error::{AlertError, Result};
use crate::store::{AlertQuery, AlertStore, bounded};
use crate::types::{
    ActionLog, ActionLogStatus, Alert, AlertStatus, EscalationSchedule, NewAlert, OutboxEntry,
    StatusChange,
};

/// How status updates treat the current status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionPolicy {
    /// Any target status is accepted.
    #[default]
    Permissive,
    /// Only edges of the alert state machine are accepted.
    Strict,
}

/// How far escalation steps are followed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationMode {
    /// Only the first escalation step of a rule is ever applied.
    #[default]
    FirstStep,
    /// Each applied step schedules the next one.
    Chain,
}

/// Configuration for the alert engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Status transition policy.
    pub transition_policy: TransitionPolicy,
    /// Whether rule conditions must hold before a rule's actions run.
    pub evaluate_conditions: bool,
    /// Escalation chain policy.
    pub escalation_mode: EscalationMode,
    /// Timeout for every store call (in seconds).
    pub store_timeout_secs: u64,
    /// Timeout for one notification attempt (in seconds).
    pub dispatch_timeout_secs: u64,
    /// Maximum outbox entries processed per drain.
    pub outbox_batch_size: usize,
    /// Attempts before an outbox entry is marked dead.
    pub outbox_max_attempts: u32,
    /// Base delay before retrying a failed outbox entry (in seconds).
    pub outbox_retry_backoff_secs: u64,
    /// Actor recorded for automatic status changes.
    pub system_actor: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            transition_policy: TransitionPolicy::Permissive,
            evaluate_conditions: false,
            escalation_mode: EscalationMode::FirstStep,
            store_timeout_secs: 10,
            dispatch_timeout_secs: 10,
            outbox_batch_size: 100,
            outbox_max_attempts: 5,
            outbox_retry_backoff_secs: 30,
            system_actor: "system".to_string(),
        }
    }
}

impl EngineConfig {
    /// Returns the store timeout.
    #[must_use]
    pub const fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    /// Returns the dispatch timeout.
    #[must_use]
    pub const fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs)
    }

    /// Checks that the numeric settings are usable.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::ValidationFailed` naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        let zero = [
            ("store_timeout_secs", self.store_timeout_secs == 0),
            ("dispatch_timeout_secs", self.dispatch_timeout_secs == 0),
            ("outbox_batch_size", self.outbox_batch_size == 0),
            ("outbox_max_attempts", self.outbox_max_attempts == 0),
        ];
        if let Some((field, _)) = zero.iter().find(|(_, is_zero)| *is_zero) {
            return Err(AlertError::ValidationFailed {
                reason: format!("engine.{field} must be greater than zero"),
            });
        }
        if self.system_actor.trim().is_empty() {
            return Err(AlertError::ValidationFailed {
                reason: "engine.system_actor cannot be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// What one rule-processing pass did for an alert.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingReport {
    /// The processed alert.
    pub alert_id: String,
    /// IDs of rules whose actions ran.
    pub rules_matched: Vec<String>,
    /// Rules skipped because their conditions did not hold or failed.
    pub rules_skipped: usize,
    /// Rules whose conditions could not be evaluated.
    pub evaluation_errors: usize,
    /// Action-log rows written as sent.
    pub actions_sent: usize,
    /// Action-log rows written as failed.
    pub actions_failed: usize,
    /// Whether this pass stored a new escalation schedule.
    pub escalation_scheduled: bool,
    /// The auto-resolve deadline persisted by this pass.
    pub auto_resolve_at: Option<DateTime<Utc>>,
}

impl ProcessingReport {
    pub(crate) fn record(&mut self, log: &ActionLog) {
        match log.status {
            ActionLogStatus::Sent => self.actions_sent += 1,
            ActionLogStatus::Failed => self.actions_failed += 1,
        }
    }
}

/// The outcome of a bulk status update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkUpdateOutcome {
    /// Number of IDs requested.
    pub requested: usize,
    /// Number of rows actually updated.
    pub updated_count: usize,
    /// IDs of the updated rows.
    pub updated_ids: Vec<String>,
}

/// The alert lifecycle engine.
///
/// All collaborators are injected, so tests can substitute the store, the
/// clock and the notification channels.
pub struct AlertEngine {
    pub(crate) store: Arc<dyn AlertStore>,
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: EngineConfig,
    outbox_signal: Arc<Notify>,
}

impl std::fmt::Debug for AlertEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertEngine")
            .field("dispatcher", &self.dispatcher)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AlertEngine {
    /// Creates an engine from its collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn AlertStore>,
        dispatcher: Arc<Dispatcher>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            dispatcher,
            clock,
            config,
            outbox_signal: Arc::new(Notify::new()),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the store.
    #[must_use]
    pub fn store(&self) -> Arc<dyn AlertStore> {
        Arc::clone(&self.store)
    }

    /// Returns the clock.
    #[must_use]
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Returns the dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    /// Returns the signal raised whenever a new outbox entry is committed.
    #[must_use]
    pub fn outbox_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.outbox_signal)
    }

    pub(crate) const fn store_timeout(&self) -> Duration {
        self.config.store_timeout()
    }

    // ============ Alert Management ============

    /// Persists a new alert and queues its rule processing.
    ///
    /// The alert and its outbox entry are committed in one store call; rule
    /// processing happens later in [`AlertEngine::drain_outbox`] and never
    /// fails this call.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::ValidationFailed` for bad input, or a store error
    /// if the write is rejected.
    pub async fn create_alert(&self, new: NewAlert) -> Result<Alert> {
        new.validate()?;
        let now = self.clock.now();
        let alert = new.into_alert(now);
        let entry = OutboxEntry::for_alert(&alert.id, now);

        let alert = bounded(
            "insert_alert",
            self.store_timeout(),
            self.store.insert_alert(alert, entry),
        )
        .await
        .inspect_err(|err| warn!(error = %err, "Failed to store alert"))?;

        info!(
            alert_id = %alert.id,
            alert_type = %alert.alert_type,
            severity = %alert.severity,
            triggered_by = %alert.triggered_by,
            "Created alert"
        );
        self.outbox_signal.notify_one();
        Ok(alert)
    }

    /// Gets an alert by ID.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::AlertNotFound` if the alert doesn't exist.
    pub async fn get_alert(&self, id: &str) -> Result<Alert> {
        bounded("get_alert", self.store_timeout(), self.store.get_alert(id))
            .await?
            .ok_or_else(|| AlertError::AlertNotFound { id: id.to_string() })
    }

    /// Returns alerts matching the query, newest first.
    pub async fn list_alerts(&self, query: &AlertQuery) -> Result<Vec<Alert>> {
        bounded("find_alerts", self.store_timeout(), self.store.find_alerts(query)).await
    }

    /// Hard-deletes an alert.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::AlertNotFound` if the alert doesn't exist.
    pub async fn delete_alert(&self, id: &str) -> Result<()> {
        if bounded("delete_alert", self.store_timeout(), self.store.delete_alert(id)).await? {
            info!(alert_id = %id, "Deleted alert");
            Ok(())
        } else {
            Err(AlertError::AlertNotFound { id: id.to_string() })
        }
    }

    /// Returns the action-log rows of an alert, oldest first.
    pub async fn action_logs(&self, alert_id: &str) -> Result<Vec<ActionLog>> {
        bounded(
            "action_logs_for_alert",
            self.store_timeout(),
            self.store.action_logs_for_alert(alert_id),
        )
        .await
    }

    // ============ Rule Processing ============

    /// Applies every matching rule to an alert.
    ///
    /// Every enabled rule whose type and severity equal the alert's runs all
    /// of its actions. The first matching rule with escalation steps
    /// schedules its first step; the earliest auto-resolve deadline among
    /// matching rules is persisted.
    ///
    /// # Errors
    ///
    /// Returns a store error if rules cannot be loaded or a log, schedule or
    /// deadline cannot be written.
    pub async fn process_alert_actions(&self, alert: &Alert) -> Result<ProcessingReport> {
        let now = self.clock.now();
        let rules = bounded(
            "matching_rules",
            self.store_timeout(),
            self.store.matching_rules(alert.alert_type, alert.severity),
        )
        .await?;

        let mut report = ProcessingReport {
            alert_id: alert.id.clone(),
            ..ProcessingReport::default()
        };
        if rules.is_empty() {
            debug!(alert_id = %alert.id, "No rules match alert");
            return Ok(report);
        }

        let mut escalation_claimed = false;
        let mut deadline: Option<DateTime<Utc>> = None;

        for rule in &rules {
            if self.config.evaluate_conditions {
                match rule.conditions_hold(alert) {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!(alert_id = %alert.id, rule_id = %rule.id, "Rule conditions not met");
                        report.rules_skipped += 1;
                        continue;
                    }
                    Err(err) => {
                        warn!(
                            alert_id = %alert.id,
                            rule_id = %rule.id,
                            error = %err,
                            "Skipping rule whose conditions cannot be evaluated"
                        );
                        report.rules_skipped += 1;
                        report.evaluation_errors += 1;
                        continue;
                    }
                }
            }

            report.rules_matched.push(rule.id.clone());
            for action in &rule.actions {
                let log = self
                    .dispatcher
                    .execute_alert_action(alert, action, Some(&rule.id))
                    .await?;
                report.record(&log);
            }

            if let (false, Some(step)) = (escalation_claimed, rule.escalation_rules.first()) {
                escalation_claimed = true;
                let schedule = EscalationSchedule {
                    alert_id: alert.id.clone(),
                    rule_id: rule.id.clone(),
                    step: 0,
                    due_at: step.due_from(now),
                };
                let due_at = schedule.due_at;
                if bounded(
                    "schedule_escalation",
                    self.store_timeout(),
                    self.store.schedule_escalation(schedule),
                )
                .await?
                {
                    info!(alert_id = %alert.id, rule_id = %rule.id, due_at = %due_at, "Scheduled escalation");
                    report.escalation_scheduled = true;
                } else {
                    debug!(alert_id = %alert.id, "Escalation already scheduled");
                }
            }

            if let Some(at) = rule.auto_resolve_deadline(now) {
                deadline = Some(deadline.map_or(at, |current| current.min(at)));
            }
        }

        if let Some(at) = deadline {
            bounded(
                "set_auto_resolve_at",
                self.store_timeout(),
                self.store.set_auto_resolve_at(&alert.id, at),
            )
            .await?;
            debug!(alert_id = %alert.id, auto_resolve_at = %at, "Scheduled auto-resolve");
            report.auto_resolve_at = Some(at);
        }

        info!(
            alert_id = %alert.id,
            rules = report.rules_matched.len(),
            sent = report.actions_sent,
            failed = report.actions_failed,
            "Processed alert rules"
        );
        Ok(report)
    }

    // ============ Status Changes ============

    fn status_change(&self, status: AlertStatus, actor: &str, notes: Option<String>) -> StatusChange {
        let change = StatusChange::new(status, actor, self.clock.now()).with_notes(notes);
        match self.config.transition_policy {
            TransitionPolicy::Permissive => change,
            TransitionPolicy::Strict => change.only_from(AlertStatus::allowed_predecessors(status)),
        }
    }

    /// Sets an alert's status, stamping the matching audit fields.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::AlertNotFound` if the alert doesn't exist, or
    /// `AlertError::InvalidTransition` under the strict policy when the
    /// current status cannot move to `status`.
    pub async fn update_alert_status(
        &self,
        id: &str,
        status: AlertStatus,
        actor: &str,
        notes: Option<String>,
    ) -> Result<Alert> {
        let change = self.status_change(status, actor, notes);
        let updated = bounded(
            "apply_status_change",
            self.store_timeout(),
            self.store.apply_status_change(&[id.to_string()], &change),
        )
        .await
        .inspect_err(|err| warn!(alert_id = %id, error = %err, "Failed to update alert status"))?;

        if let Some(alert) = updated.into_iter().next() {
            info!(alert_id = %alert.id, status = %alert.status, actor = %actor, "Updated alert status");
            self.release_escalations(std::slice::from_ref(&alert)).await;
            return Ok(alert);
        }

        let current = self.get_alert(id).await?;
        Err(AlertError::InvalidTransition {
            id: id.to_string(),
            from: current.status,
            to: status,
        })
    }

    /// Sets the status of several alerts in one store call.
    ///
    /// IDs that do not exist (or, under the strict policy, cannot move to
    /// `status`) are skipped, so `updated_count <= requested`.
    pub async fn bulk_update_alerts(
        &self,
        ids: &[String],
        status: AlertStatus,
        actor: &str,
    ) -> Result<BulkUpdateOutcome> {
        let change = self.status_change(status, actor, None);
        let updated = bounded(
            "apply_status_change",
            self.store_timeout(),
            self.store.apply_status_change(ids, &change),
        )
        .await
        .inspect_err(|err| warn!(count = ids.len(), error = %err, "Bulk status update failed"))?;

        info!(
            requested = ids.len(),
            count = updated.len(),
            status = %status,
            actor = %actor,
            "Bulk updated alert status"
        );
        self.release_escalations(&updated).await;

        Ok(BulkUpdateOutcome {
            requested: ids.len(),
            updated_count: updated.len(),
            updated_ids: updated.into_iter().map(|a| a.id).collect(),
        })
    }

    /// Resolves every active alert whose auto-resolve deadline has passed.
    ///
    /// Returns the number of alerts resolved. Only alerts still active at
    /// write time are changed, so an immediate second sweep resolves none.
    pub async fn process_auto_resolve_alerts(&self) -> Result<usize> {
        let now = self.clock.now();
        let due = self.list_alerts(&AlertQuery::auto_resolve_due(now)).await?;
        if due.is_empty() {
            debug!("No alerts due for auto-resolve");
            return Ok(0);
        }

        let ids: Vec<String> = due.into_iter().map(|a| a.id).collect();
        let change = StatusChange::new(AlertStatus::Resolved, &self.config.system_actor, now)
            .only_from(&[AlertStatus::Active]);
        let resolved = bounded(
            "apply_status_change",
            self.store_timeout(),
            self.store.apply_status_change(&ids, &change),
        )
        .await?;

        info!(count = resolved.len(), "Auto-resolved expired alerts");
        self.release_escalations(&resolved).await;
        Ok(resolved.len())
    }

    /// Drops escalation schedules of alerts that just closed.
    async fn release_escalations(&self, alerts: &[Alert]) {
        for alert in alerts.iter().filter(|a| a.status.is_closed()) {
            if let Err(err) = bounded(
                "cancel_escalation",
                self.store_timeout(),
                self.store.cancel_escalation(&alert.id),
            )
            .await
            {
                warn!(alert_id = %alert.id, error = %err, "Failed to cancel escalation");
            }
        }
    }
}
