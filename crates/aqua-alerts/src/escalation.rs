//! Timed escalation of unresolved alerts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::engine::{AlertEngine, EscalationMode};
use crate::error::Result;
use crate::store::bounded;
use crate::types::{ActionLogStatus, EscalationSchedule};

/// The result of one escalation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationReport {
    /// Schedules that were due.
    pub due: usize,
    /// Alerts escalated.
    pub escalated: usize,
    /// Stale schedules removed.
    pub cancelled: usize,
    /// Schedules that hit a store error.
    pub failed: usize,
    /// Notifications logged as sent.
    pub notifications_sent: usize,
    /// Notifications logged as failed.
    pub notifications_failed: usize,
}

enum Outcome {
    Escalated { sent: usize, failed: usize },
    Cancelled,
}

impl AlertEngine {
    /// Applies every escalation step whose time has come.
    ///
    /// # Errors
    ///
    /// Returns a store error if the due schedules cannot be loaded. Errors
    /// on one schedule are logged. A schedule that could not be advanced
    /// stays due for the next pass; once advanced, its step is never
    /// applied again.
    pub async fn process_due_escalations(&self) -> Result<EscalationReport> {
        let now = self.clock.now();
        let due = bounded(
            "due_escalations",
            self.store_timeout(),
            self.store.due_escalations(now),
        )
        .await?;

        let mut report = EscalationReport {
            due: due.len(),
            ..EscalationReport::default()
        };

        for schedule in due {
            match self.escalate(&schedule, now).await {
                Ok(Outcome::Escalated { sent, failed }) => {
                    report.escalated += 1;
                    report.notifications_sent += sent;
                    report.notifications_failed += failed;
                }
                Ok(Outcome::Cancelled) => report.cancelled += 1,
                Err(err) => {
                    warn!(
                        alert_id = %schedule.alert_id,
                        rule_id = %schedule.rule_id,
                        error = %err,
                        "Escalation failed"
                    );
                    report.failed += 1;
                }
            }
        }

        if report.due > 0 {
            info!(
                due = report.due,
                escalated = report.escalated,
                cancelled = report.cancelled,
                "Processed due escalations"
            );
        }
        Ok(report)
    }

    async fn escalate(&self, schedule: &EscalationSchedule, now: DateTime<Utc>) -> Result<Outcome> {
        let timeout = self.store_timeout();

        let alert = bounded("get_alert", timeout, self.store.get_alert(&schedule.alert_id)).await?;
        let Some(alert) = alert.filter(|a| a.is_active()) else {
            return self.cancel(schedule, "alert is no longer active").await;
        };
        let Some(rule) = bounded("get_rule", timeout, self.store.get_rule(&schedule.rule_id)).await?
        else {
            return self.cancel(schedule, "rule was deleted").await;
        };
        let Some(step) = rule.escalation_rules.get(schedule.step) else {
            return self.cancel(schedule, "step no longer exists").await;
        };

        // Advance the schedule before raising: a step is applied at most once.
        let next = schedule.step + 1;
        match (self.config.escalation_mode, rule.escalation_rules.get(next)) {
            (EscalationMode::Chain, Some(next_step)) => {
                let follow_up = EscalationSchedule {
                    alert_id: alert.id.clone(),
                    rule_id: rule.id.clone(),
                    step: next,
                    due_at: next_step.due_from(now),
                };
                bounded(
                    "reschedule_escalation",
                    timeout,
                    self.store.reschedule_escalation(follow_up),
                )
                .await?;
            }
            _ => {
                bounded(
                    "cancel_escalation",
                    timeout,
                    self.store.cancel_escalation(&alert.id),
                )
                .await?;
            }
        }

        let severity = step.severity_increase.then(|| alert.severity.raised());
        let Some(escalated) = bounded(
            "raise_escalation",
            timeout,
            self.store.raise_escalation(&alert.id, severity),
        )
        .await?
        else {
            return self.cancel(schedule, "alert closed during escalation").await;
        };

        info!(
            alert_id = %escalated.id,
            rule_id = %rule.id,
            level = escalated.escalation_level,
            severity = %escalated.severity,
            "Escalated alert"
        );

        let (mut sent, mut failed) = (0, 0);
        for action in &rule.actions {
            let action = action.with_additional_recipients(&step.additional_recipients);
            match self
                .dispatcher
                .execute_alert_action(&escalated, &action, Some(&rule.id))
                .await
            {
                Ok(log) if log.status == ActionLogStatus::Sent => sent += 1,
                Ok(_) => failed += 1,
                Err(err) => {
                    warn!(alert_id = %escalated.id, error = %err, "Failed to record escalation notification");
                    failed += 1;
                }
            }
        }

        Ok(Outcome::Escalated { sent, failed })
    }

    async fn cancel(&self, schedule: &EscalationSchedule, why: &str) -> Result<Outcome> {
        bounded(
            "cancel_escalation",
            self.store_timeout(),
            self.store.cancel_escalation(&schedule.alert_id),
        )
        .await?;
        debug!(alert_id = %schedule.alert_id, reason = why, "Dropped stale escalation");
        Ok(Outcome::Cancelled)
    }
}
