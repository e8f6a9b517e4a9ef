//! Rule processing driven by the outbox.
//!
//! `create_alert` commits an outbox entry with every alert. Draining the
//! outbox runs [`AlertEngine::process_alert_actions`] for each entry and
//! retries failures with exponential backoff, so a crash between the alert
//! write and its notifications only delays them.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::engine::AlertEngine;
use crate::error::{AlertError, Result};
use crate::store::bounded;
use crate::types::OutboxEntry;

/// Upper bound on a single retry delay.
const MAX_BACKOFF_SECS: u64 = 86_400;

/// The result of one outbox drain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxReport {
    /// Entries picked up.
    pub processed: usize,
    /// Entries whose rules ran successfully.
    pub completed: usize,
    /// Entries whose alert no longer exists.
    pub skipped: usize,
    /// Entries deferred for another attempt.
    pub retried: usize,
    /// Entries that exhausted their attempts.
    pub dead: usize,
}

/// Delay before attempt `attempt + 1`, where `attempt` counts failures so far.
#[must_use]
pub fn retry_delay(base_secs: u64, attempt: u32) -> ChronoDuration {
    let exponent = attempt.saturating_sub(1).min(32);
    let secs = base_secs
        .saturating_mul(1_u64 << exponent)
        .min(MAX_BACKOFF_SECS);
    ChronoDuration::seconds(secs as i64)
}

impl AlertEngine {
    /// Processes pending outbox entries whose retry time has come.
    ///
    /// # Errors
    ///
    /// Returns a store error if the outbox cannot be read or updated. A
    /// failure while processing one entry is recorded on that entry instead.
    pub async fn drain_outbox(&self) -> Result<OutboxReport> {
        let now = self.clock.now();
        let entries = bounded(
            "pending_outbox",
            self.store_timeout(),
            self.store.pending_outbox(now, self.config.outbox_batch_size),
        )
        .await?;

        let mut report = OutboxReport::default();
        if entries.is_empty() {
            return Ok(report);
        }

        for entry in entries {
            report.processed += 1;
            match self.process_entry(&entry).await {
                Ok(found) => {
                    bounded(
                        "complete_outbox",
                        self.store_timeout(),
                        self.store.complete_outbox(&entry.id),
                    )
                    .await?;
                    if found {
                        report.completed += 1;
                    } else {
                        debug!(alert_id = %entry.alert_id, "Alert gone, dropping outbox entry");
                        report.skipped += 1;
                    }
                }
                Err(err) => self.fail_entry(&entry, &err, now, &mut report).await?,
            }
        }

        info!(
            processed = report.processed,
            completed = report.completed,
            retried = report.retried,
            dead = report.dead,
            "Drained alert outbox"
        );
        Ok(report)
    }

    async fn process_entry(&self, entry: &OutboxEntry) -> Result<bool> {
        let alert = bounded(
            "get_alert",
            self.store_timeout(),
            self.store.get_alert(&entry.alert_id),
        )
        .await?;
        let Some(alert) = alert else {
            return Ok(false);
        };
        self.process_alert_actions(&alert).await?;
        Ok(true)
    }

    async fn fail_entry(
        &self,
        entry: &OutboxEntry,
        err: &AlertError,
        now: DateTime<Utc>,
        report: &mut OutboxReport,
    ) -> Result<()> {
        let attempts = entry.attempts + 1;
        let reason = err.to_string();

        if attempts >= self.config.outbox_max_attempts {
            warn!(
                alert_id = %entry.alert_id,
                attempts,
                error = %reason,
                "Giving up on alert rule processing"
            );
            bounded(
                "bury_outbox",
                self.store_timeout(),
                self.store.bury_outbox(&entry.id, &reason),
            )
            .await?;
            report.dead += 1;
        } else {
            let available_at = now + retry_delay(self.config.outbox_retry_backoff_secs, attempts);
            warn!(
                alert_id = %entry.alert_id,
                attempts,
                retry_at = %available_at,
                error = %reason,
                "Alert rule processing failed, will retry"
            );
            bounded(
                "retry_outbox",
                self.store_timeout(),
                self.store.retry_outbox(&entry.id, &reason, available_at),
            )
            .await?;
            report.retried += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;

    use crate::clock::{Clock, ManualClock};
    use crate::dispatcher::Dispatcher;
    use crate::engine::EngineConfig;
    use crate::engine::tests::{add_rule, harness, water_high};
    use crate::memory::MemoryStore;
    use crate::rule::{AlertRule, NewAlertRule, RuleAction};
    use crate::store::{AlertQuery, AlertStore};
    use crate::types::{
        ActionLog, Alert, AlertSeverity, AlertType, EscalationSchedule, OutboxStatus, StatusChange,
    };

    fn email_rule(minutes: u32) -> NewAlertRule {
        NewAlertRule::builder("Turbidity", AlertType::WaterQuality, AlertSeverity::High)
            .action(RuleAction::email(vec!["x@gov.in".to_string()]))
            .auto_resolve_after_minutes(minutes)
            .build()
            .unwrap()
    }

    /// Delegates to a [`MemoryStore`] but fails every action-log write.
    struct LogRejectingStore {
        inner: MemoryStore,
    }

    #[async_trait]
    impl AlertStore for LogRejectingStore {
        async fn insert_alert(&self, alert: Alert, outbox: OutboxEntry) -> Result<Alert> {
            self.inner.insert_alert(alert, outbox).await
        }
        async fn get_alert(&self, id: &str) -> Result<Option<Alert>> {
            self.inner.get_alert(id).await
        }
        async fn find_alerts(&self, query: &AlertQuery) -> Result<Vec<Alert>> {
            self.inner.find_alerts(query).await
        }
        async fn apply_status_change(
            &self,
            ids: &[String],
            change: &StatusChange,
        ) -> Result<Vec<Alert>> {
            self.inner.apply_status_change(ids, change).await
        }
        async fn set_auto_resolve_at(&self, id: &str, at: DateTime<Utc>) -> Result<Option<Alert>> {
            self.inner.set_auto_resolve_at(id, at).await
        }
        async fn raise_escalation(
            &self,
            id: &str,
            severity: Option<AlertSeverity>,
        ) -> Result<Option<Alert>> {
            self.inner.raise_escalation(id, severity).await
        }
        async fn delete_alert(&self, id: &str) -> Result<bool> {
            self.inner.delete_alert(id).await
        }
        async fn insert_rule(&self, rule: AlertRule) -> Result<AlertRule> {
            self.inner.insert_rule(rule).await
        }
        async fn get_rule(&self, id: &str) -> Result<Option<AlertRule>> {
            self.inner.get_rule(id).await
        }
        async fn update_rule(&self, rule: AlertRule) -> Result<Option<AlertRule>> {
            self.inner.update_rule(rule).await
        }
        async fn delete_rule(&self, id: &str) -> Result<bool> {
            self.inner.delete_rule(id).await
        }
        async fn list_rules(&self) -> Result<Vec<AlertRule>> {
            self.inner.list_rules().await
        }
        async fn matching_rules(
            &self,
            alert_type: AlertType,
            severity: AlertSeverity,
        ) -> Result<Vec<AlertRule>> {
            self.inner.matching_rules(alert_type, severity).await
        }
        async fn insert_action_log(&self, _log: ActionLog) -> Result<()> {
            Err(AlertError::StoreUnavailable {
                reason: "alert_action_logs is read-only".to_string(),
            })
        }
        async fn action_logs_for_alert(&self, alert_id: &str) -> Result<Vec<ActionLog>> {
            self.inner.action_logs_for_alert(alert_id).await
        }
        async fn pending_outbox(
            &self,
            now: DateTime<Utc>,
            limit: usize,
        ) -> Result<Vec<OutboxEntry>> {
            self.inner.pending_outbox(now, limit).await
        }
        async fn complete_outbox(&self, id: &str) -> Result<()> {
            self.inner.complete_outbox(id).await
        }
        async fn retry_outbox(
            &self,
            id: &str,
            error: &str,
            available_at: DateTime<Utc>,
        ) -> Result<()> {
            self.inner.retry_outbox(id, error, available_at).await
        }
        async fn bury_outbox(&self, id: &str, error: &str) -> Result<()> {
            self.inner.bury_outbox(id, error).await
        }
        async fn schedule_escalation(&self, schedule: EscalationSchedule) -> Result<bool> {
            self.inner.schedule_escalation(schedule).await
        }
        async fn reschedule_escalation(&self, schedule: EscalationSchedule) -> Result<()> {
            self.inner.reschedule_escalation(schedule).await
        }
        async fn due_escalations(&self, now: DateTime<Utc>) -> Result<Vec<EscalationSchedule>> {
            self.inner.due_escalations(now).await
        }
        async fn cancel_escalation(&self, alert_id: &str) -> Result<()> {
            self.inner.cancel_escalation(alert_id).await
        }
    }

    fn rejecting_engine(config: EngineConfig) -> (Arc<LogRejectingStore>, Arc<ManualClock>, AlertEngine) {
        let store = Arc::new(LogRejectingStore {
            inner: MemoryStore::new(),
        });
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let dispatcher = Arc::new(Dispatcher::with_stub_channels(store.clone(), clock.clone()));
        let engine = AlertEngine::new(store.clone(), dispatcher, clock.clone(), config);
        (store, clock, engine)
    }

    #[test]
    fn retry_delay_doubles_and_caps() {
        assert_eq!(retry_delay(30, 1), ChronoDuration::seconds(30));
        assert_eq!(retry_delay(30, 2), ChronoDuration::seconds(60));
        assert_eq!(retry_delay(30, 4), ChronoDuration::seconds(240));
        assert_eq!(retry_delay(30, 40), ChronoDuration::seconds(86_400));
        assert_eq!(retry_delay(u64::MAX, 3), ChronoDuration::seconds(86_400));
    }

    #[tokio::test]
    async fn drain_processes_rules_and_completes_entries() {
        let h = harness();
        add_rule(&h, email_rule(60)).await;
        let alert = h.engine.create_alert(water_high()).await.unwrap();

        let report = h.engine.drain_outbox().await.unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.completed, 1);

        assert_eq!(h.engine.action_logs(&alert.id).await.unwrap().len(), 1);
        assert!(h.store.outbox_entries().is_empty());
        assert!(h.engine.get_alert(&alert.id).await.unwrap().auto_resolve_at.is_some());

        let again = h.engine.drain_outbox().await.unwrap();
        assert_eq!(again, OutboxReport::default());
    }

    #[tokio::test]
    async fn deleted_alert_entry_is_dropped() {
        let h = harness();
        let alert = h.engine.create_alert(water_high()).await.unwrap();
        h.engine.delete_alert(&alert.id).await.unwrap();

        let report = h.engine.drain_outbox().await.unwrap();
        assert_eq!(report.skipped, 1);
        assert!(h.store.outbox_entries().is_empty());
    }

    #[tokio::test]
    async fn failing_processing_is_retried_with_backoff() {
        let (store, clock, engine) = rejecting_engine(EngineConfig::default());
        store.insert_rule(email_rule(60).into_rule("admin", clock.now())).await.unwrap();
        engine.create_alert(water_high()).await.unwrap();

        let report = engine.drain_outbox().await.unwrap();
        assert_eq!(report.retried, 1);

        let entry = store.inner.outbox_entries()[0].clone();
        assert_eq!(entry.attempts, 1);
        assert_eq!(entry.status, OutboxStatus::Pending);
        assert_eq!(entry.available_at, clock.now() + ChronoDuration::seconds(30));
        assert!(entry.last_error.unwrap_or_default().contains("read-only"));

        assert_eq!(engine.drain_outbox().await.unwrap().processed, 0);
    }

    #[tokio::test]
    async fn entry_dies_after_max_attempts() {
        let config = EngineConfig {
            outbox_max_attempts: 2,
            outbox_retry_backoff_secs: 1,
            ..EngineConfig::default()
        };
        let (store, clock, engine) = rejecting_engine(config);
        store.insert_rule(email_rule(60).into_rule("admin", clock.now())).await.unwrap();
        engine.create_alert(water_high()).await.unwrap();

        assert_eq!(engine.drain_outbox().await.unwrap().retried, 1);
        clock.advance(ChronoDuration::seconds(5));
        assert_eq!(engine.drain_outbox().await.unwrap().dead, 1);

        let entry = &store.inner.outbox_entries()[0];
        assert_eq!(entry.status, OutboxStatus::Dead);
        assert_eq!(entry.attempts, 2);

        clock.advance(ChronoDuration::hours(1));
        assert_eq!(engine.drain_outbox().await.unwrap().processed, 0);
    }

    #[tokio::test]
    async fn alert_stays_durable_when_processing_fails() {
        let (store, clock, engine) = rejecting_engine(EngineConfig::default());
        store.insert_rule(email_rule(60).into_rule("admin", clock.now())).await.unwrap();
        let alert = engine.create_alert(water_high()).await.unwrap();

        engine.drain_outbox().await.unwrap();
        assert_eq!(engine.get_alert(&alert.id).await.unwrap().id, alert.id);
    }

    #[tokio::test]
    async fn batch_size_limits_one_drain() {
        let h = crate::engine::tests::harness_with(EngineConfig {
            outbox_batch_size: 2,
            ..EngineConfig::default()
        });
        for _ in 0..3 {
            h.engine.create_alert(water_high()).await.unwrap();
        }
        assert_eq!(h.engine.drain_outbox().await.unwrap().processed, 2);
        assert_eq!(h.engine.drain_outbox().await.unwrap().processed, 1);
    }
}
