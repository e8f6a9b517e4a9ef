//! In-process [`AlertStore`] backed by a single lock.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use crate::error::{AlertError, Result};
use crate::rule::AlertRule;
use crate::store::{AlertQuery, AlertStore};
use crate::types::{
    ActionLog, Alert, AlertSeverity, AlertType, EscalationSchedule, OutboxEntry, OutboxStatus,
    StatusChange,
};

#[derive(Debug, Default)]
struct Inner {
    alerts: Vec<Alert>,
    rules: Vec<AlertRule>,
    action_logs: Vec<ActionLog>,
    outbox: Vec<OutboxEntry>,
    escalations: HashMap<String, EscalationSchedule>,
}

impl Inner {
    fn alert_mut(&mut self, id: &str) -> Option<&mut Alert> {
        self.alerts.iter_mut().find(|a| a.id == id)
    }

    fn outbox_mut(&mut self, id: &str) -> Option<&mut OutboxEntry> {
        self.outbox.iter_mut().find(|e| e.id == id)
    }
}

/// An in-memory store.
///
/// Each call takes the lock once, so every method is atomic with respect to
/// the others. [`MemoryStore::set_available`] simulates an outage.
#[derive(Debug)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    available: AtomicBool,
    failing: RwLock<HashSet<&'static str>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty, available store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            available: AtomicBool::new(true),
            failing: RwLock::new(HashSet::new()),
        }
    }

    /// Makes every subsequent call succeed (`true`) or fail with
    /// `StoreUnavailable` (`false`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Makes calls to one [`AlertStore`] method, named as in the trait, fail
    /// with `StoreUnavailable` (`true`) or succeed again (`false`).
    pub fn fail_operation(&self, operation: &'static str, failing: bool) {
        let mut set = self.failing.write();
        if failing {
            set.insert(operation);
        } else {
            set.remove(operation);
        }
    }

    /// Returns a snapshot of every outbox entry.
    #[must_use]
    pub fn outbox_entries(&self) -> Vec<OutboxEntry> {
        self.inner.read().outbox.clone()
    }

    /// Returns the escalation schedule of an alert, if any.
    #[must_use]
    pub fn escalation_for(&self, alert_id: &str) -> Option<EscalationSchedule> {
        self.inner.read().escalations.get(alert_id).cloned()
    }

    /// Returns the number of stored alerts.
    #[must_use]
    pub fn alert_count(&self) -> usize {
        self.inner.read().alerts.len()
    }

    fn check(&self, operation: &'static str) -> Result<()> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(AlertError::StoreUnavailable {
                reason: "memory store is offline".to_string(),
            });
        }
        if self.failing.read().contains(operation) {
            return Err(AlertError::StoreUnavailable {
                reason: format!("{operation} is failing"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn insert_alert(&self, alert: Alert, outbox: OutboxEntry) -> Result<Alert> {
        self.check("insert_alert")?;
        let mut inner = self.inner.write();
        if inner.alerts.iter().any(|a| a.id == alert.id) {
            return Err(AlertError::StoreUnavailable {
                reason: format!("duplicate alert id {}", alert.id),
            });
        }
        inner.alerts.push(alert.clone());
        inner.outbox.push(outbox);
        debug!(alert_id = %alert.id, "Stored alert with outbox entry");
        Ok(alert)
    }

    async fn get_alert(&self, id: &str) -> Result<Option<Alert>> {
        self.check("get_alert")?;
        Ok(self.inner.read().alerts.iter().find(|a| a.id == id).cloned())
    }

    async fn find_alerts(&self, query: &AlertQuery) -> Result<Vec<Alert>> {
        self.check("find_alerts")?;
        let inner = self.inner.read();
        let mut matched: Vec<Alert> = inner
            .alerts
            .iter()
            .rev()
            .filter(|a| query.matches(a))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matched
            .into_iter()
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .collect())
    }

    async fn apply_status_change(
        &self,
        ids: &[String],
        change: &StatusChange,
    ) -> Result<Vec<Alert>> {
        self.check("apply_status_change")?;
        let mut inner = self.inner.write();
        let mut updated = Vec::new();
        for alert in &mut inner.alerts {
            if ids.contains(&alert.id) && change.permits(alert.status) {
                alert.apply_status(change);
                updated.push(alert.clone());
            }
        }
        Ok(updated)
    }

    async fn set_auto_resolve_at(&self, id: &str, at: DateTime<Utc>) -> Result<Option<Alert>> {
        self.check("set_auto_resolve_at")?;
        let mut inner = self.inner.write();
        Ok(inner.alert_mut(id).map(|alert| {
            alert.auto_resolve_at = Some(at);
            alert.clone()
        }))
    }

    async fn raise_escalation(
        &self,
        id: &str,
        severity: Option<AlertSeverity>,
    ) -> Result<Option<Alert>> {
        self.check("raise_escalation")?;
        let mut inner = self.inner.write();
        Ok(inner
            .alert_mut(id)
            .filter(|alert| alert.is_active())
            .map(|alert| {
                alert.escalation_level += 1;
                if let Some(severity) = severity {
                    alert.severity = severity;
                }
                alert.clone()
            }))
    }

    async fn delete_alert(&self, id: &str) -> Result<bool> {
        self.check("delete_alert")?;
        let mut inner = self.inner.write();
        let before = inner.alerts.len();
        inner.alerts.retain(|a| a.id != id);
        inner.escalations.remove(id);
        Ok(inner.alerts.len() < before)
    }

    async fn insert_rule(&self, rule: AlertRule) -> Result<AlertRule> {
        self.check("insert_rule")?;
        self.inner.write().rules.push(rule.clone());
        Ok(rule)
    }

    async fn get_rule(&self, id: &str) -> Result<Option<AlertRule>> {
        self.check("get_rule")?;
        Ok(self.inner.read().rules.iter().find(|r| r.id == id).cloned())
    }

    async fn update_rule(&self, rule: AlertRule) -> Result<Option<AlertRule>> {
        self.check("update_rule")?;
        let mut inner = self.inner.write();
        Ok(inner
            .rules
            .iter_mut()
            .find(|r| r.id == rule.id)
            .map(|stored| {
                *stored = rule;
                stored.clone()
            }))
    }

    async fn delete_rule(&self, id: &str) -> Result<bool> {
        self.check("delete_rule")?;
        let mut inner = self.inner.write();
        let before = inner.rules.len();
        inner.rules.retain(|r| r.id != id);
        Ok(inner.rules.len() < before)
    }

    async fn list_rules(&self) -> Result<Vec<AlertRule>> {
        self.check("list_rules")?;
        let mut rules: Vec<AlertRule> = self.inner.read().rules.iter().rev().cloned().collect();
        rules.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rules)
    }

    async fn matching_rules(
        &self,
        alert_type: AlertType,
        severity: AlertSeverity,
    ) -> Result<Vec<AlertRule>> {
        self.check("matching_rules")?;
        Ok(self
            .inner
            .read()
            .rules
            .iter()
            .filter(|r| r.enabled && r.alert_type == alert_type && r.severity == severity)
            .cloned()
            .collect())
    }

    async fn insert_action_log(&self, log: ActionLog) -> Result<()> {
        self.check("insert_action_log")?;
        self.inner.write().action_logs.push(log);
        Ok(())
    }

    async fn action_logs_for_alert(&self, alert_id: &str) -> Result<Vec<ActionLog>> {
        self.check("action_logs_for_alert")?;
        Ok(self
            .inner
            .read()
            .action_logs
            .iter()
            .filter(|log| log.alert_id == alert_id)
            .cloned()
            .collect())
    }

    async fn pending_outbox(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<OutboxEntry>> {
        self.check("pending_outbox")?;
        let mut pending: Vec<OutboxEntry> = self
            .inner
            .read()
            .outbox
            .iter()
            .filter(|e| e.status == OutboxStatus::Pending && e.available_at <= now)
            .cloned()
            .collect();
        pending.sort_by_key(|e| e.available_at);
        pending.truncate(limit);
        Ok(pending)
    }

    async fn complete_outbox(&self, id: &str) -> Result<()> {
        self.check("complete_outbox")?;
        // Done entries are dropped so the outbox only holds pending and dead work.
        self.inner.write().outbox.retain(|e| e.id != id);
        Ok(())
    }

    async fn retry_outbox(
        &self,
        id: &str,
        error: &str,
        available_at: DateTime<Utc>,
    ) -> Result<()> {
        self.check("retry_outbox")?;
        if let Some(entry) = self.inner.write().outbox_mut(id) {
            entry.attempts += 1;
            entry.last_error = Some(error.to_string());
            entry.available_at = available_at;
        }
        Ok(())
    }

    async fn bury_outbox(&self, id: &str, error: &str) -> Result<()> {
        self.check("bury_outbox")?;
        if let Some(entry) = self.inner.write().outbox_mut(id) {
            entry.attempts += 1;
            entry.last_error = Some(error.to_string());
            entry.status = OutboxStatus::Dead;
        }
        Ok(())
    }

    async fn schedule_escalation(&self, schedule: EscalationSchedule) -> Result<bool> {
        self.check("schedule_escalation")?;
        let mut inner = self.inner.write();
        if inner.escalations.contains_key(&schedule.alert_id) {
            return Ok(false);
        }
        inner.escalations.insert(schedule.alert_id.clone(), schedule);
        Ok(true)
    }

    async fn reschedule_escalation(&self, schedule: EscalationSchedule) -> Result<()> {
        self.check("reschedule_escalation")?;
        self.inner
            .write()
            .escalations
            .insert(schedule.alert_id.clone(), schedule);
        Ok(())
    }

    async fn due_escalations(&self, now: DateTime<Utc>) -> Result<Vec<EscalationSchedule>> {
        self.check("due_escalations")?;
        let mut due: Vec<EscalationSchedule> = self
            .inner
            .read()
            .escalations
            .values()
            .filter(|s| s.due_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|s| s.due_at);
        Ok(due)
    }

    async fn cancel_escalation(&self, alert_id: &str) -> Result<()> {
        self.check("cancel_escalation")?;
        self.inner.write().escalations.remove(alert_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::NewAlertRule;
    use crate::types::{AlertStatus, NewAlert};
    use chrono::Duration as ChronoDuration;

    fn new_alert(title: &str, at: DateTime<Utc>) -> Alert {
        NewAlert::new(AlertType::DeviceOffline, AlertSeverity::Critical, title, "no heartbeat")
            .into_alert(at)
    }

    async fn seeded(store: &MemoryStore, titles: &[&str]) -> Vec<Alert> {
        let start = Utc::now();
        let mut out = Vec::new();
        for (i, title) in titles.iter().enumerate() {
            let at = start + ChronoDuration::seconds(i as i64);
            let alert = new_alert(title, at);
            let stored = store
                .insert_alert(alert.clone(), OutboxEntry::for_alert(&alert.id, at))
                .await
                .unwrap();
            out.push(stored);
        }
        out
    }

    mod alert_tests {
        use super::*;

        #[tokio::test]
        async fn insert_writes_outbox_entry() {
            let store = MemoryStore::new();
            let alerts = seeded(&store, &["a"]).await;

            let outbox = store.outbox_entries();
            assert_eq!(outbox.len(), 1);
            assert_eq!(outbox[0].alert_id, alerts[0].id);
            assert_eq!(outbox[0].status, OutboxStatus::Pending);
        }

        #[tokio::test]
        async fn find_returns_newest_first_with_paging() {
            let store = MemoryStore::new();
            seeded(&store, &["first", "second", "third"]).await;

            let all = store.find_alerts(&AlertQuery::new()).await.unwrap();
            let titles: Vec<&str> = all.iter().map(|a| a.title.as_str()).collect();
            assert_eq!(titles, vec!["third", "second", "first"]);

            let page = store.find_alerts(&AlertQuery::new().page(1, 1)).await.unwrap();
            assert_eq!(page.len(), 1);
            assert_eq!(page[0].title, "second");
        }

        #[tokio::test]
        async fn status_change_skips_missing_and_guarded_rows() {
            let store = MemoryStore::new();
            let alerts = seeded(&store, &["a1", "a2"]).await;
            let now = Utc::now();

            store
                .apply_status_change(
                    &[alerts[1].id.clone()],
                    &StatusChange::new(AlertStatus::Dismissed, "op", now),
                )
                .await
                .unwrap();

            let ids = vec![alerts[0].id.clone(), alerts[1].id.clone(), "missing-id".to_string()];
            let change = StatusChange::new(AlertStatus::Resolved, "system", now)
                .only_from(&[AlertStatus::Active]);
            let updated = store.apply_status_change(&ids, &change).await.unwrap();

            assert_eq!(updated.len(), 1);
            assert_eq!(updated[0].id, alerts[0].id);
            assert_eq!(updated[0].resolved_by.as_deref(), Some("system"));
        }

        #[tokio::test]
        async fn duplicate_ids_update_once() {
            let store = MemoryStore::new();
            let alerts = seeded(&store, &["a1"]).await;
            let ids = vec![alerts[0].id.clone(), alerts[0].id.clone()];
            let updated = store
                .apply_status_change(&ids, &StatusChange::new(AlertStatus::Resolved, "op", Utc::now()))
                .await
                .unwrap();
            assert_eq!(updated.len(), 1);
        }

        #[tokio::test]
        async fn raise_escalation_only_touches_active_alerts() {
            let store = MemoryStore::new();
            let alerts = seeded(&store, &["a1"]).await;
            let id = &alerts[0].id;

            let raised = store.raise_escalation(id, Some(AlertSeverity::Critical)).await.unwrap();
            assert_eq!(raised.map(|a| a.escalation_level), Some(1));

            store
                .apply_status_change(
                    &[id.clone()],
                    &StatusChange::new(AlertStatus::Acknowledged, "op", Utc::now()),
                )
                .await
                .unwrap();
            assert!(store.raise_escalation(id, None).await.unwrap().is_none());
        }

        #[tokio::test]
        async fn delete_removes_alert_and_schedule() {
            let store = MemoryStore::new();
            let alerts = seeded(&store, &["a1"]).await;
            let id = alerts[0].id.clone();
            store
                .schedule_escalation(EscalationSchedule {
                    alert_id: id.clone(),
                    rule_id: "r".to_string(),
                    step: 0,
                    due_at: Utc::now(),
                })
                .await
                .unwrap();

            assert!(store.delete_alert(&id).await.unwrap());
            assert!(!store.delete_alert(&id).await.unwrap());
            assert!(store.escalation_for(&id).is_none());
        }
    }

    mod rule_tests {
        use super::*;

        fn rule(name: &str, severity: AlertSeverity, at: DateTime<Utc>) -> AlertRule {
            NewAlertRule::builder(name, AlertType::DeviceOffline, severity)
                .build()
                .unwrap()
                .into_rule("admin", at)
        }

        #[tokio::test]
        async fn list_rules_newest_first() {
            let store = MemoryStore::new();
            let now = Utc::now();
            store.insert_rule(rule("old", AlertSeverity::Low, now)).await.unwrap();
            store
                .insert_rule(rule("new", AlertSeverity::Low, now + ChronoDuration::seconds(1)))
                .await
                .unwrap();

            let names: Vec<String> =
                store.list_rules().await.unwrap().into_iter().map(|r| r.name).collect();
            assert_eq!(names, vec!["new".to_string(), "old".to_string()]);
        }

        #[tokio::test]
        async fn matching_rules_filters_enabled_exact_pairs() {
            let store = MemoryStore::new();
            let now = Utc::now();
            store.insert_rule(rule("hit", AlertSeverity::Critical, now)).await.unwrap();
            store.insert_rule(rule("miss", AlertSeverity::High, now)).await.unwrap();
            let mut disabled = rule("disabled", AlertSeverity::Critical, now);
            disabled.enabled = false;
            store.insert_rule(disabled).await.unwrap();

            let matched = store
                .matching_rules(AlertType::DeviceOffline, AlertSeverity::Critical)
                .await
                .unwrap();
            assert_eq!(matched.len(), 1);
            assert_eq!(matched[0].name, "hit");
        }

        #[tokio::test]
        async fn update_missing_rule_returns_none() {
            let store = MemoryStore::new();
            let r = rule("ghost", AlertSeverity::Low, Utc::now());
            assert!(store.update_rule(r).await.unwrap().is_none());
        }
    }

    mod outbox_tests {
        use super::*;

        #[tokio::test]
        async fn pending_respects_availability_and_limit() {
            let store = MemoryStore::new();
            let alerts = seeded(&store, &["a", "b", "c"]).await;
            let later = Utc::now() + ChronoDuration::minutes(10);

            let entry_id = store.outbox_entries()[0].id.clone();
            store.retry_outbox(&entry_id, "boom", later).await.unwrap();

            let now = alerts[2].created_at;
            let pending = store.pending_outbox(now, 10).await.unwrap();
            assert_eq!(pending.len(), 2);
            assert!(pending.iter().all(|e| e.id != entry_id));

            assert_eq!(store.pending_outbox(now, 1).await.unwrap().len(), 1);
        }

        #[tokio::test]
        async fn complete_drops_entry() {
            let store = MemoryStore::new();
            let alerts = seeded(&store, &["a", "b"]).await;
            let entry_id = store.outbox_entries()[0].id.clone();

            store.complete_outbox(&entry_id).await.unwrap();
            let remaining = store.outbox_entries();
            assert_eq!(remaining.len(), 1);
            assert_ne!(remaining[0].id, entry_id);

            let pending = store.pending_outbox(alerts[1].created_at, 10).await.unwrap();
            assert_eq!(pending.len(), 1);
        }

        #[tokio::test]
        async fn bury_marks_dead() {
            let store = MemoryStore::new();
            seeded(&store, &["a"]).await;
            let entry_id = store.outbox_entries()[0].id.clone();

            store.bury_outbox(&entry_id, "gave up").await.unwrap();
            let entry = &store.outbox_entries()[0];
            assert_eq!(entry.status, OutboxStatus::Dead);
            assert_eq!(entry.attempts, 1);
            assert_eq!(entry.last_error.as_deref(), Some("gave up"));
        }
    }

    mod escalation_tests {
        use super::*;

        fn schedule(alert_id: &str, step: usize, due_at: DateTime<Utc>) -> EscalationSchedule {
            EscalationSchedule {
                alert_id: alert_id.to_string(),
                rule_id: "r1".to_string(),
                step,
                due_at,
            }
        }

        #[tokio::test]
        async fn schedule_is_insert_if_absent() {
            let store = MemoryStore::new();
            let now = Utc::now();
            assert!(store.schedule_escalation(schedule("a", 0, now)).await.unwrap());
            assert!(!store.schedule_escalation(schedule("a", 1, now)).await.unwrap());
            assert_eq!(store.escalation_for("a").map(|s| s.step), Some(0));

            store.reschedule_escalation(schedule("a", 1, now)).await.unwrap();
            assert_eq!(store.escalation_for("a").map(|s| s.step), Some(1));
        }

        #[tokio::test]
        async fn due_escalations_filters_by_time() {
            let store = MemoryStore::new();
            let now = Utc::now();
            store.schedule_escalation(schedule("a", 0, now)).await.unwrap();
            store
                .schedule_escalation(schedule("b", 0, now + ChronoDuration::minutes(5)))
                .await
                .unwrap();

            let due = store.due_escalations(now).await.unwrap();
            assert_eq!(due.len(), 1);
            assert_eq!(due[0].alert_id, "a");

            store.cancel_escalation("a").await.unwrap();
            assert!(store.due_escalations(now).await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = MemoryStore::new();
        store.set_available(false);

        let err = store.get_alert("x").await.unwrap_err();
        assert!(matches!(err, AlertError::StoreUnavailable { .. }));
        assert!(store.list_rules().await.is_err());

        store.set_available(true);
        assert!(store.get_alert("x").await.unwrap().is_none());
    }
}
