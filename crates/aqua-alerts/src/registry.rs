//! Administrative CRUD over alert rules.
//!
//! The registry stores whatever shape it is given; interpreting conditions
//! and actions is the engine's job.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::clock::Clock;
use crate::error::{AlertError, Result};
use crate::rule::{AlertRule, AlertRulePatch, NewAlertRule, validate_rule_name};
use crate::store::{AlertStore, bounded};

/// Rule CRUD backed by an [`AlertStore`].
pub struct RuleRegistry {
    store: Arc<dyn AlertStore>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl std::fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleRegistry")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RuleRegistry {
    /// Creates a registry with a 10 second store timeout.
    #[must_use]
    pub fn new(store: Arc<dyn AlertStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            timeout: Duration::from_secs(10),
        }
    }

    /// Sets the store timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Creates a rule, stamping its ID and audit fields.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::ValidationFailed` for a bad name, or a store error.
    pub async fn create(&self, new: NewAlertRule, created_by: &str) -> Result<AlertRule> {
        new.validate()?;
        let rule = new.into_rule(created_by, self.clock.now());
        let rule = bounded("insert_rule", self.timeout, self.store.insert_rule(rule)).await?;
        info!(rule_id = %rule.id, rule_name = %rule.name, "added alert rule");
        Ok(rule)
    }

    /// Merges a partial update into an existing rule.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::RuleNotFound` if the rule doesn't exist, or
    /// `AlertError::ValidationFailed` if the patch renames it badly.
    pub async fn update(&self, id: &str, patch: AlertRulePatch) -> Result<AlertRule> {
        if let Some(name) = &patch.name {
            validate_rule_name(name)?;
        }
        let mut rule = self.get(id).await?;
        rule.apply_patch(patch, self.clock.now());

        let updated = bounded("update_rule", self.timeout, self.store.update_rule(rule))
            .await?
            .ok_or_else(|| AlertError::RuleNotFound { id: id.to_string() })?;
        info!(rule_id = %updated.id, rule_name = %updated.name, "updated alert rule");
        Ok(updated)
    }

    /// Hard-deletes a rule.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::RuleNotFound` if the rule doesn't exist.
    pub async fn delete(&self, id: &str) -> Result<()> {
        if bounded("delete_rule", self.timeout, self.store.delete_rule(id)).await? {
            info!(rule_id = %id, "removed alert rule");
            Ok(())
        } else {
            Err(AlertError::RuleNotFound { id: id.to_string() })
        }
    }

    /// Gets a rule by ID.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::RuleNotFound` if the rule doesn't exist.
    pub async fn get(&self, id: &str) -> Result<AlertRule> {
        bounded("get_rule", self.timeout, self.store.get_rule(id))
            .await?
            .ok_or_else(|| AlertError::RuleNotFound { id: id.to_string() })
    }

    /// Returns all rules, newest first.
    pub async fn list(&self) -> Result<Vec<AlertRule>> {
        bounded("list_rules", self.timeout, self.store.list_rules()).await
    }
}
