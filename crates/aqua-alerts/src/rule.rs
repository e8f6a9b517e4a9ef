//! Alert rules: matching policy, conditions, actions and escalation steps.
//!
//! A rule matches alerts by exact `(type, severity)`. Its actions are
//! tagged per channel so that unknown channel types survive a round trip
//! as [`ChannelConfig::Unknown`] instead of failing deserialization.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{AlertError, Result};
use crate::types::{Alert, AlertSeverity, AlertType, Metadata};

/// Comparison operators for rule conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionOperator {
    /// Greater than (>).
    #[serde(rename = ">")]
    GreaterThan,
    /// Less than (<).
    #[serde(rename = "<")]
    LessThan,
    /// Equal (=).
    #[serde(rename = "=")]
    Equal,
    /// Greater than or equal (>=).
    #[serde(rename = ">=")]
    GreaterThanOrEqual,
    /// Less than or equal (<=).
    #[serde(rename = "<=")]
    LessThanOrEqual,
    /// Not equal (!=).
    #[serde(rename = "!=")]
    NotEqual,
    /// Substring or list membership.
    #[serde(rename = "contains")]
    Contains,
    /// Inclusive numeric range.
    #[serde(rename = "between")]
    Between,
}

impl ConditionOperator {
    /// Compares two numbers. `contains` and `between` never match here.
    #[must_use]
    pub fn compare(&self, left: f64, right: f64) -> bool {
        match self {
            Self::GreaterThan => left > right,
            Self::LessThan => left < right,
            Self::Equal => (left - right).abs() < f64::EPSILON,
            Self::GreaterThanOrEqual => left >= right,
            Self::LessThanOrEqual => left <= right,
            Self::NotEqual => (left - right).abs() >= f64::EPSILON,
            Self::Contains | Self::Between => false,
        }
    }

    /// Returns the operator as its wire symbol.
    #[must_use]
    pub const fn as_symbol(&self) -> &'static str {
        match self {
            Self::GreaterThan => ">",
            Self::LessThan => "<",
            Self::Equal => "=",
            Self::GreaterThanOrEqual => ">=",
            Self::LessThanOrEqual => "<=",
            Self::NotEqual => "!=",
            Self::Contains => "contains",
            Self::Between => "between",
        }
    }
}

impl std::fmt::Display for ConditionOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_symbol())
    }
}

/// The right-hand side of a condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionValue {
    /// A boolean flag.
    Bool(bool),
    /// A number.
    Number(f64),
    /// An inclusive `[low, high]` range.
    Range(f64, f64),
    /// A string.
    Text(String),
}

impl std::fmt::Display for ConditionValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Range(lo, hi) => write!(f, "[{lo}, {hi}]"),
            Self::Text(s) => write!(f, "'{s}'"),
        }
    }
}

/// One condition of a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleCondition {
    /// Alert field or metadata path (dot separated) to read.
    pub parameter: String,
    /// The comparison.
    pub operator: ConditionOperator,
    /// The value to compare against.
    pub value: ConditionValue,
    /// Minutes the condition must hold. Stored, not evaluated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold_duration: Option<u32>,
}

impl RuleCondition {
    /// Creates a condition.
    pub fn new(
        parameter: impl Into<String>,
        operator: ConditionOperator,
        value: ConditionValue,
    ) -> Self {
        Self {
            parameter: parameter.into(),
            operator,
            value,
            threshold_duration: None,
        }
    }

    /// Evaluates the condition against an alert's fields and metadata.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::RuleEvaluation` if the parameter is absent or
    /// the operator cannot compare the two values.
    pub fn evaluate(&self, alert: &Alert) -> Result<bool> {
        let actual = resolve_parameter(alert, &self.parameter).ok_or_else(|| {
            AlertError::RuleEvaluation {
                reason: format!("parameter '{}' is not present on the alert", self.parameter),
            }
        })?;

        match (self.operator, &self.value) {
            (ConditionOperator::Between, ConditionValue::Range(lo, hi)) => {
                let x = self.as_number(&actual)?;
                Ok(x >= *lo && x <= *hi)
            }
            (ConditionOperator::Contains, ConditionValue::Text(needle)) => match &actual {
                Value::String(s) => Ok(s.to_lowercase().contains(&needle.to_lowercase())),
                Value::Array(items) => Ok(items.iter().any(|i| i.as_str() == Some(needle))),
                other => Err(self.mismatch(other)),
            },
            (ConditionOperator::Between | ConditionOperator::Contains, _) => {
                Err(AlertError::RuleEvaluation {
                    reason: format!(
                        "operator '{}' cannot use value {} on '{}'",
                        self.operator, self.value, self.parameter
                    ),
                })
            }
            (op, ConditionValue::Number(threshold)) => {
                let x = self.as_number(&actual)?;
                Ok(op.compare(x, *threshold))
            }
            (ConditionOperator::Equal, ConditionValue::Text(expected)) => {
                Ok(actual.as_str() == Some(expected.as_str()))
            }
            (ConditionOperator::NotEqual, ConditionValue::Text(expected)) => {
                Ok(actual.as_str() != Some(expected.as_str()))
            }
            (ConditionOperator::Equal, ConditionValue::Bool(expected)) => {
                Ok(actual.as_bool() == Some(*expected))
            }
            (ConditionOperator::NotEqual, ConditionValue::Bool(expected)) => {
                Ok(actual.as_bool() != Some(*expected))
            }
            (op, value) => Err(AlertError::RuleEvaluation {
                reason: format!(
                    "operator '{op}' cannot compare '{}' against {value}",
                    self.parameter
                ),
            }),
        }
    }

    fn as_number(&self, value: &Value) -> Result<f64> {
        match value {
            Value::Number(n) => n.as_f64().ok_or_else(|| self.mismatch(value)),
            Value::String(s) => s.trim().parse::<f64>().map_err(|_| self.mismatch(value)),
            other => Err(self.mismatch(other)),
        }
    }

    fn mismatch(&self, actual: &Value) -> AlertError {
        AlertError::RuleEvaluation {
            reason: format!(
                "'{}' has value {actual} which '{}' cannot compare against {}",
                self.parameter, self.operator, self.value
            ),
        }
    }
}

impl std::fmt::Display for RuleCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.parameter, self.operator, self.value)
    }
}

/// Reads an alert field, falling back to a dot-separated metadata path.
fn resolve_parameter(alert: &Alert, parameter: &str) -> Option<Value> {
    let field = match parameter {
        "type" | "alert_type" => Some(Value::from(alert.alert_type.as_str())),
        "severity" => Some(Value::from(alert.severity.as_str())),
        "status" => Some(Value::from(alert.status.as_str())),
        "triggered_by" => Some(Value::from(alert.triggered_by.as_str())),
        "title" => Some(Value::from(alert.title.as_str())),
        "message" => Some(Value::from(alert.message.as_str())),
        "district" => return alert.district().map(Value::from),
        "state" => return alert.state().map(Value::from),
        "device_id" => return alert.device_id.as_deref().map(Value::from),
        "reading_id" => return alert.reading_id.as_deref().map(Value::from),
        "escalation_level" => Some(Value::from(alert.escalation_level)),
        _ => None,
    };
    field.or_else(|| metadata_path(&alert.metadata, parameter))
}

fn metadata_path(metadata: &Metadata, path: &str) -> Option<Value> {
    let mut segments = path.split('.');
    let mut current = metadata.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current.clone())
}

/// The notification channel an action targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    /// Email.
    Email,
    /// SMS.
    Sms,
    /// Mobile push.
    Push,
    /// HTTP webhook.
    Webhook,
    /// A channel type this build does not know.
    Unknown,
}

impl ActionKind {
    /// Returns the kind as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Sms => "sms",
            Self::Push => "push",
            Self::Webhook => "webhook",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Channel-specific action settings, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelConfig {
    /// Email settings.
    Email {
        /// Subject line override.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subject: Option<String>,
    },
    /// SMS settings.
    Sms {
        /// Registered sender ID.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender_id: Option<String>,
    },
    /// Push settings.
    Push {
        /// Topic to publish to.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        topic: Option<String>,
    },
    /// Webhook settings.
    Webhook {
        /// HTTP method, POST when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        method: Option<String>,
        /// Extra request headers.
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
    },
    /// Unrecognized channel type.
    #[serde(other)]
    Unknown,
}

impl ChannelConfig {
    /// Returns the channel kind.
    #[must_use]
    pub const fn kind(&self) -> ActionKind {
        match self {
            Self::Email { .. } => ActionKind::Email,
            Self::Sms { .. } => ActionKind::Sms,
            Self::Push { .. } => ActionKind::Push,
            Self::Webhook { .. } => ActionKind::Webhook,
            Self::Unknown => ActionKind::Unknown,
        }
    }
}

/// A notification a rule sends when it matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleAction {
    /// Channel type and settings.
    #[serde(flatten)]
    pub channel: ChannelConfig,
    /// Addresses, numbers, device tokens or URLs.
    #[serde(default)]
    pub recipients: Vec<String>,
    /// Message template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

impl RuleAction {
    /// Creates an email action.
    #[must_use]
    pub fn email(recipients: Vec<String>) -> Self {
        Self::new(ChannelConfig::Email { subject: None }, recipients)
    }

    /// Creates an SMS action.
    #[must_use]
    pub fn sms(recipients: Vec<String>) -> Self {
        Self::new(ChannelConfig::Sms { sender_id: None }, recipients)
    }

    /// Creates a push action.
    #[must_use]
    pub fn push(recipients: Vec<String>) -> Self {
        Self::new(ChannelConfig::Push { topic: None }, recipients)
    }

    /// Creates a webhook action.
    #[must_use]
    pub fn webhook(urls: Vec<String>) -> Self {
        Self::new(
            ChannelConfig::Webhook {
                method: None,
                headers: BTreeMap::new(),
            },
            urls,
        )
    }

    /// Creates an action for an arbitrary channel.
    #[must_use]
    pub const fn new(channel: ChannelConfig, recipients: Vec<String>) -> Self {
        Self {
            channel,
            recipients,
            template: None,
        }
    }

    /// Sets the template.
    #[must_use]
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    /// Returns the channel kind.
    #[must_use]
    pub const fn kind(&self) -> ActionKind {
        self.channel.kind()
    }

    /// Returns a copy addressed to the original plus `extra` recipients.
    #[must_use]
    pub fn with_additional_recipients(&self, extra: &[String]) -> Self {
        let mut action = self.clone();
        for recipient in extra {
            if !action.recipients.contains(recipient) {
                action.recipients.push(recipient.clone());
            }
        }
        action
    }
}

/// One timed escalation step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationStep {
    /// Minutes after the previous step (or alert processing) this step fires.
    pub delay_minutes: u32,
    /// Whether to raise the alert's severity by one level.
    #[serde(default)]
    pub severity_increase: bool,
    /// Recipients notified in addition to the rule's own.
    #[serde(default)]
    pub additional_recipients: Vec<String>,
}

impl EscalationStep {
    /// Returns when this step fires if scheduled at `from`.
    #[must_use]
    pub fn due_from(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        from + ChronoDuration::minutes(i64::from(self.delay_minutes))
    }
}

const fn default_enabled() -> bool {
    true
}

/// A persisted alert rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    /// Unique identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Longer description.
    #[serde(default)]
    pub description: String,
    /// Alert type this rule matches.
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    /// Alert severity this rule matches.
    pub severity: AlertSeverity,
    /// Whether the rule is evaluated.
    pub enabled: bool,
    /// Conditions on the alert's fields.
    #[serde(default)]
    pub conditions: Vec<RuleCondition>,
    /// Notifications to send.
    #[serde(default)]
    pub actions: Vec<RuleAction>,
    /// Ordered escalation steps.
    #[serde(default)]
    pub escalation_rules: Vec<EscalationStep>,
    /// Resolve matched alerts automatically after this many minutes.
    pub auto_resolve_after_minutes: Option<u32>,
    /// Who created the rule.
    pub created_by: String,
    /// When the rule was created.
    pub created_at: DateTime<Utc>,
    /// When the rule was last changed.
    pub updated_at: DateTime<Utc>,
}

impl AlertRule {
    /// Returns true if the rule is enabled and targets the alert's type and severity.
    #[must_use]
    pub fn matches(&self, alert: &Alert) -> bool {
        self.enabled && self.alert_type == alert.alert_type && self.severity == alert.severity
    }

    /// Returns true if every condition holds for the alert.
    ///
    /// # Errors
    ///
    /// Returns the first `AlertError::RuleEvaluation` raised by a condition.
    pub fn conditions_hold(&self, alert: &Alert) -> Result<bool> {
        for condition in &self.conditions {
            if !condition.evaluate(alert)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Returns the auto-resolve deadline for an alert processed at `now`.
    #[must_use]
    pub fn auto_resolve_deadline(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.auto_resolve_after_minutes
            .map(|minutes| now + ChronoDuration::minutes(i64::from(minutes)))
    }

    /// Merges a partial update.
    pub fn apply_patch(&mut self, patch: AlertRulePatch, now: DateTime<Utc>) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(alert_type) = patch.alert_type {
            self.alert_type = alert_type;
        }
        if let Some(severity) = patch.severity {
            self.severity = severity;
        }
        if let Some(enabled) = patch.enabled {
            self.enabled = enabled;
        }
        if let Some(conditions) = patch.conditions {
            self.conditions = conditions;
        }
        if let Some(actions) = patch.actions {
            self.actions = actions;
        }
        if let Some(escalation_rules) = patch.escalation_rules {
            self.escalation_rules = escalation_rules;
        }
        if let Some(auto_resolve) = patch.auto_resolve_after_minutes {
            self.auto_resolve_after_minutes = auto_resolve;
        }
        self.updated_at = now;
    }
}

/// The caller-supplied fields of a new rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAlertRule {
    /// Human-readable name.
    pub name: String,
    /// Longer description.
    #[serde(default)]
    pub description: String,
    /// Alert type this rule matches.
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    /// Alert severity this rule matches.
    pub severity: AlertSeverity,
    /// Whether the rule is evaluated.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Conditions on the alert's fields.
    #[serde(default)]
    pub conditions: Vec<RuleCondition>,
    /// Notifications to send.
    #[serde(default)]
    pub actions: Vec<RuleAction>,
    /// Ordered escalation steps.
    #[serde(default)]
    pub escalation_rules: Vec<EscalationStep>,
    /// Resolve matched alerts automatically after this many minutes.
    #[serde(default)]
    pub auto_resolve_after_minutes: Option<u32>,
}

impl NewAlertRule {
    /// Maximum allowed length for rule names.
    pub const MAX_NAME_LENGTH: usize = 256;

    /// Creates a new rule builder.
    pub fn builder(
        name: impl Into<String>,
        alert_type: AlertType,
        severity: AlertSeverity,
    ) -> AlertRuleBuilder {
        AlertRuleBuilder::new(name, alert_type, severity)
    }

    /// Checks the name of the rule.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::ValidationFailed` if the name is empty or too long.
    pub fn validate(&self) -> Result<()> {
        validate_rule_name(&self.name)
    }

    /// Turns the input into a persisted rule.
    #[must_use]
    pub fn into_rule(self, created_by: impl Into<String>, now: DateTime<Utc>) -> AlertRule {
        AlertRule {
            id: Uuid::new_v4().to_string(),
            name: self.name,
            description: self.description,
            alert_type: self.alert_type,
            severity: self.severity,
            enabled: self.enabled,
            conditions: self.conditions,
            actions: self.actions,
            escalation_rules: self.escalation_rules,
            auto_resolve_after_minutes: self.auto_resolve_after_minutes,
            created_by: created_by.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Builder for [`NewAlertRule`] instances.
#[derive(Debug)]
pub struct AlertRuleBuilder {
    rule: NewAlertRule,
}

impl AlertRuleBuilder {
    fn new(name: impl Into<String>, alert_type: AlertType, severity: AlertSeverity) -> Self {
        Self {
            rule: NewAlertRule {
                name: name.into(),
                description: String::new(),
                alert_type,
                severity,
                enabled: true,
                conditions: Vec::new(),
                actions: Vec::new(),
                escalation_rules: Vec::new(),
                auto_resolve_after_minutes: None,
            },
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.rule.description = description.into();
        self
    }

    /// Adds a condition.
    #[must_use]
    pub fn condition(mut self, condition: RuleCondition) -> Self {
        self.rule.conditions.push(condition);
        self
    }

    /// Adds an action.
    #[must_use]
    pub fn action(mut self, action: RuleAction) -> Self {
        self.rule.actions.push(action);
        self
    }

    /// Adds an escalation step.
    #[must_use]
    pub fn escalation(mut self, step: EscalationStep) -> Self {
        self.rule.escalation_rules.push(step);
        self
    }

    /// Sets the auto-resolve window.
    #[must_use]
    pub const fn auto_resolve_after_minutes(mut self, minutes: u32) -> Self {
        self.rule.auto_resolve_after_minutes = Some(minutes);
        self
    }

    /// Sets whether the rule is enabled.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.rule.enabled = enabled;
        self
    }

    /// Builds the [`NewAlertRule`].
    ///
    /// # Errors
    ///
    /// Returns `AlertError::ValidationFailed` if the name is empty or exceeds
    /// the maximum length.
    pub fn build(self) -> Result<NewAlertRule> {
        self.rule.validate()?;
        Ok(self.rule)
    }
}

pub(crate) fn validate_rule_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(AlertError::ValidationFailed {
            reason: "rule name cannot be empty".to_string(),
        });
    }

    if name.len() > NewAlertRule::MAX_NAME_LENGTH {
        return Err(AlertError::ValidationFailed {
            reason: format!(
                "rule name exceeds maximum length of {} characters",
                NewAlertRule::MAX_NAME_LENGTH
            ),
        });
    }

    Ok(())
}

/// A partial rule update. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertRulePatch {
    /// New name.
    #[serde(default)]
    pub name: Option<String>,
    /// New description.
    #[serde(default)]
    pub description: Option<String>,
    /// New alert type.
    #[serde(default, rename = "type")]
    pub alert_type: Option<AlertType>,
    /// New severity.
    #[serde(default)]
    pub severity: Option<AlertSeverity>,
    /// New enabled flag.
    #[serde(default)]
    pub enabled: Option<bool>,
    /// Replacement conditions.
    #[serde(default)]
    pub conditions: Option<Vec<RuleCondition>>,
    /// Replacement actions.
    #[serde(default)]
    pub actions: Option<Vec<RuleAction>>,
    /// Replacement escalation steps.
    #[serde(default)]
    pub escalation_rules: Option<Vec<EscalationStep>>,
    /// New auto-resolve window; `null` clears it.
    #[serde(default, deserialize_with = "present_or_null")]
    pub auto_resolve_after_minutes: Option<Option<u32>>,
}

/// Distinguishes an explicit `null` (`Some(None)`) from an absent field (`None`).
fn present_or_null<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
