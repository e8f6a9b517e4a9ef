//! Notification dispatch.
//!
//! This module provides the [`NotificationChannel`] trait, stub channels for
//! email, SMS, push and webhooks, and the [`Dispatcher`] that routes a rule
//! action to its channel and records the outcome as an [`ActionLog`].
//!
//! The audit contract: every call to [`Dispatcher::execute_alert_action`]
//! writes exactly one action-log row, `sent` or `failed`.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{AlertError, Result};
use crate::rule::{ActionKind, ChannelConfig, RuleAction};
use crate::store::{AlertStore, bounded};
use crate::types::{ActionLog, ActionLogStatus, Alert};

/// A rendered notification for one action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// Snapshot of the alert the notification is about.
    pub alert: Alert,
    /// Who to address.
    pub recipients: Vec<String>,
    /// Channel-specific settings from the rule action.
    pub channel: ChannelConfig,
    /// Subject or headline.
    pub subject: String,
    /// Rendered message body.
    pub body: String,
}

impl Notification {
    /// Renders a notification for `action` about `alert`.
    #[must_use]
    pub fn render(alert: &Alert, action: &RuleAction) -> Self {
        let subject = match &action.channel {
            ChannelConfig::Email {
                subject: Some(subject),
            } => render_template(Some(subject), alert),
            _ => format!("[{}] {}", alert.severity.as_str().to_uppercase(), alert.title),
        };

        Self {
            alert: alert.clone(),
            recipients: action.recipients.clone(),
            channel: action.channel.clone(),
            subject,
            body: render_template(action.template.as_deref(), alert),
        }
    }
}

/// Substitutes `{{placeholder}}` fields of the alert into a template.
///
/// Without a template the message is `"[SEVERITY] title: message"`.
#[must_use]
pub fn render_template(template: Option<&str>, alert: &Alert) -> String {
    let Some(template) = template else {
        return format!(
            "[{}] {}: {}",
            alert.severity.as_str().to_uppercase(),
            alert.title,
            alert.message
        );
    };

    let replacements = [
        ("{{title}}", alert.title.clone()),
        ("{{message}}", alert.message.clone()),
        ("{{severity}}", alert.severity.to_string()),
        ("{{alert_type}}", alert.alert_type.to_string()),
        ("{{district}}", alert.district().unwrap_or_default().to_string()),
        ("{{state}}", alert.state().unwrap_or_default().to_string()),
        ("{{alert_id}}", alert.id.clone()),
        ("{{escalation_level}}", alert.escalation_level.to_string()),
    ];

    replacements
        .iter()
        .fold(template.to_string(), |text, (placeholder, value)| {
            text.replace(placeholder, value)
        })
}

/// Result of sending a notification.
#[derive(Debug, Clone)]
pub struct NotificationResult {
    /// Whether the notification was sent successfully.
    pub success: bool,
    /// The channel that processed this notification.
    pub channel: ActionKind,
    /// Optional message or error description.
    pub message: Option<String>,
    /// Response status code (if applicable).
    pub status_code: Option<u16>,
}

impl NotificationResult {
    /// Creates a successful result.
    #[must_use]
    pub const fn success(channel: ActionKind) -> Self {
        Self {
            success: true,
            channel,
            message: None,
            status_code: None,
        }
    }

    /// Creates a failed result.
    #[must_use]
    pub fn failure(channel: ActionKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            channel,
            message: Some(message.into()),
            status_code: None,
        }
    }

    /// Sets the status code.
    #[must_use]
    pub const fn with_status_code(mut self, code: u16) -> Self {
        self.status_code = Some(code);
        self
    }

    /// Sets the message.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }
}

/// Trait for notification channels.
///
/// Implement this trait to deliver notifications through a real provider.
#[async_trait]
pub trait NotificationChannel: Send + Sync + fmt::Debug {
    /// Returns the action kind this channel serves.
    fn kind(&self) -> ActionKind;

    /// Sends a notification through this channel.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::ActionDispatchFailed` if the notification cannot be sent.
    async fn send(&self, notification: &Notification) -> Result<NotificationResult>;

    /// Returns true if this channel is enabled.
    fn is_enabled(&self) -> bool {
        true
    }
}

fn require_recipients(kind: ActionKind, notification: &Notification) -> Result<()> {
    if notification.recipients.is_empty() {
        return Err(AlertError::ActionDispatchFailed {
            reason: format!("{kind} action has no recipients"),
        });
    }
    Ok(())
}

fn disabled(kind: ActionKind) -> NotificationResult {
    debug!(channel = %kind, "channel is disabled, skipping");
    NotificationResult::success(kind).with_message("channel disabled, notification skipped")
}

/// Placeholder email channel.
///
/// Logs the message instead of talking to an SMTP relay.
#[derive(Debug, Clone)]
pub struct EmailChannel {
    from: String,
    enabled: bool,
}

impl EmailChannel {
    /// Creates a new email channel.
    #[must_use]
    pub fn new(from: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            enabled: true,
        }
    }

    /// Sets whether the channel is enabled.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Returns the sender address.
    #[must_use]
    pub fn sender(&self) -> &str {
        &self.from
    }
}

impl Default for EmailChannel {
    fn default() -> Self {
        Self::new("alerts@aquaguard.local")
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn kind(&self) -> ActionKind {
        ActionKind::Email
    }

    async fn send(&self, notification: &Notification) -> Result<NotificationResult> {
        if !self.is_enabled() {
            return Ok(disabled(self.kind()));
        }
        require_recipients(self.kind(), notification)?;
        if let Some(bad) = notification.recipients.iter().find(|r| !r.contains('@')) {
            return Err(AlertError::ActionDispatchFailed {
                reason: format!("invalid email address '{bad}'"),
            });
        }

        info!(
            channel = %self.kind(),
            alert_id = %notification.alert.id,
            to = ?notification.recipients,
            from = %self.from,
            subject = %notification.subject,
            "would send email notification"
        );

        Ok(NotificationResult::success(self.kind()).with_message("email notification placeholder"))
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// Placeholder SMS channel.
#[derive(Debug, Clone)]
pub struct SmsChannel {
    sender_id: String,
    enabled: bool,
}

impl SmsChannel {
    /// Creates a new SMS channel with a default sender ID.
    #[must_use]
    pub fn new(sender_id: impl Into<String>) -> Self {
        Self {
            sender_id: sender_id.into(),
            enabled: true,
        }
    }

    /// Sets whether the channel is enabled.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

impl Default for SmsChannel {
    fn default() -> Self {
        Self::new("AQUAGD")
    }
}

#[async_trait]
impl NotificationChannel for SmsChannel {
    fn kind(&self) -> ActionKind {
        ActionKind::Sms
    }

    async fn send(&self, notification: &Notification) -> Result<NotificationResult> {
        if !self.is_enabled() {
            return Ok(disabled(self.kind()));
        }
        require_recipients(self.kind(), notification)?;

        let sender_id = match &notification.channel {
            ChannelConfig::Sms {
                sender_id: Some(id),
            } => id.as_str(),
            _ => self.sender_id.as_str(),
        };
        info!(
            channel = %self.kind(),
            alert_id = %notification.alert.id,
            to = ?notification.recipients,
            sender_id = %sender_id,
            chars = notification.body.chars().count(),
            "would send sms notification"
        );

        Ok(NotificationResult::success(self.kind()).with_message("sms notification placeholder"))
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// Placeholder mobile push channel.
#[derive(Debug, Clone)]
pub struct PushChannel {
    enabled: bool,
}

impl PushChannel {
    /// Creates a new push channel.
    #[must_use]
    pub const fn new() -> Self {
        Self { enabled: true }
    }

    /// Sets whether the channel is enabled.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

impl Default for PushChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationChannel for PushChannel {
    fn kind(&self) -> ActionKind {
        ActionKind::Push
    }

    async fn send(&self, notification: &Notification) -> Result<NotificationResult> {
        if !self.is_enabled() {
            return Ok(disabled(self.kind()));
        }
        require_recipients(self.kind(), notification)?;

        let topic = match &notification.channel {
            ChannelConfig::Push { topic: Some(topic) } => Some(topic.as_str()),
            _ => None,
        };
        info!(
            channel = %self.kind(),
            alert_id = %notification.alert.id,
            devices = notification.recipients.len(),
            topic = ?topic,
            "would send push notification"
        );

        Ok(NotificationResult::success(self.kind()).with_message("push notification placeholder"))
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// Placeholder webhook channel.
///
/// Builds the JSON payload a real HTTP client would POST to each recipient URL.
#[derive(Debug, Clone)]
pub struct WebhookChannel {
    enabled: bool,
}

impl WebhookChannel {
    /// Creates a new webhook channel.
    #[must_use]
    pub const fn new() -> Self {
        Self { enabled: true }
    }

    /// Sets whether the channel is enabled.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Formats the notification as JSON.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::SerializationError` if serialization fails.
    pub fn format_payload(&self, notification: &Notification) -> Result<String> {
        let payload = WebhookPayload::from_notification(notification);
        serde_json::to_string(&payload).map_err(AlertError::from)
    }
}

impl Default for WebhookChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn kind(&self) -> ActionKind {
        ActionKind::Webhook
    }

    async fn send(&self, notification: &Notification) -> Result<NotificationResult> {
        if !self.is_enabled() {
            return Ok(disabled(self.kind()));
        }
        require_recipients(self.kind(), notification)?;
        if let Some(bad) = notification
            .recipients
            .iter()
            .find(|url| !(url.starts_with("http://") || url.starts_with("https://")))
        {
            return Err(AlertError::ActionDispatchFailed {
                reason: format!("invalid webhook url '{bad}'"),
            });
        }

        let (method, headers) = match &notification.channel {
            ChannelConfig::Webhook { method, headers } => {
                (method.as_deref().unwrap_or("POST"), headers.len())
            }
            _ => ("POST", 0),
        };
        let payload = self.format_payload(notification)?;

        info!(
            channel = %self.kind(),
            alert_id = %notification.alert.id,
            urls = ?notification.recipients,
            method = %method,
            headers,
            "would send webhook notification"
        );
        debug!(payload = %payload, "webhook payload");

        Ok(NotificationResult::success(self.kind())
            .with_status_code(200)
            .with_message("notification queued"))
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// The JSON body of a webhook notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookPayload {
    /// The alert ID.
    pub alert_id: String,
    /// The alert type.
    pub alert_type: String,
    /// The current severity.
    pub severity: String,
    /// The current status.
    pub status: String,
    /// The alert title.
    pub title: String,
    /// The rendered message.
    pub text: String,
    /// Escalation level at dispatch time.
    pub escalation_level: u32,
    /// Location fields, when present.
    pub location: BTreeMap<String, String>,
    /// When the alert was created (RFC 3339).
    pub created_at: String,
}

impl WebhookPayload {
    /// Creates a payload from a notification.
    #[must_use]
    pub fn from_notification(notification: &Notification) -> Self {
        let alert = &notification.alert;
        let mut location = BTreeMap::new();
        if let Some(district) = alert.district() {
            location.insert("district".to_string(), district.to_string());
        }
        if let Some(state) = alert.state() {
            location.insert("state".to_string(), state.to_string());
        }

        Self {
            alert_id: alert.id.clone(),
            alert_type: alert.alert_type.to_string(),
            severity: alert.severity.to_string(),
            status: alert.status.to_string(),
            title: alert.title.clone(),
            text: notification.body.clone(),
            escalation_level: alert.escalation_level,
            location,
            created_at: alert.created_at.to_rfc3339(),
        }
    }
}

/// Routes rule actions to channels and writes the action log.
pub struct Dispatcher {
    channels: HashMap<ActionKind, Arc<dyn NotificationChannel>>,
    store: Arc<dyn AlertStore>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("channels", &self.channels.keys().collect::<Vec<_>>())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Default per-attempt timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Creates a dispatcher with no channels registered.
    #[must_use]
    pub fn new(store: Arc<dyn AlertStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            channels: HashMap::new(),
            store,
            clock,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Creates a dispatcher with the four placeholder channels.
    #[must_use]
    pub fn with_stub_channels(store: Arc<dyn AlertStore>, clock: Arc<dyn Clock>) -> Self {
        Self::new(store, clock)
            .with_channel(Arc::new(EmailChannel::default()))
            .with_channel(Arc::new(SmsChannel::default()))
            .with_channel(Arc::new(PushChannel::default()))
            .with_channel(Arc::new(WebhookChannel::default()))
    }

    /// Registers a channel, replacing any channel of the same kind.
    #[must_use]
    pub fn with_channel(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.channels.insert(channel.kind(), channel);
        self
    }

    /// Sets the per-attempt timeout for channel sends and the log write.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the kinds with a registered channel.
    #[must_use]
    pub fn channel_kinds(&self) -> Vec<ActionKind> {
        let mut kinds: Vec<ActionKind> = self.channels.keys().copied().collect();
        kinds.sort_by_key(ActionKind::as_str);
        kinds
    }

    /// Executes one action for an alert and writes its action-log row.
    ///
    /// A failed delivery is not an error: it is recorded as a `failed` row
    /// and returned. Only a failed log write returns `Err`.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::StoreUnavailable` or `AlertError::StoreTimeout`
    /// if the action-log row cannot be written.
    pub async fn execute_alert_action(
        &self,
        alert: &Alert,
        action: &RuleAction,
        rule_id: Option<&str>,
    ) -> Result<ActionLog> {
        let kind = action.kind();
        let outcome = self.deliver(alert, action).await;

        let (status, error_message) = match outcome {
            Ok(()) => (ActionLogStatus::Sent, None),
            Err(err) => {
                warn!(
                    alert_id = %alert.id,
                    rule_id = ?rule_id,
                    channel = %kind,
                    error = %err,
                    "Action dispatch failed"
                );
                (ActionLogStatus::Failed, Some(err.to_string()))
            }
        };

        let log = ActionLog {
            id: Uuid::new_v4().to_string(),
            alert_id: alert.id.clone(),
            rule_id: rule_id.map(str::to_string),
            action_type: kind.as_str().to_string(),
            recipients: action.recipients.clone(),
            status,
            error_message,
            escalation_level: alert.escalation_level,
            created_at: self.clock.now(),
        };

        bounded(
            "insert_action_log",
            self.timeout,
            self.store.insert_action_log(log.clone()),
        )
        .await?;

        debug!(
            alert_id = %alert.id,
            channel = %kind,
            status = ?log.status,
            "Recorded action log"
        );
        Ok(log)
    }

    async fn deliver(&self, alert: &Alert, action: &RuleAction) -> Result<()> {
        let kind = action.kind();
        let channel = self
            .channels
            .get(&kind)
            .ok_or_else(|| AlertError::ActionDispatchFailed {
                reason: format!("no channel registered for action type '{kind}'"),
            })?;

        let notification = Notification::render(alert, action);
        let result = tokio::time::timeout(self.timeout, channel.send(&notification))
            .await
            .map_err(|_| AlertError::ActionDispatchFailed {
                reason: format!("{kind} dispatch timed out after {:?}", self.timeout),
            })??;

        if result.success {
            Ok(())
        } else {
            Err(AlertError::ActionDispatchFailed {
                reason: result
                    .message
                    .unwrap_or_else(|| format!("{kind} channel reported failure")),
            })
        }
    }
}
