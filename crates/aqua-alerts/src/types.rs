//! Core types for the alerting system.
//!
//! This module provides the fundamental types used throughout the aqua-alerts crate:
//! - [`AlertType`], [`AlertSeverity`], [`AlertStatus`], [`TriggerOrigin`]: alert enums
//! - [`NewAlert`]: the caller-supplied part of an alert
//! - [`Alert`]: a persisted alert record
//! - [`StatusChange`]: one status mutation, shared by single and bulk updates
//! - [`ActionLog`], [`OutboxEntry`], [`EscalationSchedule`]: bookkeeping records

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{AlertError, Result};

/// Free-form alert metadata.
pub type Metadata = Map<String, Value>;

/// Metadata key that status-update notes are merged into.
pub const NOTES_KEY: &str = "notes";

/// The category of event an alert describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    /// A sensor reading crossed a water-quality threshold.
    WaterQuality,
    /// A field device stopped reporting.
    DeviceOffline,
    /// The prediction service flagged an elevated disease risk.
    DiseaseRisk,
    /// Scheduled or required maintenance.
    Maintenance,
    /// Platform-level event.
    System,
}

impl AlertType {
    /// All alert types.
    pub const ALL: [Self; 5] = [
        Self::WaterQuality,
        Self::DeviceOffline,
        Self::DiseaseRisk,
        Self::Maintenance,
        Self::System,
    ];

    /// Returns the type as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::WaterQuality => "water_quality",
            Self::DeviceOffline => "device_offline",
            Self::DiseaseRisk => "disease_risk",
            Self::Maintenance => "maintenance",
            Self::System => "system",
        }
    }
}

/// The severity level of an alert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    /// Informational, no action required.
    Low,
    /// Should be investigated.
    #[default]
    Medium,
    /// Needs attention soon.
    High,
    /// Requires immediate attention.
    Critical,
}

impl AlertSeverity {
    /// All severities, least urgent first.
    pub const ALL: [Self; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];

    /// Returns the severity as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Returns the priority of this severity (higher = more urgent).
    #[must_use]
    pub const fn priority(&self) -> u8 {
        match self {
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
            Self::Critical => 4,
        }
    }

    /// Returns the next severity up, saturating at critical.
    #[must_use]
    pub const fn raised(&self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium => Self::High,
            Self::High | Self::Critical => Self::Critical,
        }
    }
}

/// The lifecycle status of an alert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    /// Open and unhandled.
    #[default]
    Active,
    /// Seen by an operator, still unresolved.
    Acknowledged,
    /// Closed because the cause went away.
    Resolved,
    /// Closed without action.
    Dismissed,
}

impl AlertStatus {
    /// All statuses.
    pub const ALL: [Self; 4] = [
        Self::Active,
        Self::Acknowledged,
        Self::Resolved,
        Self::Dismissed,
    ];

    /// Returns the status as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Acknowledged => "acknowledged",
            Self::Resolved => "resolved",
            Self::Dismissed => "dismissed",
        }
    }

    /// Returns true once the alert can no longer change.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Resolved | Self::Dismissed)
    }

    /// Statuses from which `target` may be entered under the strict state machine.
    #[must_use]
    pub const fn allowed_predecessors(target: Self) -> &'static [Self] {
        match target {
            Self::Active => &[],
            Self::Acknowledged => &[Self::Active],
            Self::Resolved | Self::Dismissed => &[Self::Active, Self::Acknowledged],
        }
    }

    /// Returns true if `self -> target` is an edge of the strict state machine.
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        Self::allowed_predecessors(target).contains(self)
    }
}

/// What produced an alert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOrigin {
    /// Threshold checks on incoming readings.
    #[default]
    Automatic,
    /// Raised by an operator.
    Manual,
    /// Raised from a disease-risk prediction.
    MlPrediction,
    /// Uploaded by the field collection app.
    MobileSync,
    /// Raised by the device heartbeat monitor.
    DeviceMonitor,
}

impl TriggerOrigin {
    /// All trigger origins.
    pub const ALL: [Self; 5] = [
        Self::Automatic,
        Self::Manual,
        Self::MlPrediction,
        Self::MobileSync,
        Self::DeviceMonitor,
    ];

    /// Returns the origin as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Automatic => "automatic",
            Self::Manual => "manual",
            Self::MlPrediction => "ml_prediction",
            Self::MobileSync => "mobile_sync",
            Self::DeviceMonitor => "device_monitor",
        }
    }
}

macro_rules! impl_enum_text {
    ($($ty:ident => $what:literal),* $(,)?) => {
        $(
            impl std::fmt::Display for $ty {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    f.write_str(self.as_str())
                }
            }

            impl FromStr for $ty {
                type Err = AlertError;

                fn from_str(s: &str) -> Result<Self> {
                    Self::ALL
                        .iter()
                        .copied()
                        .find(|v| v.as_str() == s)
                        .ok_or_else(|| AlertError::ValidationFailed {
                            reason: format!("unknown {}: '{s}'", $what),
                        })
                }
            }
        )*
    };
}

impl_enum_text!(
    AlertType => "alert type",
    AlertSeverity => "severity",
    AlertStatus => "status",
    TriggerOrigin => "trigger origin",
);

/// Where an alert was observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    /// Latitude in decimal degrees.
    pub latitude: f64,
    /// Longitude in decimal degrees.
    pub longitude: f64,
    /// Administrative district.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub district: Option<String>,
    /// State or province.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl GeoLocation {
    /// Creates a location from coordinates.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            district: None,
            state: None,
        }
    }

    /// Sets the district and state.
    #[must_use]
    pub fn in_region(mut self, district: impl Into<String>, state: impl Into<String>) -> Self {
        self.district = Some(district.into());
        self.state = Some(state.into());
        self
    }

    fn validate(&self) -> Result<()> {
        if !(-90.0..=90.0).contains(&self.latitude) || !(-180.0..=180.0).contains(&self.longitude)
        {
            return Err(AlertError::ValidationFailed {
                reason: format!(
                    "coordinates out of range: ({}, {})",
                    self.latitude, self.longitude
                ),
            });
        }
        Ok(())
    }
}

/// The caller-supplied fields of a new alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAlert {
    /// The alert category.
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    /// The severity.
    pub severity: AlertSeverity,
    /// Short headline.
    pub title: String,
    /// Human-readable description.
    pub message: String,
    /// Where the event was observed.
    #[serde(default)]
    pub location: Option<GeoLocation>,
    /// The originating device.
    #[serde(default)]
    pub device_id: Option<String>,
    /// The originating sensor reading.
    #[serde(default)]
    pub reading_id: Option<String>,
    /// Initial status.
    #[serde(default)]
    pub status: AlertStatus,
    /// What produced the alert.
    #[serde(default)]
    pub triggered_by: TriggerOrigin,
    /// Free-form context.
    #[serde(default)]
    pub metadata: Metadata,
}

impl NewAlert {
    /// Maximum allowed length for alert titles.
    pub const MAX_TITLE_LENGTH: usize = 256;

    /// Creates a new active, automatically triggered alert.
    pub fn new(
        alert_type: AlertType,
        severity: AlertSeverity,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            alert_type,
            severity,
            title: title.into(),
            message: message.into(),
            location: None,
            device_id: None,
            reading_id: None,
            status: AlertStatus::Active,
            triggered_by: TriggerOrigin::Automatic,
            metadata: Metadata::new(),
        }
    }

    /// Sets the location.
    #[must_use]
    pub fn with_location(mut self, location: GeoLocation) -> Self {
        self.location = Some(location);
        self
    }

    /// Sets the originating device.
    #[must_use]
    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    /// Sets the originating reading.
    #[must_use]
    pub fn with_reading(mut self, reading_id: impl Into<String>) -> Self {
        self.reading_id = Some(reading_id.into());
        self
    }

    /// Sets the initial status.
    #[must_use]
    pub const fn with_status(mut self, status: AlertStatus) -> Self {
        self.status = status;
        self
    }

    /// Sets the trigger origin.
    #[must_use]
    pub const fn triggered_by(mut self, origin: TriggerOrigin) -> Self {
        self.triggered_by = origin;
        self
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Validates the caller-supplied fields.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::ValidationFailed` if the title is empty or too
    /// long, or the coordinates are out of range.
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(AlertError::ValidationFailed {
                reason: "alert title cannot be empty".to_string(),
            });
        }
        if self.title.len() > Self::MAX_TITLE_LENGTH {
            return Err(AlertError::ValidationFailed {
                reason: format!(
                    "alert title exceeds maximum length of {} characters",
                    Self::MAX_TITLE_LENGTH
                ),
            });
        }
        if let Some(location) = &self.location {
            location.validate()?;
        }
        Ok(())
    }

    /// Turns the input into a persisted record created at `now`.
    ///
    /// An acknowledged or resolved initial status is stamped at `now` with
    /// the trigger origin as the actor.
    #[must_use]
    pub fn into_alert(self, now: DateTime<Utc>) -> Alert {
        let initial = StatusChange::new(self.status, self.triggered_by.as_str(), now);
        let mut alert = Alert {
            id: Uuid::new_v4().to_string(),
            alert_type: self.alert_type,
            severity: self.severity,
            title: self.title,
            message: self.message,
            location: self.location,
            device_id: self.device_id,
            reading_id: self.reading_id,
            status: self.status,
            triggered_by: self.triggered_by,
            metadata: self.metadata,
            escalation_level: 0,
            auto_resolve_at: None,
            created_at: now,
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: None,
            resolved_by: None,
        };
        alert.apply_status(&initial);
        alert
    }
}

/// A persisted alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Unique identifier.
    pub id: String,
    /// The alert category.
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    /// The current severity.
    pub severity: AlertSeverity,
    /// Short headline.
    pub title: String,
    /// Human-readable description.
    pub message: String,
    /// Where the event was observed.
    pub location: Option<GeoLocation>,
    /// The originating device.
    pub device_id: Option<String>,
    /// The originating sensor reading.
    pub reading_id: Option<String>,
    /// The lifecycle status.
    pub status: AlertStatus,
    /// What produced the alert.
    pub triggered_by: TriggerOrigin,
    /// Free-form context.
    #[serde(default)]
    pub metadata: Metadata,
    /// Number of escalation steps applied so far.
    pub escalation_level: u32,
    /// When the sweeper should resolve the alert.
    pub auto_resolve_at: Option<DateTime<Utc>>,
    /// When the alert was persisted.
    pub created_at: DateTime<Utc>,
    /// When the alert was acknowledged.
    pub acknowledged_at: Option<DateTime<Utc>>,
    /// Who acknowledged the alert.
    pub acknowledged_by: Option<String>,
    /// When the alert was resolved.
    pub resolved_at: Option<DateTime<Utc>>,
    /// Who resolved the alert.
    pub resolved_by: Option<String>,
}

impl Alert {
    /// Returns true if the alert is open and unhandled.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == AlertStatus::Active
    }

    /// Returns true if the alert is active and its auto-resolve deadline has passed.
    #[must_use]
    pub fn is_auto_resolve_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.auto_resolve_at.is_some_and(|at| at <= now)
    }

    /// Returns the district, if the alert carries a location.
    #[must_use]
    pub fn district(&self) -> Option<&str> {
        self.location.as_ref().and_then(|l| l.district.as_deref())
    }

    /// Returns the state, if the alert carries a location.
    #[must_use]
    pub fn state(&self) -> Option<&str> {
        self.location.as_ref().and_then(|l| l.state.as_deref())
    }

    /// Applies a status change, stamping the audit fields of the target status.
    ///
    /// Leaving `resolved` clears `resolved_at`/`resolved_by`; the
    /// acknowledgement stamp is kept once set.
    pub fn apply_status(&mut self, change: &StatusChange) {
        self.status = change.status;
        match change.status {
            AlertStatus::Acknowledged => {
                self.acknowledged_at = Some(change.at);
                self.acknowledged_by = Some(change.actor.clone());
            }
            AlertStatus::Resolved => {
                self.resolved_at = Some(change.at);
                self.resolved_by = Some(change.actor.clone());
            }
            AlertStatus::Active | AlertStatus::Dismissed => {}
        }
        if change.status != AlertStatus::Resolved {
            self.resolved_at = None;
            self.resolved_by = None;
        }
        if let Some(notes) = &change.notes {
            self.metadata
                .insert(NOTES_KEY.to_string(), Value::String(notes.clone()));
        }
    }
}

/// A status mutation applied to one or more alerts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    /// The target status.
    pub status: AlertStatus,
    /// Who made the change.
    pub actor: String,
    /// Free-text notes merged into metadata.
    pub notes: Option<String>,
    /// When the change happened.
    pub at: DateTime<Utc>,
    /// If set, only alerts currently in one of these statuses are changed.
    pub allowed_from: Option<Vec<AlertStatus>>,
}

impl StatusChange {
    /// Creates an unguarded status change.
    pub fn new(status: AlertStatus, actor: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            status,
            actor: actor.into(),
            notes: None,
            at,
            allowed_from: None,
        }
    }

    /// Sets the notes.
    #[must_use]
    pub fn with_notes(mut self, notes: Option<String>) -> Self {
        self.notes = notes;
        self
    }

    /// Restricts the change to alerts currently in one of `statuses`.
    #[must_use]
    pub fn only_from(mut self, statuses: &[AlertStatus]) -> Self {
        self.allowed_from = Some(statuses.to_vec());
        self
    }

    /// Returns true if an alert in `current` status may take this change.
    #[must_use]
    pub fn permits(&self, current: AlertStatus) -> bool {
        self.allowed_from
            .as_ref()
            .is_none_or(|allowed| allowed.contains(&current))
    }
}

/// Outcome of one notification attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionLogStatus {
    /// The channel accepted the notification.
    Sent,
    /// The attempt failed.
    Failed,
}

/// Audit record of one attempted action dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionLog {
    /// Unique identifier.
    pub id: String,
    /// The alert the action was for.
    pub alert_id: String,
    /// The rule that configured the action.
    pub rule_id: Option<String>,
    /// The channel type (`email`, `sms`, `push`, `webhook`, `unknown`).
    pub action_type: String,
    /// Who was addressed.
    pub recipients: Vec<String>,
    /// The outcome.
    pub status: ActionLogStatus,
    /// The failure reason, set iff `status` is failed.
    pub error_message: Option<String>,
    /// The alert's escalation level at dispatch time.
    pub escalation_level: u32,
    /// When the attempt was made.
    pub created_at: DateTime<Utc>,
}

/// Processing state of an outbox entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    /// Waiting to be processed.
    Pending,
    /// Processed successfully.
    Done,
    /// Gave up after the maximum number of attempts.
    Dead,
}

/// A pending rule-processing job, written together with its alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    /// Unique identifier.
    pub id: String,
    /// The alert to process.
    pub alert_id: String,
    /// Number of failed attempts so far.
    pub attempts: u32,
    /// Processing state.
    pub status: OutboxStatus,
    /// The last failure reason.
    pub last_error: Option<String>,
    /// Earliest time the entry may be processed.
    pub available_at: DateTime<Utc>,
    /// When the entry was written.
    pub created_at: DateTime<Utc>,
}

impl OutboxEntry {
    /// Creates a pending entry for `alert_id`, available immediately.
    pub fn for_alert(alert_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            alert_id: alert_id.into(),
            attempts: 0,
            status: OutboxStatus::Pending,
            last_error: None,
            available_at: now,
            created_at: now,
        }
    }
}

/// The next escalation step due for an alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationSchedule {
    /// The alert to escalate.
    pub alert_id: String,
    /// The rule whose escalation steps apply.
    pub rule_id: String,
    /// Index into the rule's escalation steps.
    pub step: usize,
    /// When the step fires.
    pub due_at: DateTime<Utc>,
}
