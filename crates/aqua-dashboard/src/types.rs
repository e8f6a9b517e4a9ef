//! API request and response types.

use aqua_alerts::{
    AlertQuery, AlertSeverity, AlertStatus, AlertType, NewAlertRule, Result as AlertResult,
};
use serde::{Deserialize, Serialize};

/// The envelope wrapping every API response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Whether the operation succeeded.
    pub success: bool,
    /// Human-readable outcome.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Machine-readable error code, set on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// The payload, set on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    /// A successful response carrying `data`.
    pub const fn ok(data: T) -> Self {
        Self {
            success: true,
            message: None,
            code: None,
            data: Some(data),
        }
    }

    /// Attaches a message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// A failed response.
    pub fn failure(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            code: Some(code.into()),
            data: None,
        }
    }
}

impl ApiResponse<()> {
    /// A successful response with only a message.
    pub fn done(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            code: None,
            data: None,
        }
    }
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Status message.
    pub status: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Crate version.
    pub version: String,
    /// Notification channels the dispatcher can reach.
    pub channels: Vec<String>,
}

/// Query parameters of `GET /api/alerts`.
///
/// Set-valued filters take a comma-separated list, e.g. `status=active,acknowledged`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertListParams {
    /// Status filter.
    pub status: Option<String>,
    /// Alert type filter.
    #[serde(rename = "type")]
    pub alert_type: Option<String>,
    /// Severity filter.
    pub severity: Option<String>,
    /// District filter.
    pub district: Option<String>,
    /// Device filter.
    pub device_id: Option<String>,
    /// Text search.
    pub search: Option<String>,
    /// Page size.
    pub limit: Option<usize>,
    /// Rows to skip.
    pub offset: Option<usize>,
}

impl AlertListParams {
    /// Converts the parameters into a store query.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::ValidationFailed` for an unknown enum value.
    pub fn into_query(self, default_limit: usize) -> AlertResult<AlertQuery> {
        let mut query = AlertQuery::new().page(
            self.limit.unwrap_or(default_limit),
            self.offset.unwrap_or(0),
        );
        query.statuses = parse_list::<AlertStatus>(self.status.as_deref())?;
        query.types = parse_list::<AlertType>(self.alert_type.as_deref())?;
        query.severities = parse_list::<AlertSeverity>(self.severity.as_deref())?;
        query.district = self.district.filter(|d| !d.is_empty());
        query.device_id = self.device_id.filter(|d| !d.is_empty());
        query.search = self.search.filter(|s| !s.trim().is_empty());
        Ok(query)
    }
}

fn parse_list<T>(raw: Option<&str>) -> AlertResult<Vec<T>>
where
    T: std::str::FromStr<Err = aqua_alerts::AlertError>,
{
    raw.map_or_else(
        || Ok(Vec::new()),
        |raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::parse)
                .collect()
        },
    )
}

/// Body of `PATCH /api/alerts/{id}/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdateRequest {
    /// The target status.
    pub status: AlertStatus,
    /// Who is making the change.
    #[serde(default)]
    pub actor: Option<String>,
    /// Free-text notes stored in the alert metadata.
    #[serde(default)]
    pub notes: Option<String>,
}

/// Body of `POST /api/alerts/bulk-status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkStatusRequest {
    /// The alerts to update.
    pub ids: Vec<String>,
    /// The target status.
    pub status: AlertStatus,
    /// Who is making the change.
    #[serde(default)]
    pub actor: Option<String>,
}

/// Body of `POST /api/alert-rules`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRuleRequest {
    /// The rule definition.
    #[serde(flatten)]
    pub rule: NewAlertRule,
    /// Administrator creating the rule.
    #[serde(default)]
    pub created_by: Option<String>,
}

/// Outcome of `POST /api/alerts/auto-resolve`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoResolveResponse {
    /// Number of alerts resolved by the sweep.
    pub resolved: usize,
}
