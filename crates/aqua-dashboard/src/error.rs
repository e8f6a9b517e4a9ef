//! Error types for the dashboard server.

use aqua_alerts::{AlertError, ErrorKind};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use tracing::warn;

use crate::types::ApiResponse;

/// Result type alias for dashboard operations.
pub type DashboardResult<T> = Result<T, DashboardError>;

/// Errors that can occur in the dashboard server.
#[derive(Debug, Error)]
pub enum DashboardError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to {0}: {1}")]
    BindFailed(std::net::SocketAddr, std::io::Error),

    /// The alert engine reported an error.
    #[error(transparent)]
    Alert(#[from] AlertError),

    /// Invalid request parameters.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl DashboardError {
    /// Returns the HTTP status and the machine-readable code for this error.
    #[must_use]
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Alert(err) => {
                let kind = err.kind();
                (status_for(kind), kind.as_str())
            }
            Self::InvalidRequest(_) => (
                StatusCode::BAD_REQUEST,
                ErrorKind::ValidationFailed.as_str(),
            ),
            Self::BindFailed(_, _) | Self::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        }
    }
}

/// Maps an engine error kind to an HTTP status.
#[must_use]
pub const fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::ValidationFailed => StatusCode::BAD_REQUEST,
        ErrorKind::InvalidTransition => StatusCode::CONFLICT,
        ErrorKind::StoreUnavailable | ErrorKind::StoreTimeout => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::ActionDispatchFailed | ErrorKind::RuleEvaluation | ErrorKind::Serialization => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for DashboardError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            warn!(code, error = %self, "Request failed");
        }

        let body: ApiResponse<()> = ApiResponse::failure(self.to_string(), code);
        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for DashboardError {
    fn from(rejection: JsonRejection) -> Self {
        Self::InvalidRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for DashboardError {
    fn from(rejection: QueryRejection) -> Self {
        Self::InvalidRequest(rejection.body_text())
    }
}
