//! HTTP request handlers for the dashboard API.

use std::sync::Arc;

use aqua_alerts::{
    ActionLog, Alert, AlertRule, AlertRulePatch, BulkUpdateOutcome, NewAlert,
};
use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;

use crate::error::DashboardResult;
use crate::state::DashboardState;
use crate::types::{
    AlertListParams, ApiResponse, AutoResolveResponse, BulkStatusRequest, CreateRuleRequest,
    HealthResponse, StatusUpdateRequest,
};

type Reply<T> = DashboardResult<Json<ApiResponse<T>>>;

/// Handle GET /api/health - health check endpoint.
pub async fn health_check(State(state): State<Arc<DashboardState>>) -> Json<HealthResponse> {
    let channels = state
        .engine()
        .dispatcher()
        .channel_kinds()
        .into_iter()
        .map(|kind| kind.as_str().to_string())
        .collect();

    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: state.uptime_secs(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        channels,
    })
}

// ============ Alerts ============

/// Handle GET /api/alerts - list alerts, newest first.
pub async fn list_alerts(
    State(state): State<Arc<DashboardState>>,
    params: Result<Query<AlertListParams>, QueryRejection>,
) -> Reply<Vec<Alert>> {
    let Query(params) = params?;
    let query = params.into_query(state.config().default_page_size)?;
    let alerts = state.engine().list_alerts(&query).await?;
    Ok(Json(ApiResponse::ok(alerts)))
}

/// Handle POST /api/alerts - create an alert.
pub async fn create_alert(
    State(state): State<Arc<DashboardState>>,
    body: Result<Json<NewAlert>, JsonRejection>,
) -> DashboardResult<(StatusCode, Json<ApiResponse<Alert>>)> {
    let Json(new) = body?;
    let alert = state.engine().create_alert(new).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok(alert).with_message("Alert created")),
    ))
}

/// Handle GET /api/alerts/{id} - get a specific alert.
pub async fn get_alert(
    State(state): State<Arc<DashboardState>>,
    Path(id): Path<String>,
) -> Reply<Alert> {
    let alert = state.engine().get_alert(&id).await?;
    Ok(Json(ApiResponse::ok(alert)))
}

/// Handle DELETE /api/alerts/{id} - hard-delete an alert.
pub async fn delete_alert(
    State(state): State<Arc<DashboardState>>,
    Path(id): Path<String>,
) -> Reply<()> {
    state.engine().delete_alert(&id).await?;
    Ok(Json(ApiResponse::done("Alert deleted")))
}

/// Handle PATCH /api/alerts/{id}/status - change the status of one alert.
pub async fn update_alert_status(
    State(state): State<Arc<DashboardState>>,
    Path(id): Path<String>,
    body: Result<Json<StatusUpdateRequest>, JsonRejection>,
) -> Reply<Alert> {
    let Json(request) = body?;
    let actor = state.actor_or_default(request.actor);
    let alert = state
        .engine()
        .update_alert_status(&id, request.status, &actor, request.notes)
        .await?;
    let message = format!("Alert {}", alert.status);
    Ok(Json(ApiResponse::ok(alert).with_message(message)))
}

/// Handle POST /api/alerts/bulk-status - change the status of many alerts.
pub async fn bulk_update_status(
    State(state): State<Arc<DashboardState>>,
    body: Result<Json<BulkStatusRequest>, JsonRejection>,
) -> Reply<BulkUpdateOutcome> {
    let Json(request) = body?;
    let actor = state.actor_or_default(request.actor);
    let outcome = state
        .engine()
        .bulk_update_alerts(&request.ids, request.status, &actor)
        .await?;
    let message = format!("{} of {} alerts updated", outcome.updated_count, outcome.requested);
    Ok(Json(ApiResponse::ok(outcome).with_message(message)))
}

/// Handle GET /api/alerts/{id}/actions - notification attempts for an alert.
pub async fn list_alert_actions(
    State(state): State<Arc<DashboardState>>,
    Path(id): Path<String>,
) -> Reply<Vec<ActionLog>> {
    state.engine().get_alert(&id).await?;
    let logs = state.engine().action_logs(&id).await?;
    Ok(Json(ApiResponse::ok(logs)))
}

/// Handle POST /api/alerts/auto-resolve - run one auto-resolve sweep now.
pub async fn run_auto_resolve(State(state): State<Arc<DashboardState>>) -> Reply<AutoResolveResponse> {
    let resolved = state.engine().process_auto_resolve_alerts().await?;
    Ok(Json(
        ApiResponse::ok(AutoResolveResponse { resolved })
            .with_message(format!("{resolved} alerts auto-resolved")),
    ))
}

// ============ Rules ============

/// Handle GET /api/alert-rules - list rules, newest first.
pub async fn list_rules(State(state): State<Arc<DashboardState>>) -> Reply<Vec<AlertRule>> {
    let rules = state.registry().list().await?;
    Ok(Json(ApiResponse::ok(rules)))
}

/// Handle POST /api/alert-rules - create a rule.
pub async fn create_rule(
    State(state): State<Arc<DashboardState>>,
    body: Result<Json<CreateRuleRequest>, JsonRejection>,
) -> DashboardResult<(StatusCode, Json<ApiResponse<AlertRule>>)> {
    let Json(request) = body?;
    let created_by = state.actor_or_default(request.created_by);
    let rule = state.registry().create(request.rule, &created_by).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok(rule).with_message("Rule created")),
    ))
}

/// Handle GET /api/alert-rules/{id} - get a specific rule.
pub async fn get_rule(
    State(state): State<Arc<DashboardState>>,
    Path(id): Path<String>,
) -> Reply<AlertRule> {
    let rule = state.registry().get(&id).await?;
    Ok(Json(ApiResponse::ok(rule)))
}

/// Handle PATCH /api/alert-rules/{id} - partially update a rule.
pub async fn update_rule(
    State(state): State<Arc<DashboardState>>,
    Path(id): Path<String>,
    body: Result<Json<AlertRulePatch>, JsonRejection>,
) -> Reply<AlertRule> {
    let Json(patch) = body?;
    let rule = state.registry().update(&id, patch).await?;
    Ok(Json(ApiResponse::ok(rule).with_message("Rule updated")))
}

/// Handle DELETE /api/alert-rules/{id} - delete a rule.
pub async fn delete_rule(
    State(state): State<Arc<DashboardState>>,
    Path(id): Path<String>,
) -> Reply<()> {
    state.registry().delete(&id).await?;
    Ok(Json(ApiResponse::done("Rule deleted")))
}
