//! Route configuration for the dashboard API.

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, patch, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers::{
    bulk_update_status, create_alert, create_rule, delete_alert, delete_rule, get_alert, get_rule,
    health_check, list_alert_actions, list_alerts, list_rules, run_auto_resolve, update_alert_status,
    update_rule,
};
use crate::state::DashboardState;

/// Create the dashboard API router.
pub fn create_router(state: Arc<DashboardState>) -> Router {
    let cors = build_cors_layer(state.config());

    let api_routes = Router::new()
        // Health check
        .route("/health", get(health_check))
        // Alert endpoints
        .route("/alerts", get(list_alerts).post(create_alert))
        .route("/alerts/bulk-status", post(bulk_update_status))
        .route("/alerts/auto-resolve", post(run_auto_resolve))
        .route("/alerts/{id}", get(get_alert).delete(delete_alert))
        .route("/alerts/{id}/status", patch(update_alert_status))
        .route("/alerts/{id}/actions", get(list_alert_actions))
        // Rule endpoints
        .route("/alert-rules", get(list_rules).post(create_rule))
        .route(
            "/alert-rules/{id}",
            get(get_rule).patch(update_rule).delete(delete_rule),
        );

    Router::new()
        .nest("/api", api_routes)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Build the CORS layer based on configuration.
fn build_cors_layer(config: &crate::config::DashboardConfig) -> CorsLayer {
    if config.cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aqua_alerts::{
        AlertEngine, Dispatcher, EngineConfig, ManualClock, MemoryStore, RuleRegistry,
        TransitionPolicy,
    };
    use axum::body::Body;
    use axum::http::{Request, Response, StatusCode};
    use chrono::{Duration as ChronoDuration, Utc};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use crate::config::DashboardConfig;

    struct TestApp {
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        engine: Arc<AlertEngine>,
        router: Router,
    }

    fn make_app_with(engine_config: EngineConfig, config: DashboardConfig) -> TestApp {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let dispatcher = Arc::new(Dispatcher::with_stub_channels(store.clone(), clock.clone()));
        let registry = Arc::new(RuleRegistry::new(store.clone(), clock.clone()));
        let engine = Arc::new(AlertEngine::new(
            store.clone(),
            dispatcher,
            clock.clone(),
            engine_config,
        ));
        let state = Arc::new(DashboardState::new(config, Arc::clone(&engine), registry));
        TestApp {
            store,
            clock,
            engine,
            router: create_router(state),
        }
    }

    fn make_app() -> TestApp {
        make_app_with(EngineConfig::default(), DashboardConfig::default())
    }

    async fn send(app: &TestApp, method: &str, uri: &str, body: Option<Value>) -> Response<Body> {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        app.router.clone().oneshot(request).await.unwrap()
    }

    async fn body_json(response: Response<Body>) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn alert_body(title: &str) -> Value {
        json!({
            "type": "water_quality",
            "severity": "high",
            "title": title,
            "message": "Turbidity 12 NTU",
            "location": { "latitude": 13.13, "longitude": 78.13, "district": "Kolar", "state": "Karnataka" },
            "device_id": "dev-42",
            "metadata": { "turbidity": 12.0 }
        })
    }

    async fn create(app: &TestApp, title: &str) -> String {
        let response = send(app, "POST", "/api/alerts", Some(alert_body(title))).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        body_json(response).await["data"]["id"]
            .as_str()
            .unwrap()
            .to_string()
    }

    mod health_tests {
        use super::*;

        #[tokio::test]
        async fn test_health_endpoint() {
            let app = make_app();
            let response = send(&app, "GET", "/api/health", None).await;

            assert_eq!(response.status(), StatusCode::OK);
            let json = body_json(response).await;
            assert_eq!(json["status"], "ok");
            assert_eq!(json["channels"], json!(["email", "push", "sms", "webhook"]));
        }

        #[tokio::test]
        async fn test_unknown_endpoint() {
            let app = make_app();
            let response = send(&app, "GET", "/api/unknown", None).await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }

        #[tokio::test]
        async fn test_cors_any_origin() {
            let app = make_app();
            let request = Request::builder()
                .method("OPTIONS")
                .uri("/api/health")
                .header("Origin", "http://example.com")
                .header("Access-Control-Request-Method", "GET")
                .body(Body::empty())
                .unwrap();

            let response = app.router.clone().oneshot(request).await.unwrap();
            assert!(response.status().is_success());
            assert_eq!(
                response.headers()["access-control-allow-origin"],
                "*"
            );
        }

        #[tokio::test]
        async fn test_cors_specific_origins() {
            let app = make_app_with(
                EngineConfig::default(),
                DashboardConfig::default().with_cors_origin("http://localhost:3000"),
            );
            let request = Request::builder()
                .method("OPTIONS")
                .uri("/api/alerts")
                .header("Origin", "http://localhost:3000")
                .header("Access-Control-Request-Method", "GET")
                .body(Body::empty())
                .unwrap();

            let response = app.router.clone().oneshot(request).await.unwrap();
            assert_eq!(
                response.headers()["access-control-allow-origin"],
                "http://localhost:3000"
            );
        }
    }

    mod alert_tests {
        use super::*;

        #[tokio::test]
        async fn test_create_and_get_alert() {
            let app = make_app();
            let id = create(&app, "High turbidity").await;

            let response = send(&app, "GET", &format!("/api/alerts/{id}"), None).await;
            assert_eq!(response.status(), StatusCode::OK);
            let json = body_json(response).await;
            assert_eq!(json["success"], true);
            assert_eq!(json["data"]["status"], "active");
            assert_eq!(json["data"]["escalation_level"], 0);
            assert_eq!(json["data"]["type"], "water_quality");
        }

        #[tokio::test]
        async fn test_create_rejects_blank_title() {
            let app = make_app();
            let response = send(&app, "POST", "/api/alerts", Some(alert_body(" "))).await;

            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            let json = body_json(response).await;
            assert_eq!(json["success"], false);
            assert_eq!(json["code"], "validation_failed");
            assert_eq!(app.store.alert_count(), 0);
        }

        #[tokio::test]
        async fn test_create_rejects_malformed_body() {
            let app = make_app();
            let response = send(&app, "POST", "/api/alerts", Some(json!({ "title": 3 }))).await;

            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            assert_eq!(body_json(response).await["success"], false);
        }

        #[tokio::test]
        async fn test_get_missing_alert() {
            let app = make_app();
            let response = send(&app, "GET", "/api/alerts/nope", None).await;

            assert_eq!(response.status(), StatusCode::NOT_FOUND);
            assert_eq!(body_json(response).await["code"], "not_found");
        }

        #[tokio::test]
        async fn test_list_with_filters() {
            let app = make_app();
            let first = create(&app, "First").await;
            app.clock.advance(ChronoDuration::seconds(1));
            create(&app, "Second").await;
            send(
                &app,
                "PATCH",
                &format!("/api/alerts/{first}/status"),
                Some(json!({ "status": "resolved" })),
            )
            .await;

            let response = send(&app, "GET", "/api/alerts?status=active&district=Kolar", None).await;
            let json = body_json(response).await;
            let titles: Vec<&str> = json["data"]
                .as_array()
                .unwrap()
                .iter()
                .map(|a| a["title"].as_str().unwrap())
                .collect();
            assert_eq!(titles, vec!["Second"]);

            let response = send(&app, "GET", "/api/alerts?limit=1&offset=1", None).await;
            let json = body_json(response).await;
            assert_eq!(json["data"][0]["title"], "First");
        }

        #[tokio::test]
        async fn test_list_rejects_unknown_severity() {
            let app = make_app();
            let response = send(&app, "GET", "/api/alerts?severity=urgent", None).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }

        #[tokio::test]
        async fn test_delete_alert() {
            let app = make_app();
            let id = create(&app, "Doomed").await;

            let response = send(&app, "DELETE", &format!("/api/alerts/{id}"), None).await;
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(app.store.alert_count(), 0);

            let response = send(&app, "DELETE", &format!("/api/alerts/{id}"), None).await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }

        #[tokio::test]
        async fn test_store_outage_is_unavailable() {
            let app = make_app();
            app.store.set_available(false);

            let response = send(&app, "GET", "/api/alerts", None).await;
            assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
            let json = body_json(response).await;
            assert_eq!(json["success"], false);
            assert_eq!(json["code"], "store_unavailable");
        }
    }

    mod status_tests {
        use super::*;

        #[tokio::test]
        async fn test_acknowledge_with_notes() {
            let app = make_app();
            let id = create(&app, "High turbidity").await;

            let response = send(
                &app,
                "PATCH",
                &format!("/api/alerts/{id}/status"),
                Some(json!({ "status": "acknowledged", "actor": "op-7", "notes": "crew sent" })),
            )
            .await;

            assert_eq!(response.status(), StatusCode::OK);
            let json = body_json(response).await;
            assert_eq!(json["data"]["status"], "acknowledged");
            assert_eq!(json["data"]["acknowledged_by"], "op-7");
            assert_eq!(json["data"]["metadata"]["notes"], "crew sent");
        }

        #[tokio::test]
        async fn test_missing_actor_uses_default() {
            let app = make_app();
            let id = create(&app, "High turbidity").await;

            let response = send(
                &app,
                "PATCH",
                &format!("/api/alerts/{id}/status"),
                Some(json!({ "status": "resolved" })),
            )
            .await;
            let json = body_json(response).await;
            assert_eq!(json["data"]["resolved_by"], "dashboard");
        }

        #[tokio::test]
        async fn test_status_of_missing_alert() {
            let app = make_app();
            let response = send(
                &app,
                "PATCH",
                "/api/alerts/nope/status",
                Some(json!({ "status": "resolved" })),
            )
            .await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }

        #[tokio::test]
        async fn test_strict_policy_conflict() {
            let app = make_app_with(
                EngineConfig {
                    transition_policy: TransitionPolicy::Strict,
                    ..EngineConfig::default()
                },
                DashboardConfig::default(),
            );
            let id = create(&app, "High turbidity").await;
            let uri = format!("/api/alerts/{id}/status");
            send(&app, "PATCH", &uri, Some(json!({ "status": "resolved" }))).await;

            let response = send(&app, "PATCH", &uri, Some(json!({ "status": "acknowledged" }))).await;
            assert_eq!(response.status(), StatusCode::CONFLICT);
            assert_eq!(body_json(response).await["code"], "invalid_transition");
        }

        #[tokio::test]
        async fn test_bulk_update_counts_existing_rows() {
            let app = make_app();
            let a1 = create(&app, "One").await;
            let a2 = create(&app, "Two").await;

            let response = send(
                &app,
                "POST",
                "/api/alerts/bulk-status",
                Some(json!({ "ids": [a1, a2, "missing-id"], "status": "resolved" })),
            )
            .await;

            assert_eq!(response.status(), StatusCode::OK);
            let json = body_json(response).await;
            assert_eq!(json["success"], true);
            assert_eq!(json["data"]["requested"], 3);
            assert_eq!(json["data"]["updated_count"], 2);
        }

        #[tokio::test]
        async fn test_auto_resolve_sweep() {
            let app = make_app();
            send(
                &app,
                "POST",
                "/api/alert-rules",
                Some(json!({
                    "name": "Turbidity",
                    "type": "water_quality",
                    "severity": "high",
                    "actions": [{ "type": "email", "recipients": ["x@gov.in"] }],
                    "auto_resolve_after_minutes": 30
                })),
            )
            .await;
            let id = create(&app, "High turbidity").await;
            app.engine.drain_outbox().await.unwrap();

            let response = send(&app, "GET", &format!("/api/alerts/{id}/actions"), None).await;
            let json = body_json(response).await;
            assert_eq!(json["data"][0]["status"], "sent");
            assert_eq!(json["data"][0]["action_type"], "email");

            let response = send(&app, "POST", "/api/alerts/auto-resolve", None).await;
            assert_eq!(body_json(response).await["data"]["resolved"], 0);

            app.clock.advance(ChronoDuration::minutes(30));
            let response = send(&app, "POST", "/api/alerts/auto-resolve", None).await;
            assert_eq!(body_json(response).await["data"]["resolved"], 1);

            let json = body_json(send(&app, "GET", &format!("/api/alerts/{id}"), None).await).await;
            assert_eq!(json["data"]["status"], "resolved");
            assert_eq!(json["data"]["resolved_by"], "system");
        }

        #[tokio::test]
        async fn test_actions_of_missing_alert() {
            let app = make_app();
            let response = send(&app, "GET", "/api/alerts/nope/actions", None).await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }
    }

    mod rule_tests {
        use super::*;

        fn rule_body(name: &str) -> Value {
            json!({
                "name": name,
                "type": "device_offline",
                "severity": "critical",
                "actions": [
                    { "type": "sms", "recipients": ["+919800000000"] },
                    { "type": "webhook", "recipients": ["https://hooks.aquaguard.in/ops"], "method": "POST" }
                ],
                "escalation_rules": [
                    { "delay_minutes": 15, "severity_increase": false, "additional_recipients": ["+919811111111"] }
                ],
                "created_by": "admin-1"
            })
        }

        async fn create_rule(app: &TestApp, name: &str) -> Value {
            let response = send(app, "POST", "/api/alert-rules", Some(rule_body(name))).await;
            assert_eq!(response.status(), StatusCode::CREATED);
            body_json(response).await["data"].clone()
        }

        #[tokio::test]
        async fn test_create_and_get_rule() {
            let app = make_app();
            let rule = create_rule(&app, "Sensor offline").await;
            assert_eq!(rule["created_by"], "admin-1");
            assert_eq!(rule["enabled"], true);

            let id = rule["id"].as_str().unwrap();
            let response = send(&app, "GET", &format!("/api/alert-rules/{id}"), None).await;
            let json = body_json(response).await;
            assert_eq!(json["data"]["actions"][1]["type"], "webhook");
            assert_eq!(json["data"]["escalation_rules"][0]["delay_minutes"], 15);
        }

        #[tokio::test]
        async fn test_create_rule_rejects_blank_name() {
            let app = make_app();
            let response = send(&app, "POST", "/api/alert-rules", Some(rule_body(""))).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }

        #[tokio::test]
        async fn test_patch_rule() {
            let app = make_app();
            let rule = create_rule(&app, "Sensor offline").await;
            let id = rule["id"].as_str().unwrap();

            let response = send(
                &app,
                "PATCH",
                &format!("/api/alert-rules/{id}"),
                Some(json!({ "enabled": false, "auto_resolve_after_minutes": 45 })),
            )
            .await;

            assert_eq!(response.status(), StatusCode::OK);
            let json = body_json(response).await;
            assert_eq!(json["data"]["enabled"], false);
            assert_eq!(json["data"]["auto_resolve_after_minutes"], 45);
            assert_eq!(json["data"]["name"], "Sensor offline");
        }

        #[tokio::test]
        async fn test_list_and_delete_rules() {
            let app = make_app();
            create_rule(&app, "First").await;
            app.clock.advance(ChronoDuration::seconds(1));
            let second = create_rule(&app, "Second").await;

            let json = body_json(send(&app, "GET", "/api/alert-rules", None).await).await;
            assert_eq!(json["data"][0]["name"], "Second");
            assert_eq!(json["data"].as_array().unwrap().len(), 2);

            let id = second["id"].as_str().unwrap();
            let response = send(&app, "DELETE", &format!("/api/alert-rules/{id}"), None).await;
            assert_eq!(response.status(), StatusCode::OK);

            let response = send(&app, "GET", &format!("/api/alert-rules/{id}"), None).await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }
    }
}
