//! # aqua-dashboard
//!
//! REST API behind the AquaGuard alert dashboard.
//!
//! This crate exposes the alert lifecycle engine from `aqua-alerts` over
//! HTTP, built on top of the axum HTTP framework. Every response body is an
//! envelope of the form `{ success, message?, code?, data? }`.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use aqua_alerts::{AlertEngine, Dispatcher, EngineConfig, MemoryStore, RuleRegistry, SystemClock};
//! use aqua_dashboard::{DashboardConfig, DashboardServer};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = Arc::new(MemoryStore::new());
//!     let clock = Arc::new(SystemClock);
//!     let dispatcher = Arc::new(Dispatcher::with_stub_channels(store.clone(), clock.clone()));
//!     let registry = Arc::new(RuleRegistry::new(store.clone(), clock.clone()));
//!     let engine = Arc::new(AlertEngine::new(store, dispatcher, clock, EngineConfig::default()));
//!
//!     let server = DashboardServer::new(DashboardConfig::default(), engine, registry);
//!     // server.serve().await.unwrap();
//! }
//! ```
//!
//! ## API Endpoints
//!
//! | Endpoint | Method | Description |
//! |----------|--------|-------------|
//! | `/api/health` | GET | Liveness and uptime |
//! | `/api/alerts` | GET / POST | List alerts with filters / create an alert |
//! | `/api/alerts/{id}` | GET / DELETE | Get / delete an alert |
//! | `/api/alerts/{id}/status` | PATCH | Acknowledge, resolve or dismiss |
//! | `/api/alerts/{id}/actions` | GET | Notification attempts for an alert |
//! | `/api/alerts/bulk-status` | POST | Change the status of many alerts |
//! | `/api/alerts/auto-resolve` | POST | Run one auto-resolve sweep |
//! | `/api/alert-rules` | GET / POST | List / create rules |
//! | `/api/alert-rules/{id}` | GET / PATCH / DELETE | Get / update / delete a rule |

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod server;
pub mod state;
pub mod types;

// Re-export main types
pub use config::DashboardConfig;
pub use error::{DashboardError, DashboardResult};
pub use routes::create_router;
pub use server::DashboardServer;
pub use state::DashboardState;
pub use types::{
    AlertListParams, ApiResponse, AutoResolveResponse, BulkStatusRequest, CreateRuleRequest,
    HealthResponse, StatusUpdateRequest,
};
