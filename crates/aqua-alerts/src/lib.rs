//! Alert lifecycle engine for AquaGuard water-quality monitoring.
//!
//! `aqua-alerts` persists alerts raised by sensors, operators and automated
//! analysis, applies administrator-defined rules to them and tracks every
//! notification it attempts.
//!
//! # Features
//!
//! - **Alert Rules**: Match alerts by type and severity, optionally gated by conditions
//! - **Notification Channels**: Email, SMS, push and webhook, with one audit row per attempt
//! - **Status Lifecycle**: Acknowledge, resolve and dismiss alerts one at a time or in bulk
//! - **Escalation**: Raise level and severity of alerts left unattended
//! - **Auto-Resolve**: Close alerts whose matching rule sets a deadline
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use aqua_alerts::{
//!     AlertEngine, AlertSeverity, AlertType, Dispatcher, EngineConfig, MemoryStore, NewAlert,
//!     NewAlertRule, RuleAction, RuleRegistry, SystemClock,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> aqua_alerts::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! let clock = Arc::new(SystemClock);
//! let dispatcher = Arc::new(Dispatcher::with_stub_channels(store.clone(), clock.clone()));
//! let registry = RuleRegistry::new(store.clone(), clock.clone());
//! let engine = AlertEngine::new(store, dispatcher, clock, EngineConfig::default());
//!
//! // Email the district officer about every high water-quality alert
//! let rule = NewAlertRule::builder("Turbidity", AlertType::WaterQuality, AlertSeverity::High)
//!     .action(RuleAction::email(vec!["officer@district.gov.in".to_string()]))
//!     .auto_resolve_after_minutes(120)
//!     .build()?;
//! registry.create(rule, "admin").await?;
//!
//! let alert = engine
//!     .create_alert(NewAlert::new(
//!         AlertType::WaterQuality,
//!         AlertSeverity::High,
//!         "High turbidity",
//!         "Turbidity reached 12 NTU",
//!     ))
//!     .await?;
//!
//! // Rule processing runs from the outbox, normally in a background worker
//! let report = engine.drain_outbox().await?;
//! assert_eq!(report.completed, 1);
//! assert_eq!(engine.action_logs(&alert.id).await?.len(), 1);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod clock;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod escalation;
pub mod memory;
pub mod outbox;
pub mod registry;
pub mod rule;
pub mod store;
pub mod types;
pub mod worker;

// Re-export main types at crate root
pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatcher::{
    Dispatcher, EmailChannel, Notification, NotificationChannel, NotificationResult, PushChannel,
    SmsChannel, WebhookChannel,
};
pub use engine::{
    AlertEngine, BulkUpdateOutcome, EngineConfig, EscalationMode, ProcessingReport,
    TransitionPolicy,
};
pub use error::{AlertError, ErrorKind, Result};
pub use escalation::EscalationReport;
pub use memory::MemoryStore;
pub use outbox::OutboxReport;
pub use registry::RuleRegistry;
pub use rule::{
    ActionKind, AlertRule, AlertRuleBuilder, AlertRulePatch, ChannelConfig, ConditionOperator,
    ConditionValue, EscalationStep, NewAlertRule, RuleAction, RuleCondition,
};
pub use store::{AlertQuery, AlertStore};
pub use types::{
    ActionLog, ActionLogStatus, Alert, AlertSeverity, AlertStatus, AlertType, GeoLocation,
    NewAlert, StatusChange, TriggerOrigin,
};
pub use worker::{BackgroundWorkers, WorkerConfig};
