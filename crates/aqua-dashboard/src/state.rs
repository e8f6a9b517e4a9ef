//! Shared state for the dashboard server.

use std::sync::Arc;
use std::time::Instant;

use aqua_alerts::{AlertEngine, RuleRegistry};

use crate::config::DashboardConfig;

/// Shared state for the dashboard server.
#[derive(Debug)]
pub struct DashboardState {
    /// Dashboard configuration.
    config: Arc<DashboardConfig>,
    /// Alert lifecycle engine.
    engine: Arc<AlertEngine>,
    /// Rule CRUD.
    registry: Arc<RuleRegistry>,
    /// Server start time.
    start_time: Instant,
}

impl DashboardState {
    /// Create a new dashboard state.
    pub fn new(
        config: DashboardConfig,
        engine: Arc<AlertEngine>,
        registry: Arc<RuleRegistry>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            engine,
            registry,
            start_time: Instant::now(),
        }
    }

    /// Get the configuration.
    #[must_use]
    pub fn config(&self) -> &DashboardConfig {
        &self.config
    }

    /// Get the alert engine.
    #[must_use]
    pub fn engine(&self) -> &AlertEngine {
        &self.engine
    }

    /// Get the rule registry.
    #[must_use]
    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    /// Get the server uptime in seconds.
    #[must_use]
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Returns the given actor, or the configured fallback when blank.
    #[must_use]
    pub fn actor_or_default(&self, actor: Option<String>) -> String {
        actor
            .filter(|a| !a.trim().is_empty())
            .unwrap_or_else(|| self.config.default_actor.clone())
    }
}
