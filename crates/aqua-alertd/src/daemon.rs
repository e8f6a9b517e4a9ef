//! Wiring of store, engine, workers and dashboard into one process.

use std::future::Future;
use std::sync::Arc;

use aqua_alerts::{
    AlertEngine, BackgroundWorkers, Clock, Dispatcher, EmailChannel, MemoryStore, PushChannel,
    Result as AlertResult, RuleRegistry, SmsChannel, SystemClock, WebhookChannel,
};
use aqua_dashboard::{DashboardResult, DashboardServer};
use tokio::sync::watch;
use tracing::info;

use crate::config::{AlertdConfig, ChannelsConfig};

/// Actor recorded on rules seeded from the config file.
pub const SEED_ACTOR: &str = "config";

/// The assembled daemon.
#[derive(Debug)]
pub struct Daemon {
    config: AlertdConfig,
    store: Arc<MemoryStore>,
    engine: Arc<AlertEngine>,
    server: DashboardServer,
}

impl Daemon {
    /// Builds every component and seeds the configured rules.
    ///
    /// # Errors
    ///
    /// Returns an error if a seed rule is rejected.
    pub async fn build(config: AlertdConfig) -> AlertResult<Self> {
        Self::build_with_clock(config, Arc::new(SystemClock)).await
    }

    /// Like [`Daemon::build`], with an explicit clock.
    ///
    /// # Errors
    ///
    /// Returns an error if a seed rule is rejected.
    pub async fn build_with_clock(config: AlertdConfig, clock: Arc<dyn Clock>) -> AlertResult<Self> {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = Arc::new(
            channels(&config.channels, Dispatcher::new(store.clone(), clock.clone()))
                .with_timeout(config.engine.dispatch_timeout()),
        );
        let registry = Arc::new(
            RuleRegistry::new(store.clone(), clock.clone())
                .with_timeout(config.engine.store_timeout()),
        );
        let engine = Arc::new(AlertEngine::new(
            store.clone(),
            dispatcher,
            clock,
            config.engine.clone(),
        ));

        for rule in config.rules.clone() {
            registry.create(rule, SEED_ACTOR).await?;
        }
        info!(count = config.rules.len(), "Seeded alert rules");

        let server = DashboardServer::new(config.server.clone(), Arc::clone(&engine), registry);
        Ok(Self {
            config,
            store,
            engine,
            server,
        })
    }

    /// Returns the engine.
    #[must_use]
    pub fn engine(&self) -> Arc<AlertEngine> {
        Arc::clone(&self.engine)
    }

    /// Returns the store.
    #[must_use]
    pub fn store(&self) -> Arc<MemoryStore> {
        Arc::clone(&self.store)
    }

    /// Serves the dashboard and runs the background workers until
    /// `shutdown` completes, then stops the workers.
    ///
    /// # Errors
    ///
    /// Returns an error if the dashboard cannot bind or fails while serving.
    pub async fn run<F>(self, shutdown: F) -> DashboardResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let workers = BackgroundWorkers::spawn(Arc::clone(&self.engine), &self.config.workers, stop_rx);

        let served = self.server.serve_with_shutdown(shutdown).await;

        let _ = stop_tx.send(true);
        workers.join().await;
        info!("Alert daemon stopped");
        served
    }
}

fn channels(config: &ChannelsConfig, dispatcher: Dispatcher) -> Dispatcher {
    dispatcher
        .with_channel(Arc::new(
            EmailChannel::new(config.email.from.clone()).enabled(config.email.enabled),
        ))
        .with_channel(Arc::new(
            SmsChannel::new(config.sms.sender_id.clone()).enabled(config.sms.enabled),
        ))
        .with_channel(Arc::new(PushChannel::new().enabled(config.push.enabled)))
        .with_channel(Arc::new(WebhookChannel::new().enabled(config.webhook.enabled)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::time::Duration;

    use aqua_alerts::{ActionKind, AlertSeverity, AlertStore, AlertType, ManualClock, NewAlert};

    use crate::config::SAMPLE_CONFIG;

    fn sample() -> AlertdConfig {
        let mut config = AlertdConfig::from_toml(SAMPLE_CONFIG).unwrap();
        config.server.bind_addr = SocketAddr::from(([127, 0, 0, 1], 0));
        config
    }

    #[tokio::test]
    async fn test_build_seeds_rules() {
        let daemon = Daemon::build(sample()).await.unwrap();

        let rules = daemon.store().list_rules().await.unwrap();
        assert_eq!(rules.len(), 2);
        assert!(rules.iter().all(|r| r.created_by == SEED_ACTOR));
    }

    #[tokio::test]
    async fn test_seeded_rule_drives_notifications() {
        let clock = Arc::new(ManualClock::default());
        let daemon = Daemon::build_with_clock(sample(), clock).await.unwrap();
        let engine = daemon.engine();

        let alert = engine
            .create_alert(
                NewAlert::new(
                    AlertType::DeviceOffline,
                    AlertSeverity::Critical,
                    "Sensor offline",
                    "No heartbeat",
                )
                .with_device("dev-9"),
            )
            .await
            .unwrap();
        engine.drain_outbox().await.unwrap();

        let logs = engine.action_logs(&alert.id).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].action_type, "sms");
        assert_eq!(logs[0].recipients, vec!["+919800000000".to_string()]);
    }

    #[tokio::test]
    async fn test_all_channels_registered() {
        let daemon = Daemon::build(sample()).await.unwrap();
        let kinds: Vec<&str> = daemon
            .engine()
            .dispatcher()
            .channel_kinds()
            .iter()
            .map(ActionKind::as_str)
            .collect();

        // Disabled channels stay registered and skip sends
        assert_eq!(kinds, vec!["email", "push", "sms", "webhook"]);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let daemon = Daemon::build(sample()).await.unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let handle = tokio::spawn(daemon.run(async move {
            let _ = rx.await;
        }));
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = tx.send(());

        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
