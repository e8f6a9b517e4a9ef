//! HTTP listener for the alert API.

use std::net::SocketAddr;
use std::sync::Arc;

use aqua_alerts::{AlertEngine, RuleRegistry};
use tokio::net::TcpListener;
use tracing::info;

use crate::config::DashboardConfig;
use crate::error::{DashboardError, DashboardResult};
use crate::routes::create_router;
use crate::state::DashboardState;

/// Serves the alert API over one engine and rule registry.
#[derive(Debug, Clone)]
pub struct DashboardServer {
    state: Arc<DashboardState>,
}

impl DashboardServer {
    /// Create a new dashboard server over an engine and rule registry.
    #[must_use]
    pub fn new(
        config: DashboardConfig,
        engine: Arc<AlertEngine>,
        registry: Arc<RuleRegistry>,
    ) -> Self {
        let state = Arc::new(DashboardState::new(config, engine, registry));
        Self { state }
    }

    /// Shared handler state.
    #[must_use]
    pub fn state(&self) -> Arc<DashboardState> {
        self.state.clone()
    }

    /// Serve on the configured address until a fatal error.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn serve(&self) -> DashboardResult<()> {
        let (listener, addr) = self.bind().await?;
        info!(addr = %addr, "Dashboard server listening");

        axum::serve(listener, self.router())
            .await
            .map_err(|e| DashboardError::Internal(e.to_string()))?;

        Ok(())
    }

    /// Serve until `shutdown` completes, then drain in-flight requests.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn serve_with_shutdown<F>(&self, shutdown: F) -> DashboardResult<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let (listener, addr) = self.bind().await?;
        info!(addr = %addr, "Dashboard server listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| DashboardError::Internal(e.to_string()))?;

        info!("Dashboard server shut down");
        Ok(())
    }

    async fn bind(&self) -> DashboardResult<(TcpListener, SocketAddr)> {
        let addr = self.state.config().bind_addr;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| DashboardError::BindFailed(addr, e))?;
        let local = listener.local_addr().unwrap_or(addr);
        Ok((listener, local))
    }

    /// The API router, without a listener.
    pub fn router(&self) -> axum::Router {
        create_router(self.state.clone())
    }
}
