//! Daemon startup: backend selection, reconciliation and the HTTP listeners.

use crate::api::{self, ControlContext};
use crate::http_server::MetricsServer;
use crate::metrics::MetricsRegistry;
use crate::registry::Registry;
use crate::types::{BackendKind, DaemonConfig};
use common::Result;
use routing::{IpRoute2, MemoryRouting, RoutingBackend, ThrottledRouting};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Environment variable that forces the throttled backend when non-empty
pub const SLOW_ROUTING_ENV: &str = "SLOW_ROUTING";

/// Whether route changes should go through the throttling wrapper.
pub fn throttle_enabled(configured: bool, slow_routing: Option<&str>) -> bool {
    configured || slow_routing.is_some_and(|v| !v.is_empty())
}

/// Failover daemon
pub struct FailoverDaemon {
    config: DaemonConfig,
}

impl FailoverDaemon {
    pub fn new(config: DaemonConfig) -> Self {
        Self { config }
    }

    /// Routing backend as configured, wrapped for throttling if requested.
    pub fn build_backend(&self) -> Arc<dyn RoutingBackend> {
        let routing = &self.config.routing;

        let backend: Arc<dyn RoutingBackend> = match routing.backend {
            BackendKind::Iproute2 => Arc::new(IpRoute2::new(routing.ip_binary.clone())),
            BackendKind::Memory => {
                warn!("Using in-memory routing backend, no routes will be changed");
                Arc::new(MemoryRouting::new())
            }
        };

        let slow_routing = std::env::var(SLOW_ROUTING_ENV).ok();
        if throttle_enabled(routing.throttle, slow_routing.as_deref()) {
            info!(settle_delay = ?routing.settle_delay, "Route changes are throttled");
            Arc::new(ThrottledRouting::new(backend, routing.settle_delay))
        } else {
            backend
        }
    }

    /// Build the registry on top of `backend` and import existing routes.
    ///
    /// # Errors
    ///
    /// Fails on an invalid server list or if any route query fails.
    pub async fn prepare(
        &self,
        backend: Arc<dyn RoutingBackend>,
        metrics: Option<Arc<MetricsRegistry>>,
    ) -> Result<Arc<ControlContext>> {
        let registry = Registry::new(&self.config.servers)?;
        info!(
            servers = self.config.servers.len(),
            addresses = registry.len(),
            backend = backend.name(),
            "Registry built"
        );

        let report = registry.reconcile(&backend).await?;
        info!(
            imported = report.imported,
            absent = report.absent,
            foreign = report.foreign,
            "Reconciled existing routes"
        );

        let ctx = Arc::new(ControlContext::new(registry, backend, metrics));
        if let Some(ref m) = ctx.metrics {
            m.record_reconcile(&report);
        }
        ctx.refresh_routed_gauge().await;

        Ok(ctx)
    }

    /// Run until Ctrl-C.
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(self.config.listen).await?;
        self.serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Serve the control API on `listener` until `shutdown` completes.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!("Starting failover daemon");

        let metrics = if self.config.metrics_enabled {
            info!("Metrics enabled on {}", self.config.metrics_listen_addr);
            Some(Arc::new(MetricsRegistry::new()))
        } else {
            info!("Metrics disabled");
            None
        };

        let backend = self.build_backend();
        let ctx = self.prepare(backend, metrics.clone()).await?;

        let metrics_handle = metrics.map(|registry| {
            let server = MetricsServer::new(registry, self.config.metrics_listen_addr);
            tokio::spawn(async move {
                if let Err(e) = server.run().await {
                    warn!(error = %e, "Metrics server error");
                }
            })
        });

        let app = api::router(ctx);
        info!(listen = %listener.local_addr()?, "Control API listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        if let Some(handle) = metrics_handle {
            handle.abort();
        }

        info!("Failover daemon stopped");
        Ok(())
    }
}
