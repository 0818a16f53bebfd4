//! HTTP server for Prometheus metrics endpoint.

use crate::metrics::MetricsRegistry;
use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::text::encode;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// HTTP server for metrics endpoint
pub struct MetricsServer {
    registry: Arc<MetricsRegistry>,
    listen_addr: SocketAddr,
}

impl MetricsServer {
    pub fn new(registry: Arc<MetricsRegistry>, listen_addr: SocketAddr) -> Self {
        Self {
            registry,
            listen_addr,
        }
    }

    /// Router serving `/metrics`
    pub fn router(&self) -> Router {
        Router::new()
            .route("/metrics", get(metrics_handler))
            .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
            .with_state(self.registry.clone())
    }

    /// Run the HTTP server
    pub async fn run(self) -> common::Result<()> {
        let app = self.router();

        let listener = TcpListener::bind(self.listen_addr).await?;
        info!(listen_addr = %self.listen_addr, "Metrics server listening");

        axum::serve(listener, app).await?;

        Ok(())
    }
}

/// Handler for /metrics endpoint
async fn metrics_handler(State(registry): State<Arc<MetricsRegistry>>) -> Response {
    let mut buffer = String::new();
    if let Err(e) = encode(&mut buffer, &registry.registry) {
        warn!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        buffer,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_metrics_endpoint_serves_text_format() {
        let registry = Arc::new(MetricsRegistry::new());
        registry.record_route_operation("install", true, Duration::from_millis(5));
        registry.set_routed_addresses(1);

        let server = MetricsServer::new(registry, "127.0.0.1:0".parse().unwrap());
        let response = server
            .router()
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("failover_routed_addresses 1"));
        assert!(text.contains("failover_route_operations_total"));
    }
}
