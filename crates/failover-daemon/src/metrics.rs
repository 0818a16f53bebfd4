//! Prometheus metrics for the failover daemon.

use crate::registry::ReconcileReport;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::time::Duration;

/// Labels for API request metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabels {
    /// HTTP method (GET, POST, DELETE)
    pub method: String,
    /// Response status code
    pub status: String,
}

/// Labels for route change metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RouteLabels {
    /// install or remove
    pub operation: String,
    /// success or failure
    pub result: String,
}

/// Labels for reconciliation results
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReconcileLabels {
    /// imported, absent or foreign
    pub outcome: String,
}

/// Metrics registry with all failover daemon metrics
pub struct MetricsRegistry {
    /// Prometheus registry
    pub registry: Registry,

    requests_total: Family<RequestLabels, Counter>,
    route_operations_total: Family<RouteLabels, Counter>,
    route_operation_duration_seconds: Histogram,
    lock_conflicts_total: Counter,
    routed_addresses: Gauge,
    reconciled_routes: Family<ReconcileLabels, Gauge>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let requests_total = Family::<RequestLabels, Counter>::default();
        registry.register(
            "failover_requests",
            "Control API requests by method and status",
            requests_total.clone(),
        );

        let route_operations_total = Family::<RouteLabels, Counter>::default();
        registry.register(
            "failover_route_operations",
            "Route changes by operation and result",
            route_operations_total.clone(),
        );

        // 1ms up to ~65s, wide enough to include the settle delay
        let route_operation_duration_seconds = Histogram::new(exponential_buckets(0.001, 2.0, 17));
        registry.register(
            "failover_route_operation_duration_seconds",
            "Route change duration in seconds",
            route_operation_duration_seconds.clone(),
        );

        let lock_conflicts_total = Counter::default();
        registry.register(
            "failover_lock_conflicts",
            "Mutations rejected because the failover address was locked",
            lock_conflicts_total.clone(),
        );

        let routed_addresses = Gauge::default();
        registry.register(
            "failover_routed_addresses",
            "Failover addresses that currently have a target",
            routed_addresses.clone(),
        );

        let reconciled_routes = Family::<ReconcileLabels, Gauge>::default();
        registry.register(
            "failover_reconciled_routes",
            "Startup reconciliation results by outcome",
            reconciled_routes.clone(),
        );

        Self {
            registry,
            requests_total,
            route_operations_total,
            route_operation_duration_seconds,
            lock_conflicts_total,
            routed_addresses,
            reconciled_routes,
        }
    }

    /// Record a finished API request
    pub fn record_request(&self, method: &str, status: u16) {
        self.requests_total
            .get_or_create(&RequestLabels {
                method: method.to_string(),
                status: status.to_string(),
            })
            .inc();
    }

    /// Record a route install/remove
    pub fn record_route_operation(&self, operation: &str, success: bool, duration: Duration) {
        self.route_operations_total
            .get_or_create(&RouteLabels {
                operation: operation.to_string(),
                result: if success { "success" } else { "failure" }.to_string(),
            })
            .inc();

        self.route_operation_duration_seconds
            .observe(duration.as_secs_f64());
    }

    pub fn record_lock_conflict(&self) {
        self.lock_conflicts_total.inc();
    }

    pub fn set_routed_addresses(&self, count: usize) {
        self.routed_addresses.set(count as i64);
    }

    pub fn record_reconcile(&self, report: &ReconcileReport) {
        for (outcome, count) in [
            ("imported", report.imported),
            ("absent", report.absent),
            ("foreign", report.foreign),
        ] {
            self.reconciled_routes
                .get_or_create(&ReconcileLabels {
                    outcome: outcome.to_string(),
                })
                .set(count as i64);
        }
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus_client::encoding::text::encode;

    fn encoded(registry: &MetricsRegistry) -> String {
        let mut buffer = String::new();
        encode(&mut buffer, &registry.registry).unwrap();
        buffer
    }

    #[test]
    fn test_request_counter() {
        let registry = MetricsRegistry::new();
        registry.record_request("POST", 409);
        registry.record_request("POST", 409);

        let text = encoded(&registry);
        assert!(text.contains("failover_requests_total{method=\"POST\",status=\"409\"} 2"));
    }

    #[test]
    fn test_route_operations() {
        let registry = MetricsRegistry::new();
        registry.record_route_operation("install", true, Duration::from_millis(20));
        registry.record_route_operation("remove", false, Duration::from_secs(30));

        let text = encoded(&registry);
        assert!(text.contains(
            "failover_route_operations_total{operation=\"install\",result=\"success\"} 1"
        ));
        assert!(text.contains(
            "failover_route_operations_total{operation=\"remove\",result=\"failure\"} 1"
        ));
        assert!(text.contains("failover_route_operation_duration_seconds_count 2"));
    }

    #[test]
    fn test_gauges() {
        let registry = MetricsRegistry::new();
        registry.record_lock_conflict();
        registry.set_routed_addresses(3);
        registry.record_reconcile(&ReconcileReport {
            imported: 2,
            absent: 1,
            foreign: 0,
        });

        let text = encoded(&registry);
        assert!(text.contains("failover_lock_conflicts_total 1"));
        assert!(text.contains("failover_routed_addresses 3"));
        assert!(text.contains("failover_reconciled_routes{outcome=\"imported\"} 2"));
    }
}
