//! Startup reconciliation against a pre-populated routing table.

use failover_daemon::types::{AddressPair, ServerDefinition};
use failover_daemon::{ReconcileReport, Registry};
use routing::MemoryRouting;
use std::net::{IpAddr, Ipv4Addr};

fn servers() -> Vec<ServerDefinition> {
    (1..=2u8)
        .map(|n| ServerDefinition {
            id: u64::from(n),
            token: format!("tok{}", n),
            main: AddressPair {
                v4: Ipv4Addr::new(10, 0, 0, n),
                v6: format!("fd00::{}", n).parse().unwrap(),
            },
            failover: AddressPair {
                v4: Ipv4Addr::new(10, 0, 0, 100 * n),
                v6: format!("fd00::{}", 100 * u16::from(n)).parse().unwrap(),
            },
        })
        .collect()
}

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

#[tokio::test]
async fn test_reconcile_imports_known_routes() {
    let backend = MemoryRouting::new()
        .with_route(ip("10.0.0.100"), ip("10.0.0.2"))
        .with_route(ip("fd00::200"), ip("fd00::1"))
        .with_route(ip("10.0.0.200"), ip("192.0.2.50"));
    let registry = Registry::new(&servers()).unwrap();

    let report = registry.reconcile(&backend).await.unwrap();

    assert_eq!(
        report,
        ReconcileReport {
            imported: 2,
            absent: 1,
            foreign: 1,
        }
    );
    assert_eq!(backend.queries(), 4);

    let target = |addr: &str| {
        let entry = registry.entry(ip(addr)).unwrap();
        async move { entry.target().await.map(|s| s.id) }
    };
    assert_eq!(target("10.0.0.100").await, Some(2));
    assert_eq!(target("fd00::200").await, Some(1));
    // Routed elsewhere by someone else; left alone and reported unset
    assert_eq!(target("10.0.0.200").await, None);
    assert_eq!(target("fd00::100").await, None);

    assert_eq!(registry.routed_count().await, 2);
    // Reconciliation never mutates the table
    assert_eq!(backend.installs() + backend.removes(), 0);
    assert_eq!(backend.route(ip("10.0.0.200")), Some(ip("192.0.2.50")));
}

#[tokio::test]
async fn test_reconcile_empty_table() {
    let backend = MemoryRouting::new();
    let registry = Registry::new(&servers()).unwrap();

    let report = registry.reconcile(&backend).await.unwrap();

    assert_eq!(report.absent, 4);
    assert_eq!(report.imported + report.foreign, 0);
    assert_eq!(registry.routed_count().await, 0);
}

#[tokio::test]
async fn test_reconcile_query_failure_is_fatal() {
    let backend = MemoryRouting::new().with_route(ip("10.0.0.100"), ip("10.0.0.1"));
    backend.set_fail_queries(true);
    let registry = Registry::new(&servers()).unwrap();

    let err = registry.reconcile(&backend).await.unwrap_err();
    assert!(matches!(err, common::Error::Routing(_)));
}
