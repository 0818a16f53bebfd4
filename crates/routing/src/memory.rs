//! In-memory routing backend.
//!
//! Used for dry runs and as the fake behind the daemon's tests. It keeps the
//! same contract as the kernel backend, including address family checks and
//! idempotent deletes.

use crate::{RoutingBackend, ensure_same_family};
use async_trait::async_trait;
use common::{Error, Result};
use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::info;

/// Routing table kept in a concurrent map.
#[derive(Debug, Default)]
pub struct MemoryRouting {
    routes: DashMap<IpAddr, IpAddr>,
    mutation_delay: Duration,
    fail_mutations: AtomicBool,
    fail_queries: AtomicBool,
    installs: AtomicUsize,
    removes: AtomicUsize,
    queries: AtomicUsize,
    /// Mutations currently executing, per failover address
    in_flight: DashMap<IpAddr, usize>,
    /// Highest number of simultaneous mutations seen for any single address
    peak_in_flight: AtomicUsize,
}

/// Decrements the in-flight count for an address when a mutation finishes.
struct InFlight<'a> {
    backend: &'a MemoryRouting,
    failover: IpAddr,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(mut count) = self.backend.in_flight.get_mut(&self.failover) {
            *count -= 1;
        }
    }
}

impl MemoryRouting {
    /// Create an empty routing table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a route, as if it already existed in the kernel.
    pub fn with_route(self, failover: IpAddr, via: IpAddr) -> Self {
        self.routes.insert(failover, via);
        self
    }

    /// Make every install/remove take `delay` before completing.
    pub fn with_mutation_delay(mut self, delay: Duration) -> Self {
        self.mutation_delay = delay;
        self
    }

    /// Make subsequent installs and removes fail.
    pub fn set_fail_mutations(&self, fail: bool) {
        self.fail_mutations.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent queries fail.
    pub fn set_fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    /// Current next hop for `failover`, without counting as a query.
    pub fn route(&self, failover: IpAddr) -> Option<IpAddr> {
        self.routes.get(&failover).map(|via| *via)
    }

    pub fn installs(&self) -> usize {
        self.installs.load(Ordering::SeqCst)
    }

    pub fn removes(&self) -> usize {
        self.removes.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// Number of install/remove calls currently executing.
    pub fn mutations_in_flight(&self) -> usize {
        self.in_flight.iter().map(|entry| *entry.value()).sum()
    }

    /// Highest number of mutations ever observed running at the same time
    /// for one failover address.
    pub fn peak_in_flight_per_address(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    async fn begin_mutation(&self, failover: IpAddr) -> Result<InFlight<'_>> {
        let current = {
            let mut count = self.in_flight.entry(failover).or_insert(0);
            *count += 1;
            *count
        };
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
        let guard = InFlight {
            backend: self,
            failover,
        };

        if !self.mutation_delay.is_zero() {
            tokio::time::sleep(self.mutation_delay).await;
        }

        if self.fail_mutations.load(Ordering::SeqCst) {
            return Err(Error::routing(format!(
                "injected failure changing route for {}",
                failover
            )));
        }

        Ok(guard)
    }
}

#[async_trait]
impl RoutingBackend for MemoryRouting {
    async fn install_route(&self, failover: IpAddr, target: IpAddr) -> Result<()> {
        ensure_same_family(failover, target)?;
        self.installs.fetch_add(1, Ordering::SeqCst);

        let _in_flight = self.begin_mutation(failover).await?;
        self.routes.insert(failover, target);

        info!(failover = %failover, target = %target, "Route replaced (memory)");
        Ok(())
    }

    async fn remove_route(&self, failover: IpAddr) -> Result<()> {
        self.removes.fetch_add(1, Ordering::SeqCst);

        let _in_flight = self.begin_mutation(failover).await?;
        self.routes.remove(&failover);

        info!(failover = %failover, "Route deleted (memory)");
        Ok(())
    }

    async fn query_route(&self, failover: IpAddr) -> Result<Option<IpAddr>> {
        self.queries.fetch_add(1, Ordering::SeqCst);

        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(Error::routing(format!(
                "injected failure querying route for {}",
                failover
            )));
        }

        Ok(self.route(failover))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_install_query_remove() {
        let backend = MemoryRouting::new();

        assert_eq!(backend.query_route(ip("10.0.0.100")).await.unwrap(), None);

        backend
            .install_route(ip("10.0.0.100"), ip("10.0.0.1"))
            .await
            .unwrap();
        assert_eq!(
            backend.query_route(ip("10.0.0.100")).await.unwrap(),
            Some(ip("10.0.0.1"))
        );

        backend.remove_route(ip("10.0.0.100")).await.unwrap();
        assert_eq!(backend.query_route(ip("10.0.0.100")).await.unwrap(), None);

        assert_eq!(backend.installs(), 1);
        assert_eq!(backend.removes(), 1);
        assert_eq!(backend.queries(), 3);
    }

    #[tokio::test]
    async fn test_remove_missing_route_succeeds() {
        let backend = MemoryRouting::new();
        tokio_test::assert_ok!(backend.remove_route(ip("fd00::100")).await);
        tokio_test::assert_ok!(backend.remove_route(ip("fd00::100")).await);
    }

    #[tokio::test]
    async fn test_families_are_independent() {
        let backend = MemoryRouting::new()
            .with_route(ip("10.0.0.100"), ip("10.0.0.1"))
            .with_route(ip("fd00::100"), ip("fd00::1"));

        backend.remove_route(ip("fd00::100")).await.unwrap();

        assert_eq!(backend.route(ip("10.0.0.100")), Some(ip("10.0.0.1")));
        assert_eq!(backend.route(ip("fd00::100")), None);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let backend = MemoryRouting::new().with_route(ip("10.0.0.100"), ip("10.0.0.1"));

        backend.set_fail_mutations(true);
        tokio_test::assert_err!(backend.install_route(ip("10.0.0.100"), ip("10.0.0.2")).await);
        tokio_test::assert_err!(backend.remove_route(ip("10.0.0.100")).await);
        assert_eq!(backend.route(ip("10.0.0.100")), Some(ip("10.0.0.1")));
        assert_eq!(backend.mutations_in_flight(), 0);

        backend.set_fail_queries(true);
        tokio_test::assert_err!(backend.query_route(ip("10.0.0.100")).await);
    }

    #[tokio::test]
    async fn test_family_mismatch_rejected() {
        let backend = MemoryRouting::new();
        tokio_test::assert_err!(backend.install_route(ip("10.0.0.100"), ip("fd00::1")).await);
        assert_eq!(backend.installs(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_mutations_are_observed() {
        let backend = MemoryRouting::new().with_mutation_delay(Duration::from_secs(1));

        let (a, b) = tokio::join!(
            backend.install_route(ip("10.0.0.100"), ip("10.0.0.1")),
            backend.install_route(ip("10.0.0.100"), ip("10.0.0.2")),
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(backend.peak_in_flight_per_address(), 2);
        assert_eq!(backend.mutations_in_flight(), 0);
    }
}
