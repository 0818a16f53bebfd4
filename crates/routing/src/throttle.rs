//! Settle-delay decorator for routing backends.
//!
//! Some routing substrates apply changes asynchronously; issuing a second
//! change for the same address before the first has propagated can leave the
//! route in an undefined state. [`ThrottledRouting`] serializes mutations per
//! failover address and waits a fixed settle delay before each one.

use crate::RoutingBackend;
use async_trait::async_trait;
use common::Result;
use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// Settle delay used when none is configured.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(30);

/// Wraps a backend so that mutations for one address run one at a time, each
/// preceded by the settle delay. Queries are passed through immediately.
pub struct ThrottledRouting<B> {
    inner: B,
    settle_delay: Duration,
    /// One lock per failover address, created on first use and never removed
    locks: DashMap<IpAddr, Arc<Mutex<()>>>,
}

impl<B: RoutingBackend> ThrottledRouting<B> {
    pub fn new(inner: B, settle_delay: Duration) -> Self {
        Self {
            inner,
            settle_delay,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, failover: IpAddr) -> Arc<Mutex<()>> {
        self.locks
            .entry(failover)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[async_trait]
impl<B: RoutingBackend> RoutingBackend for ThrottledRouting<B> {
    async fn install_route(&self, failover: IpAddr, target: IpAddr) -> Result<()> {
        let lock = self.lock_for(failover);
        let _guard = lock.lock().await;

        debug!(failover = %failover, delay = ?self.settle_delay, "Settling before route replace");
        tokio::time::sleep(self.settle_delay).await;

        self.inner.install_route(failover, target).await
    }

    async fn remove_route(&self, failover: IpAddr) -> Result<()> {
        let lock = self.lock_for(failover);
        let _guard = lock.lock().await;

        debug!(failover = %failover, delay = ?self.settle_delay, "Settling before route delete");
        tokio::time::sleep(self.settle_delay).await;

        self.inner.remove_route(failover).await
    }

    async fn query_route(&self, failover: IpAddr) -> Result<Option<IpAddr>> {
        self.inner.query_route(failover).await
    }

    fn name(&self) -> &'static str {
        "throttled"
    }
}
