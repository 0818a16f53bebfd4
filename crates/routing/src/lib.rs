//! Kernel route management for failover addresses.
//!
//! A failover address is "owned" by whichever server the kernel routes it
//! through. This crate hides how that route is changed behind the
//! [`RoutingBackend`] trait so the daemon can swap the production
//! implementation for an in-memory one, or wrap it in a throttle.
//!
//! # Example
//!
//! ```no_run
//! use routing::{IpRoute2, RoutingBackend, ThrottledRouting};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> common::Result<()> {
//! let direct: Arc<dyn RoutingBackend> = Arc::new(IpRoute2::new("ip"));
//! let routing = ThrottledRouting::new(direct, Duration::from_secs(30));
//!
//! routing
//!     .install_route("10.0.0.100".parse().unwrap(), "10.0.0.1".parse().unwrap())
//!     .await?;
//!
//! if let Some(via) = routing.query_route("10.0.0.100".parse().unwrap()).await? {
//!     println!("10.0.0.100 is routed via {}", via);
//! }
//! # Ok(())
//! # }
//! ```

mod iproute;
mod memory;
mod throttle;

pub use iproute::{IpRoute2, NOT_ROUTABLE_EXIT_CODE};
pub use memory::MemoryRouting;
pub use throttle::{DEFAULT_SETTLE_DELAY, ThrottledRouting};

use async_trait::async_trait;
use common::Result;
use std::net::IpAddr;
use std::sync::Arc;

/// Operations the daemon needs from the host routing table.
///
/// All operations are address-family aware: a call for an IPv4 failover
/// address never touches IPv6 routes and vice versa.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RoutingBackend: Send + Sync {
    /// Route `failover` via `target`, replacing any existing route for it.
    async fn install_route(&self, failover: IpAddr, target: IpAddr) -> Result<()>;

    /// Delete the route for `failover`. Deleting a missing route succeeds.
    async fn remove_route(&self, failover: IpAddr) -> Result<()>;

    /// Look up the next hop currently used for `failover`.
    ///
    /// Returns `Ok(None)` when the address is unroutable or not routed via a
    /// gateway. `Err` is reserved for failures of the lookup itself.
    async fn query_route(&self, failover: IpAddr) -> Result<Option<IpAddr>>;

    /// Short name used in logs and metrics.
    fn name(&self) -> &'static str;
}

#[async_trait]
impl<T: RoutingBackend + ?Sized> RoutingBackend for Arc<T> {
    async fn install_route(&self, failover: IpAddr, target: IpAddr) -> Result<()> {
        (**self).install_route(failover, target).await
    }

    async fn remove_route(&self, failover: IpAddr) -> Result<()> {
        (**self).remove_route(failover).await
    }

    async fn query_route(&self, failover: IpAddr) -> Result<Option<IpAddr>> {
        (**self).query_route(failover).await
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Reject a route whose next hop is of a different address family.
pub(crate) fn ensure_same_family(failover: IpAddr, target: IpAddr) -> Result<()> {
    if failover.is_ipv4() != target.is_ipv4() {
        return Err(common::Error::routing(format!(
            "cannot route {} via {}: address family mismatch",
            failover, target
        )));
    }
    Ok(())
}
