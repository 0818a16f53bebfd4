//! In-memory state of every configured failover address.
//!
//! The registry is built once at startup and never changes shape afterwards:
//! only the current target of an entry mutates, and only while that entry's
//! lock is held (enforced by [`EntryGuard`]).

use crate::types::{ServerDefinition, ServerId};
use common::{Error, Result};
use routing::RoutingBackend;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info, warn};

/// Netmask reported for IPv4 failover addresses
pub const NETMASK_V4: &str = "255.255.255.255";

/// Netmask reported for IPv6 failover addresses
pub const NETMASK_V6: &str = "ffff:ffff:ffff:ffff::";

/// A physical server that failover addresses can be routed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Server {
    pub id: ServerId,
    pub v4: Ipv4Addr,
    pub v6: Ipv6Addr,
}

impl Server {
    /// This server's address in the same family as `addr`.
    pub fn address_for(&self, addr: IpAddr) -> IpAddr {
        match addr {
            IpAddr::V4(_) => IpAddr::V4(self.v4),
            IpAddr::V6(_) => IpAddr::V6(self.v6),
        }
    }
}

/// One manageable failover address.
#[derive(Debug)]
pub struct FailoverEntry {
    address: IpAddr,
    token: String,
    owner: Arc<Server>,
    target: RwLock<Option<Arc<Server>>>,
    lock: Mutex<()>,
}

impl FailoverEntry {
    fn new(address: IpAddr, token: String, owner: Arc<Server>) -> Self {
        Self {
            address,
            token,
            owner,
            target: RwLock::new(None),
            lock: Mutex::new(()),
        }
    }

    pub fn address(&self) -> IpAddr {
        self.address
    }

    /// Server the address belongs to; its id and token authenticate requests.
    pub fn owner(&self) -> &Arc<Server> {
        &self.owner
    }

    /// Expected decoded Basic credentials, `"<server id>:<token>"`.
    pub fn credentials(&self) -> String {
        format!("{}:{}", self.owner.id, self.token)
    }

    pub fn netmask(&self) -> &'static str {
        if self.address.is_ipv4() {
            NETMASK_V4
        } else {
            NETMASK_V6
        }
    }

    /// Current target. Readable at any time, including while a mutation holds
    /// the entry lock.
    pub async fn target(&self) -> Option<Arc<Server>> {
        self.target.read().await.clone()
    }

    /// Try to take the entry lock without waiting.
    pub fn try_lock(&self) -> Option<EntryGuard<'_>> {
        self.lock.try_lock().ok().map(|guard| EntryGuard {
            entry: self,
            _guard: guard,
        })
    }

    /// Wait for the entry lock.
    pub async fn lock(&self) -> EntryGuard<'_> {
        EntryGuard {
            entry: self,
            _guard: self.lock.lock().await,
        }
    }

    /// Non-blocking probe: true while some operation holds the entry lock.
    pub fn is_locked(&self) -> bool {
        self.lock.try_lock().is_err()
    }
}

/// Proof that the entry lock is held; the only way to change a target.
pub struct EntryGuard<'a> {
    entry: &'a FailoverEntry,
    _guard: MutexGuard<'a, ()>,
}

impl EntryGuard<'_> {
    /// Replace the target and return the previous one.
    pub async fn set_target(&self, target: Option<Arc<Server>>) -> Option<Arc<Server>> {
        std::mem::replace(&mut *self.entry.target.write().await, target)
    }
}

/// Outcome of the startup reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Routes via a known server, imported as the current target
    pub imported: usize,
    /// Addresses with no route
    pub absent: usize,
    /// Routes via an address that is not a configured server
    pub foreign: usize,
}

/// All servers and failover entries.
#[derive(Debug, Default)]
pub struct Registry {
    servers: HashMap<ServerId, Arc<Server>>,
    server_addrs: HashMap<IpAddr, Arc<Server>>,
    entries: HashMap<IpAddr, FailoverEntry>,
}

impl Registry {
    /// Build the registry. Every target starts unset.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a server id, a server address or a
    /// failover address appears more than once.
    pub fn new(definitions: &[ServerDefinition]) -> Result<Self> {
        let mut registry = Registry::default();

        for def in definitions {
            let server = Arc::new(Server {
                id: def.id,
                v4: def.main.v4,
                v6: def.main.v6,
            });

            if registry.servers.insert(def.id, server.clone()).is_some() {
                return Err(Error::config(format!("duplicate server id {}", def.id)));
            }

            for addr in [IpAddr::V4(def.main.v4), IpAddr::V6(def.main.v6)] {
                if registry.server_addrs.insert(addr, server.clone()).is_some() {
                    return Err(Error::config(format!("duplicate server address {}", addr)));
                }
            }

            for addr in [IpAddr::V4(def.failover.v4), IpAddr::V6(def.failover.v6)] {
                let entry = FailoverEntry::new(addr, def.token.clone(), server.clone());
                if registry.entries.insert(addr, entry).is_some() {
                    return Err(Error::config(format!("duplicate failover address {}", addr)));
                }
                info!(server = def.id, failover = %addr, "Failover address registered");
            }
        }

        Ok(registry)
    }

    pub fn entry(&self, address: IpAddr) -> Option<&FailoverEntry> {
        self.entries.get(&address)
    }

    pub fn server(&self, id: ServerId) -> Option<&Arc<Server>> {
        self.servers.get(&id)
    }

    /// Server owning `address` as one of its primary addresses.
    pub fn server_by_address(&self, address: IpAddr) -> Option<&Arc<Server>> {
        self.server_addrs.get(&address)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries that currently have a target.
    pub async fn routed_count(&self) -> usize {
        let mut count = 0;
        for entry in self.entries.values() {
            if entry.target().await.is_some() {
                count += 1;
            }
        }
        count
    }

    /// Import routes that already exist in the routing table.
    ///
    /// Must run before the API accepts requests. Any backend error aborts the
    /// pass: the daemon must not serve with unknown routing state.
    pub async fn reconcile<B>(&self, backend: &B) -> Result<ReconcileReport>
    where
        B: RoutingBackend + ?Sized,
    {
        let mut report = ReconcileReport::default();

        for entry in self.entries.values() {
            let failover = entry.address();

            let via = backend.query_route(failover).await.map_err(|e| {
                Error::routing(format!("reconciling {} failed: {}", failover, e))
            })?;

            let Some(via) = via else {
                debug!(failover = %failover, "No existing route");
                report.absent += 1;
                continue;
            };

            match self.server_by_address(via) {
                Some(server) => {
                    info!(failover = %failover, target = %via, server = server.id, "Imported existing route");
                    entry.lock().await.set_target(Some(server.clone())).await;
                    report.imported += 1;
                }
                None => {
                    warn!(failover = %failover, via = %via, "Existing route is not via a known server, ignoring");
                    report.foreign += 1;
                }
            }
        }

        Ok(report)
    }
}
