//! Failover IP control daemon
//!
//! Serves a failover API compatible with the hosting provider's web service
//! and applies target changes to the local routing table, so a set of
//! failover addresses can be moved between servers that share a router.
//!
//! # Components
//!
//! - **Registry**: configured servers and failover addresses, the current
//!   target of each address, and its mutation lock
//! - **API**: `GET`/`POST`/`DELETE /{ip}` with per-address Basic auth
//! - **Routing**: pluggable backend from the `routing` crate (iproute2,
//!   in-memory, optionally throttled)
//!
//! On startup existing routes are imported before the API accepts requests.

pub mod api;
pub mod config;
pub mod error;
pub mod http_server;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod telemetry;
pub mod types;

pub use api::{ControlContext, router};
pub use config::{Config, ConfigError};
pub use error::ApiError;
pub use http_server::MetricsServer;
pub use metrics::MetricsRegistry;
pub use registry::{FailoverEntry, ReconcileReport, Registry, Server};
pub use server::FailoverDaemon;
pub use telemetry::{TelemetryGuard, setup_tracing};
pub use types::{DaemonConfig, ServerDefinition};
