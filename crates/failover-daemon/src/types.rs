//! Types shared by the daemon: runtime configuration and the wire format of
//! the failover API.

use routing::DEFAULT_SETTLE_DELAY;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Server number as used by the failover API (`server_number`)
pub type ServerId = u64;

/// One IPv4 and one IPv6 address belonging together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressPair {
    pub v4: Ipv4Addr,
    pub v6: Ipv6Addr,
}

/// A physical server together with the failover addresses it owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDefinition {
    pub id: ServerId,

    /// Password half of the Basic credentials for this server's failover
    /// addresses
    pub token: String,

    /// Primary addresses, used as next hop when this server is the target
    pub main: AddressPair,

    /// Failover addresses owned by this server
    pub failover: AddressPair,
}

/// Which routing backend executes route changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Run the iproute2 `ip` tool
    #[default]
    Iproute2,
    /// Keep routes in memory only (dry run)
    Memory,
}

/// Routing backend settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingConfig {
    pub backend: BackendKind,

    /// Path or name of the `ip` binary
    pub ip_binary: PathBuf,

    /// Serialize route changes per address behind `settle_delay`
    pub throttle: bool,

    pub settle_delay: Duration,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Iproute2,
            ip_binary: PathBuf::from("ip"),
            throttle: false,
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }
}

/// Daemon runtime configuration
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Listen address of the control API
    pub listen: SocketAddr,

    pub servers: Vec<ServerDefinition>,

    pub routing: RoutingConfig,

    /// Serve Prometheus metrics
    pub metrics_enabled: bool,

    /// Listen address of the metrics endpoint
    pub metrics_listen_addr: SocketAddr,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            servers: Vec::new(),
            routing: RoutingConfig::default(),
            metrics_enabled: false,
            metrics_listen_addr: SocketAddr::from(([127, 0, 0, 1], 9370)),
        }
    }
}

/// Lock state reported for a failover address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailoverStatus {
    Ready,
    Processing,
}

/// State of one failover address as rendered by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverInfo {
    pub ip: String,
    pub netmask: String,
    pub status: FailoverStatus,
    pub server_ip: String,
    pub server_ipv6_net: String,
    pub server_number: ServerId,
    pub active_server_ip: Option<String>,
}

/// Success body: `{"failover": {...}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverBody {
    pub failover: FailoverInfo,
}

/// Error body: `{"error": {...}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub status: u16,
    pub code: String,
    pub message: String,
}

/// Form body of `POST /{ip}`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TargetForm {
    pub active_server_ip: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&FailoverStatus::Ready).unwrap(),
            "\"ready\""
        );
        assert_eq!(
            serde_json::to_string(&FailoverStatus::Processing).unwrap(),
            "\"processing\""
        );
    }

    #[test]
    fn test_unset_target_serializes_as_null() {
        let body = FailoverBody {
            failover: FailoverInfo {
                ip: "10.0.0.100".into(),
                netmask: "255.255.255.255".into(),
                status: FailoverStatus::Ready,
                server_ip: "10.0.0.1".into(),
                server_ipv6_net: "fd00::1".into(),
                server_number: 1,
                active_server_ip: None,
            },
        };

        let json: serde_json::Value = serde_json::to_value(&body).unwrap();
        assert!(json["failover"]["active_server_ip"].is_null());
        assert_eq!(json["failover"]["server_number"], 1);
    }

    #[test]
    fn test_backend_kind_names() {
        let kind: BackendKind = serde_json::from_str("\"memory\"").unwrap();
        assert_eq!(kind, BackendKind::Memory);
        assert_eq!(
            serde_json::to_string(&BackendKind::Iproute2).unwrap(),
            "\"iproute2\""
        );
    }
}
