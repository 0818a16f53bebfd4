//! Notify hook configuration (JSON).

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

/// Overrides the configuration path
pub const CONFIG_ENV: &str = "FAILOVER_NOTIFY_CONFIG";

const CONFIG_FILE_NAME: &str = "failover-notify.json";

/// A floating address and the keepalived router it belongs to
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FloatingIp {
    pub ip: IpAddr,
    pub router: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    /// Failover API URL, `{}` is replaced by the address
    pub url_template: String,

    /// Base64 encoded `user:password` used for every request
    #[serde(default)]
    pub credentials: Option<String>,

    /// Base64 encoded credentials per router id, used when `credentials` is
    /// not set
    #[serde(default)]
    pub router_credentials: HashMap<u32, String>,

    /// Addresses are local to the network, only move them on the interface
    #[serde(default)]
    pub use_private_ips: bool,

    pub floating_ips: Vec<FloatingIp>,

    /// Router id of this machine
    pub this_router_id: u32,

    /// Router whose addresses this hook takes over
    #[serde(default = "default_peer_router_id")]
    pub peer_router_id: u32,

    /// Appended to IPv6 addresses in the API URL
    #[serde(default)]
    pub ipv6_suffix: String,

    #[serde(default = "default_ip_binary")]
    pub ip_binary: PathBuf,

    pub interface: String,
}

fn default_peer_router_id() -> u32 {
    2
}

fn default_ip_binary() -> PathBuf {
    PathBuf::from("ip")
}

impl NotifyConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: NotifyConfig = serde_json::from_str(&contents)
            .with_context(|| format!("parsing {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// `$FAILOVER_NOTIFY_CONFIG`, else `failover-notify.json` next to the
    /// executable.
    pub fn default_path() -> Result<PathBuf> {
        if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
            return Ok(PathBuf::from(path));
        }

        let exe = std::env::current_exe().context("locating executable")?;
        let dir = exe
            .parent()
            .context("executable has no parent directory")?;
        Ok(dir.join(CONFIG_FILE_NAME))
    }

    fn validate(&self) -> Result<()> {
        if self.interface.trim().is_empty() {
            bail!("interface must not be empty");
        }
        if !self.url_template.contains("{}") {
            bail!("url_template must contain {{}}");
        }
        if !self.use_private_ips && self.api_credentials().is_none() {
            bail!(
                "no credentials configured for router {}",
                self.peer_router_id
            );
        }
        Ok(())
    }

    fn api_credentials(&self) -> Option<&str> {
        self.credentials
            .as_deref()
            .or_else(|| self.router_credentials.get(&self.peer_router_id).map(String::as_str))
    }

    /// `Authorization` header value, or `None` when the API is not used.
    pub fn authorization(&self) -> Option<String> {
        if self.use_private_ips {
            return None;
        }
        self.api_credentials().map(|c| format!("Basic {}", c))
    }

    /// This router's own floating address in the family of `like`.
    pub fn own_address(&self, like: IpAddr) -> Option<IpAddr> {
        self.floating_ips
            .iter()
            .filter(|f| f.router == self.this_router_id)
            .map(|f| f.ip)
            .find(|ip| ip.is_ipv4() == like.is_ipv4())
    }

    /// Addresses owned by the peer router.
    pub fn peer_addresses(&self) -> impl Iterator<Item = IpAddr> + '_ {
        self.floating_ips
            .iter()
            .filter(|f| f.router == self.peer_router_id)
            .map(|f| f.ip)
    }

    /// API URL for a floating address.
    pub fn url_for(&self, address: IpAddr) -> String {
        let key = match address {
            IpAddr::V4(_) => address.to_string(),
            IpAddr::V6(_) => format!("{}{}", address, self.ipv6_suffix),
        };
        self.url_template.replace("{}", &key)
    }
}
