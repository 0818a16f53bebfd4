//! Configuration loading and validation for the failover daemon

use crate::types::{
    AddressPair, BackendKind, DaemonConfig, RoutingConfig, ServerDefinition, ServerId,
};
use routing::DEFAULT_SETTLE_DELAY;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use validator::{Validate, ValidationError, ValidationErrors};

/// Longest accepted settle delay
const MAX_SETTLE_DELAY: Duration = Duration::from_secs(600);

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found in search paths")]
    FileNotFound,

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(#[from] ValidationErrors),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Control API listen address; a bare `:port` binds all IPv4 interfaces
    #[serde(default = "default_listen", deserialize_with = "deserialize_listen")]
    pub listen: SocketAddr,

    /// Servers keyed by server number
    #[serde(default, alias = "Servers")]
    pub servers: BTreeMap<ServerId, ServerSettings>,

    #[serde(default)]
    pub routing: RoutingSettings,

    #[serde(default)]
    pub metrics: MetricsSettings,

    #[serde(default)]
    pub telemetry: TelemetrySettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Validate for Config {
    fn validate(&self) -> Result<(), ValidationErrors> {
        if self.servers.is_empty() {
            let mut errors = ValidationErrors::new();
            errors.add("servers", ValidationError::new("no_servers"));
            return Err(errors);
        }

        for server in self.servers.values() {
            server.validate()?;
        }
        self.routing.validate()?;
        Ok(())
    }
}

/// One server and the failover addresses it owns
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerSettings {
    #[validate(custom = "validate_token")]
    pub token: String,

    pub main: AddressPair,

    pub failover: AddressPair,
}

/// Routing backend settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RoutingSettings {
    pub backend: BackendKind,

    #[validate(custom = "validate_ip_binary")]
    pub ip_binary: PathBuf,

    /// Serialize route changes per address behind `settle_delay`
    pub throttle: bool,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_settle_delay")]
    pub settle_delay: Duration,
}

/// Prometheus endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    pub enabled: bool,
    #[serde(deserialize_with = "deserialize_listen")]
    pub listen: SocketAddr,
}

/// OTLP transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OtlpProtocol {
    #[default]
    Grpc,
    Http,
}

/// OpenTelemetry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    pub enabled: bool,
    pub service_name: String,
    pub otlp_endpoint: String,
    pub protocol: OtlpProtocol,
}

/// Logging settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSettings {
    pub level: Option<String>,
    pub format: Option<String>,
}

impl LoggingSettings {
    pub fn level(&self) -> &str {
        self.level.as_deref().unwrap_or("info")
    }

    pub fn is_json(&self) -> bool {
        self.format
            .as_deref()
            .is_some_and(|f| f.eq_ignore_ascii_case("json"))
    }
}

// Default implementations

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn deserialize_listen<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    parse_listen(&value).map_err(serde::de::Error::custom)
}

/// Parse `host:port`, or `:port` for the IPv4 unspecified address.
fn parse_listen(value: &str) -> Result<SocketAddr, String> {
    let value = value.trim();
    match value.strip_prefix(':') {
        Some(port) => port
            .parse::<u16>()
            .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
            .map_err(|e| format!("invalid port in listen address {:?}: {}", value, e)),
        None => value
            .parse()
            .map_err(|e| format!("invalid listen address {:?}: {}", value, e)),
    }
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::Iproute2,
            ip_binary: PathBuf::from("ip"),
            throttle: false,
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: SocketAddr::from(([127, 0, 0, 1], 9370)),
        }
    }
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            service_name: "failover-daemon".to_string(),
            otlp_endpoint: "http://localhost:4317".to_string(),
            protocol: OtlpProtocol::Grpc,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            servers: BTreeMap::new(),
            routing: RoutingSettings::default(),
            metrics: MetricsSettings::default(),
            telemetry: TelemetrySettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

// Custom validators

fn validate_token(token: &str) -> Result<(), ValidationError> {
    if token.trim().is_empty() {
        return Err(ValidationError::new("token_empty"));
    }
    Ok(())
}

fn validate_ip_binary(path: &Path) -> Result<(), ValidationError> {
    if path.as_os_str().is_empty() {
        return Err(ValidationError::new("ip_binary_empty"));
    }
    Ok(())
}

fn validate_settle_delay(delay: &Duration) -> Result<(), ValidationError> {
    if *delay > MAX_SETTLE_DELAY {
        return Err(ValidationError::new("settle_delay_out_of_range"));
    }
    Ok(())
}

// Configuration loading implementation

impl Config {
    /// Load configuration from default search paths
    pub fn load() -> Result<Self, ConfigError> {
        match Self::find_config_file() {
            Some(path) => {
                tracing::info!("Loading configuration from: {}", path.display());
                Self::load_from_file(&path)
            }
            None => Err(ConfigError::FileNotFound),
        }
    }

    /// Load configuration from a specific file. Files ending in `.json` are
    /// read as JSON, everything else as YAML.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let config: Config = if is_json {
            serde_json::from_str(&contents)?
        } else {
            serde_yaml::from_str(&contents)?
        };

        config.validate()?;
        Ok(config)
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/failover/failover-daemon.yaml")];

        if let Some(home_path) = Self::home_config_path() {
            paths.push(home_path);
        }

        paths.push(PathBuf::from("./failover-daemon.yaml"));

        paths.into_iter().find(|p| p.is_file())
    }

    fn home_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config/failover/failover-daemon.yaml"))
    }

    /// Convert to the daemon's runtime configuration
    pub fn to_daemon_config(&self) -> DaemonConfig {
        let servers = self
            .servers
            .iter()
            .map(|(&id, settings)| ServerDefinition {
                id,
                token: settings.token.clone(),
                main: settings.main,
                failover: settings.failover,
            })
            .collect();

        DaemonConfig {
            listen: self.listen,
            servers,
            routing: RoutingConfig {
                backend: self.routing.backend,
                ip_binary: self.routing.ip_binary.clone(),
                throttle: self.routing.throttle,
                settle_delay: self.routing.settle_delay,
            },
            metrics_enabled: self.metrics.enabled,
            metrics_listen_addr: self.metrics.listen,
        }
    }
}
