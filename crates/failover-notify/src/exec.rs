//! Carry out planned actions: local address changes and failover API calls.

use crate::config::NotifyConfig;
use crate::plan::{Action, AddressChange, ApiRequest};
use anyhow::{Context, Result, bail};
use reqwest::Client;
use reqwest::header::AUTHORIZATION;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Executor {
    client: Client,
    authorization: Option<String>,
    ip_binary: PathBuf,
    interface: String,
}

impl Executor {
    pub fn new(config: &NotifyConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            client,
            authorization: config.authorization(),
            ip_binary: config.ip_binary.clone(),
            interface: config.interface.clone(),
        })
    }

    /// Apply one action. A failing `ip addr` call is only logged since the
    /// address may already be in the requested state; API failures are errors.
    pub async fn run(&self, action: &Action) -> Result<()> {
        self.change_address(action.change, action.address).await;

        if let Some(ref request) = action.request {
            self.send(request).await?;
        }

        Ok(())
    }

    async fn change_address(&self, change: AddressChange, address: IpAddr) {
        let args = addr_args(change, address, &self.interface);
        let command = format!("{} {}", self.ip_binary.display(), args.join(" "));

        match Command::new(&self.ip_binary).args(&args).output().await {
            Ok(output) if output.status.success() => {
                info!(command = %command, "Address updated");
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                warn!(command = %command, status = %output.status, stderr = %stderr.trim(), "ip command failed");
            }
            Err(e) => {
                warn!(command = %command, error = %e, "Could not run ip command");
            }
        }
    }

    async fn send(&self, request: &ApiRequest) -> Result<()> {
        let (builder, url) = match request {
            ApiRequest::Route { url, target } => {
                info!(url = %url, target = %target, "Routing failover address here");
                let form = [("active_server_ip", target.to_string())];
                (self.client.post(url).form(&form), url)
            }
            ApiRequest::Clear { url } => {
                info!(url = %url, "Clearing failover route");
                (self.client.delete(url), url)
            }
        };

        let builder = match self.authorization {
            Some(ref value) => builder.header(AUTHORIZATION, value),
            None => builder,
        };

        let response = builder
            .send()
            .await
            .with_context(|| format!("request to {}", url))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            bail!("{} answered {}: {}", url, status, body.trim());
        }

        info!(url = %url, status = %status, "Failover API accepted request");
        Ok(())
    }
}

/// `ip [-6] addr add|del <address>/<32|128> dev <interface>`
pub fn addr_args(change: AddressChange, address: IpAddr, interface: &str) -> Vec<String> {
    let mut args = Vec::new();
    let prefix = if address.is_ipv4() {
        32
    } else {
        args.push("-6".to_string());
        128
    };

    args.push("addr".to_string());
    args.push(
        match change {
            AddressChange::Add => "add",
            AddressChange::Delete => "del",
        }
        .to_string(),
    );
    args.push(format!("{}/{}", address, prefix));
    args.push("dev".to_string());
    args.push(interface.to_string());
    args
}
