//! Routing backend driving the iproute2 `ip` tool.

use crate::{RoutingBackend, ensure_same_family};
use async_trait::async_trait;
use common::{Error, Result};
use std::net::IpAddr;
use std::path::PathBuf;
use std::process::Output;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Exit code `ip route` uses when the kernel reports the lookup target as
/// unreachable, and when deleting a route that does not exist.
pub const NOT_ROUTABLE_EXIT_CODE: i32 = 2;

/// Direct routing backend: one `ip` invocation per operation.
#[derive(Debug, Clone)]
pub struct IpRoute2 {
    binary: PathBuf,
}

impl IpRoute2 {
    /// Create a backend that runs the given `ip` binary (a bare name is
    /// resolved through `PATH`).
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run(&self, args: &[String]) -> Result<Output> {
        debug!(command = %self.describe(args), "Running ip command");

        Command::new(&self.binary)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::command(self.describe(args), e))
    }

    fn describe(&self, args: &[String]) -> String {
        format!("{} {}", self.binary.display(), args.join(" "))
    }

    fn failure(&self, args: &[String], output: &Output) -> Error {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Error::command(
            self.describe(args),
            format!("{} ({})", output.status, stderr.trim()),
        )
    }
}

#[async_trait]
impl RoutingBackend for IpRoute2 {
    async fn install_route(&self, failover: IpAddr, target: IpAddr) -> Result<()> {
        ensure_same_family(failover, target)?;

        let args = replace_args(failover, target);
        let output = self.run(&args).await?;
        if !output.status.success() {
            return Err(self.failure(&args, &output));
        }

        info!(failover = %failover, target = %target, "Route replaced");
        Ok(())
    }

    async fn remove_route(&self, failover: IpAddr) -> Result<()> {
        let args = delete_args(failover);
        let output = self.run(&args).await?;
        if output.status.success() {
            info!(failover = %failover, "Route deleted");
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if output.status.code() == Some(NOT_ROUTABLE_EXIT_CODE) && stderr.contains("No such process")
        {
            debug!(failover = %failover, "No route to delete");
            return Ok(());
        }

        Err(self.failure(&args, &output))
    }

    async fn query_route(&self, failover: IpAddr) -> Result<Option<IpAddr>> {
        let args = get_args(failover);
        let output = self.run(&args).await?;

        if output.status.code() == Some(NOT_ROUTABLE_EXIT_CODE) {
            debug!(failover = %failover, "Address is not routable");
            return Ok(None);
        }
        if !output.status.success() {
            return Err(self.failure(&args, &output));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_via(&stdout).inspect_err(|e| {
            warn!(failover = %failover, error = %e, "Unexpected ip route output");
        })
    }

    fn name(&self) -> &'static str {
        "iproute2"
    }
}

fn family_args(addr: IpAddr) -> Vec<String> {
    if addr.is_ipv4() {
        Vec::new()
    } else {
        vec!["-6".to_string()]
    }
}

fn route_args(failover: IpAddr, rest: &[String]) -> Vec<String> {
    let mut args = family_args(failover);
    args.push("route".to_string());
    args.extend_from_slice(rest);
    args
}

pub(crate) fn replace_args(failover: IpAddr, target: IpAddr) -> Vec<String> {
    route_args(
        failover,
        &[
            "replace".to_string(),
            failover.to_string(),
            "via".to_string(),
            target.to_string(),
        ],
    )
}

pub(crate) fn delete_args(failover: IpAddr) -> Vec<String> {
    route_args(failover, &["delete".to_string(), failover.to_string()])
}

pub(crate) fn get_args(failover: IpAddr) -> Vec<String> {
    route_args(failover, &["get".to_string(), failover.to_string()])
}

/// Extract the next hop from `ip route get` output.
///
/// Output without a `via` clause (local or directly connected destinations)
/// yields `Ok(None)`.
pub(crate) fn parse_via(output: &str) -> Result<Option<IpAddr>> {
    let mut tokens = output.split_whitespace();

    while let Some(token) = tokens.next() {
        if token != "via" {
            continue;
        }

        let mut hop = tokens.next();
        // RFC 5549 style: "via inet6 fe80::1"
        if matches!(hop, Some("inet") | Some("inet6")) {
            hop = tokens.next();
        }

        return match hop {
            Some(hop) => hop
                .parse()
                .map(Some)
                .map_err(|_| Error::routing(format!("invalid next hop '{}'", hop))),
            None => Err(Error::routing("'via' without next hop")),
        };
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_replace_args_v4() {
        assert_eq!(
            replace_args(ip("10.0.0.100"), ip("10.0.0.1")),
            vec!["route", "replace", "10.0.0.100", "via", "10.0.0.1"]
        );
    }

    #[test]
    fn test_replace_args_v6() {
        assert_eq!(
            replace_args(ip("fd00::100"), ip("fd00::1")),
            vec!["-6", "route", "replace", "fd00::100", "via", "fd00::1"]
        );
    }

    #[test]
    fn test_delete_and_get_args() {
        assert_eq!(delete_args(ip("10.0.0.100")), vec!["route", "delete", "10.0.0.100"]);
        assert_eq!(get_args(ip("fd00::100")), vec!["-6", "route", "get", "fd00::100"]);
    }

    #[test]
    fn test_parse_via_v4() {
        let out = "10.0.0.100 via 10.0.0.1 dev eth0 src 10.0.0.5 uid 0 \n    cache \n";
        assert_eq!(parse_via(out).unwrap(), Some(ip("10.0.0.1")));
    }

    #[test]
    fn test_parse_via_v6() {
        let out = "fd00::100 from :: via fd00::1 dev eth0 proto static src fd00::5 metric 1024 pref medium\n";
        assert_eq!(parse_via(out).unwrap(), Some(ip("fd00::1")));
    }

    #[test]
    fn test_parse_via_inet6_nexthop() {
        let out = "10.0.0.100 via inet6 fe80::1 dev eth0 src 10.0.0.5 uid 0\n";
        assert_eq!(parse_via(out).unwrap(), Some(ip("fe80::1")));
    }

    #[test]
    fn test_parse_without_via_is_absent() {
        let out = "local 10.0.0.5 dev lo table local src 10.0.0.5 uid 0\n    cache <local>\n";
        assert_eq!(parse_via(out).unwrap(), None);
        assert_eq!(parse_via("").unwrap(), None);
    }

    #[test]
    fn test_parse_garbage_next_hop() {
        assert!(parse_via("10.0.0.100 via nonsense dev eth0").is_err());
        assert!(parse_via("10.0.0.100 via").is_err());
    }

    // `true` and `false` ignore their arguments, which makes them handy
    // stand-ins for a succeeding and a failing `ip` binary.

    #[tokio::test]
    async fn test_successful_tool_installs_and_removes() {
        let backend = IpRoute2::new("true");
        tokio_test::assert_ok!(
            backend
                .install_route(ip("10.0.0.100"), ip("10.0.0.1"))
                .await
        );
        tokio_test::assert_ok!(backend.remove_route(ip("fd00::100")).await);
        assert_eq!(backend.query_route(ip("10.0.0.100")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_failing_tool_reports_errors() {
        let backend = IpRoute2::new("false");
        let err = backend
            .install_route(ip("10.0.0.100"), ip("10.0.0.1"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Command { .. }));

        tokio_test::assert_err!(backend.remove_route(ip("10.0.0.100")).await);
        tokio_test::assert_err!(backend.query_route(ip("10.0.0.100")).await);
    }

    #[tokio::test]
    async fn test_missing_binary_is_an_error() {
        let backend = IpRoute2::new("/nonexistent/bin/ip");
        tokio_test::assert_err!(backend.query_route(ip("10.0.0.100")).await);
    }

    #[tokio::test]
    async fn test_family_mismatch_never_spawns() {
        let backend = IpRoute2::new("/nonexistent/bin/ip");
        let err = backend
            .install_route(ip("10.0.0.100"), ip("fd00::1"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Routing(_)));
    }
}
