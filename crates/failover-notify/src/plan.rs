//! Turn a keepalived state transition into per-address actions.

use crate::config::NotifyConfig;
use anyhow::{Result, anyhow, bail};
use std::net::IpAddr;
use std::str::FromStr;

/// Target state reported by keepalived
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterState {
    Master,
    Backup,
    Fault,
}

impl FromStr for RouterState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "MASTER" => Ok(RouterState::Master),
            "BACKUP" => Ok(RouterState::Backup),
            "FAULT" => Ok(RouterState::Fault),
            other => Err(anyhow!("unknown state {:?}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressChange {
    Add,
    Delete,
}

/// Call against the failover API
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiRequest {
    /// `POST active_server_ip=<target>`
    Route { url: String, target: IpAddr },
    /// `DELETE`, the address returns to its owner
    Clear { url: String },
}

/// Everything to do for one floating address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub address: IpAddr,
    pub change: AddressChange,
    pub request: Option<ApiRequest>,
}

/// Actions for every address of the peer router.
///
/// On `MASTER` the address is added locally and, unless the addresses are
/// private, routed here through the API. Routing to the owner itself is a
/// `DELETE`.
pub fn plan(config: &NotifyConfig, state: RouterState) -> Result<Vec<Action>> {
    let mut actions = Vec::new();

    for address in config.peer_addresses() {
        let action = match state {
            RouterState::Backup | RouterState::Fault => Action {
                address,
                change: AddressChange::Delete,
                request: None,
            },
            RouterState::Master => Action {
                address,
                change: AddressChange::Add,
                request: api_request(config, address)?,
            },
        };
        actions.push(action);
    }

    Ok(actions)
}

fn api_request(config: &NotifyConfig, address: IpAddr) -> Result<Option<ApiRequest>> {
    if config.use_private_ips {
        return Ok(None);
    }

    let url = config.url_for(address);
    if config.peer_router_id == config.this_router_id {
        return Ok(Some(ApiRequest::Clear { url }));
    }

    let Some(target) = config.own_address(address) else {
        bail!(
            "router {} has no floating address of the same family as {}",
            config.this_router_id,
            address
        );
    };
    Ok(Some(ApiRequest::Route { url, target }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_state() {
        assert_eq!("MASTER".parse::<RouterState>().unwrap(), RouterState::Master);
        assert_eq!("FAULT".parse::<RouterState>().unwrap(), RouterState::Fault);
        assert!("STOP".parse::<RouterState>().is_err());
        assert!("master".parse::<RouterState>().is_err());
    }

    #[test]
    fn test_backup_only_deletes_addresses() {
        let actions = plan(&sample(), RouterState::Backup).unwrap();

        assert_eq!(actions.len(), 2);
        for action in &actions {
            assert_eq!(action.change, AddressChange::Delete);
            assert!(action.request.is_none());
        }
        assert_eq!(actions[0].address, ip("10.0.0.200"));
    }

    #[test]
    fn test_master_routes_peer_addresses_here() {
        let actions = plan(&sample(), RouterState::Master).unwrap();

        assert_eq!(
            actions,
            vec![
                Action {
                    address: ip("10.0.0.200"),
                    change: AddressChange::Add,
                    request: Some(ApiRequest::Route {
                        url: "http://10.0.0.254:8080/10.0.0.200".into(),
                        target: ip("10.0.0.100"),
                    }),
                },
                Action {
                    address: ip("fd00::200"),
                    change: AddressChange::Add,
                    request: Some(ApiRequest::Route {
                        url: "http://10.0.0.254:8080/fd00::200/64".into(),
                        target: ip("fd00::100"),
                    }),
                },
            ]
        );
    }

    #[test]
    fn test_master_on_owner_clears_route() {
        let mut config = sample();
        config.this_router_id = 2;

        let actions = plan(&config, RouterState::Master).unwrap();
        assert!(
            actions
                .iter()
                .all(|a| matches!(a.request, Some(ApiRequest::Clear { .. })))
        );
    }

    #[test]
    fn test_private_addresses_skip_api() {
        let mut config = sample();
        config.use_private_ips = true;

        let actions = plan(&config, RouterState::Master).unwrap();
        assert!(actions.iter().all(|a| a.request.is_none()));
    }

    #[test]
    fn test_missing_own_address_is_an_error() {
        let mut config = sample();
        config.floating_ips.retain(|f| !(f.router == 1 && f.ip.is_ipv6()));

        assert!(plan(&config, RouterState::Master).is_err());
        assert!(plan(&config, RouterState::Backup).is_ok());
    }
}
