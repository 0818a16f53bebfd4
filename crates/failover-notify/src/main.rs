//! keepalived notify hook for failover addresses
//!
//! Usage: `failover-notify <type> <name> <state>`
//!
//! On `MASTER` the peer router's floating addresses are added to the local
//! interface and routed to this router through the failover API. On `BACKUP`
//! and `FAULT` they are removed from the interface.

mod config;
mod exec;
mod plan;

use anyhow::{Context, Result, bail};
use config::NotifyConfig;
use exec::Executor;
use futures::future::join_all;
use plan::RouterState;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    common::logging::init("info");

    let args: Vec<String> = std::env::args().skip(1).collect();
    let [kind, name, state] = args.as_slice() else {
        bail!("usage: failover-notify <type> <name> <state>");
    };
    let state: RouterState = state.parse()?;

    let path = NotifyConfig::default_path()?;
    let config = NotifyConfig::load(&path)
        .with_context(|| format!("loading configuration from {}", path.display()))?;

    info!(
        kind = %kind,
        name = %name,
        state = ?state,
        router = config.peer_router_id,
        this_router = config.this_router_id,
        "Handling transition"
    );

    let actions = plan::plan(&config, state)?;
    let executor = Executor::new(&config)?;

    let results = join_all(actions.iter().map(|action| executor.run(action))).await;

    let mut failed = 0;
    for (action, result) in actions.iter().zip(results) {
        if let Err(e) = result {
            error!(address = %action.address, error = ?e, "Action failed");
            failed += 1;
        }
    }

    if failed > 0 {
        bail!("{} of {} actions failed", failed, actions.len());
    }

    info!(actions = actions.len(), "Transition handled");
    Ok(())
}
