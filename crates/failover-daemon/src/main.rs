//! Failover daemon binary
//!
//! Usage: `failover-daemon [config-file]`

use failover_daemon::{Config, FailoverDaemon, setup_tracing};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Tracing is not set up yet, so configuration errors go to stderr
    let config = match std::env::args().nth(1) {
        Some(path) => Config::load_from_file(&path),
        None => Config::load(),
    };
    let config = match config {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let _telemetry_guard = setup_tracing(
        &config.telemetry,
        config.logging.level(),
        config.logging.is_json(),
    )?;

    tracing::info!(
        listen = %config.listen,
        servers = config.servers.len(),
        "Failover daemon starting"
    );

    let daemon = FailoverDaemon::new(config.to_daemon_config());
    daemon.run().await?;

    // Telemetry guard will flush spans on drop

    Ok(())
}
