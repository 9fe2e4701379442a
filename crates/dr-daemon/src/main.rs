//! drover daemon -- reconciles declared polecat specs against the real gt
//! sessions behind them.

use anyhow::Result;
use tracing::{info, warn};

use dr_core::config::Config;
use dr_daemon::Daemon;

#[tokio::main]
async fn main() -> Result<()> {
    let (config, load_error) = load_config();

    match config.general.log_format.as_str() {
        "json" => dr_telemetry::logging::init_logging_json("dr-daemon", &config.general.log_level),
        _ => dr_telemetry::logging::init_logging("dr-daemon", &config.general.log_level),
    }
    if let Some(e) = load_error {
        warn!(error = %e, "failed to load config, using defaults");
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        rig = %config.gt.rig,
        gt = %config.gt.binary,
        "drover daemon starting"
    );

    let daemon = Daemon::new(config);
    let shutdown = daemon.shutdown_handle();

    // Wire ctrl-c to graceful shutdown.
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        info!("ctrl-c received, initiating shutdown");
        shutdown.trigger();
    });

    daemon.run().await?;
    info!("drover daemon stopped");
    Ok(())
}

/// Load config from `DROVER_CONFIG` or the default path. A load failure is
/// reported after logging comes up, not swallowed.
fn load_config() -> (Config, Option<String>) {
    let loaded = match std::env::var("DROVER_CONFIG") {
        Ok(path) => Config::load_from(path),
        Err(_) => Config::load(),
    };
    match loaded {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e.to_string())),
    }
}
