use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use gossip_server::config::{self, Config};
use gossip_server::daemon::Daemon;

#[derive(Parser, Debug)]
#[command(name = "gossip-server", version, about = "Peer-to-peer gossip overlay daemon")]
struct Cli {
    /// Configuration file path.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Use JSON logs in production (GOSSIP_LOG_JSON=1), human-readable otherwise.
    let json_logs = std::env::var("GOSSIP_LOG_JSON").unwrap_or_default() == "1";
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gossip_server=info"));
    if json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let cli = Cli::parse();
    let config_path = match config::locate_config(cli.config.as_deref()) {
        Ok(path) => path,
        Err(err) => {
            tracing::error!("{err}");
            return ExitCode::from(1);
        }
    };
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!("cannot load {}: {err}", config_path.display());
            return ExitCode::from(1);
        }
    };

    tracing::info!(
        config = %config_path.display(),
        hostkey = %config.host_key_path.display(),
        "starting gossip daemon"
    );
    tracing::info!(p2p = %config.listen_address, api = %config.api_address, "listening");
    if let Some(bootstrapper) = config.bootstrapper {
        tracing::info!(peer = %bootstrapper, "bootstrapper configured");
    }

    let daemon = match Daemon::spawn(config).await {
        Ok(daemon) => daemon,
        Err(err) => {
            tracing::error!("cannot start daemon: {err:#}");
            return ExitCode::FAILURE;
        }
    };

    let code = daemon.run().await;
    if code == 0 {
        tracing::info!("gossip exited cleanly");
    } else {
        tracing::error!(code, "gossip tasks exited abnormally");
    }
    ExitCode::from(code as u8)
}
