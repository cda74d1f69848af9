use std::path::PathBuf;
use std::process::exit;

use clap::Parser;

use tlsmirror::config::{FromPath, ProxyConfig};
use tlsmirror::server::ProxyServer;
use tlsmirror::utils::tracing::log_subscriber;
use tlsmirror::Result;
use tracing::{error, info};

#[derive(Parser)]
#[command(
    name = "tlsmirror",
    about = "TLS-intercepting proxy that mirrors the client's handshake upstream"
)]
struct Cli {
    #[arg(long, default_value = "tlsmirror.toml")]
    config: PathBuf,
    #[arg(long, default_value = "TLSMIRROR_")]
    env_prefix: String,
}

#[tokio::main]
async fn main() {
    let _logger = tracing::subscriber::set_default(log_subscriber("info"));
    let cli = Cli::parse();

    if let Err(e) = run(cli.config, cli.env_prefix).await {
        error!("A critical error occurred: {e}");
        exit(1);
    }
}

async fn run(config_path: PathBuf, env_prefix: String) -> Result<()> {
    let config = ProxyConfig::from_path(&config_path, &env_prefix)?;
    tracing::subscriber::set_global_default(log_subscriber(&config.log.level))?;

    info!("Loaded configuration from {:?}", config_path);
    let server = ProxyServer::from_config(&config)?;
    server.run().await
}
