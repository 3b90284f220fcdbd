use anyhow::{anyhow, Result};
use clap::Parser;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

mod config;
mod server;

use crate::config::{Config, LogFormat};
use crate::server::RegistryServer;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    init_tracing(&config)?;

    let server = RegistryServer::new(config).await.map_err(|e| {
        tracing::error!("failed to start registry server: {e:#}");
        e
    })?;
    server.run().await.map_err(|e| {
        tracing::error!("registry server failed: {e:#}");
        e
    })
}

fn init_tracing(config: &Config) -> Result<()> {
    let level: LevelFilter = config
        .log_level
        .parse()
        .map_err(|_| anyhow!("invalid log level: '{}'", config.log_level))?;
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    match config.log_format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .compact()
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .init(),
    }
    Ok(())
}
