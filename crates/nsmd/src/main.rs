//! Manager Daemon Entry Point

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use nsm_connect::StaticDialer;
use nsmd::{Config, LocalIdentity, LoggingAgent, NsmService, StaticRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .init();

    let config = Config::parse();
    info!(name = %config.name, "Starting nsmd");

    let registry = match &config.registry_file {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading registry file {}", path.display()))?;
            let registry = StaticRegistry::from_json(&raw)
                .with_context(|| format!("parsing registry file {}", path.display()))?;
            info!(endpoints = registry.len(), "registry loaded");
            registry
        }
        None => StaticRegistry::default(),
    };

    let identity = Arc::new(LocalIdentity::new(config.lease()));
    let service = NsmService::new(
        &config,
        Arc::new(registry),
        Arc::new(StaticDialer::new()),
        Arc::new(LoggingAgent),
        identity,
    )
    .await
    .context("building service")?;

    info!(name = %service.name(), "nsmd initialized successfully");

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("Shutting down nsmd");
    Ok(())
}
