//! Host IPAM Controller
//!
//! Assigns IPv4 addresses from statically configured ranges to the hosts
//! declared in `HostIPAM` resources, and records each assignment in the
//! resource status.

mod allocation;
mod backoff;
mod config;
mod controller;
mod differ;
mod error;
mod pool;
mod range;
mod recovery;
mod request;
mod status;
#[cfg(test)]
mod test_utils;
mod watcher;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting Host IPAM Controller");

    let config = ControllerConfig::from_env()?;

    info!("Configuration:");
    info!("  Ranges: {}", config.ranges);
    info!("  Namespace: {}", config.namespace);
    info!("  Binding policy: {}", config.binding_policy);
    info!(
        "  Store: {}",
        config
            .store_path
            .as_ref()
            .map_or_else(|| "in-memory".to_string(), |p| p.display().to_string())
    );
    info!(
        "  Queues: {} requests, {} responses ({})",
        config.request_queue_capacity, config.response_queue_capacity, config.response_overflow
    );

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
