//! API Controller
//!
//! Exposes in-cluster services through the Istio gateway. For every
//! ApiExposure it maintains:
//! - VirtualService: routes the exposure's hostname to the backend service
//! - Policy: JWT and mTLS authentication, when enabled
//! - Ingress: legacy routing, when `ENABLE_LEGACY_INGRESS` is set
//!
//! Progress and failures are reported on the ApiExposure status.

mod backoff;
mod config;
mod controller;
mod drivers;
mod error;
mod event;
mod metrics;
mod queue;
mod reconciler;
mod status;
mod validation;
mod watcher;
mod worker;

#[cfg(test)]
mod test_utils;
#[cfg(test)]
mod validation_test;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    // LOG_LEVEL takes precedence over RUST_LOG
    let filter = std::env::var("LOG_LEVEL")
        .ok()
        .and_then(|level| EnvFilter::try_new(level).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("A rustls crypto provider was already installed");
    }

    info!("Starting API Controller");

    let config = ControllerConfig::from_env()?;
    info!("Configuration:");
    info!("  Domain: {}", config.domain);
    info!("  Gateway: {}", config.gateway);
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Workers: {} (max retries {})", config.workers, config.max_retries);
    info!("  Blacklisted services: {}", config.blacklist);
    info!("  Legacy Ingress: {}", config.legacy_ingress);
    info!("  Metrics address: {}", config.metrics_addr);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
