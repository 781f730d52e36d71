//! Startup orchestration.
//!
//! # Order
//! 1. Metrics exporter (when enabled)
//! 2. Access policy from config
//! 3. Listener bind
//! 4. Accept loop, stopped by SIGINT/SIGTERM
//!
//! Logging is installed by the binary before any of this runs. Any startup
//! error is fatal.

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::{ConfigError, ProxyConfig};
use crate::error::ProxyError;
use crate::http::server::ProxyServer;
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals::spawn_signal_listener;
use crate::net::listener::Listener;
use crate::observability::{metrics, ObservabilityError};
use crate::security::access_control::build_policy;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("observability error: {0}")]
    Observability(#[from] ObservabilityError),

    #[error(transparent)]
    Proxy(#[from] ProxyError),
}

/// Run the proxy described by `config` until a stop signal arrives.
pub async fn run(config: ProxyConfig) -> Result<(), StartupError> {
    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse().map_err(|_| {
            ObservabilityError::Metrics(format!(
                "invalid metrics address '{}'",
                config.observability.metrics_address
            ))
        })?;
        metrics::init_metrics(addr)?;
    }

    let policy = build_policy(&config.policy)?;
    let listener = Listener::bind(&config.listener)
        .await
        .map_err(ProxyError::from)?;

    let shutdown = Shutdown::new();
    let stop = shutdown.subscribe();
    spawn_signal_listener(shutdown);

    ProxyServer::new(config, policy).run(listener, stop).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
