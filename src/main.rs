//! `hide` command-line entry point.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use hide_proxy::config::loader::apply_env_overrides;
use hide_proxy::config::validation::validate_config;
use hide_proxy::config::{load_config, ConfigError, ProxyConfig, DEFAULT_PORT};
use hide_proxy::lifecycle;
use hide_proxy::observability::logging::init_logging;

#[derive(Parser)]
#[command(name = "hide")]
#[command(about = "Forward HTTP proxy with CONNECT tunneling", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the proxy until interrupted
    Serve {
        /// Port to listen on [default: 8181]
        #[arg(short, long)]
        port: Option<u16>,

        /// Interface to bind [default: 0.0.0.0]
        #[arg(short, long)]
        bind: Option<String>,

        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port, bind, config } => {
            let mut config = match config {
                Some(path) => load_config(&path)?,
                None => {
                    let mut config = ProxyConfig::default();
                    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
                    config
                }
            };

            if bind.is_some() || port.is_some() {
                config.listener.bind_address = listen_address(bind.as_deref(), port);
            }
            validate_config(&config).map_err(ConfigError::Validation)?;

            init_logging(&config.observability)?;
            tracing::info!(
                version = env!("CARGO_PKG_VERSION"),
                bind_address = %config.listener.bind_address,
                auth = config.policy.auth.is_some(),
                probe = config.policy.probe_header.is_some(),
                "hide starting"
            );

            lifecycle::run(config).await?;
        }
    }

    Ok(())
}

/// Combine CLI bind host and port, bracketing bare IPv6 hosts.
fn listen_address(bind: Option<&str>, port: Option<u16>) -> String {
    let host = bind.unwrap_or("0.0.0.0");
    let port = port.unwrap_or(DEFAULT_PORT);
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}
