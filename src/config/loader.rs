//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::{default_realm, AuthConfig, ProxyConfig};
use crate::config::validation::{validate_config, ValidationError};

/// Environment variable holding the proxy username.
pub const USERNAME_ENV: &str = "PROXY_USERNAME";
/// Environment variable holding the proxy password.
pub const PASSWORD_ENV: &str = "PROXY_PASSWORD";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let mut config = parse_config(&content)?;

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Parse TOML text without touching the environment or validating.
pub fn parse_config(content: &str) -> Result<ProxyConfig, ConfigError> {
    Ok(toml::from_str(content)?)
}

/// Take credentials from the environment when both variables are set.
///
/// Environment credentials replace any configured in the file; the realm is kept.
pub fn apply_env_overrides<F>(config: &mut ProxyConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let (Some(username), Some(password)) = (lookup(USERNAME_ENV), lookup(PASSWORD_ENV)) else {
        return;
    };
    if username.is_empty() {
        return;
    }

    let realm = config
        .policy
        .auth
        .as_ref()
        .map(|auth| auth.realm.clone())
        .unwrap_or_else(default_realm);

    tracing::debug!(username = %username, "Using proxy credentials from environment");
    config.policy.auth = Some(AuthConfig {
        username,
        password,
        realm,
    });
}
