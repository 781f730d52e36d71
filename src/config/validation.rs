//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, limits sane)
//! - Check that policy values parse (header names, IPs, credentials)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::{IpAddr, SocketAddr};

use http::header::HeaderName;
use thiserror::Error;

use crate::config::schema::ProxyConfig;

/// Smallest head buffer that still fits a realistic request.
const MIN_HEADER_BYTES: usize = 1024;

/// A single semantic problem found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Validate a parsed configuration, collecting every problem.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let listener = &config.listener;
    if listener.bind_address.trim().is_empty() {
        errors.push(ValidationError::new("listener.bind_address", "must not be empty"));
    } else if listener.bind_address.rsplit_once(':').is_none() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not host:port", listener.bind_address),
        ));
    }
    if listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be greater than 0"));
    }
    if listener.max_header_bytes < MIN_HEADER_BYTES {
        errors.push(ValidationError::new(
            "listener.max_header_bytes",
            format!("must be at least {}", MIN_HEADER_BYTES),
        ));
    }

    let timeouts = &config.timeouts;
    for (field, value) in [
        ("timeouts.connect_secs", timeouts.connect_secs),
        ("timeouts.header_read_secs", timeouts.header_read_secs),
        ("timeouts.request_secs", timeouts.request_secs),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be greater than 0"));
        }
    }
    if timeouts.tunnel_secs == Some(0) {
        errors.push(ValidationError::new(
            "timeouts.tunnel_secs",
            "must be greater than 0 or omitted",
        ));
    }

    let policy = &config.policy;
    if let Some(name) = &policy.probe_header {
        if HeaderName::from_bytes(name.as_bytes()).is_err() {
            errors.push(ValidationError::new(
                "policy.probe_header",
                format!("'{}' is not a valid header name", name),
            ));
        }
    }
    for ip in &policy.allowed_ips {
        if ip.parse::<IpAddr>().is_err() {
            errors.push(ValidationError::new(
                "policy.allowed_ips",
                format!("'{}' is not an IP address", ip),
            ));
        }
    }
    if let Some(auth) = &policy.auth {
        if auth.username.is_empty() {
            errors.push(ValidationError::new("policy.auth.username", "must not be empty"));
        }
        if auth.username.contains(':') {
            errors.push(ValidationError::new("policy.auth.username", "must not contain ':'"));
        }
        if auth.realm.contains('"') {
            errors.push(ValidationError::new("policy.auth.realm", "must not contain '\"'"));
        }
    }

    let observability = &config.observability;
    if observability.metrics_enabled
        && observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
