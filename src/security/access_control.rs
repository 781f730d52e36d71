//! Access policy evaluated once per connection, before dispatch.
//!
//! Evaluation order for [`StaticPolicy`]:
//! 1. Probe header present → `ProbeRespond` (no credentials needed)
//! 2. Client IP allowlist (when configured) → `Deny` 403
//! 3. Basic credentials (when configured) → `Deny` 407 with challenge
//! 4. `Allow`
//!
//! Missing, malformed and wrong credentials all produce the same denial.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use http::header::{HeaderName, HeaderValue, PROXY_AUTHORIZATION};
use http::StatusCode;

use crate::config::validation::ValidationError;
use crate::config::{ConfigError, PolicyConfig};
use crate::http::request::ProxyRequest;
use crate::security::auth::{basic_challenge, BasicCredentials};

/// Outcome of evaluating a request against the access policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    Deny(Denial),
    ProbeRespond,
}

impl PolicyDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyDecision::Allow => "allow",
            PolicyDecision::Deny(_) => "deny",
            PolicyDecision::ProbeRespond => "probe",
        }
    }
}

/// Response details for a denied request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    pub status: StatusCode,
    pub reason: String,
    /// `Proxy-Authenticate` value, set for authentication failures.
    pub challenge: Option<HeaderValue>,
}

/// Decides whether a request may be proxied.
pub trait AccessPolicy: Send + Sync {
    fn evaluate(&self, request: &ProxyRequest, peer: SocketAddr) -> PolicyDecision;
}

/// Policy used when nothing is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessPolicy for AllowAll {
    fn evaluate(&self, _request: &ProxyRequest, _peer: SocketAddr) -> PolicyDecision {
        PolicyDecision::Allow
    }
}

/// Policy built from static configuration. Each concern is optional.
#[derive(Debug, Clone, Default)]
pub struct StaticPolicy {
    probe_header: Option<HeaderName>,
    allowed_ips: Vec<IpAddr>,
    credentials: Option<BasicCredentials>,
    challenge: Option<HeaderValue>,
}

impl StaticPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer requests carrying `header` as liveness probes.
    pub fn with_probe_header(mut self, header: HeaderName) -> Self {
        self.probe_header = Some(header);
        self
    }

    /// Only serve clients from these addresses.
    pub fn with_allowed_ips(mut self, ips: impl IntoIterator<Item = IpAddr>) -> Self {
        self.allowed_ips = ips.into_iter().map(|ip| ip.to_canonical()).collect();
        self
    }

    /// Require Basic proxy credentials, challenging with `realm`.
    pub fn with_credentials(mut self, credentials: BasicCredentials, realm: &str) -> Self {
        self.credentials = Some(credentials);
        self.challenge = Some(basic_challenge(realm));
        self
    }

    pub fn from_config(config: &PolicyConfig) -> Result<Self, ConfigError> {
        let mut policy = Self::new();

        if let Some(name) = &config.probe_header {
            let header = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                invalid("policy.probe_header", format!("'{}' is not a valid header name", name))
            })?;
            policy = policy.with_probe_header(header);
        }

        let ips = config
            .allowed_ips
            .iter()
            .map(|ip| {
                ip.parse::<IpAddr>().map_err(|_| {
                    invalid("policy.allowed_ips", format!("'{}' is not an IP address", ip))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        policy = policy.with_allowed_ips(ips);

        if let Some(auth) = &config.auth {
            let credentials = BasicCredentials::new(&auth.username, &auth.password);
            policy = policy.with_credentials(credentials, &auth.realm);
        }

        Ok(policy)
    }

    fn is_probe(&self, request: &ProxyRequest) -> bool {
        self.probe_header
            .as_ref()
            .is_some_and(|name| request.header(name).is_some())
    }

    fn ip_allowed(&self, peer: SocketAddr) -> bool {
        self.allowed_ips.is_empty() || self.allowed_ips.contains(&peer.ip().to_canonical())
    }
}

impl AccessPolicy for StaticPolicy {
    fn evaluate(&self, request: &ProxyRequest, peer: SocketAddr) -> PolicyDecision {
        if self.is_probe(request) {
            return PolicyDecision::ProbeRespond;
        }

        if !self.ip_allowed(peer) {
            return PolicyDecision::Deny(Denial {
                status: StatusCode::FORBIDDEN,
                reason: "Client address not allowed".to_string(),
                challenge: None,
            });
        }

        if let Some(credentials) = &self.credentials {
            if !credentials.verify(request.header(&PROXY_AUTHORIZATION)) {
                return PolicyDecision::Deny(Denial {
                    status: StatusCode::PROXY_AUTHENTICATION_REQUIRED,
                    reason: "Proxy authentication required".to_string(),
                    challenge: self.challenge.clone(),
                });
            }
        }

        PolicyDecision::Allow
    }
}

/// Build the policy described by `config`; [`AllowAll`] when nothing is enabled.
pub fn build_policy(config: &PolicyConfig) -> Result<Arc<dyn AccessPolicy>, ConfigError> {
    if !config.is_enabled() {
        return Ok(Arc::new(AllowAll));
    }
    Ok(Arc::new(StaticPolicy::from_config(config)?))
}

fn invalid(field: &'static str, message: String) -> ConfigError {
    ConfigError::Validation(vec![ValidationError { field, message }])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;
    use crate::http::request::read_request_head;

    const PEER: &str = "192.0.2.10:40000";

    async fn request(raw: &str) -> ProxyRequest {
        let mut reader = raw.as_bytes();
        read_request_head(&mut reader, 8192).await.unwrap()
    }

    fn peer() -> SocketAddr {
        PEER.parse().unwrap()
    }

    fn auth_policy() -> StaticPolicy {
        StaticPolicy::new()
            .with_probe_header(HeaderName::from_static("x-ping"))
            .with_credentials(BasicCredentials::new("alice", "secret"), "hide")
    }

    #[tokio::test]
    async fn allow_all_allows() {
        let req = request("CONNECT example.com:443 HTTP/1.1\r\n\r\n").await;
        assert_eq!(AllowAll.evaluate(&req, peer()), PolicyDecision::Allow);
    }

    #[tokio::test]
    async fn probe_wins_over_bad_credentials() {
        let req = request(
            "GET http://example.com/ HTTP/1.1\r\nX-Ping: 1\r\nProxy-Authorization: Basic bm9wZQ==\r\n\r\n",
        )
        .await;
        assert_eq!(auth_policy().evaluate(&req, peer()), PolicyDecision::ProbeRespond);
    }

    #[tokio::test]
    async fn credential_failures_are_indistinguishable() {
        let policy = auth_policy();
        let missing = request("CONNECT example.com:443 HTTP/1.1\r\n\r\n").await;
        let malformed =
            request("CONNECT example.com:443 HTTP/1.1\r\nProxy-Authorization: Basic\r\n\r\n").await;
        let wrong = request(
            "CONNECT example.com:443 HTTP/1.1\r\nProxy-Authorization: Basic YWxpY2U6d3Jvbmc=\r\n\r\n",
        )
        .await;

        let decisions: Vec<_> = [missing, malformed, wrong]
            .iter()
            .map(|req| policy.evaluate(req, peer()))
            .collect();

        let PolicyDecision::Deny(denial) = &decisions[0] else {
            panic!("expected deny, got {:?}", decisions[0]);
        };
        assert_eq!(denial.status, StatusCode::PROXY_AUTHENTICATION_REQUIRED);
        assert_eq!(denial.challenge.as_ref().unwrap(), "Basic realm=\"hide\"");
        assert_eq!(decisions[0], decisions[1]);
        assert_eq!(decisions[1], decisions[2]);
    }

    #[tokio::test]
    async fn valid_credentials_allowed() {
        let header = BasicCredentials::new("alice", "secret").to_header_value();
        let raw = format!(
            "CONNECT example.com:443 HTTP/1.1\r\nProxy-Authorization: {}\r\n\r\n",
            header.to_str().unwrap()
        );
        let req = request(&raw).await;
        assert_eq!(auth_policy().evaluate(&req, peer()), PolicyDecision::Allow);
    }

    #[tokio::test]
    async fn ip_allowlist_denies_strangers() {
        let policy = StaticPolicy::new().with_allowed_ips(["127.0.0.1".parse().unwrap()]);
        let req = request("CONNECT example.com:443 HTTP/1.1\r\n\r\n").await;

        let PolicyDecision::Deny(denial) = policy.evaluate(&req, peer()) else {
            panic!("expected deny");
        };
        assert_eq!(denial.status, StatusCode::FORBIDDEN);
        assert!(denial.challenge.is_none());

        let local: SocketAddr = "127.0.0.1:5555".parse().unwrap();
        assert_eq!(policy.evaluate(&req, local), PolicyDecision::Allow);

        let mapped: SocketAddr = "[::ffff:127.0.0.1]:5555".parse().unwrap();
        assert_eq!(policy.evaluate(&req, mapped), PolicyDecision::Allow);
    }

    #[tokio::test]
    async fn build_policy_from_config() {
        let allow_all = build_policy(&PolicyConfig::default()).unwrap();
        let req = request("CONNECT example.com:443 HTTP/1.1\r\n\r\n").await;
        assert_eq!(allow_all.evaluate(&req, peer()), PolicyDecision::Allow);

        let config = PolicyConfig {
            probe_header: Some("X-Ping".to_string()),
            allowed_ips: vec![],
            auth: Some(AuthConfig {
                username: "alice".to_string(),
                password: "secret".to_string(),
                realm: "hide".to_string(),
            }),
        };
        let policy = build_policy(&config).unwrap();
        assert!(matches!(policy.evaluate(&req, peer()), PolicyDecision::Deny(_)));
    }

    #[test]
    fn invalid_config_rejected() {
        let config = PolicyConfig {
            allowed_ips: vec!["nope".to_string()],
            ..PolicyConfig::default()
        };
        assert!(matches!(
            StaticPolicy::from_config(&config),
            Err(ConfigError::Validation(_))
        ));
    }
}
