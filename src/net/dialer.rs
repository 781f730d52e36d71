//! Outbound connection establishment.
//!
//! The dialer is the only place the proxy opens sockets to destinations. It is
//! injected into the tunnel and forward paths so no HTTP client state is shared
//! between requests, and so tests can observe every dial.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::net::TcpStream;

use crate::error::ProxyError;
use crate::observability::metrics;

/// Opens a fresh connection to `host:port`.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, authority: &str) -> Result<TcpStream, ProxyError>;
}

/// Dials with `TcpStream::connect`, trying every resolved address (IPv4 and IPv6)
/// within one bounded timeout.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    timeout: Duration,
}

impl TcpDialer {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for TcpDialer {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, authority: &str) -> Result<TcpStream, ProxyError> {
        let start = Instant::now();
        let result = tokio::time::timeout(self.timeout, TcpStream::connect(authority)).await;

        let stream = match result {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                metrics::record_dial(start.elapsed(), false);
                return Err(ProxyError::Dial {
                    addr: authority.to_string(),
                    source,
                });
            }
            Err(_) => {
                metrics::record_dial(start.elapsed(), false);
                return Err(ProxyError::DialTimeout {
                    addr: authority.to_string(),
                    timeout: self.timeout,
                });
            }
        };

        metrics::record_dial(start.elapsed(), true);
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(authority = %authority, error = %e, "Failed to set TCP_NODELAY");
        }
        tracing::debug!(
            authority = %authority,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Dialed upstream"
        );
        Ok(stream)
    }
}
