//! CONNECT tunnel establishment and byte relaying.
//!
//! # Flow
//! ```text
//! CONNECT host:port
//!     → dial (bounded timeout; 503 to the client on failure, no retry)
//!     → "HTTP/1.1 200 Connection established"
//!     → replay bytes the client pipelined after the head
//!     → copy client→upstream and upstream→client concurrently
//!     → first side to finish ends the tunnel; both sockets close
//! ```
//!
//! Tunneled bytes are never inspected.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::ProxyError;
use crate::http::response::{write_response, CONNECTION_ESTABLISHED};
use crate::net::dialer::Dialer;
use crate::observability::metrics;

/// What ended a tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelaySide {
    Client,
    Upstream,
    /// The lifetime cap expired while both sides were still open.
    Deadline,
}

/// How a relay ended.
#[derive(Debug)]
pub struct RelayOutcome {
    /// Side whose read loop ended first, or the lifetime cap.
    pub ended_by: RelaySide,
    /// Bytes copied by that side, or the error that stopped it.
    pub result: io::Result<u64>,
}

/// Dials CONNECT targets and relays bytes between the two sockets.
pub struct TunnelRelay {
    dialer: Arc<dyn Dialer>,
    max_lifetime: Option<Duration>,
}

impl TunnelRelay {
    pub fn new(dialer: Arc<dyn Dialer>, max_lifetime: Option<Duration>) -> Self {
        Self {
            dialer,
            max_lifetime,
        }
    }

    /// Dial `authority` and, on success, tell the client the tunnel is open.
    ///
    /// A dial failure is answered with 503 over the still-open client socket.
    /// If the success line cannot be written the upstream socket is dropped here.
    pub async fn establish<C>(&self, client: &mut C, authority: &str) -> Result<TcpStream, ProxyError>
    where
        C: AsyncWrite + Unpin,
    {
        let upstream = match self.dialer.dial(authority).await {
            Ok(upstream) => upstream,
            Err(e) => {
                metrics::record_tunnel("dial_failed");
                tracing::debug!(authority = %authority, error = %e, "Tunnel dial failed");
                if let Err(write_err) =
                    write_response(client, StatusCode::SERVICE_UNAVAILABLE, &[], &e.to_string()).await
                {
                    tracing::debug!(error = %write_err, "Could not report dial failure to client");
                }
                return Err(e);
            }
        };

        client
            .write_all(CONNECTION_ESTABLISHED)
            .await
            .map_err(ProxyError::Write)?;
        client.flush().await.map_err(ProxyError::Write)?;

        metrics::record_tunnel("established");
        Ok(upstream)
    }

    /// Relay until either side finishes, then close both.
    ///
    /// `pipelined` holds bytes the client sent after the CONNECT head; they reach
    /// the upstream before anything else.
    pub async fn run<C, U>(&self, client: C, upstream: U, pipelined: &[u8]) -> Result<RelayOutcome, ProxyError>
    where
        C: AsyncRead + AsyncWrite + Unpin,
        U: AsyncRead + AsyncWrite + Unpin,
    {
        let mut client = client;
        let mut upstream = upstream;

        if !pipelined.is_empty() {
            upstream.write_all(pipelined).await?;
        }

        let outcome = match self.max_lifetime {
            Some(limit) => match tokio::time::timeout(limit, relay(&mut client, &mut upstream)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    tracing::debug!(limit = ?limit, "Tunnel lifetime exceeded");
                    RelayOutcome {
                        ended_by: RelaySide::Deadline,
                        result: Err(io::Error::new(io::ErrorKind::TimedOut, "tunnel lifetime exceeded")),
                    }
                }
            },
            None => relay(&mut client, &mut upstream).await,
        };

        Ok(outcome)
    }
}

/// Copy bytes both ways until one direction sees EOF or an error.
///
/// The unfinished direction is abandoned and both write halves are shut down,
/// so neither peer is left half-open.
pub async fn relay<A, B>(client: &mut A, upstream: &mut B) -> RelayOutcome
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut upstream_read, mut upstream_write) = tokio::io::split(upstream);

    let client_to_upstream = tokio::io::copy(&mut client_read, &mut upstream_write);
    let upstream_to_client = tokio::io::copy(&mut upstream_read, &mut client_write);

    let outcome = tokio::select! {
        result = client_to_upstream => RelayOutcome { ended_by: RelaySide::Client, result },
        result = upstream_to_client => RelayOutcome { ended_by: RelaySide::Upstream, result },
    };

    let _ = client_write.shutdown().await;
    let _ = upstream_write.shutdown().await;

    outcome
}
