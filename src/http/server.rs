//! Accept loop and per-connection dispatch.
//!
//! # Responsibilities
//! - Accept connections under the listener's concurrency limit
//! - Spawn one task per connection so a stalled client blocks nobody else
//! - Parse the head, consult the access policy, pick tunnel or forward mode
//! - Drain in-flight connections on shutdown
//!
//! # Design Decisions
//! - The policy runs before any upstream dial
//! - One request per connection; every exit path closes the client socket
//! - Only listener-level failures stop the server

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;

use crate::config::{ListenerConfig, ProxyConfig};
use crate::error::ProxyError;
use crate::http::forward::RequestForwarder;
use crate::http::request::{read_request_head, ProxyRequest};
use crate::http::response::{write_denial, write_probe_ok, write_response};
use crate::http::tunnel::TunnelRelay;
use crate::lifecycle::shutdown::Shutdown;
use crate::net::connection::{ConnectionGuard, ConnectionState, ConnectionTracker};
use crate::net::dialer::{Dialer, TcpDialer};
use crate::net::listener::Listener;
use crate::observability::metrics;
use crate::security::access_control::{AccessPolicy, PolicyDecision};

const LINGER_TIMEOUT: Duration = Duration::from_secs(1);
const LINGER_MAX_BYTES: usize = 256 * 1024;

/// Dual-mode forward proxy: CONNECT tunnels and plain HTTP forwarding.
pub struct ProxyServer {
    config: ProxyConfig,
    policy: Arc<dyn AccessPolicy>,
    dialer: Arc<dyn Dialer>,
    tracker: ConnectionTracker,
}

impl ProxyServer {
    pub fn new(config: ProxyConfig, policy: Arc<dyn AccessPolicy>) -> Self {
        let dialer = Arc::new(TcpDialer::new(config.timeouts.connect()));
        Self {
            config,
            policy,
            dialer,
            tracker: ConnectionTracker::new(),
        }
    }

    /// Replace the outbound dialer.
    pub fn with_dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.dialer = dialer;
        self
    }

    /// Accept connections until `shutdown` fires or the listener fails.
    ///
    /// After shutdown, in-flight connections get `timeouts.drain_secs` to finish.
    pub async fn run(
        self,
        listener: Listener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ProxyError> {
        let handler = Arc::new(ConnectionHandler {
            policy: Arc::clone(&self.policy),
            tunnel: TunnelRelay::new(Arc::clone(&self.dialer), self.config.timeouts.tunnel()),
            forwarder: Arc::new(RequestForwarder::new(
                Arc::clone(&self.dialer),
                self.config.timeouts.request(),
            )),
            header_read_timeout: self.config.timeouts.header_read(),
            max_header_bytes: self.config.listener.max_header_bytes,
        });

        if let Ok(addr) = listener.local_addr() {
            tracing::info!(address = %addr, policy_enabled = self.config.policy.is_enabled(), "Proxy server started");
        }

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer, permit) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) if e.is_transient() => {
                            tracing::warn!(error = %e, "Transient accept error");
                            continue;
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Listener failed");
                            return Err(e.into());
                        }
                    };

                    let guard = self.tracker.track();
                    let handler = Arc::clone(&handler);
                    tokio::spawn(async move {
                        let _permit = permit;
                        handler.handle(stream, peer, guard).await;
                    });
                }
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown requested, no longer accepting connections");
                    break;
                }
            }
        }

        drop(listener);

        let drain = self.config.timeouts.drain();
        let active = self.tracker.active_count();
        if active > 0 {
            tracing::info!(active_connections = active, deadline = ?drain, "Draining connections");
        }
        if !self.tracker.wait_for_idle(drain).await {
            tracing::warn!(
                active_connections = self.tracker.active_count(),
                "Drain deadline passed, abandoning remaining connections"
            );
        }

        tracing::info!("Proxy server stopped");
        Ok(())
    }
}

/// Shared per-connection machinery.
struct ConnectionHandler {
    policy: Arc<dyn AccessPolicy>,
    tunnel: TunnelRelay,
    forwarder: Arc<RequestForwarder>,
    header_read_timeout: Duration,
    max_header_bytes: usize,
}

impl ConnectionHandler {
    async fn handle(&self, stream: TcpStream, peer: SocketAddr, mut guard: ConnectionGuard) {
        let id = guard.id();
        match self.dispatch(stream, peer, &mut guard).await {
            Ok(()) => {
                tracing::debug!(connection_id = %id, peer = %peer, "Connection closed");
            }
            Err(e) if e.is_disconnect() => {
                tracing::debug!(connection_id = %id, peer = %peer, error = %e, "Client went away");
            }
            Err(e) => {
                tracing::info!(
                    connection_id = %id,
                    peer = %peer,
                    state = guard.state().as_str(),
                    error = %e,
                    "Connection failed"
                );
            }
        }
    }

    async fn dispatch(
        &self,
        mut stream: TcpStream,
        peer: SocketAddr,
        guard: &mut ConnectionGuard,
    ) -> Result<(), ProxyError> {
        let request = self.read_head(&mut stream).await?;
        guard.advance(ConnectionState::Parsed);

        let decision = self.policy.evaluate(&request, peer);
        guard.advance(ConnectionState::PolicyEvaluated);
        metrics::record_policy_decision(decision.as_str());

        tracing::debug!(
            connection_id = %guard.id(),
            method = %request.method(),
            target = %request.target(),
            decision = decision.as_str(),
            "Request received"
        );

        match decision {
            PolicyDecision::Deny(denial) => {
                write_denial(&mut stream, &denial)
                    .await
                    .map_err(ProxyError::Write)?;
                linger(&mut stream).await;
                Ok(())
            }
            PolicyDecision::ProbeRespond => {
                write_probe_ok(&mut stream).await.map_err(ProxyError::Write)?;
                linger(&mut stream).await;
                Ok(())
            }
            PolicyDecision::Allow if request.is_connect() => self.tunnel(stream, request, guard).await,
            PolicyDecision::Allow => {
                guard.advance(ConnectionState::Forwarding);
                Arc::clone(&self.forwarder)
                    .serve_connection(stream, request.into_buffered())
                    .await
            }
        }
    }

    /// Read the request head, answering parse failures with a 4xx before giving up.
    async fn read_head(&self, stream: &mut TcpStream) -> Result<ProxyRequest, ProxyError> {
        let result = match tokio::time::timeout(
            self.header_read_timeout,
            read_request_head(stream, self.max_header_bytes),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ProxyError::HeadTimeout(self.header_read_timeout)),
        };

        match result {
            Ok(request) => Ok(request),
            Err(e) if e.is_disconnect() => Err(e),
            Err(e) => {
                if write_response(stream, e.status(), &[], &e.to_string()).await.is_ok() {
                    linger(stream).await;
                }
                Err(e)
            }
        }
    }

    async fn tunnel(
        &self,
        mut stream: TcpStream,
        request: ProxyRequest,
        guard: &mut ConnectionGuard,
    ) -> Result<(), ProxyError> {
        let authority = match request.authority() {
            Ok(authority) => authority,
            Err(e) => {
                if write_response(&mut stream, e.status(), &[], &e.to_string()).await.is_ok() {
                    linger(&mut stream).await;
                }
                return Err(e);
            }
        };

        let upstream = self.tunnel.establish(&mut stream, &authority).await?;
        guard.advance(ConnectionState::TunnelEstablished);

        guard.advance(ConnectionState::Relaying);
        let outcome = self.tunnel.run(stream, upstream, &request.trailing()).await?;

        tracing::debug!(
            connection_id = %guard.id(),
            authority = %authority,
            ended_by = ?outcome.ended_by,
            result = ?outcome.result,
            "Tunnel closed"
        );
        Ok(())
    }
}

/// Close our side, then discard unread client bytes for a moment.
///
/// Closing with unread input makes the kernel send RST, which can destroy the
/// error response before the client reads it.
async fn linger(stream: &mut TcpStream) {
    if stream.shutdown().await.is_err() {
        return;
    }
    let mut sink = [0u8; 4096];
    let drain = async {
        let mut discarded = 0usize;
        while discarded < LINGER_MAX_BYTES {
            match stream.read(&mut sink).await {
                Ok(0) | Err(_) => break,
                Ok(n) => discarded += n,
            }
        }
    };
    let _ = tokio::time::timeout(LINGER_TIMEOUT, drain).await;
}

/// Serve on `addr` with `policy` and default settings until the listener fails.
///
/// `addr` may be `:port` to listen on every interface.
pub async fn serve(addr: &str, policy: Arc<dyn AccessPolicy>) -> Result<(), ProxyError> {
    let config = ProxyConfig {
        listener: ListenerConfig {
            bind_address: addr.to_string(),
            ..ListenerConfig::default()
        },
        ..ProxyConfig::default()
    };

    let listener = Listener::bind(&config.listener).await?;
    let shutdown = Shutdown::new();
    ProxyServer::new(config, policy)
        .run(listener, shutdown.subscribe())
        .await
}
