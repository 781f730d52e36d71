//! Connection state machine and lifecycle tracking.
//!
//! # Responsibilities
//! - Track connection state (Accepted → Parsed → PolicyEvaluated → Relaying/Forwarding → Closed)
//! - Generate unique connection IDs for tracing
//! - Count live connections so shutdown can drain them

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::observability::metrics;

/// Global atomic counter for connection IDs.
/// Relaxed ordering is enough; only uniqueness matters.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Per-connection state.
///
/// ```text
/// Accepted → Parsed → PolicyEvaluated ─┬→ TunnelEstablished → Relaying ─┐
///                                      └→ Forwarding ───────────────────┴→ Closed
/// ```
/// `Closed` is reachable from every other state. There is no retry edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Accepted,
    Parsed,
    PolicyEvaluated,
    TunnelEstablished,
    Relaying,
    Forwarding,
    Closed,
}

impl ConnectionState {
    /// Whether moving from `self` to `next` is a legal edge.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Accepted, Parsed)
            | (Parsed, PolicyEvaluated)
            | (PolicyEvaluated, TunnelEstablished)
            | (PolicyEvaluated, Forwarding)
            | (TunnelEstablished, Relaying) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Accepted => "accepted",
            ConnectionState::Parsed => "parsed",
            ConnectionState::PolicyEvaluated => "policy_evaluated",
            ConnectionState::TunnelEstablished => "tunnel_established",
            ConnectionState::Relaying => "relaying",
            ConnectionState::Forwarding => "forwarding",
            ConnectionState::Closed => "closed",
        }
    }
}

/// Tracks active connections for graceful shutdown.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    /// Current count of active connections.
    active_count: Arc<AtomicU64>,
}

impl ConnectionTracker {
    /// Create a new connection tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new active connection. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.active_count.fetch_add(1, Ordering::SeqCst);
        metrics::record_connection_opened();
        ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
            id: ConnectionId::new(),
            state: ConnectionState::Accepted,
        }
    }

    /// Get current active connection count.
    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Wait until all connections are closed or the deadline passes.
    ///
    /// Returns true when the tracker drained in time.
    pub async fn wait_for_idle(&self, deadline: Duration) -> bool {
        let until = Instant::now() + deadline;
        while self.active_count() > 0 {
            if Instant::now() >= until {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        true
    }
}

/// Guard that tracks a connection's lifetime and state.
/// Decrements active count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    active_count: Arc<AtomicU64>,
    id: ConnectionId,
    state: ConnectionState,
}

impl ConnectionGuard {
    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Move to `next`. Illegal edges are logged and ignored.
    pub fn advance(&mut self, next: ConnectionState) {
        if !self.state.can_transition_to(next) {
            tracing::warn!(
                connection_id = %self.id,
                from = self.state.as_str(),
                to = next.as_str(),
                "Ignoring illegal connection state transition"
            );
            return;
        }
        tracing::trace!(
            connection_id = %self.id,
            from = self.state.as_str(),
            to = next.as_str(),
            "Connection state changed"
        );
        self.state = next;
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.state != ConnectionState::Closed {
            self.advance(ConnectionState::Closed);
        }
        self.active_count.fetch_sub(1, Ordering::SeqCst);
        metrics::record_connection_closed();
    }
}
