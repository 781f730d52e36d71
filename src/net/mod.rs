//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (lifecycle tracking, state machine)
//!     → Hand off to HTTP layer
//!
//! Outbound:
//!     dialer.rs (bounded-timeout connect, one socket per request)
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - Outbound sockets are never pooled or shared

pub mod connection;
pub mod dialer;
pub mod listener;
pub mod rewind;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionState, ConnectionTracker};
pub use dialer::{Dialer, TcpDialer};
pub use listener::{Listener, ListenerError};
pub use rewind::Rewind;
