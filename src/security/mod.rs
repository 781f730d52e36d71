//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Parsed request head:
//!     → access_control.rs (probe / client IP / credentials → decision)
//!     → auth.rs (Basic credential check, challenge header)
//! Forwarded request:
//!     → headers.rs (strip hop-by-hop and proxy credentials)
//! ```
//!
//! # Design Decisions
//! - One policy evaluation per connection, before any upstream dial
//! - Fail closed: any credential problem yields the same 407
//! - No mutable state; policies are shared read-only

pub mod access_control;
pub mod auth;
pub mod headers;

pub use access_control::{build_policy, AccessPolicy, AllowAll, Denial, PolicyDecision, StaticPolicy};
pub use auth::BasicCredentials;
