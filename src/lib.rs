//! hide: a forward HTTP proxy.
//!
//! One listening socket carries two traffic shapes:
//!
//! ```text
//!   client ──▶ net::listener ──▶ http::server ──▶ security (policy)
//!                                      │
//!                     ┌────────────────┴────────────────┐
//!                     ▼                                 ▼
//!               http::tunnel                      http::forward
//!        CONNECT: dial, "200 Connection      GET/POST/...: rewrite to origin
//!        established", opaque byte relay     form, dial, exchange, stream back
//!                     │                                 │
//!                     └──────────▶ net::dialer ◀────────┘
//!                              (fresh socket per request)
//! ```
//!
//! [`serve`] is the embeddable entry point; the `hide` binary adds config
//! files, logging, metrics and signal-driven shutdown.

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod security;

pub use crate::config::ProxyConfig;
pub use crate::error::ProxyError;
pub use crate::http::{serve, ProxyServer};
pub use crate::lifecycle::Shutdown;
pub use crate::security::{AccessPolicy, AllowAll, PolicyDecision, StaticPolicy};
