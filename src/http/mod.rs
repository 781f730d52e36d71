//! Proxy protocol handling.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (accept, spawn, dispatch)
//!     → request.rs (parse head, resolve authority)
//!     → [access policy decides]
//!     → tunnel.rs   CONNECT: dial, "200 Connection established", relay bytes
//!     → forward.rs  other methods: rewrite, dial, exchange, stream back
//!     → response.rs (proxy-generated responses)
//! ```

pub mod forward;
pub mod request;
pub mod response;
pub mod server;
pub mod tunnel;

pub use forward::RequestForwarder;
pub use request::ProxyRequest;
pub use server::{serve, ProxyServer};
pub use tunnel::TunnelRelay;
