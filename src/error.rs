//! Error taxonomy for connection handling.
//!
//! Every variant is local to the connection that produced it. Only
//! [`ProxyError::Listener`] is fatal to the accept loop.

use std::io;
use std::time::Duration;

use http::StatusCode;
use thiserror::Error;

use crate::net::listener::ListenerError;

/// Errors raised while serving a single proxied connection.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Listener failed to bind or accept. Stops the server.
    #[error(transparent)]
    Listener(#[from] ListenerError),

    /// Destination could not be reached.
    #[error("dial {addr} failed: {source}")]
    Dial {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Destination did not answer within the dial timeout.
    #[error("dial {addr} timed out after {timeout:?}")]
    DialTimeout { addr: String, timeout: Duration },

    /// Malformed request line or headers.
    #[error("malformed request: {0}")]
    Parse(String),

    /// Request head did not fit in the configured buffer.
    #[error("request head exceeds {limit} bytes")]
    HeadTooLarge { limit: usize },

    /// Client did not finish sending its request head in time.
    #[error("timed out reading request head after {0:?}")]
    HeadTimeout(Duration),

    /// Client connected and closed without sending anything.
    #[error("client closed connection before sending a request")]
    EmptyRequest,

    /// Request target that cannot be proxied (missing host, bad port, unsupported scheme).
    #[error("invalid request target: {0}")]
    InvalidTarget(String),

    /// Upstream exchange failed after the connection was dialed.
    #[error("upstream request failed: {0}")]
    Upstream(#[source] hyper::Error),

    /// Upstream did not produce a response head in time.
    #[error("upstream response timed out after {0:?}")]
    UpstreamTimeout(Duration),

    /// Client socket went away while we were writing to it.
    #[error("write to client failed: {0}")]
    Write(#[source] io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Error from the inbound HTTP/1 connection driver.
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),
}

impl ProxyError {
    /// Status code reported to the client for this error, when a response is still possible.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::Parse(_) | ProxyError::InvalidTarget(_) => StatusCode::BAD_REQUEST,
            ProxyError::HeadTooLarge { .. } => StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
            ProxyError::HeadTimeout(_) => StatusCode::REQUEST_TIMEOUT,
            ProxyError::Dial { .. }
            | ProxyError::DialTimeout { .. }
            | ProxyError::Upstream(_)
            | ProxyError::UpstreamTimeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// True when the peer simply hung up. Logged at debug rather than warn.
    pub fn is_disconnect(&self) -> bool {
        let io_err = match self {
            ProxyError::EmptyRequest => return true,
            ProxyError::Write(e) | ProxyError::Io(e) => e,
            _ => return false,
        };
        matches!(
            io_err.kind(),
            io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::UnexpectedEof
        )
    }
}
