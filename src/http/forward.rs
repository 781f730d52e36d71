//! Plain HTTP forwarding.
//!
//! # Flow
//! ```text
//! buffered head + socket (Rewind)
//!     → inbound HTTP/1 codec, one request per connection
//!     → rewrite: origin-form URI, Host, hop-by-hop headers stripped
//!     → fresh dial + outbound HTTP/1 handshake (no pooling)
//!     → upstream status, headers and body streamed back unchanged
//! ```
//!
//! Failures before a response head arrives become a `text/plain` error
//! response with the status from [`ProxyError::status`].

use std::convert::Infallible;
use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderValue, CONNECTION, HOST};
use http::uri::Uri;
use http::{Request, Response};
use http_body_util::BodyExt;
use hyper::body::{Body, Incoming};
use hyper::client::conn::http1 as client_http1;
use hyper::server::conn::http1 as server_http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::ProxyError;
use crate::http::request::target_authority;
use crate::http::response::{text_response, ProxyBody};
use crate::net::dialer::Dialer;
use crate::net::rewind::Rewind;
use crate::observability::metrics;
use crate::security::headers::strip_hop_by_hop;

/// Forwards absolute-form HTTP requests to their destination.
pub struct RequestForwarder {
    dialer: Arc<dyn Dialer>,
    request_timeout: Duration,
}

impl RequestForwarder {
    pub fn new(dialer: Arc<dyn Dialer>, request_timeout: Duration) -> Self {
        Self {
            dialer,
            request_timeout,
        }
    }

    /// Run the inbound HTTP/1 codec over `stream`, replaying `buffered` first.
    ///
    /// Keep-alive is off: the connection closes after one exchange.
    pub async fn serve_connection<S>(self: Arc<Self>, stream: S, buffered: Bytes) -> Result<(), ProxyError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let io = TokioIo::new(Rewind::new(stream, buffered));
        let service = service_fn(move |request: Request<Incoming>| {
            let forwarder = Arc::clone(&self);
            async move { Ok::<_, Infallible>(forwarder.forward(request).await) }
        });

        server_http1::Builder::new()
            .keep_alive(false)
            .auto_date_header(false)
            .preserve_header_case(true)
            .title_case_headers(true)
            .serve_connection(io, service)
            .await?;
        Ok(())
    }

    /// Forward one request. Never fails; errors become responses.
    pub async fn forward<B>(&self, request: Request<B>) -> Response<ProxyBody>
    where
        B: Body + Send + 'static,
        B::Data: Send,
        B::Error: Into<Box<dyn StdError + Send + Sync>>,
    {
        let method = request.method().clone();
        let uri = request.uri().clone();

        match self.try_forward(request).await {
            Ok(response) => {
                tracing::debug!(method = %method, uri = %uri, status = %response.status(), "Forwarded request");
                metrics::record_forward(response.status().as_u16());
                response
            }
            Err(e) => {
                let status = e.status();
                tracing::info!(method = %method, uri = %uri, status = %status, error = %e, "Forwarding failed");
                metrics::record_forward(status.as_u16());
                text_response(status, e.to_string())
            }
        }
    }

    async fn try_forward<B>(&self, request: Request<B>) -> Result<Response<ProxyBody>, ProxyError>
    where
        B: Body + Send + 'static,
        B::Data: Send,
        B::Error: Into<Box<dyn StdError + Send + Sync>>,
    {
        let (authority, outbound) = prepare_outbound(request)?;

        let upstream = self.dialer.dial(&authority).await?;
        let (mut sender, connection) = client_http1::Builder::new()
            .preserve_header_case(true)
            .title_case_headers(true)
            .handshake(TokioIo::new(upstream))
            .await
            .map_err(ProxyError::Upstream)?;

        let conn_authority = authority.clone();
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!(authority = %conn_authority, error = %e, "Upstream connection ended");
            }
        });

        let response = tokio::time::timeout(self.request_timeout, sender.send_request(outbound))
            .await
            .map_err(|_| ProxyError::UpstreamTimeout(self.request_timeout))?
            .map_err(ProxyError::Upstream)?;

        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        Ok(Response::from_parts(parts, body.boxed()))
    }
}

/// Resolve the destination and rewrite `request` for the upstream hop.
///
/// The outbound request carries an origin-form URI, a `Host` matching the
/// absolute target, no hop-by-hop headers, and `Connection: close`.
pub fn prepare_outbound<B>(request: Request<B>) -> Result<(String, Request<B>), ProxyError> {
    let (mut parts, body) = request.into_parts();

    let authority = target_authority(&parts.uri, &parts.headers)?;

    if let Some(uri_authority) = parts.uri.authority() {
        if uri_authority.as_str().contains('@') {
            return Err(ProxyError::InvalidTarget(
                "credentials in target URI are not forwarded".to_string(),
            ));
        }
        let host = HeaderValue::from_str(uri_authority.as_str())
            .map_err(|e| ProxyError::InvalidTarget(format!("bad authority: {}", e)))?;
        parts.headers.insert(HOST, host);
    }

    let origin = match parts.uri.query() {
        Some(query) => format!("{}?{}", parts.uri.path(), query),
        None => parts.uri.path().to_string(),
    };
    parts.uri = Uri::try_from(origin)
        .map_err(|e| ProxyError::InvalidTarget(format!("bad path: {}", e)))?;

    strip_hop_by_hop(&mut parts.headers);
    parts.headers.insert(CONNECTION, HeaderValue::from_static("close"));

    Ok((authority, Request::from_parts(parts, body)))
}
