//! Request head parsing.
//!
//! # Responsibilities
//! - Read the request line and headers off the raw client socket
//! - Classify the request (CONNECT tunnel vs. plain forward)
//! - Resolve the destination authority with default ports
//!
//! # Design Decisions
//! - Head size is bounded before parsing completes
//! - Bytes read past the head are kept: pipelined tunnel payload or request body
//! - The raw bytes are replayed untouched into the forward path

use std::str::FromStr;

use bytes::{Bytes, BytesMut};
use http::header::{HeaderMap, HeaderName, HeaderValue, HOST};
use http::uri::{Authority, Uri};
use http::{Method, Version};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::ProxyError;

/// Maximum number of headers accepted in one request.
const MAX_HEADERS: usize = 100;

/// Read granularity for the head buffer.
const READ_CHUNK: usize = 4096;

/// Default port for CONNECT targets without one.
const DEFAULT_TUNNEL_PORT: u16 = 443;

/// Default port for plain HTTP targets.
const DEFAULT_HTTP_PORT: u16 = 80;

/// A parsed inbound request head plus every byte read so far.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    method: Method,
    target: String,
    version: Version,
    headers: HeaderMap,
    head_len: usize,
    buffered: Bytes,
}

impl ProxyRequest {
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The request target exactly as sent (`host:port` for CONNECT, usually absolute-form otherwise).
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn header(&self, name: &HeaderName) -> Option<&HeaderValue> {
        self.headers.get(name)
    }

    pub fn is_connect(&self) -> bool {
        self.method == Method::CONNECT
    }

    /// Bytes the client sent after the head (pipelined tunnel data or body start).
    pub fn trailing(&self) -> Bytes {
        self.buffered.slice(self.head_len..)
    }

    /// Every byte read from the client, head included.
    pub fn into_buffered(self) -> Bytes {
        self.buffered
    }

    /// Destination `host:port` for this request.
    ///
    /// CONNECT uses the authority-form target and defaults to port 443. Other
    /// methods use the absolute URI, falling back to the `Host` header, and
    /// default to port 80. Only `http` is accepted as an absolute-form scheme.
    pub fn authority(&self) -> Result<String, ProxyError> {
        if self.is_connect() {
            return connect_authority(&self.target);
        }
        let uri = Uri::from_str(&self.target)
            .map_err(|e| ProxyError::InvalidTarget(format!("{}: {}", self.target, e)))?;
        target_authority(&uri, &self.headers)
    }
}

/// Resolve the destination of a non-CONNECT request from its URI or `Host` header.
pub fn target_authority(uri: &Uri, headers: &HeaderMap) -> Result<String, ProxyError> {
    if let Some(scheme) = uri.scheme_str() {
        if !scheme.eq_ignore_ascii_case("http") {
            return Err(ProxyError::InvalidTarget(format!(
                "unsupported scheme '{}'",
                scheme
            )));
        }
    }

    let authority = match uri.authority() {
        Some(authority) => authority.clone(),
        None => {
            let host = headers
                .get(HOST)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| ProxyError::InvalidTarget("missing host".to_string()))?;
            Authority::from_str(host)
                .map_err(|e| ProxyError::InvalidTarget(format!("bad Host header: {}", e)))?
        }
    };

    Ok(with_port(&authority, DEFAULT_HTTP_PORT))
}

fn connect_authority(target: &str) -> Result<String, ProxyError> {
    let authority = Authority::from_str(target)
        .map_err(|e| ProxyError::InvalidTarget(format!("{}: {}", target, e)))?;
    if authority.as_str().contains('@') {
        return Err(ProxyError::InvalidTarget(format!(
            "{}: userinfo not allowed",
            target
        )));
    }
    Ok(with_port(&authority, DEFAULT_TUNNEL_PORT))
}

fn with_port(authority: &Authority, default_port: u16) -> String {
    let port = authority.port_u16().unwrap_or(default_port);
    format!("{}:{}", authority.host(), port)
}

/// Read from `stream` until a complete request head is buffered.
///
/// Fails with [`ProxyError::HeadTooLarge`] once `max_head_bytes` are buffered
/// without a complete head, and with [`ProxyError::EmptyRequest`] if the client
/// closes before sending anything.
pub async fn read_request_head<R>(
    stream: &mut R,
    max_head_bytes: usize,
) -> Result<ProxyRequest, ProxyError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(READ_CHUNK);

    loop {
        if let Some(head) = parse_head(&buf)? {
            if head.len > max_head_bytes {
                return Err(ProxyError::HeadTooLarge {
                    limit: max_head_bytes,
                });
            }
            return Ok(ProxyRequest {
                method: head.method,
                target: head.target,
                version: head.version,
                headers: head.headers,
                head_len: head.len,
                buffered: buf.freeze(),
            });
        }

        if buf.len() >= max_head_bytes {
            return Err(ProxyError::HeadTooLarge {
                limit: max_head_bytes,
            });
        }

        buf.reserve(READ_CHUNK.min(max_head_bytes - buf.len()));
        let n = stream.read_buf(&mut buf).await?;
        if n == 0 {
            return Err(if buf.is_empty() {
                ProxyError::EmptyRequest
            } else {
                ProxyError::Parse("connection closed mid-head".to_string())
            });
        }
    }
}

struct ParsedHead {
    method: Method,
    target: String,
    version: Version,
    headers: HeaderMap,
    len: usize,
}

fn parse_head(buf: &[u8]) -> Result<Option<ParsedHead>, ProxyError> {
    if buf.is_empty() {
        return Ok(None);
    }

    let mut raw_headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut raw_headers);

    let len = match req.parse(buf) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(httparse::Error::TooManyHeaders) => {
            return Err(ProxyError::Parse(format!("more than {} headers", MAX_HEADERS)))
        }
        Err(e) => return Err(ProxyError::Parse(e.to_string())),
    };

    let method = req
        .method
        .ok_or_else(|| ProxyError::Parse("missing method".to_string()))?;
    let method = Method::from_bytes(method.as_bytes())
        .map_err(|e| ProxyError::Parse(format!("invalid method: {}", e)))?;
    let target = req
        .path
        .ok_or_else(|| ProxyError::Parse("missing request target".to_string()))?
        .to_string();
    let version = match req.version {
        Some(0) => Version::HTTP_10,
        _ => Version::HTTP_11,
    };

    let mut headers = HeaderMap::with_capacity(req.headers.len());
    for header in req.headers.iter() {
        let name = HeaderName::from_bytes(header.name.as_bytes())
            .map_err(|e| ProxyError::Parse(format!("invalid header name: {}", e)))?;
        let value = HeaderValue::from_bytes(header.value)
            .map_err(|e| ProxyError::Parse(format!("invalid header value: {}", e)))?;
        headers.append(name, value);
    }

    Ok(Some(ParsedHead {
        method,
        target,
        version,
        headers,
        len,
    }))
}
