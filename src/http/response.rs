//! Response construction.
//!
//! # Responsibilities
//! - Write proxy-generated responses straight onto the client socket
//!   (tunnel handshake, policy denials, probe replies, early errors)
//! - Build boxed-body responses for the forward path
//!
//! # Design Decisions
//! - Every proxy-generated response carries `Connection: close`
//! - Error detail goes in a `text/plain` body

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, PROXY_AUTHENTICATE};
use http::{Response, StatusCode};
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::security::access_control::Denial;

/// Exact reply to a CONNECT whose tunnel is ready.
pub const CONNECTION_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection established\r\n\r\n";

/// Body type handed to the inbound HTTP/1 connection.
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// Serialize a complete, self-delimited response.
pub fn render_response(
    status: StatusCode,
    headers: &[(HeaderName, HeaderValue)],
    body: &str,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(128 + body.len());
    out.extend_from_slice(
        format!(
            "HTTP/1.1 {} {}\r\n",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown")
        )
        .as_bytes(),
    );
    for (name, value) in headers {
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"Content-Type: text/plain; charset=utf-8\r\n");
    out.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
    out.extend_from_slice(b"Connection: close\r\n\r\n");
    out.extend_from_slice(body.as_bytes());
    out
}

/// Write a plain-text response and flush it.
pub async fn write_response<W>(
    writer: &mut W,
    status: StatusCode,
    headers: &[(HeaderName, HeaderValue)],
    body: &str,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&render_response(status, headers, body)).await?;
    writer.flush().await
}

/// Write the response for a policy denial.
pub async fn write_denial<W>(writer: &mut W, denial: &Denial) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let headers: Vec<_> = denial
        .challenge
        .iter()
        .map(|challenge| (PROXY_AUTHENTICATE, challenge.clone()))
        .collect();
    write_response(writer, denial.status, &headers, &denial.reason).await
}

/// Answer a liveness probe.
pub async fn write_probe_ok<W>(writer: &mut W) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_response(writer, StatusCode::OK, &[], "").await
}

/// Build a plain-text response for the forward path.
pub fn text_response(status: StatusCode, message: impl Into<Bytes>) -> Response<ProxyBody> {
    let mut response = Response::new(full(message));
    *response.status_mut() = status;
    response.headers_mut().insert(
        http::header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

fn full(chunk: impl Into<Bytes>) -> ProxyBody {
    Full::new(chunk.into())
        .map_err(|never| match never {})
        .boxed()
}
