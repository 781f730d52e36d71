//! Basic proxy credentials.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http::header::HeaderValue;

/// Expected `user:password` pair for `Proxy-Authorization: Basic ...`.
#[derive(Clone)]
pub struct BasicCredentials {
    username: String,
    password: String,
}

impl BasicCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// True only for a well-formed Basic header carrying exactly these credentials.
    pub fn verify(&self, header: Option<&HeaderValue>) -> bool {
        header
            .and_then(decode_basic)
            .map(|(user, pass)| {
                let user_ok = constant_time_eq(user.as_bytes(), self.username.as_bytes());
                let pass_ok = constant_time_eq(pass.as_bytes(), self.password.as_bytes());
                user_ok & pass_ok
            })
            .unwrap_or(false)
    }

    /// Header value a client sends to authenticate with these credentials.
    pub fn to_header_value(&self) -> HeaderValue {
        let encoded = STANDARD.encode(format!("{}:{}", self.username, self.password));
        // Base64 output is always a valid header value.
        HeaderValue::from_str(&format!("Basic {}", encoded))
            .unwrap_or_else(|_| HeaderValue::from_static("Basic"))
    }
}

impl std::fmt::Debug for BasicCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// `Basic realm="..."` challenge for a 407 response.
pub fn basic_challenge(realm: &str) -> HeaderValue {
    HeaderValue::from_str(&format!("Basic realm=\"{}\"", realm))
        .unwrap_or_else(|_| HeaderValue::from_static("Basic"))
}

/// Byte comparison whose running time does not depend on where the inputs differ.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |diff, (x, y)| diff | (x ^ y)) == 0
}

/// Split a `Basic` header into user and password. The password may contain ':'.
fn decode_basic(header: &HeaderValue) -> Option<(String, String)> {
    let value = header.to_str().ok()?.trim();
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> BasicCredentials {
        BasicCredentials::new("alice", "s3cr:et")
    }

    #[test]
    fn accepts_matching_credentials() {
        let header = creds().to_header_value();
        assert!(creds().verify(Some(&header)));
    }

    #[test]
    fn scheme_is_case_insensitive() {
        let encoded = STANDARD.encode("alice:s3cr:et");
        let header = HeaderValue::from_str(&format!("bAsIc {}", encoded)).unwrap();
        assert!(creds().verify(Some(&header)));
    }

    #[test]
    fn rejects_missing_malformed_and_wrong() {
        let c = creds();
        assert!(!c.verify(None));
        assert!(!c.verify(Some(&HeaderValue::from_static("Basic"))));
        assert!(!c.verify(Some(&HeaderValue::from_static("Basic !!!notbase64"))));
        assert!(!c.verify(Some(&HeaderValue::from_static("Bearer abc"))));

        let wrong = BasicCredentials::new("alice", "nope").to_header_value();
        assert!(!c.verify(Some(&wrong)));
    }

    #[test]
    fn rejects_near_misses() {
        let c = creds();
        for (user, pass) in [("alicE", "s3cr:et"), ("alice", "s3cr:eT"), ("alice", "s3cr:et "), ("", "")] {
            let header = BasicCredentials::new(user, pass).to_header_value();
            assert!(!c.verify(Some(&header)), "{user}:{pass}");
        }
    }

    #[test]
    fn byte_comparison_matches_equality() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(constant_time_eq(b"", b""));
        assert!(!constant_time_eq(b"secret", b"secreT"));
        assert!(!constant_time_eq(b"secret", b"secrets"));
    }

    #[test]
    fn challenge_names_realm() {
        assert_eq!(basic_challenge("proxy.com"), "Basic realm=\"proxy.com\"");
    }

    #[test]
    fn debug_hides_password() {
        let rendered = format!("{:?}", creds());
        assert!(!rendered.contains("s3cr"));
    }
}
