use crate::error::{CastError, ParseErrorKind};

/// A parsed HTTP/1.1 request head (RFC 7230 §3).
///
/// ```text
/// Method SP Request-Target SP HTTP-Version CRLF
/// *(Header: Value CRLF)
/// CRLF
/// ```
///
/// Header lookup is case-insensitive per RFC 7230 §3.2. Bodies are never
/// read: neither the upgrade nor asset requests carry one.
#[derive(Debug)]
pub struct HttpRequest {
    /// Request method (`GET`, `HEAD`, ...).
    pub method: String,
    /// Request target as sent, including any query string.
    pub target: String,
    /// Protocol version (expected: `HTTP/1.1`).
    pub version: String,
    /// Headers as ordered (name, value) pairs. Names are stored as-received;
    /// lookups via [`get_header`](Self::get_header) are case-insensitive.
    pub headers: Vec<(String, String)>,
}

impl HttpRequest {
    /// Parse a request head from raw bytes up to (and including) the blank line.
    pub fn parse_bytes(raw: &[u8]) -> crate::error::Result<Self> {
        let text = std::str::from_utf8(raw).map_err(|_| CastError::Parse {
            kind: ParseErrorKind::InvalidEncoding,
        })?;
        Self::parse(text)
    }

    /// Parse a request head from its text representation.
    ///
    /// Returns [`CastError::Parse`] on malformed input.
    pub fn parse(raw: &str) -> crate::error::Result<Self> {
        let mut lines = raw.lines();

        let request_line = lines
            .next()
            .filter(|line| !line.trim().is_empty())
            .ok_or(CastError::Parse {
                kind: ParseErrorKind::EmptyRequest,
            })?;

        let parts: Vec<&str> = request_line.split_whitespace().collect();

        if parts.len() != 3 {
            return Err(CastError::Parse {
                kind: ParseErrorKind::InvalidRequestLine,
            });
        }

        let method = parts[0].to_string();
        let target = parts[1].to_string();
        let version = parts[2].to_string();

        if !version.starts_with("HTTP/") {
            return Err(CastError::Parse {
                kind: ParseErrorKind::InvalidRequestLine,
            });
        }
        if version != "HTTP/1.1" {
            tracing::debug!(version, "client sent non-HTTP/1.1 version");
        }

        let mut headers = Vec::new();

        for line in lines {
            if line.is_empty() {
                break;
            }

            let (name, value) = line.split_once(':').ok_or(CastError::Parse {
                kind: ParseErrorKind::InvalidHeader,
            })?;

            headers.push((name.trim().to_string(), value.trim().to_string()));
        }

        Ok(HttpRequest {
            method,
            target,
            version,
            headers,
        })
    }

    /// Look up a header value by name (case-insensitive).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Whether a comma-separated header contains `token` (case-insensitive),
    /// e.g. `Connection: keep-alive, Upgrade`.
    pub fn header_has_token(&self, name: &str, token: &str) -> bool {
        self.headers
            .iter()
            .filter(|(key, _)| key.eq_ignore_ascii_case(name))
            .flat_map(|(_, value)| value.split(','))
            .any(|item| item.trim().eq_ignore_ascii_case(token))
    }

    /// Request target without query string or fragment.
    pub fn path(&self) -> &str {
        let end = self
            .target
            .find(['?', '#'])
            .unwrap_or(self.target.len());
        &self.target[..end]
    }

    /// Whether the client asked to switch to WebSocket.
    pub fn is_websocket_upgrade(&self) -> bool {
        self.header_has_token("Upgrade", "websocket")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UPGRADE: &str = "GET /stream?x=1 HTTP/1.1\r\n\
                           Host: localhost:9000\r\n\
                           Upgrade: websocket\r\n\
                           Connection: keep-alive, Upgrade\r\n\
                           Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
                           Sec-WebSocket-Version: 13\r\n\r\n";

    #[test]
    fn parse_upgrade_request() {
        let req = HttpRequest::parse(UPGRADE).unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.target, "/stream?x=1");
        assert_eq!(req.path(), "/stream");
        assert_eq!(req.version, "HTTP/1.1");
        assert!(req.is_websocket_upgrade());
        assert!(req.header_has_token("Connection", "upgrade"));
        assert_eq!(req.get_header("sec-websocket-version"), Some("13"));
    }

    #[test]
    fn parse_plain_get() {
        let req = HttpRequest::parse("GET /index.html HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
        assert!(!req.is_websocket_upgrade());
        assert_eq!(req.path(), "/index.html");
    }

    #[test]
    fn parse_empty_request() {
        assert!(HttpRequest::parse("").is_err());
        assert!(HttpRequest::parse("\r\n\r\n").is_err());
    }

    #[test]
    fn parse_invalid_request_line() {
        assert!(HttpRequest::parse("JUST_A_METHOD\r\n\r\n").is_err());
        assert!(HttpRequest::parse("GET / RTSP/1.0\r\n\r\n").is_err());
    }

    #[test]
    fn parse_invalid_header() {
        assert!(HttpRequest::parse("GET / HTTP/1.1\r\nno-colon-here\r\n\r\n").is_err());
    }

    #[test]
    fn parse_rejects_non_utf8() {
        assert!(matches!(
            HttpRequest::parse_bytes(b"GET /\xff HTTP/1.1\r\n\r\n"),
            Err(CastError::Parse {
                kind: ParseErrorKind::InvalidEncoding
            })
        ));
    }
}
