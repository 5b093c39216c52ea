//! Server side of the WebSocket opening handshake (RFC 6455 §4.2).

use tungstenite::handshake::derive_accept_key;

use super::request::HttpRequest;
use super::response::HttpResponse;

/// Result of validating an upgrade request.
pub enum UpgradeOutcome {
    /// Send `response` (101) and switch the socket to WebSocket framing.
    Accept {
        response: HttpResponse,
        /// Subprotocol echoed back to the client, if it offered ours.
        subprotocol: Option<String>,
    },
    /// Send `response` and close.
    Reject(HttpResponse),
}

/// Validate an upgrade request and build the answer.
///
/// `subprotocol` is echoed in `Sec-WebSocket-Protocol` only when the
/// client lists it; clients that offer nothing are accepted without one.
pub fn upgrade(request: &HttpRequest, subprotocol: &str) -> UpgradeOutcome {
    if request.method != "GET" {
        tracing::debug!(method = %request.method, "upgrade with non-GET method");
        return UpgradeOutcome::Reject(HttpResponse::method_not_allowed());
    }

    if !request.header_has_token("Connection", "upgrade") {
        tracing::debug!("upgrade without Connection: Upgrade");
        return UpgradeOutcome::Reject(HttpResponse::bad_request());
    }

    if request.get_header("Sec-WebSocket-Version") != Some("13") {
        tracing::debug!(
            version = request.get_header("Sec-WebSocket-Version").unwrap_or("-"),
            "unsupported WebSocket version"
        );
        return UpgradeOutcome::Reject(HttpResponse::upgrade_required());
    }

    let key = match request.get_header("Sec-WebSocket-Key") {
        Some(key) if !key.is_empty() => key,
        _ => {
            tracing::debug!("upgrade without Sec-WebSocket-Key");
            return UpgradeOutcome::Reject(HttpResponse::bad_request());
        }
    };

    let mut response = HttpResponse::switching_protocols()
        .add_header("Upgrade", "websocket")
        .add_header("Connection", "Upgrade")
        .add_header("Sec-WebSocket-Accept", &derive_accept_key(key.as_bytes()));

    let subprotocol = request
        .header_has_token("Sec-WebSocket-Protocol", subprotocol)
        .then(|| subprotocol.to_string());
    if let Some(name) = &subprotocol {
        response = response.add_header("Sec-WebSocket-Protocol", name);
    }

    UpgradeOutcome::Accept {
        response,
        subprotocol,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(extra: &str) -> HttpRequest {
        HttpRequest::parse(&format!(
            "GET / HTTP/1.1\r\nHost: x\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n{extra}\r\n"
        ))
        .unwrap()
    }

    fn accepted(outcome: UpgradeOutcome) -> (String, Option<String>) {
        match outcome {
            UpgradeOutcome::Accept {
                response,
                subprotocol,
            } => (String::from_utf8(response.serialize()).unwrap(), subprotocol),
            UpgradeOutcome::Reject(r) => panic!("rejected with {}", r.status_code),
        }
    }

    fn rejected(outcome: UpgradeOutcome) -> u16 {
        match outcome {
            UpgradeOutcome::Reject(r) => r.status_code,
            UpgradeOutcome::Accept { .. } => panic!("unexpectedly accepted"),
        }
    }

    #[test]
    fn accept_key_matches_rfc_example() {
        let req = request(
            "Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n",
        );
        let (response, subprotocol) = accepted(upgrade(&req, "webcam-stream"));
        assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(response.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert!(subprotocol.is_none());
        assert!(!response.contains("Sec-WebSocket-Protocol"));
    }

    #[test]
    fn echoes_offered_subprotocol() {
        let req = request(
            "Sec-WebSocket-Key: abc\r\nSec-WebSocket-Version: 13\r\n\
             Sec-WebSocket-Protocol: chat, webcam-stream\r\n",
        );
        let (response, subprotocol) = accepted(upgrade(&req, "webcam-stream"));
        assert_eq!(subprotocol.as_deref(), Some("webcam-stream"));
        assert!(response.contains("Sec-WebSocket-Protocol: webcam-stream\r\n"));
    }

    #[test]
    fn rejects_wrong_version() {
        let req = request("Sec-WebSocket-Key: abc\r\nSec-WebSocket-Version: 8\r\n");
        assert_eq!(rejected(upgrade(&req, "webcam-stream")), 426);
    }

    #[test]
    fn rejects_missing_key() {
        let req = request("Sec-WebSocket-Version: 13\r\n");
        assert_eq!(rejected(upgrade(&req, "webcam-stream")), 400);
    }

    #[test]
    fn rejects_post() {
        let req = HttpRequest::parse(
            "POST / HTTP/1.1\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n",
        )
        .unwrap();
        assert_eq!(rejected(upgrade(&req, "webcam-stream")), 405);
    }
}
