//! HTTP/1.1 handling for the WebSocket endpoint (RFC 7230, RFC 6455 §4).
//!
//! Every client starts with a plain HTTP request on the listening port:
//!
//! ```text
//! GET / HTTP/1.1\r\n
//! Host: camera.local:9000\r\n
//! Upgrade: websocket\r\n
//! Connection: Upgrade\r\n
//! Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n
//! Sec-WebSocket-Version: 13\r\n
//! Sec-WebSocket-Protocol: webcam-stream\r\n
//! \r\n
//! ```
//!
//! Upgrade requests are answered with `101 Switching Protocols` and the
//! socket becomes a frame stream. Anything else is a static asset request.
//!
//! | Request | Response |
//! |---------|----------|
//! | valid upgrade | 101, stream opens |
//! | malformed upgrade | 400 |
//! | `GET`/`HEAD` with assets configured | file or 404 |
//! | other methods | 405 |

pub mod handshake;
pub mod request;
pub mod response;

pub use handshake::{UpgradeOutcome, upgrade};
pub use request::HttpRequest;
pub use response::HttpResponse;
