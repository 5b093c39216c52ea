//! Network transport for frame delivery.
//!
//! A single TCP port carries both the frame stream and the page that
//! displays it:
//!
//! - **WebSocket** ([`ws`]): clients upgrade and receive each frame as one
//!   binary message. Sockets are non-blocking and serviced by the dispatch
//!   thread only.
//!
//! - **Static assets** ([`assets`]): plain `GET`/`HEAD` requests are served
//!   from a directory on a short-lived worker thread, so file I/O never
//!   stalls frame delivery.

pub mod assets;
pub mod ws;

pub use ws::{WsConfig, WsConnection, WsTransport};
