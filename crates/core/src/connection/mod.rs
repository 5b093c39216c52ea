//! Connection capabilities and transport notifications.
//!
//! The dispatch loop never touches sockets directly. A [`Transport`]
//! reports what happened on the wire as [`TransportEvent`]s, and each
//! accepted client is handed over as a boxed [`Connection`]: a capability
//! that can send, ask to be told when it can take more data, and close.
//!
//! ## Connection lifecycle
//!
//! ```text
//! Connecting ── accepted ──► Open ── closed / send failure ──► Closed
//! ```
//!
//! `Connecting` lives entirely inside the transport (e.g. the HTTP
//! upgrade). The [`ConnectionRegistry`] only ever holds `Open` members;
//! `Closed` is terminal and means "no longer registered".

pub mod registry;

#[cfg(test)]
pub(crate) mod mock;

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;

use crate::error::{Result, SendError};

pub use registry::ConnectionRegistry;

static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate a fresh identifier.
    pub fn next() -> Self {
        Self(CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for ConnectionId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport-level setup in progress; not yet visible to dispatch.
    Connecting,
    /// Registered and eligible for frame delivery.
    Open,
    /// Terminal.
    Closed,
}

/// Capability handle for one client connection.
///
/// The transport owns the underlying socket; the handle only lets the
/// holder act on it. All methods are non-blocking.
pub trait Connection: Send {
    fn id(&self) -> ConnectionId;

    /// Remote address, when the transport has one.
    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }

    /// Queue one complete frame for delivery.
    fn send(&mut self, payload: &Bytes) -> std::result::Result<(), SendError>;

    /// Ask the transport for a [`TransportEvent::Writable`] once this
    /// connection can take more data. Repeated requests coalesce.
    fn request_writable(&mut self);

    /// Close the connection. Idempotent.
    fn close(&mut self);
}

/// Notification from a [`Transport`].
pub enum TransportEvent {
    /// Handshake finished; the connection is open.
    Accepted(Box<dyn Connection>),
    /// A previously requested writable opportunity arrived.
    Writable(ConnectionId),
    /// The peer went away or the connection failed.
    Closed(ConnectionId),
    /// The peer sent a message.
    DataReceived(ConnectionId, Bytes),
}

impl TransportEvent {
    pub fn connection_id(&self) -> ConnectionId {
        match self {
            TransportEvent::Accepted(conn) => conn.id(),
            TransportEvent::Writable(id)
            | TransportEvent::Closed(id)
            | TransportEvent::DataReceived(id, _) => *id,
        }
    }
}

impl fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted(conn) => f.debug_tuple("Accepted").field(&conn.id()).finish(),
            Self::Writable(id) => f.debug_tuple("Writable").field(id).finish(),
            Self::Closed(id) => f.debug_tuple("Closed").field(id).finish(),
            Self::DataReceived(id, data) => f
                .debug_tuple("DataReceived")
                .field(id)
                .field(&data.len())
                .finish(),
        }
    }
}

/// Source of connection notifications.
///
/// Owned and driven exclusively by the dispatch thread.
pub trait Transport: Send {
    /// Wait at most `timeout` for activity and append the resulting
    /// notifications to `events`. Returns early once anything happened.
    fn service(&mut self, timeout: Duration, events: &mut Vec<TransportEvent>) -> Result<()>;

    /// Address the transport is listening on, if any.
    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    /// Release listening resources. Called once, after dispatch has stopped.
    fn shutdown(&mut self) {}
}

impl Transport for Box<dyn Transport> {
    fn service(&mut self, timeout: Duration, events: &mut Vec<TransportEvent>) -> Result<()> {
        (**self).service(timeout, events)
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        (**self).local_addr()
    }

    fn shutdown(&mut self) {
        (**self).shutdown()
    }
}
