//! Error types for the frame streaming library.

use std::fmt;

/// Errors that can occur in the frame streaming library.
///
/// Only startup problems surface through this type. Failures that happen
/// while streaming are handled where they occur:
///
/// - **Startup**: [`SourceInit`](Self::SourceInit),
///   [`TransportInit`](Self::TransportInit), [`ThreadSpawn`](Self::ThreadSpawn).
/// - **Lifecycle**: [`AlreadyRunning`](Self::AlreadyRunning),
///   [`StopRequested`](Self::StopRequested).
/// - **Protocol**: [`Parse`](Self::Parse), malformed HTTP request heads.
/// - **I/O**: [`Io`](Self::Io).
#[derive(Debug, thiserror::Error)]
pub enum CastError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The frame source could not be selected or opened.
    #[error("frame source init failed: {0}")]
    SourceInit(String),

    /// The connection transport could not be acquired (e.g. bind failure).
    #[error("transport init failed: {0}")]
    TransportInit(String),

    /// [`Server::start`](crate::Server::start) was called while already running.
    #[error("server already running")]
    AlreadyRunning,

    /// A [`StopHandle`](crate::StopHandle) asked for a stop before
    /// [`Server::start`](crate::Server::start) could spawn anything.
    #[error("stop requested before start")]
    StopRequested,

    /// A worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    ThreadSpawn(String),

    /// Failed to parse an HTTP request head.
    #[error("HTTP parse error: {kind}")]
    Parse { kind: ParseErrorKind },
}

/// Specific kind of HTTP parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Input was empty (no request line).
    EmptyRequest,
    /// Request line did not have the expected `Method Target Version` format.
    InvalidRequestLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// The request head was not valid UTF-8.
    InvalidEncoding,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyRequest => write!(f, "empty request"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::InvalidEncoding => write!(f, "request head is not UTF-8"),
        }
    }
}

/// Failure reported by a [`FrameSource`](crate::source::FrameSource) for one tick.
///
/// Always transient: the producer skips the tick and keeps serving the
/// last good frame.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("source unavailable: {0}")]
    Unavailable(String),
}

/// Failure to hand a frame to one connection.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The connection is already closed.
    #[error("connection closed")]
    Closed,

    /// Socket-level write failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The message layer rejected the write.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Outbound buffer is full; the frame was dropped but the connection is healthy.
    #[error("outbound buffer full")]
    Backpressure,
}

impl SendError {
    /// Whether the connection must be closed after this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SendError::Backpressure)
    }
}

/// Convenience alias for `Result<T, CastError>`.
pub type Result<T> = std::result::Result<T, CastError>;
