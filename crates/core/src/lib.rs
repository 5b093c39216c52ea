//! Latest-frame-wins live image streaming.
//!
//! A producer thread polls a [`FrameSource`] at a fixed cadence and stores
//! each encoded image in a single-slot [`FrameSlot`], replacing whatever
//! was there. A dispatch thread drives a [`Transport`] and, whenever a
//! client can take more data, sends it the current frame. Slow clients
//! skip frames instead of queueing them.
//!
//! ```no_run
//! use framecast::{Server, ServerConfig, SourceSpec, WsConfig, WsTransport};
//!
//! let source = SourceSpec::parse("pattern")?.open()?;
//! let transport = WsTransport::bind("0.0.0.0:9000", WsConfig::default())?;
//!
//! let mut server = Server::new(ServerConfig::default());
//! server.start(source, Box::new(transport))?;
//! # server.stop();
//! # Ok::<(), framecast::CastError>(())
//! ```

pub mod connection;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod producer;
pub mod protocol;
pub mod server;
pub mod source;
pub mod stats;
pub mod transport;

pub use connection::{Connection, ConnectionId, ConnectionState, Transport, TransportEvent};
pub use dispatch::{DeliveryPolicy, DispatchConfig};
pub use error::{CastError, Result, SendError, SourceError};
pub use frame::{Frame, FrameSlot};
pub use source::{FrameSource, SourceSpec};
pub use server::{Server, ServerConfig, StopHandle};
pub use stats::StatsSnapshot;
pub use transport::{WsConfig, WsTransport};
