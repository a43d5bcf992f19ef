//! Transports carrying whole chunks
//!
//! The channel reads and writes complete chunks through a [`Transport`]: a
//! [`FrameSource`] for the reader task and a [`FrameSink`] for the writer.
//! [`StreamTransport`] frames any connected byte stream by the size field of
//! the message header. A [`Connector`] produces new transports for the client
//! and tells it whether the peer keeps channel state across reconnects.

use async_trait::async_trait;
use bytes::Bytes;

use crate::status::Result;

pub mod stream;

pub use stream::{StreamTransport, TcpConnector};

/// Reading half of a transport
#[async_trait]
pub trait FrameSource: Send {
    /// Read the next complete chunk, header included
    async fn read_frame(&mut self) -> Result<Bytes>;
}

/// Writing half of a transport
#[async_trait]
pub trait FrameSink: Send {
    /// Write one complete chunk
    async fn write_frame(&mut self, frame: Bytes) -> Result<()>;

    /// Flush and shut the write direction down
    async fn close(&mut self) -> Result<()>;
}

/// A connected transport split into its two directions
pub struct Transport {
    /// Incoming chunks
    pub source: Box<dyn FrameSource>,

    /// Outgoing chunks
    pub sink: Box<dyn FrameSink>,
}

impl Transport {
    /// Pair a frame source with the sink of the same connection
    pub fn new(source: Box<dyn FrameSource>, sink: Box<dyn FrameSink>) -> Self {
        Self { source, sink }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Transport")
    }
}

/// Source of client transports
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish a new connection
    async fn connect(&self) -> Result<Transport>;

    /// True if the server keeps channel state across connections, so that a
    /// client with outstanding requests can reconnect and receive them
    fn is_stateful(&self) -> bool {
        false
    }
}
