//! Chunk framing over byte streams

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;

use super::{Connector, FrameSink, FrameSource, Transport};
use crate::message::header::{MessageHeader, HEADER_SIZE};
use crate::status::{Error, Result, StatusCode};

/// Builds transports over connected streams
#[derive(Debug, Clone, Copy)]
pub struct StreamTransport;

impl StreamTransport {
    /// Split `stream` into a framed transport
    ///
    /// Incoming chunks larger than `max_message_size` fail the read with
    /// `BadTcpMessageTooLarge`.
    pub fn new<S>(stream: S, max_message_size: usize) -> Transport
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Transport::new(
            Box::new(StreamSource {
                reader,
                max_message_size,
            }),
            Box::new(StreamSink { writer }),
        )
    }
}

struct StreamSource<S> {
    reader: ReadHalf<S>,
    max_message_size: usize,
}

#[async_trait]
impl<S: AsyncRead + Send + 'static> FrameSource for StreamSource<S> {
    async fn read_frame(&mut self) -> Result<Bytes> {
        let mut header = [0u8; HEADER_SIZE];
        self.reader.read_exact(&mut header).await?;

        let size = MessageHeader::peek_size(&header).unwrap_or(0);
        if size < HEADER_SIZE {
            return Err(Error::new(
                StatusCode::BadTcpMessageTypeInvalid,
                format!("chunk size {} smaller than its header", size),
            ));
        }
        if size > self.max_message_size {
            return Err(Error::new(
                StatusCode::BadTcpMessageTooLarge,
                format!(
                    "chunk of {} bytes exceeds the limit of {}",
                    size, self.max_message_size
                ),
            ));
        }

        let mut frame = BytesMut::with_capacity(size);
        frame.extend_from_slice(&header);
        frame.resize(size, 0);
        self.reader.read_exact(&mut frame[HEADER_SIZE..]).await?;
        log::trace!("Read chunk of {} bytes", size);
        Ok(frame.freeze())
    }
}

struct StreamSink<S> {
    writer: WriteHalf<S>,
}

#[async_trait]
impl<S: AsyncWrite + Send + 'static> FrameSink for StreamSink<S> {
    async fn write_frame(&mut self, frame: Bytes) -> Result<()> {
        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        log::trace!("Wrote chunk of {} bytes", frame.len());
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

/// Connector dialing a TCP address
#[derive(Debug, Clone)]
pub struct TcpConnector {
    address: String,
    max_message_size: usize,
    stateful: bool,
}

impl TcpConnector {
    /// Connector for `address` (`host:port`)
    pub fn new(address: impl Into<String>, max_message_size: usize) -> Self {
        Self {
            address: address.into(),
            max_message_size,
            stateful: false,
        }
    }

    /// Declare that the server keeps channel state across connections
    pub fn stateful(mut self, stateful: bool) -> Self {
        self.stateful = stateful;
        self
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> Result<Transport> {
        let stream = TcpStream::connect(&self.address).await.map_err(|e| {
            Error::new(
                StatusCode::BadCommunicationError,
                format!("connect to {} failed: {}", self.address, e),
            )
        })?;
        stream.set_nodelay(true)?;
        log::debug!("Connected to {}", self.address);
        Ok(StreamTransport::new(stream, self.max_message_size))
    }

    fn is_stateful(&self) -> bool {
        self.stateful
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::header::MessageType;
    use tokio::net::TcpListener;

    fn chunk(size: usize) -> Bytes {
        let mut buf = BytesMut::new();
        MessageHeader::new(MessageType::Message, size as u32, 1).encode(&mut buf);
        buf.resize(size, 0xab);
        buf.freeze()
    }

    #[tokio::test]
    async fn test_frames_by_header_size() {
        let (a, b) = tokio::io::duplex(64);
        let mut left = StreamTransport::new(a, 1024);
        let mut right = StreamTransport::new(b, 1024);

        let writer = tokio::spawn(async move {
            left.sink.write_frame(chunk(20)).await.unwrap();
            left.sink.write_frame(chunk(300)).await.unwrap();
            left
        });
        assert_eq!(right.source.read_frame().await.unwrap(), chunk(20));
        assert_eq!(right.source.read_frame().await.unwrap(), chunk(300));
        drop(writer.await.unwrap());

        let err = right.source.read_frame().await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BadConnectionClosed);
    }

    #[tokio::test]
    async fn test_rejects_oversized_chunk() {
        let (a, b) = tokio::io::duplex(4096);
        let mut left = StreamTransport::new(a, 4096);
        let mut right = StreamTransport::new(b, 100);
        left.sink.write_frame(chunk(200)).await.unwrap();
        let err = right.source.read_frame().await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BadTcpMessageTooLarge);
    }

    #[tokio::test]
    async fn test_tcp_connector() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut transport = StreamTransport::new(stream, 1024);
            transport.source.read_frame().await.unwrap()
        });

        let connector = TcpConnector::new(address, 1024).stateful(true);
        assert!(connector.is_stateful());
        let mut transport = connector.connect().await.unwrap();
        transport.sink.write_frame(chunk(16)).await.unwrap();
        assert_eq!(server.await.unwrap(), chunk(16));
    }

    #[tokio::test]
    async fn test_tcp_connect_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);
        let err = TcpConnector::new(address, 1024).connect().await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BadCommunicationError);
    }
}
