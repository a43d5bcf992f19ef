//! Chunk headers
//!
//! Every chunk starts with a 12 byte [`MessageHeader`]:
//!
//! ```text
//! +--------+-------+--------------+-------------------+
//! | type   | chunk | message size | secure channel id |
//! | 3 byte | 1 byte| u32 LE       | u32 LE            |
//! +--------+-------+--------------+-------------------+
//! ```
//!
//! followed by the security header of its kind (asymmetric for `OPN`,
//! symmetric for `MSG` and `CLO`, none for `ERR`) and the
//! [`SequenceHeader`], which is the first field covered by encryption.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::codec;
use crate::status::{Error, Result, StatusCode};

/// Size of the message header
pub const HEADER_SIZE: usize = 12;

/// Size of the symmetric security header
pub const SYMMETRIC_HEADER_SIZE: usize = 4;

/// Size of the sequence header
pub const SEQUENCE_HEADER_SIZE: usize = 8;

/// Chunk type of a final (and only) chunk
pub const FINAL_CHUNK: u8 = b'F';

/// Message type of a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// OpenSecureChannel, asymmetric security
    Open,

    /// Service message, symmetric security
    Message,

    /// CloseSecureChannel, symmetric security
    Close,

    /// Fatal error reported by the peer before it drops the transport
    Error,
}

impl MessageType {
    /// The three ASCII bytes on the wire
    pub fn as_bytes(self) -> &'static [u8; 3] {
        match self {
            Self::Open => b"OPN",
            Self::Message => b"MSG",
            Self::Close => b"CLO",
            Self::Error => b"ERR",
        }
    }

    /// Parse the three ASCII bytes
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes {
            b"OPN" => Some(Self::Open),
            b"MSG" => Some(Self::Message),
            b"CLO" => Some(Self::Close),
            b"ERR" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Header common to every chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Message type
    pub message_type: MessageType,

    /// Total size of the chunk including this header
    pub message_size: u32,

    /// Secure channel id, 0 before the server assigned one
    pub channel_id: u32,
}

impl MessageHeader {
    pub fn new(message_type: MessageType, message_size: u32, channel_id: u32) -> Self {
        Self {
            message_type,
            message_size,
            channel_id,
        }
    }

    /// Encode header to bytes
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(self.message_type.as_bytes());
        buf.put_u8(FINAL_CHUNK);
        buf.put_u32_le(self.message_size);
        buf.put_u32_le(self.channel_id);
    }

    /// Decode header from bytes
    ///
    /// Unknown message types and chunk types other than final fail with
    /// `BadTcpMessageTypeInvalid`.
    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::decoding("chunk shorter than its header"));
        }
        let message_type = MessageType::from_bytes(&buf[..3]).ok_or_else(|| {
            Error::new(
                StatusCode::BadTcpMessageTypeInvalid,
                format!("unknown message type {:?}", String::from_utf8_lossy(&buf[..3])),
            )
        })?;
        if buf[3] != FINAL_CHUNK {
            return Err(Error::new(
                StatusCode::BadTcpMessageTypeInvalid,
                format!("unsupported chunk type 0x{:02X}", buf[3]),
            ));
        }
        buf.advance(4);
        let message_size = codec::read_u32(buf)?;
        let channel_id = codec::read_u32(buf)?;
        Ok(Self {
            message_type,
            message_size,
            channel_id,
        })
    }

    /// Read the message size out of a raw header without decoding the rest
    pub fn peek_size(header: &[u8]) -> Option<usize> {
        let size = header.get(4..8)?;
        Some(u32::from_le_bytes([size[0], size[1], size[2], size[3]]) as usize)
    }
}

/// Security header of `OPN` chunks
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AsymmetricSecurityHeader {
    /// URI of the security policy
    pub policy_uri: String,

    /// Encoded certificate of the sender, null under the None policy
    pub sender_certificate: Option<Bytes>,

    /// SHA-1 thumbprint of the receiver certificate, null under the None policy
    pub receiver_thumbprint: Option<Bytes>,
}

impl AsymmetricSecurityHeader {
    /// Encode header to bytes
    pub fn encode(&self, buf: &mut BytesMut) {
        codec::write_string(buf, &self.policy_uri);
        codec::write_byte_string(buf, self.sender_certificate.as_deref());
        codec::write_byte_string(buf, self.receiver_thumbprint.as_deref());
    }

    /// Decode header from bytes
    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            policy_uri: codec::read_string(buf)?,
            sender_certificate: codec::read_byte_string(buf)?,
            receiver_thumbprint: codec::read_byte_string(buf)?,
        })
    }

    /// Encoded length
    pub fn encoded_len(&self) -> usize {
        codec::byte_string_len(Some(self.policy_uri.as_bytes()))
            + codec::byte_string_len(self.sender_certificate.as_deref())
            + codec::byte_string_len(self.receiver_thumbprint.as_deref())
    }
}

/// Security header of `MSG` and `CLO` chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymmetricSecurityHeader {
    /// Id of the token protecting the chunk
    pub token_id: u32,
}

impl SymmetricSecurityHeader {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.token_id);
    }

    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            token_id: codec::read_u32(buf)?,
        })
    }
}

/// Sequence number and request id of a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceHeader {
    /// Per direction sequence number
    pub sequence_number: u32,

    /// Id correlating a response with its request
    pub request_id: u32,
}

impl SequenceHeader {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.sequence_number);
        buf.put_u32_le(self.request_id);
    }

    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            sequence_number: codec::read_u32(buf)?,
            request_id: codec::read_u32(buf)?,
        })
    }
}
