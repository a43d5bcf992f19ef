//! Message bodies owned by the channel layer
//!
//! A body is a `u32` type id followed by the payload. The channel layer owns
//! the handshake bodies (open and close), the service fault and the `ERR`
//! payload; every other payload is opaque.

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};

use super::codec;
use crate::security::MessageSecurityMode;
use crate::status::{Error, Result, StatusCode};

/// Type id of OpenSecureChannelRequest
pub const OPEN_SECURE_CHANNEL_REQUEST: u32 = 446;
/// Type id of OpenSecureChannelResponse
pub const OPEN_SECURE_CHANNEL_RESPONSE: u32 = 449;
/// Type id of CloseSecureChannelRequest
pub const CLOSE_SECURE_CHANNEL_REQUEST: u32 = 452;
/// Type id of ServiceFault
pub const SERVICE_FAULT: u32 = 397;

/// Protocol version spoken by this implementation
pub const PROTOCOL_VERSION: u32 = 0;

/// Prefix a payload with its type id
pub fn encode_body(type_id: u32, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32_le(type_id);
    buf.put_slice(payload);
    buf.freeze()
}

/// Split a body into type id and payload
pub fn decode_body(mut body: Bytes) -> Result<(u32, Bytes)> {
    let type_id = codec::read_u32(&mut body)?;
    Ok((type_id, body))
}

/// Whether an open request issues a new token or renews the current one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SecurityTokenRequestType {
    /// First token of a channel
    Issue = 0,

    /// Replacement token on an existing channel
    Renew = 1,
}

impl SecurityTokenRequestType {
    pub fn from_u32(value: u32) -> Result<Self> {
        match value {
            0 => Ok(Self::Issue),
            1 => Ok(Self::Renew),
            other => Err(Error::new(
                StatusCode::BadRequestTypeInvalid,
                format!("invalid token request type {}", other),
            )),
        }
    }
}

/// OpenSecureChannelRequest payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenSecureChannelRequest {
    /// Protocol version of the client
    pub client_protocol_version: u32,

    /// Issue or renew
    pub request_type: SecurityTokenRequestType,

    /// Requested message security mode
    pub security_mode: MessageSecurityMode,

    /// Client nonce, empty under the None policy
    pub client_nonce: Bytes,

    /// Requested token lifetime
    pub requested_lifetime: Duration,
}

impl OpenSecureChannelRequest {
    /// Encode the payload (without type id)
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.client_protocol_version);
        buf.put_u32_le(self.request_type as u32);
        buf.put_u32_le(self.security_mode as u32);
        codec::write_byte_string(buf, Some(&self.client_nonce[..]));
        buf.put_u32_le(duration_to_millis(self.requested_lifetime));
    }

    /// Decode the payload (without type id)
    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            client_protocol_version: codec::read_u32(buf)?,
            request_type: SecurityTokenRequestType::from_u32(codec::read_u32(buf)?)?,
            security_mode: MessageSecurityMode::from_u32(codec::read_u32(buf)?)?,
            client_nonce: codec::read_byte_string(buf)?.unwrap_or_default(),
            requested_lifetime: Duration::from_millis(u64::from(codec::read_u32(buf)?)),
        })
    }

    /// Full body including the type id
    pub fn to_body(&self) -> Bytes {
        let mut payload = BytesMut::new();
        self.encode(&mut payload);
        encode_body(OPEN_SECURE_CHANNEL_REQUEST, &payload)
    }
}

/// Token parameters as sent by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSecurityToken {
    /// Secure channel id
    pub channel_id: u32,

    /// Token id
    pub token_id: u32,

    /// Server creation time
    pub created_at: DateTime<Utc>,

    /// Lifetime revised by the server
    pub revised_lifetime: Duration,
}

impl ChannelSecurityToken {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.channel_id);
        buf.put_u32_le(self.token_id);
        codec::write_date_time(buf, self.created_at);
        buf.put_u32_le(duration_to_millis(self.revised_lifetime));
    }

    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            channel_id: codec::read_u32(buf)?,
            token_id: codec::read_u32(buf)?,
            created_at: codec::read_date_time(buf)?,
            revised_lifetime: Duration::from_millis(u64::from(codec::read_u32(buf)?)),
        })
    }
}

/// OpenSecureChannelResponse payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenSecureChannelResponse {
    /// Protocol version of the server
    pub server_protocol_version: u32,

    /// Issued token
    pub security_token: ChannelSecurityToken,

    /// Server nonce, empty under the None policy
    pub server_nonce: Bytes,
}

impl OpenSecureChannelResponse {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.server_protocol_version);
        self.security_token.encode(buf);
        codec::write_byte_string(buf, Some(&self.server_nonce[..]));
    }

    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            server_protocol_version: codec::read_u32(buf)?,
            security_token: ChannelSecurityToken::decode(buf)?,
            server_nonce: codec::read_byte_string(buf)?.unwrap_or_default(),
        })
    }

    /// Full body including the type id
    pub fn to_body(&self) -> Bytes {
        let mut payload = BytesMut::new();
        self.encode(&mut payload);
        encode_body(OPEN_SECURE_CHANNEL_RESPONSE, &payload)
    }
}

/// Service fault payload, also used for the `ERR` message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceFault {
    /// Result of the failed service
    pub status: StatusCode,

    /// Diagnostic text
    pub reason: String,
}

impl ServiceFault {
    pub fn new(status: StatusCode, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.status.bits());
        codec::write_string(buf, &self.reason);
    }

    /// Decode the payload; unknown codes map to `BadUnexpectedError`
    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        let bits = codec::read_u32(buf)?;
        Ok(Self {
            status: StatusCode::from_u32(bits).unwrap_or(StatusCode::BadUnexpectedError),
            reason: codec::read_string(buf)?,
        })
    }

    /// Full body including the type id
    pub fn to_body(&self) -> Bytes {
        let mut payload = BytesMut::new();
        self.encode(&mut payload);
        encode_body(SERVICE_FAULT, &payload)
    }
}

impl From<&Error> for ServiceFault {
    fn from(e: &Error) -> Self {
        let reason = match e {
            Error::Status { message, .. } => message.clone(),
            Error::ServiceFault { reason, .. } => reason.clone(),
        };
        Self::new(e.status(), reason)
    }
}

impl From<ServiceFault> for Error {
    fn from(fault: ServiceFault) -> Self {
        Error::ServiceFault {
            status: fault.status,
            reason: fault.reason,
        }
    }
}

fn duration_to_millis(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
}
