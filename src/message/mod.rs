//! Secure conversation wire format
//!
//! All integers are little-endian. A chunk is laid out as
//!
//! ```text
//! MessageHeader | security header | SequenceHeader | body | padding | signature
//!                                  \_______________ encrypted _______________/
//! ```
//!
//! Only single (final) chunks are produced and accepted.

pub mod body;
pub mod codec;
pub mod header;

pub use body::{
    ChannelSecurityToken, OpenSecureChannelRequest, OpenSecureChannelResponse,
    SecurityTokenRequestType, ServiceFault,
};
pub use header::{
    AsymmetricSecurityHeader, MessageHeader, MessageType, SequenceHeader, SymmetricSecurityHeader,
    HEADER_SIZE,
};
