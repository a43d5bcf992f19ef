//! # uasc-rs
//!
//! OPC UA Secure Conversation for Rust: the secure channel that carries every
//! OPC UA service call between a client and a server.
//!
//! ## Features
//!
//! - **Channel lifecycle**: open, token renewal, close and dispose on the
//!   client; open and renew validation on the server
//! - **Message protection**: signing and encryption of `OPN`, `MSG` and
//!   `CLO` chunks for the None, Basic128Rsa15, Basic256, Basic256Sha256,
//!   Aes128-Sha256-RsaOaep and Aes256-Sha256-RsaPss policies
//! - **Pluggable cryptography**: [`crypto::CryptoProvider`] backends selected by name
//! - **Request multiplexing**: concurrent requests over one channel, completed
//!   by request id through [`sync::AsyncResult`]
//! - **Reconnect**: automatic recovery of stateful channels with outstanding
//!   requests, with exponential backoff
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use uasc_rs::channel::{ChannelSettings, SecureChannel};
//! use uasc_rs::transport::TcpConnector;
//!
//! let settings = ChannelSettings::default();
//! let connector = Arc::new(TcpConnector::new("localhost:4840", settings.max_message_size));
//! let channel = SecureChannel::new(settings, None, None, connector)?;
//! channel.open().await?;
//! ```
//!
//! ## Modules
//!
//! - [`channel`]: client and server secure channels
//! - [`crypto`]: policies, keys, tokens and crypto providers
//! - [`message`]: wire format of headers and handshake bodies
//! - [`security`]: security modes and per-channel configuration
//! - [`service`]: untyped and typed service dispatch
//! - [`status`]: status codes and the crate error type
//! - [`sync`]: async results and lifecycle state machines
//! - [`transport`]: chunk framed transports

pub mod channel;
pub mod crypto;
pub mod message;
pub mod security;
pub mod service;
pub mod status;
pub mod sync;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_util;

pub use channel::{ChannelSettings, SecureChannel, ServerSecureChannel, ServerSettings};
pub use service::{ServiceHandler, ServiceRequest, ServiceResponse};
pub use status::{Error, Result, StatusCode};
