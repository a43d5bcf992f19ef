//! Secure Channel Implementation
//!
//! Implements the OPC UA Secure Conversation channel (Part 6, section 6.7):
//! a long lived, authenticated and optionally encrypted conversation between
//! a client and a server over one transport connection at a time.
//!
//! # Architecture
//!
//! - [`SecureChannel`] is the client end. It opens the channel, multiplexes
//!   service requests over it, renews the security token before it expires
//!   and reconnects after a transport loss when the server keeps state.
//! - [`ServerSecureChannel`] is the server end. It validates open and renew
//!   requests, issues tokens and dispatches requests to a `ServiceHandler`.
//! - [`protection`] builds and opens the chunks both ends exchange.
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use uasc_rs::channel::{ChannelSettings, SecureChannel};
//! use uasc_rs::service::ServiceRequest;
//! use uasc_rs::transport::TcpConnector;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = ChannelSettings {
//!         policy_uri: POLICY_URI_BASIC256SHA256.to_string(),
//!         security_mode: MessageSecurityMode::SignAndEncrypt,
//!         ..Default::default()
//!     };
//!     let connector = Arc::new(TcpConnector::new("plant:4840", settings.max_message_size));
//!     let channel = SecureChannel::new(settings, Some(key_pair), Some(server_cert), connector)?;
//!
//!     channel.open().await?;
//!     let response = channel.service_request(ServiceRequest::new(631, body)).await?;
//!     channel.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Lifecycle
//!
//! 1. **Open**: connect, exchange asymmetric `OPN` messages, derive the first token
//! 2. **Exchange**: `MSG` chunks protected with the current token
//! 3. **Renew**: a new `OPN` at 75% of the token lifetime; the old token
//!    stays valid for incoming messages until it expires
//! 4. **Close**: a `CLO` message, then every pending request fails

pub mod client;
pub mod config;
pub mod pending;
pub mod protection;
pub mod reconnect;
pub mod sequence;
pub mod server;
pub mod tokens;

pub use client::{SecureChannel, ServiceCall};
pub use config::{
    ChannelSettings, EndpointBinding, SecurityModeBinding, ServerSettings,
    DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_OPERATION_TIMEOUT, DEFAULT_TOKEN_LIFETIME,
};
pub use reconnect::ReconnectSchedule;
pub use sequence::{SequenceCounter, SequenceValidator, MAX_SEQUENCE_NUMBER};
pub use server::{ServerSecureChannel, TrustList};
pub use tokens::TokenSet;
