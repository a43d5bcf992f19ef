//! Cryptography for the secure channel
//!
//! This module holds everything the channel needs to protect messages:
//!
//! - the algorithm identifiers and the policy catalog ([`SecurityAlgorithm`],
//!   [`SecurityPolicy`], [`PolicyRegistry`]),
//! - the local identity and the peer certificate ([`KeyPair`], [`Certificate`]),
//! - the symmetric key epochs ([`SecurityToken`]),
//! - the [`CryptoProvider`] contract and its backends.
//!
//! # Backends
//!
//! Two providers are built in and registered under their names in a
//! [`ProviderRegistry`]:
//!
//! - `"rustcrypto"` ([`RustCryptoProvider`]): CBC and HMAC from the `cbc` and
//!   `hmac` crates. This is the default.
//! - `"portable"` ([`PortableProvider`]): CBC chained by hand over raw AES block
//!   operations and HMAC computed directly from the SHA digests.
//!
//! Both share the RSA code and produce identical output for every
//! deterministic operation.
//!
//! # Usage
//!
//! ```rust,ignore
//! use uasc_rs::crypto::{PolicyRegistry, ProviderRegistry, SecurityToken, TokenParams};
//!
//! let policy = PolicyRegistry::standard().get(POLICY_URI_BASIC256SHA256)?;
//! let provider = ProviderRegistry::builtin().default_provider()?;
//! let token = SecurityToken::derive(provider.as_ref(), &policy, params, &local, &remote)?;
//! ```

pub mod algorithm;
pub mod keys;
pub mod policy;
pub mod portable;
pub mod provider;
pub mod rustcrypto;
mod shared;
pub mod token;

pub use algorithm::SecurityAlgorithm;
pub use keys::{Certificate, KeyPair, PrivateKey, PublicKey, THUMBPRINT_SIZE};
pub use policy::{
    PolicyRegistry, SecurityPolicy, POLICY_URI_AES128_SHA256_RSAOAEP,
    POLICY_URI_AES256_SHA256_RSAPSS, POLICY_URI_BASIC128RSA15, POLICY_URI_BASIC256,
    POLICY_URI_BASIC256SHA256, POLICY_URI_NONE,
};
pub use portable::PortableProvider;
pub use provider::{CryptoProvider, ProviderRegistry};
pub use rustcrypto::RustCryptoProvider;
pub use token::{ChannelKeys, SecurityToken, TokenParams};
