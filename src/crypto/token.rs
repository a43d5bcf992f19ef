//! Security tokens
//!
//! A [`SecurityToken`] is the symmetric key epoch of a channel. Both peers
//! derive it independently from the nonces exchanged by an open or renew
//! handshake (OPC UA Part 6, 6.7.5):
//!
//! ```text
//! Key                     | Secret      | Seed
//! ClientSigningKey        | ServerNonce | ClientNonce
//! ClientEncryptingKey     | ServerNonce | ClientNonce
//! ClientInitVector        | ServerNonce | ClientNonce
//! ServerSigningKey        | ClientNonce | ServerNonce
//! ServerEncryptingKey     | ClientNonce | ServerNonce
//! ServerInitVector        | ClientNonce | ServerNonce
//! ```
//!
//! The keys a side uses to protect what it sends are therefore always
//! `PRF(remote nonce, local nonce)`, and the keys it verifies with are
//! `PRF(local nonce, remote nonce)`. Tokens are immutable once derived; a
//! renewal produces a new token instead of mutating the active one.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::algorithm::SecurityAlgorithm;
use super::policy::SecurityPolicy;
use super::provider::CryptoProvider;
use crate::status::{Error, Result, StatusCode};

/// Signing key, encrypting key and IV of one direction
#[derive(Clone, Default, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct ChannelKeys {
    signing_key: Vec<u8>,
    encrypting_key: Vec<u8>,
    iv: Vec<u8>,
}

impl ChannelKeys {
    /// Assemble keys from their parts
    pub fn new(signing_key: Vec<u8>, encrypting_key: Vec<u8>, iv: Vec<u8>) -> Self {
        Self {
            signing_key,
            encrypting_key,
            iv,
        }
    }

    /// Split one block of PRF output into signing key, encrypting key and IV
    fn split(policy: &SecurityPolicy, material: &[u8]) -> Result<Self> {
        let signing_end = policy.derived_signature_key_size;
        let encrypting_end = signing_end + policy.symmetric_key_size;
        let iv_end = encrypting_end + policy.encryption_block_size;
        if material.len() < iv_end {
            return Err(Error::internal(format!(
                "derived {} bytes of key material, need {}",
                material.len(),
                iv_end
            )));
        }
        Ok(Self {
            signing_key: material[..signing_end].to_vec(),
            encrypting_key: material[signing_end..encrypting_end].to_vec(),
            iv: material[encrypting_end..iv_end].to_vec(),
        })
    }

    /// HMAC key
    pub fn signing_key(&self) -> &[u8] {
        &self.signing_key
    }

    /// Cipher key
    pub fn encrypting_key(&self) -> &[u8] {
        &self.encrypting_key
    }

    /// Cipher initialization vector
    pub fn iv(&self) -> &[u8] {
        &self.iv
    }
}

impl fmt::Debug for ChannelKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelKeys")
            .field("signing_key", &self.signing_key.len())
            .field("encrypting_key", &self.encrypting_key.len())
            .field("iv", &self.iv.len())
            .finish()
    }
}

/// Token parameters issued by the server in an open or renew response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenParams {
    /// Secure channel id chosen by the server
    pub channel_id: u32,

    /// Token id, unique within the channel
    pub token_id: u32,

    /// Creation time stamped by the server
    pub created_at: DateTime<Utc>,

    /// Revised lifetime
    pub lifetime: Duration,
}

/// The symmetric key epoch of a channel
#[derive(Debug)]
pub struct SecurityToken {
    params: TokenParams,
    signature_algorithm: SecurityAlgorithm,
    encryption_algorithm: SecurityAlgorithm,
    local: ChannelKeys,
    remote: ChannelKeys,
    issued_at: Instant,
}

impl SecurityToken {
    /// Derive the keys of a token from the nonces of a completed handshake
    ///
    /// `local_nonce` is the nonce this side generated and `remote_nonce` the
    /// one it received. Fails with `BadNonceInvalid` if either nonce does not
    /// have the policy's length.
    pub fn derive(
        provider: &dyn CryptoProvider,
        policy: &SecurityPolicy,
        params: TokenParams,
        local_nonce: &[u8],
        remote_nonce: &[u8],
    ) -> Result<Self> {
        let (local, remote) = if policy.is_none() {
            (ChannelKeys::default(), ChannelKeys::default())
        } else {
            for nonce in [local_nonce, remote_nonce] {
                if nonce.len() != policy.nonce_length {
                    return Err(Error::new(
                        StatusCode::BadNonceInvalid,
                        format!(
                            "nonce is {} bytes, policy {} requires {}",
                            nonce.len(),
                            policy.uri,
                            policy.nonce_length
                        ),
                    ));
                }
            }

            let length = policy.derived_key_length();
            let derivation = policy.key_derivation;
            let local = provider.derive_keys(derivation, remote_nonce, local_nonce, length)?;
            let remote = provider.derive_keys(derivation, local_nonce, remote_nonce, length)?;
            (
                ChannelKeys::split(policy, &local)?,
                ChannelKeys::split(policy, &remote)?,
            )
        };

        log::trace!(
            "Derived keys for channel {} token {}: local {:?}, remote {:?}",
            params.channel_id,
            params.token_id,
            local,
            remote
        );

        Ok(Self {
            params,
            signature_algorithm: policy.symmetric_signature,
            encryption_algorithm: policy.symmetric_encryption,
            local,
            remote,
            issued_at: Instant::now(),
        })
    }

    /// Build a token from explicit keys
    pub fn from_keys(
        policy: &SecurityPolicy,
        params: TokenParams,
        local: ChannelKeys,
        remote: ChannelKeys,
    ) -> Self {
        Self {
            params,
            signature_algorithm: policy.symmetric_signature,
            encryption_algorithm: policy.symmetric_encryption,
            local,
            remote,
            issued_at: Instant::now(),
        }
    }

    /// Issued parameters
    pub fn params(&self) -> &TokenParams {
        &self.params
    }

    /// Secure channel id
    pub fn channel_id(&self) -> u32 {
        self.params.channel_id
    }

    /// Token id
    pub fn token_id(&self) -> u32 {
        self.params.token_id
    }

    /// Server creation time
    pub fn created_at(&self) -> DateTime<Utc> {
        self.params.created_at
    }

    /// Revised lifetime
    pub fn lifetime(&self) -> Duration {
        self.params.lifetime
    }

    /// HMAC algorithm of the token
    pub fn signature_algorithm(&self) -> SecurityAlgorithm {
        self.signature_algorithm
    }

    /// Cipher algorithm of the token
    pub fn encryption_algorithm(&self) -> SecurityAlgorithm {
        self.encryption_algorithm
    }

    /// Keys protecting messages this side sends
    pub fn local_keys(&self) -> &ChannelKeys {
        &self.local
    }

    /// Keys verifying messages this side receives
    pub fn remote_keys(&self) -> &ChannelKeys {
        &self.remote
    }

    /// Local instant the token was derived at
    pub fn issued_at(&self) -> Instant {
        self.issued_at
    }

    /// Local instant the token stops being valid
    pub fn expires_at(&self) -> Instant {
        self.issued_at + self.params.lifetime
    }

    /// Local instant a client should renew at (75% of the lifetime)
    pub fn renew_at(&self) -> Instant {
        self.issued_at + self.params.lifetime.mul_f64(0.75)
    }

    /// True once the lifetime has elapsed
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at()
    }
}
