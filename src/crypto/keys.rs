//! Identity values consumed by the channel
//!
//! Certificates and keys arrive already decoded by whatever key store the
//! application uses. The channel only needs the encoded certificate bytes (to
//! put them on the wire and compute thumbprints), the RSA public key it
//! carries, and its validity window.

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha1::{Digest, Sha1};

use crate::status::{Error, Result, StatusCode};

/// Length of a certificate thumbprint (SHA-1)
pub const THUMBPRINT_SIZE: usize = 20;

/// An RSA public key
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey(RsaPublicKey);

impl PublicKey {
    /// Wrap an RSA public key
    pub fn new(key: RsaPublicKey) -> Self {
        Self(key)
    }

    /// Modulus length in bytes, which is also the signature and cipher block size
    pub fn size(&self) -> usize {
        self.0.size()
    }

    /// Modulus length in bits
    pub fn bit_length(&self) -> usize {
        self.size() * 8
    }

    pub(crate) fn rsa(&self) -> &RsaPublicKey {
        &self.0
    }
}

impl From<RsaPublicKey> for PublicKey {
    fn from(key: RsaPublicKey) -> Self {
        Self(key)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({} bits)", self.bit_length())
    }
}

/// An RSA private key
#[derive(Clone)]
pub struct PrivateKey(RsaPrivateKey);

impl PrivateKey {
    /// Wrap an RSA private key
    pub fn new(key: RsaPrivateKey) -> Self {
        Self(key)
    }

    /// Modulus length in bytes
    pub fn size(&self) -> usize {
        self.0.size()
    }

    /// Modulus length in bits
    pub fn bit_length(&self) -> usize {
        self.size() * 8
    }

    /// The matching public key
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.to_public_key())
    }

    pub(crate) fn rsa(&self) -> &RsaPrivateKey {
        &self.0
    }
}

impl From<RsaPrivateKey> for PrivateKey {
    fn from(key: RsaPrivateKey) -> Self {
        Self(key)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey({} bits)", self.bit_length())
    }
}

/// An application instance certificate, already decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    der: Bytes,
    public_key: PublicKey,
    not_before: Option<DateTime<Utc>>,
    not_after: Option<DateTime<Utc>>,
}

impl Certificate {
    /// Create a certificate from its encoded bytes and the public key it carries
    pub fn new(der: impl Into<Bytes>, public_key: PublicKey) -> Self {
        Self {
            der: der.into(),
            public_key,
            not_before: None,
            not_after: None,
        }
    }

    /// Attach the validity window read from the certificate
    pub fn with_validity(
        mut self,
        not_before: Option<DateTime<Utc>>,
        not_after: Option<DateTime<Utc>>,
    ) -> Self {
        self.not_before = not_before;
        self.not_after = not_after;
        self
    }

    /// Encoded certificate bytes as sent on the wire
    pub fn as_bytes(&self) -> &Bytes {
        &self.der
    }

    /// Public key of the certificate
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// SHA-1 thumbprint of the encoded certificate
    pub fn thumbprint(&self) -> [u8; THUMBPRINT_SIZE] {
        Sha1::digest(&self.der).into()
    }

    /// Check the validity window against `now`
    pub fn check_time_valid(&self, now: DateTime<Utc>) -> Result<()> {
        let before_start = self.not_before.map_or(false, |start| now < start);
        let after_end = self.not_after.map_or(false, |end| now > end);
        if before_start || after_end {
            return Err(Error::new(
                StatusCode::BadCertificateTimeInvalid,
                format!(
                    "certificate valid {:?}..{:?}, now {}",
                    self.not_before, self.not_after, now
                ),
            ));
        }
        Ok(())
    }
}

/// A certificate together with its private key
#[derive(Debug, Clone)]
pub struct KeyPair {
    /// Certificate presented to the peer
    pub certificate: Certificate,

    /// Private key matching the certificate
    pub private_key: PrivateKey,
}

impl KeyPair {
    /// Pair a certificate with its private key
    ///
    /// Fails with `BadCertificateInvalid` if the key does not belong to the certificate.
    pub fn new(certificate: Certificate, private_key: PrivateKey) -> Result<Self> {
        if private_key.public_key() != *certificate.public_key() {
            return Err(Error::new(
                StatusCode::BadCertificateInvalid,
                "private key does not match certificate",
            ));
        }
        Ok(Self {
            certificate,
            private_key,
        })
    }
}
