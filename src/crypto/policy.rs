//! Security policy catalog
//!
//! A [`SecurityPolicy`] bundles the algorithm choices and size constraints a
//! channel negotiates by URI. The set of known policies lives in an explicit
//! [`PolicyRegistry`] value that components receive by reference; new policies
//! can only be added through [`PolicyRegistry::register`].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::algorithm::SecurityAlgorithm;
use crate::status::{Error, Result, StatusCode};

/// URI of the None policy
pub const POLICY_URI_NONE: &str = "http://opcfoundation.org/UA/SecurityPolicy#None";
/// URI of Basic128Rsa15
pub const POLICY_URI_BASIC128RSA15: &str =
    "http://opcfoundation.org/UA/SecurityPolicy#Basic128Rsa15";
/// URI of Basic256
pub const POLICY_URI_BASIC256: &str = "http://opcfoundation.org/UA/SecurityPolicy#Basic256";
/// URI of Basic256Sha256
pub const POLICY_URI_BASIC256SHA256: &str =
    "http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256";
/// URI of Aes128_Sha256_RsaOaep
pub const POLICY_URI_AES128_SHA256_RSAOAEP: &str =
    "http://opcfoundation.org/UA/SecurityPolicy#Aes128_Sha256_RsaOaep";
/// URI of Aes256_Sha256_RsaPss
pub const POLICY_URI_AES256_SHA256_RSAPSS: &str =
    "http://opcfoundation.org/UA/SecurityPolicy#Aes256_Sha256_RsaPss";

/// A named bundle of algorithm choices and size constraints
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityPolicy {
    /// Policy URI
    pub uri: String,

    /// Symmetric signature (HMAC) algorithm
    pub symmetric_signature: SecurityAlgorithm,

    /// Symmetric encryption algorithm
    pub symmetric_encryption: SecurityAlgorithm,

    /// Asymmetric signature algorithm
    pub asymmetric_signature: SecurityAlgorithm,

    /// Asymmetric encryption algorithm
    pub asymmetric_encryption: SecurityAlgorithm,

    /// Asymmetric key wrap algorithm
    pub asymmetric_key_wrap: SecurityAlgorithm,

    /// Key derivation algorithm
    pub key_derivation: SecurityAlgorithm,

    /// Size of a symmetric signature in bytes
    pub signature_size: usize,

    /// Length of the derived symmetric signing key in bytes
    pub derived_signature_key_size: usize,

    /// Length of the symmetric encryption key in bytes
    pub symmetric_key_size: usize,

    /// Symmetric encryption block size in bytes (also the IV length)
    pub encryption_block_size: usize,

    /// Minimum asymmetric key length in bits
    pub min_asymmetric_key_length: usize,

    /// Maximum asymmetric key length in bits
    pub max_asymmetric_key_length: usize,

    /// Length of the nonce exchanged when opening a channel
    pub nonce_length: usize,
}

impl SecurityPolicy {
    /// The policy without any security
    pub fn none() -> Self {
        Self {
            uri: POLICY_URI_NONE.to_string(),
            symmetric_signature: SecurityAlgorithm::None,
            symmetric_encryption: SecurityAlgorithm::None,
            asymmetric_signature: SecurityAlgorithm::None,
            asymmetric_encryption: SecurityAlgorithm::None,
            asymmetric_key_wrap: SecurityAlgorithm::None,
            key_derivation: SecurityAlgorithm::None,
            signature_size: 0,
            derived_signature_key_size: 0,
            symmetric_key_size: 0,
            encryption_block_size: 0,
            min_asymmetric_key_length: 0,
            max_asymmetric_key_length: 0,
            nonce_length: 0,
        }
    }

    /// Basic128Rsa15 (deprecated by the standard but still deployed)
    pub fn basic128_rsa15() -> Self {
        Self {
            uri: POLICY_URI_BASIC128RSA15.to_string(),
            symmetric_signature: SecurityAlgorithm::HmacSha1,
            symmetric_encryption: SecurityAlgorithm::Aes128Cbc,
            asymmetric_signature: SecurityAlgorithm::RsaSha1,
            asymmetric_encryption: SecurityAlgorithm::Rsa15,
            asymmetric_key_wrap: SecurityAlgorithm::Rsa15,
            key_derivation: SecurityAlgorithm::PSha1,
            signature_size: 20,
            derived_signature_key_size: 16,
            symmetric_key_size: 16,
            encryption_block_size: 16,
            min_asymmetric_key_length: 1024,
            max_asymmetric_key_length: 2048,
            nonce_length: 16,
        }
    }

    /// Basic256
    pub fn basic256() -> Self {
        Self {
            uri: POLICY_URI_BASIC256.to_string(),
            symmetric_signature: SecurityAlgorithm::HmacSha1,
            symmetric_encryption: SecurityAlgorithm::Aes256Cbc,
            asymmetric_signature: SecurityAlgorithm::RsaSha1,
            asymmetric_encryption: SecurityAlgorithm::RsaOaep,
            asymmetric_key_wrap: SecurityAlgorithm::RsaOaep,
            key_derivation: SecurityAlgorithm::PSha1,
            signature_size: 20,
            derived_signature_key_size: 24,
            symmetric_key_size: 32,
            encryption_block_size: 16,
            min_asymmetric_key_length: 1024,
            max_asymmetric_key_length: 2048,
            nonce_length: 32,
        }
    }

    /// Basic256Sha256
    pub fn basic256_sha256() -> Self {
        Self {
            uri: POLICY_URI_BASIC256SHA256.to_string(),
            symmetric_signature: SecurityAlgorithm::HmacSha256,
            symmetric_encryption: SecurityAlgorithm::Aes256Cbc,
            asymmetric_signature: SecurityAlgorithm::RsaSha256,
            asymmetric_encryption: SecurityAlgorithm::RsaOaep,
            asymmetric_key_wrap: SecurityAlgorithm::RsaOaep,
            key_derivation: SecurityAlgorithm::PSha256,
            signature_size: 32,
            derived_signature_key_size: 32,
            symmetric_key_size: 32,
            encryption_block_size: 16,
            min_asymmetric_key_length: 2048,
            max_asymmetric_key_length: 4096,
            nonce_length: 32,
        }
    }

    /// Aes128_Sha256_RsaOaep
    pub fn aes128_sha256_rsa_oaep() -> Self {
        Self {
            uri: POLICY_URI_AES128_SHA256_RSAOAEP.to_string(),
            symmetric_signature: SecurityAlgorithm::HmacSha256,
            symmetric_encryption: SecurityAlgorithm::Aes128Cbc,
            asymmetric_signature: SecurityAlgorithm::RsaSha256,
            asymmetric_encryption: SecurityAlgorithm::RsaOaep,
            asymmetric_key_wrap: SecurityAlgorithm::RsaOaep,
            key_derivation: SecurityAlgorithm::PSha256,
            signature_size: 32,
            derived_signature_key_size: 32,
            symmetric_key_size: 16,
            encryption_block_size: 16,
            min_asymmetric_key_length: 2048,
            max_asymmetric_key_length: 4096,
            nonce_length: 32,
        }
    }

    /// Aes256_Sha256_RsaPss
    pub fn aes256_sha256_rsa_pss() -> Self {
        Self {
            uri: POLICY_URI_AES256_SHA256_RSAPSS.to_string(),
            symmetric_signature: SecurityAlgorithm::HmacSha256,
            symmetric_encryption: SecurityAlgorithm::Aes256Cbc,
            asymmetric_signature: SecurityAlgorithm::RsaPssSha256,
            asymmetric_encryption: SecurityAlgorithm::RsaOaepSha256,
            asymmetric_key_wrap: SecurityAlgorithm::RsaOaepSha256,
            key_derivation: SecurityAlgorithm::PSha256,
            signature_size: 32,
            derived_signature_key_size: 32,
            symmetric_key_size: 32,
            encryption_block_size: 16,
            min_asymmetric_key_length: 2048,
            max_asymmetric_key_length: 4096,
            nonce_length: 32,
        }
    }

    /// True if this is a policy without any algorithm
    pub fn is_none(&self) -> bool {
        self.symmetric_signature.is_none()
            && self.symmetric_encryption.is_none()
            && self.asymmetric_signature.is_none()
            && self.asymmetric_encryption.is_none()
            && self.asymmetric_key_wrap.is_none()
            && self.key_derivation.is_none()
    }

    /// Total length of key material derived per side for one token
    pub fn derived_key_length(&self) -> usize {
        self.derived_signature_key_size + self.symmetric_key_size + self.encryption_block_size
    }

    /// Check that an asymmetric key of `bits` length is allowed by this policy
    pub fn check_key_length(&self, bits: usize) -> Result<()> {
        if self.is_none() {
            return Ok(());
        }
        if bits < self.min_asymmetric_key_length || bits > self.max_asymmetric_key_length {
            return Err(Error::new(
                StatusCode::BadSecurityPolicyRejected,
                format!(
                    "key length {} bits outside {}..={} allowed by {}",
                    bits, self.min_asymmetric_key_length, self.max_asymmetric_key_length, self.uri
                ),
            ));
        }
        Ok(())
    }

    /// Check the catalog invariants of a policy before it enters a registry
    fn validate(&self) -> Result<()> {
        if self.uri.is_empty() {
            return Err(Error::internal("policy URI is empty"));
        }
        if self.is_none() {
            let sizes = [
                self.signature_size,
                self.derived_signature_key_size,
                self.symmetric_key_size,
                self.encryption_block_size,
                self.nonce_length,
            ];
            if sizes.iter().any(|s| *s != 0) {
                return Err(Error::internal("the None policy must have zero sizes"));
            }
            return Ok(());
        }
        if self.symmetric_signature.mac_size() != self.signature_size
            || self.symmetric_encryption.cipher_key_size() != self.symmetric_key_size
            || self.symmetric_encryption.cipher_block_size() != self.encryption_block_size
        {
            return Err(Error::internal(format!(
                "policy {} sizes do not match its algorithms",
                self.uri
            )));
        }
        if !self.asymmetric_encryption.is_asymmetric_encryption()
            || !self.asymmetric_signature.is_asymmetric_signature()
        {
            return Err(Error::internal(format!(
                "policy {} has no asymmetric algorithms",
                self.uri
            )));
        }
        Ok(())
    }
}

/// Catalog of the security policies known to a process
///
/// Constructed once at configuration time and shared through an `Arc`.
#[derive(Debug)]
pub struct PolicyRegistry {
    policies: RwLock<HashMap<String, SecurityPolicy>>,
}

impl PolicyRegistry {
    /// Registry holding the standard policies
    pub fn standard() -> Self {
        let policies = [
            SecurityPolicy::none(),
            SecurityPolicy::basic128_rsa15(),
            SecurityPolicy::basic256(),
            SecurityPolicy::basic256_sha256(),
            SecurityPolicy::aes128_sha256_rsa_oaep(),
            SecurityPolicy::aes256_sha256_rsa_pss(),
        ]
        .into_iter()
        .map(|p| (p.uri.clone(), p))
        .collect();

        Self {
            policies: RwLock::new(policies),
        }
    }

    /// Standard registry wrapped for sharing
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::standard())
    }

    /// Look a policy up by URI
    pub fn get(&self, uri: &str) -> Result<SecurityPolicy> {
        self.policies.read().get(uri).cloned().ok_or_else(|| {
            Error::new(
                StatusCode::BadSecurityPolicyRejected,
                format!("security policy \"{}\" is unknown", uri),
            )
        })
    }

    /// True if the URI is registered
    pub fn contains(&self, uri: &str) -> bool {
        self.policies.read().contains_key(uri)
    }

    /// URIs of all registered policies, sorted
    pub fn uris(&self) -> Vec<String> {
        let mut uris: Vec<String> = self.policies.read().keys().cloned().collect();
        uris.sort();
        uris
    }

    /// Extend the registry with a new policy
    ///
    /// Fails if the URI is taken, if the policy would be a second None policy,
    /// or if its sizes disagree with its algorithms.
    pub fn register(&self, policy: SecurityPolicy) -> Result<()> {
        policy.validate()?;

        let mut policies = self.policies.write();
        if policies.contains_key(&policy.uri) {
            return Err(Error::new(
                StatusCode::BadInvalidState,
                format!("security policy {} is already registered", policy.uri),
            ));
        }
        if policy.is_none() && policies.values().any(SecurityPolicy::is_none) {
            return Err(Error::new(
                StatusCode::BadInvalidState,
                "only one None policy may be registered",
            ));
        }

        log::debug!("Registered security policy {}", policy.uri);
        policies.insert(policy.uri.clone(), policy);
        Ok(())
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
