//! Cryptographic provider contract
//!
//! [`CryptoProvider`] is the single capability the channel uses for every
//! cryptographic operation. Implementations are stateless and must be
//! interchangeable: for identical keys, IVs and algorithms they produce
//! byte-identical output for every deterministic operation (symmetric
//! encryption, HMAC, key derivation, PKCS#1 v1.5 signatures).
//!
//! Providers are looked up by name through a [`ProviderRegistry`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use parking_lot::RwLock;
use rand::rngs::OsRng;
use rand::RngCore;

use super::algorithm::SecurityAlgorithm;
use super::keys::{PrivateKey, PublicKey};
use super::portable::PortableProvider;
use super::rustcrypto::RustCryptoProvider;
use super::token::SecurityToken;
use crate::status::{Error, Result, StatusCode};

/// Stateless cryptographic operations used to protect channel messages
pub trait CryptoProvider: Send + Sync + fmt::Debug {
    /// Registry name of the provider
    fn name(&self) -> &'static str;

    /// Sign `data` with a private key
    ///
    /// Returns an empty signature for [`SecurityAlgorithm::None`].
    fn sign_asymmetric(
        &self,
        key: &PrivateKey,
        algorithm: SecurityAlgorithm,
        data: &[u8],
    ) -> Result<Vec<u8>>;

    /// Verify an asymmetric signature
    ///
    /// Always true for [`SecurityAlgorithm::None`].
    fn verify_asymmetric(
        &self,
        key: &PublicKey,
        algorithm: SecurityAlgorithm,
        data: &[u8],
        signature: &[u8],
    ) -> Result<bool>;

    /// Encrypt `data` block by block into `output[offset..]`, returning the bytes written
    ///
    /// `data` must be a multiple of the algorithm's plain text block size.
    fn encrypt_asymmetric(
        &self,
        key: &PublicKey,
        algorithm: SecurityAlgorithm,
        data: &[u8],
        output: &mut [u8],
        offset: usize,
    ) -> Result<usize>;

    /// Decrypt `data` block by block into `output[offset..]`, returning the bytes written
    ///
    /// `data` must be a multiple of the key size.
    fn decrypt_asymmetric(
        &self,
        key: &PrivateKey,
        algorithm: SecurityAlgorithm,
        data: &[u8],
        output: &mut [u8],
        offset: usize,
    ) -> Result<usize>;

    /// Encrypt with the token's local keys in CBC mode
    fn encrypt_symmetric(
        &self,
        token: &SecurityToken,
        data: &[u8],
        output: &mut [u8],
        offset: usize,
    ) -> Result<usize>;

    /// Decrypt with the token's remote keys in CBC mode
    fn decrypt_symmetric(
        &self,
        token: &SecurityToken,
        data: &[u8],
        output: &mut [u8],
        offset: usize,
    ) -> Result<usize>;

    /// HMAC `data` with the token's local signing key into `output`
    fn sign_symmetric(&self, token: &SecurityToken, data: &[u8], output: &mut [u8]) -> Result<()>;

    /// Check an HMAC made with the token's remote signing key
    ///
    /// A length mismatch and a content mismatch both fail with
    /// `BadSecurityChecksFailed`.
    fn verify_symmetric(&self, token: &SecurityToken, data: &[u8], signature: &[u8]) -> Result<()>;

    /// Run the key derivation function, producing `length` bytes
    fn derive_keys(
        &self,
        algorithm: SecurityAlgorithm,
        secret: &[u8],
        seed: &[u8],
        length: usize,
    ) -> Result<Vec<u8>>;

    /// Fill a fresh buffer with secure random bytes
    fn random_bytes(&self, length: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; length];
        OsRng.fill_bytes(&mut bytes);
        bytes
    }

    /// Standard base64 encoding
    fn base64_encode(&self, data: &[u8]) -> String {
        STANDARD.encode(data)
    }

    /// Standard base64 decoding
    fn base64_decode(&self, text: &str) -> Result<Vec<u8>> {
        STANDARD
            .decode(text)
            .map_err(|e| Error::decoding(format!("invalid base64: {}", e)))
    }
}

/// Named set of crypto providers
#[derive(Debug)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<&'static str, Arc<dyn CryptoProvider>>>,
}

impl ProviderRegistry {
    /// Name of the provider used when none is configured
    pub const DEFAULT: &'static str = RustCryptoProvider::NAME;

    /// Registry holding the providers built into the crate
    pub fn builtin() -> Self {
        let registry = Self {
            providers: RwLock::new(HashMap::new()),
        };
        registry.insert(Arc::new(RustCryptoProvider::new()));
        registry.insert(Arc::new(PortableProvider::new()));
        registry
    }

    fn insert(&self, provider: Arc<dyn CryptoProvider>) {
        self.providers.write().insert(provider.name(), provider);
    }

    /// Add a provider, rejecting a name that is already taken
    pub fn register(&self, provider: Arc<dyn CryptoProvider>) -> Result<()> {
        let mut providers = self.providers.write();
        if providers.contains_key(provider.name()) {
            return Err(Error::new(
                StatusCode::BadInvalidState,
                format!("crypto provider {} is already registered", provider.name()),
            ));
        }
        providers.insert(provider.name(), provider);
        Ok(())
    }

    /// Look a provider up by name
    pub fn get(&self, name: &str) -> Result<Arc<dyn CryptoProvider>> {
        self.providers
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::internal(format!("unknown crypto provider {}", name)))
    }

    /// The default provider
    pub fn default_provider(&self) -> Result<Arc<dyn CryptoProvider>> {
        self.get(Self::DEFAULT)
    }

    /// Names of all registered providers, sorted
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.providers.read().keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_providers() {
        let registry = ProviderRegistry::builtin();
        assert_eq!(registry.names(), vec!["portable", "rustcrypto"]);
        assert_eq!(registry.default_provider().unwrap().name(), "rustcrypto");
        assert_eq!(
            registry.get("openssl").unwrap_err().status(),
            StatusCode::BadInternalError
        );
    }

    #[test]
    fn test_duplicate_provider_rejected() {
        let registry = ProviderRegistry::builtin();
        let err = registry
            .register(Arc::new(PortableProvider::new()))
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BadInvalidState);
    }

    #[test]
    fn test_base64_round_trip() {
        let provider = RustCryptoProvider::new();
        let encoded = provider.base64_encode(b"secure channel");
        assert_eq!(encoded, "c2VjdXJlIGNoYW5uZWw=");
        assert_eq!(provider.base64_decode(&encoded).unwrap(), b"secure channel");
        assert_eq!(
            provider.base64_decode("***").unwrap_err().status(),
            StatusCode::BadDecodingError
        );
    }

    #[test]
    fn test_random_bytes_length() {
        let provider = PortableProvider::new();
        let a = provider.random_bytes(32);
        let b = provider.random_bytes(32);
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }
}
