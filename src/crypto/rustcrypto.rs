//! Provider backed by the RustCrypto block mode and MAC crates
//!
//! Symmetric encryption uses the `cbc` mode wrappers without padding (the
//! channel pads messages itself) and HMAC comes from the `hmac` crate.

use aes::{Aes128, Aes256};
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;

use super::algorithm::SecurityAlgorithm;
use super::keys::{PrivateKey, PublicKey};
use super::provider::CryptoProvider;
use super::shared;
use super::token::SecurityToken;
use crate::status::{Error, Result};

/// Default crypto provider
#[derive(Debug, Clone, Copy, Default)]
pub struct RustCryptoProvider;

impl RustCryptoProvider {
    /// Registry name
    pub const NAME: &'static str = "rustcrypto";

    pub fn new() -> Self {
        Self
    }
}

fn hmac_parts<M: Mac + hmac::digest::KeyInit>(key: &[u8], parts: &[&[u8]]) -> Vec<u8> {
    // HMAC accepts keys of any length
    let mut mac = <M as hmac::digest::KeyInit>::new_from_slice(key)
        .unwrap_or_else(|_| unreachable!("HMAC keys have no length limit"));
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().to_vec()
}

fn hmac(algorithm: SecurityAlgorithm, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    match algorithm {
        SecurityAlgorithm::HmacSha1 => Ok(hmac_parts::<Hmac<Sha1>>(key, &[data])),
        SecurityAlgorithm::HmacSha256 => Ok(hmac_parts::<Hmac<Sha256>>(key, &[data])),
        other => Err(shared::unsupported(other, "symmetric signing")),
    }
}

fn invalid_key(e: impl std::fmt::Display) -> Error {
    Error::internal(format!("invalid symmetric key or IV: {}", e))
}

fn cbc_encrypt(
    algorithm: SecurityAlgorithm,
    key: &[u8],
    iv: &[u8],
    data: &[u8],
    out: &mut [u8],
) -> Result<()> {
    let result = match algorithm {
        SecurityAlgorithm::Aes128Cbc => cbc::Encryptor::<Aes128>::new_from_slices(key, iv)
            .map_err(invalid_key)?
            .encrypt_padded_b2b_mut::<NoPadding>(data, out)
            .map(|_| ()),
        SecurityAlgorithm::Aes256Cbc => cbc::Encryptor::<Aes256>::new_from_slices(key, iv)
            .map_err(invalid_key)?
            .encrypt_padded_b2b_mut::<NoPadding>(data, out)
            .map(|_| ()),
        other => return Err(shared::unsupported(other, "symmetric encryption")),
    };
    result.map_err(|_| Error::internal("CBC encryption output buffer too small"))
}

fn cbc_decrypt(
    algorithm: SecurityAlgorithm,
    key: &[u8],
    iv: &[u8],
    data: &[u8],
    out: &mut [u8],
) -> Result<()> {
    let result = match algorithm {
        SecurityAlgorithm::Aes128Cbc => cbc::Decryptor::<Aes128>::new_from_slices(key, iv)
            .map_err(invalid_key)?
            .decrypt_padded_b2b_mut::<NoPadding>(data, out)
            .map(|_| ()),
        SecurityAlgorithm::Aes256Cbc => cbc::Decryptor::<Aes256>::new_from_slices(key, iv)
            .map_err(invalid_key)?
            .decrypt_padded_b2b_mut::<NoPadding>(data, out)
            .map(|_| ()),
        other => return Err(shared::unsupported(other, "symmetric decryption")),
    };
    result.map_err(|_| Error::internal("CBC decryption failed"))
}

impl CryptoProvider for RustCryptoProvider {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn sign_asymmetric(
        &self,
        key: &PrivateKey,
        algorithm: SecurityAlgorithm,
        data: &[u8],
    ) -> Result<Vec<u8>> {
        shared::rsa_sign(key, algorithm, data)
    }

    fn verify_asymmetric(
        &self,
        key: &PublicKey,
        algorithm: SecurityAlgorithm,
        data: &[u8],
        signature: &[u8],
    ) -> Result<bool> {
        shared::rsa_verify(key, algorithm, data, signature)
    }

    fn encrypt_asymmetric(
        &self,
        key: &PublicKey,
        algorithm: SecurityAlgorithm,
        data: &[u8],
        output: &mut [u8],
        offset: usize,
    ) -> Result<usize> {
        shared::rsa_encrypt(key, algorithm, data, output, offset)
    }

    fn decrypt_asymmetric(
        &self,
        key: &PrivateKey,
        algorithm: SecurityAlgorithm,
        data: &[u8],
        output: &mut [u8],
        offset: usize,
    ) -> Result<usize> {
        shared::rsa_decrypt(key, algorithm, data, output, offset)
    }

    fn encrypt_symmetric(
        &self,
        token: &SecurityToken,
        data: &[u8],
        output: &mut [u8],
        offset: usize,
    ) -> Result<usize> {
        let algorithm = token.encryption_algorithm();
        let window = shared::output_window(output, offset, data.len())?;
        if algorithm.is_none() {
            window.copy_from_slice(data);
            return Ok(data.len());
        }
        shared::check_block_aligned(data.len(), algorithm.cipher_block_size(), "plain text")?;
        let keys = token.local_keys();
        cbc_encrypt(algorithm, keys.encrypting_key(), keys.iv(), data, window)?;
        Ok(data.len())
    }

    fn decrypt_symmetric(
        &self,
        token: &SecurityToken,
        data: &[u8],
        output: &mut [u8],
        offset: usize,
    ) -> Result<usize> {
        let algorithm = token.encryption_algorithm();
        let window = shared::output_window(output, offset, data.len())?;
        if algorithm.is_none() {
            window.copy_from_slice(data);
            return Ok(data.len());
        }
        shared::check_block_aligned(data.len(), algorithm.cipher_block_size(), "cipher text")?;
        let keys = token.remote_keys();
        cbc_decrypt(algorithm, keys.encrypting_key(), keys.iv(), data, window)?;
        Ok(data.len())
    }

    fn sign_symmetric(&self, token: &SecurityToken, data: &[u8], output: &mut [u8]) -> Result<()> {
        let algorithm = token.signature_algorithm();
        if algorithm.is_none() {
            return Ok(());
        }
        let mac = hmac(algorithm, token.local_keys().signing_key(), data)?;
        shared::output_window(output, 0, mac.len())?.copy_from_slice(&mac);
        Ok(())
    }

    fn verify_symmetric(&self, token: &SecurityToken, data: &[u8], signature: &[u8]) -> Result<()> {
        let algorithm = token.signature_algorithm();
        if algorithm.is_none() {
            return Ok(());
        }
        let expected = hmac(algorithm, token.remote_keys().signing_key(), data)?;
        if shared::constant_time_eq(&expected, signature) {
            Ok(())
        } else {
            Err(Error::security_checks_failed("symmetric signature mismatch"))
        }
    }

    fn derive_keys(
        &self,
        algorithm: SecurityAlgorithm,
        secret: &[u8],
        seed: &[u8],
        length: usize,
    ) -> Result<Vec<u8>> {
        match algorithm {
            SecurityAlgorithm::PSha1 => {
                Ok(shared::p_hash(hmac_parts::<Hmac<Sha1>>, secret, seed, length))
            }
            SecurityAlgorithm::PSha256 => {
                Ok(shared::p_hash(hmac_parts::<Hmac<Sha256>>, secret, seed, length))
            }
            other => Err(shared::unsupported(other, "key derivation")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{ChannelKeys, SecurityPolicy, TokenParams};
    use crate::status::StatusCode;
    use crate::test_util::{client_key_pair, server_key_pair};
    use chrono::Utc;
    use std::time::Duration;

    fn token(policy: &SecurityPolicy) -> SecurityToken {
        let keys = ChannelKeys::new(
            vec![0x0b; policy.derived_signature_key_size],
            vec![0x42; policy.symmetric_key_size],
            vec![0x24; policy.encryption_block_size],
        );
        let params = TokenParams {
            channel_id: 1,
            token_id: 1,
            created_at: Utc::now(),
            lifetime: Duration::from_secs(60),
        };
        // Loopback token: the same keys protect and verify
        SecurityToken::from_keys(policy, params, keys.clone(), keys)
    }

    #[test]
    fn test_hmac_sha256_known_answer() {
        // RFC 4231 test case 2
        let mac = hmac(
            SecurityAlgorithm::HmacSha256,
            b"Jefe",
            b"what do ya want for nothing?",
        )
        .unwrap();
        let expected = [
            0x5b, 0xdc, 0xc1, 0x46, 0xbf, 0x60, 0x75, 0x4e, 0x6a, 0x04, 0x24, 0x26, 0x08, 0x95,
            0x75, 0xc7, 0x5a, 0x00, 0x3f, 0x08, 0x9d, 0x27, 0x39, 0x83, 0x9d, 0xec, 0x58, 0xb9,
            0x64, 0xec, 0x38, 0x43,
        ];
        assert_eq!(mac, expected);
    }

    #[test]
    fn test_symmetric_round_trip() {
        let provider = RustCryptoProvider::new();
        let token = token(&SecurityPolicy::basic256_sha256());
        let plain: Vec<u8> = (0..64).collect();

        let mut cipher = vec![0u8; 64];
        assert_eq!(provider.encrypt_symmetric(&token, &plain, &mut cipher, 0).unwrap(), 64);
        assert_ne!(cipher, plain);

        let mut decrypted = vec![0u8; 70];
        provider
            .decrypt_symmetric(&token, &cipher, &mut decrypted, 6)
            .unwrap();
        assert_eq!(&decrypted[6..], &plain[..]);
    }

    #[test]
    fn test_symmetric_rejects_unaligned_input() {
        let provider = RustCryptoProvider::new();
        let token = token(&SecurityPolicy::basic128_rsa15());
        let mut out = vec![0u8; 32];
        let err = provider
            .encrypt_symmetric(&token, &[0u8; 17], &mut out, 0)
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BadInternalError);
    }

    #[test]
    fn test_symmetric_signature() {
        let provider = RustCryptoProvider::new();
        let token = token(&SecurityPolicy::basic128_rsa15());
        let mut signature = [0u8; 20];
        provider
            .sign_symmetric(&token, b"chunk", &mut signature)
            .unwrap();
        provider.verify_symmetric(&token, b"chunk", &signature).unwrap();

        let mut tampered = signature;
        tampered[3] ^= 1;
        assert_eq!(
            provider
                .verify_symmetric(&token, b"chunk", &tampered)
                .unwrap_err()
                .status(),
            StatusCode::BadSecurityChecksFailed
        );
        assert_eq!(
            provider
                .verify_symmetric(&token, b"chunk", &signature[..19])
                .unwrap_err()
                .status(),
            StatusCode::BadSecurityChecksFailed
        );
    }

    #[test]
    fn test_asymmetric_sign_and_verify() {
        let provider = RustCryptoProvider::new();
        let pair = client_key_pair();
        for algorithm in [
            SecurityAlgorithm::RsaSha1,
            SecurityAlgorithm::RsaSha256,
            SecurityAlgorithm::RsaPssSha256,
        ] {
            let signature = provider
                .sign_asymmetric(&pair.private_key, algorithm, b"open request")
                .unwrap();
            assert_eq!(signature.len(), 128);
            let public = pair.certificate.public_key();
            assert!(provider
                .verify_asymmetric(public, algorithm, b"open request", &signature)
                .unwrap());
            assert!(!provider
                .verify_asymmetric(public, algorithm, b"open requesT", &signature)
                .unwrap());
        }
    }

    #[test]
    fn test_asymmetric_encrypt_round_trip() {
        let provider = RustCryptoProvider::new();
        let pair = server_key_pair();
        for algorithm in [SecurityAlgorithm::Rsa15, SecurityAlgorithm::RsaOaep] {
            let block = algorithm.plain_text_block_size(128);
            let plain: Vec<u8> = (0..block * 2).map(|i| i as u8).collect();
            let mut cipher = vec![0u8; 256];
            let key = pair.certificate.public_key();
            let written = provider
                .encrypt_asymmetric(key, algorithm, &plain, &mut cipher, 0)
                .unwrap();
            assert_eq!(written, 256);

            let mut decrypted = vec![0u8; plain.len()];
            let read = provider
                .decrypt_asymmetric(&pair.private_key, algorithm, &cipher, &mut decrypted, 0)
                .unwrap();
            assert_eq!(read, plain.len());
            assert_eq!(decrypted, plain);
        }
    }

    #[test]
    fn test_asymmetric_decrypt_with_wrong_key() {
        let provider = RustCryptoProvider::new();
        let block = SecurityAlgorithm::Rsa15.plain_text_block_size(128);
        let mut cipher = vec![0u8; 128];
        provider
            .encrypt_asymmetric(
                server_key_pair().certificate.public_key(),
                SecurityAlgorithm::Rsa15,
                &vec![7u8; block],
                &mut cipher,
                0,
            )
            .unwrap();
        let mut out = vec![0u8; 128];
        let err = provider
            .decrypt_asymmetric(
                &client_key_pair().private_key,
                SecurityAlgorithm::Rsa15,
                &cipher,
                &mut out,
                0,
            )
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BadSecurityChecksFailed);
    }

    #[test]
    fn test_p_sha256_known_answer() {
        // TLS 1.2 PRF test vector (SHA-256), label and seed concatenated
        let secret = [
            0x9b, 0xbe, 0x43, 0x6b, 0xa9, 0x40, 0xf0, 0x17, 0xb1, 0x76, 0x52, 0x84, 0x9a, 0x71,
            0xdb, 0x35,
        ];
        let mut seed = b"test label".to_vec();
        seed.extend_from_slice(&[
            0xa0, 0xba, 0x9f, 0x93, 0x6c, 0xda, 0x31, 0x18, 0x27, 0xa6, 0xf7, 0x96, 0xff, 0xd5,
            0x19, 0x8c,
        ]);
        let out = RustCryptoProvider::new()
            .derive_keys(SecurityAlgorithm::PSha256, &secret, &seed, 16)
            .unwrap();
        assert_eq!(
            out,
            [
                0xe3, 0xf2, 0x29, 0xba, 0x72, 0x7b, 0xe1, 0x7b, 0x8d, 0x12, 0x26, 0x20, 0x55, 0x7c,
                0xd4, 0x53
            ]
        );
    }
}
