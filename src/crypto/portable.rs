//! Provider built from raw primitives
//!
//! Chains CBC by hand over single AES block operations and computes HMAC
//! directly from the SHA digests. It has no dependency on the block mode or
//! MAC crates and serves as an independent implementation the default
//! provider is checked against.

use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes128, Aes256, Block};
use sha1::{Digest, Sha1};
use sha2::Sha256;

use super::algorithm::SecurityAlgorithm;
use super::keys::{PrivateKey, PublicKey};
use super::provider::CryptoProvider;
use super::shared;
use super::token::SecurityToken;
use crate::status::{Error, Result};

const AES_BLOCK: usize = 16;
const HMAC_BLOCK: usize = 64;
const IPAD: u8 = 0x36;
const OPAD: u8 = 0x5c;

/// Crypto provider over raw AES and SHA primitives
#[derive(Debug, Clone, Copy, Default)]
pub struct PortableProvider;

impl PortableProvider {
    /// Registry name
    pub const NAME: &'static str = "portable";

    pub fn new() -> Self {
        Self
    }
}

/// HMAC over a 64-byte block digest
fn hmac_with<D: Digest>(key: &[u8], parts: &[&[u8]]) -> Vec<u8> {
    let mut block_key = [0u8; HMAC_BLOCK];
    if key.len() > HMAC_BLOCK {
        let hashed = D::digest(key);
        block_key[..hashed.len()].copy_from_slice(&hashed);
    } else {
        block_key[..key.len()].copy_from_slice(key);
    }

    let mut inner = D::new();
    inner.update(block_key.map(|b| b ^ IPAD));
    for part in parts {
        inner.update(part);
    }
    let inner = inner.finalize();

    let mut outer = D::new();
    outer.update(block_key.map(|b| b ^ OPAD));
    outer.update(&inner);
    outer.finalize().to_vec()
}

fn hmac(algorithm: SecurityAlgorithm, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    match algorithm {
        SecurityAlgorithm::HmacSha1 => Ok(hmac_with::<Sha1>(key, &[data])),
        SecurityAlgorithm::HmacSha256 => Ok(hmac_with::<Sha256>(key, &[data])),
        other => Err(shared::unsupported(other, "symmetric signing")),
    }
}

fn cbc_encrypt_with<F: Fn(&mut Block)>(encrypt: F, iv: &[u8], data: &[u8], out: &mut [u8]) {
    let mut chain = Block::clone_from_slice(iv);
    for (plain, cipher) in data.chunks(AES_BLOCK).zip(out.chunks_mut(AES_BLOCK)) {
        for (c, p) in chain.iter_mut().zip(plain) {
            *c ^= p;
        }
        encrypt(&mut chain);
        cipher.copy_from_slice(&chain);
    }
}

fn cbc_decrypt_with<F: Fn(&mut Block)>(decrypt: F, iv: &[u8], data: &[u8], out: &mut [u8]) {
    let mut chain = Block::clone_from_slice(iv);
    for (cipher, plain) in data.chunks(AES_BLOCK).zip(out.chunks_mut(AES_BLOCK)) {
        let mut block = Block::clone_from_slice(cipher);
        decrypt(&mut block);
        for ((p, b), c) in plain.iter_mut().zip(block.iter()).zip(chain.iter()) {
            *p = b ^ c;
        }
        chain = Block::clone_from_slice(cipher);
    }
}

fn check_key(algorithm: SecurityAlgorithm, key: &[u8], iv: &[u8]) -> Result<()> {
    if key.len() != algorithm.cipher_key_size() || iv.len() != AES_BLOCK {
        return Err(Error::internal(format!(
            "invalid {:?} key ({} bytes) or IV ({} bytes)",
            algorithm,
            key.len(),
            iv.len()
        )));
    }
    Ok(())
}

fn cbc(
    algorithm: SecurityAlgorithm,
    key: &[u8],
    iv: &[u8],
    data: &[u8],
    out: &mut [u8],
    encrypt: bool,
) -> Result<()> {
    check_key(algorithm, key, iv)?;
    match (algorithm, encrypt) {
        (SecurityAlgorithm::Aes128Cbc, true) => {
            let cipher = Aes128::new_from_slice(key).map_err(|_| Error::internal("bad AES key"))?;
            cbc_encrypt_with(|b| cipher.encrypt_block(b), iv, data, out);
        }
        (SecurityAlgorithm::Aes128Cbc, false) => {
            let cipher = Aes128::new_from_slice(key).map_err(|_| Error::internal("bad AES key"))?;
            cbc_decrypt_with(|b| cipher.decrypt_block(b), iv, data, out);
        }
        (SecurityAlgorithm::Aes256Cbc, true) => {
            let cipher = Aes256::new_from_slice(key).map_err(|_| Error::internal("bad AES key"))?;
            cbc_encrypt_with(|b| cipher.encrypt_block(b), iv, data, out);
        }
        (SecurityAlgorithm::Aes256Cbc, false) => {
            let cipher = Aes256::new_from_slice(key).map_err(|_| Error::internal("bad AES key"))?;
            cbc_decrypt_with(|b| cipher.decrypt_block(b), iv, data, out);
        }
        (other, _) => return Err(shared::unsupported(other, "symmetric encryption")),
    }
    Ok(())
}

impl CryptoProvider for PortableProvider {
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
        } else {
            shared::check_block_aligned(data.len(), AES_BLOCK, "plain text")?;
            let keys = token.local_keys();
            cbc(algorithm, keys.encrypting_key(), keys.iv(), data, window, true)?;
        }
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
        } else {
            shared::check_block_aligned(data.len(), AES_BLOCK, "cipher text")?;
            let keys = token.remote_keys();
            cbc(algorithm, keys.encrypting_key(), keys.iv(), data, window, false)?;
        }
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
        if !shared::constant_time_eq(&expected, signature) {
            return Err(Error::security_checks_failed("symmetric signature mismatch"));
        }
        Ok(())
    }

    fn derive_keys(
        &self,
        algorithm: SecurityAlgorithm,
        secret: &[u8],
        seed: &[u8],
        length: usize,
    ) -> Result<Vec<u8>> {
        match algorithm {
            SecurityAlgorithm::PSha1 => Ok(shared::p_hash(hmac_with::<Sha1>, secret, seed, length)),
            SecurityAlgorithm::PSha256 => {
                Ok(shared::p_hash(hmac_with::<Sha256>, secret, seed, length))
            }
            other => Err(shared::unsupported(other, "key derivation")),
        }
    }
}
