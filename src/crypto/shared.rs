//! Helpers shared by the crypto backends
//!
//! RSA is handled by the `rsa` crate for every backend, so the asymmetric
//! operations live here as free functions. The block alignment checks, the
//! constant time comparison and the P_hash construction are also common.

use rand::rngs::OsRng;
use rsa::{Oaep, Pkcs1v15Encrypt, Pkcs1v15Sign, Pss};
use sha1::{Digest, Sha1};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::algorithm::SecurityAlgorithm;
use super::keys::{PrivateKey, PublicKey};
use crate::status::{Error, Result};

/// Fail with `BadInternalError` unless `len` is a multiple of `block_size`
pub fn check_block_aligned(len: usize, block_size: usize, what: &str) -> Result<()> {
    if block_size == 0 || len % block_size != 0 {
        return Err(Error::internal(format!(
            "{} length {} is not a multiple of block size {}",
            what, len, block_size
        )));
    }
    Ok(())
}

/// Borrow `output[offset..offset + len]`, failing with `BadInternalError` if it does not fit
pub fn output_window(output: &mut [u8], offset: usize, len: usize) -> Result<&mut [u8]> {
    let end = offset
        .checked_add(len)
        .filter(|end| *end <= output.len())
        .ok_or_else(|| {
            Error::internal(format!(
                "output buffer of {} bytes cannot hold {} bytes at offset {}",
                output.len(),
                len,
                offset
            ))
        })?;
    Ok(&mut output[offset..end])
}

/// Compare two MACs without leaking where they differ
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

/// Reject an algorithm that does not belong to the operation
pub fn unsupported(algorithm: SecurityAlgorithm, operation: &str) -> Error {
    Error::internal(format!("{:?} cannot be used for {}", algorithm, operation))
}

/// TLS P_hash: `HMAC(secret, A(1) + seed) || HMAC(secret, A(2) + seed) || ...`
///
/// `hmac` computes the MAC of the concatenated parts under a key.
pub fn p_hash<F>(hmac: F, secret: &[u8], seed: &[u8], length: usize) -> Vec<u8>
where
    F: Fn(&[u8], &[&[u8]]) -> Vec<u8>,
{
    let mut output = Vec::with_capacity(length + 32);
    // A(1)
    let mut a = hmac(secret, &[seed]);
    while output.len() < length {
        output.extend_from_slice(&hmac(secret, &[&a, seed]));
        a = hmac(secret, &[&a]);
    }
    output.truncate(length);
    output
}

/// Sign with RSA according to the asymmetric signature algorithm
pub fn rsa_sign(key: &PrivateKey, algorithm: SecurityAlgorithm, data: &[u8]) -> Result<Vec<u8>> {
    let signed = match algorithm {
        SecurityAlgorithm::None => return Ok(Vec::new()),
        SecurityAlgorithm::RsaSha1 => key
            .rsa()
            .sign(Pkcs1v15Sign::new::<Sha1>(), &Sha1::digest(data)),
        SecurityAlgorithm::RsaSha256 => key
            .rsa()
            .sign(Pkcs1v15Sign::new::<Sha256>(), &Sha256::digest(data)),
        SecurityAlgorithm::RsaPssSha256 => {
            key.rsa()
                .sign_with_rng(&mut OsRng, Pss::new::<Sha256>(), &Sha256::digest(data))
        }
        other => return Err(unsupported(other, "asymmetric signing")),
    };
    signed.map_err(|e| Error::internal(format!("RSA signing failed: {}", e)))
}

/// Verify an RSA signature according to the asymmetric signature algorithm
pub fn rsa_verify(
    key: &PublicKey,
    algorithm: SecurityAlgorithm,
    data: &[u8],
    signature: &[u8],
) -> Result<bool> {
    let verified = match algorithm {
        SecurityAlgorithm::None => return Ok(true),
        SecurityAlgorithm::RsaSha1 => {
            key.rsa()
                .verify(Pkcs1v15Sign::new::<Sha1>(), &Sha1::digest(data), signature)
        }
        SecurityAlgorithm::RsaSha256 => key.rsa().verify(
            Pkcs1v15Sign::new::<Sha256>(),
            &Sha256::digest(data),
            signature,
        ),
        SecurityAlgorithm::RsaPssSha256 => {
            key.rsa()
                .verify(Pss::new::<Sha256>(), &Sha256::digest(data), signature)
        }
        other => return Err(unsupported(other, "asymmetric verification")),
    };
    Ok(verified.is_ok())
}

fn rsa_encrypt_block(
    key: &PublicKey,
    algorithm: SecurityAlgorithm,
    block: &[u8],
) -> Result<Vec<u8>> {
    let encrypted = match algorithm {
        SecurityAlgorithm::Rsa15 => key.rsa().encrypt(&mut OsRng, Pkcs1v15Encrypt, block),
        SecurityAlgorithm::RsaOaep => key.rsa().encrypt(&mut OsRng, Oaep::new::<Sha1>(), block),
        SecurityAlgorithm::RsaOaepSha256 => {
            key.rsa().encrypt(&mut OsRng, Oaep::new::<Sha256>(), block)
        }
        other => return Err(unsupported(other, "asymmetric encryption")),
    };
    encrypted.map_err(|e| Error::internal(format!("RSA encryption failed: {}", e)))
}

fn rsa_decrypt_block(
    key: &PrivateKey,
    algorithm: SecurityAlgorithm,
    block: &[u8],
) -> Result<Vec<u8>> {
    let decrypted = match algorithm {
        SecurityAlgorithm::Rsa15 => key.rsa().decrypt(Pkcs1v15Encrypt, block),
        SecurityAlgorithm::RsaOaep => key.rsa().decrypt(Oaep::new::<Sha1>(), block),
        SecurityAlgorithm::RsaOaepSha256 => key.rsa().decrypt(Oaep::new::<Sha256>(), block),
        other => return Err(unsupported(other, "asymmetric decryption")),
    };
    // A padding failure means the sender used another key or the data was tampered with
    decrypted.map_err(|_| Error::security_checks_failed("RSA decryption failed"))
}

/// Encrypt block by block; the input must be a multiple of the plain text block size
pub fn rsa_encrypt(
    key: &PublicKey,
    algorithm: SecurityAlgorithm,
    data: &[u8],
    output: &mut [u8],
    offset: usize,
) -> Result<usize> {
    let plain_block = algorithm.plain_text_block_size(key.size());
    if !algorithm.is_asymmetric_encryption() {
        return Err(unsupported(algorithm, "asymmetric encryption"));
    }
    check_block_aligned(data.len(), plain_block, "asymmetric plain text")?;

    let cipher_len = data.len() / plain_block * key.size();
    let window = output_window(output, offset, cipher_len)?;
    for (block, out) in data
        .chunks(plain_block)
        .zip(window.chunks_mut(key.size()))
    {
        out.copy_from_slice(&rsa_encrypt_block(key, algorithm, block)?);
    }
    Ok(cipher_len)
}

/// Decrypt block by block; the input must be a multiple of the key size
pub fn rsa_decrypt(
    key: &PrivateKey,
    algorithm: SecurityAlgorithm,
    data: &[u8],
    output: &mut [u8],
    offset: usize,
) -> Result<usize> {
    if !algorithm.is_asymmetric_encryption() {
        return Err(unsupported(algorithm, "asymmetric decryption"));
    }
    check_block_aligned(data.len(), key.size(), "asymmetric cipher text")?;

    let mut written = 0;
    for block in data.chunks(key.size()) {
        let plain = rsa_decrypt_block(key, algorithm, block)?;
        let start = offset
            .checked_add(written)
            .ok_or_else(|| Error::internal(format!("output offset {} overflows", offset)))?;
        output_window(output, start, plain.len())?.copy_from_slice(&plain);
        written += plain.len();
    }
    Ok(written)
}
