//! Shared fixtures for unit tests

use std::sync::OnceLock;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rsa::pkcs1::EncodeRsaPublicKey;
use rsa::RsaPrivateKey;

use crate::crypto::{Certificate, KeyPair, PrivateKey, PublicKey};

fn key_pair(seed: u64) -> KeyPair {
    let mut rng = StdRng::seed_from_u64(seed);
    let private = RsaPrivateKey::new(&mut rng, 1024).unwrap();
    let public = private.to_public_key();
    let der = public.to_pkcs1_der().unwrap().as_bytes().to_vec();
    KeyPair::new(
        Certificate::new(der, PublicKey::new(public)),
        PrivateKey::new(private),
    )
    .unwrap()
}

/// Deterministic 1024-bit client identity
pub fn client_key_pair() -> KeyPair {
    static PAIR: OnceLock<KeyPair> = OnceLock::new();
    PAIR.get_or_init(|| key_pair(0x5eed_0001)).clone()
}

/// Deterministic 1024-bit server identity
pub fn server_key_pair() -> KeyPair {
    static PAIR: OnceLock<KeyPair> = OnceLock::new();
    PAIR.get_or_init(|| key_pair(0x5eed_0002)).clone()
}
