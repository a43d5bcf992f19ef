//! Security algorithm identifiers
//!
//! Each variant names one concrete primitive referenced by a security policy.
//! The URIs are the XML-DSig / XML-Enc identifiers used by OPC UA Part 7.

/// A cryptographic algorithm referenced by a [`SecurityPolicy`](super::SecurityPolicy)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecurityAlgorithm {
    /// No algorithm; signing yields nothing, verification always passes
    None,
    /// HMAC with SHA-1 (symmetric signature)
    HmacSha1,
    /// HMAC with SHA-256 (symmetric signature)
    HmacSha256,
    /// AES-128 in CBC mode (symmetric encryption)
    Aes128Cbc,
    /// AES-256 in CBC mode (symmetric encryption)
    Aes256Cbc,
    /// RSA PKCS#1 v1.5 signature over SHA-1
    RsaSha1,
    /// RSA PKCS#1 v1.5 signature over SHA-256
    RsaSha256,
    /// RSA-PSS signature over SHA-256
    RsaPssSha256,
    /// RSA PKCS#1 v1.5 encryption
    Rsa15,
    /// RSA-OAEP encryption with SHA-1
    RsaOaep,
    /// RSA-OAEP encryption with SHA-256
    RsaOaepSha256,
    /// TLS P_SHA1 pseudo random function
    PSha1,
    /// TLS P_SHA256 pseudo random function
    PSha256,
}

impl SecurityAlgorithm {
    /// Algorithm URI, empty for [`SecurityAlgorithm::None`]
    pub fn uri(self) -> &'static str {
        match self {
            Self::None => "",
            Self::HmacSha1 => "http://www.w3.org/2000/09/xmldsig#hmac-sha1",
            Self::HmacSha256 => "http://www.w3.org/2000/09/xmldsig#hmac-sha256",
            Self::Aes128Cbc => "http://www.w3.org/2001/04/xmlenc#aes128-cbc",
            Self::Aes256Cbc => "http://www.w3.org/2001/04/xmlenc#aes256-cbc",
            Self::RsaSha1 => "http://www.w3.org/2000/09/xmldsig#rsa-sha1",
            Self::RsaSha256 => "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256",
            Self::RsaPssSha256 => "http://opcfoundation.org/UA/security/rsa-pss-sha2-256",
            Self::Rsa15 => "http://www.w3.org/2001/04/xmlenc#rsa-1_5",
            Self::RsaOaep => "http://www.w3.org/2001/04/xmlenc#rsa-oaep",
            Self::RsaOaepSha256 => "http://opcfoundation.org/UA/security/rsa-oaep-sha2-256",
            Self::PSha1 => "http://www.w3.org/2001/04/xmlenc#p-sha1",
            Self::PSha256 => "http://opcfoundation.org/UA/security/p-sha256",
        }
    }

    /// Look an algorithm up by URI
    pub fn from_uri(uri: &str) -> Option<Self> {
        [
            Self::None,
            Self::HmacSha1,
            Self::HmacSha256,
            Self::Aes128Cbc,
            Self::Aes256Cbc,
            Self::RsaSha1,
            Self::RsaSha256,
            Self::RsaPssSha256,
            Self::Rsa15,
            Self::RsaOaep,
            Self::RsaOaepSha256,
            Self::PSha1,
            Self::PSha256,
        ]
        .into_iter()
        .find(|a| a.uri() == uri)
    }

    /// True for the "no algorithm" marker
    pub fn is_none(self) -> bool {
        self == Self::None
    }

    /// Output length in bytes of an HMAC algorithm, 0 otherwise
    pub fn mac_size(self) -> usize {
        match self {
            Self::HmacSha1 => 20,
            Self::HmacSha256 => 32,
            _ => 0,
        }
    }

    /// Key length in bytes of a symmetric cipher, 0 otherwise
    pub fn cipher_key_size(self) -> usize {
        match self {
            Self::Aes128Cbc => 16,
            Self::Aes256Cbc => 32,
            _ => 0,
        }
    }

    /// Block size in bytes of a symmetric cipher, 0 otherwise
    pub fn cipher_block_size(self) -> usize {
        match self {
            Self::Aes128Cbc | Self::Aes256Cbc => 16,
            _ => 0,
        }
    }

    /// Bytes of padding overhead per block for an asymmetric encryption scheme
    pub fn asymmetric_padding_overhead(self) -> usize {
        match self {
            Self::Rsa15 => 11,
            // 2 * hash length + 2
            Self::RsaOaep => 42,
            Self::RsaOaepSha256 => 66,
            _ => 0,
        }
    }

    /// Plain text block size for an asymmetric encryption scheme under a key of `key_size` bytes
    pub fn plain_text_block_size(self, key_size: usize) -> usize {
        key_size.saturating_sub(self.asymmetric_padding_overhead())
    }

    /// True if this is one of the asymmetric encryption schemes
    pub fn is_asymmetric_encryption(self) -> bool {
        matches!(self, Self::Rsa15 | Self::RsaOaep | Self::RsaOaepSha256)
    }

    /// True if this is one of the asymmetric signature schemes
    pub fn is_asymmetric_signature(self) -> bool {
        matches!(self, Self::RsaSha1 | Self::RsaSha256 | Self::RsaPssSha256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uri_lookup() {
        assert_eq!(
            SecurityAlgorithm::from_uri("http://www.w3.org/2000/09/xmldsig#hmac-sha1"),
            Some(SecurityAlgorithm::HmacSha1)
        );
        assert_eq!(SecurityAlgorithm::from_uri("urn:unknown"), None);
    }

    #[test]
    fn test_block_sizes() {
        assert_eq!(SecurityAlgorithm::Aes128Cbc.cipher_block_size(), 16);
        assert_eq!(SecurityAlgorithm::Aes256Cbc.cipher_key_size(), 32);
        assert_eq!(SecurityAlgorithm::Rsa15.plain_text_block_size(128), 117);
        assert_eq!(SecurityAlgorithm::RsaOaep.plain_text_block_size(256), 214);
        assert_eq!(SecurityAlgorithm::HmacSha256.mac_size(), 32);
    }
}
