//! Chunk protection
//!
//! Builds and opens single-chunk messages:
//!
//! ```text
//! +----------------+-----------------+-----------------------------------------------+
//! | MessageHeader  | security header | SequenceHeader | body | padding | signature  |
//! +----------------+-----------------+-----------------------------------------------+
//!                                    |<-------------- encrypted -------------------->|
//! |<------------------------- signed ---------------------------------->|
//! ```
//!
//! The message size in the header is final before signing. Padding is only
//! present when encrypting: `n + 1` bytes of value `n`, followed by the high
//! byte of `n` when the encrypting key is larger than 256 bytes.
//!
//! `OPN` chunks use the asymmetric algorithms of the policy and are always
//! signed and encrypted unless the policy is None. `MSG` and `CLO` chunks use
//! a token and follow the negotiated security mode.

use bytes::{BufMut, Bytes, BytesMut};

use super::tokens::TokenSet;
use crate::crypto::{Certificate, CryptoProvider, KeyPair, PublicKey, SecurityPolicy, SecurityToken};
use crate::message::header::{
    AsymmetricSecurityHeader, MessageHeader, MessageType, SequenceHeader, SymmetricSecurityHeader,
    HEADER_SIZE, SEQUENCE_HEADER_SIZE, SYMMETRIC_HEADER_SIZE,
};
use crate::security::SecurityMode;
use crate::status::{Error, Result, StatusCode};
use std::sync::Arc;

/// Asymmetric keys above this size (in bytes) need a second padding size byte
const EXTRA_PADDING_THRESHOLD: usize = 256;

/// Upper bound on the size of outgoing chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeLimit {
    /// Largest chunk in bytes
    pub max: usize,

    /// Status reported when the limit is exceeded
    pub exceeded: StatusCode,
}

impl SizeLimit {
    /// Limit for requests, `BadRequestTooLarge`
    pub fn request(max: usize) -> Self {
        Self {
            max,
            exceeded: StatusCode::BadRequestTooLarge,
        }
    }

    /// Limit for responses, `BadResponseTooLarge`
    pub fn response(max: usize) -> Self {
        Self {
            max,
            exceeded: StatusCode::BadResponseTooLarge,
        }
    }

    fn check(&self, size: usize) -> Result<()> {
        if size > self.max {
            return Err(Error::new(
                self.exceeded,
                format!("chunk of {} bytes exceeds the limit of {}", size, self.max),
            ));
        }
        Ok(())
    }
}

/// Number of padding bytes (`n`) so that `unpadded` plus the padding region
/// fills whole blocks
fn padding_size(unpadded: usize, block_size: usize, extra: bool) -> usize {
    let size_bytes = if extra { 2 } else { 1 };
    let remainder = (unpadded + size_bytes) % block_size;
    if remainder == 0 {
        0
    } else {
        block_size - remainder
    }
}

/// Length of the padding region holding `n` padding bytes
fn padding_region(n: usize, extra: bool) -> usize {
    n + 1 + usize::from(extra)
}

fn write_padding(buf: &mut BytesMut, n: usize, extra: bool) {
    buf.put_bytes((n & 0xff) as u8, n + 1);
    if extra {
        buf.put_u8((n >> 8) as u8);
    }
}

/// Validate the padding at the end of `plain` and return the length without it
fn strip_padding(plain: &[u8], extra: bool) -> Result<usize> {
    let len = plain.len();
    let n = if extra {
        if len < 2 {
            return Err(Error::security_checks_failed("chunk too short for padding"));
        }
        (usize::from(plain[len - 1]) << 8) | usize::from(plain[len - 2])
    } else {
        match plain.last() {
            Some(&n) => usize::from(n),
            None => return Err(Error::security_checks_failed("chunk too short for padding")),
        }
    };

    let region = padding_region(n, extra);
    if region + SEQUENCE_HEADER_SIZE > len {
        return Err(Error::security_checks_failed(format!(
            "padding of {} bytes exceeds the chunk",
            region
        )));
    }
    let fill_end = len - usize::from(extra);
    let low = (n & 0xff) as u8;
    if plain[len - region..fill_end].iter().any(|&b| b != low) {
        return Err(Error::security_checks_failed("malformed padding"));
    }
    Ok(len - region)
}

/// Check that the header's size matches the chunk
fn check_message_size(header: &MessageHeader, chunk: &Bytes) -> Result<()> {
    if header.message_size as usize != chunk.len() {
        return Err(Error::decoding(format!(
            "header declares {} bytes, chunk has {}",
            header.message_size,
            chunk.len()
        )));
    }
    Ok(())
}

/// Build a `MSG` or `CLO` chunk protected with `token`
#[allow(clippy::too_many_arguments)]
pub fn encode_symmetric(
    provider: &dyn CryptoProvider,
    mode: &SecurityMode,
    token: &SecurityToken,
    message_type: MessageType,
    sequence: SequenceHeader,
    body: &[u8],
    limit: SizeLimit,
) -> Result<Bytes> {
    let signature_size = if mode.signing_required() {
        token.signature_algorithm().mac_size()
    } else {
        0
    };
    let block_size = if mode.encryption_required() {
        token.encryption_algorithm().cipher_block_size()
    } else {
        0
    };

    let security_start = HEADER_SIZE + SYMMETRIC_HEADER_SIZE;
    let plain_len = SEQUENCE_HEADER_SIZE + body.len();
    let padding = if block_size > 0 {
        Some(padding_size(plain_len + signature_size, block_size, false))
    } else {
        None
    };
    let message_size = security_start
        + plain_len
        + padding.map_or(0, |n| padding_region(n, false))
        + signature_size;
    limit.check(message_size)?;

    let mut buf = BytesMut::with_capacity(message_size);
    MessageHeader::new(message_type, message_size as u32, token.channel_id()).encode(&mut buf);
    SymmetricSecurityHeader {
        token_id: token.token_id(),
    }
    .encode(&mut buf);
    sequence.encode(&mut buf);
    buf.put_slice(body);
    if let Some(n) = padding {
        write_padding(&mut buf, n, false);
    }

    if signature_size > 0 {
        let mut signature = vec![0u8; signature_size];
        provider.sign_symmetric(token, &buf, &mut signature)?;
        buf.put_slice(&signature);
    }

    if block_size > 0 {
        let plain = buf[security_start..].to_vec();
        provider.encrypt_symmetric(token, &plain, &mut buf, security_start)?;
    }

    debug_assert_eq!(buf.len(), message_size);
    Ok(buf.freeze())
}

/// An opened `MSG` or `CLO` chunk
#[derive(Debug)]
pub struct SymmetricChunk {
    /// Message header
    pub header: MessageHeader,

    /// Token the chunk was protected with
    pub token: Arc<SecurityToken>,

    /// Sequence header
    pub sequence: SequenceHeader,

    /// Message body
    pub body: Bytes,
}

/// Open a `MSG` or `CLO` chunk
///
/// The token is looked up by the id in the security header; unknown and
/// expired tokens fail with `BadSecureChannelTokenUnknown`. Decryption,
/// signature and padding failures all report `BadSecurityChecksFailed`.
pub fn decode_symmetric(
    provider: &dyn CryptoProvider,
    mode: &SecurityMode,
    tokens: &TokenSet,
    chunk: Bytes,
) -> Result<SymmetricChunk> {
    let mut rest = chunk.clone();
    let header = MessageHeader::decode(&mut rest)?;
    check_message_size(&header, &chunk)?;
    let security = SymmetricSecurityHeader::decode(&mut rest)?;
    let token = tokens.find(security.token_id)?;
    if token.channel_id() != header.channel_id {
        return Err(Error::new(
            StatusCode::BadSecureChannelIdInvalid,
            format!(
                "chunk for channel {} on channel {}",
                header.channel_id,
                token.channel_id()
            ),
        ));
    }

    let security_start = HEADER_SIZE + SYMMETRIC_HEADER_SIZE;
    let mut data = chunk.to_vec();

    if mode.encryption_required() {
        let block_size = token.encryption_algorithm().cipher_block_size();
        let encrypted = data.len() - security_start;
        if block_size == 0 || encrypted == 0 || encrypted % block_size != 0 {
            return Err(Error::security_checks_failed(format!(
                "{} encrypted bytes are not block aligned",
                encrypted
            )));
        }
        let cipher = data[security_start..].to_vec();
        provider.decrypt_symmetric(&token, &cipher, &mut data, security_start)?;
    }

    let mut end = data.len();
    if mode.signing_required() {
        let signature_size = token.signature_algorithm().mac_size();
        if end < security_start + SEQUENCE_HEADER_SIZE + signature_size {
            return Err(Error::security_checks_failed("chunk too short for signature"));
        }
        end -= signature_size;
        provider.verify_symmetric(&token, &data[..end], &data[end..])?;
    }

    if mode.encryption_required() {
        end = security_start + strip_padding(&data[security_start..end], false)?;
    }

    let mut plain = Bytes::from(data).slice(security_start..end);
    let sequence = SequenceHeader::decode(&mut plain)?;
    Ok(SymmetricChunk {
        header,
        token,
        sequence,
        body: plain,
    })
}

/// Build an `OPN` chunk
///
/// Signed with `local`'s private key and encrypted with `remote`'s public
/// key unless the policy is None.
#[allow(clippy::too_many_arguments)]
pub fn encode_asymmetric(
    provider: &dyn CryptoProvider,
    policy: &SecurityPolicy,
    local: Option<&KeyPair>,
    remote: Option<&Certificate>,
    channel_id: u32,
    sequence: SequenceHeader,
    body: &[u8],
    limit: SizeLimit,
) -> Result<Bytes> {
    let plain_len = SEQUENCE_HEADER_SIZE + body.len();

    if policy.is_none() {
        let security = AsymmetricSecurityHeader {
            policy_uri: policy.uri.to_string(),
            sender_certificate: None,
            receiver_thumbprint: None,
        };
        let message_size = HEADER_SIZE + security.encoded_len() + plain_len;
        limit.check(message_size)?;
        let mut buf = BytesMut::with_capacity(message_size);
        MessageHeader::new(MessageType::Open, message_size as u32, channel_id).encode(&mut buf);
        security.encode(&mut buf);
        sequence.encode(&mut buf);
        buf.put_slice(body);
        return Ok(buf.freeze());
    }

    let local = local.ok_or_else(|| Error::internal("no local key pair to sign with"))?;
    let remote = remote.ok_or_else(|| Error::internal("no remote certificate to encrypt for"))?;

    let security = AsymmetricSecurityHeader {
        policy_uri: policy.uri.to_string(),
        sender_certificate: Some(local.certificate.as_bytes().clone()),
        receiver_thumbprint: Some(Bytes::copy_from_slice(&remote.thumbprint())),
    };
    let security_start = HEADER_SIZE + security.encoded_len();

    let signature_size = local.private_key.size();
    let key_size = remote.public_key().size();
    let plain_block = policy.asymmetric_encryption.plain_text_block_size(key_size);
    if plain_block == 0 {
        return Err(Error::internal(format!(
            "key of {} bytes too small for {:?}",
            key_size, policy.asymmetric_encryption
        )));
    }
    let extra = key_size > EXTRA_PADDING_THRESHOLD;
    let n = padding_size(plain_len + signature_size, plain_block, extra);
    let encrypted_plain = plain_len + padding_region(n, extra) + signature_size;
    let cipher_len = encrypted_plain / plain_block * key_size;
    let message_size = security_start + cipher_len;
    limit.check(message_size)?;

    let mut buf = BytesMut::with_capacity(message_size.max(security_start + encrypted_plain));
    MessageHeader::new(MessageType::Open, message_size as u32, channel_id).encode(&mut buf);
    security.encode(&mut buf);
    sequence.encode(&mut buf);
    buf.put_slice(body);
    write_padding(&mut buf, n, extra);

    let signature =
        provider.sign_asymmetric(&local.private_key, policy.asymmetric_signature, &buf)?;
    if signature.len() != signature_size {
        return Err(Error::internal(format!(
            "signature of {} bytes, expected {}",
            signature.len(),
            signature_size
        )));
    }
    buf.put_slice(&signature);

    let plain = buf[security_start..].to_vec();
    buf.resize(message_size, 0);
    let written = provider.encrypt_asymmetric(
        remote.public_key(),
        policy.asymmetric_encryption,
        &plain,
        &mut buf,
        security_start,
    )?;
    if written != cipher_len {
        return Err(Error::internal(format!(
            "encrypted {} bytes, expected {}",
            written, cipher_len
        )));
    }
    Ok(buf.freeze())
}

/// The headers of an `OPN` chunk, read before its keys are known
#[derive(Debug, Clone)]
pub struct AsymmetricHeaders {
    /// Message header
    pub header: MessageHeader,

    /// Asymmetric security header
    pub security: AsymmetricSecurityHeader,

    /// Offset of the sequence header
    pub security_start: usize,
}

impl AsymmetricHeaders {
    /// Read the clear text headers of an `OPN` chunk
    pub fn decode(chunk: &Bytes) -> Result<Self> {
        let mut rest = chunk.clone();
        let header = MessageHeader::decode(&mut rest)?;
        if header.message_type != MessageType::Open {
            return Err(Error::new(
                StatusCode::BadTcpMessageTypeInvalid,
                format!("expected an open chunk, got {:?}", header.message_type),
            ));
        }
        check_message_size(&header, chunk)?;
        let security = AsymmetricSecurityHeader::decode(&mut rest)?;
        Ok(Self {
            header,
            security,
            security_start: chunk.len() - rest.len(),
        })
    }
}

/// Open an `OPN` chunk whose headers were read with [`AsymmetricHeaders::decode`]
///
/// Decrypts with `local`'s private key and verifies with `sender`, the public
/// key from the sender certificate.
pub fn decode_asymmetric(
    provider: &dyn CryptoProvider,
    policy: &SecurityPolicy,
    local: Option<&KeyPair>,
    sender: Option<&PublicKey>,
    headers: &AsymmetricHeaders,
    chunk: &Bytes,
) -> Result<(SequenceHeader, Bytes)> {
    let start = headers.security_start;

    if policy.is_none() {
        let mut plain = chunk.slice(start..);
        let sequence = SequenceHeader::decode(&mut plain)?;
        return Ok((sequence, plain));
    }

    let local = local.ok_or_else(|| Error::internal("no local key pair to decrypt with"))?;
    let sender = sender.ok_or_else(|| {
        Error::new(StatusCode::BadCertificateInvalid, "sender certificate missing")
    })?;

    let key_size = local.private_key.size();
    let cipher = &chunk[start..];
    if cipher.is_empty() || cipher.len() % key_size != 0 {
        return Err(Error::security_checks_failed(format!(
            "{} encrypted bytes are not a multiple of the key size {}",
            cipher.len(),
            key_size
        )));
    }
    let mut plain = vec![0u8; cipher.len()];
    let written = provider.decrypt_asymmetric(
        &local.private_key,
        policy.asymmetric_encryption,
        cipher,
        &mut plain,
        0,
    )?;
    plain.truncate(written);

    let signature_size = sender.size();
    if plain.len() < SEQUENCE_HEADER_SIZE + signature_size {
        return Err(Error::security_checks_failed("chunk too short for signature"));
    }
    let signed_end = plain.len() - signature_size;
    let mut signed = Vec::with_capacity(start + signed_end);
    signed.extend_from_slice(&chunk[..start]);
    signed.extend_from_slice(&plain[..signed_end]);
    let valid = provider.verify_asymmetric(
        sender,
        policy.asymmetric_signature,
        &signed,
        &plain[signed_end..],
    )?;
    if !valid {
        return Err(Error::security_checks_failed("invalid asymmetric signature"));
    }

    let extra = key_size > EXTRA_PADDING_THRESHOLD;
    let end = strip_padding(&plain[..signed_end], extra)?;
    let mut body = Bytes::from(plain).slice(..end);
    let sequence = SequenceHeader::decode(&mut body)?;
    Ok((sequence, body))
}

/// Build an unprotected `ERR` chunk
pub fn encode_error(channel_id: u32, payload: &[u8]) -> Bytes {
    let message_size = HEADER_SIZE + payload.len();
    let mut buf = BytesMut::with_capacity(message_size);
    MessageHeader::new(MessageType::Error, message_size as u32, channel_id).encode(&mut buf);
    buf.put_slice(payload);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{RustCryptoProvider, TokenParams};
    use crate::security::MessageSecurityMode;
    use crate::test_util;
    use chrono::Utc;
    use std::time::Duration;

    const MAX: usize = 64 * 1024;

    fn params(token_id: u32) -> TokenParams {
        TokenParams {
            channel_id: 9,
            token_id,
            created_at: Utc::now(),
            lifetime: Duration::from_secs(600),
        }
    }

    /// Mirrored client and server tokens for the policy
    fn tokens(policy: &SecurityPolicy, token_id: u32) -> (SecurityToken, SecurityToken) {
        let provider = RustCryptoProvider::new();
        let client_nonce = vec![0x31u8; policy.nonce_length.max(1)];
        let server_nonce = vec![0x42u8; policy.nonce_length.max(1)];
        let client =
            SecurityToken::derive(&provider, policy, params(token_id), &client_nonce, &server_nonce)
                .unwrap();
        let server =
            SecurityToken::derive(&provider, policy, params(token_id), &server_nonce, &client_nonce)
                .unwrap();
        (client, server)
    }

    fn sequence(n: u32) -> SequenceHeader {
        SequenceHeader {
            sequence_number: n,
            request_id: 100 + n,
        }
    }

    #[test]
    fn test_padding_fills_blocks() {
        for unpadded in 0..64 {
            let n = padding_size(unpadded, 16, false);
            assert_eq!((unpadded + padding_region(n, false)) % 16, 0);
            let n = padding_size(unpadded, 117, true);
            assert_eq!((unpadded + padding_region(n, true)) % 117, 0);
        }
    }

    #[test]
    fn test_strip_padding() {
        let mut buf = BytesMut::new();
        buf.put_slice(&[0u8; 10]);
        write_padding(&mut buf, 5, false);
        assert_eq!(strip_padding(&buf, false).unwrap(), 10);

        let mut extra = BytesMut::new();
        extra.put_slice(&[0u8; 10]);
        write_padding(&mut extra, 300, true);
        assert_eq!(extra.len(), 10 + 302);
        let mut long = BytesMut::new();
        long.put_slice(&[0u8; 8]);
        long.put_slice(&extra);
        assert_eq!(strip_padding(&long, true).unwrap(), 18);

        buf[12] = 1;
        assert_eq!(
            strip_padding(&buf, false).unwrap_err().status(),
            StatusCode::BadSecurityChecksFailed
        );
    }

    #[test]
    fn test_symmetric_all_modes() {
        let provider = RustCryptoProvider::new();
        let policy = SecurityPolicy::basic256_sha256();
        let (client, server) = tokens(&policy, 1);
        let server_tokens = TokenSet::new(server);

        for message_mode in [MessageSecurityMode::Sign, MessageSecurityMode::SignAndEncrypt] {
            let mode = SecurityMode::new(policy.clone(), message_mode).unwrap();
            for body_len in [0usize, 1, 7, 15, 16, 100] {
                let body = vec![0x5au8; body_len];
                let chunk = encode_symmetric(
                    &provider,
                    &mode,
                    &client,
                    MessageType::Message,
                    sequence(3),
                    &body,
                    SizeLimit::request(MAX),
                )
                .unwrap();
                if message_mode.encrypts() {
                    assert_eq!((chunk.len() - 16) % 16, 0);
                }

                let opened = decode_symmetric(&provider, &mode, &server_tokens, chunk).unwrap();
                assert_eq!(opened.header.message_type, MessageType::Message);
                assert_eq!(opened.sequence, sequence(3));
                assert_eq!(opened.body, body);
                assert_eq!(opened.token.token_id(), 1);
            }
        }
    }

    #[test]
    fn test_symmetric_none() {
        let provider = RustCryptoProvider::new();
        let policy = SecurityPolicy::none();
        let (client, server) = tokens(&policy, 4);
        let mode = SecurityMode::none();
        let chunk = encode_symmetric(
            &provider,
            &mode,
            &client,
            MessageType::Close,
            sequence(1),
            b"bye",
            SizeLimit::request(MAX),
        )
        .unwrap();
        assert_eq!(chunk.len(), 16 + 8 + 3);
        let opened = decode_symmetric(&provider, &mode, &TokenSet::new(server), chunk).unwrap();
        assert_eq!(opened.header.message_type, MessageType::Close);
        assert_eq!(&opened.body[..], b"bye");
    }

    #[test]
    fn test_symmetric_tamper_detected() {
        let provider = RustCryptoProvider::new();
        let policy = SecurityPolicy::basic128_rsa15();
        let (client, server) = tokens(&policy, 1);
        let server_tokens = TokenSet::new(server);

        for message_mode in [MessageSecurityMode::Sign, MessageSecurityMode::SignAndEncrypt] {
            let mode = SecurityMode::new(policy.clone(), message_mode).unwrap();
            let chunk = encode_symmetric(
                &provider,
                &mode,
                &client,
                MessageType::Message,
                sequence(1),
                &[1, 2, 3, 4, 5, 6, 7, 8],
                SizeLimit::request(MAX),
            )
            .unwrap();
            let mut tampered = chunk.to_vec();
            tampered[20] ^= 0x01;
            let err = decode_symmetric(&provider, &mode, &server_tokens, tampered.into())
                .unwrap_err();
            assert_eq!(err.status(), StatusCode::BadSecurityChecksFailed);
        }
    }

    #[test]
    fn test_symmetric_unknown_token_and_limits() {
        let provider = RustCryptoProvider::new();
        let policy = SecurityPolicy::basic128_rsa15();
        let (client, _) = tokens(&policy, 1);
        let (_, other_server) = tokens(&policy, 2);
        let mode = SecurityMode::new(policy, MessageSecurityMode::Sign).unwrap();

        let chunk = encode_symmetric(
            &provider,
            &mode,
            &client,
            MessageType::Message,
            sequence(1),
            b"x",
            SizeLimit::request(MAX),
        )
        .unwrap();
        let err = decode_symmetric(&provider, &mode, &TokenSet::new(other_server), chunk)
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BadSecureChannelTokenUnknown);

        let err = encode_symmetric(
            &provider,
            &mode,
            &client,
            MessageType::Message,
            sequence(1),
            &[0u8; 200],
            SizeLimit::response(100),
        )
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::BadResponseTooLarge);
    }

    #[test]
    fn test_asymmetric_round_trip() {
        let provider = RustCryptoProvider::new();
        let client = test_util::client_key_pair();
        let server = test_util::server_key_pair();

        for policy in [SecurityPolicy::basic128_rsa15(), SecurityPolicy::basic256()] {
            for body_len in [0usize, 10, 117, 300] {
                let body = vec![0x77u8; body_len];
                let chunk = encode_asymmetric(
                    &provider,
                    &policy,
                    Some(&client),
                    Some(&server.certificate),
                    0,
                    sequence(1),
                    &body,
                    SizeLimit::request(MAX),
                )
                .unwrap();

                let headers = AsymmetricHeaders::decode(&chunk).unwrap();
                assert_eq!(headers.security.policy_uri, policy.uri);
                assert_eq!(
                    headers.security.sender_certificate.as_ref(),
                    Some(client.certificate.as_bytes())
                );
                assert_eq!(
                    headers.security.receiver_thumbprint.as_deref(),
                    Some(&server.certificate.thumbprint()[..])
                );
                assert_eq!((chunk.len() - headers.security_start) % 128, 0);

                let (seq, opened) = decode_asymmetric(
                    &provider,
                    &policy,
                    Some(&server),
                    Some(client.certificate.public_key()),
                    &headers,
                    &chunk,
                )
                .unwrap();
                assert_eq!(seq, sequence(1));
                assert_eq!(opened, body);
            }
        }
    }

    #[test]
    fn test_asymmetric_wrong_sender_rejected() {
        let provider = RustCryptoProvider::new();
        let policy = SecurityPolicy::basic128_rsa15();
        let client = test_util::client_key_pair();
        let server = test_util::server_key_pair();

        let chunk = encode_asymmetric(
            &provider,
            &policy,
            Some(&client),
            Some(&server.certificate),
            0,
            sequence(1),
            b"open",
            SizeLimit::request(MAX),
        )
        .unwrap();
        let headers = AsymmetricHeaders::decode(&chunk).unwrap();
        let err = decode_asymmetric(
            &provider,
            &policy,
            Some(&server),
            Some(server.certificate.public_key()),
            &headers,
            &chunk,
        )
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::BadSecurityChecksFailed);

        let err = decode_asymmetric(
            &provider,
            &policy,
            Some(&client),
            Some(client.certificate.public_key()),
            &headers,
            &chunk,
        )
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::BadSecurityChecksFailed);
    }

    #[test]
    fn test_asymmetric_none_is_plain() {
        let provider = RustCryptoProvider::new();
        let policy = SecurityPolicy::none();
        let chunk = encode_asymmetric(
            &provider,
            &policy,
            None,
            None,
            0,
            sequence(1),
            b"hello",
            SizeLimit::request(MAX),
        )
        .unwrap();
        assert!(chunk.ends_with(b"hello"));
        let headers = AsymmetricHeaders::decode(&chunk).unwrap();
        assert!(headers.security.sender_certificate.is_none());
        let (_, body) =
            decode_asymmetric(&provider, &policy, None, None, &headers, &chunk).unwrap();
        assert_eq!(&body[..], b"hello");
    }

    #[test]
    fn test_size_mismatch_rejected() {
        let provider = RustCryptoProvider::new();
        let chunk = encode_asymmetric(
            &provider,
            &SecurityPolicy::none(),
            None,
            None,
            0,
            sequence(1),
            b"hello",
            SizeLimit::request(MAX),
        )
        .unwrap();
        let mut longer = chunk.to_vec();
        longer.push(0);
        let err = AsymmetricHeaders::decode(&Bytes::from(longer)).unwrap_err();
        assert_eq!(err.status(), StatusCode::BadDecodingError);

        let err = AsymmetricHeaders::decode(&encode_error(3, &[0u8; 8])).unwrap_err();
        assert_eq!(err.status(), StatusCode::BadTcpMessageTypeInvalid);
    }
}
