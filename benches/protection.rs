//! Symmetric protection benchmarks
//!
//! Measures building and opening `MSG` chunks per policy, mode and body size,
//! with both built-in providers.

use std::time::Duration;

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use uasc_rs::channel::protection::{decode_symmetric, encode_symmetric, SizeLimit};
use uasc_rs::channel::TokenSet;
use uasc_rs::crypto::{
    ChannelKeys, PortableProvider, ProviderRegistry, RustCryptoProvider, SecurityPolicy,
    SecurityToken, TokenParams,
};
use uasc_rs::message::{MessageType, SequenceHeader};
use uasc_rs::security::{MessageSecurityMode, SecurityMode};

const SIZES: [usize; 3] = [64, 1024, 16 * 1024];

fn tokens(policy: &SecurityPolicy) -> TokenSet {
    let keys = ChannelKeys::new(
        vec![7; policy.derived_signature_key_size],
        vec![9; policy.symmetric_key_size],
        vec![3; policy.encryption_block_size],
    );
    let params = TokenParams {
        channel_id: 1,
        token_id: 1,
        created_at: Utc::now(),
        lifetime: Duration::from_secs(3600),
    };
    TokenSet::new(SecurityToken::from_keys(policy, params, keys.clone(), keys))
}

fn bench_protect(c: &mut Criterion) {
    let registry = ProviderRegistry::builtin();
    let sequence = SequenceHeader {
        sequence_number: 1,
        request_id: 1,
    };

    for policy in [SecurityPolicy::basic128_rsa15(), SecurityPolicy::basic256_sha256()] {
        let tokens = tokens(&policy);
        let token = tokens.current();
        let name = policy.uri.rsplit('#').next().unwrap_or("policy").to_string();

        for provider_name in [RustCryptoProvider::NAME, PortableProvider::NAME] {
            let provider = registry.get(provider_name).unwrap();
            let mode =
                SecurityMode::new(policy.clone(), MessageSecurityMode::SignAndEncrypt).unwrap();
            let mut group = c.benchmark_group(format!("protect/{}/{}", name, provider_name));

            for size in SIZES {
                let body = vec![0x5a; size];
                group.throughput(Throughput::Bytes(size as u64));

                group.bench_with_input(BenchmarkId::new("encode", size), &body, |b, body| {
                    b.iter(|| {
                        encode_symmetric(
                            provider.as_ref(),
                            &mode,
                            &token,
                            MessageType::Message,
                            sequence,
                            black_box(body),
                            SizeLimit::request(usize::MAX),
                        )
                        .unwrap()
                    });
                });

                let chunk = encode_symmetric(
                    provider.as_ref(),
                    &mode,
                    &token,
                    MessageType::Message,
                    sequence,
                    &body,
                    SizeLimit::request(usize::MAX),
                )
                .unwrap();
                group.bench_with_input(BenchmarkId::new("decode", size), &chunk, |b, chunk| {
                    b.iter(|| {
                        let chunk = black_box(chunk.clone());
                        decode_symmetric(provider.as_ref(), &mode, &tokens, chunk).unwrap()
                    });
                });
            }
            group.finish();
        }
    }
}

fn bench_sign_only(c: &mut Criterion) {
    let provider = ProviderRegistry::builtin().default_provider().unwrap();
    let policy = SecurityPolicy::basic256_sha256();
    let mode = SecurityMode::new(policy.clone(), MessageSecurityMode::Sign).unwrap();
    let tokens = tokens(&policy);
    let token = tokens.current();
    let body = vec![0u8; 1024];

    c.bench_function("protect/sign_only/1024", |b| {
        b.iter(|| {
            encode_symmetric(
                provider.as_ref(),
                &mode,
                &token,
                MessageType::Message,
                SequenceHeader {
                    sequence_number: 1,
                    request_id: 1,
                },
                black_box(&body),
                SizeLimit::request(usize::MAX),
            )
            .unwrap()
        });
    });
}

criterion_group!(benches, bench_protect, bench_sign_only);
criterion_main!(benches);
