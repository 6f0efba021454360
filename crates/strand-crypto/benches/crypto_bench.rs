//! Performance benchmarks for strand-crypto.
//!
//! Run with: `cargo bench -p strand-crypto`

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rand_core::OsRng;
use strand_crypto::aead::FrameCipher;
use strand_crypto::hash::stretch_keys;
use strand_crypto::x25519::EphemeralSecret;
use strand_crypto::{KeyType, generate_keypair};

// ============================================================================
// Frame Cipher Benchmarks
// ============================================================================

fn bench_frame_seal(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_seal");

    for size in [64usize, 1024, 16384] {
        let (keys, _) = stretch_keys(&[0x42; 32], b"bench");
        let mut cipher = FrameCipher::new(&keys);
        let plaintext = vec![0xAA; size];

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| cipher.seal(black_box(&plaintext)))
        });
    }

    group.finish();
}

// ============================================================================
// Handshake Primitive Benchmarks
// ============================================================================

fn bench_sign_verify(c: &mut Criterion) {
    let (sk, pk) = generate_keypair(KeyType::Ed25519);
    let message = [0x11u8; 128];

    c.bench_function("ed25519_sign", |b| b.iter(|| sk.sign(black_box(&message))));

    let sig = sk.sign(&message);
    c.bench_function("ed25519_verify", |b| {
        b.iter(|| pk.verify(black_box(&message), black_box(&sig)))
    });
}

fn bench_agreement(c: &mut Criterion) {
    let remote = EphemeralSecret::generate(&mut OsRng).public_key();

    c.bench_function("x25519_generate_and_agree", |b| {
        b.iter(|| {
            let secret = EphemeralSecret::generate(&mut OsRng);
            secret.agree(black_box(&remote))
        })
    });
}

criterion_group!(benches, bench_frame_seal, bench_sign_verify, bench_agreement);
criterion_main!(benches);
