use std::sync::Arc;

use chrono::Utc;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use keyseal::{
    codec::CipherCodec,
    key_management::{KeyGenPolicy, KeyGenSpec, KeyStoreFacade, SoftwareKeyStore},
    store::SecretStore,
};

const KEY_SIZES: [usize; 3] = [1024, 2048, 3072];

fn codec_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");

    for bits in KEY_SIZES.iter() {
        let store = SoftwareKeyStore::in_memory();
        let policy = KeyGenPolicy {
            key_size: *bits,
            ..KeyGenPolicy::default()
        };
        let spec = KeyGenSpec::negotiate("bench", &store.capabilities(), &policy, Utc::now()).unwrap();
        let handle = store.load_or_create_keypair(&spec).unwrap();
        let public_key = handle.public_key().unwrap().clone();
        let codec = CipherCodec::new();
        let plaintext = vec![0x42u8; 64];

        // Benchmark single-block encryption
        group.bench_with_input(BenchmarkId::new("encrypt", bits), bits, |b, _| {
            b.iter(|| codec.encrypt(&public_key, &plaintext))
        });

        // Benchmark decryption through the key store
        let ciphertext = codec.encrypt(&public_key, &plaintext).unwrap();
        group.bench_with_input(BenchmarkId::new("decrypt", bits), bits, |b, _| {
            b.iter(|| codec.decrypt(&store, &handle, &ciphertext))
        });
    }

    group.finish();
}

fn key_generation_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_generation");
    group.sample_size(10);

    for bits in [1024usize, 2048].iter() {
        let policy = KeyGenPolicy {
            key_size: *bits,
            ..KeyGenPolicy::default()
        };
        group.bench_with_input(BenchmarkId::new("rsa", bits), bits, |b, _| {
            b.iter(|| {
                let store = SoftwareKeyStore::in_memory();
                let spec =
                    KeyGenSpec::negotiate("bench", &store.capabilities(), &policy, Utc::now()).unwrap();
                store.load_or_create_keypair(&spec)
            })
        });
    }

    group.finish();
}

fn store_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("secret_store");

    let facade = Arc::new(SoftwareKeyStore::in_memory());
    let store = SecretStore::new("bench", facade).with_policy(KeyGenPolicy::default());
    store.init().unwrap();

    // Benchmark re-validation of an existing key
    group.bench_function("init_existing_key", |b| b.iter(|| store.init()));

    group.bench_function("put", |b| b.iter(|| store.put("pwd", b"secret1")));

    store.put("pwd", b"secret1").unwrap();
    group.bench_function("get", |b| b.iter(|| store.get("pwd")));

    group.finish();
}

criterion_group!(benches, codec_benchmarks, key_generation_benchmarks, store_benchmarks);
criterion_main!(benches);
