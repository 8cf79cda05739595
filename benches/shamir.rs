use bibd_encryption::config::ShamirConfig;
use bibd_encryption::crypto::ShamirManager;

use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

fn scheme(total_shares: u8, threshold: u8) -> ShamirManager {
    let config = ShamirConfig {
        total_shares,
        threshold,
        shareholder_ids: Vec::new(),
    };
    ShamirManager::new(&config).unwrap()
}

pub fn bench_split(c: &mut Criterion) {
    let secret = [0x5Au8; 32];
    let default = scheme(5, 3);
    c.bench_function("split 32 bytes 3-of-5", |b| {
        b.iter(|| default.split_key(black_box(&secret)).unwrap())
    });

    let wide = scheme(255, 128);
    c.bench_function("split 32 bytes 128-of-255", |b| {
        b.iter(|| wide.split_key(black_box(&secret)).unwrap())
    });
}

pub fn bench_recover(c: &mut Criterion) {
    let secret = [0x5Au8; 32];
    let default = scheme(5, 3);
    let shares = default.split_key(&secret).unwrap();
    c.bench_function("recover 32 bytes 3-of-5", |b| {
        b.iter(|| default.recover_key(black_box(&shares)).unwrap())
    });

    let wide = scheme(255, 128);
    let shares = wide.split_key(&secret).unwrap();
    c.bench_function("recover 32 bytes 128-of-255", |b| {
        b.iter(|| wide.recover_key(black_box(&shares)).unwrap())
    });
}

criterion_group!(benches, bench_split, bench_recover);
criterion_main!(benches);
