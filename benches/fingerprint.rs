//! Benchmarks for cache key derivation
//!
//! Key derivation runs on every request, hit or miss, so it should stay
//! well below the cost of a filesystem stat.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use derivforge::config::Config;
use derivforge::fingerprint::canonical_string;
use derivforge::profile::{HlsProfile, ProxyProfile, ThumbnailProfile};
use derivforge::{derive_key, DerivativeClass, KeyParams, SourceDescriptor};

fn source(path_len: usize) -> SourceDescriptor {
    let path = format!("videos/{}.mp4", "a".repeat(path_len));
    SourceDescriptor::new("abc123", &path, 4_294_967_296, "1700000000").unwrap()
}

fn bench_derive_key(c: &mut Criterion) {
    let config = Config::default();
    let hd = ProxyProfile::hd(&config.hd_proxy);
    let hls = HlsProfile::from_config(&config.hls);
    let thumbs = ThumbnailProfile::from_config(&config.thumbnails);
    let params = KeyParams::new().with("w", 480).with("t", 12.5);

    let mut group = c.benchmark_group("derive_key");
    for len in [8, 64, 512] {
        let src = source(len);
        group.bench_with_input(BenchmarkId::new("hd_proxy", len), &src, |b, src| {
            b.iter(|| derive_key(DerivativeClass::HdProxy, &hd, black_box(src), &KeyParams::new()))
        });
        group.bench_with_input(BenchmarkId::new("thumbnail", len), &src, |b, src| {
            b.iter(|| derive_key(DerivativeClass::Thumbnail, &thumbs, black_box(src), &params))
        });
    }
    group.bench_function("hls", |b| {
        let src = source(64);
        b.iter(|| derive_key(DerivativeClass::Hls, &hls, black_box(&src), &KeyParams::new()))
    });
    group.finish();
}

fn bench_canonical_string(c: &mut Criterion) {
    let config = Config::default();
    let hd = ProxyProfile::hd(&config.hd_proxy);
    let src = source(64);

    c.bench_function("canonical_string", |b| {
        b.iter(|| {
            canonical_string(
                DerivativeClass::HdProxy,
                &hd,
                black_box(&src),
                &KeyParams::new(),
            )
        })
    });
}

criterion_group!(benches, bench_derive_key, bench_canonical_string);
criterion_main!(benches);
