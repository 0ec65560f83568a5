//! Criterion benchmarks for pool hot paths.
//!
//! Key metrics:
//! - Checkout/freeze/release cycle for typical sample sizes
//! - Same cycle against a plain `Vec` allocation, for comparison
//!
//! Run with: cargo bench -p samp-pool --bench pool

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use samp_pool::{BufferPool, SampleKind};

fn pool_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool_cycle");

    let sizes = vec![("16B", 16), ("256B", 256), ("4KB", 4096), ("32KB", 32 * 1024)];

    for (name, size) in sizes {
        let pool = BufferPool::new();
        group.throughput(Throughput::Elements(1));

        group.bench_with_input(BenchmarkId::new("pooled", name), &size, |b, &size| {
            b.iter(|| {
                let mut buf = pool.checkout(SampleKind::Char, size).unwrap();
                buf.as_mut_slice()[0] = 1;
                let bytes = buf.freeze();
                black_box(bytes.clone());
            });
        });

        group.bench_with_input(BenchmarkId::new("vec", name), &size, |b, &size| {
            b.iter(|| {
                let mut buf = vec![0u8; size];
                buf[0] = 1;
                black_box(bytes::Bytes::from(buf));
            });
        });
    }

    group.finish();
}

fn pool_concurrent(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool_concurrent");
    group.throughput(Throughput::Elements(4 * 1000));

    group.bench_function("4_threads_mixed_kinds", |b| {
        let pool = BufferPool::new();
        b.iter(|| {
            let handles: Vec<_> = (0..4)
                .map(|i| {
                    let pool = pool.clone();
                    std::thread::spawn(move || {
                        let kind = SampleKind::ALL[i];
                        for _ in 0..1000 {
                            let buf = pool.checkout(kind, 128).unwrap();
                            black_box(buf.freeze());
                        }
                    })
                })
                .collect();
            for h in handles {
                h.join().unwrap();
            }
        });
    });

    group.finish();
}

criterion_group!(benches, pool_cycle, pool_concurrent);
criterion_main!(benches);
