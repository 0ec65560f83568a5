//! Criterion benchmarks for the merge loop.
//!
//! Key metrics:
//! - Samples per second through the engine for 2, 4 and 8 interleaved sources
//! - Header vs exact dedup when every sample arrives twice
//!
//! Run with: cargo bench -p samp-merge --bench merge

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use samp_core::{Sample, SampleId, SampleKind};
use samp_merge::{CountingSink, DedupPolicy, MergeConfig, MergeEngine, VecReader};
use std::time::Duration;

const PER_SOURCE: i64 = 10_000;

fn source(dsm: u16) -> Vec<Sample> {
    (0..PER_SOURCE)
        .map(|i| {
            Sample::from_vec(
                i * 10_000 + i64::from(dsm),
                SampleId::new(dsm, 1),
                SampleKind::Short,
                vec![0u8; 32],
            )
            .unwrap()
        })
        .collect()
}

fn merge_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_throughput");

    for sources in [2u16, 4, 8] {
        let inputs: Vec<Vec<Sample>> = (1..=sources).map(source).collect();
        group.throughput(Throughput::Elements(PER_SOURCE as u64 * u64::from(sources)));

        group.bench_with_input(BenchmarkId::from_parameter(sources), &inputs, |b, inputs| {
            b.iter(|| {
                let mut engine =
                    MergeEngine::new(MergeConfig::new(Duration::from_secs(5), DedupPolicy::Header));
                for (i, samples) in inputs.iter().enumerate() {
                    engine.add_input(VecReader::new(format!("in{i}"), samples.iter().cloned()));
                }
                let mut sink = CountingSink::default();
                black_box(engine.run(&mut sink).unwrap());
            });
        });
    }

    group.finish();
}

fn merge_duplicates(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_duplicates");
    let samples = source(1);
    group.throughput(Throughput::Elements(2 * PER_SOURCE as u64));

    for policy in [DedupPolicy::Header, DedupPolicy::Exact] {
        group.bench_with_input(BenchmarkId::from_parameter(policy), &samples, |b, samples| {
            b.iter(|| {
                let mut engine = MergeEngine::new(MergeConfig::new(Duration::from_secs(5), policy));
                engine.add_input(VecReader::new("a", samples.iter().cloned()));
                engine.add_input(VecReader::new("b", samples.iter().cloned()));
                let mut sink = CountingSink::default();
                black_box(engine.run(&mut sink).unwrap());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, merge_throughput, merge_duplicates);
criterion_main!(benches);
