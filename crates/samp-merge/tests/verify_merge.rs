//! Merging archive files and checking the result with the verifier.

use samp_core::time::{parse_time, secs};
use samp_core::{BufferPool, Sample, SampleId, SampleKind};
use samp_merge::{
    DedupPolicy, FileSet, MergeConfig, MergeEngine, SampleInputStream, SampleOutputStream,
    SampleSink, StreamVerifier, VecReader, VerifyConfig, VerifyEvent,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::tempdir;

fn t0() -> i64 {
    parse_time("2024-06-01T12:00:00Z").unwrap()
}

fn samples(dsm: u16, offset_ms: i64, count: i64) -> Vec<Sample> {
    (0..count)
        .map(|i| {
            let values = [i as f32, f32::from(dsm)];
            let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
            Sample::from_vec(
                t0() + secs(i) + offset_ms * 1_000,
                SampleId::new(dsm, 10),
                SampleKind::Float,
                bytes,
            )
            .unwrap()
        })
        .collect()
}

fn write_file(path: &Path, samples: &[Sample]) -> PathBuf {
    let mut out = SampleOutputStream::create(path.to_string_lossy(), Duration::ZERO);
    for s in samples {
        out.receive(s).unwrap();
    }
    out.finish().unwrap();
    out.files()[0].clone()
}

fn open(path: &Path, pool: &BufferPool) -> SampleInputStream {
    SampleInputStream::open(FileSet::from_paths([path]), pool.clone())
}

#[test]
fn test_file_merge_verifies_clean() {
    let dir = tempdir().unwrap();
    let pool = BufferPool::new();
    let a = write_file(&dir.path().join("a.dat"), &samples(1, 0, 120));
    let b = write_file(&dir.path().join("b.dat"), &samples(2, 250, 120));

    let mut engine = MergeEngine::new(MergeConfig::new(Duration::from_secs(10), DedupPolicy::Exact));
    engine.add_input(open(&a, &pool));
    engine.add_input(open(&b, &pool));
    let merged_path = dir.path().join("merged.dat");
    let mut out = SampleOutputStream::create(merged_path.to_string_lossy(), Duration::ZERO);
    let summary = engine.run(&mut out).unwrap();
    assert_eq!(summary.emitted, 240);
    assert_eq!(out.stats().samples, 240);

    let mut verifier = StreamVerifier::new(
        VerifyConfig::new(Duration::from_secs(10)),
        open(&out.files()[0], &pool),
    );
    verifier.add_input(open(&a, &pool));
    verifier.add_input(open(&b, &pool));
    let check = verifier.run().unwrap();

    assert!(check.is_clean(), "{check:?}");
    assert_eq!(check.ok(), 240);
    assert_eq!(check.reference_read, 240);
    drop(verifier);
    assert_eq!(pool.total_out(), 0);
}

#[test]
fn test_deleted_record_reported_missing() {
    let a = samples(1, 0, 60);
    let b = samples(2, 500, 60);

    let mut engine = MergeEngine::new(MergeConfig::new(Duration::from_secs(5), DedupPolicy::Header));
    engine.add_input(VecReader::new("a", a.clone()));
    engine.add_input(VecReader::new("b", b.clone()));
    let mut merged: Vec<Sample> = Vec::new();
    engine.run(&mut merged).unwrap();

    let removed = merged.remove(73);
    let mut verifier =
        StreamVerifier::new(VerifyConfig::new(Duration::from_secs(5)), VecReader::new("merged", merged));
    verifier.add_input(VecReader::new("a", a));
    verifier.add_input(VecReader::new("b", b));

    let mut missing = Vec::new();
    let check = verifier
        .run_with(
            |event| {
                if let VerifyEvent::Missing { key, .. } = event {
                    missing.push(*key);
                }
            },
            |_| {},
        )
        .unwrap();

    assert_eq!(check.missing(), 1);
    assert_eq!(check.backward(), 0);
    assert_eq!(check.duplicates, 0);
    assert_eq!(missing, vec![removed.key()]);
    assert_eq!(check.ok(), 119);
}
