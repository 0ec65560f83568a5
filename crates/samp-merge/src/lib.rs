//! Time-windowed multiway merge of sample streams.
//!
//! Each input is an approximately time-ordered stream of [`Sample`]s. The
//! [`MergeEngine`] reads every input into an ordered, deduplicating window
//! ([`OrderedDedupSet`]) one read-ahead interval at a time, and drains
//! everything more than one interval old to a [`SampleSink`] in
//! `(timestamp, id, length)` order. Reordering within the read-ahead
//! interval is absorbed; anything later is counted and dropped.
//!
//! The [`StreamVerifier`] replays the same windows to check a merged stream
//! against its inputs.
//!
//! ## Stream plumbing
//!
//! - [`FileSet`]: the ordered files making up one logical input
//! - [`SampleInputStream`]: decodes archive files into pooled samples
//! - [`ThreadedReader`]: moves any [`StreamReader`] onto its own thread
//! - [`SampleOutputStream`]: encodes the merged stream, rolling files by time
//!
//! ## Example
//!
//! ```rust
//! use samp_merge::{DedupPolicy, MergeConfig, MergeEngine, VecReader};
//! use samp_core::{Sample, SampleId, SampleKind};
//! use std::time::Duration;
//!
//! let a = (0..3).map(|t| Sample::from_vec(t * 10, SampleId::new(1, 1), SampleKind::Char, vec![0]));
//! let b = (0..3).map(|t| Sample::from_vec(t * 10 + 5, SampleId::new(2, 1), SampleKind::Char, vec![0]));
//! let a: Vec<Sample> = a.collect::<Result<_, _>>().unwrap();
//! let b: Vec<Sample> = b.collect::<Result<_, _>>().unwrap();
//!
//! let mut engine = MergeEngine::new(MergeConfig::new(Duration::from_secs(1), DedupPolicy::Header));
//! engine.add_input(VecReader::new("a", a));
//! engine.add_input(VecReader::new("b", b));
//!
//! let mut out: Vec<Sample> = Vec::new();
//! let summary = engine.run(&mut out).unwrap();
//! assert_eq!(summary.emitted, 6);
//! assert!(out.windows(2).all(|w| w[0].key() <= w[1].key()));
//! ```
//!
//! [`Sample`]: samp_core::Sample

pub mod channel;
pub mod dedup_set;
pub mod engine;
pub mod fileset;
pub mod input_stream;
pub mod output_stream;
pub mod reader;
pub mod report;
pub mod sink;
pub mod verifier;

pub use channel::ThreadedReader;
pub use dedup_set::{DedupPolicy, OrderedDedupSet};
pub use engine::{
    MergeConfig, MergeEngine, MergeState, MergeSummary, SourceEnd, SourceStats, WindowProgress,
};
pub use fileset::FileSet;
pub use input_stream::{InputStats, SampleInputStream};
pub use output_stream::{OutputStats, SampleOutputStream};
pub use reader::{StreamReader, VecReader};
pub use report::should_report;
pub use sink::{CountingSink, SampleSink};
pub use verifier::{
    InputCheck, StreamVerifier, VerifyConfig, VerifyEvent, VerifySummary, VerifyWindow,
};
