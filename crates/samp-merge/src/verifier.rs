//! Cross-checking a merged stream against its inputs.
//!
//! The verifier walks the same time windows as the merge. For each window
//! `[t, t + RA)` it loads the reference (merged) stream into an exact-dedup
//! set, counting duplicates found in the reference itself, then reads every
//! unmerged input over the same window and classifies each sample:
//!
//! - present in the reference: ok
//! - absent: **missing**, reported with its time, id and length
//! - more than one read-ahead behind `t`: **backward**
//!
//! Reference samples below `t` are released after each window.
//!
//! A clean run has zero missing, backward and duplicate samples; this is the
//! acceptance test for a merge.

use samp_core::limits::{
    DEFAULT_BACKWARD_REPORT_INTERVAL, DEFAULT_DUPLICATE_REPORT_INTERVAL, DEFAULT_FILTER_MAX_LENGTH,
};
use samp_core::time::{duration_usecs, format_usecs};
use samp_core::{Sample, SampleError, SampleFilter, SampleKey};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::dedup_set::{DedupPolicy, OrderedDedupSet};
use crate::engine::{Input, SourceEnd};
use crate::reader::StreamReader;
use crate::report::should_report;

/// Settings for one verification run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyConfig {
    /// Read-ahead interval; should match the merge being checked.
    pub read_ahead: Duration,
    /// Samples before this time tag are ignored. Defaults to the earliest
    /// first sample of any stream.
    pub start: Option<i64>,
    /// Samples at or after this time tag are ignored.
    pub end: Option<i64>,
    /// Reference duplicates between reports.
    pub duplicate_report_interval: u64,
    /// Backward samples per input between reports.
    pub backward_report_interval: u64,
}

impl VerifyConfig {
    /// Settings with no time limits and default report intervals.
    #[must_use]
    pub fn new(read_ahead: Duration) -> Self {
        Self {
            read_ahead,
            start: None,
            end: None,
            duplicate_report_interval: DEFAULT_DUPLICATE_REPORT_INTERVAL,
            backward_report_interval: DEFAULT_BACKWARD_REPORT_INTERVAL,
        }
    }

    /// Set the time range.
    #[must_use]
    pub fn with_range(mut self, start: Option<i64>, end: Option<i64>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    /// Header filter for verifier inputs: range checks on, lengths up to
    /// 32 768 bytes, and times within a day of the requested range.
    #[must_use]
    pub fn input_filter(&self) -> SampleFilter {
        let mut filter = SampleFilter::enabled();
        filter.set_length_range(1, DEFAULT_FILTER_MAX_LENGTH);
        filter.set_default_time_range(self.start, self.end);
        filter
    }

    fn validate(&self) -> Result<(), SampleError> {
        if duration_usecs(self.read_ahead) <= 0 {
            return Err(SampleError::Config("read_ahead must be positive".to_string()));
        }
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if end <= start {
                return Err(SampleError::Config("end is not after start".to_string()));
            }
        }
        Ok(())
    }
}

/// A discrepancy found during verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyEvent {
    /// An input sample is not in the reference.
    Missing {
        /// Input name.
        input: String,
        /// Reference name.
        reference: String,
        /// Key of the missing sample.
        key: SampleKey,
    },
    /// An input sample arrived more than one read-ahead behind the window.
    Backward {
        /// Input name.
        input: String,
        /// Running count for this input.
        count: u64,
        /// Key of the sample.
        key: SampleKey,
    },
    /// The reference holds the same sample twice.
    Duplicate {
        /// Reference name.
        reference: String,
        /// Running count.
        count: u64,
        /// Key of the duplicate.
        key: SampleKey,
    },
}

impl fmt::Display for VerifyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyEvent::Missing {
                input,
                reference,
                key,
            } => write!(f, "Missing sample, in={input}, merge={reference}: {key}"),
            VerifyEvent::Backward { input, count, key } => {
                write!(f, "Backward sample (#{count}), in={input}: {key}")
            }
            VerifyEvent::Duplicate {
                reference,
                count,
                key,
            } => write!(f, "Duplicate sample (#{count}) in={reference}: {key}"),
        }
    }
}

/// Per-input verification counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InputCheck {
    /// Input name.
    pub name: String,
    /// Samples read.
    pub read: u64,
    /// Samples found in the reference.
    pub ok: u64,
    /// Samples not found in the reference.
    pub missing: u64,
    /// Samples more than one read-ahead behind the window.
    pub backward: u64,
    /// How the input stopped.
    pub end: Option<SourceEnd>,
}

/// Progress after one window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyWindow {
    /// Window start.
    pub start: i64,
    /// Window end (exclusive).
    pub end: i64,
    /// Reference samples held.
    pub reference_len: usize,
    /// `(ok, missing)` per input, this window only.
    pub counts: Vec<(u64, u64)>,
}

impl fmt::Display for VerifyWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {}, merge samps={}",
            format_usecs(self.start),
            format_usecs(self.end),
            self.reference_len
        )?;
        for (i, (ok, missing)) in self.counts.iter().enumerate() {
            write!(f, ", {i}={ok},{missing}")?;
        }
        Ok(())
    }
}

/// Totals for a verification run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifySummary {
    /// Per-input counters.
    pub inputs: Vec<InputCheck>,
    /// Reference samples read.
    pub reference_read: u64,
    /// Duplicates found in the reference.
    pub duplicates: u64,
    /// Windows processed.
    pub windows: u64,
    /// Whether the run was interrupted.
    pub interrupted: bool,
}

impl VerifySummary {
    /// Missing samples across all inputs.
    #[must_use]
    pub fn missing(&self) -> u64 {
        self.inputs.iter().map(|i| i.missing).sum()
    }

    /// Backward samples across all inputs.
    #[must_use]
    pub fn backward(&self) -> u64 {
        self.inputs.iter().map(|i| i.backward).sum()
    }

    /// Samples found in the reference across all inputs.
    #[must_use]
    pub fn ok(&self) -> u64 {
        self.inputs.iter().map(|i| i.ok).sum()
    }

    /// Whether no discrepancy of any kind was found.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.missing() == 0 && self.backward() == 0 && self.duplicates == 0
    }
}

/// Checks unmerged inputs against a merged reference stream.
pub struct StreamVerifier {
    config: VerifyConfig,
    reference: Input,
    inputs: Vec<Input>,
    checks: Vec<InputCheck>,
    set: OrderedDedupSet,
    interrupt: Option<Arc<AtomicBool>>,
}

impl StreamVerifier {
    /// A verifier against `reference`, with no inputs yet.
    pub fn new<R: StreamReader + 'static>(config: VerifyConfig, reference: R) -> Self {
        Self {
            config,
            reference: Input::new(Box::new(reference)),
            inputs: Vec::new(),
            checks: Vec::new(),
            set: OrderedDedupSet::new(DedupPolicy::Exact),
            interrupt: None,
        }
    }

    /// Add an unmerged input.
    pub fn add_input<R: StreamReader + 'static>(&mut self, reader: R) {
        self.add_boxed_input(Box::new(reader));
    }

    /// Add an already boxed unmerged input.
    pub fn add_boxed_input(&mut self, reader: Box<dyn StreamReader>) {
        self.checks.push(InputCheck {
            name: reader.name().to_string(),
            ..InputCheck::default()
        });
        self.inputs.push(Input::new(reader));
    }

    /// Poll `flag` for cooperative cancellation.
    pub fn set_interrupt(&mut self, flag: Arc<AtomicBool>) {
        self.interrupt = Some(flag);
    }

    fn interrupted(&self) -> bool {
        self.interrupt
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Run to completion without callbacks.
    pub fn run(&mut self) -> Result<VerifySummary, SampleError> {
        self.run_with(|_| {}, |_| {})
    }

    /// Run to completion, calling `on_event` for every missing sample and
    /// for every Nth backward or duplicate sample, and `on_window` after
    /// each window that held reference samples.
    pub fn run_with<E, W>(&mut self, mut on_event: E, mut on_window: W) -> Result<VerifySummary, SampleError>
    where
        E: FnMut(&VerifyEvent),
        W: FnMut(&VerifyWindow),
    {
        self.config.validate()?;
        let read_ahead = duration_usecs(self.config.read_ahead);
        let mut summary = VerifySummary::default();

        self.reference.pending = self.reference.next();
        for input in &mut self.inputs {
            input.pending = input.next();
        }
        let first = std::iter::once(&self.reference)
            .chain(self.inputs.iter())
            .filter_map(|i| i.pending.as_ref().map(Sample::timestamp))
            .min();
        let Some(start) = self.config.start.or(first) else {
            return Ok(self.finish(summary));
        };
        info!(
            reference = %self.reference.stats.name,
            inputs = self.inputs.len(),
            start = %format_usecs(start),
            "Verification started"
        );

        let mut tcur = start;
        while !self.inputs.iter().all(Input::done) {
            if self.interrupted() {
                summary.interrupted = true;
                break;
            }
            if self.config.end.is_some_and(|end| tcur >= end) {
                break;
            }
            let window_end = tcur.saturating_add(read_ahead);

            // Load the reference through the end of this window.
            while let Some(sample) = self.reference.pending.take().or_else(|| self.reference.next()) {
                let ts = sample.timestamp();
                if ts >= window_end {
                    self.reference.pending = Some(sample);
                    break;
                }
                if ts < start || self.config.end.is_some_and(|end| ts >= end) {
                    continue;
                }
                let key = sample.key();
                if !self.set.insert(sample) {
                    summary.duplicates += 1;
                    if should_report(summary.duplicates, self.config.duplicate_report_interval) {
                        on_event(&VerifyEvent::Duplicate {
                            reference: self.reference.stats.name.clone(),
                            count: summary.duplicates,
                            key,
                        });
                    }
                }
            }

            let mut counts = Vec::with_capacity(self.inputs.len());
            for (input, check) in self.inputs.iter_mut().zip(self.checks.iter_mut()) {
                let (mut ok, mut missing) = (0u64, 0u64);
                while !self.interrupt.as_deref().is_some_and(|f| f.load(Ordering::Relaxed)) {
                    let Some(sample) = input.pending.take().or_else(|| input.next()) else {
                        break;
                    };
                    let ts = sample.timestamp();
                    if ts >= window_end {
                        input.pending = Some(sample);
                        break;
                    }
                    if ts < start || self.config.end.is_some_and(|end| ts >= end) {
                        continue;
                    }
                    if ts < tcur.saturating_sub(read_ahead) {
                        check.backward += 1;
                        if should_report(check.backward, self.config.backward_report_interval) {
                            on_event(&VerifyEvent::Backward {
                                input: check.name.clone(),
                                count: check.backward,
                                key: sample.key(),
                            });
                        }
                    } else if self.set.contains(&sample) {
                        ok += 1;
                    } else {
                        missing += 1;
                        on_event(&VerifyEvent::Missing {
                            input: check.name.clone(),
                            reference: self.reference.stats.name.clone(),
                            key: sample.key(),
                        });
                    }
                }
                check.ok += ok;
                check.missing += missing;
                counts.push((ok, missing));
            }

            if !self.set.is_empty() {
                on_window(&VerifyWindow {
                    start: tcur,
                    end: window_end,
                    reference_len: self.set.len(),
                    counts,
                });
            }

            self.set.remove_before(tcur);
            summary.windows += 1;
            tcur = window_end;
        }

        Ok(self.finish(summary))
    }

    fn finish(&mut self, mut summary: VerifySummary) -> VerifySummary {
        self.set.clear();
        self.reference.pending = None;
        for input in &mut self.inputs {
            input.pending = None;
        }
        summary.reference_read = self.reference.stats.read;
        summary.inputs = self
            .checks
            .iter()
            .zip(self.inputs.iter())
            .map(|(check, input)| InputCheck {
                read: input.stats.read,
                end: input.stats.end.clone(),
                ..check.clone()
            })
            .collect();
        debug!(windows = summary.windows, "Verification windows done");
        info!(
            missing = summary.missing(),
            backward = summary.backward(),
            duplicates = summary.duplicates,
            ok = summary.ok(),
            "Verification finished"
        );
        summary
    }
}

impl fmt::Debug for StreamVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamVerifier")
            .field("config", &self.config)
            .field("inputs", &self.inputs.len())
            .field("reference_len", &self.set.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::VecReader;
    use samp_core::time::secs;
    use samp_core::{SampleId, SampleKind};

    fn sample(ts_secs: i64, dsm: u16, payload: u8) -> Sample {
        Sample::from_vec(secs(ts_secs), SampleId::new(dsm, 1), SampleKind::Char, vec![payload])
            .unwrap()
    }

    fn config() -> VerifyConfig {
        VerifyConfig::new(Duration::from_secs(5))
    }

    #[test]
    fn test_identical_streams_are_clean() {
        let input: Vec<Sample> = (0..20).map(|t| sample(t, 1, 0)).collect();
        let mut verifier = StreamVerifier::new(config(), VecReader::new("merged", input.clone()));
        verifier.add_input(VecReader::new("in", input));

        let summary = verifier.run().unwrap();
        assert!(summary.is_clean());
        assert_eq!(summary.ok(), 20);
        assert_eq!(summary.reference_read, 20);
    }

    #[test]
    fn test_payload_difference_counts_as_missing() {
        let merged = vec![sample(1, 1, 7)];
        let input = vec![sample(1, 1, 8)];
        let mut verifier = StreamVerifier::new(config(), VecReader::new("merged", merged));
        verifier.add_input(VecReader::new("in", input));

        let mut events = Vec::new();
        let summary = verifier.run_with(|e| events.push(e.clone()), |_| {}).unwrap();
        assert_eq!(summary.missing(), 1);
        assert!(matches!(&events[0], VerifyEvent::Missing { key, .. } if key.timestamp == secs(1)));
    }

    #[test]
    fn test_reference_duplicates_reported() {
        let merged = vec![sample(1, 1, 0), sample(1, 1, 0), sample(2, 1, 0)];
        let input = vec![sample(1, 1, 0), sample(2, 1, 0)];
        let mut verifier = StreamVerifier::new(config(), VecReader::new("merged", merged));
        verifier.add_input(VecReader::new("in", input));

        let mut events = Vec::new();
        let summary = verifier.run_with(|e| events.push(e.to_string()), |_| {}).unwrap();
        assert_eq!(summary.duplicates, 1);
        assert_eq!(summary.missing(), 0);
        assert!(events[0].starts_with("Duplicate sample (#1) in=merged"));
    }

    #[test]
    fn test_backward_input_sample() {
        let merged: Vec<Sample> = (0..30).map(|t| sample(t, 1, 0)).collect();
        let mut input: Vec<Sample> = (0..30).map(|t| sample(t, 1, 0)).collect();
        input.insert(25, sample(2, 1, 0));
        let mut verifier = StreamVerifier::new(config(), VecReader::new("merged", merged));
        verifier.add_input(VecReader::new("in", input));

        let summary = verifier.run().unwrap();
        assert_eq!(summary.backward(), 1);
        assert_eq!(summary.missing(), 0);
        assert_eq!(summary.ok(), 30);
    }

    #[test]
    fn test_input_filter_defaults() {
        let cfg = config().with_range(Some(secs(86_400 * 10)), Some(secs(86_400 * 11)));
        let filter = cfg.input_filter();
        assert!(filter.is_enabled());
        let header = samp_core::SampleHeader {
            timestamp: secs(86_400 * 8),
            length: 4,
            id: SampleId::new(1, 1),
            kind: SampleKind::Char,
        };
        assert!(filter.is_invalid(&samp_core::RawHeader::from(&header)));
    }
}
