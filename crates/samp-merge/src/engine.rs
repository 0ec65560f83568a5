//! Time-windowed multiway merge.
//!
//! The engine pulls from N sorted sources through one [`OrderedDedupSet`] and
//! hands a single ascending, duplicate-free sequence to a [`SampleSink`].
//!
//! ## State Machine
//!
//! ```text
//!            ┌──────────────────────────────────────┐
//!            v                                      │
//! start -> Filling -> Draining -> Advancing ────────┘
//!                         │
//!                         └──> Finished (all sources ended, or past `end`)
//! ```
//!
//! With `W` the window end and `RA` the read-ahead:
//!
//! - **Filling**: each source is read until its next sample is at or past
//!   `W`. That sample is held back for the next window, not inserted.
//! - **Draining**: samples below `W - RA` leave the set in ascending order.
//!   Every source has been read at least `RA` past them, so nothing that
//!   belongs before them can still arrive in order.
//! - **Advancing**: `W += RA`. When the set is empty after a drain, `W`
//!   jumps by whole read-ahead steps to just past the earliest held sample.
//!
//! A sample below `W - RA` when read is *backward*. It is counted and
//! reported every Nth time per source. If it is still at or above the last
//! drain threshold it is inserted and emitted in order; otherwise it is
//! dropped.
//!
//! ## Memory
//!
//! After a drain the set holds one read-ahead worth of samples per source.
//! Between a fill and its drain it briefly holds two.
//!
//! ## Cancellation
//!
//! An interrupt flag is polled once per read and once per window. An
//! interrupted run still finishes its sink and returns a summary.

use samp_core::limits::DEFAULT_BACKWARD_REPORT_INTERVAL;
use samp_core::time::{duration_usecs, format_usecs, format_with};
use samp_core::{Sample, SampleError};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::dedup_set::{DedupPolicy, OrderedDedupSet};
use crate::reader::StreamReader;
use crate::report::should_report;
use crate::sink::SampleSink;

/// Settings for one merge run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeConfig {
    /// Read-ahead interval. Larger windows absorb more skew and reordering
    /// at the cost of memory and latency.
    pub read_ahead: Duration,
    /// Duplicate rejection policy.
    pub policy: DedupPolicy,
    /// Samples before this time tag are not emitted. With none, nothing is
    /// trimmed and the first window starts at the earliest first sample.
    pub start: Option<i64>,
    /// Samples at or after this time tag are not emitted.
    pub end: Option<i64>,
    /// Backward samples per source between warnings.
    pub backward_report_interval: u64,
}

impl MergeConfig {
    /// Settings with no time limits. Both arguments are required choices.
    #[must_use]
    pub fn new(read_ahead: Duration, policy: DedupPolicy) -> Self {
        Self {
            read_ahead,
            policy,
            start: None,
            end: None,
            backward_report_interval: DEFAULT_BACKWARD_REPORT_INTERVAL,
        }
    }

    /// Set the start time.
    #[must_use]
    pub fn with_start(mut self, start: Option<i64>) -> Self {
        self.start = start;
        self
    }

    /// Set the end time.
    #[must_use]
    pub fn with_end(mut self, end: Option<i64>) -> Self {
        self.end = end;
        self
    }

    /// Set the backward report interval.
    #[must_use]
    pub fn with_backward_report_interval(mut self, interval: u64) -> Self {
        self.backward_report_interval = interval;
        self
    }

    /// Check the settings are usable.
    pub fn validate(&self) -> Result<(), SampleError> {
        if duration_usecs(self.read_ahead) <= 0 {
            return Err(SampleError::Config("read_ahead must be positive".to_string()));
        }
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if end <= start {
                return Err(SampleError::Config(format!(
                    "end {} is not after start {}",
                    format_usecs(end),
                    format_usecs(start)
                )));
            }
        }
        Ok(())
    }
}

/// Phase of the merge loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeState {
    /// Reading sources up to the window end.
    Filling,
    /// Emitting the completed prefix of the window.
    Draining,
    /// Moving the window forward.
    Advancing,
    /// Done; no further reads or emits.
    Finished,
}

/// How a source stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "error")]
pub enum SourceEnd {
    /// Clean end of stream.
    Eof,
    /// An error ended the source; the run continued without it.
    Failed(String),
}

/// Counters for one source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceStats {
    /// Source name.
    pub name: String,
    /// Samples read.
    pub read: u64,
    /// Samples accepted into the window.
    pub inserted: u64,
    /// Samples rejected as duplicates.
    pub duplicates: u64,
    /// Samples more than one read-ahead behind the window.
    pub backward: u64,
    /// Backward samples too late to emit in order.
    pub dropped_backward: u64,
    /// Samples before the requested start time.
    pub before_start: u64,
    /// Why the source stopped, once it has.
    pub end: Option<SourceEnd>,
}

/// One line of progress, reported after every drain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowProgress {
    /// Leading edge of the window.
    pub window_end: i64,
    /// Samples below this time tag were drained.
    pub threshold: i64,
    /// Samples read from each source during this window's fill.
    pub read: Vec<u64>,
    /// Set size before the drain.
    pub before: usize,
    /// Set size after the drain.
    pub after: usize,
    /// Samples handed to the sink.
    pub emitted: usize,
}

impl WindowProgress {
    /// Column header matching the `Display` layout, for `inputs` sources.
    #[must_use]
    pub fn header(inputs: usize) -> String {
        let mut line = String::from("     date(GMT)      ");
        for i in 0..inputs {
            line.push_str(&format!("{:>8}", format!("input{i}")));
        }
        line.push_str("  before   after  output");
        line
    }
}

impl fmt::Display for WindowProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format_with(self.threshold, "%Y %b %d %H:%M:%S"))?;
        for n in &self.read {
            write!(f, " {n:>7}")?;
        }
        write!(f, " {:>7} {:>7} {:>7}", self.before, self.after, self.emitted)
    }
}

/// Totals for a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeSummary {
    /// Per-source counters, in input order.
    pub sources: Vec<SourceStats>,
    /// Effective start time, if any source produced a sample.
    pub start: Option<i64>,
    /// Samples handed to the sink.
    pub emitted: u64,
    /// Samples still held at the end: past `end`, or cut off by interruption.
    pub discarded: u64,
    /// Windows processed.
    pub windows: u64,
    /// Largest set size right after a drain.
    pub peak_window: usize,
    /// Largest set size right before a drain.
    pub peak_fill: usize,
    /// Whether the run was interrupted.
    pub interrupted: bool,
}

impl MergeSummary {
    /// Samples read across all sources.
    #[must_use]
    pub fn total_read(&self) -> u64 {
        self.sources.iter().map(|s| s.read).sum()
    }

    /// Duplicates across all sources.
    #[must_use]
    pub fn total_duplicates(&self) -> u64 {
        self.sources.iter().map(|s| s.duplicates).sum()
    }

    /// Backward samples across all sources.
    #[must_use]
    pub fn total_backward(&self) -> u64 {
        self.sources.iter().map(|s| s.backward).sum()
    }

    /// Backward samples dropped across all sources.
    #[must_use]
    pub fn total_dropped_backward(&self) -> u64 {
        self.sources.iter().map(|s| s.dropped_backward).sum()
    }
}

/// One source and its read state, shared with the verifier.
pub(crate) struct Input {
    reader: Box<dyn StreamReader>,
    pub(crate) stats: SourceStats,
    /// First sample at or past the current window end.
    pub(crate) pending: Option<Sample>,
    window_read: u64,
}

impl Input {
    pub(crate) fn new(reader: Box<dyn StreamReader>) -> Self {
        let name = reader.name().to_string();
        Self {
            reader,
            stats: SourceStats {
                name,
                ..SourceStats::default()
            },
            pending: None,
            window_read: 0,
        }
    }

    pub(crate) fn done(&self) -> bool {
        self.stats.end.is_some() && self.pending.is_none()
    }

    /// Read one sample, recording end of stream or failure.
    pub(crate) fn next(&mut self) -> Option<Sample> {
        if self.stats.end.is_some() {
            return None;
        }
        match self.reader.read() {
            Ok(Some(sample)) => {
                self.stats.read += 1;
                self.window_read += 1;
                Some(sample)
            }
            Ok(None) => {
                debug!(source = %self.stats.name, read = self.stats.read, "Source ended");
                self.stats.end = Some(SourceEnd::Eof);
                None
            }
            Err(e) => {
                warn!(source = %self.stats.name, error = %e, "Source failed, continuing without it");
                self.stats.end = Some(SourceEnd::Failed(e.to_string()));
                None
            }
        }
    }
}

/// Limits for one fill pass.
struct FillBounds {
    /// Requested start; an open start trims nothing.
    start: Option<i64>,
    window_end: i64,
    lower: i64,
    last_threshold: i64,
    report_interval: u64,
}

/// Merges N sources into one ordered, duplicate-free stream.
pub struct MergeEngine {
    config: MergeConfig,
    inputs: Vec<Input>,
    window: OrderedDedupSet,
    state: MergeState,
    interrupt: Option<Arc<AtomicBool>>,
}

impl MergeEngine {
    /// An engine with no inputs yet.
    #[must_use]
    pub fn new(config: MergeConfig) -> Self {
        let window = OrderedDedupSet::new(config.policy);
        Self {
            config,
            inputs: Vec::new(),
            window,
            state: MergeState::Filling,
            interrupt: None,
        }
    }

    /// Add a source. Sources are read in the order added.
    pub fn add_input<R: StreamReader + 'static>(&mut self, reader: R) {
        self.add_boxed_input(Box::new(reader));
    }

    /// Add an already boxed source.
    pub fn add_boxed_input(&mut self, reader: Box<dyn StreamReader>) {
        self.inputs.push(Input::new(reader));
    }

    /// Poll `flag` for cooperative cancellation.
    pub fn set_interrupt(&mut self, flag: Arc<AtomicBool>) {
        self.interrupt = Some(flag);
    }

    /// Current phase.
    #[must_use]
    pub fn state(&self) -> MergeState {
        self.state
    }

    /// Number of sources.
    #[must_use]
    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    /// Settings in use.
    #[must_use]
    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    fn interrupted(&self) -> bool {
        self.interrupt
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Run to completion without progress reporting.
    pub fn run<S: SampleSink + ?Sized>(&mut self, sink: &mut S) -> Result<MergeSummary, SampleError> {
        self.run_with(sink, |_| {})
    }

    /// Run to completion, calling `on_window` after every drain.
    ///
    /// Only a configuration or sink failure returns `Err`. Source failures
    /// end that source and are recorded in the summary.
    pub fn run_with<S, F>(&mut self, sink: &mut S, mut on_window: F) -> Result<MergeSummary, SampleError>
    where
        S: SampleSink + ?Sized,
        F: FnMut(&WindowProgress),
    {
        self.config.validate()?;
        let read_ahead = duration_usecs(self.config.read_ahead);
        let mut summary = MergeSummary::default();

        // Prime every source so an open start can be taken from the data.
        for input in &mut self.inputs {
            input.pending = input.next();
        }
        let first = self
            .inputs
            .iter()
            .filter_map(|i| i.pending.as_ref().map(Sample::timestamp))
            .min();
        let Some(start) = self.config.start.or(first) else {
            info!(inputs = self.inputs.len(), "No samples in any input");
            return self.finish(sink, summary);
        };
        summary.start = Some(start);
        info!(
            inputs = self.inputs.len(),
            start = %format_usecs(start),
            read_ahead = ?self.config.read_ahead,
            policy = %self.config.policy,
            "Merge started"
        );

        let mut window_end = start.saturating_add(read_ahead);
        let mut last_threshold = i64::MIN;
        loop {
            if self.interrupted() {
                warn!("Merge interrupted");
                summary.interrupted = true;
                break;
            }

            self.state = MergeState::Filling;
            let bounds = FillBounds {
                start: self.config.start,
                window_end,
                lower: window_end.saturating_sub(read_ahead),
                last_threshold,
                report_interval: self.config.backward_report_interval,
            };
            for input in &mut self.inputs {
                input.window_read = 0;
            }
            for input in &mut self.inputs {
                fill(input, &mut self.window, &bounds, self.interrupt.as_deref());
            }

            self.state = MergeState::Draining;
            let all_done = self.inputs.iter().all(Input::done);
            let mut threshold = if all_done { i64::MAX } else { bounds.lower };
            if let Some(end) = self.config.end {
                threshold = threshold.min(end);
            }

            let before = self.window.len();
            let drained = self.window.drain_before(threshold);
            let emitted = drained.len();
            for sample in drained {
                sink.receive(&sample)?;
            }
            let after = self.window.len();

            last_threshold = last_threshold.max(threshold);
            summary.emitted += emitted as u64;
            summary.windows += 1;
            summary.peak_fill = summary.peak_fill.max(before);
            summary.peak_window = summary.peak_window.max(after);

            on_window(&WindowProgress {
                window_end,
                threshold: threshold.min(window_end),
                read: self.inputs.iter().map(|i| i.window_read).collect(),
                before,
                after,
                emitted,
            });

            let past_end = self.config.end.is_some_and(|end| threshold >= end);
            if all_done || past_end {
                break;
            }

            self.state = MergeState::Advancing;
            window_end = match self.next_window_end(window_end, read_ahead, after) {
                Some(next) => next,
                None => break,
            };
        }

        self.finish(sink, summary)
    }

    /// The next window end, stepping over windows no source has data for.
    ///
    /// With an empty set the window jumps to the first `read_ahead` step
    /// past the earliest held sample. `None` when that sample is already at
    /// or past `end`.
    fn next_window_end(&self, window_end: i64, read_ahead: i64, held: usize) -> Option<i64> {
        let stepped = window_end.saturating_add(read_ahead);
        if held > 0 {
            return Some(stepped);
        }
        let Some(next) = self
            .inputs
            .iter()
            .filter_map(|i| i.pending.as_ref().map(Sample::timestamp))
            .min()
        else {
            return Some(stepped);
        };
        if self.config.end.is_some_and(|end| next >= end) {
            debug!(next = %format_usecs(next), "Remaining samples are past the end time");
            return None;
        }
        let steps = (next.saturating_sub(window_end) / read_ahead + 1).max(1);
        if steps > 1 {
            debug!(
                from = %format_usecs(window_end),
                to = %format_usecs(next),
                skipped = steps - 1,
                "Skipping empty windows"
            );
        }
        Some(window_end.saturating_add(steps.saturating_mul(read_ahead)))
    }

    fn finish<S: SampleSink + ?Sized>(
        &mut self,
        sink: &mut S,
        mut summary: MergeSummary,
    ) -> Result<MergeSummary, SampleError> {
        let mut discarded = self.window.clear();
        for input in &mut self.inputs {
            if input.pending.take().is_some() {
                discarded += 1;
            }
        }
        summary.discarded = discarded as u64;
        self.state = MergeState::Finished;
        sink.finish()?;

        summary.sources = self.inputs.iter().map(|i| i.stats.clone()).collect();
        for s in &summary.sources {
            info!(
                source = %s.name,
                read = s.read,
                inserted = s.inserted,
                duplicates = s.duplicates,
                backward = s.backward,
                dropped_backward = s.dropped_backward,
                "Source totals"
            );
        }
        info!(
            emitted = summary.emitted,
            discarded = summary.discarded,
            windows = summary.windows,
            peak_window = summary.peak_window,
            interrupted = summary.interrupted,
            "Merge finished"
        );
        Ok(summary)
    }
}

impl fmt::Debug for MergeEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeEngine")
            .field("config", &self.config)
            .field("inputs", &self.inputs.len())
            .field("window", &self.window.len())
            .field("state", &self.state)
            .finish()
    }
}

/// Read one source up to the window end.
fn fill(
    input: &mut Input,
    window: &mut OrderedDedupSet,
    bounds: &FillBounds,
    interrupt: Option<&AtomicBool>,
) {
    loop {
        if interrupt.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
            return;
        }
        let Some(sample) = input.pending.take().or_else(|| input.next()) else {
            return;
        };

        let ts = sample.timestamp();
        if ts >= bounds.window_end {
            input.pending = Some(sample);
            return;
        }
        if bounds.start.is_some_and(|start| ts < start) {
            input.stats.before_start += 1;
            continue;
        }
        if ts < bounds.lower {
            input.stats.backward += 1;
            if should_report(input.stats.backward, bounds.report_interval) {
                warn!(
                    source = %input.stats.name,
                    backward = input.stats.backward,
                    time = %format_usecs(ts),
                    id = %sample.id(),
                    len = sample.length(),
                    "Backward sample"
                );
            }
            if ts < bounds.last_threshold {
                input.stats.dropped_backward += 1;
                continue;
            }
        }

        if window.insert(sample) {
            input.stats.inserted += 1;
        } else {
            input.stats.duplicates += 1;
        }
    }
}
