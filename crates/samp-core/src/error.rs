//! Error taxonomy for sample streams.
//!
//! [`SampleError`] covers every failure a reader, sink or merge run can hit.
//! Per-source conditions (`EndOfStream`, `SourceIo`) terminate that source
//! only; the merge keeps going with the rest. `Sink` is the one variant that
//! aborts a whole run.
//!
//! Out-of-order and duplicate samples are not errors. They are counted in the
//! merge and verifier statistics and reported through `tracing`.

use samp_pool::LengthError;
use std::io;
use thiserror::Error;

/// Result alias used throughout the sample crates.
pub type SampleResult<T> = Result<T, SampleError>;

/// Failures raised while producing, reading or writing samples.
#[derive(Error, Debug)]
pub enum SampleError {
    /// A payload larger than the wire length field can describe was requested.
    #[error(transparent)]
    Length(#[from] LengthError),

    /// A source has no more records.
    ///
    /// Readers raise this internally when a record boundary coincides with
    /// end of input; the stream trait turns it into `Ok(None)`.
    #[error("end of stream: {stream}")]
    EndOfStream {
        /// Name of the exhausted source.
        stream: String,
    },

    /// A source failed for a reason other than clean end of input.
    #[error("I/O error on {stream}: {error}")]
    SourceIo {
        /// Name of the failing source.
        stream: String,
        /// Underlying error.
        #[source]
        error: io::Error,
    },

    /// The output could not be written. Fatal to the run.
    #[error("output sink failed: {0}")]
    Sink(#[source] io::Error),

    /// An archive file started with the magic line but its header was malformed.
    #[error("invalid archive header: {0}")]
    InvalidArchiveHeader(String),

    /// A bad-sample filter rule could not be parsed.
    #[error("invalid filter rule: {0}")]
    InvalidFilterRule(String),

    /// A setting was missing or out of range.
    #[error("configuration error: {0}")]
    Config(String),

    /// A time string matched none of the accepted formats.
    #[error("cannot parse time: {0}")]
    TimeParse(String),
}

impl SampleError {
    /// Wrap an I/O error raised by source `stream`.
    pub fn source_io(stream: impl Into<String>, error: io::Error) -> Self {
        SampleError::SourceIo {
            stream: stream.into(),
            error,
        }
    }

    /// End-of-stream marker for source `stream`.
    pub fn end_of_stream(stream: impl Into<String>) -> Self {
        SampleError::EndOfStream {
            stream: stream.into(),
        }
    }

    /// Whether this is a clean end of input rather than a failure.
    #[must_use]
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, SampleError::EndOfStream { .. })
    }

    /// Whether this error must abort the whole run, not just one source.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, SampleError::Sink(_) | SampleError::Config(_))
    }
}
