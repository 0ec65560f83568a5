//! Core types for pooled telemetry samples.
//!
//! A [`Sample`] is one time-stamped record: a [`SampleHeader`] (time tag,
//! byte length, [`SampleId`], [`SampleKind`]) plus a payload held in a
//! recycled buffer from a [`BufferPool`]. Samples are built through a
//! [`SampleBuilder`] obtained from [`acquire`] and frozen into a cheaply
//! cloneable, reference-counted value. The payload buffer returns to the pool
//! when the last clone is dropped.
//!
//! This crate also owns the stream boundary formats:
//!
//! - [`codec`]: the fixed 16-byte record header, in either byte order
//! - [`archive`]: the optional text header at the start of archive files
//! - [`filter`]: screening of corrupt headers before a payload is read
//! - [`time`]: microsecond time tags to and from human-readable text
//!
//! and the error taxonomy shared by readers, sinks and the merge engine
//! ([`SampleError`]).

pub mod archive;
pub mod codec;
pub mod error;
pub mod filter;
pub mod id;
pub mod limits;
pub mod sample;
pub mod time;

pub use archive::ArchiveHeader;
pub use codec::{ByteOrder, RawHeader, HEADER_LEN};
pub use error::{SampleError, SampleResult};
pub use filter::SampleFilter;
pub use id::{SampleHeader, SampleId, SampleKey};
pub use sample::{acquire, release_all, Sample, SampleBuilder, TypedPayload};

pub use samp_pool::{BufferPool, LengthError, PoolStats, SampleKind, MAX_SAMPLE_BYTES};
