//! Recycling buffer pool for time-stamped telemetry samples.
//!
//! Sensor readers produce and discard same-shaped buffers continuously, at
//! tens of Hz to several kHz per channel. Going to the general allocator for
//! every one of them is what this crate avoids:
//!
//! - [`BufferPool`]: process-wide cache of released payload buffers, sharded
//!   by [`SampleKind`] and bucketed by capacity tier
//! - [`PooledBuffer`]: a checked-out buffer, exclusively owned while filled,
//!   frozen into a shared `bytes::Bytes` once published
//!
//! # Ownership Model
//!
//! A buffer is returned to its free list exactly once, by `Drop`, when the
//! last owner releases it. There is no explicit checkin call to forget or to
//! make twice.
//!
//! # Example
//!
//! ```
//! use samp_pool::{BufferPool, SampleKind};
//!
//! let pool = BufferPool::new();
//!
//! let mut buf = pool.checkout(SampleKind::Float, 16)?;
//! buf.as_mut_slice().copy_from_slice(&[0u8; 16]);
//!
//! let shared = buf.freeze();      // Bytes, atomically reference counted
//! let another = shared.clone();   // retain
//! drop(shared);                   // release
//! drop(another);                  // last release: buffer back in the pool
//!
//! assert_eq!(pool.stats(SampleKind::Float).free_total(), 1);
//! # Ok::<(), samp_pool::LengthError>(())
//! ```

pub mod buffer_pool;
pub mod error;
pub mod kind;

pub use buffer_pool::{BufferPool, PoolStats, PooledBuffer, Tier};
pub use error::LengthError;
pub use kind::SampleKind;

/// Largest payload, in bytes, a sample may carry.
///
/// The wire length field is wider, but every producer in the system keeps
/// samples within 16 bits of length, and readers use this bound to reject
/// corrupt headers.
pub const MAX_SAMPLE_BYTES: usize = u16::MAX as usize;
