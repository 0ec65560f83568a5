//! The sample entity and its ownership.
//!
//! A sample has two phases:
//!
//! 1. **Under construction**: a [`SampleBuilder`] exclusively owns a pooled
//!    buffer. The producer fills the payload and header fields.
//! 2. **Published**: [`SampleBuilder::freeze`] yields a [`Sample`]. Clones
//!    share the payload through an atomic reference count, so any number of
//!    holders on any threads may keep it. The buffer goes back to the pool
//!    when the last clone drops.
//!
//! Returning a buffer is never a manual call. Double release and use after
//! release cannot be expressed.

use bytemuck::Pod;
use bytes::Bytes;
use samp_pool::{BufferPool, LengthError, PooledBuffer, SampleKind, MAX_SAMPLE_BYTES};
use std::fmt;
use std::marker::PhantomData;

use crate::id::{SampleHeader, SampleId, SampleKey};

/// Check out a buffer and start building a sample.
///
/// The payload length starts at `min_capacity`; shrink it with
/// [`SampleBuilder::set_length`] once the real size is known.
pub fn acquire(
    pool: &BufferPool,
    kind: SampleKind,
    min_capacity: usize,
) -> Result<SampleBuilder, LengthError> {
    let buffer = pool.checkout(kind, min_capacity)?;
    Ok(SampleBuilder {
        timestamp: 0,
        id: SampleId::default(),
        buffer,
    })
}

/// Release every sample in `samples`. Returns how many were released.
///
/// Each buffer whose count drops to zero goes back to the pool.
pub fn release_all<I>(samples: I) -> usize
where
    I: IntoIterator<Item = Sample>,
{
    let mut released = 0;
    for sample in samples {
        sample.release();
        released += 1;
    }
    released
}

/// A sample under construction, exclusively owned by its producer.
pub struct SampleBuilder {
    timestamp: i64,
    id: SampleId,
    buffer: PooledBuffer,
}

impl SampleBuilder {
    /// Set the time tag, microseconds since the Unix epoch.
    pub fn set_timestamp(&mut self, timestamp: i64) -> &mut Self {
        self.timestamp = timestamp;
        self
    }

    /// Set the source id.
    pub fn set_id(&mut self, id: SampleId) -> &mut Self {
        self.id = id;
        self
    }

    /// Time tag set so far.
    #[must_use]
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Source id set so far.
    #[must_use]
    pub fn id(&self) -> SampleId {
        self.id
    }

    /// Element kind of the payload.
    #[must_use]
    pub fn kind(&self) -> SampleKind {
        self.buffer.kind()
    }

    /// Allocated capacity in bytes. Never less than [`Self::length`].
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Logical payload length in bytes.
    #[must_use]
    pub fn length(&self) -> usize {
        self.buffer.len()
    }

    /// Set the logical payload length.
    ///
    /// Fails if `len` exceeds the allocated capacity; acquire a larger
    /// sample instead.
    pub fn set_length(&mut self, len: usize) -> Result<(), LengthError> {
        self.buffer.set_len(len)
    }

    /// The payload bytes, `length()` of them.
    #[must_use]
    pub fn payload_mut(&mut self) -> &mut [u8] {
        self.buffer.as_mut_slice()
    }

    /// Copy `bytes` into the payload and set the length to match.
    pub fn copy_payload(&mut self, bytes: &[u8]) -> Result<(), LengthError> {
        self.buffer.copy_from_slice(bytes)
    }

    /// Store typed elements in native byte order.
    pub fn write_elements<T: Pod>(&mut self, values: &[T]) -> Result<(), LengthError> {
        self.buffer.copy_from_slice(bytemuck::cast_slice(values))
    }

    /// Publish the sample. The payload becomes shared and immutable.
    #[must_use]
    pub fn freeze(self) -> Sample {
        let length = self.buffer.len() as u32;
        let kind = self.buffer.kind();
        Sample {
            header: SampleHeader {
                timestamp: self.timestamp,
                length,
                id: self.id,
                kind,
            },
            payload: self.buffer.freeze(),
        }
    }
}

impl fmt::Debug for SampleBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleBuilder")
            .field("timestamp", &self.timestamp)
            .field("id", &self.id)
            .field("buffer", &self.buffer)
            .finish()
    }
}

/// A published sample: header plus shared payload.
///
/// `Clone` is a retain, `Drop` is a release. Both are atomic, so clones can
/// move freely between reader threads and the merge thread.
#[derive(Clone)]
pub struct Sample {
    header: SampleHeader,
    payload: Bytes,
}

impl Sample {
    /// Build an unpooled sample from an owned vector.
    ///
    /// Used for samples that do not come from a reader hot path, such as
    /// test fixtures and synthesized records.
    pub fn from_vec(
        timestamp: i64,
        id: SampleId,
        kind: SampleKind,
        payload: Vec<u8>,
    ) -> Result<Self, LengthError> {
        if payload.len() > MAX_SAMPLE_BYTES {
            return Err(LengthError {
                requested: payload.len(),
                max: MAX_SAMPLE_BYTES,
            });
        }
        Ok(Self {
            header: SampleHeader {
                timestamp,
                length: payload.len() as u32,
                id,
                kind,
            },
            payload: Bytes::from(payload),
        })
    }

    /// The full header.
    #[must_use]
    pub fn header(&self) -> &SampleHeader {
        &self.header
    }

    /// Time tag in microseconds.
    #[must_use]
    pub fn timestamp(&self) -> i64 {
        self.header.timestamp
    }

    /// Source id.
    #[must_use]
    pub fn id(&self) -> SampleId {
        self.header.id
    }

    /// Element kind.
    #[must_use]
    pub fn kind(&self) -> SampleKind {
        self.header.kind
    }

    /// Payload length in bytes.
    #[must_use]
    pub fn length(&self) -> usize {
        self.header.length as usize
    }

    /// Ordering key.
    #[must_use]
    pub fn key(&self) -> SampleKey {
        self.header.key()
    }

    /// Payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Shared handle on the payload.
    #[must_use]
    pub fn bytes(&self) -> &Bytes {
        &self.payload
    }

    /// Add a holder. Equivalent to `clone()`.
    #[must_use]
    pub fn retain(&self) -> Sample {
        self.clone()
    }

    /// Drop this holder. The last release returns the buffer to its pool.
    pub fn release(self) {}

    /// Typed view of the payload with `length / size_of::<T>()` elements.
    ///
    /// Elements are read unaligned in native byte order. Trailing bytes that
    /// do not fill a whole element are ignored.
    #[must_use]
    pub fn payload_as<T: Pod>(&self) -> TypedPayload<'_, T> {
        TypedPayload {
            bytes: &self.payload,
            _marker: PhantomData,
        }
    }

    /// Whether both samples carry byte-identical payloads.
    #[must_use]
    pub fn same_payload(&self, other: &Sample) -> bool {
        self.payload == other.payload
    }
}

impl fmt::Debug for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sample")
            .field("timestamp", &self.header.timestamp)
            .field("id", &self.header.id)
            .field("kind", &self.header.kind)
            .field("length", &self.header.length)
            .finish()
    }
}

/// A read-only, typed view over a sample payload.
#[derive(Debug, Clone, Copy)]
pub struct TypedPayload<'a, T> {
    bytes: &'a [u8],
    _marker: PhantomData<T>,
}

impl<'a, T: Pod> TypedPayload<'a, T> {
    /// Number of whole elements.
    #[must_use]
    pub fn len(&self) -> usize {
        match std::mem::size_of::<T>() {
            0 => 0,
            size => self.bytes.len() / size,
        }
    }

    /// Whether there are no whole elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element `index`, if in range.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<T> {
        if index >= self.len() {
            return None;
        }
        let size = std::mem::size_of::<T>();
        let start = index * size;
        Some(bytemuck::pod_read_unaligned(&self.bytes[start..start + size]))
    }

    /// Iterate over all whole elements.
    pub fn iter(&self) -> impl Iterator<Item = T> + 'a {
        let size = std::mem::size_of::<T>().max(1);
        let whole = self.len() * size;
        self.bytes[..whole]
            .chunks_exact(size)
            .map(bytemuck::pod_read_unaligned)
    }

    /// Copy all whole elements into a vector.
    #[must_use]
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_acquire_fill_freeze() {
        let pool = BufferPool::new();
        let mut builder = acquire(&pool, SampleKind::Char, 16).unwrap();
        builder.set_timestamp(1_000).set_id(SampleId::new(1, 20));
        builder.copy_payload(b"hello").unwrap();

        let sample = builder.freeze();
        assert_eq!(sample.timestamp(), 1_000);
        assert_eq!(sample.id(), SampleId::new(1, 20));
        assert_eq!(sample.length(), 5);
        assert_eq!(sample.payload(), b"hello");
        assert_eq!(sample.kind(), SampleKind::Char);
    }

    #[test]
    fn test_set_length_beyond_capacity_fails() {
        let pool = BufferPool::new();
        let mut builder = acquire(&pool, SampleKind::Char, 8).unwrap();
        assert!(builder.set_length(4).is_ok());
        let err = builder.set_length(9).unwrap_err();
        assert_eq!(err.requested, 9);
        assert_eq!(err.max, 8);
        assert_eq!(builder.length(), 4);
    }

    #[test]
    fn test_acquire_over_max_fails() {
        let pool = BufferPool::new();
        assert!(acquire(&pool, SampleKind::Char, MAX_SAMPLE_BYTES + 1).is_err());
        assert!(Sample::from_vec(0, SampleId::default(), SampleKind::Char, vec![0; 70_000]).is_err());
    }

    #[test]
    fn test_release_on_last_holder() {
        let pool = BufferPool::new();
        let sample = acquire(&pool, SampleKind::Float, 8).unwrap().freeze();
        let second = sample.retain();
        let third = second.retain();

        sample.release();
        second.release();
        assert_eq!(pool.stats(SampleKind::Float).out, 1);

        third.release();
        assert_eq!(pool.stats(SampleKind::Float).out, 0);
        assert_eq!(pool.stats(SampleKind::Float).free_total(), 1);
    }

    #[test]
    fn test_release_all() {
        let pool = BufferPool::new();
        let held: Vec<Sample> = (0..5)
            .map(|_| acquire(&pool, SampleKind::Short, 4).unwrap().freeze())
            .collect();
        assert_eq!(pool.total_out(), 5);
        assert_eq!(release_all(held), 5);
        assert_eq!(pool.total_out(), 0);
    }

    #[test]
    fn test_payload_as_typed() {
        let pool = BufferPool::new();
        let mut builder = acquire(&pool, SampleKind::Float, 12).unwrap();
        builder.write_elements(&[1.5f32, -2.0, 8.25]).unwrap();
        let sample = builder.freeze();

        let view = sample.payload_as::<f32>();
        assert_eq!(view.len(), 3);
        assert_eq!(view.get(1), Some(-2.0));
        assert_eq!(view.get(3), None);
        assert_eq!(view.to_vec(), vec![1.5, -2.0, 8.25]);
    }

    #[test]
    fn test_payload_as_ignores_partial_element() {
        let sample =
            Sample::from_vec(0, SampleId::default(), SampleKind::Char, vec![1, 0, 2, 0, 9]).unwrap();
        let view = sample.payload_as::<u16>();
        assert_eq!(view.len(), 2);
        assert_eq!(view.iter().count(), 2);
    }

    #[test]
    fn test_concurrent_retain_release() {
        let pool = BufferPool::new();
        let sample = Arc::new(acquire(&pool, SampleKind::Double, 64).unwrap().freeze());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let sample = Arc::clone(&sample);
                thread::spawn(move || {
                    for _ in 0..10_000 {
                        let held = sample.retain();
                        held.release();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(pool.stats(SampleKind::Double).out, 1);
        drop(sample);
        assert_eq!(pool.stats(SampleKind::Double).out, 0);
    }

    #[test]
    fn test_same_payload() {
        let a = Sample::from_vec(1, SampleId::new(1, 1), SampleKind::Char, b"xy".to_vec()).unwrap();
        let b = Sample::from_vec(1, SampleId::new(1, 1), SampleKind::Char, b"xy".to_vec()).unwrap();
        let c = Sample::from_vec(1, SampleId::new(1, 1), SampleKind::Char, b"xz".to_vec()).unwrap();
        assert_eq!(a.key(), c.key());
        assert!(a.same_payload(&b));
        assert!(!a.same_payload(&c));
    }
}
