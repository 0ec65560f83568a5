//! Recycling byte-buffer pool with `bytes::Bytes` integration.
//!
//! Buffers are handed out as [`PooledBuffer`]s, exclusively owned while a
//! producer fills them. [`PooledBuffer::freeze`] turns one into a shared
//! `Bytes` handle; clones of that handle are reference counted atomically and
//! the buffer goes back to its free list when the last clone is dropped.
//!
//! ## Memory Flow
//!
//! ```text
//! 1. checkout(kind, n) pops a free buffer of that kind (or allocates one)
//! 2. producer writes the payload through as_mut_slice() / copy_from_slice()
//! 3. freeze() wraps the buffer in Bytes (zero-copy, no allocation of payload)
//! 4. Bytes clones are held by the merge window, sinks, readers...
//! 5. last clone dropped -> BufferOwner::drop() -> checkin to the kind's free list
//! ```
//!
//! ## Sharding
//!
//! Each [`SampleKind`] owns an independent shard of three lock-free free
//! lists, split by allocated capacity (small, medium, large). Producers of
//! different kinds never touch the same queue, and nothing in the hot path
//! takes a lock.
//!
//! The pool never shrinks and has no upper bound. A buffer that is never
//! released costs memory, not correctness.

use bytes::Bytes;
use crossbeam_queue::SegQueue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::LengthError;
use crate::kind::SampleKind;
use crate::MAX_SAMPLE_BYTES;

/// Maximum number of elements in a small buffer.
const SMALL_MAX_ELEMENTS: usize = 64;

/// Maximum number of elements in a medium buffer.
const MEDIUM_MAX_ELEMENTS: usize = 512;

/// Capacity tier of a free buffer within a kind's shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Fewer than 64 elements.
    Small,
    /// Fewer than 512 elements.
    Medium,
    /// Everything else, up to [`MAX_SAMPLE_BYTES`].
    Large,
}

impl Tier {
    /// Tier a buffer of `bytes` capacity belongs to, for elements of `kind`.
    #[must_use]
    pub fn for_capacity(kind: SampleKind, bytes: usize) -> Tier {
        let elements = bytes / kind.element_size();
        if elements < SMALL_MAX_ELEMENTS {
            Tier::Small
        } else if elements < MEDIUM_MAX_ELEMENTS {
            Tier::Medium
        } else {
            Tier::Large
        }
    }

    fn index(self) -> usize {
        self as usize
    }

    /// Search order when a buffer of this tier is wanted: the same tier,
    /// then larger tiers (always big enough), then smaller ones (grown).
    fn search_order(self) -> [Tier; 3] {
        match self {
            Tier::Small => [Tier::Small, Tier::Medium, Tier::Large],
            Tier::Medium => [Tier::Medium, Tier::Large, Tier::Small],
            Tier::Large => [Tier::Large, Tier::Medium, Tier::Small],
        }
    }
}

/// Per-kind state: free lists and counters.
struct KindShard {
    kind: SampleKind,
    free: [SegQueue<Vec<u8>>; 3],
    /// Buffers obtained from the allocator over the pool's lifetime
    allocated: AtomicU64,
    /// Buffers currently checked out
    out: AtomicU64,
    /// Reused buffers that had to be enlarged
    grown: AtomicU64,
    checkouts: AtomicU64,
    checkins: AtomicU64,
}

impl KindShard {
    fn new(kind: SampleKind) -> Self {
        Self {
            kind,
            free: [SegQueue::new(), SegQueue::new(), SegQueue::new()],
            allocated: AtomicU64::new(0),
            out: AtomicU64::new(0),
            grown: AtomicU64::new(0),
            checkouts: AtomicU64::new(0),
            checkins: AtomicU64::new(0),
        }
    }

    fn pop(&self, wanted: Tier) -> Option<Vec<u8>> {
        wanted
            .search_order()
            .into_iter()
            .find_map(|tier| self.free[tier.index()].pop())
    }

    fn push(&self, buffer: Vec<u8>) {
        let tier = Tier::for_capacity(self.kind, buffer.len());
        self.free[tier.index()].push(buffer);
        self.out.fetch_sub(1, Ordering::AcqRel);
        self.checkins.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> PoolStats {
        PoolStats {
            kind: self.kind,
            allocated: self.allocated.load(Ordering::Acquire),
            out: self.out.load(Ordering::Acquire),
            free_small: self.free[Tier::Small.index()].len(),
            free_medium: self.free[Tier::Medium.index()].len(),
            free_large: self.free[Tier::Large.index()].len(),
            grown: self.grown.load(Ordering::Relaxed),
            checkouts: self.checkouts.load(Ordering::Relaxed),
            checkins: self.checkins.load(Ordering::Relaxed),
        }
    }
}

/// Internal state shared between the pool handle and outstanding buffers.
struct BufferPoolInner {
    shards: [KindShard; SampleKind::COUNT],
}

/// Point-in-time counters for one kind's shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Kind these counters belong to.
    pub kind: SampleKind,
    /// Buffers ever obtained from the allocator.
    pub allocated: u64,
    /// Buffers currently held by producers or samples.
    pub out: u64,
    /// Free small buffers.
    pub free_small: usize,
    /// Free medium buffers.
    pub free_medium: usize,
    /// Free large buffers.
    pub free_large: usize,
    /// Checkouts that reused a buffer but had to enlarge it.
    pub grown: u64,
    /// Total checkouts.
    pub checkouts: u64,
    /// Total checkins.
    pub checkins: u64,
}

impl PoolStats {
    /// Free buffers across all tiers.
    #[must_use]
    pub fn free_total(&self) -> usize {
        self.free_small + self.free_medium + self.free_large
    }
}

/// Pool of recyclable payload buffers, sharded by [`SampleKind`].
///
/// Cheap to clone; all clones share the same free lists. Create one at
/// process start and hand clones to every producer.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<BufferPoolInner>,
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("allocated", &self.total_allocated())
            .finish()
    }
}

impl BufferPool {
    /// Create an empty pool. Buffers are allocated on first demand.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BufferPoolInner {
                shards: std::array::from_fn(|i| KindShard::new(SampleKind::ALL[i])),
            }),
        }
    }

    /// Check out a buffer of at least `min_capacity` bytes for `kind`.
    ///
    /// Any free buffer of the kind is reused before the allocator is asked
    /// for a new one; an undersized free buffer is grown to `min_capacity`.
    /// A fresh buffer is allocated with exactly `min_capacity` bytes.
    ///
    /// The returned buffer's length starts at `min_capacity`.
    pub fn checkout(
        &self,
        kind: SampleKind,
        min_capacity: usize,
    ) -> Result<PooledBuffer, LengthError> {
        if min_capacity > MAX_SAMPLE_BYTES {
            return Err(LengthError {
                requested: min_capacity,
                max: MAX_SAMPLE_BYTES,
            });
        }

        let shard = &self.inner.shards[kind.index()];
        let wanted = Tier::for_capacity(kind, min_capacity);

        let buffer = match shard.pop(wanted) {
            Some(mut buffer) => {
                if buffer.len() < min_capacity {
                    debug!(
                        %kind,
                        from = buffer.len(),
                        to = min_capacity,
                        "Growing reused sample buffer"
                    );
                    buffer.reserve_exact(min_capacity - buffer.len());
                    buffer.resize(min_capacity, 0);
                    shard.grown.fetch_add(1, Ordering::Relaxed);
                }
                buffer
            }
            None => {
                shard.allocated.fetch_add(1, Ordering::Relaxed);
                vec![0u8; min_capacity]
            }
        };

        shard.out.fetch_add(1, Ordering::AcqRel);
        shard.checkouts.fetch_add(1, Ordering::Relaxed);

        Ok(PooledBuffer {
            buffer: Some(buffer),
            len: min_capacity,
            kind,
            pool: Arc::clone(&self.inner),
        })
    }

    /// Counters for one kind.
    #[must_use]
    pub fn stats(&self, kind: SampleKind) -> PoolStats {
        self.inner.shards[kind.index()].snapshot()
    }

    /// Counters for every kind that has ever allocated a buffer.
    #[must_use]
    pub fn all_stats(&self) -> Vec<PoolStats> {
        self.inner
            .shards
            .iter()
            .map(KindShard::snapshot)
            .filter(|s| s.allocated > 0)
            .collect()
    }

    /// Buffers obtained from the allocator across all kinds.
    #[must_use]
    pub fn total_allocated(&self) -> u64 {
        self.inner
            .shards
            .iter()
            .map(|s| s.allocated.load(Ordering::Relaxed))
            .sum()
    }

    /// Buffers currently out across all kinds.
    #[must_use]
    pub fn total_out(&self) -> u64 {
        self.inner
            .shards
            .iter()
            .map(|s| s.out.load(Ordering::Relaxed))
            .sum()
    }

    /// Log per-kind counters.
    pub fn log_stats(&self) {
        for s in self.all_stats() {
            info!(
                kind = %s.kind,
                allocated = s.allocated,
                out = s.out,
                free_small = s.free_small,
                free_medium = s.free_medium,
                free_large = s.free_large,
                grown = s.grown,
                checkouts = s.checkouts,
                "Sample pool statistics"
            );
        }
    }

    /// Release the free lists back to the allocator and log final counters.
    ///
    /// Buffers still out are unaffected; they return to (now empty) free
    /// lists when their last owner drops them. Returns the number of free
    /// buffers released.
    pub fn teardown(&self) -> usize {
        self.log_stats();
        let mut released = 0;
        for shard in &self.inner.shards {
            let out = shard.out.load(Ordering::Acquire);
            if out > 0 {
                warn!(kind = %shard.kind, out, "Sample buffers still held at pool teardown");
            }
            for queue in &shard.free {
                while queue.pop().is_some() {
                    released += 1;
                }
            }
        }
        released
    }
}

/// A buffer checked out of the pool, exclusively owned until frozen.
///
/// Dropping it unfrozen returns it to the pool immediately.
pub struct PooledBuffer {
    /// The buffer (Option for take-on-freeze). Its `len()` is the allocated
    /// capacity; `len` below is the logical length.
    buffer: Option<Vec<u8>>,
    len: usize,
    kind: SampleKind,
    pool: Arc<BufferPoolInner>,
}

impl PooledBuffer {
    /// Kind this buffer was checked out for.
    #[must_use]
    pub fn kind(&self) -> SampleKind {
        self.kind
    }

    /// The valid bytes, `len()` of them.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        match &self.buffer {
            Some(buf) => &buf[..self.len],
            None => &[],
        }
    }

    /// Mutable access to the valid bytes.
    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        let len = self.len;
        match self.buffer.as_mut() {
            Some(buf) => &mut buf[..len],
            None => &mut [],
        }
    }

    /// Allocated capacity in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buffer.as_ref().map_or(0, Vec::len)
    }

    /// Logical length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the logical length is zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Set the logical length. Fails if `len` exceeds the capacity.
    pub fn set_len(&mut self, len: usize) -> Result<(), LengthError> {
        let cap = self.capacity();
        if len > cap {
            return Err(LengthError {
                requested: len,
                max: cap,
            });
        }
        self.len = len;
        Ok(())
    }

    /// Copy `src` into the buffer and set the length to `src.len()`.
    pub fn copy_from_slice(&mut self, src: &[u8]) -> Result<(), LengthError> {
        self.set_len(src.len())?;
        self.as_mut_slice().copy_from_slice(src);
        Ok(())
    }

    /// Convert into a shared, reference-counted `Bytes` (zero-copy).
    ///
    /// When the returned `Bytes` and all its clones are dropped, the buffer
    /// goes back to the pool.
    #[must_use]
    pub fn freeze(mut self) -> Bytes {
        match self.buffer.take() {
            Some(buffer) => Bytes::from_owner(BufferOwner {
                buffer,
                len: self.len,
                kind: self.kind,
                pool: Arc::clone(&self.pool),
            }),
            None => Bytes::new(),
        }
    }
}

impl std::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("kind", &self.kind)
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.shards[self.kind.index()].push(buffer);
        }
    }
}

impl AsRef<[u8]> for PooledBuffer {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

/// Owner handed to `Bytes::from_owner`; returns the buffer on drop.
struct BufferOwner {
    buffer: Vec<u8>,
    len: usize,
    kind: SampleKind,
    pool: Arc<BufferPoolInner>,
}

impl AsRef<[u8]> for BufferOwner {
    fn as_ref(&self) -> &[u8] {
        &self.buffer[..self.len]
    }
}

impl Drop for BufferOwner {
    fn drop(&mut self) {
        let buffer = std::mem::take(&mut self.buffer);
        self.pool.shards[self.kind.index()].push(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_checkout_allocates_exact_capacity() {
        let pool = BufferPool::new();
        let buf = pool.checkout(SampleKind::Char, 100).unwrap();
        assert_eq!(buf.capacity(), 100);
        assert_eq!(buf.len(), 100);

        let stats = pool.stats(SampleKind::Char);
        assert_eq!(stats.allocated, 1);
        assert_eq!(stats.out, 1);
    }

    #[test]
    fn test_checkout_over_max_fails() {
        let pool = BufferPool::new();
        let err = pool
            .checkout(SampleKind::Char, MAX_SAMPLE_BYTES + 1)
            .unwrap_err();
        assert_eq!(err.requested, MAX_SAMPLE_BYTES + 1);
        assert_eq!(err.max, MAX_SAMPLE_BYTES);

        // The pool is still usable afterwards
        assert!(pool.checkout(SampleKind::Char, MAX_SAMPLE_BYTES).is_ok());
    }

    #[test]
    fn test_drop_unfrozen_returns_buffer() {
        let pool = BufferPool::new();
        let buf = pool.checkout(SampleKind::Float, 16).unwrap();
        drop(buf);

        let stats = pool.stats(SampleKind::Float);
        assert_eq!(stats.out, 0);
        assert_eq!(stats.free_total(), 1);
        assert_eq!(stats.checkins, 1);
    }

    #[test]
    fn test_freeze_returns_on_last_clone() {
        let pool = BufferPool::new();
        let mut buf = pool.checkout(SampleKind::Char, 9).unwrap();
        buf.copy_from_slice(b"test data").unwrap();

        let bytes1 = buf.freeze();
        let bytes2 = bytes1.clone();
        assert_eq!(bytes1.as_ref(), b"test data");
        assert_eq!(pool.stats(SampleKind::Char).out, 1);

        drop(bytes1);
        assert_eq!(pool.stats(SampleKind::Char).out, 1); // still held by bytes2

        drop(bytes2);
        let stats = pool.stats(SampleKind::Char);
        assert_eq!(stats.out, 0);
        assert_eq!(stats.free_total(), 1);
    }

    #[test]
    fn test_reuse_instead_of_allocate() {
        let pool = BufferPool::new();
        for _ in 0..100 {
            let buf = pool.checkout(SampleKind::Short, 32).unwrap();
            drop(buf.freeze());
        }
        let stats = pool.stats(SampleKind::Short);
        assert_eq!(stats.allocated, 1);
        assert_eq!(stats.checkouts, 100);
    }

    #[test]
    fn test_undersized_free_buffer_is_grown() {
        let pool = BufferPool::new();
        drop(pool.checkout(SampleKind::Char, 8).unwrap());

        let buf = pool.checkout(SampleKind::Char, 40).unwrap();
        assert_eq!(buf.capacity(), 40);

        let stats = pool.stats(SampleKind::Char);
        assert_eq!(stats.allocated, 1);
        assert_eq!(stats.grown, 1);
    }

    #[test]
    fn test_larger_tier_serves_small_request() {
        let pool = BufferPool::new();
        drop(pool.checkout(SampleKind::Char, 1000).unwrap());
        assert_eq!(pool.stats(SampleKind::Char).free_large, 1);

        let buf = pool.checkout(SampleKind::Char, 10).unwrap();
        assert!(buf.capacity() >= 1000);
        assert_eq!(buf.len(), 10);
        assert_eq!(pool.stats(SampleKind::Char).grown, 0);
    }

    #[test]
    fn test_kinds_are_independent() {
        let pool = BufferPool::new();
        drop(pool.checkout(SampleKind::Double, 64).unwrap());

        let _buf = pool.checkout(SampleKind::Float, 64).unwrap();
        assert_eq!(pool.stats(SampleKind::Double).free_total(), 1);
        assert_eq!(pool.stats(SampleKind::Float).allocated, 1);
    }

    #[test]
    fn test_set_len_overflow() {
        let pool = BufferPool::new();
        let mut buf = pool.checkout(SampleKind::Char, 10).unwrap();
        assert!(buf.set_len(5).is_ok());
        assert_eq!(buf.as_slice().len(), 5);

        let err = buf.set_len(20).unwrap_err();
        assert_eq!(err.requested, 20);
        assert_eq!(err.max, 10);
        assert!(buf.copy_from_slice(&[0u8; 20]).is_err());
    }

    #[test]
    fn test_tiers() {
        assert_eq!(Tier::for_capacity(SampleKind::Char, 63), Tier::Small);
        assert_eq!(Tier::for_capacity(SampleKind::Char, 64), Tier::Medium);
        assert_eq!(Tier::for_capacity(SampleKind::Char, 512), Tier::Large);
        // Tiers count elements, not bytes
        assert_eq!(Tier::for_capacity(SampleKind::Double, 504), Tier::Small);
        assert_eq!(Tier::for_capacity(SampleKind::Double, 512), Tier::Medium);
    }

    #[test]
    fn test_concurrent_checkout_checkin() {
        let pool = BufferPool::new();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let pool = pool.clone();
                thread::spawn(move || {
                    let kind = SampleKind::ALL[i % SampleKind::COUNT];
                    for n in 0..1000 {
                        let mut buf = pool.checkout(kind, 1 + n % 200).unwrap();
                        buf.as_mut_slice()[0] = i as u8;
                        let bytes = buf.freeze();
                        let shared = bytes.clone();
                        drop(bytes);
                        drop(shared);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(pool.total_out(), 0);
        for s in pool.all_stats() {
            assert_eq!(s.allocated as usize, s.free_total());
            assert_eq!(s.checkouts, s.checkins);
        }
    }

    #[test]
    fn test_teardown_releases_free_buffers() {
        let pool = BufferPool::new();
        let held = pool.checkout(SampleKind::Char, 4).unwrap();
        drop(pool.checkout(SampleKind::Int32, 4).unwrap());
        drop(pool.checkout(SampleKind::Char, 1000).unwrap());

        assert_eq!(pool.teardown(), 2);
        drop(held);
        assert_eq!(pool.stats(SampleKind::Char).free_total(), 1);
    }
}
