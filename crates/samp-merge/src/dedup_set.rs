//! Ordered, deduplicating container for the live merge window.
//!
//! Samples are ordered by [`SampleKey`] `(timestamp, id, length)`. What
//! counts as a duplicate is a [`DedupPolicy`]:
//!
//! - [`DedupPolicy::Header`]: equal keys are duplicates, whatever the payload.
//! - [`DedupPolicy::Exact`]: equal keys are duplicates only when the payload
//!   bytes are identical too. Same-key samples with different payloads are
//!   all kept, ordered by payload bytes.
//!
//! Exact comparison is required when the acquisition clock is coarser than
//! the sample period: rapid samples from one sensor can share a time tag and
//! length while carrying different data.
//!
//! Insert, lookup and removal are `O(log W)` in the window size.

use samp_core::{Sample, SampleKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Duplicate rejection policy.
///
/// No `Default`: callers must choose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupPolicy {
    /// Reject on equal `(timestamp, id, length)`.
    Header,
    /// Reject on equal key and byte-identical payload.
    Exact,
}

impl fmt::Display for DedupPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DedupPolicy::Header => write!(f, "header"),
            DedupPolicy::Exact => write!(f, "exact"),
        }
    }
}

impl FromStr for DedupPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "header" => Ok(DedupPolicy::Header),
            "exact" => Ok(DedupPolicy::Exact),
            other => Err(format!("unknown dedup policy '{other}', expected header or exact")),
        }
    }
}

/// Samples keyed by `(timestamp, id, length)`, with at most one sample per
/// key under header dedup and at most one per distinct payload under exact
/// dedup.
#[derive(Debug)]
pub struct OrderedDedupSet {
    policy: DedupPolicy,
    // Exact dedup keeps each bucket sorted by payload bytes.
    buckets: BTreeMap<SampleKey, Vec<Sample>>,
    len: usize,
}

impl OrderedDedupSet {
    /// Create an empty set.
    #[must_use]
    pub fn new(policy: DedupPolicy) -> Self {
        Self {
            policy,
            buckets: BTreeMap::new(),
            len: 0,
        }
    }

    /// Policy this set was built with.
    #[must_use]
    pub fn policy(&self) -> DedupPolicy {
        self.policy
    }

    /// Insert a sample. Returns `false` if it is a duplicate.
    ///
    /// A rejected sample is released when this call returns.
    pub fn insert(&mut self, sample: Sample) -> bool {
        let bucket = self.buckets.entry(sample.key()).or_default();
        match self.policy {
            DedupPolicy::Header => {
                if !bucket.is_empty() {
                    return false;
                }
                bucket.push(sample);
            }
            DedupPolicy::Exact => {
                match bucket.binary_search_by(|held| held.payload().cmp(sample.payload())) {
                    Ok(_) => return false,
                    Err(pos) => bucket.insert(pos, sample),
                }
            }
        }
        self.len += 1;
        true
    }

    /// Whether a sample equal to `sample` under this set's policy is held.
    #[must_use]
    pub fn contains(&self, sample: &Sample) -> bool {
        match self.buckets.get(&sample.key()) {
            None => false,
            Some(bucket) => match self.policy {
                DedupPolicy::Header => !bucket.is_empty(),
                DedupPolicy::Exact => bucket
                    .binary_search_by(|held| held.payload().cmp(sample.payload()))
                    .is_ok(),
            },
        }
    }

    /// Whether any sample with this key is held.
    #[must_use]
    pub fn contains_key(&self, key: &SampleKey) -> bool {
        self.buckets.contains_key(key)
    }

    /// Samples with a time tag below `threshold`, in ascending order.
    pub fn range_before(&self, threshold: i64) -> impl Iterator<Item = &Sample> {
        self.buckets
            .range(..SampleKey::first_at(threshold))
            .flat_map(|(_, bucket)| bucket.iter())
    }

    /// Remove and return samples with a time tag below `threshold`, in
    /// ascending order.
    pub fn drain_before(&mut self, threshold: i64) -> Vec<Sample> {
        let rest = self.buckets.split_off(&SampleKey::first_at(threshold));
        let head = std::mem::replace(&mut self.buckets, rest);
        let drained: Vec<Sample> = head.into_values().flatten().collect();
        self.len -= drained.len();
        drained
    }

    /// Remove and release samples with a time tag below `threshold`.
    /// Returns how many were removed.
    pub fn remove_before(&mut self, threshold: i64) -> usize {
        samp_core::release_all(self.drain_before(threshold))
    }

    /// Number of samples held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Smallest key held.
    #[must_use]
    pub fn first_key(&self) -> Option<SampleKey> {
        self.buckets.keys().next().copied()
    }

    /// All samples in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.buckets.values().flat_map(|bucket| bucket.iter())
    }

    /// Release everything. Returns how many samples were held.
    pub fn clear(&mut self) -> usize {
        let n = self.len;
        self.buckets.clear();
        self.len = 0;
        n
    }
}
