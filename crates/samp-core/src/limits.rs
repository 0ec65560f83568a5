//! Shared defaults and hard limits for readers, the merge engine and the verifier.

use std::time::Duration;

pub use samp_pool::MAX_SAMPLE_BYTES;

// =============================================================================
// Merge Window
// =============================================================================

/// Default read-ahead interval of the merge window (30 seconds).
pub const DEFAULT_READ_AHEAD: Duration = Duration::from_secs(30);

// =============================================================================
// Report Throttling
// =============================================================================

/// Backward samples per source between log reports.
pub const DEFAULT_BACKWARD_REPORT_INTERVAL: u64 = 100;

/// Duplicates in a verifier reference stream between log reports.
pub const DEFAULT_DUPLICATE_REPORT_INTERVAL: u64 = 200;

/// Bad headers per source between log reports.
pub const BAD_HEADER_REPORT_INTERVAL: u64 = 1000;

// =============================================================================
// Reader Limits
// =============================================================================

/// Largest sample length accepted by default when bad-sample filtering is on.
pub const DEFAULT_FILTER_MAX_LENGTH: u32 = 32_768;

/// Microseconds per second.
pub const USECS_PER_SEC: i64 = 1_000_000;

/// Microseconds per day; the verifier's default time filter slack.
pub const USECS_PER_DAY: i64 = 86_400 * USECS_PER_SEC;

/// Default capacity of a threaded reader's channel, in samples.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;
