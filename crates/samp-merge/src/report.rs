//! Throttling of repetitive diagnostics.

/// Whether occurrence number `count` (1-based) should be reported when only
/// the first of every `interval` occurrences is logged.
///
/// Reports occurrences 1, `interval + 1`, `2 * interval + 1`, ... An interval
/// of zero silences the report entirely.
#[must_use]
pub fn should_report(count: u64, interval: u64) -> bool {
    interval > 0 && count > 0 && (count - 1) % interval == 0
}
