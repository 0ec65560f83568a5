//! Screening of corrupt record headers.
//!
//! A corrupt header read from a damaged archive usually carries an
//! unassigned kind code, an absurd length, or a time tag far from the data
//! around it. Readers check every header with [`SampleFilter::check`] before
//! reading its payload; on rejection they slide forward one byte and try
//! again.
//!
//! Two levels of checking apply:
//!
//! - Always: the kind code must be assigned and the length must fit the pool.
//! - When enabled: station id, length and time ranges, and optionally a
//!   required kind (`raw` accepts only `char` samples).
//!
//! Rules are `key=value` strings, comma separated:
//!
//! ```text
//! mindsm=1,maxdsm=20,minlen=1,maxlen=8192,mintime=2024-03-05,raw
//! ```
//!
//! Setting any range enables the filter; `on` and `off` toggle it.

use samp_pool::{SampleKind, MAX_SAMPLE_BYTES};
use std::fmt::Write as _;
use std::str::FromStr;

use crate::codec::RawHeader;
use crate::error::SampleError;
use crate::id::SampleHeader;
use crate::limits::{DEFAULT_FILTER_MAX_LENGTH, USECS_PER_DAY};
use crate::time::{format_usecs, parse_time};

/// Header screening settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleFilter {
    enabled: bool,
    kind: Option<SampleKind>,
    min_dsm: u16,
    max_dsm: u16,
    min_length: u32,
    max_length: u32,
    min_time: Option<i64>,
    max_time: Option<i64>,
}

impl Default for SampleFilter {
    fn default() -> Self {
        Self {
            enabled: false,
            kind: None,
            min_dsm: 1,
            max_dsm: 1023,
            min_length: 1,
            max_length: DEFAULT_FILTER_MAX_LENGTH,
            min_time: None,
            max_time: None,
        }
    }
}

impl SampleFilter {
    /// A filter with range checks enabled at their defaults.
    #[must_use]
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    /// Whether range checks are active.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Turn range checks on or off.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Accept only samples of `kind`.
    pub fn set_kind(&mut self, kind: SampleKind) {
        self.kind = Some(kind);
        self.enabled = true;
    }

    /// Station id range, inclusive.
    pub fn set_dsm_range(&mut self, min: u16, max: u16) {
        self.min_dsm = min;
        self.max_dsm = max;
        self.enabled = true;
    }

    /// Length range in bytes, inclusive.
    pub fn set_length_range(&mut self, min: u32, max: u32) {
        self.min_length = min;
        self.max_length = max;
        self.enabled = true;
    }

    /// Earliest accepted time tag.
    pub fn set_min_time(&mut self, t: i64) {
        self.min_time = Some(t);
        self.enabled = true;
    }

    /// Latest accepted time tag.
    pub fn set_max_time(&mut self, t: i64) {
        self.max_time = Some(t);
        self.enabled = true;
    }

    /// Fill unset time limits with one day of slack around a requested range.
    ///
    /// Does not change whether the filter is enabled.
    pub fn set_default_time_range(&mut self, start: Option<i64>, end: Option<i64>) {
        if self.min_time.is_none() {
            self.min_time = start.map(|t| t.saturating_sub(USECS_PER_DAY));
        }
        if self.max_time.is_none() {
            self.max_time = end.map(|t| t.saturating_add(USECS_PER_DAY));
        }
    }

    /// Apply one rule.
    pub fn set_rule(&mut self, rule: &str) -> Result<(), SampleError> {
        let rule = rule.trim();
        match rule {
            "" => return Ok(()),
            "on" => {
                self.enabled = true;
                return Ok(());
            }
            "off" => {
                self.enabled = false;
                return Ok(());
            }
            "raw" => {
                self.set_kind(SampleKind::Char);
                return Ok(());
            }
            _ => {}
        }

        let (key, value) = rule.split_once('=').ok_or_else(|| {
            SampleError::InvalidFilterRule(format!(
                "rule must be on, off, raw or <field>=<value>: '{rule}'"
            ))
        })?;
        let (key, value) = (key.trim(), value.trim());

        match key {
            "mindsm" => self.set_dsm_range(parse_number(key, value)?, self.max_dsm),
            "maxdsm" => self.set_dsm_range(self.min_dsm, parse_number(key, value)?),
            "minlen" => self.set_length_range(parse_number(key, value)?, self.max_length),
            "maxlen" => self.set_length_range(self.min_length, parse_number(key, value)?),
            "mintime" => self.set_min_time(parse_time(value)?),
            "maxtime" => self.set_max_time(parse_time(value)?),
            "on" | "off" => match value {
                "true" | "on" | "1" => self.enabled = key == "on",
                "false" | "off" | "0" => self.enabled = key != "on",
                _ => {
                    return Err(SampleError::InvalidFilterRule(format!(
                        "{key} must be on or off: '{value}'"
                    )))
                }
            },
            _ => {
                return Err(SampleError::InvalidFilterRule(format!(
                    "unknown field '{key}'"
                )))
            }
        }
        Ok(())
    }

    /// Apply a comma-separated list of rules.
    pub fn set_rules(&mut self, rules: &str) -> Result<(), SampleError> {
        rules.split(',').try_for_each(|rule| self.set_rule(rule))
    }

    /// Screen a raw header. Returns the validated header, or `None` if the
    /// header should be treated as corrupt.
    #[must_use]
    pub fn check(&self, raw: &RawHeader) -> Option<SampleHeader> {
        let header = raw.to_header()?;
        if raw.length as usize > MAX_SAMPLE_BYTES {
            return None;
        }
        if self.enabled && !self.in_range(&header) {
            return None;
        }
        Some(header)
    }

    /// Whether the header would be rejected.
    #[must_use]
    pub fn is_invalid(&self, raw: &RawHeader) -> bool {
        self.check(raw).is_none()
    }

    fn in_range(&self, header: &SampleHeader) -> bool {
        let dsm = header.id.dsm_id();
        self.kind.map_or(true, |k| k == header.kind)
            && dsm >= self.min_dsm
            && dsm <= self.max_dsm
            && header.length >= self.min_length
            && header.length <= self.max_length
            && self.min_time.map_or(true, |t| header.timestamp >= t)
            && self.max_time.map_or(true, |t| header.timestamp <= t)
    }

    /// Human-readable reasons a header is rejected. Empty if it is accepted.
    #[must_use]
    pub fn explain(&self, raw: &RawHeader) -> String {
        let mut msg = String::new();
        let Some(header) = raw.to_header() else {
            let _ = write!(msg, "kind code invalid: {}; ", raw.kind_code());
            return msg;
        };
        if raw.length as usize > MAX_SAMPLE_BYTES {
            let _ = write!(msg, "length exceeds maximum: {}; ", raw.length);
        }
        if !self.enabled {
            return msg;
        }
        if self.kind.is_some_and(|k| k != header.kind) {
            let _ = write!(msg, "kind not accepted: {}; ", header.kind);
        }
        let dsm = header.id.dsm_id();
        if dsm < self.min_dsm || dsm > self.max_dsm {
            let _ = write!(msg, "dsm id out of range: {dsm}; ");
        }
        if header.length < self.min_length || header.length > self.max_length {
            let _ = write!(msg, "length out of range: {}; ", header.length);
        }
        let early = self.min_time.is_some_and(|t| header.timestamp < t);
        let late = self.max_time.is_some_and(|t| header.timestamp > t);
        if early || late {
            let _ = write!(msg, "time out of range: {}; ", format_usecs(header.timestamp));
        }
        msg
    }
}

impl FromStr for SampleFilter {
    type Err = SampleError;

    fn from_str(rules: &str) -> Result<Self, Self::Err> {
        let mut filter = SampleFilter::default();
        filter.set_rules(rules)?;
        Ok(filter)
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, SampleError> {
    value
        .parse()
        .map_err(|_| SampleError::InvalidFilterRule(format!("{key}: cannot parse '{value}'")))
}
