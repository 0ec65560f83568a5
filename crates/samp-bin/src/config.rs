//! Layered settings for the `samp` tool, using Figment.
//!
//! Later sources override earlier ones:
//! 1. built-in defaults
//! 2. a TOML file given with `--config`
//! 3. environment variables prefixed `SAMP_` (e.g. `SAMP_READ_AHEAD=10s`,
//!    `SAMP_DEDUP=exact`)
//! 4. command-line flags
//!
//! The dedup policy has no default at any layer. A merge refuses to start
//! until one of the layers names it; verification always compares payloads
//! and does not need one.
//!
//! # Example
//! ```toml
//! read_ahead = "30s"
//! dedup = "header"
//! start = "2024-06-01T00:00:00Z"
//! end = "2024-06-02T00:00:00Z"
//! file_length = "1h"
//! filter = "mindsm=1,maxdsm=60"
//! log_format = "compact"
//! ```

use anyhow::{anyhow, bail, Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use samp_core::limits::{
    DEFAULT_BACKWARD_REPORT_INTERVAL, DEFAULT_CHANNEL_CAPACITY, DEFAULT_DUPLICATE_REPORT_INTERVAL,
    DEFAULT_READ_AHEAD,
};
use samp_core::time::parse_time;
use samp_core::{ByteOrder, SampleFilter};
use samp_merge::DedupPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::logging::{parse_log_level, LogFormat};

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "SAMP_";

/// Fully merged settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampConfig {
    /// Read-ahead interval.
    #[serde(with = "humantime_serde")]
    pub read_ahead: Duration,
    /// Duplicate policy. Required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedup: Option<DedupPolicy>,
    /// Start time, any format [`parse_time`] accepts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    /// End time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
    /// Backward samples per source between warnings.
    pub backward_report_interval: u64,
    /// Reference duplicates between verifier reports.
    pub duplicate_report_interval: u64,
    /// Byte order of record headers, in and out.
    pub byte_order: ByteOrder,
    /// Read each input on its own thread.
    pub threaded_readers: bool,
    /// Samples buffered per threaded reader.
    pub channel_capacity: usize,
    /// Output file length; zero writes a single file.
    #[serde(with = "humantime_serde")]
    pub file_length: Duration,
    /// Comma-separated header filter rules, e.g. `maxlen=2048,mindsm=1`.
    pub filter: String,
    /// trace, debug, info, warn or error.
    pub log_level: String,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for SampConfig {
    fn default() -> Self {
        Self {
            read_ahead: DEFAULT_READ_AHEAD,
            dedup: None,
            start: None,
            end: None,
            backward_report_interval: DEFAULT_BACKWARD_REPORT_INTERVAL,
            duplicate_report_interval: DEFAULT_DUPLICATE_REPORT_INTERVAL,
            byte_order: ByteOrder::Little,
            threaded_readers: false,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            file_length: Duration::ZERO,
            filter: String::new(),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

/// Command-line values that override the other layers when present.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Overrides {
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "humantime_serde::option"
    )]
    pub read_ahead: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dedup: Option<DedupPolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub byte_order: Option<ByteOrder>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threaded_readers: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_capacity: Option<usize>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "humantime_serde::option"
    )]
    pub file_length: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_format: Option<LogFormat>,
}

impl SampConfig {
    /// Merge every layer and validate the result.
    pub fn load(file: Option<&Path>, overrides: &Overrides) -> Result<Self> {
        let config: Self = Self::figment(file, overrides)?
            .extract()
            .context("Invalid settings")?;
        config.validate().map_err(|e| anyhow!(e))?;
        Ok(config)
    }

    fn figment(file: Option<&Path>, overrides: &Overrides) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = file {
            if !path.is_file() {
                bail!("Config file not found: {}", path.display());
            }
            figment = figment.merge(Toml::file(path));
        }
        Ok(figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(Serialized::defaults(overrides)))
    }

    /// Check settings that the types alone do not constrain.
    pub fn validate(&self) -> Result<(), String> {
        if self.read_ahead.is_zero() {
            return Err("read_ahead must be greater than zero".to_string());
        }
        if self.backward_report_interval == 0 || self.duplicate_report_interval == 0 {
            return Err("report intervals must be at least 1".to_string());
        }
        if self.channel_capacity == 0 {
            return Err("channel_capacity must be at least 1".to_string());
        }
        let (start, end) = self.time_range().map_err(|e| e.to_string())?;
        if let (Some(start), Some(end)) = (start, end) {
            if end <= start {
                return Err(format!(
                    "end ({}) is not after start ({})",
                    self.end.as_deref().unwrap_or_default(),
                    self.start.as_deref().unwrap_or_default()
                ));
            }
        }
        self.sample_filter().map_err(|e| e.to_string())?;
        parse_log_level(&self.log_level)?;
        Ok(())
    }

    /// The dedup policy a merge needs.
    pub fn dedup_policy(&self) -> Result<DedupPolicy> {
        self.dedup.ok_or_else(|| {
            anyhow!(
                "No dedup policy: pass --dedup header|exact, set `dedup` in the config file, \
                 or set {ENV_PREFIX}DEDUP"
            )
        })
    }

    /// Start and end as time tags.
    pub fn time_range(&self) -> Result<(Option<i64>, Option<i64>), samp_core::SampleError> {
        let start = self.start.as_deref().map(parse_time).transpose()?;
        let end = self.end.as_deref().map(parse_time).transpose()?;
        Ok((start, end))
    }

    /// Header filter built from the configured rules.
    pub fn sample_filter(&self) -> Result<SampleFilter, samp_core::SampleError> {
        let mut filter = SampleFilter::default();
        if !self.filter.trim().is_empty() {
            filter.set_rules(&self.filter)?;
        }
        Ok(filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn with_dedup() -> SampConfig {
        SampConfig {
            dedup: Some(DedupPolicy::Header),
            ..SampConfig::default()
        }
    }

    #[test]
    fn test_defaults_have_no_dedup_policy() {
        let config = SampConfig::default();
        assert_eq!(config.read_ahead, Duration::from_secs(30));
        assert!(config.validate().is_ok());
        let err = config.dedup_policy().unwrap_err();
        assert!(err.to_string().contains("--dedup"));
        assert_eq!(with_dedup().dedup_policy().unwrap(), DedupPolicy::Header);
    }

    #[test]
    fn test_loads_without_dedup_policy() {
        let overrides = Overrides {
            read_ahead: Some(Duration::from_secs(10)),
            ..Overrides::default()
        };
        let config = SampConfig::load(None, &overrides).unwrap();
        assert_eq!(config.read_ahead, Duration::from_secs(10));
        assert_eq!(config.dedup, None);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = with_dedup();
        config.read_ahead = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = with_dedup();
        config.start = Some("2024-01-02".to_string());
        config.end = Some("2024-01-01".to_string());
        assert!(config.validate().unwrap_err().contains("not after"));

        let mut config = with_dedup();
        config.log_level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config = with_dedup();
        config.filter = "maxwidth=3".to_string();
        assert!(config.validate().is_err());

        let mut config = with_dedup();
        config.backward_report_interval = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_file_then_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let from_file = SampConfig {
            read_ahead: Duration::from_secs(10),
            dedup: Some(DedupPolicy::Exact),
            file_length: Duration::from_secs(3600),
            filter: "maxlen=2048".to_string(),
            ..SampConfig::default()
        };
        file.write_all(toml::to_string(&from_file).unwrap().as_bytes())
            .unwrap();

        let overrides = Overrides {
            read_ahead: Some(Duration::from_secs(5)),
            log_format: Some(LogFormat::Json),
            ..Overrides::default()
        };
        let config = SampConfig::figment(Some(file.path()), &overrides)
            .unwrap()
            .extract::<SampConfig>()
            .unwrap();

        assert_eq!(config.read_ahead, Duration::from_secs(5));
        assert_eq!(config.dedup, Some(DedupPolicy::Exact));
        assert_eq!(config.file_length, Duration::from_secs(3600));
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.filter, "maxlen=2048");
    }

    #[test]
    fn test_humantime_in_toml() {
        let config: SampConfig = Figment::from(Serialized::defaults(SampConfig::default()))
            .merge(Toml::string("read_ahead = \"1m 30s\"\ndedup = \"header\""))
            .extract()
            .unwrap();
        assert_eq!(config.read_ahead, Duration::from_secs(90));
        assert_eq!(config.dedup, Some(DedupPolicy::Header));
    }

    #[test]
    fn test_missing_config_file() {
        let err = SampConfig::load(Some(Path::new("/nonexistent/samp.toml")), &Overrides::default())
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_time_range_parses() {
        let mut config = with_dedup();
        config.start = Some("2024-06-01T00:00:00Z".to_string());
        let (start, end) = config.time_range().unwrap();
        assert_eq!(start, Some(parse_time("2024 06 01 00:00:00").unwrap()));
        assert_eq!(end, None);
    }
}
