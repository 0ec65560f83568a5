//! Command-line interface.

use clap::{Args, Parser, Subcommand};
use samp_core::ByteOrder;
use samp_merge::DedupPolicy;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::Overrides;
use crate::logging::LogFormat;

#[derive(Parser, Debug)]
#[command(name = "samp")]
#[command(version, about = "Merge and verify time-tagged sample archives", long_about = None)]
pub struct Cli {
    /// TOML settings file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub settings: SettingArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Flags shared by every subcommand; each overrides the same setting from
/// the config file and environment.
#[derive(Args, Debug, Default)]
pub struct SettingArgs {
    /// Read-ahead interval, e.g. `30s` or `2m`
    #[arg(long, global = true, value_parser = parse_duration)]
    pub read_ahead: Option<Duration>,

    /// Duplicate policy: `header` (time, id, length) or `exact` (also payload)
    #[arg(long, global = true)]
    pub dedup: Option<DedupPolicy>,

    /// Ignore samples before this time (UTC)
    #[arg(short, long, global = true)]
    pub start: Option<String>,

    /// Ignore samples at or after this time (UTC)
    #[arg(short, long, global = true)]
    pub end: Option<String>,

    /// Byte order of record headers: `little` or `big`
    #[arg(long, global = true)]
    pub byte_order: Option<ByteOrder>,

    /// Read each input on its own thread
    #[arg(long, global = true)]
    pub threaded: bool,

    /// Samples buffered per threaded reader
    #[arg(long, global = true)]
    pub channel_capacity: Option<usize>,

    /// Header filter rules, e.g. `maxlen=2048,mindsm=1`
    #[arg(long, global = true)]
    pub filter: Option<String>,

    /// trace, debug, info, warn or error
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Diagnostic output format
    #[arg(long, global = true, value_enum)]
    pub log_format: Option<LogFormat>,

    /// Print the final summary as JSON on stdout
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Merge inputs into one ordered, duplicate-free archive
    Merge(MergeArgs),

    /// Check that every input sample is present in a merged archive
    Verify(VerifyArgs),
}

#[derive(Args, Debug)]
pub struct MergeArgs {
    /// Input group: a comma-separated file list, or one `strftime` pattern
    /// such as `data/isff_%Y%m%d_%H%M%S.dat`. Repeat for each input.
    #[arg(short, long = "input", required = true)]
    pub inputs: Vec<String>,

    /// Output file name, or a `strftime` pattern when rolling files
    #[arg(short, long)]
    pub output: String,

    /// Output file length, e.g. `1h`; zero writes one file
    #[arg(long, value_parser = parse_duration)]
    pub file_length: Option<Duration>,
}

#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Original input group, as for `merge`. Repeat for each input.
    #[arg(short, long = "input", required = true)]
    pub inputs: Vec<String>,

    /// The merged archive: comma-separated files or one pattern
    #[arg(short, long)]
    pub merged: String,
}

impl Cli {
    /// Setting overrides given on the command line.
    pub fn overrides(&self) -> Overrides {
        let s = &self.settings;
        let file_length = match &self.command {
            Commands::Merge(args) => args.file_length,
            Commands::Verify(_) => None,
        };
        Overrides {
            read_ahead: s.read_ahead,
            dedup: s.dedup,
            start: s.start.clone(),
            end: s.end.clone(),
            byte_order: s.byte_order,
            threaded_readers: s.threaded.then_some(true),
            channel_capacity: s.channel_capacity,
            file_length,
            filter: s.filter.clone(),
            log_level: s.log_level.clone(),
            log_format: s.log_format,
        }
    }
}

/// Split an input group argument into its file arguments.
pub fn group_args(group: &str) -> Vec<String> {
    group
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_duration(text: &str) -> Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(text).map_err(|e| e.to_string())
}
