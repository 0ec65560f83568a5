//! `samp`: merge and verify time-tagged sample archives.
//!
//! # Usage
//!
//! Merge three inputs with a 30 s read-ahead, rolling output hourly:
//! ```bash
//! samp merge --dedup header \
//!     -i 'dsm1/isff_%Y%m%d_%H%M%S.dat' -i 'dsm2/isff_%Y%m%d_%H%M%S.dat' -i extra.dat \
//!     -o 'merged/isff_%Y%m%d_%H%M%S.dat' --file-length 1h \
//!     --start '2024-06-01 00:00:00' --end '2024-06-02 00:00:00'
//! ```
//!
//! Check the result against the same inputs:
//! ```bash
//! samp verify -i 'dsm1/isff_%Y%m%d_%H%M%S.dat' -i ... \
//!     -m 'merged/isff_%Y%m%d_%H%M%S.dat'
//! ```
//!
//! Progress lines go to stdout, one per window. Verifier discrepancies go to
//! stderr, one per line. Diagnostics go to stderr through `tracing`.
//!
//! Exit status: 0 on success, 1 when verification finds discrepancies,
//! 130 when interrupted.

mod cli;
mod config;
mod logging;
mod run;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use mimalloc::MiMalloc;
use serde::Serialize;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::cli::{Cli, Commands};
use crate::config::SampConfig;
use crate::logging::LoggingConfig;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Exit status of an interrupted run.
const EXIT_INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = SampConfig::load(cli.config.as_deref(), &cli.overrides())?;
    logging::init(&LoggingConfig::from_config(&config).map_err(|e| anyhow!(e))?)
        .map_err(|e| anyhow!(e))?;

    let interrupt = Arc::new(AtomicBool::new(false));
    tokio::spawn(watch_signals(Arc::clone(&interrupt)));

    let json = cli.settings.json;
    match cli.command {
        Commands::Merge(args) => {
            let summary = {
                let interrupt = Arc::clone(&interrupt);
                tokio::task::spawn_blocking(move || run::merge(&args, &config, interrupt))
                    .await
                    .context("Merge task panicked")??
            };
            info!(
                read = summary.total_read(),
                emitted = summary.emitted,
                duplicates = summary.total_duplicates(),
                backward = summary.total_backward(),
                dropped_backward = summary.total_dropped_backward(),
                peak_window = summary.peak_window,
                "Merge complete"
            );
            print_json(json, &summary)?;
            Ok(exit_code(summary.interrupted, true))
        }
        Commands::Verify(args) => {
            let summary = {
                let interrupt = Arc::clone(&interrupt);
                tokio::task::spawn_blocking(move || run::verify(&args, &config, interrupt))
                    .await
                    .context("Verify task panicked")??
            };
            info!(
                ok = summary.ok(),
                missing = summary.missing(),
                backward = summary.backward(),
                duplicates = summary.duplicates,
                "Verification complete"
            );
            print_json(json, &summary)?;
            Ok(exit_code(summary.interrupted, summary.is_clean()))
        }
    }
}

fn exit_code(interrupted: bool, clean: bool) -> ExitCode {
    ExitCode::from(exit_status(interrupted, clean))
}

fn exit_status(interrupted: bool, clean: bool) -> u8 {
    if interrupted {
        EXIT_INTERRUPTED
    } else if clean {
        0
    } else {
        1
    }
}

fn print_json<T: Serialize>(enabled: bool, summary: &T) -> Result<()> {
    if enabled {
        println!("{}", serde_json::to_string_pretty(summary)?);
    }
    Ok(())
}

/// Set `flag` on the first SIGINT or SIGTERM.
async fn watch_signals(flag: Arc<AtomicBool>) {
    if wait_for_shutdown().await {
        warn!("Shutdown requested, stopping after the current window");
        flag.store(true, Ordering::Relaxed);
    }
}

#[cfg(unix)]
async fn wait_for_shutdown() -> bool {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            warn!(error = %e, "Cannot listen for SIGTERM");
            return tokio::signal::ctrl_c().await.is_ok();
        }
    };
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.is_ok(),
        _ = term.recv() => true,
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> bool {
    tokio::signal::ctrl_c().await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_status(false, true), 0);
        assert_eq!(exit_status(false, false), 1);
        assert_eq!(exit_status(true, true), EXIT_INTERRUPTED);
        assert_eq!(exit_status(true, false), EXIT_INTERRUPTED);
    }

    #[tokio::test]
    async fn test_flag_untouched_without_signal() {
        let flag = Arc::new(AtomicBool::new(false));
        let watcher = tokio::spawn(watch_signals(Arc::clone(&flag)));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!flag.load(Ordering::Relaxed));
        watcher.abort();
    }

    #[tokio::test]
    async fn test_merge_on_blocking_pool_with_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let args = cli::MergeArgs {
            inputs: vec![dir.path().join("missing.dat").to_string_lossy().into_owned()],
            output: dir.path().join("out.dat").to_string_lossy().into_owned(),
            file_length: None,
        };
        let config = SampConfig {
            dedup: Some(samp_merge::DedupPolicy::Exact),
            ..SampConfig::default()
        };
        let flag = Arc::new(AtomicBool::new(false));
        let summary = tokio::task::spawn_blocking(move || run::merge(&args, &config, flag))
            .await
            .unwrap();
        let summary = tokio_test::assert_ok!(summary);
        // A missing file is an empty input; nothing to merge.
        assert_eq!(summary.emitted, 0);
        assert_eq!(summary.windows, 0);
    }
}
