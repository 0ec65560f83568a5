//! The blocking bodies of `samp merge` and `samp verify`.

use anyhow::{Context, Result};
use samp_core::{ArchiveHeader, BufferPool, SampleFilter};
use samp_merge::{
    FileSet, MergeConfig, MergeEngine, MergeSummary, SampleInputStream, SampleOutputStream,
    StreamReader, StreamVerifier, ThreadedReader, VerifyConfig, VerifySummary, WindowProgress,
};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cli::{group_args, MergeArgs, VerifyArgs};
use crate::config::SampConfig;

/// Readers for every input group, plus the first archive header seen.
struct OpenedInputs {
    readers: Vec<Box<dyn StreamReader>>,
    header: Option<ArchiveHeader>,
}

fn open_group(
    group: &str,
    config: &SampConfig,
    pool: &BufferPool,
    filter: &SampleFilter,
) -> Result<SampleInputStream> {
    let (start, end) = config.time_range()?;
    let files = FileSet::from_args(&group_args(group), start, end)
        .with_context(|| format!("Cannot expand input '{group}'"))?;
    if files.is_empty() {
        warn!(input = %group, "No files selected for input");
    }
    info!(input = %files.name(), files = files.paths().len(), "Input opened");
    Ok(SampleInputStream::open(files, pool.clone())
        .with_byte_order(config.byte_order)
        .with_filter(filter.clone()))
}

fn into_reader(stream: SampleInputStream, config: &SampConfig) -> Result<Box<dyn StreamReader>> {
    if config.threaded_readers {
        let reader = ThreadedReader::spawn(stream, config.channel_capacity)
            .context("Cannot start reader thread")?;
        Ok(Box::new(reader))
    } else {
        Ok(Box::new(stream))
    }
}

fn open_inputs(
    groups: &[String],
    config: &SampConfig,
    pool: &BufferPool,
    filter: &SampleFilter,
) -> Result<OpenedInputs> {
    let mut opened = OpenedInputs {
        readers: Vec::with_capacity(groups.len()),
        header: None,
    };
    for group in groups {
        let mut stream = open_group(group, config, pool, filter)?;
        if opened.header.is_none() {
            opened.header = stream
                .read_archive_header()
                .with_context(|| format!("Cannot read header of '{group}'"))?
                .cloned();
        }
        opened.readers.push(into_reader(stream, config)?);
    }
    Ok(opened)
}

/// Merge every input group into the output.
pub fn merge(args: &MergeArgs, config: &SampConfig, interrupt: Arc<AtomicBool>) -> Result<MergeSummary> {
    let policy = config.dedup_policy()?;
    let (start, end) = config.time_range()?;
    let pool = BufferPool::new();
    let filter = config.sample_filter()?;
    let opened = open_inputs(&args.inputs, config, &pool, &filter)?;

    let merge_config = MergeConfig::new(config.read_ahead, policy)
        .with_start(start)
        .with_end(end)
        .with_backward_report_interval(config.backward_report_interval);
    let mut engine = MergeEngine::new(merge_config);
    engine.set_interrupt(interrupt);
    for reader in opened.readers {
        engine.add_boxed_input(reader);
    }

    let mut output = SampleOutputStream::create(args.output.as_str(), config.file_length)
        .with_byte_order(config.byte_order);
    output.set_header(opened.header.unwrap_or_default());
    output.set_start_time(start);

    println!("{}", WindowProgress::header(engine.input_count()));
    let summary = engine
        .run_with(&mut output, |progress| println!("{progress}"))
        .with_context(|| format!("Merge into '{}' failed", output.name()))?;

    let stats = output.stats();
    info!(
        samples = stats.samples,
        bytes = stats.bytes,
        files = stats.files,
        "Output written"
    );
    drop(engine);
    pool.teardown();
    Ok(summary)
}

/// Check the merged archive against every input group.
pub fn verify(args: &VerifyArgs, config: &SampConfig, interrupt: Arc<AtomicBool>) -> Result<VerifySummary> {
    let (start, end) = config.time_range()?;
    let pool = BufferPool::new();

    let mut verify_config = VerifyConfig::new(config.read_ahead).with_range(start, end);
    verify_config.backward_report_interval = config.backward_report_interval;
    verify_config.duplicate_report_interval = config.duplicate_report_interval;

    let mut filter = verify_config.input_filter();
    if !config.filter.trim().is_empty() {
        filter.set_rules(&config.filter)?;
    }

    let reference = into_reader(open_group(&args.merged, config, &pool, &filter)?, config)?;
    let opened = open_inputs(&args.inputs, config, &pool, &filter)?;

    let mut verifier = StreamVerifier::new(verify_config, reference);
    verifier.set_interrupt(interrupt);
    for reader in opened.readers {
        verifier.add_boxed_input(reader);
    }

    let summary = verifier.run_with(|event| eprintln!("{event}"), |window| println!("{window}"))?;
    drop(verifier);
    pool.teardown();
    Ok(summary)
}
