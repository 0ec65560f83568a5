//! Encoding the merged stream to files or a byte stream.
//!
//! Output is an archive header followed by concatenated records. With a file
//! name pattern and a non-zero file length, output rolls over to a new file
//! whenever a sample crosses a file-length boundary; each file is named from
//! its boundary time and starts with its own copy of the archive header.

use samp_core::codec::write_sample;
use samp_core::time::{duration_usecs, floor_to, format_with};
use samp_core::{ArchiveHeader, ByteOrder, Sample, SampleError};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::sink::SampleSink;

/// Write buffer size.
const WRITE_BUFFER_BYTES: usize = 256 * 1024;

/// Counters for one output stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputStats {
    /// Samples written.
    pub samples: u64,
    /// Bytes written, headers and payloads.
    pub bytes: u64,
    /// Files created.
    pub files: u64,
}

enum Target {
    Pattern { pattern: String, file_length: i64 },
    Writer(Option<Box<dyn Write + Send>>),
}

/// Sink writing encoded records.
pub struct SampleOutputStream {
    name: String,
    target: Target,
    order: ByteOrder,
    header: ArchiveHeader,
    current: Option<BufWriter<Box<dyn Write + Send>>>,
    next_boundary: i64,
    start_time: Option<i64>,
    created: Vec<PathBuf>,
    stats: OutputStats,
}

impl SampleOutputStream {
    /// Write to files named by `pattern`, a `strftime` template.
    ///
    /// A zero `file_length` writes one file, named from the first sample's
    /// time.
    #[must_use]
    pub fn create(pattern: impl Into<String>, file_length: Duration) -> Self {
        let pattern = pattern.into();
        Self::new(
            pattern.clone(),
            Target::Pattern {
                pattern,
                file_length: duration_usecs(file_length),
            },
        )
    }

    /// Write to an already open byte stream.
    pub fn to_writer<W>(name: impl Into<String>, writer: W) -> Self
    where
        W: Write + Send + 'static,
    {
        Self::new(name.into(), Target::Writer(Some(Box::new(writer))))
    }

    fn new(name: String, target: Target) -> Self {
        Self {
            name,
            target,
            order: ByteOrder::default(),
            header: ArchiveHeader::default(),
            current: None,
            next_boundary: i64::MIN,
            start_time: None,
            created: Vec::new(),
            stats: OutputStats::default(),
        }
    }

    /// Byte order of record headers.
    #[must_use]
    pub fn with_byte_order(mut self, order: ByteOrder) -> Self {
        self.order = order;
        self
    }

    /// Archive header written at the start of each file.
    pub fn set_header(&mut self, header: ArchiveHeader) {
        self.header = header;
    }

    /// Time used to name the file of a run that writes no samples.
    pub fn set_start_time(&mut self, start: Option<i64>) {
        self.start_time = start;
    }

    /// Name for logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Files created so far, in order.
    #[must_use]
    pub fn files(&self) -> &[PathBuf] {
        &self.created
    }

    /// Counters so far.
    #[must_use]
    pub fn stats(&self) -> OutputStats {
        self.stats
    }

    /// Make sure a destination is open for a sample at `timestamp`.
    fn ensure_open(&mut self, timestamp: i64) -> Result<(), SampleError> {
        let file_length = match &self.target {
            Target::Writer(_) => {
                if self.current.is_none() {
                    self.open_writer()?;
                }
                return Ok(());
            }
            Target::Pattern { file_length, .. } => *file_length,
        };

        let roll = file_length > 0 && timestamp >= self.next_boundary;
        if self.current.is_some() && !roll {
            return Ok(());
        }

        let file_start = if file_length > 0 {
            floor_to(timestamp, file_length)
        } else {
            timestamp
        };
        self.close_current()?;
        self.open_file(file_start)?;
        self.next_boundary = if file_length > 0 {
            file_start.saturating_add(file_length)
        } else {
            i64::MAX
        };
        Ok(())
    }

    fn open_writer(&mut self) -> Result<(), SampleError> {
        let Target::Writer(writer) = &mut self.target else {
            return Ok(());
        };
        let Some(writer) = writer.take() else {
            return Err(SampleError::Sink(std::io::Error::other(
                "output stream already finished",
            )));
        };
        self.start(BufWriter::with_capacity(WRITE_BUFFER_BYTES, writer))
    }

    fn open_file(&mut self, file_start: i64) -> Result<(), SampleError> {
        let Target::Pattern { pattern, .. } = &self.target else {
            return Ok(());
        };
        let path = PathBuf::from(format_with(file_start, pattern));
        let file = File::create(&path).map_err(SampleError::Sink)?;
        info!(output = %path.display(), "Opened output file");
        self.created.push(path);
        self.stats.files += 1;
        let writer: Box<dyn Write + Send> = Box::new(file);
        self.start(BufWriter::with_capacity(WRITE_BUFFER_BYTES, writer))
    }

    fn start(&mut self, mut writer: BufWriter<Box<dyn Write + Send>>) -> Result<(), SampleError> {
        let text = self.header.to_string();
        writer.write_all(text.as_bytes()).map_err(SampleError::Sink)?;
        self.stats.bytes += text.len() as u64;
        self.current = Some(writer);
        Ok(())
    }

    fn close_current(&mut self) -> Result<(), SampleError> {
        if let Some(mut writer) = self.current.take() {
            writer.flush().map_err(SampleError::Sink)?;
        }
        Ok(())
    }
}

impl SampleSink for SampleOutputStream {
    fn receive(&mut self, sample: &Sample) -> Result<(), SampleError> {
        self.ensure_open(sample.timestamp())?;
        let Some(writer) = self.current.as_mut() else {
            return Err(SampleError::Sink(std::io::Error::other("no output open")));
        };
        let n = write_sample(writer, sample, self.order).map_err(SampleError::Sink)?;
        self.stats.samples += 1;
        self.stats.bytes += n as u64;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SampleError> {
        // An empty run still leaves a valid, header-only stream behind.
        if self.current.is_none() && self.stats.files == 0 {
            let to_files = matches!(self.target, Target::Pattern { .. });
            match self.start_time {
                Some(start) if to_files => self.ensure_open(start)?,
                None if to_files => {
                    warn!(output = %self.name, "No samples and no start time, no output file written");
                }
                _ => {
                    if matches!(self.target, Target::Writer(Some(_))) {
                        self.open_writer()?;
                    }
                }
            }
        }
        self.close_current()?;
        debug!(
            output = %self.name,
            samples = self.stats.samples,
            bytes = self.stats.bytes,
            files = self.stats.files,
            "Output finished"
        );
        Ok(())
    }
}

impl std::fmt::Debug for SampleOutputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleOutputStream")
            .field("name", &self.name)
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input_stream::SampleInputStream;
    use crate::reader::StreamReader;
    use crate::FileSet;
    use samp_core::time::{parse_time, secs};
    use samp_core::{BufferPool, SampleId, SampleKind};
    use tempfile::tempdir;

    fn sample(ts: i64) -> Sample {
        Sample::from_vec(ts, SampleId::new(1, 1), SampleKind::Char, vec![1, 2, 3]).unwrap()
    }

    #[test]
    fn test_single_file_from_first_sample_time() {
        let dir = tempdir().unwrap();
        let pattern = dir.path().join("out_%Y%m%d_%H%M%S.dat");
        let t0 = parse_time("2024-03-05T10:20:30Z").unwrap();

        let mut out = SampleOutputStream::create(pattern.to_string_lossy(), Duration::ZERO);
        for i in 0..5 {
            out.receive(&sample(t0 + secs(i * 1000))).unwrap();
        }
        out.finish().unwrap();

        assert_eq!(out.files().len(), 1);
        assert!(out.files()[0].ends_with("out_20240305_102030.dat"));
        assert_eq!(out.stats().samples, 5);
    }

    #[test]
    fn test_rolls_on_file_length_boundaries() {
        let dir = tempdir().unwrap();
        let pattern = dir.path().join("out_%H%M%S.dat");
        let t0 = parse_time("2024-03-05T10:59:58Z").unwrap();

        let mut out = SampleOutputStream::create(pattern.to_string_lossy(), Duration::from_secs(3600));
        for i in 0..4 {
            out.receive(&sample(t0 + secs(i))).unwrap();
        }
        out.finish().unwrap();

        let names: Vec<String> = out
            .files()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["out_100000.dat", "out_110000.dat"]);

        // Each file carries its own header and reads back on its own
        let mut second = SampleInputStream::open(FileSet::from_paths([&out.files()[1]]), BufferPool::new());
        let mut n = 0;
        while second.read().unwrap().is_some() {
            n += 1;
        }
        assert_eq!(n, 2);
        assert!(second.archive_header().is_some());
    }

    #[test]
    fn test_empty_pattern_output_named_from_start() {
        let dir = tempdir().unwrap();
        let pattern = dir.path().join("out_%Y%m%d_%H%M%S.dat");
        let start = parse_time("2024-03-05T10:20:30Z").unwrap();

        let mut out = SampleOutputStream::create(pattern.to_string_lossy(), Duration::from_secs(3600));
        out.set_start_time(Some(start));
        out.finish().unwrap();

        assert_eq!(out.files().len(), 1);
        assert!(out.files()[0].ends_with("out_20240305_100000.dat"));
        let text = std::fs::read_to_string(&out.files()[0]).unwrap();
        assert!(text.ends_with("end header\n"));
        assert_eq!(out.stats().samples, 0);
    }

    #[test]
    fn test_empty_pattern_output_without_start_creates_nothing() {
        let dir = tempdir().unwrap();
        let pattern = dir.path().join("out_%Y%m%d.dat");
        let mut out = SampleOutputStream::create(pattern.to_string_lossy(), Duration::ZERO);
        out.finish().unwrap();
        assert!(out.files().is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_empty_writer_output_is_header_only() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.dat");
        let mut out = SampleOutputStream::to_writer("empty", File::create(&path).unwrap());
        out.finish().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with(samp_core::archive::MAGIC));
        assert!(text.ends_with("end header\n"));
    }
}
