//! Decoding sample records from byte streams and archive files.
//!
//! [`SampleInputStream`] reads concatenated records from a sequence of
//! segments: the files of a [`FileSet`], or a single arbitrary byte stream.
//! At the start of each segment an optional archive header is consumed.
//!
//! ## Resync
//!
//! Each header is screened by a [`SampleFilter`] before its payload is read.
//! A rejected header is assumed to be misaligned garbage: the reader drops
//! the first byte, reads one more, and screens again, until a plausible
//! header turns up. Rejections are counted and logged on the first and every
//! 1000th occurrence.
//!
//! ## Segment failures
//!
//! - A missing file is skipped with a warning.
//! - A record cut short at the end of a file is discarded and the next file
//!   is opened.
//! - Any other I/O error ends the stream with [`SampleError::SourceIo`].

use samp_core::limits::BAD_HEADER_REPORT_INTERVAL;
use samp_core::{
    acquire, ArchiveHeader, BufferPool, ByteOrder, RawHeader, Sample, SampleError, SampleFilter,
    HEADER_LEN,
};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::fileset::FileSet;
use crate::reader::StreamReader;
use crate::report::should_report;

/// Read buffer size per segment.
const READ_BUFFER_BYTES: usize = 64 * 1024;

/// Counters for one input stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputStats {
    /// Samples decoded.
    pub samples: u64,
    /// Bytes consumed, headers and payloads.
    pub bytes: u64,
    /// Headers rejected by the filter.
    pub bad_headers: u64,
    /// Segments opened.
    pub segments: u64,
    /// Files that did not exist.
    pub missing_files: u64,
    /// Records cut short at the end of a segment.
    pub truncated: u64,
}

/// A source of records, one segment at a time.
enum Segments {
    Files(VecDeque<PathBuf>),
    Stream(Option<Box<dyn Read + Send>>),
}

/// Outcome of filling a buffer from the current segment.
enum Fill {
    Full,
    /// End of segment after this many bytes.
    Short(usize),
}

/// Decodes records from files or a byte stream.
pub struct SampleInputStream {
    name: String,
    pool: BufferPool,
    order: ByteOrder,
    filter: SampleFilter,
    segments: Segments,
    current: Option<Box<dyn BufRead + Send>>,
    current_name: String,
    header: Option<ArchiveHeader>,
    stats: InputStats,
}

impl SampleInputStream {
    /// Read the files of `files` in order.
    #[must_use]
    pub fn open(files: FileSet, pool: BufferPool) -> Self {
        Self::new(
            files.name().to_string(),
            Segments::Files(files.paths().iter().cloned().collect()),
            pool,
        )
    }

    /// Read a single byte stream, such as a socket or pipe.
    pub fn from_reader<R>(name: impl Into<String>, reader: R, pool: BufferPool) -> Self
    where
        R: Read + Send + 'static,
    {
        Self::new(name.into(), Segments::Stream(Some(Box::new(reader))), pool)
    }

    fn new(name: String, segments: Segments, pool: BufferPool) -> Self {
        Self {
            current_name: name.clone(),
            name,
            pool,
            order: ByteOrder::default(),
            filter: SampleFilter::default(),
            segments,
            current: None,
            header: None,
            stats: InputStats::default(),
        }
    }

    /// Byte order of record headers.
    #[must_use]
    pub fn with_byte_order(mut self, order: ByteOrder) -> Self {
        self.order = order;
        self
    }

    /// Header screening rules.
    #[must_use]
    pub fn with_filter(mut self, filter: SampleFilter) -> Self {
        self.filter = filter;
        self
    }

    /// First archive header found, once the first segment has been opened.
    #[must_use]
    pub fn archive_header(&self) -> Option<&ArchiveHeader> {
        self.header.as_ref()
    }

    /// Open the first segment now and return its archive header, if any.
    pub fn read_archive_header(&mut self) -> Result<Option<&ArchiveHeader>, SampleError> {
        if self.current.is_none() {
            self.next_segment()?;
        }
        Ok(self.header.as_ref())
    }

    /// Counters so far.
    #[must_use]
    pub fn stats(&self) -> InputStats {
        self.stats
    }

    /// Open the next segment. Returns `false` when none are left.
    fn next_segment(&mut self) -> Result<bool, SampleError> {
        self.current = None;
        loop {
            let (name, reader) = match &mut self.segments {
                Segments::Stream(stream) => match stream.take() {
                    Some(reader) => (self.name.clone(), reader),
                    None => return Ok(false),
                },
                Segments::Files(paths) => {
                    let Some(path) = paths.pop_front() else {
                        return Ok(false);
                    };
                    let name = path.display().to_string();
                    match File::open(&path) {
                        Ok(file) => (name, Box::new(file) as Box<dyn Read + Send>),
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {
                            warn!(stream = %self.name, file = %name, "Input file not found, skipping");
                            self.stats.missing_files += 1;
                            continue;
                        }
                        Err(e) => return Err(SampleError::source_io(name, e)),
                    }
                }
            };

            let mut reader = BufReader::with_capacity(READ_BUFFER_BYTES, reader);
            let header = ArchiveHeader::read_from(&mut reader)?;
            if let Some(header) = header {
                debug!(stream = %self.name, segment = %name, project = %header.project, "Read archive header");
                if self.header.is_none() {
                    self.header = Some(header);
                }
            }
            info!(stream = %self.name, segment = %name, "Opened input segment");
            self.stats.segments += 1;
            self.current_name = name;
            self.current = Some(Box::new(reader));
            return Ok(true);
        }
    }

    /// Fill `buf` from the current segment.
    fn fill(&mut self, buf: &mut [u8]) -> Result<Fill, SampleError> {
        let Some(reader) = self.current.as_mut() else {
            return Ok(Fill::Short(0));
        };
        let mut filled = 0;
        while filled < buf.len() {
            match reader.read(&mut buf[filled..]) {
                Ok(0) => return Ok(Fill::Short(filled)),
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(SampleError::source_io(self.current_name.clone(), e)),
            }
        }
        self.stats.bytes += buf.len() as u64;
        Ok(Fill::Full)
    }

    /// Decode the next record, crossing segment boundaries as needed.
    fn read_record(&mut self) -> Result<Sample, SampleError> {
        if self.current.is_none() && !self.next_segment()? {
            return Err(SampleError::end_of_stream(self.name.clone()));
        }

        let mut head = [0u8; HEADER_LEN];
        let mut have = 0usize;
        loop {
            match self.fill(&mut head[have..])? {
                Fill::Full => {}
                Fill::Short(n) => {
                    if have + n > 0 {
                        self.truncated(have + n);
                    }
                    if !self.next_segment()? {
                        return Err(SampleError::end_of_stream(self.name.clone()));
                    }
                    have = 0;
                    continue;
                }
            }

            let raw = RawHeader::decode(&head, self.order);
            let Some(header) = self.filter.check(&raw) else {
                self.stats.bad_headers += 1;
                if should_report(self.stats.bad_headers, BAD_HEADER_REPORT_INTERVAL) {
                    warn!(
                        stream = %self.name,
                        bad_headers = self.stats.bad_headers,
                        reason = %self.filter.explain(&raw),
                        "Bad sample header, resyncing"
                    );
                }
                head.copy_within(1.., 0);
                have = HEADER_LEN - 1;
                continue;
            };

            let mut builder = acquire(&self.pool, header.kind, header.length as usize)?;
            builder.set_timestamp(header.timestamp).set_id(header.id);
            match self.fill(builder.payload_mut())? {
                Fill::Full => {}
                Fill::Short(n) => {
                    self.truncated(HEADER_LEN + n);
                    if !self.next_segment()? {
                        return Err(SampleError::end_of_stream(self.name.clone()));
                    }
                    have = 0;
                    continue;
                }
            }
            self.stats.samples += 1;
            return Ok(builder.freeze());
        }
    }

    fn truncated(&mut self, bytes: usize) {
        self.stats.truncated += 1;
        warn!(
            stream = %self.name,
            segment = %self.current_name,
            bytes,
            "Partial record at end of segment discarded"
        );
    }
}

impl StreamReader for SampleInputStream {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self) -> Result<Option<Sample>, SampleError> {
        match self.read_record() {
            Ok(sample) => Ok(Some(sample)),
            Err(e) if e.is_end_of_stream() => {
                debug!(stream = %self.name, samples = self.stats.samples, "End of input");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for SampleInputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleInputStream")
            .field("name", &self.name)
            .field("order", &self.order)
            .field("stats", &self.stats)
            .finish()
    }
}
