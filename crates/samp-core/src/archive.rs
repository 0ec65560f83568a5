//! Text header at the start of archive files.
//!
//! ```text
//! NIDAS (ncar.ucar.edu)
//! archive version: 1
//! software version: 0.1.0
//! project name: SOCRATES
//! system name: GV_N677F
//! config name: /home/data/flight.xml
//! config version: 42
//! end header
//! ```
//!
//! The header is optional. A reader that does not find the magic line at the
//! start of a file treats the file as bare records.

use std::io::{self, BufRead, Write};

use crate::error::SampleError;

/// First line of every archive header.
pub const MAGIC: &str = "NIDAS (ncar.ucar.edu)";

/// Last line of every archive header.
const END_LINE: &str = "end header";

/// Longest header accepted before giving up on finding the end line.
const MAX_HEADER_BYTES: usize = 16 * 1024;

/// Parsed archive header fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveHeader {
    /// Archive format version.
    pub archive_version: String,
    /// Version of the software that wrote the archive.
    pub software_version: String,
    /// Project name.
    pub project: String,
    /// Acquisition system name.
    pub system: String,
    /// Name of the configuration in effect.
    pub config_name: String,
    /// Version of that configuration.
    pub config_version: String,
}

impl Default for ArchiveHeader {
    fn default() -> Self {
        Self {
            archive_version: "1".to_string(),
            software_version: env!("CARGO_PKG_VERSION").to_string(),
            project: "unknown".to_string(),
            system: "unknown".to_string(),
            config_name: "unknown".to_string(),
            config_version: "unknown".to_string(),
        }
    }
}

impl ArchiveHeader {
    /// Consume a header at the current position of `reader`, if one is there.
    ///
    /// Returns `Ok(None)` and consumes nothing when the input does not start
    /// with the magic line. Unknown keys are ignored.
    pub fn read_from<R: BufRead>(reader: &mut R) -> Result<Option<Self>, SampleError> {
        let starts_with_magic = {
            let buf = reader.fill_buf().map_err(io_error)?;
            buf.len() >= MAGIC.len() && buf.starts_with(MAGIC.as_bytes())
        };
        if !starts_with_magic {
            return Ok(None);
        }

        let mut header = ArchiveHeader::default();
        let mut consumed = 0usize;
        let mut line = String::new();
        let mut first = true;
        loop {
            line.clear();
            let n = reader.read_line(&mut line).map_err(io_error)?;
            if n == 0 {
                return Err(SampleError::InvalidArchiveHeader(
                    "end of file before 'end header'".to_string(),
                ));
            }
            consumed += n;
            if consumed > MAX_HEADER_BYTES {
                return Err(SampleError::InvalidArchiveHeader(format!(
                    "no 'end header' within {MAX_HEADER_BYTES} bytes"
                )));
            }

            let text = line.trim_end_matches(['\r', '\n']);
            if first {
                first = false;
                continue;
            }
            if text == END_LINE {
                return Ok(Some(header));
            }
            match text.split_once(':') {
                Some((key, value)) => header.set(key.trim(), value.trim()),
                None => {
                    return Err(SampleError::InvalidArchiveHeader(format!(
                        "expected 'key: value', found '{text}'"
                    )))
                }
            }
        }
    }

    /// Write the header, magic line through end line.
    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        write!(out, "{self}")
    }

    fn set(&mut self, key: &str, value: &str) {
        let field = match key {
            "archive version" => &mut self.archive_version,
            "software version" => &mut self.software_version,
            "project name" => &mut self.project,
            "system name" => &mut self.system,
            "config name" => &mut self.config_name,
            "config version" => &mut self.config_version,
            _ => return,
        };
        *field = value.to_string();
    }
}

impl std::fmt::Display for ArchiveHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{MAGIC}")?;
        writeln!(f, "archive version: {}", self.archive_version)?;
        writeln!(f, "software version: {}", self.software_version)?;
        writeln!(f, "project name: {}", self.project)?;
        writeln!(f, "system name: {}", self.system)?;
        writeln!(f, "config name: {}", self.config_name)?;
        writeln!(f, "config version: {}", self.config_version)?;
        writeln!(f, "{END_LINE}")
    }
}

fn io_error(error: io::Error) -> SampleError {
    SampleError::InvalidArchiveHeader(error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufReader, Cursor, Read};

    #[test]
    fn test_write_then_read() {
        let header = ArchiveHeader {
            project: "SOCRATES".to_string(),
            system: "GV_N677F".to_string(),
            ..ArchiveHeader::default()
        };
        let mut bytes = header.to_string().into_bytes();
        bytes.extend_from_slice(&[1, 2, 3]);

        let mut reader = BufReader::new(Cursor::new(bytes));
        let parsed = ArchiveHeader::read_from(&mut reader).unwrap();
        assert_eq!(parsed, Some(header));

        // Records start right after the end line
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, vec![1, 2, 3]);
    }

    #[test]
    fn test_no_header_consumes_nothing() {
        let mut reader = BufReader::new(Cursor::new(vec![0u8; 32]));
        assert_eq!(ArchiveHeader::read_from(&mut reader).unwrap(), None);
        assert_eq!(reader.fill_buf().unwrap().len(), 32);
    }

    #[test]
    fn test_truncated_header_is_an_error() {
        let text = format!("{MAGIC}\nproject name: X\n");
        let mut reader = BufReader::new(Cursor::new(text.into_bytes()));
        assert!(matches!(
            ArchiveHeader::read_from(&mut reader),
            Err(SampleError::InvalidArchiveHeader(_))
        ));
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let text = format!("{MAGIC}\ncolor: blue\nproject name: P\nend header\n");
        let mut reader = BufReader::new(Cursor::new(text.into_bytes()));
        let parsed = ArchiveHeader::read_from(&mut reader).unwrap().unwrap();
        assert_eq!(parsed.project, "P");
    }
}
