//! Record framing at stream boundaries.
//!
//! Every record is a 16-byte header followed by `length` payload bytes.
//! Records are concatenated with no delimiter; the length field is the only
//! framing.
//!
//! ```text
//! offset  size  field
//!      0     8  time tag, i64 microseconds since the Unix epoch
//!      8     4  payload length in bytes, u32
//!     12     4  tag word: kind code in the top 6 bits, 26-bit SampleId below
//! ```
//!
//! Byte order is chosen by the transport, not fixed here.

use samp_pool::SampleKind;
use serde::{Deserialize, Serialize};
use std::io::{self, Write};

use crate::id::{SampleHeader, SampleId};
use crate::sample::Sample;

/// Encoded header size in bytes.
pub const HEADER_LEN: usize = 16;

/// Bit position of the kind code in the tag word.
const KIND_SHIFT: u32 = 26;

/// Byte order of encoded headers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    /// Least significant byte first.
    #[default]
    Little,
    /// Most significant byte first.
    Big,
}

impl std::str::FromStr for ByteOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "little" | "le" => Ok(ByteOrder::Little),
            "big" | "be" => Ok(ByteOrder::Big),
            other => Err(format!("unknown byte order '{other}', expected little or big")),
        }
    }
}

/// A header exactly as found on the wire, before validation.
///
/// The kind code may be unassigned and the length may exceed the pool limit;
/// [`crate::SampleFilter`] decides whether the header is usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawHeader {
    /// Time tag in microseconds.
    pub timestamp: i64,
    /// Payload length in bytes.
    pub length: u32,
    /// Kind code and id.
    pub tag: u32,
}

impl RawHeader {
    /// Decode from exactly [`HEADER_LEN`] bytes.
    #[must_use]
    pub fn decode(buf: &[u8; HEADER_LEN], order: ByteOrder) -> Self {
        let mut ts = [0u8; 8];
        let mut len = [0u8; 4];
        let mut tag = [0u8; 4];
        ts.copy_from_slice(&buf[0..8]);
        len.copy_from_slice(&buf[8..12]);
        tag.copy_from_slice(&buf[12..16]);
        match order {
            ByteOrder::Little => Self {
                timestamp: i64::from_le_bytes(ts),
                length: u32::from_le_bytes(len),
                tag: u32::from_le_bytes(tag),
            },
            ByteOrder::Big => Self {
                timestamp: i64::from_be_bytes(ts),
                length: u32::from_be_bytes(len),
                tag: u32::from_be_bytes(tag),
            },
        }
    }

    /// Encode to [`HEADER_LEN`] bytes.
    #[must_use]
    pub fn encode(&self, order: ByteOrder) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        match order {
            ByteOrder::Little => {
                out[0..8].copy_from_slice(&self.timestamp.to_le_bytes());
                out[8..12].copy_from_slice(&self.length.to_le_bytes());
                out[12..16].copy_from_slice(&self.tag.to_le_bytes());
            }
            ByteOrder::Big => {
                out[0..8].copy_from_slice(&self.timestamp.to_be_bytes());
                out[8..12].copy_from_slice(&self.length.to_be_bytes());
                out[12..16].copy_from_slice(&self.tag.to_be_bytes());
            }
        }
        out
    }

    /// The 6-bit kind code.
    #[must_use]
    pub fn kind_code(&self) -> u8 {
        (self.tag >> KIND_SHIFT) as u8
    }

    /// The kind, if the code is assigned.
    #[must_use]
    pub fn kind(&self) -> Option<SampleKind> {
        SampleKind::from_code(self.kind_code())
    }

    /// The 26-bit id.
    #[must_use]
    pub fn id(&self) -> SampleId {
        SampleId::from_raw(self.tag)
    }

    /// The validated header, if the kind code is assigned.
    #[must_use]
    pub fn to_header(&self) -> Option<SampleHeader> {
        self.kind().map(|kind| SampleHeader {
            timestamp: self.timestamp,
            length: self.length,
            id: self.id(),
            kind,
        })
    }
}

impl From<&SampleHeader> for RawHeader {
    fn from(header: &SampleHeader) -> Self {
        Self {
            timestamp: header.timestamp,
            length: header.length,
            tag: (u32::from(header.kind.code()) << KIND_SHIFT) | header.id.raw(),
        }
    }
}

/// Write one record. Returns the number of bytes written.
pub fn write_sample<W: Write>(out: &mut W, sample: &Sample, order: ByteOrder) -> io::Result<usize> {
    let header = RawHeader::from(sample.header()).encode(order);
    out.write_all(&header)?;
    out.write_all(sample.payload())?;
    Ok(HEADER_LEN + sample.payload().len())
}
