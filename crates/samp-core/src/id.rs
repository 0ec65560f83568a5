//! Sample identity and ordering.
//!
//! A [`SampleId`] names the originating unit and sample group: a 10-bit
//! station ("DSM") id and a 16-bit sensor/sample ("SPS") id packed into a
//! 26-bit field. The merge window orders samples by [`SampleKey`]:
//! time tag first, then id, then byte length.

use samp_pool::SampleKind;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::time::format_usecs;

/// Bits holding the sample/sensor id.
const SPS_BITS: u32 = 16;

/// Mask of the full 26-bit id.
const ID_MASK: u32 = 0x03FF_FFFF;

/// Mask of the station id once shifted down.
const DSM_MASK: u32 = 0x03FF;

/// Mask of the sample/sensor id.
const SPS_MASK: u32 = 0xFFFF;

/// Composite source identifier: station id and sample id.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SampleId(u32);

impl SampleId {
    /// Largest station id.
    pub const MAX_DSM_ID: u16 = DSM_MASK as u16;

    /// Build an id from its two sub-fields. `dsm` is truncated to 10 bits.
    #[must_use]
    pub const fn new(dsm: u16, sps: u16) -> Self {
        Self((((dsm as u32) & DSM_MASK) << SPS_BITS) | sps as u32)
    }

    /// Reinterpret a packed id. Bits above the 26-bit field are discarded.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw & ID_MASK)
    }

    /// The packed 26-bit value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Station id.
    #[must_use]
    pub const fn dsm_id(self) -> u16 {
        ((self.0 >> SPS_BITS) & DSM_MASK) as u16
    }

    /// Sample/sensor id within the station.
    #[must_use]
    pub const fn sps_id(self) -> u16 {
        (self.0 & SPS_MASK) as u16
    }

    /// Replace the station id.
    pub fn set_dsm_id(&mut self, dsm: u16) {
        *self = Self::new(dsm, self.sps_id());
    }

    /// Replace the sample/sensor id.
    pub fn set_sps_id(&mut self, sps: u16) {
        *self = Self::new(self.dsm_id(), sps);
    }
}

impl fmt::Display for SampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.dsm_id(), self.sps_id())
    }
}

/// Fixed-size header carried by every sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SampleHeader {
    /// Microseconds since the Unix epoch.
    pub timestamp: i64,
    /// Logical payload length in bytes.
    pub length: u32,
    /// Originating source.
    pub id: SampleId,
    /// Payload element type.
    pub kind: SampleKind,
}

impl SampleHeader {
    /// Ordering key of this header.
    #[must_use]
    pub fn key(&self) -> SampleKey {
        SampleKey {
            timestamp: self.timestamp,
            id: self.id,
            length: self.length,
        }
    }
}

/// Ordering and deduplication key: `(timestamp, id, length)`.
///
/// The derived ordering compares fields in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SampleKey {
    /// Microseconds since the Unix epoch.
    pub timestamp: i64,
    /// Originating source.
    pub id: SampleId,
    /// Payload length in bytes.
    pub length: u32,
}

impl SampleKey {
    /// Smallest key with the given time tag.
    ///
    /// Every key with a time tag below `timestamp` compares less than this.
    #[must_use]
    pub const fn first_at(timestamp: i64) -> Self {
        Self {
            timestamp,
            id: SampleId(0),
            length: 0,
        }
    }
}

impl fmt::Display for SampleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} id={} len={}",
            format_usecs(self.timestamp),
            self.id,
            self.length
        )
    }
}
