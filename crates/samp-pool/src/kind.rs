//! Payload element kinds.
//!
//! Every sample carries a kind tag that fixes the element size used when its
//! payload is addressed as typed values. The pool is sharded by kind so that
//! producers of unrelated kinds never contend on the same free lists.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Element type of a sample payload.
///
/// The discriminants are the 6-bit wire codes stored in the top bits of a
/// sample's id word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum SampleKind {
    /// Raw bytes, usually undecoded sensor output.
    Char = 0,
    /// Unsigned bytes.
    UChar = 1,
    /// Signed 16-bit integers.
    Short = 2,
    /// Unsigned 16-bit integers.
    UShort = 3,
    /// Signed 32-bit integers.
    Int32 = 4,
    /// Unsigned 32-bit integers.
    UInt32 = 5,
    /// 32-bit IEEE floats.
    Float = 6,
    /// 64-bit IEEE floats.
    Double = 7,
    /// Signed 64-bit integers.
    Int64 = 8,
}

impl SampleKind {
    /// Number of kinds, and therefore of pool shards.
    pub const COUNT: usize = 9;

    /// All kinds in wire-code order.
    pub const ALL: [SampleKind; Self::COUNT] = [
        SampleKind::Char,
        SampleKind::UChar,
        SampleKind::Short,
        SampleKind::UShort,
        SampleKind::Int32,
        SampleKind::UInt32,
        SampleKind::Float,
        SampleKind::Double,
        SampleKind::Int64,
    ];

    /// Size in bytes of one payload element.
    #[must_use]
    pub const fn element_size(self) -> usize {
        match self {
            SampleKind::Char | SampleKind::UChar => 1,
            SampleKind::Short | SampleKind::UShort => 2,
            SampleKind::Int32 | SampleKind::UInt32 | SampleKind::Float => 4,
            SampleKind::Double | SampleKind::Int64 => 8,
        }
    }

    /// Wire code of this kind.
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Look up a kind by wire code. Codes 9..=63 are unassigned.
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(SampleKind::Char),
            1 => Some(SampleKind::UChar),
            2 => Some(SampleKind::Short),
            3 => Some(SampleKind::UShort),
            4 => Some(SampleKind::Int32),
            5 => Some(SampleKind::UInt32),
            6 => Some(SampleKind::Float),
            7 => Some(SampleKind::Double),
            8 => Some(SampleKind::Int64),
            _ => None,
        }
    }

    /// Shard index used by the pool.
    #[inline]
    pub(crate) const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for SampleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SampleKind::Char => "char",
            SampleKind::UChar => "uchar",
            SampleKind::Short => "short",
            SampleKind::UShort => "ushort",
            SampleKind::Int32 => "int32",
            SampleKind::UInt32 => "uint32",
            SampleKind::Float => "float",
            SampleKind::Double => "double",
            SampleKind::Int64 => "int64",
        };
        write!(f, "{}", label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip() {
        for kind in SampleKind::ALL {
            assert_eq!(SampleKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(SampleKind::from_code(9), None);
        assert_eq!(SampleKind::from_code(63), None);
    }

    #[test]
    fn test_element_sizes() {
        assert_eq!(SampleKind::Char.element_size(), 1);
        assert_eq!(SampleKind::UShort.element_size(), 2);
        assert_eq!(SampleKind::Float.element_size(), 4);
        assert_eq!(SampleKind::Int64.element_size(), 8);
    }
}
