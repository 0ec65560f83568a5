//! Pool error type.

use thiserror::Error;

/// A capacity request exceeded what the wire length field can describe.
///
/// Fatal to the single allocation request only; the pool stays usable.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("requested sample length {requested} exceeds maximum of {max} bytes")]
pub struct LengthError {
    /// Number of bytes asked for.
    pub requested: usize,
    /// Largest permitted length.
    pub max: usize,
}
