//! Error types returned by the public encode/decode entry points.

use thiserror::Error;

/// The kind of failure, mirroring the six core kinds of the codestream
/// error model. Each variant carries the detail needed to locate the
/// problem without a separate side channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Jpeg2000Error {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("truncated codestream: ran out of bytes while decoding tile {tile_index}")]
    Truncated { tile_index: u32 },

    #[error("malformed marker 0x{marker_code:04X} at byte offset {offset}: {detail}")]
    MalformedMarker {
        marker_code: u16,
        offset: usize,
        detail: String,
    },

    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    #[error("rate budget exceeded: requested {requested} bytes, minimum achievable {minimum}")]
    RateBudgetExceeded { requested: usize, minimum: usize },

    #[error("operation cancelled")]
    Cancelled,
}

/// A recoverable decode anomaly, surfaced alongside a successful result
/// when the caller opted into `tolerate_truncation`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeWarning {
    /// An unknown marker code was skipped by its length field.
    UnknownMarker { marker_code: u16, offset: usize },
    /// A tile could not be fully decoded and was replaced with zero samples.
    TileReplacedWithZero { tile_index: u32 },
}

pub type Jpeg2000Result<T> = Result<T, Jpeg2000Error>;
