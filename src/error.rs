use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PasteError>;

/// Per-strip variants are recovered by the worker that hit them;
/// `ResourceAllocation` and `Io` end the run.
#[derive(Debug, Error)]
pub enum PasteError {
    /// A length, tag, payload or checksum read came up short.
    #[error("truncated input: {0}")]
    TruncatedInput(&'static str),

    #[error("malformed header chunk: {0}")]
    MalformedHeader(String),

    #[error("missing PNG signature")]
    InvalidSignature,

    #[error("expected {expected} chunk, found {found}")]
    UnexpectedChunk { expected: String, found: String },

    #[error("checksum mismatch in {tag} chunk: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        tag: String,
        stored: u32,
        computed: u32,
    },

    #[error("decompression failed: {0}")]
    Decompression(String),

    #[error("compression failed: {0}")]
    Compression(String),

    /// A fetched body exceeded the fixed per-strip slot size.
    #[error("strip payload of {size} bytes exceeds capacity of {capacity} bytes")]
    CapacityExceeded { size: usize, capacity: usize },

    #[error("strip id {id} outside of 0..{strips}")]
    StripOutOfRange { id: usize, strips: usize },

    #[error("strip header incompatible with reference: {0}")]
    IncompatibleHeader(String),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("hand-off queue no longer accepts strips")]
    HandoffClosed,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to allocate {0}")]
    ResourceAllocation(String),

    #[error("I/O failure: {0}")]
    Io(#[from] io::Error),
}
