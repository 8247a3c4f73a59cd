use std::io;

use thiserror::Error;

/// Failure kinds surfaced by [`Ingest::read`](crate::Ingest::read) and the
/// format-specific entry points.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The input file could not be opened, statted, or memory-mapped.
    #[error("i/o failure: {0}")]
    Io(#[from] io::Error),

    /// A length prefix, blob header, or blob body runs past end of file.
    #[error("input truncated at byte {offset}")]
    Truncated { offset: usize },

    /// A `BlobHeader` carried an unexpected type, or a zero datasize.
    #[error("bad blob header: {reason}")]
    BadHeader { reason: &'static str },

    /// Unknown wire type, varint overflow, or a length running past its
    /// container.
    #[error("malformed wire data: {0}")]
    MalformedWire(&'static str),

    /// Zlib failure, inflated-size mismatch, or unsupported compression.
    #[error("inflate failure: {0}")]
    Inflate(&'static str),

    /// Parallel arrays that must be equal-length were not.
    #[error("parallel array length mismatch: {0}")]
    Arity(&'static str),

    /// A handler returned `false`.
    #[error("a handler requested the decode to stop")]
    Canceled,

    /// The dispatcher could not detect the format from the file extension.
    #[error("can't detect type from: {0}")]
    UnknownFileType(String),

    /// The XML pull parser reported an error.
    #[error("xml parse failure: {0}")]
    Xml(String),
}
