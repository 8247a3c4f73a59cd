//! Work items handed from the framer to the worker pool.

use std::ops::Range;

/// Which parser a framed blob is destined for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlobKind {
    Header,
    Primitive,
}

/// A framed `Blob` payload: a byte range in the mapped file, its destination
/// parser, and the source block ordinal.
#[derive(Debug, Clone)]
pub(crate) struct BlobItem {
    pub range: Range<usize>,
    pub kind: BlobKind,
    pub index: u64,
}
