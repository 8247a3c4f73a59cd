//! The parallel PBF decoding pipeline: a single-threaded framer walks the
//! memory-mapped file and fills a work queue, then a fixed worker pool
//! inflates and decodes blocks, emitting entity batches to the handlers.

pub(crate) mod blob;
pub(crate) mod block;
pub(crate) mod pool;

use std::fs::File;
use std::path::Path;

use log::{info, warn};
use memmap2::{Advice, Mmap};

use crate::error::IngestError;
use crate::ingest::Ingest;

use self::blob::iterator::BlobIterator;

pub(crate) fn read(ctx: &Ingest<'_>, path: &Path) -> Result<(), IngestError> {
    let file = File::open(path)?;
    let map = unsafe { Mmap::map(&file)? };

    if let Err(err) = map.advise(Advice::Sequential) {
        warn!("could not advise memory: {err}");
    }

    // The queue is fully populated before any worker starts.
    let items = BlobIterator::new(&map).collect::<Result<Vec<_>, _>>()?;
    info!("framed {} blocks from {}", items.len(), path.display());

    pool::run(ctx, &map, items)
}
