//! The decode context: handler set, options, and the observable globals.

use std::cell::Cell;
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread;

use log::error;

use crate::error::IngestError;
use crate::model::{Node, Relation, Way};
use crate::{pbf, xml};

pub(crate) type NodeHandler<'h> = Box<dyn for<'a> Fn(&'a [Node<'a>]) -> bool + Send + Sync + 'h>;
pub(crate) type WayHandler<'h> = Box<dyn for<'a> Fn(&'a [Way<'a>]) -> bool + Send + Sync + 'h>;
pub(crate) type RelationHandler<'h> =
    Box<dyn for<'a> Fn(&'a [Relation<'a>]) -> bool + Send + Sync + 'h>;

/// Decode configuration: which handlers to call, whether to decode entity
/// metadata, and how many workers drain the PBF block queue.
///
/// Handlers receive batches, are called concurrently from worker threads on
/// the PBF path, and return `false` to stop the decode. An absent handler
/// skips that entity category.
pub struct Ingest<'h> {
    pub(crate) decode_metadata: bool,
    threads: usize,
    pub(crate) nodes: Option<NodeHandler<'h>>,
    pub(crate) ways: Option<WayHandler<'h>>,
    pub(crate) relations: Option<RelationHandler<'h>>,
}

impl<'h> Ingest<'h> {
    pub fn new() -> Self {
        Ingest {
            decode_metadata: false,
            threads: 1,
            nodes: None,
            ways: None,
            relations: None,
        }
    }

    /// Populate version/timestamp/changeset on decoded entities. Off by
    /// default; the fields read zero when disabled.
    pub fn decode_metadata(mut self, decode: bool) -> Self {
        self.decode_metadata = decode;
        self
    }

    /// Worker count for the PBF path, clamped to `[1, hardware parallelism]`.
    /// Defaults to 1, which drains the queue on the calling thread.
    pub fn threads(mut self, count: usize) -> Self {
        self.threads = count.clamp(1, hardware_parallelism());
        self
    }

    /// Use one worker per hardware thread.
    pub fn max_threads(self) -> Self {
        self.threads(hardware_parallelism())
    }

    /// The current (clamped) worker count setting.
    pub fn thread_count(&self) -> usize {
        self.threads
    }

    pub fn on_nodes<F>(mut self, handler: F) -> Self
    where
        F: for<'a> Fn(&'a [Node<'a>]) -> bool + Send + Sync + 'h,
    {
        self.nodes = Some(Box::new(handler));
        self
    }

    pub fn on_ways<F>(mut self, handler: F) -> Self
    where
        F: for<'a> Fn(&'a [Way<'a>]) -> bool + Send + Sync + 'h,
    {
        self.ways = Some(Box::new(handler));
        self
    }

    pub fn on_relations<F>(mut self, handler: F) -> Self
    where
        F: for<'a> Fn(&'a [Relation<'a>]) -> bool + Send + Sync + 'h,
    {
        self.relations = Some(Box::new(handler));
        self
    }

    /// Detect the format from the file extension and decode. `.pbf` routes to
    /// the parallel PBF pipeline, `.osm`/`.osc` to the XML adapter.
    pub fn read<P: AsRef<Path>>(&self, path: P) -> Result<(), IngestError> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|extension| extension.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("pbf") => self.read_pbf(path),
            Some("osm") | Some("osc") => self.read_xml(path),
            _ => {
                error!("can't detect type from: {}", path.display());
                Err(IngestError::UnknownFileType(path.display().to_string()))
            }
        }
    }

    /// Decode a PBF file on the configured worker pool.
    pub fn read_pbf<P: AsRef<Path>>(&self, path: P) -> Result<(), IngestError> {
        set_file_type(FileType::Pbf);
        pbf::read(self, path.as_ref())
    }

    /// Decode an OSM XML or OSC change file on the calling thread.
    pub fn read_xml<P: AsRef<Path>>(&self, path: P) -> Result<(), IngestError> {
        set_file_type(FileType::Xml);
        xml::read(self, path.as_ref())
    }
}

impl Default for Ingest<'_> {
    fn default() -> Self {
        Self::new()
    }
}

fn hardware_parallelism() -> usize {
    thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

/// Which section of an OSC change file is being parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OscMode {
    Bulk,
    Create,
    Modify,
    Delete,
}

/// The format the dispatcher detected for the current decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Pbf = 0,
    Xml = 1,
}

thread_local! {
    static THREAD_INDEX: Cell<usize> = const { Cell::new(0) };
    static BLOCK_INDEX: Cell<u64> = const { Cell::new(0) };
    static OSC_MODE: Cell<OscMode> = const { Cell::new(OscMode::Bulk) };
}

static FILE_TYPE: AtomicU8 = AtomicU8::new(FileType::Xml as u8);

/// Worker slot of the calling thread, in `[0, thread_count)`. Useful for
/// sharding handler-side accumulators.
pub fn thread_index() -> usize {
    THREAD_INDEX.with(Cell::get)
}

pub(crate) fn set_thread_index(index: usize) {
    THREAD_INDEX.with(|cell| cell.set(index));
}

/// Source ordinal of the block the calling worker is decoding.
pub fn block_index() -> u64 {
    BLOCK_INDEX.with(Cell::get)
}

pub(crate) fn set_block_index(index: u64) {
    BLOCK_INDEX.with(|cell| cell.set(index));
}

/// The OSC section the XML parser is currently inside. `Bulk` outside of
/// change files.
pub fn osc_mode() -> OscMode {
    OSC_MODE.with(Cell::get)
}

pub(crate) fn set_osc_mode(mode: OscMode) {
    OSC_MODE.with(|cell| cell.set(mode));
}

/// The format detected by the most recent dispatch.
pub fn file_type() -> FileType {
    match FILE_TYPE.load(Ordering::Relaxed) {
        0 => FileType::Pbf,
        _ => FileType::Xml,
    }
}

fn set_file_type(file_type: FileType) {
    FILE_TYPE.store(file_type as u8, Ordering::Relaxed);
}
