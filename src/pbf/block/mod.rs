//! Worker-side decoding: blob unwrap and inflation, header blocks, and the
//! `PrimitiveBlock` driver feeding the entity decoders.
//!
//! Everything here is per-worker state. Entities accumulate index ranges into
//! shared arenas while a group decodes; batches bind slices only after the
//! arenas have stopped growing (see the retry protocol in `way.rs` and
//! `relation.rs`), then each handler is invoked once per group.

pub(crate) mod dense;
pub(crate) mod info;
pub(crate) mod relation;
pub(crate) mod strings;
pub(crate) mod way;

use std::io::Read;

use flate2::read::ZlibDecoder;
use log::{info, trace};
use memmap2::Mmap;

use crate::error::IngestError;
use crate::ingest::Ingest;
use crate::model::{MemberType, Node, Relation, RelationMember, Tag, Way};
use crate::wire::field::each_field;
use crate::wire::varint::zigzag;

use super::blob::item::{BlobItem, BlobKind};
use self::strings::StringTable;

/// Per-worker decode state: the inflation scratch buffer plus the block
/// decoder proper.
pub(crate) struct Worker<'c, 'h> {
    scratch: Vec<u8>,
    decoder: BlockDecoder<'c, 'h>,
}

impl<'c, 'h> Worker<'c, 'h> {
    pub fn new(ctx: &'c Ingest<'h>) -> Self {
        Worker {
            scratch: Vec::new(),
            decoder: BlockDecoder::new(ctx),
        }
    }

    pub fn process(&mut self, item: &BlobItem, map: &Mmap) -> Result<(), IngestError> {
        let blob = &map[item.range.clone()];
        let payload = read_blob(blob, &mut self.scratch)?;
        match item.kind {
            BlobKind::Header => read_header(payload),
            BlobKind::Primitive => self.decoder.read_block(payload),
        }
    }
}

/// Unwrap a `Blob`: either raw bytes aliasing the mapped file, or a zlib
/// stream inflated into `scratch` resized to the declared `raw_size`.
fn read_blob<'a>(blob: &'a [u8], scratch: &'a mut Vec<u8>) -> Result<&'a [u8], IngestError> {
    let mut raw: Option<&[u8]> = None;
    let mut zlib: Option<&[u8]> = None;
    let mut raw_size = 0usize;
    let mut unsupported = false;

    each_field(blob, |field| {
        match field.num {
            1 => raw = field.bytes(),
            2 => {
                if let Some(value) = field.varint() {
                    raw_size = value as usize;
                }
            }
            3 => zlib = field.bytes(),
            // lzma, bzip2, lz4, zstd
            4..=7 => {
                if field.bytes().is_some() {
                    unsupported = true;
                }
            }
            _ => {}
        }
        Ok(())
    })?;

    if unsupported {
        return Err(IngestError::Inflate("unsupported compression"));
    }

    if let Some(data) = zlib {
        scratch.clear();
        scratch.resize(raw_size, 0);
        let mut decoder = ZlibDecoder::new(data);
        decoder
            .read_exact(scratch)
            .map_err(|_| IngestError::Inflate("zlib stream failed to inflate"))?;
        let trailing = decoder
            .read(&mut [0u8; 1])
            .map_err(|_| IngestError::Inflate("zlib stream failed to inflate"))?;
        if trailing != 0 {
            return Err(IngestError::Inflate("inflated size differs from raw_size"));
        }
        return Ok(scratch.as_slice());
    }

    if let Some(data) = raw {
        return Ok(data);
    }

    Err(IngestError::Inflate("blob carries no payload"))
}

/// Decode the one `HeaderBlock` at the front of the file. Features are
/// informational; unknown required features are not rejected.
fn read_header(payload: &[u8]) -> Result<(), IngestError> {
    each_field(payload, |field| {
        match field.num {
            1 => {
                if let Some(bbox) = field.bytes() {
                    read_bbox(bbox)?;
                }
            }
            4 => {
                if let Some(feature) = field.bytes() {
                    info!("required feature: {}", String::from_utf8_lossy(feature));
                }
            }
            5 => {
                if let Some(feature) = field.bytes() {
                    trace!("optional feature: {}", String::from_utf8_lossy(feature));
                }
            }
            16 => {
                if let Some(program) = field.bytes() {
                    trace!("writing program: {}", String::from_utf8_lossy(program));
                }
            }
            17 => {
                if let Some(source) = field.bytes() {
                    trace!("source: {}", String::from_utf8_lossy(source));
                }
            }
            32 => {
                if let Some(stamp) = field.varint() {
                    trace!("replication timestamp: {stamp}");
                }
            }
            33 => {
                if let Some(sequence) = field.varint() {
                    trace!("replication sequence: {sequence}");
                }
            }
            34 => {
                if let Some(url) = field.bytes() {
                    trace!("replication url: {}", String::from_utf8_lossy(url));
                }
            }
            _ => {}
        }
        Ok(())
    })
}

fn read_bbox(payload: &[u8]) -> Result<(), IngestError> {
    let mut bounds = [0i64; 4];
    each_field(payload, |field| {
        if let (1..=4, Some(value)) = (field.num, field.varint()) {
            bounds[(field.num - 1) as usize] = zigzag(value);
        }
        Ok(())
    })?;
    trace!(
        "header bbox: left {} right {} top {} bottom {}",
        bounds[0],
        bounds[1],
        bounds[2],
        bounds[3]
    );
    Ok(())
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RawMeta {
    pub version: i32,
    pub timestamp: i64,
    pub changeset: i64,
}

/// Accumulated entities hold `(begin, end)` index ranges into the shared
/// arenas, never slices; slices are bound at emission.
struct RawNode {
    id: i64,
    lat: i64,
    lon: i64,
    meta: RawMeta,
    tags: (usize, usize),
}

struct RawWay {
    id: i64,
    meta: RawMeta,
    tags: (usize, usize),
    refs: (usize, usize),
}

struct RawRelation {
    id: i64,
    meta: RawMeta,
    tags: (usize, usize),
    members: (usize, usize),
}

struct RawMember {
    role: u32,
    id: i64,
    kind: MemberType,
}

/// Outcome of a single-entity decode against the arena capacities recorded at
/// pass start.
enum Pass<T> {
    Done(T),
    OutOfCapacity,
}

pub(crate) struct BlockDecoder<'c, 'h> {
    ctx: &'c Ingest<'h>,
    strings: StringTable,

    // Arenas shared across a group's entities, addressed by index range.
    tag_pairs: Vec<(u32, u32)>,
    refs: Vec<i64>,
    members: Vec<RawMember>,

    // Per-group accumulators.
    nodes: Vec<RawNode>,
    ways: Vec<RawWay>,
    relations: Vec<RawRelation>,

    // Entities already decoded when a capacity retry restarts a pass.
    ways_read: usize,
    relations_read: usize,

    // Dense-node scratch.
    ids: Vec<i64>,
    lats: Vec<i64>,
    lons: Vec<i64>,
    itags: Vec<u32>,
    versions: Vec<u32>,
    timestamps: Vec<i64>,
    changesets: Vec<i64>,

    // Way and relation scratch.
    ikeys: Vec<u32>,
    ivals: Vec<u32>,
    iroles: Vec<u32>,
    imember_ids: Vec<i64>,
    imember_types: Vec<u32>,
}

impl<'c, 'h> BlockDecoder<'c, 'h> {
    pub fn new(ctx: &'c Ingest<'h>) -> Self {
        BlockDecoder {
            ctx,
            strings: StringTable::default(),
            tag_pairs: Vec::new(),
            refs: Vec::new(),
            members: Vec::new(),
            nodes: Vec::new(),
            ways: Vec::new(),
            relations: Vec::new(),
            ways_read: 0,
            relations_read: 0,
            ids: Vec::new(),
            lats: Vec::new(),
            lons: Vec::new(),
            itags: Vec::new(),
            versions: Vec::new(),
            timestamps: Vec::new(),
            changesets: Vec::new(),
            ikeys: Vec::new(),
            ivals: Vec::new(),
            iroles: Vec::new(),
            imember_ids: Vec::new(),
            imember_types: Vec::new(),
        }
    }

    /// One pass over a `PrimitiveBlock`. The string table (field 1) precedes
    /// the groups (field 2) on the wire, so groups can decode as they appear.
    pub fn read_block(&mut self, payload: &[u8]) -> Result<(), IngestError> {
        self.strings.init(payload.len());
        let mut granularity = 100i64;
        let mut date_granularity = 1000i64;
        let mut lat_offset = 0i64;
        let mut lon_offset = 0i64;

        each_field(payload, |field| {
            match field.num {
                1 => {
                    if let Some(bytes) = field.bytes() {
                        self.read_string_table(bytes)?;
                    }
                }
                2 => {
                    if let Some(bytes) = field.bytes() {
                        self.read_group(bytes)?;
                    }
                }
                17 => {
                    if let Some(value) = field.varint() {
                        granularity = value as i64;
                    }
                }
                18 => {
                    if let Some(value) = field.varint() {
                        date_granularity = value as i64;
                    }
                }
                19 => {
                    if let Some(value) = field.varint() {
                        lat_offset = zigzag(value);
                    }
                }
                20 => {
                    if let Some(value) = field.varint() {
                        lon_offset = zigzag(value);
                    }
                }
                _ => {}
            }
            Ok(())
        })?;

        trace!(
            "block granularity {granularity}ndeg / {date_granularity}ms, offset ({lat_offset}, {lon_offset})"
        );
        Ok(())
    }

    fn read_string_table(&mut self, payload: &[u8]) -> Result<(), IngestError> {
        each_field(payload, |field| {
            if field.num == 1 {
                if let Some(bytes) = field.bytes() {
                    self.strings.add(bytes);
                }
            }
            Ok(())
        })
    }

    fn read_group(&mut self, payload: &[u8]) -> Result<(), IngestError> {
        self.tag_pairs.clear();
        self.refs.clear();
        self.members.clear();

        let mut dense_streams: Vec<&[u8]> = Vec::new();
        let mut way_bodies: Vec<&[u8]> = Vec::new();
        let mut relation_bodies: Vec<&[u8]> = Vec::new();

        each_field(payload, |field| {
            match field.num {
                // Field 1 (sparse nodes) is not produced by current planet
                // files; only dense nodes yield node batches.
                2 => {
                    if let Some(bytes) = field.bytes() {
                        dense_streams.push(bytes);
                    }
                }
                3 => {
                    if let Some(bytes) = field.bytes() {
                        way_bodies.push(bytes);
                    }
                }
                4 => {
                    if let Some(bytes) = field.bytes() {
                        relation_bodies.push(bytes);
                    }
                }
                _ => {}
            }
            Ok(())
        })?;

        if self.ctx.nodes.is_some() {
            for stream in dense_streams {
                self.read_dense(stream)?;
                self.emit_nodes()?;
            }
        }
        if self.ctx.ways.is_some() && !way_bodies.is_empty() {
            self.read_ways(&way_bodies)?;
            self.emit_ways()?;
        }
        if self.ctx.relations.is_some() && !relation_bodies.is_empty() {
            self.read_relations(&relation_bodies)?;
            self.emit_relations()?;
        }
        Ok(())
    }

    /// Resolve the accumulated index pairs against the string table. Runs
    /// after the arenas have settled, so the returned tags are stable for the
    /// duration of the handler call.
    fn resolve_tags(&self) -> Result<Vec<Tag<'_>>, IngestError> {
        let mut tags = Vec::with_capacity(self.tag_pairs.len());
        for &(key, value) in &self.tag_pairs {
            tags.push(Tag {
                key: self.strings.get(key)?,
                value: self.strings.get(value)?,
            });
        }
        Ok(tags)
    }

    fn emit_nodes(&self) -> Result<(), IngestError> {
        let Some(handler) = self.ctx.nodes.as_ref() else {
            return Ok(());
        };
        if self.nodes.is_empty() {
            return Ok(());
        }
        let tags = self.resolve_tags()?;
        let batch: Vec<Node<'_>> = self
            .nodes
            .iter()
            .map(|raw| Node {
                id: raw.id,
                raw_latitude: raw.lat,
                raw_longitude: raw.lon,
                version: raw.meta.version,
                timestamp: raw.meta.timestamp,
                changeset: raw.meta.changeset,
                tags: &tags[raw.tags.0..raw.tags.1],
            })
            .collect();
        if !handler(&batch) {
            return Err(IngestError::Canceled);
        }
        Ok(())
    }

    fn emit_ways(&self) -> Result<(), IngestError> {
        let Some(handler) = self.ctx.ways.as_ref() else {
            return Ok(());
        };
        if self.ways.is_empty() {
            return Ok(());
        }
        let tags = self.resolve_tags()?;
        let batch: Vec<Way<'_>> = self
            .ways
            .iter()
            .map(|raw| Way {
                id: raw.id,
                node_refs: &self.refs[raw.refs.0..raw.refs.1],
                tags: &tags[raw.tags.0..raw.tags.1],
                version: raw.meta.version,
                timestamp: raw.meta.timestamp,
                changeset: raw.meta.changeset,
            })
            .collect();
        if !handler(&batch) {
            return Err(IngestError::Canceled);
        }
        Ok(())
    }

    fn emit_relations(&self) -> Result<(), IngestError> {
        let Some(handler) = self.ctx.relations.as_ref() else {
            return Ok(());
        };
        if self.relations.is_empty() {
            return Ok(());
        }
        let tags = self.resolve_tags()?;
        let mut members = Vec::with_capacity(self.members.len());
        for raw in &self.members {
            members.push(RelationMember {
                kind: raw.kind,
                id: raw.id,
                role: self.strings.get(raw.role)?,
            });
        }
        let batch: Vec<Relation<'_>> = self
            .relations
            .iter()
            .map(|raw| Relation {
                id: raw.id,
                members: &members[raw.members.0..raw.members.1],
                tags: &tags[raw.tags.0..raw.tags.1],
                version: raw.meta.version,
                timestamp: raw.meta.timestamp,
                changeset: raw.meta.changeset,
            })
            .collect();
        if !handler(&batch) {
            return Err(IngestError::Canceled);
        }
        Ok(())
    }
}
