//! Dense-node decoding: parallel delta-encoded arrays plus the interleaved
//! `key, value, .., 0` tag-index stream.

use crate::error::IngestError;
use crate::wire::field::each_field;
use crate::wire::varint::{read_packed_sint64, read_packed_u32};

use super::{BlockDecoder, RawMeta, RawNode};

impl BlockDecoder<'_, '_> {
    pub(super) fn read_dense(&mut self, payload: &[u8]) -> Result<(), IngestError> {
        self.ids.clear();
        self.lats.clear();
        self.lons.clear();
        self.itags.clear();
        self.versions.clear();
        self.timestamps.clear();
        self.changesets.clear();
        self.nodes.clear();

        each_field(payload, |field| {
            match field.num {
                1 => {
                    if let Some(bytes) = field.bytes() {
                        read_packed_sint64(bytes, &mut self.ids)?;
                    }
                }
                5 => {
                    if let Some(bytes) = field.bytes() {
                        if self.ctx.decode_metadata {
                            self.read_dense_info(bytes)?;
                        }
                    }
                }
                8 => {
                    if let Some(bytes) = field.bytes() {
                        read_packed_sint64(bytes, &mut self.lats)?;
                    }
                }
                9 => {
                    if let Some(bytes) = field.bytes() {
                        read_packed_sint64(bytes, &mut self.lons)?;
                    }
                }
                10 => {
                    if let Some(bytes) = field.bytes() {
                        read_packed_u32(bytes, &mut self.itags)?;
                    }
                }
                _ => {}
            }
            Ok(())
        })?;

        let count = self.ids.len();
        if self.lats.len() != count || self.lons.len() != count {
            return Err(IngestError::Arity(
                "dense node id/lat/lon arrays differ in length",
            ));
        }
        if self.ctx.decode_metadata
            && (self.versions.len() != count
                || self.timestamps.len() != count
                || self.changesets.len() != count)
        {
            return Err(IngestError::Arity(
                "dense info arrays differ from node count",
            ));
        }

        // Settle ids, positions and metadata first; the tag stream is walked
        // separately so it can restart when the tag arena grows.
        let mut id = 0i64;
        let mut lat = 0i64;
        let mut lon = 0i64;
        let mut meta = RawMeta::default();
        for i in 0..count {
            id += self.ids[i];
            lat += self.lats[i];
            lon += self.lons[i];
            if self.ctx.decode_metadata {
                meta.version = self.versions[i] as i32;
                meta.timestamp += self.timestamps[i];
                meta.changeset += self.changesets[i];
            }
            self.nodes.push(RawNode {
                id,
                lat,
                lon,
                meta,
                tags: (0, 0),
            });
        }

        self.scan_dense_tags();
        Ok(())
    }

    fn read_dense_info(&mut self, payload: &[u8]) -> Result<(), IngestError> {
        each_field(payload, |field| {
            match field.num {
                // versions are not delta encoded
                1 => {
                    if let Some(bytes) = field.bytes() {
                        read_packed_u32(bytes, &mut self.versions)?;
                    }
                }
                2 => {
                    if let Some(bytes) = field.bytes() {
                        read_packed_sint64(bytes, &mut self.timestamps)?;
                    }
                }
                3 => {
                    if let Some(bytes) = field.bytes() {
                        read_packed_sint64(bytes, &mut self.changesets)?;
                    }
                }
                _ => {}
            }
            Ok(())
        })
    }

    /// Walk the interleaved tag-index stream, filling the tag arena and each
    /// node's range. A single `0` terminates a node's tags; a node may have
    /// none. If the arena regrows mid-scan, clear it and redo the stream in
    /// full; ranges recorded so far are recomputed on the next pass.
    fn scan_dense_tags(&mut self) {
        loop {
            self.tag_pairs.clear();
            let start_capacity = self.tag_pairs.capacity();
            let mut cursor = 0usize;
            let mut regrew = false;

            'nodes: for node in &mut self.nodes {
                let begin = self.tag_pairs.len();
                while cursor < self.itags.len() {
                    let key = self.itags[cursor];
                    cursor += 1;
                    if key == 0 {
                        break;
                    }
                    if cursor >= self.itags.len() {
                        break;
                    }
                    let value = self.itags[cursor];
                    cursor += 1;
                    if value == 0 {
                        break;
                    }
                    self.tag_pairs.push((key, value));
                    if self.tag_pairs.capacity() != start_capacity {
                        regrew = true;
                        break 'nodes;
                    }
                }
                node.tags = (begin, self.tag_pairs.len());
            }

            if !regrew {
                return;
            }
        }
    }
}
