//! Way decoding. Tags and node refs append to arenas shared across the
//! group's ways; each way records index ranges. If an arena regrows during an
//! entity, the partial appends roll back and the pass restarts from the last
//! fully decoded way, so emission always binds into settled memory.

use crate::error::IngestError;
use crate::wire::field::each_field;
use crate::wire::varint::{self, read_packed_u32};

use super::{info, BlockDecoder, Pass, RawMeta, RawWay};

impl BlockDecoder<'_, '_> {
    pub(super) fn read_ways(&mut self, bodies: &[&[u8]]) -> Result<(), IngestError> {
        self.ways.clear();
        self.ways_read = 0;
        loop {
            let tags_capacity = self.tag_pairs.capacity();
            let refs_capacity = self.refs.capacity();
            let mut regrew = false;

            for &body in &bodies[self.ways_read..] {
                let tag_mark = self.tag_pairs.len();
                let ref_mark = self.refs.len();
                match self.read_way(body, tags_capacity, refs_capacity)? {
                    Pass::Done(way) => {
                        self.ways.push(way);
                        self.ways_read += 1;
                    }
                    Pass::OutOfCapacity => {
                        self.tag_pairs.truncate(tag_mark);
                        self.refs.truncate(ref_mark);
                        regrew = true;
                        break;
                    }
                }
            }

            if !regrew {
                return Ok(());
            }
        }
    }

    fn read_way(
        &mut self,
        body: &[u8],
        tags_capacity: usize,
        refs_capacity: usize,
    ) -> Result<Pass<RawWay>, IngestError> {
        self.ikeys.clear();
        self.ivals.clear();
        let mut id = 0i64;
        let mut meta = RawMeta::default();
        let mut refs_body: Option<&[u8]> = None;

        each_field(body, |field| {
            match field.num {
                1 => {
                    if let Some(value) = field.varint() {
                        id = value as i64;
                    }
                }
                2 => {
                    if let Some(bytes) = field.bytes() {
                        read_packed_u32(bytes, &mut self.ikeys)?;
                    }
                }
                3 => {
                    if let Some(bytes) = field.bytes() {
                        read_packed_u32(bytes, &mut self.ivals)?;
                    }
                }
                4 => {
                    if let Some(bytes) = field.bytes() {
                        if self.ctx.decode_metadata {
                            meta = info::read_info(bytes)?;
                        }
                    }
                }
                8 => refs_body = field.bytes(),
                _ => {}
            }
            Ok(())
        })?;

        if self.ikeys.len() != self.ivals.len() {
            return Err(IngestError::Arity(
                "way key/value index arrays differ in length",
            ));
        }

        let tag_begin = self.tag_pairs.len();
        for i in 0..self.ikeys.len() {
            self.tag_pairs.push((self.ikeys[i], self.ivals[i]));
            if self.tag_pairs.capacity() != tags_capacity {
                return Ok(Pass::OutOfCapacity);
            }
        }

        // Node refs are delta encoded; the accumulator resets per way.
        let ref_begin = self.refs.len();
        if let Some(mut bytes) = refs_body {
            let mut current = 0i64;
            while !bytes.is_empty() {
                current += varint::read_sint64(&mut bytes)?;
                self.refs.push(current);
                if self.refs.capacity() != refs_capacity {
                    return Ok(Pass::OutOfCapacity);
                }
            }
        }

        Ok(Pass::Done(RawWay {
            id,
            meta,
            tags: (tag_begin, self.tag_pairs.len()),
            refs: (ref_begin, self.refs.len()),
        }))
    }
}
