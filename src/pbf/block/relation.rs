//! Relation decoding, under the same shared-arena retry protocol as ways.

use crate::error::IngestError;
use crate::model::MemberType;
use crate::wire::field::each_field;
use crate::wire::varint::{read_packed_sint64, read_packed_u32};

use super::{info, BlockDecoder, Pass, RawMember, RawMeta, RawRelation};

impl BlockDecoder<'_, '_> {
    pub(super) fn read_relations(&mut self, bodies: &[&[u8]]) -> Result<(), IngestError> {
        self.relations.clear();
        self.relations_read = 0;
        loop {
            let tags_capacity = self.tag_pairs.capacity();
            let members_capacity = self.members.capacity();
            let mut regrew = false;

            for &body in &bodies[self.relations_read..] {
                let tag_mark = self.tag_pairs.len();
                let member_mark = self.members.len();
                match self.read_relation(body, tags_capacity, members_capacity)? {
                    Pass::Done(relation) => {
                        self.relations.push(relation);
                        self.relations_read += 1;
                    }
                    Pass::OutOfCapacity => {
                        self.tag_pairs.truncate(tag_mark);
                        self.members.truncate(member_mark);
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

    fn read_relation(
        &mut self,
        body: &[u8],
        tags_capacity: usize,
        members_capacity: usize,
    ) -> Result<Pass<RawRelation>, IngestError> {
        self.ikeys.clear();
        self.ivals.clear();
        self.iroles.clear();
        self.imember_ids.clear();
        self.imember_types.clear();
        let mut id = 0i64;
        let mut meta = RawMeta::default();

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
                8 => {
                    if let Some(bytes) = field.bytes() {
                        read_packed_u32(bytes, &mut self.iroles)?;
                    }
                }
                9 => {
                    if let Some(bytes) = field.bytes() {
                        read_packed_sint64(bytes, &mut self.imember_ids)?;
                    }
                }
                10 => {
                    if let Some(bytes) = field.bytes() {
                        read_packed_u32(bytes, &mut self.imember_types)?;
                    }
                }
                _ => {}
            }
            Ok(())
        })?;

        if self.ikeys.len() != self.ivals.len() {
            return Err(IngestError::Arity(
                "relation key/value index arrays differ in length",
            ));
        }
        if self.iroles.len() != self.imember_ids.len()
            || self.iroles.len() != self.imember_types.len()
        {
            return Err(IngestError::Arity(
                "relation member arrays differ in length",
            ));
        }

        let tag_begin = self.tag_pairs.len();
        for i in 0..self.ikeys.len() {
            self.tag_pairs.push((self.ikeys[i], self.ivals[i]));
            if self.tag_pairs.capacity() != tags_capacity {
                return Ok(Pass::OutOfCapacity);
            }
        }

        // Member ids are delta encoded; the accumulator resets per relation.
        let member_begin = self.members.len();
        let mut current = 0i64;
        for i in 0..self.iroles.len() {
            current += self.imember_ids[i];
            let kind = MemberType::from_wire(u64::from(self.imember_types[i])).ok_or(
                IngestError::MalformedWire("relation member type outside 0..=2"),
            )?;
            self.members.push(RawMember {
                role: self.iroles[i],
                id: current,
                kind,
            });
            if self.members.capacity() != members_capacity {
                return Ok(Pass::OutOfCapacity);
            }
        }

        Ok(Pass::Done(RawRelation {
            id,
            meta,
            tags: (tag_begin, self.tag_pairs.len()),
            members: (member_begin, self.members.len()),
        }))
    }
}
