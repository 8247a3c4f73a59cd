//! The file framer. Walks the mapping once, validating each `BlobHeader` and
//! emitting work items; no inflation or payload parsing happens here.

use log::trace;

use crate::error::IngestError;
use crate::wire::field::each_field;
use crate::wire::varint::read_be_u32;

use super::item::{BlobItem, BlobKind};

const HEADER_LEN_SIZE: usize = 4;
const HEADER_TYPE: &[u8] = b"OSMHeader";
const DATA_TYPE: &[u8] = b"OSMData";

pub(crate) struct BlobIterator<'a> {
    map: &'a [u8],
    offset: usize,
    index: u64,
}

impl<'a> BlobIterator<'a> {
    pub fn new(map: &'a [u8]) -> Self {
        BlobIterator {
            map,
            offset: 0,
            index: 0,
        }
    }

    fn next_item(&mut self) -> Result<Option<BlobItem>, IngestError> {
        if self.offset == self.map.len() {
            return Ok(None);
        }

        let header_len = read_be_u32(&self.map[self.offset..]).ok_or(IngestError::Truncated {
            offset: self.offset,
        })? as usize;
        self.offset += HEADER_LEN_SIZE;

        let header_end = self
            .offset
            .checked_add(header_len)
            .filter(|&end| end <= self.map.len())
            .ok_or(IngestError::Truncated {
                offset: self.offset,
            })?;
        let header = &self.map[self.offset..header_end];
        self.offset = header_end;

        // The first block must be the OSMHeader; everything after is OSMData.
        let expected = if self.index == 0 { HEADER_TYPE } else { DATA_TYPE };
        let mut type_matches = false;
        let mut datasize = 0u64;
        each_field(header, |field| {
            match field.num {
                1 => {
                    if let Some(bytes) = field.bytes() {
                        type_matches = bytes == expected;
                    }
                }
                3 => {
                    if let Some(value) = field.varint() {
                        datasize = value;
                    }
                }
                _ => {}
            }
            Ok(())
        })?;

        if !type_matches {
            return Err(IngestError::BadHeader {
                reason: if self.index == 0 {
                    "expected OSMHeader as first block"
                } else {
                    "expected OSMData"
                },
            });
        }
        if datasize == 0 {
            return Err(IngestError::BadHeader {
                reason: "zero datasize",
            });
        }

        let end = self
            .offset
            .checked_add(datasize as usize)
            .filter(|&end| end <= self.map.len())
            .ok_or(IngestError::Truncated {
                offset: self.offset,
            })?;

        let item = BlobItem {
            range: self.offset..end,
            kind: if self.index == 0 {
                BlobKind::Header
            } else {
                BlobKind::Primitive
            },
            index: self.index,
        };
        trace!("framed block {} ({datasize} bytes)", item.index);

        self.offset = end;
        self.index += 1;
        Ok(Some(item))
    }
}

impl Iterator for BlobIterator<'_> {
    type Item = Result<BlobItem, IngestError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_item().transpose()
    }
}
