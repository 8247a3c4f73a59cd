//! The per-block string table: an append-only byte arena plus an offset
//! index. Index 0 is the empty string by PBF convention; all entity strings
//! are indices into this table.

use crate::error::IngestError;

#[derive(Default)]
pub(crate) struct StringTable {
    buf: Vec<u8>,
    index: Vec<(u32, u32)>,
}

impl StringTable {
    /// Clear for a new block, keeping capacity; `hint` sizes the arena.
    pub fn init(&mut self, hint: usize) {
        self.buf.clear();
        self.index.clear();
        if hint > self.buf.capacity() {
            self.buf.reserve(hint);
        }
    }

    pub fn add(&mut self, bytes: &[u8]) {
        let offset = self.buf.len() as u32;
        self.buf.extend_from_slice(bytes);
        self.index.push((offset, bytes.len() as u32));
    }

    pub fn get(&self, index: u32) -> Result<&str, IngestError> {
        let &(offset, len) = self
            .index
            .get(index as usize)
            .ok_or(IngestError::MalformedWire("string table index out of range"))?;
        let bytes = &self.buf[offset as usize..offset as usize + len as usize];
        std::str::from_utf8(bytes)
            .map_err(|_| IngestError::MalformedWire("string table entry is not utf-8"))
    }
}
