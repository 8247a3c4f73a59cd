//! Wire-format encoders and PBF fixture builders shared by the integration
//! tests.

#![allow(dead_code)]

use std::io::Write;
use std::path::PathBuf;

use flate2::write::ZlibEncoder;
use flate2::Compression;

pub fn varint(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

pub fn zigzag(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

pub fn field_varint(num: u32, value: u64, out: &mut Vec<u8>) {
    varint(u64::from(num) << 3, out);
    varint(value, out);
}

pub fn field_bytes(num: u32, bytes: &[u8], out: &mut Vec<u8>) {
    varint((u64::from(num) << 3) | 2, out);
    varint(bytes.len() as u64, out);
    out.extend_from_slice(bytes);
}

pub fn packed_u32(values: &[u32]) -> Vec<u8> {
    let mut out = Vec::new();
    for &value in values {
        varint(u64::from(value), &mut out);
    }
    out
}

pub fn packed_sint64(values: &[i64]) -> Vec<u8> {
    let mut out = Vec::new();
    for &value in values {
        varint(zigzag(value), &mut out);
    }
    out
}

pub fn string_table(entries: &[&str]) -> Vec<u8> {
    let mut out = Vec::new();
    for entry in entries {
        field_bytes(1, entry.as_bytes(), &mut out);
    }
    out
}

/// A `PrimitiveGroup` holding one dense-node stream.
pub fn dense_group(ids: &[i64], lats: &[i64], lons: &[i64], itags: &[u32]) -> Vec<u8> {
    let mut dense = Vec::new();
    field_bytes(1, &packed_sint64(ids), &mut dense);
    field_bytes(8, &packed_sint64(lats), &mut dense);
    field_bytes(9, &packed_sint64(lons), &mut dense);
    if !itags.is_empty() {
        field_bytes(10, &packed_u32(itags), &mut dense);
    }
    let mut group = Vec::new();
    field_bytes(2, &dense, &mut group);
    group
}

/// A way message body. Key/value index arrays are written independently so
/// tests can produce arity violations.
pub fn way(id: i64, keys: &[u32], vals: &[u32], ref_deltas: &[i64]) -> Vec<u8> {
    let mut body = Vec::new();
    field_varint(1, id as u64, &mut body);
    if !keys.is_empty() {
        field_bytes(2, &packed_u32(keys), &mut body);
    }
    if !vals.is_empty() {
        field_bytes(3, &packed_u32(vals), &mut body);
    }
    if !ref_deltas.is_empty() {
        field_bytes(8, &packed_sint64(ref_deltas), &mut body);
    }
    body
}

pub fn group_of_ways(bodies: &[Vec<u8>]) -> Vec<u8> {
    let mut group = Vec::new();
    for body in bodies {
        field_bytes(3, body, &mut group);
    }
    group
}

pub fn relation(
    id: i64,
    keys: &[u32],
    vals: &[u32],
    roles: &[u32],
    member_deltas: &[i64],
    types: &[u32],
) -> Vec<u8> {
    let mut body = Vec::new();
    field_varint(1, id as u64, &mut body);
    if !keys.is_empty() {
        field_bytes(2, &packed_u32(keys), &mut body);
    }
    if !vals.is_empty() {
        field_bytes(3, &packed_u32(vals), &mut body);
    }
    if !roles.is_empty() {
        field_bytes(8, &packed_u32(roles), &mut body);
    }
    if !member_deltas.is_empty() {
        field_bytes(9, &packed_sint64(member_deltas), &mut body);
    }
    if !types.is_empty() {
        field_bytes(10, &packed_u32(types), &mut body);
    }
    body
}

pub fn group_of_relations(bodies: &[Vec<u8>]) -> Vec<u8> {
    let mut group = Vec::new();
    for body in bodies {
        field_bytes(4, body, &mut group);
    }
    group
}

/// A `PrimitiveBlock` with the given string table and groups, carrying an
/// explicit default granularity so the two-byte wire tag gets exercised.
pub fn primitive_block(strings: &[&str], groups: &[Vec<u8>]) -> Vec<u8> {
    let mut block = Vec::new();
    field_bytes(1, &string_table(strings), &mut block);
    for group in groups {
        field_bytes(2, group, &mut block);
    }
    field_varint(17, 100, &mut block);
    block
}

pub fn header_block() -> Vec<u8> {
    let mut block = Vec::new();
    field_bytes(4, b"OsmSchema-V0.6", &mut block);
    field_bytes(4, b"DenseNodes", &mut block);
    field_bytes(16, b"osm-ingest-tests", &mut block);
    block
}

pub fn zlib_compress(payload: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(payload).unwrap();
    encoder.finish().unwrap()
}

pub struct PbfBuilder {
    bytes: Vec<u8>,
}

impl PbfBuilder {
    pub fn new() -> Self {
        PbfBuilder { bytes: Vec::new() }
    }

    /// The mandatory OSMHeader block.
    pub fn header(self) -> Self {
        let payload = header_block();
        let mut blob = Vec::new();
        field_bytes(1, &payload, &mut blob);
        field_varint(2, payload.len() as u64, &mut blob);
        self.framed("OSMHeader", &blob)
    }

    /// An uncompressed OSMData block.
    pub fn data(self, payload: &[u8]) -> Self {
        let mut blob = Vec::new();
        field_bytes(1, payload, &mut blob);
        field_varint(2, payload.len() as u64, &mut blob);
        self.framed("OSMData", &blob)
    }

    /// A zlib-compressed OSMData block.
    pub fn data_zlib(self, payload: &[u8]) -> Self {
        let mut blob = Vec::new();
        field_varint(2, payload.len() as u64, &mut blob);
        field_bytes(3, &zlib_compress(payload), &mut blob);
        self.framed("OSMData", &blob)
    }

    /// An OSMData block with caller-supplied blob bytes, for malformed-input
    /// tests.
    pub fn data_blob(self, blob: &[u8]) -> Self {
        self.framed("OSMData", blob)
    }

    /// Frame a blob with its `BlobHeader` and big-endian length prefix.
    pub fn framed(mut self, kind: &str, blob: &[u8]) -> Self {
        let mut header = Vec::new();
        field_bytes(1, kind.as_bytes(), &mut header);
        field_varint(3, blob.len() as u64, &mut header);
        self.bytes
            .extend_from_slice(&(header.len() as u32).to_be_bytes());
        self.bytes.extend_from_slice(&header);
        self.bytes.extend_from_slice(blob);
        self
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn write(self, name: &str) -> PathBuf {
        write_fixture(name, &self.bytes)
    }
}

pub fn write_fixture(name: &str, bytes: &[u8]) -> PathBuf {
    let path = std::env::temp_dir().join(format!("osm-ingest-{}-{name}", std::process::id()));
    std::fs::write(&path, bytes).unwrap();
    path
}
