//! The nested `Info` metadata message shared by ways and relations.

use crate::error::IngestError;
use crate::wire::field::each_field;

use super::RawMeta;

pub(super) fn read_info(payload: &[u8]) -> Result<RawMeta, IngestError> {
    let mut meta = RawMeta::default();
    each_field(payload, |field| {
        if let Some(value) = field.varint() {
            match field.num {
                1 => meta.version = value as i32,
                2 => meta.timestamp = value as i64,
                3 => meta.changeset = value as i64,
                _ => {}
            }
        }
        Ok(())
    })?;
    Ok(meta)
}
