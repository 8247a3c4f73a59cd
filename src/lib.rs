#![doc = include_str!("../docs/ingest.md")]

pub mod error;
pub mod model;

mod ingest;
mod pbf;
mod wire;
mod xml;

pub use error::IngestError;
pub use ingest::{block_index, file_type, osc_mode, thread_index, FileType, Ingest, OscMode};
pub use model::{MemberType, Node, Relation, RelationMember, Tag, Way};
