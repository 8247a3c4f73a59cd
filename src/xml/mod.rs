//! Single-threaded adapter for `.osm` and `.osc` XML files. Emits one-entity
//! batches through the same handler contract as the PBF path.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::str;

use chrono::DateTime;
use log::error;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::error::IngestError;
use crate::ingest::{self, Ingest, OscMode};
use crate::model::{MemberType, Node, Relation, RelationMember, Tag, Way};

enum Open {
    None,
    Node,
    Way,
    Relation,
}

/// The entity currently being assembled. Reused across entities; cleared on
/// every opening element.
#[derive(Default)]
struct Pending {
    id: i64,
    raw_latitude: i64,
    raw_longitude: i64,
    version: i32,
    timestamp: i64,
    changeset: i64,
    tags: Vec<(String, String)>,
    refs: Vec<i64>,
    members: Vec<(MemberType, i64, String)>,
}

impl Pending {
    fn reset(&mut self) {
        self.id = 0;
        self.raw_latitude = 0;
        self.raw_longitude = 0;
        self.version = 0;
        self.timestamp = 0;
        self.changeset = 0;
        self.tags.clear();
        self.refs.clear();
        self.members.clear();
    }
}

pub(crate) fn read(ctx: &Ingest<'_>, path: &Path) -> Result<(), IngestError> {
    let file = File::open(path)?;
    let mut reader = Reader::from_reader(BufReader::new(file));
    reader.trim_text(true);

    ingest::set_thread_index(0);
    ingest::set_block_index(0);
    ingest::set_osc_mode(OscMode::Bulk);

    let mut buf = Vec::new();
    let mut open = Open::None;
    let mut pending = Pending::default();

    loop {
        match reader.read_event_into(&mut buf) {
            Err(err) => {
                error!("xml parse failure: {err}");
                return Err(IngestError::Xml(err.to_string()));
            }
            Ok(Event::Eof) => break,
            Ok(Event::Start(el)) => handle_start(&el, &mut open, &mut pending)?,
            Ok(Event::Empty(el)) => {
                handle_start(&el, &mut open, &mut pending)?;
                handle_end(ctx, el.name().as_ref(), &mut open, &pending)?;
            }
            Ok(Event::End(el)) => handle_end(ctx, el.name().as_ref(), &mut open, &pending)?,
            Ok(_) => {}
        }
        buf.clear();
    }
    Ok(())
}

fn handle_start(el: &BytesStart, open: &mut Open, pending: &mut Pending) -> Result<(), IngestError> {
    match el.name().as_ref() {
        b"node" => {
            pending.reset();
            *open = Open::Node;
            read_entity_attributes(el, pending, true)?;
        }
        b"way" => {
            pending.reset();
            *open = Open::Way;
            read_entity_attributes(el, pending, false)?;
        }
        b"relation" => {
            pending.reset();
            *open = Open::Relation;
            read_entity_attributes(el, pending, false)?;
        }
        b"tag" => {
            if !matches!(open, Open::None) {
                read_tag_attributes(el, pending)?;
            }
        }
        b"nd" => {
            if matches!(open, Open::Way) {
                read_nd_attributes(el, pending)?;
            }
        }
        b"member" => {
            if matches!(open, Open::Relation) {
                read_member_attributes(el, pending)?;
            }
        }
        b"create" => ingest::set_osc_mode(OscMode::Create),
        b"modify" => ingest::set_osc_mode(OscMode::Modify),
        b"delete" => ingest::set_osc_mode(OscMode::Delete),
        _ => {}
    }
    Ok(())
}

fn handle_end(
    ctx: &Ingest<'_>,
    name: &[u8],
    open: &mut Open,
    pending: &Pending,
) -> Result<(), IngestError> {
    match name {
        b"node" => {
            *open = Open::None;
            emit_node(ctx, pending)?;
        }
        b"way" => {
            *open = Open::None;
            emit_way(ctx, pending)?;
        }
        b"relation" => {
            *open = Open::None;
            emit_relation(ctx, pending)?;
        }
        b"create" | b"modify" | b"delete" => ingest::set_osc_mode(OscMode::Bulk),
        _ => {}
    }
    Ok(())
}

fn read_entity_attributes(
    el: &BytesStart,
    pending: &mut Pending,
    coords: bool,
) -> Result<(), IngestError> {
    for attribute in el.attributes() {
        let attribute = attribute.map_err(|err| IngestError::Xml(err.to_string()))?;
        let value = attribute_str(&attribute.value)?;
        match attribute.key.as_ref() {
            b"id" => pending.id = value.parse().unwrap_or(0),
            b"lat" if coords => pending.raw_latitude = scale_coord(value),
            b"lon" if coords => pending.raw_longitude = scale_coord(value),
            b"version" => pending.version = value.parse().unwrap_or(0),
            b"timestamp" => pending.timestamp = parse_timestamp(value),
            b"changeset" => pending.changeset = value.parse().unwrap_or(0),
            _ => {}
        }
    }
    Ok(())
}

fn read_tag_attributes(el: &BytesStart, pending: &mut Pending) -> Result<(), IngestError> {
    let mut key = None;
    let mut val = None;
    for attribute in el.attributes() {
        let attribute = attribute.map_err(|err| IngestError::Xml(err.to_string()))?;
        let value = attribute_str(&attribute.value)?;
        match attribute.key.as_ref() {
            b"k" => key = Some(value.to_owned()),
            b"v" => val = Some(value.to_owned()),
            _ => {}
        }
    }
    if let (Some(key), Some(val)) = (key, val) {
        pending.tags.push((key, val));
    }
    Ok(())
}

fn read_nd_attributes(el: &BytesStart, pending: &mut Pending) -> Result<(), IngestError> {
    for attribute in el.attributes() {
        let attribute = attribute.map_err(|err| IngestError::Xml(err.to_string()))?;
        if attribute.key.as_ref() == b"ref" {
            let value = attribute_str(&attribute.value)?;
            pending.refs.push(value.parse().unwrap_or(0));
        }
    }
    Ok(())
}

fn read_member_attributes(el: &BytesStart, pending: &mut Pending) -> Result<(), IngestError> {
    let mut kind = MemberType::Node;
    let mut id = 0i64;
    let mut role = String::new();
    for attribute in el.attributes() {
        let attribute = attribute.map_err(|err| IngestError::Xml(err.to_string()))?;
        let value = attribute_str(&attribute.value)?;
        match attribute.key.as_ref() {
            b"ref" => id = value.parse().unwrap_or(0),
            b"type" => {
                kind = match value {
                    "way" => MemberType::Way,
                    "relation" => MemberType::Relation,
                    _ => MemberType::Node,
                }
            }
            b"role" => role = value.to_owned(),
            _ => {}
        }
    }
    pending.members.push((kind, id, role));
    Ok(())
}

fn attribute_str<'v>(value: &'v [u8]) -> Result<&'v str, IngestError> {
    str::from_utf8(value).map_err(|err| IngestError::Xml(err.to_string()))
}

/// Degrees to raw decimicro units, matching the integer scale of the PBF
/// path at its default granularity.
fn scale_coord(value: &str) -> i64 {
    (value.parse::<f64>().unwrap_or(0.0) * 1e7).round() as i64
}

fn parse_timestamp(value: &str) -> i64 {
    DateTime::parse_from_rfc3339(value).map_or(0, |stamp| stamp.timestamp())
}

fn emit_node(ctx: &Ingest<'_>, pending: &Pending) -> Result<(), IngestError> {
    let Some(handler) = ctx.nodes.as_ref() else {
        return Ok(());
    };
    let tags: Vec<Tag<'_>> = pending
        .tags
        .iter()
        .map(|(key, value)| Tag {
            key: key.as_str(),
            value: value.as_str(),
        })
        .collect();
    let node = Node {
        id: pending.id,
        raw_latitude: pending.raw_latitude,
        raw_longitude: pending.raw_longitude,
        version: pending.version,
        timestamp: pending.timestamp,
        changeset: pending.changeset,
        tags: &tags,
    };
    if !handler(&[node]) {
        return Err(IngestError::Canceled);
    }
    Ok(())
}

fn emit_way(ctx: &Ingest<'_>, pending: &Pending) -> Result<(), IngestError> {
    let Some(handler) = ctx.ways.as_ref() else {
        return Ok(());
    };
    let tags: Vec<Tag<'_>> = pending
        .tags
        .iter()
        .map(|(key, value)| Tag {
            key: key.as_str(),
            value: value.as_str(),
        })
        .collect();
    let way = Way {
        id: pending.id,
        node_refs: &pending.refs,
        tags: &tags,
        version: pending.version,
        timestamp: pending.timestamp,
        changeset: pending.changeset,
    };
    if !handler(&[way]) {
        return Err(IngestError::Canceled);
    }
    Ok(())
}

fn emit_relation(ctx: &Ingest<'_>, pending: &Pending) -> Result<(), IngestError> {
    let Some(handler) = ctx.relations.as_ref() else {
        return Ok(());
    };
    let tags: Vec<Tag<'_>> = pending
        .tags
        .iter()
        .map(|(key, value)| Tag {
            key: key.as_str(),
            value: value.as_str(),
        })
        .collect();
    let members: Vec<RelationMember<'_>> = pending
        .members
        .iter()
        .map(|(kind, id, role)| RelationMember {
            kind: *kind,
            id: *id,
            role: role.as_str(),
        })
        .collect();
    let relation = Relation {
        id: pending.id,
        members: &members,
        tags: &tags,
        version: pending.version,
        timestamp: pending.timestamp,
        changeset: pending.changeset,
    };
    if !handler(&[relation]) {
        return Err(IngestError::Canceled);
    }
    Ok(())
}
