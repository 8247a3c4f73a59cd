//! XML and OSC adapter coverage.

mod common;

use std::sync::Mutex;

use osm_ingest::{file_type, osc_mode, FileType, Ingest, IngestError, MemberType, OscMode};

use common::write_fixture;

const SAMPLE_OSM: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<osm version="0.6" generator="osm-ingest-tests">
  <node id="100" lat="40.7128000" lon="-74.0060000" version="2" timestamp="2021-03-01T12:00:00Z" changeset="55">
    <tag k="name" v="Test"/>
  </node>
  <node id="101" lat="40.7129000" lon="-74.0058000"/>
  <way id="10" version="1" changeset="56">
    <nd ref="1"/>
    <nd ref="3"/>
    <nd ref="2"/>
    <tag k="highway" v="residential"/>
  </way>
  <relation id="20">
    <member type="node" ref="1" role="stop"/>
    <member type="way" ref="10" role="route"/>
    <member type="relation" ref="7"/>
  </relation>
</osm>
"#;

#[test_log::test]
fn parses_all_entity_kinds() {
    let path = write_fixture("sample.osm", SAMPLE_OSM.as_bytes());

    let nodes: Mutex<Vec<(i64, i64, i64, i64, Vec<(String, String)>)>> = Mutex::new(Vec::new());
    let ways: Mutex<Vec<(i64, Vec<i64>, Vec<(String, String)>)>> = Mutex::new(Vec::new());
    let relations: Mutex<Vec<(i64, Vec<(MemberType, i64, String)>)>> = Mutex::new(Vec::new());

    Ingest::new()
        .on_nodes(|batch| {
            let mut nodes = nodes.lock().unwrap();
            for node in batch {
                let tags = node
                    .tags
                    .iter()
                    .map(|tag| (tag.key.to_owned(), tag.value.to_owned()))
                    .collect();
                nodes.push((
                    node.id,
                    node.raw_latitude,
                    node.raw_longitude,
                    node.timestamp,
                    tags,
                ));
            }
            true
        })
        .on_ways(|batch| {
            let mut ways = ways.lock().unwrap();
            for way in batch {
                let tags = way
                    .tags
                    .iter()
                    .map(|tag| (tag.key.to_owned(), tag.value.to_owned()))
                    .collect();
                ways.push((way.id, way.node_refs.to_vec(), tags));
            }
            true
        })
        .on_relations(|batch| {
            let mut relations = relations.lock().unwrap();
            for relation in batch {
                let members = relation
                    .members
                    .iter()
                    .map(|member| (member.kind, member.id, member.role.to_owned()))
                    .collect();
                relations.push((relation.id, members));
            }
            true
        })
        .read(&path)
        .unwrap();

    let nodes = nodes.into_inner().unwrap();
    assert_eq!(nodes.len(), 2);
    assert_eq!(nodes[0].0, 100);
    assert_eq!(nodes[0].1, 407_128_000);
    assert_eq!(nodes[0].2, -740_060_000);
    assert_eq!(nodes[0].3, 1_614_600_000);
    assert_eq!(nodes[0].4, vec![("name".to_owned(), "Test".to_owned())]);
    assert_eq!(nodes[1].0, 101);
    assert!(nodes[1].4.is_empty());

    let ways = ways.into_inner().unwrap();
    assert_eq!(ways.len(), 1);
    assert_eq!(ways[0].0, 10);
    assert_eq!(ways[0].1, vec![1, 3, 2]);
    assert_eq!(
        ways[0].2,
        vec![("highway".to_owned(), "residential".to_owned())]
    );

    let relations = relations.into_inner().unwrap();
    assert_eq!(relations.len(), 1);
    assert_eq!(
        relations[0].1,
        vec![
            (MemberType::Node, 1, "stop".to_owned()),
            (MemberType::Way, 10, "route".to_owned()),
            (MemberType::Relation, 7, String::new()),
        ]
    );
}

#[test_log::test]
fn osc_sections_drive_osc_mode() {
    let change = r#"<?xml version="1.0" encoding="UTF-8"?>
<osmChange version="0.6">
  <create>
    <node id="1" lat="1.0" lon="1.0"/>
  </create>
  <modify>
    <node id="2" lat="2.0" lon="2.0"/>
  </modify>
  <delete>
    <node id="3" lat="3.0" lon="3.0"/>
  </delete>
</osmChange>
"#;
    let path = write_fixture("sample.osc", change.as_bytes());

    let seen: Mutex<Vec<(i64, OscMode)>> = Mutex::new(Vec::new());
    Ingest::new()
        .on_nodes(|batch| {
            let mut seen = seen.lock().unwrap();
            for node in batch {
                seen.push((node.id, osc_mode()));
            }
            true
        })
        .read(&path)
        .unwrap();

    assert_eq!(
        seen.into_inner().unwrap(),
        vec![
            (1, OscMode::Create),
            (2, OscMode::Modify),
            (3, OscMode::Delete),
        ]
    );
    assert_eq!(osc_mode(), OscMode::Bulk);
}

#[test_log::test]
fn handler_cancels_xml_parse() {
    let path = write_fixture("cancel.osm", SAMPLE_OSM.as_bytes());
    let err = Ingest::new().on_nodes(|_| false).read(&path).unwrap_err();
    assert!(matches!(err, IngestError::Canceled));
}

#[test]
fn unknown_extension_fails_dispatch() {
    let err = Ingest::new()
        .on_nodes(|_| true)
        .read("dataset.bin")
        .unwrap_err();
    assert!(matches!(err, IngestError::UnknownFileType(_)));
}

#[test]
fn dispatch_sets_file_type() {
    let path = write_fixture("type-probe.osm", SAMPLE_OSM.as_bytes());
    Ingest::new().read(&path).unwrap();
    assert_eq!(file_type(), FileType::Xml);
}

#[test]
fn malformed_xml_fails() {
    let path = write_fixture("broken.osm", b"<osm><node id=\"1\"></way></osm>");
    let err = Ingest::new().on_nodes(|_| true).read(&path).unwrap_err();
    assert!(matches!(err, IngestError::Xml(_)));
}
