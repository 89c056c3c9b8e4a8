mod common;
use common::{codemap, p3_recording, P3_CODEMAP};
use tagepoch::{Error, EventStreamMatcher, EventTable, TagValue};

fn p3_table() -> EventTable {
    let cm = codemap(P3_CODEMAP);
    EventStreamMatcher::new(&cm).scan_blocks(&p3_recording()).unwrap().table
}

fn one_subject(t: &EventTable, subject: &str) -> EventTable {
    t.filter(|r| r.record.dblock_path.starts_with(subject))
}

#[test]
fn left_join_keeps_every_left_row_once() {
    let left = one_subject(&p3_table(), "s00");
    let cm = codemap("regexp\tright_bin\tlabel\n(#1) 8\t1\tfirst\n");
    let right = EventStreamMatcher::new(&cm).scan_blocks(&p3_recording()).unwrap().table;
    let right = one_subject(&right, "s00");

    let joined = left.left_join(&right, &["label"], "stream_position").unwrap();
    assert_eq!(joined.len(), left.len());
    let labels: Vec<TagValue> = joined.column_values("label").unwrap();
    assert_eq!(labels, vec!["first".into(), TagValue::Null, TagValue::Null, TagValue::Null]);
    let ticks: Vec<i64> = joined.rows().map(|r| r.get_i64("stream_position").unwrap()).collect();
    assert_eq!(ticks, vec![100, 500, 980, 1030]);

    // a requested column the left table already has
    let err = left.left_join(&right, &["stream_index"], "stream_position").unwrap_err();
    assert!(matches!(err, Error::Schema(_)));
}

#[test]
fn left_join_duplicate_right_key_is_schema_error() {
    let t = p3_table();
    let cm = codemap("regexp\tright_bin\tlabel\n(#[12])\t1\tx\n");
    let right = EventStreamMatcher::new(&cm).scan_blocks(&p3_recording()).unwrap().table;
    // both subjects share tick values
    let err = t.left_join(&right, &["label"], "stream_position").unwrap_err();
    assert!(matches!(err, Error::Schema(m) if m.contains("more than once")));
}

#[test]
fn join_on_missing_column_is_key_error() {
    let t = p3_table();
    assert!(matches!(t.left_join(&t, &["nope"], "stream_position"), Err(Error::Key { .. })));
    assert!(matches!(t.left_join(&t, &["bin"], "nope"), Err(Error::Key { column, .. }) if column == "nope"));
}

#[test]
fn relational_ops_leave_the_receiver_alone() {
    let t = p3_table();
    let before = t.clone();
    let _ = t.filter(|r| r.get_i64("bin") == Some(10));
    let _ = t.sort_by("bin").unwrap();
    let _ = t.set_index("stream_position");
    assert_eq!(t, before);
    assert_eq!(t.index(), None);
}

#[test]
fn sort_by_bin_is_stable() {
    let t = p3_table().sort_by("bin").unwrap();
    let keys: Vec<(i64, String, i64)> = t
        .rows()
        .map(|r| {
            (
                r.get_i64("bin").unwrap(),
                r.get_str("dblock_path").unwrap(),
                r.get_i64("stream_position").unwrap(),
            )
        })
        .collect();
    assert_eq!(keys[0], (10, "s00/p3/dblock_0".into(), 500));
    assert_eq!(keys[1], (10, "s00/p3/dblock_0".into(), 980));
    assert_eq!(keys[2], (10, "s01/p3/dblock_0".into(), 500));
    assert_eq!(keys.last().unwrap().0, 12);
}

#[test]
fn set_index_after_filter_succeeds() {
    let t = p3_table();
    assert!(matches!(t.set_index("stream_position"), Err(Error::Key { .. })));
    let s00 = one_subject(&t, "s00").set_index("stream_position").unwrap();
    assert_eq!(s00.index(), Some("stream_position"));
    assert_eq!(s00.filter(|_| true).index(), Some("stream_position"));
}

#[test]
fn json_export_of_table() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.json");
    let t = p3_table();
    t.write_json(&path).unwrap();
    let doc: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(doc["rows"].as_array().unwrap().len(), t.len());
    assert_eq!(doc["columns"][0]["name"], "dblock_path");
    assert_eq!(doc["columns"].as_array().unwrap().len(), t.columns().len());
}
