mod common;
use common::{codemap, p3_recording, P3_CODEMAP};
use std::collections::HashSet;
use tagepoch::codemap::{CodeMapTemplate, ItemTable};
use tagepoch::{scan, CodeStream, Column, DType, EventStreamMatcher, MatchPolicy, ScanOptions, TagValue};

#[test]
fn templated_item_pattern_tags_the_anchor() {
    let cols = vec![Column::new("bin_id", DType::Int), Column::new("response", DType::Str)];
    let items = ItemTable::parse_whitespace("item_id\n101\n").unwrap();
    let cm = CodeMapTemplate::new(cols, "ITEM_ID", "item_id")
        .entry("8 (#ITEM_ID) 1040", vec![TagValue::Int(2100), "like".into()])
        .unwrap()
        .expand(&items)
        .unwrap();

    let stream = CodeStream::from_codes(&[8, 101, 1040], &[10, 11, 12]);
    let table = scan(&stream, &cm).unwrap();

    assert_eq!(table.len(), 1);
    let row = table.row(0).unwrap();
    assert_eq!(row.get_i64("stream_position"), Some(11));
    assert_eq!(row.get_i64("bin_id"), Some(2100));
    assert_eq!(row.get_str("response").as_deref(), Some("like"));
    assert_eq!(row.get_i64("item_id"), Some(101));
    assert_eq!(row.get("is_anchor").unwrap().as_bool(), Some(true));
}

#[test]
fn rescanning_is_deterministic() {
    let cm = codemap(P3_CODEMAP);
    let rec = p3_recording();
    let m = EventStreamMatcher::new(&cm);
    let a = m.scan_blocks(&rec).unwrap();
    let b = m.scan_blocks(&rec).unwrap();
    assert_eq!(a.table, b.table);
    assert_eq!(
        serde_json::to_vec(&a.table.to_json()).unwrap(),
        serde_json::to_vec(&b.table.to_json()).unwrap()
    );
}

#[test]
fn unmatched_positions_have_no_rows() {
    let cm = codemap(P3_CODEMAP);
    let codes = [1, 8, 3, 2, 8, 8, 7, 2];
    let ticks: Vec<i64> = (0..codes.len() as i64).map(|i| i * 10).collect();
    let stream = CodeStream::from_codes(&codes, &ticks);
    let table = scan(&stream, &cm).unwrap();

    let rows: HashSet<usize> = table.records().iter().map(|r| r.stream_index).collect();
    for i in 0..stream.len() {
        let matched = cm.match_at(&stream, i).is_some();
        assert_eq!(rows.contains(&i), matched, "position {i}");
    }
    assert_eq!(rows, HashSet::from([0, 3, 7]));
}

#[test]
fn lookahead_past_stream_end_is_satisfied() {
    let cm = codemap("regexp\tbin\n(#2) (?!(1040|2064))\t5\n(#3) 1040\t6\n");
    let stream = CodeStream::from_codes(&[3, 2], &[0, 1]);
    let table = scan(&stream, &cm).unwrap();
    // 2 at the end: lookahead vacuous. 3 is followed by 2, not 1040.
    assert_eq!(table.len(), 1);
    assert_eq!(table.records()[0].stream_index, 1);
}

#[test]
fn earlier_pattern_masks_later_one() {
    let cm = codemap("regexp\tbin\n(#1) (?!(8))\t1\n(#1) 9\t2\n(#1) 8\t3\n");
    let stream = CodeStream::from_codes(&[1, 9, 1, 8], &[0, 1, 2, 3]);
    let first = scan(&stream, &cm).unwrap();
    let bins: Vec<i64> = first.rows().map(|r| r.get_i64("bin").unwrap()).collect();
    assert_eq!(bins, vec![1, 3]);

    let opts = ScanOptions { policy: MatchPolicy::AllPatterns, ..Default::default() };
    let all = EventStreamMatcher::with_options(&cm, opts).scan("b", &stream).unwrap().table;
    let bins: Vec<i64> = all.rows().map(|r| r.get_i64("bin").unwrap()).collect();
    assert_eq!(bins, vec![1, 2, 3]);
}

#[test]
fn blocks_are_scanned_independently() {
    let cm = codemap(P3_CODEMAP);
    let rec = p3_recording();
    let scan = EventStreamMatcher::new(&cm).scan_blocks(&rec).unwrap();

    assert!(scan.summary.complete);
    assert_eq!(scan.summary.blocks.len(), 4);
    assert_eq!(scan.summary.positions(), 12);
    assert_eq!(scan.summary.rows(), 8);

    // stim 1 at 980 is the last code of its block: the 8 logged in the next
    // block does not complete "(#1) 8", the catch-all matches instead.
    let at_980 = scan
        .table
        .rows()
        .find(|r| r.get_i64("stream_position") == Some(980))
        .unwrap();
    assert_eq!(at_980.get_i64("bin"), Some(10));
    assert_eq!(at_980.get_str("dblock_path").as_deref(), Some("s00/p3/dblock_0"));

    let paths: Vec<&str> = scan.table.records().iter().map(|r| r.dblock_path.as_str()).collect();
    assert_eq!(&paths[..4], &["s00/p3/dblock_0", "s00/p3/dblock_0", "s00/p3/dblock_0", "s00/p3/dblock_1"]);
}

#[test]
fn log_flags_and_condition_codes_are_carried() {
    use tagepoch::LogEvent;
    let cm = codemap("regexp\tbin\n(#5)\t1\n");
    let stream = CodeStream::new(vec![LogEvent { tick: 40, code: 5, ccode: 3, flags: 32 }]);
    let table = scan(&stream, &cm).unwrap();
    let row = table.row(0).unwrap();
    assert_eq!(row.get_i64("log_ccode"), Some(3));
    assert_eq!(row.get_i64("log_flags"), Some(32));
    assert_eq!(row.get_str("regexp").as_deref(), Some("(#5)"));
}
