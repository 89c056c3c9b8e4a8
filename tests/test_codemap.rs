use tagepoch::codemap::table::parse_tsv;
use tagepoch::{CodeMap, CodeStream, DType, Error, TagValue};

#[test]
fn load_infers_column_types() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wr_codemap.tsv");
    std::fs::write(
        &path,
        "regexp\tbin\tfreq\tscore\tlexical\tword\n\
         # word repetition\n\
         (#[1234]) (?!(8))\t1\t12.5\t3\ttrue\tcat\n\
         (#[1234]) 8\t2\t7\t4\tfalse\tdog\n",
    )
    .unwrap();

    let cm = CodeMap::load(&path).unwrap();
    let dtypes: Vec<DType> = cm.columns().iter().map(|c| c.dtype).collect();
    assert_eq!(dtypes, vec![DType::Int, DType::Float, DType::Int, DType::Bool, DType::Str]);
    assert_eq!(cm.bin_column(), "bin");
    assert_eq!(cm.patterns()[1].tag_values[1], TagValue::Float(7.0));

    let m = cm.match_at(&CodeStream::from_codes(&[3, 8], &[0, 4]), 0).unwrap();
    assert_eq!(m.bin_id(), Some(2));
    let tags: Vec<(&str, &TagValue)> = m.tags().collect();
    assert_eq!(tags[4], ("word", &TagValue::Str("dog".into())));
}

#[test]
fn pattern_without_anchor_names_the_pattern() {
    let err = CodeMap::compile(parse_tsv("regexp\tbin\n(#1)\t1\n1 8\t2\n").unwrap()).unwrap_err();
    assert!(matches!(err, Error::Schema(m) if m.contains("pattern 1") && m.contains("found 0")));
}

#[test]
fn two_anchors_are_rejected() {
    let err = CodeMap::compile(parse_tsv("regexp\tbin\n(#1) (#8)\t1\n").unwrap()).unwrap_err();
    assert!(matches!(err, Error::Schema(m) if m.contains("found 2")));
}

#[test]
fn malformed_token_is_reported() {
    let err = CodeMap::compile(parse_tsv("regexp\tbin\n(#1) 8x\t1\n").unwrap()).unwrap_err();
    assert!(matches!(err, Error::Schema(m) if m.contains("'8x'")));
}

#[test]
fn bin_column_must_be_integer() {
    let err = CodeMap::compile(parse_tsv("regexp\tlabel\n(#1)\tstim\n").unwrap()).unwrap_err();
    assert!(matches!(err, Error::Schema(m) if m.contains("bin id column")));
}

#[test]
fn tag_column_cannot_shadow_core_column() {
    let err = CodeMap::compile(parse_tsv("regexp\tbin\tis_anchor\n(#1)\t1\tx\n").unwrap()).unwrap_err();
    assert!(matches!(err, Error::Schema(_)));
}

#[test]
fn missing_file_is_io_error() {
    let err = CodeMap::load(std::path::Path::new("/nonexistent/codemap.tsv")).unwrap_err();
    assert!(matches!(err, Error::Io { .. }));
}
