//! Tab-separated codemap source files.
//!
//! ```text
//! regexp	bin	animacy	response
//! (#[12])	200	_any	_any
//! (#[1]) 8 (101) 1040	2100	animate	like
//! ```
//!
//! The header's first column must be `regexp`; the second is the bin id.
//! Empty lines and lines starting with `#` are skipped. Fields are trimmed
//! and may be double-quoted.

use std::path::Path;

use crate::error::{Error, Result};

/// One declarative codemap row, still as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclRow {
    pub regexp: String,
    /// Tag cells, one per tag column.
    pub cells: Vec<String>,
}

impl DeclRow {
    pub fn new(regexp: impl Into<String>, cells: &[&str]) -> Self {
        Self {
            regexp: regexp.into(),
            cells: cells.iter().map(|c| c.to_string()).collect(),
        }
    }
}

/// Parsed codemap source: tag column names (bin id first) and rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclTable {
    pub columns: Vec<String>,
    pub rows: Vec<DeclRow>,
}

/// Parse tab-separated codemap text.
pub fn parse_tsv(text: &str) -> Result<DeclTable> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .comment(Some(b'#'))
        .flexible(false)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let header = reader.headers().map_err(csv_error)?.clone();
    if header.is_empty() {
        return Err(Error::schema("codemap has no header row"));
    }
    match header.get(0) {
        Some(first) if first.eq_ignore_ascii_case("regexp") => {}
        other => {
            return Err(Error::schema(format!(
                "codemap first column must be 'regexp', found {:?}",
                other.unwrap_or_default()
            )))
        }
    }
    let columns: Vec<String> = header.iter().skip(1).map(str::to_string).collect();
    if columns.is_empty() {
        return Err(Error::schema("codemap needs a bin id column after 'regexp'"));
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(csv_error)?;
        let mut fields = record.iter();
        let regexp = fields.next().unwrap_or_default().to_string();
        rows.push(DeclRow { regexp, cells: fields.map(str::to_string).collect() });
    }
    Ok(DeclTable { columns, rows })
}

fn csv_error(err: csv::Error) -> Error {
    match err.kind() {
        csv::ErrorKind::UnequalLengths { pos, expected_len, len } => Error::schema(format!(
            "codemap line {}: {} tag cells, header has {}",
            pos.as_ref().map_or(0, |p| p.line()),
            len.saturating_sub(1),
            expected_len.saturating_sub(1)
        )),
        _ => Error::schema(format!("codemap: {err}")),
    }
}

/// Read and parse a codemap file.
pub fn read_tsv(path: &Path) -> Result<DeclTable> {
    let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    parse_tsv(&text)
}
