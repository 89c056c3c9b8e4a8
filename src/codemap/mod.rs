//! Codemaps: ordered code-sequence patterns with tag values.
//!
//! A [`CodeMap`] is compiled once from a declarative table (see [`table`]) or
//! from expanded templates (see [`template`]) and then queried per stream
//! position. Patterns are tried in declaration order; the first pattern that
//! matches at a position wins. There is no longest-match or
//! most-specific-match rule, so a general pattern declared early masks a
//! specific one declared later for the same anchor.

pub mod pattern;
pub mod table;
pub mod template;

use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::error::{Error, Result};
use crate::stream::CodeStream;
use crate::table::{Column, CORE_COLUMNS};
use crate::value::{DType, TagValue};

pub use pattern::{CodeClass, CodeSequencePattern, Token};
pub use table::{DeclRow, DeclTable};
pub use template::{CodeMapTemplate, ItemTable, TemplateEntry};

/// A pattern that matched, with access to its tags.
#[derive(Debug, Clone, Copy)]
pub struct MatchResult<'a> {
    pub pattern: &'a CodeSequencePattern,
    columns: &'a [Column],
}

impl<'a> MatchResult<'a> {
    pub fn pattern_id(&self) -> usize {
        self.pattern.pattern_id
    }

    /// Tag fields in column order.
    pub fn tags(&self) -> impl Iterator<Item = (&'a str, &'a TagValue)> {
        self.columns
            .iter()
            .map(|c| c.name.as_str())
            .zip(self.pattern.tag_values.iter())
    }

    /// Bin id (first tag column).
    pub fn bin_id(&self) -> Option<i64> {
        self.pattern.tag_values.first().and_then(TagValue::as_i64)
    }
}

#[derive(Debug, Clone)]
pub struct CodeMap {
    columns: Vec<Column>,
    patterns: Vec<CodeSequencePattern>,
    by_anchor: HashMap<i64, Vec<usize>>,
    any_anchor: Vec<usize>,
}

impl CodeMap {
    /// Compile a declarative table.
    ///
    /// Tag column types are inferred over all rows; the first tag column is
    /// the bin id and must be integer-valued.
    pub fn compile(table: DeclTable) -> Result<Self> {
        let DeclTable { columns: names, rows } = table;
        let columns: Vec<Column> = names
            .iter()
            .enumerate()
            .map(|(j, name)| Column {
                name: name.clone(),
                dtype: DType::infer(rows.iter().map(|r| r.cells.get(j).map_or("", String::as_str))),
            })
            .collect();

        let mut decl = Vec::with_capacity(rows.len());
        for (pattern_id, row) in rows.iter().enumerate() {
            if row.cells.len() != columns.len() {
                return Err(Error::schema(format!(
                    "pattern {pattern_id} '{}': {} tag cells, expected {}",
                    row.regexp,
                    row.cells.len(),
                    columns.len()
                )));
            }
            let tokens = pattern::tokenize(&row.regexp).map_err(|bad| {
                Error::schema(format!(
                    "pattern {pattern_id} '{}': malformed token '{bad}'",
                    row.regexp
                ))
            })?;
            let values = row
                .cells
                .iter()
                .zip(&columns)
                .map(|(cell, col)| {
                    TagValue::parse_as(cell, col.dtype).ok_or_else(|| {
                        Error::schema(format!(
                            "pattern {pattern_id}: '{cell}' is not a {} for column '{}'",
                            col.dtype, col.name
                        ))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            decl.push((tokens, values));
        }
        Self::from_patterns(columns, decl)
    }

    /// Build from already-tokenized patterns and typed tag values.
    pub fn from_patterns(columns: Vec<Column>, rows: Vec<(Vec<Token>, Vec<TagValue>)>) -> Result<Self> {
        check_columns(&columns)?;

        let mut patterns = Vec::with_capacity(rows.len());
        for (pattern_id, (tokens, values)) in rows.into_iter().enumerate() {
            if values.len() != columns.len() {
                return Err(Error::schema(format!(
                    "pattern {pattern_id} '{}': {} tag values, expected {}",
                    pattern::render(&tokens),
                    values.len(),
                    columns.len()
                )));
            }
            for (value, col) in values.iter().zip(&columns) {
                if value.dtype().is_some_and(|d| d != col.dtype) {
                    return Err(Error::schema(format!(
                        "pattern {pattern_id}: value {value} does not match {} column '{}'",
                        col.dtype, col.name
                    )));
                }
            }
            patterns.push(CodeSequencePattern::compile(pattern_id, &tokens, values)?);
        }

        let mut by_anchor: HashMap<i64, Vec<usize>> = HashMap::new();
        let mut any_anchor = Vec::new();
        for p in &patterns {
            match p.anchor_codes() {
                Some(codes) => {
                    let unique: HashSet<i64> = codes.iter().copied().collect();
                    for code in unique {
                        by_anchor.entry(code).or_default().push(p.pattern_id);
                    }
                }
                None => any_anchor.push(p.pattern_id),
            }
        }

        log::debug!(
            "compiled codemap: {} patterns, {} tag columns, {} anchor codes",
            patterns.len(),
            columns.len(),
            by_anchor.len()
        );
        Ok(Self { columns, patterns, by_anchor, any_anchor })
    }

    /// Read and compile a tab-separated codemap file.
    pub fn load(path: &Path) -> Result<Self> {
        Self::compile(table::read_tsv(path)?).map_err(|e| match e {
            Error::Schema(msg) => Error::Schema(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    /// Tag columns, bin id first.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn bin_column(&self) -> &str {
        &self.columns[0].name
    }

    pub fn patterns(&self) -> &[CodeSequencePattern] {
        &self.patterns
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// First pattern, in declaration order, matching with its anchor at
    /// stream index `position`.
    pub fn match_at(&self, stream: &CodeStream, position: usize) -> Option<MatchResult<'_>> {
        let code = stream.get(position)?.code;
        self.candidates(code)
            .map(|id| &self.patterns[id])
            .find(|p| p.matches_at(stream, position))
            .map(|pattern| MatchResult { pattern, columns: &self.columns })
    }

    /// Every pattern matching at `position`, in declaration order.
    pub fn matches_at(&self, stream: &CodeStream, position: usize) -> Vec<MatchResult<'_>> {
        let Some(ev) = stream.get(position) else {
            return Vec::new();
        };
        self.candidates(ev.code)
            .map(|id| &self.patterns[id])
            .filter(|p| p.matches_at(stream, position))
            .map(|pattern| MatchResult { pattern, columns: &self.columns })
            .collect()
    }

    /// The pattern with `pattern_id` as a match result.
    pub fn pattern_result(&self, pattern_id: usize) -> Option<MatchResult<'_>> {
        self.patterns
            .get(pattern_id)
            .map(|pattern| MatchResult { pattern, columns: &self.columns })
    }

    /// Ids of patterns whose anchor can match `code`, ascending.
    fn candidates(&self, code: i64) -> impl Iterator<Item = usize> + '_ {
        let keyed: &[usize] = self.by_anchor.get(&code).map(Vec::as_slice).unwrap_or(&[]);
        merge_sorted(keyed, &self.any_anchor)
    }
}

fn check_columns(columns: &[Column]) -> Result<()> {
    let first = columns
        .first()
        .ok_or_else(|| Error::schema("codemap has no tag columns; a bin id column is required"))?;
    if first.dtype != DType::Int {
        return Err(Error::schema(format!(
            "bin id column '{}' must be integer, inferred {}",
            first.name, first.dtype
        )));
    }
    let mut seen = HashSet::new();
    for col in columns {
        if col.name.is_empty() {
            return Err(Error::schema("codemap has an unnamed tag column"));
        }
        if CORE_COLUMNS.contains(&col.name.as_str()) {
            return Err(Error::schema(format!(
                "tag column '{}' collides with an event table column",
                col.name
            )));
        }
        if !seen.insert(col.name.as_str()) {
            return Err(Error::schema(format!("duplicate tag column '{}'", col.name)));
        }
    }
    Ok(())
}

/// Merge two ascending id lists, preserving ascending order.
fn merge_sorted<'a>(a: &'a [usize], b: &'a [usize]) -> impl Iterator<Item = usize> + 'a {
    let (mut i, mut j) = (0, 0);
    std::iter::from_fn(move || match (a.get(i), b.get(j)) {
        (Some(&x), Some(&y)) if x <= y => {
            i += 1;
            Some(x)
        }
        (_, Some(&y)) => {
            j += 1;
            Some(y)
        }
        (Some(&x), None) => {
            i += 1;
            Some(x)
        }
        (None, None) => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codemap(rows: &[(&str, &[&str])]) -> Result<CodeMap> {
        CodeMap::compile(DeclTable {
            columns: vec!["bin".into(), "response".into()],
            rows: rows.iter().map(|(re, cells)| DeclRow::new(*re, cells)).collect(),
        })
    }

    #[test]
    fn first_declared_pattern_wins() {
        let cm = codemap(&[
            ("(#[12]) 8", &["200", "_any"]),
            ("(#1) 8 1040", &["2100", "like"]),
        ])
        .unwrap();
        let s = CodeStream::from_codes(&[1, 8, 1040], &[0, 10, 20]);
        let m = cm.match_at(&s, 0).unwrap();
        assert_eq!(m.pattern_id(), 0);
        assert_eq!(m.bin_id(), Some(200));
        assert_eq!(cm.matches_at(&s, 0).len(), 2);
    }

    #[test]
    fn wildcard_anchor_interleaves_in_declaration_order() {
        let cm = codemap(&[
            ("(#5)", &["1", "a"]),
            ("(#.)", &["2", "b"]),
            ("(#5) 6", &["3", "c"]),
        ])
        .unwrap();
        let s = CodeStream::from_codes(&[5, 6], &[0, 1]);
        let ids: Vec<usize> = cm.matches_at(&s, 0).iter().map(|m| m.pattern_id()).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn column_types_are_inferred() {
        let cm = codemap(&[("(#1)", &["10", "like"]), ("(#2)", &["11", "dislike"])]).unwrap();
        assert_eq!(cm.columns()[0].dtype, DType::Int);
        assert_eq!(cm.columns()[1].dtype, DType::Str);
        let s = CodeStream::from_codes(&[2], &[0]);
        let tags: Vec<_> = cm.match_at(&s, 0).unwrap().tags().collect();
        assert_eq!(tags[1], ("response", &TagValue::from("dislike")));
    }

    #[test]
    fn non_integer_bin_column_is_rejected() {
        let err = codemap(&[("(#1)", &["x", "like"])]).unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }

    #[test]
    fn missing_anchor_names_pattern() {
        let err = codemap(&[("(#1)", &["1", "a"]), ("8 1040", &["2", "b"])]).unwrap_err();
        assert!(matches!(err, Error::Schema(m) if m.contains("pattern 1")));
    }

    #[test]
    fn reserved_column_name_is_rejected() {
        let err = CodeMap::compile(DeclTable {
            columns: vec!["bin".into(), "is_anchor".into()],
            rows: vec![DeclRow::new("(#1)", &["1", "x"])],
        })
        .unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }
}
