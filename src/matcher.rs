//! Single-pass code-stream scanning.
//!
//! [`EventStreamMatcher::scan`] walks a stream left to right once, asks the
//! codemap for a match at every position and emits one anchor row per
//! matched position. Unmatched positions produce nothing, so tables stay
//! much smaller than the stream.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::block::BlockSource;
use crate::cancel::{cancelled, CancelFlag};
use crate::codemap::{CodeMap, MatchResult};
use crate::error::Result;
use crate::stream::CodeStream;
use crate::table::{EventRecord, EventTable};

/// How competing patterns at one position are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// The first pattern in declaration order claims the position.
    #[default]
    FirstMatch,
    /// Every matching pattern yields its own row at the position, in
    /// declaration order.
    AllPatterns,
}

#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub policy: MatchPolicy,
    /// Emit `is_anchor = false` rows for captured context tokens at
    /// positions no anchor row claims.
    pub emit_context_rows: bool,
    pub cancel: Option<CancelFlag>,
}

/// Row counts for one scanned block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockScan {
    pub dblock_path: String,
    pub positions: usize,
    pub anchor_rows: usize,
    pub context_rows: usize,
}

/// Diagnostics returned with every scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub blocks: Vec<BlockScan>,
    /// False when the scan was cancelled before the last position.
    pub complete: bool,
}

impl ScanSummary {
    pub fn rows(&self) -> usize {
        self.blocks.iter().map(|b| b.anchor_rows + b.context_rows).sum()
    }

    pub fn positions(&self) -> usize {
        self.blocks.iter().map(|b| b.positions).sum()
    }
}

#[derive(Debug, Clone)]
pub struct Scan {
    pub table: EventTable,
    pub summary: ScanSummary,
}

pub struct EventStreamMatcher<'a> {
    codemap: &'a CodeMap,
    options: ScanOptions,
}

impl<'a> EventStreamMatcher<'a> {
    pub fn new(codemap: &'a CodeMap) -> Self {
        Self { codemap, options: ScanOptions::default() }
    }

    pub fn with_options(codemap: &'a CodeMap, options: ScanOptions) -> Self {
        Self { codemap, options }
    }

    /// Scan one block's code stream.
    pub fn scan(&self, dblock_path: &str, stream: &CodeStream) -> Result<Scan> {
        let (records, block, complete) = self.scan_records(dblock_path, stream);
        let table = EventTable::new(self.codemap.columns().to_vec(), records)?;
        Ok(Scan { table, summary: ScanSummary { blocks: vec![block], complete } })
    }

    /// Scan every block of `source` independently, in block order.
    /// Patterns never span a block boundary.
    pub fn scan_blocks<S: BlockSource + ?Sized>(&self, source: &S) -> Result<Scan> {
        let mut records = Vec::new();
        let mut blocks = Vec::new();
        let mut complete = true;
        for path in source.block_paths() {
            let block = source.get_block(&path)?;
            let (recs, summary, done) = self.scan_records(&path, block.stream());
            log::debug!(
                "scanned {path}: {} codes, {} anchor rows, {} context rows",
                summary.positions,
                summary.anchor_rows,
                summary.context_rows
            );
            records.extend(recs);
            blocks.push(summary);
            if !done {
                complete = false;
                break;
            }
        }
        let table = EventTable::new(self.codemap.columns().to_vec(), records)?;
        let summary = ScanSummary { blocks, complete };
        log::info!(
            "event table: {} rows from {} codes in {} blocks{}",
            summary.rows(),
            summary.positions(),
            summary.blocks.len(),
            if complete { "" } else { " (cancelled)" }
        );
        Ok(Scan { table, summary })
    }

    fn scan_records(&self, dblock_path: &str, stream: &CodeStream) -> (Vec<EventRecord>, BlockScan, bool) {
        let mut anchors: Vec<EventRecord> = Vec::new();
        let mut context: Vec<(usize, usize, usize)> = Vec::new(); // (position, anchor position, pattern id)
        let mut complete = true;

        for i in 0..stream.len() {
            if cancelled(self.options.cancel.as_ref()) {
                complete = false;
                break;
            }
            let matched: Vec<MatchResult<'_>> = match self.options.policy {
                MatchPolicy::FirstMatch => self.codemap.match_at(stream, i).into_iter().collect(),
                MatchPolicy::AllPatterns => self.codemap.matches_at(stream, i),
            };
            for m in matched {
                anchors.push(record(dblock_path, stream, i, i, &m));
                if self.options.emit_context_rows {
                    for off in m.pattern.captured_offsets() {
                        if let Some(j) = i.checked_add_signed(off).filter(|&j| j < stream.len()) {
                            context.push((j, i, m.pattern_id()));
                        }
                    }
                }
            }
        }

        let claimed: HashSet<usize> = anchors.iter().map(|r| r.stream_index).collect();
        let mut context_claimed: HashSet<usize> = HashSet::new();
        let mut context_rows = Vec::new();
        for (j, anchor_pos, pattern_id) in context {
            if claimed.contains(&j) || !context_claimed.insert(j) {
                continue;
            }
            if let Some(m) = self.codemap.pattern_result(pattern_id) {
                context_rows.push(record(dblock_path, stream, j, anchor_pos, &m));
            }
        }

        let block = BlockScan {
            dblock_path: dblock_path.to_string(),
            positions: stream.len(),
            anchor_rows: anchors.len(),
            context_rows: context_rows.len(),
        };
        let mut records = anchors;
        records.extend(context_rows);
        records.sort_by_key(|r| r.stream_index);
        (records, block, complete)
    }
}

fn record(
    dblock_path: &str,
    stream: &CodeStream,
    position: usize,
    anchor_position: usize,
    m: &MatchResult<'_>,
) -> EventRecord {
    let ev = stream.events()[position];
    let anchor = stream.events()[anchor_position];
    EventRecord {
        dblock_path: dblock_path.to_string(),
        stream_index: position,
        stream_position: ev.tick,
        anchor_tick: anchor.tick,
        anchor_code: anchor.code,
        match_code: ev.code,
        log_ccode: ev.ccode,
        log_flags: ev.flags,
        pattern_id: m.pattern_id(),
        regexp: m.pattern.regexp.clone(),
        is_anchor: position == anchor_position,
        tags: m.pattern.tag_values.clone(),
    }
}

/// Scan one stream with default options.
pub fn scan(stream: &CodeStream, codemap: &CodeMap) -> Result<EventTable> {
    EventStreamMatcher::new(codemap).scan("", stream).map(|s| s.table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codemap::{DeclRow, DeclTable};

    fn codemap(rows: &[(&str, &[&str])]) -> CodeMap {
        CodeMap::compile(DeclTable {
            columns: vec!["bin".into(), "response".into()],
            rows: rows.iter().map(|(re, cells)| DeclRow::new(*re, cells)).collect(),
        })
        .unwrap()
    }

    #[test]
    fn one_row_per_matched_position() {
        let cm = codemap(&[("(#[12])", &["200", "_any"]), ("(#1) 8", &["2100", "x"])]);
        let s = CodeStream::from_codes(&[1, 8, 2, 99], &[0, 10, 20, 30]);
        let t = scan(&s, &cm).unwrap();
        let pos: Vec<i64> = t.records().iter().map(|r| r.stream_position).collect();
        assert_eq!(pos, vec![0, 20]);
        assert!(t.records().iter().all(|r| r.pattern_id == 0 && r.is_anchor));
    }

    #[test]
    fn all_patterns_policy_keeps_declaration_order() {
        let cm = codemap(&[("(#[12])", &["200", "_any"]), ("(#1) 8", &["2100", "x"])]);
        let s = CodeStream::from_codes(&[1, 8], &[0, 10]);
        let opts = ScanOptions { policy: MatchPolicy::AllPatterns, ..Default::default() };
        let t = EventStreamMatcher::with_options(&cm, opts).scan("b", &s).unwrap().table;
        let ids: Vec<usize> = t.records().iter().map(|r| r.pattern_id).collect();
        assert_eq!(ids, vec![0, 1]);
    }

    #[test]
    fn context_rows_fill_unclaimed_positions_only() {
        let cm = codemap(&[("(#1) 8 (101)", &["1", "a"]), ("(#101)", &["2", "b"]), ("(#8) (?!(0))", &["3", "c"])]);
        let opts = ScanOptions { emit_context_rows: true, ..Default::default() };
        let m = EventStreamMatcher::with_options(&cm, opts);

        // 101 is claimed by its own anchor row
        let s = CodeStream::from_codes(&[1, 8, 101], &[0, 5, 9]);
        let scan = m.scan("b", &s).unwrap();
        assert_eq!(scan.summary.blocks[0].context_rows, 0);
        assert_eq!(scan.table.len(), 3);

        let cm = codemap(&[("(#1) 8 (102)", &["1", "a"])]);
        let m = EventStreamMatcher::with_options(&cm, ScanOptions { emit_context_rows: true, ..Default::default() });
        let s = CodeStream::from_codes(&[1, 8, 102], &[0, 5, 9]);
        let t = m.scan("b", &s).unwrap().table;
        assert_eq!(t.len(), 2);
        let ctx = &t.records()[1];
        assert!(!ctx.is_anchor);
        assert_eq!((ctx.stream_position, ctx.anchor_tick, ctx.anchor_code), (9, 0, 1));
    }

    #[test]
    fn cancelled_scan_is_marked_incomplete() {
        let cm = codemap(&[("(#1)", &["1", "a"])]);
        let flag = CancelFlag::new();
        flag.cancel();
        let opts = ScanOptions { cancel: Some(flag), ..Default::default() };
        let s = CodeStream::from_codes(&[1, 1], &[0, 1]);
        let scan = EventStreamMatcher::with_options(&cm, opts).scan("b", &s).unwrap();
        assert!(!scan.summary.complete);
        assert!(scan.table.is_empty());
    }
}
