//! Time-locked epoching.
//!
//! Binds each event-table row to the inclusive tick window
//! `[tick + pre, tick + post]` inside the block that owns the event, and
//! borrows the `[C, post - pre + 1]` sample slice from that block. Windows
//! never cross a block boundary: a row whose window leaves its block is
//! dropped and counted, the rest of the set is kept.
//!
//! ```text
//!   block [0, 2000)        tick 1000, pre -50, post 50
//!   ─────────────────────────[950 ─── 1050]───────────   retained
//!   block [0, 1000)        tick 1000
//!   ──────────────────[950 ─── 999] ✗ 1050               dropped (bounds)
//! ```
use std::path::Path;

use ndarray::ArrayView2;
use serde::Serialize;

use crate::block::{BlockSource, SignalBlock};
use crate::cancel::{cancelled, CancelFlag};
use crate::error::{Error, Result};
use crate::export::{ExportFormat, TabularExporter, EPOCH_ID_COLUMN, TIME_COLUMN};
use crate::table::{EventRecord, EventTable};

// ── Epoch set ─────────────────────────────────────────────────────────────

/// One retained event row bound to a signal window.
#[derive(Debug, Clone)]
pub struct Epoch<'a> {
    pub epoch_id: usize,
    /// Row of the time-lock event in the table passed to `set_epochs`.
    pub row: usize,
    pub dblock_path: String,
    /// Tick of the time-lock event.
    pub tick: i64,
    /// Inclusive tick range `[tick + pre, tick + post]`.
    pub sample_range: (i64, i64),
    /// `[C, T]` view into the owning block.
    pub signal: ArrayView2<'a, f64>,
}

/// A row dropped during extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DroppedRow {
    pub row: usize,
    pub dblock_path: String,
    pub tick: i64,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EpochDiagnostics {
    pub retained: usize,
    pub dropped_bounds: usize,
    pub dropped_block_mismatch: usize,
    /// The first few dropped rows, capped by the extractor.
    pub sampled: Vec<DroppedRow>,
    /// False when extraction was cancelled before the last row.
    pub complete: bool,
}

impl EpochDiagnostics {
    pub fn dropped(&self) -> usize {
        self.dropped_bounds + self.dropped_block_mismatch
    }
}

/// Epochs sharing one `(name, pre, post)` window.
#[derive(Debug, Clone)]
pub struct EpochSet<'a> {
    pub name: String,
    pub pre: i64,
    pub post: i64,
    /// Retained time-lock rows; row `i` belongs to epoch `i`.
    pub events: EventTable,
    /// Channel names shared by every epoch, in block order.
    pub channels: Vec<String>,
    epochs: Vec<Epoch<'a>>,
    pub diagnostics: EpochDiagnostics,
}

impl<'a> EpochSet<'a> {
    #[inline]
    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn epochs(&self) -> &[Epoch<'a>] {
        &self.epochs
    }

    /// Samples per epoch.
    pub fn n_times(&self) -> usize {
        (self.post - self.pre + 1) as usize
    }

    /// Tick offsets from the time-lock event, `pre..=post`.
    pub fn times(&self) -> Vec<i64> {
        (self.pre..=self.post).collect()
    }

    /// Export column names: event columns, channels, `epoch_id`, `time`.
    pub fn column_names(&self) -> Vec<String> {
        self.events
            .columns()
            .into_iter()
            .map(|c| c.name)
            .chain(self.channels.iter().cloned())
            .chain([EPOCH_ID_COLUMN.to_string(), TIME_COLUMN.to_string()])
            .collect()
    }

    pub fn export(&self, destination: &Path, format: ExportFormat) -> Result<()> {
        TabularExporter.export(self, destination, format)
    }
}

/// Write `set` to `destination` in the encoding named by `format`
/// (`"columnar-flat"`, `"feather"`, ...).
pub fn export_epochs(set: &EpochSet<'_>, destination: &Path, format: &str) -> Result<()> {
    TabularExporter.export_tagged(set, destination, format)
}

// ── Extractor ─────────────────────────────────────────────────────────────

pub struct EpochExtractor<'a, S: BlockSource + ?Sized> {
    source: &'a S,
    max_sampled_drops: usize,
    cancel: Option<CancelFlag>,
}

struct Binding<'a> {
    block: &'a SignalBlock,
    signal: ArrayView2<'a, f64>,
    range: (i64, i64),
}

impl<'a, S: BlockSource + ?Sized> EpochExtractor<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self { source, max_sampled_drops: 10, cancel: None }
    }

    pub fn with_max_sampled_drops(mut self, n: usize) -> Self {
        self.max_sampled_drops = n;
        self
    }

    pub fn with_cancel(mut self, flag: CancelFlag) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Bind every row of `table` to `[tick + pre, tick + post]`.
    ///
    /// Rows whose window leaves the owning block are dropped and counted in
    /// [`EpochSet::diagnostics`]. Fails on `pre >= post`, on an unknown
    /// block path, and when blocks disagree on the channel list.
    pub fn set_epochs(&self, name: &str, table: &EventTable, pre: i64, post: i64) -> Result<EpochSet<'a>> {
        if pre >= post {
            return Err(Error::schema(format!("epoch '{name}': pre ({pre}) must be less than post ({post})")));
        }

        let mut diagnostics = EpochDiagnostics { complete: true, ..Default::default() };
        let mut channels: Option<Vec<String>> = None;
        let mut kept_rows = Vec::new();
        let mut epochs = Vec::new();

        for (row, record) in table.records().iter().enumerate() {
            if cancelled(self.cancel.as_ref()) {
                diagnostics.complete = false;
                break;
            }
            let binding = match self.bind(record, pre, post) {
                Ok(b) => b,
                Err(e) if e.is_row_level() => {
                    match &e {
                        Error::Bounds { .. } => diagnostics.dropped_bounds += 1,
                        _ => diagnostics.dropped_block_mismatch += 1,
                    }
                    if diagnostics.sampled.len() < self.max_sampled_drops {
                        diagnostics.sampled.push(DroppedRow {
                            row,
                            dblock_path: record.dblock_path.clone(),
                            tick: record.stream_position,
                            reason: e.to_string(),
                        });
                    }
                    continue;
                }
                Err(e) => return Err(e),
            };

            let names = binding.block.channel_names();
            match &channels {
                None => {
                    check_channel_names(name, table, &names)?;
                    channels = Some(names.iter().map(|s| s.to_string()).collect());
                }
                Some(first) if first.iter().map(String::as_str).ne(names.iter().copied()) => {
                    return Err(Error::schema(format!(
                        "epoch '{name}': block '{}' channels {names:?} differ from {first:?}",
                        binding.block.path
                    )));
                }
                Some(_) => {}
            }

            epochs.push(Epoch {
                epoch_id: epochs.len(),
                row,
                dblock_path: binding.block.path.clone(),
                tick: record.stream_position,
                sample_range: binding.range,
                signal: binding.signal,
            });
            kept_rows.push(row);
        }

        diagnostics.retained = epochs.len();
        if diagnostics.dropped() > 0 {
            log::warn!(
                "epoch '{name}': dropped {} of {} rows ({} out of bounds, {} across blocks)",
                diagnostics.dropped(),
                table.len(),
                diagnostics.dropped_bounds,
                diagnostics.dropped_block_mismatch
            );
        }
        log::info!("epoch '{name}' [{pre}, {post}]: {} epochs", epochs.len());

        let channels = match channels {
            Some(channels) => channels,
            None => {
                let names = self.default_channels(table);
                check_channel_names(name, table, &names)?;
                names.iter().map(|s| s.to_string()).collect()
            }
        };

        Ok(EpochSet {
            name: name.to_string(),
            pre,
            post,
            events: table.select(&kept_rows),
            channels,
            epochs,
            diagnostics,
        })
    }

    /// Channels of the first row's block, else of the source's first block.
    /// Used when no row was retained, so an empty set keeps its columns.
    fn default_channels(&self, table: &EventTable) -> Vec<&'a str> {
        let source: &'a S = self.source;
        table
            .records()
            .iter()
            .filter(|r| !r.dblock_path.is_empty())
            .find_map(|r| source.get_block(&r.dblock_path).ok())
            .or_else(|| source.block_paths().iter().find_map(|p| source.get_block(p).ok()))
            .map(SignalBlock::channel_names)
            .unwrap_or_default()
    }

    /// Resolve the owning block and the window for one row. Row-level
    /// failures come back as [`Error::Bounds`] or [`Error::BlockMismatch`].
    fn bind(&self, record: &EventRecord, pre: i64, post: i64) -> Result<Binding<'a>> {
        let source: &'a S = self.source;
        let tick = record.stream_position;
        let (start, end) = (tick + pre, tick + post);

        let block = if record.dblock_path.is_empty() {
            let found = source
                .block_paths()
                .iter()
                .filter_map(|p| source.get_block(p).ok())
                .find(|b| b.contains(tick));
            match found {
                Some(b) => b,
                None => {
                    return Err(Error::Bounds { block: String::new(), start, end, lo: tick, hi: tick });
                }
            }
        } else {
            source.get_block(&record.dblock_path)?
        };

        if let Some(signal) = block.window(start, end) {
            return Ok(Binding { block, signal, range: (start, end) });
        }

        let group = block.data_group();
        let outside = [start, end].into_iter().filter(|&t| !block.contains(t));
        for t in outside {
            if let Some(other) = source.block_at(group, t).filter(|o| o.path != block.path) {
                return Err(Error::BlockMismatch {
                    block: block.path.clone(),
                    other: other.path.clone(),
                    start,
                    end,
                });
            }
        }
        Err(Error::Bounds {
            block: block.path.clone(),
            start,
            end,
            lo: block.start_tick(),
            hi: block.end_tick(),
        })
    }
}

fn check_channel_names(name: &str, table: &EventTable, channels: &[&str]) -> Result<()> {
    for ch in channels {
        if table.has_column(ch) || *ch == EPOCH_ID_COLUMN || *ch == TIME_COLUMN {
            return Err(Error::schema(format!("epoch '{name}': channel '{ch}' collides with a table column")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockHeader, ChannelInfo, Recording};
    use crate::stream::LogEvent;
    use crate::table::Column;
    use crate::value::{DType, TagValue};
    use ndarray::Array2;

    fn block(path: &str, start: i64, n: usize, chans: &[&str]) -> SignalBlock {
        let header = BlockHeader {
            sfreq: 250.0,
            start_tick: start,
            channels: chans.iter().map(|c| ChannelInfo::eeg(c)).collect(),
        };
        let data = Array2::from_shape_fn((chans.len(), n), |(c, t)| (c as i64 * 100_000 + start + t as i64) as f64);
        SignalBlock::new(path, header, data, vec![LogEvent::new(start, 1)]).unwrap()
    }

    fn row(path: &str, tick: i64) -> EventRecord {
        EventRecord {
            dblock_path: path.into(),
            stream_index: 0,
            stream_position: tick,
            anchor_tick: tick,
            anchor_code: 1,
            match_code: 1,
            log_ccode: 0,
            log_flags: 0,
            pattern_id: 0,
            regexp: "(#1)".into(),
            is_anchor: true,
            tags: vec![TagValue::Int(100)],
        }
    }

    fn table(rows: Vec<EventRecord>) -> EventTable {
        EventTable::new(vec![Column::new("bin", DType::Int)], rows).unwrap()
    }

    #[test]
    fn window_inside_block_is_retained() {
        let mut rec = Recording::new();
        rec.add_block(block("s00/dblock_0", 0, 2000, &["Fz"])).unwrap();
        let set = EpochExtractor::new(&rec).set_epochs("e", &table(vec![row("s00/dblock_0", 1000)]), -50, 50).unwrap();
        assert_eq!(set.len(), 1);
        let ep = &set.epochs()[0];
        assert_eq!(ep.sample_range, (950, 1050));
        assert_eq!(ep.signal.dim(), (1, 101));
        assert_eq!(ep.signal[[0, 0]], 950.0);
        assert_eq!(set.diagnostics.dropped(), 0);
    }

    #[test]
    fn window_past_block_end_is_dropped() {
        let mut rec = Recording::new();
        rec.add_block(block("s00/dblock_0", 0, 1000, &["Fz"])).unwrap();
        let set = EpochExtractor::new(&rec).set_epochs("e", &table(vec![row("s00/dblock_0", 1000)]), -50, 50).unwrap();
        assert!(set.is_empty());
        assert_eq!(set.diagnostics.dropped_bounds, 1);
        assert_eq!(set.diagnostics.sampled[0].tick, 1000);
        assert!(set.diagnostics.complete);
    }

    #[test]
    fn window_reaching_next_block_is_a_mismatch() {
        let mut rec = Recording::new();
        rec.add_block(block("s00/dblock_0", 0, 1000, &["Fz"])).unwrap();
        rec.add_block(block("s00/dblock_1", 1000, 1000, &["Fz"])).unwrap();
        let t = table(vec![row("s00/dblock_0", 980), row("s00/dblock_1", 1500)]);
        let set = EpochExtractor::new(&rec).set_epochs("e", &t, -50, 50).unwrap();
        assert_eq!(set.diagnostics.dropped_block_mismatch, 1);
        assert_eq!(set.len(), 1);
        assert_eq!(set.epochs()[0].row, 1);
        assert_eq!(set.events.records()[0].stream_position, 1500);
    }

    #[test]
    fn rows_without_block_path_are_found_by_tick() {
        let mut rec = Recording::new();
        rec.add_block(block("a", 0, 100, &["Fz"])).unwrap();
        rec.add_block(block("b", 100, 100, &["Fz"])).unwrap();
        let set = EpochExtractor::new(&rec).set_epochs("e", &table(vec![row("", 150), row("", 500)]), -10, 10).unwrap();
        assert_eq!(set.epochs()[0].dblock_path, "b");
        assert_eq!(set.diagnostics.dropped_bounds, 1);
    }

    #[test]
    fn channel_lists_must_agree() {
        let mut rec = Recording::new();
        rec.add_block(block("a", 0, 100, &["Fz"])).unwrap();
        rec.add_block(block("b", 100, 100, &["Cz"])).unwrap();
        let t = table(vec![row("a", 50), row("b", 150)]);
        assert!(matches!(EpochExtractor::new(&rec).set_epochs("e", &t, -10, 10), Err(Error::Schema(_))));
    }

    #[test]
    fn bad_window_and_unknown_block_are_fatal() {
        let mut rec = Recording::new();
        rec.add_block(block("a", 0, 100, &["Fz"])).unwrap();
        let x = EpochExtractor::new(&rec);
        assert!(matches!(x.set_epochs("e", &table(vec![]), 10, 10), Err(Error::Schema(_))));
        assert!(matches!(x.set_epochs("e", &table(vec![row("zz", 5)]), -1, 1), Err(Error::UnknownBlock(_))));
    }

    #[test]
    fn empty_set_keeps_channel_names() {
        let mut rec = Recording::new();
        rec.add_block(block("a", 0, 100, &["Fz", "Cz"])).unwrap();
        rec.add_block(block("b", 100, 100, &["Pz"])).unwrap();
        let x = EpochExtractor::new(&rec);

        let none = x.set_epochs("e", &table(vec![]), -1, 1).unwrap();
        assert!(none.is_empty());
        assert_eq!(none.channels, vec!["Fz", "Cz"]);

        // Every row dropped: the first row's block names the channels.
        let dropped = x.set_epochs("e", &table(vec![row("b", 199)]), -1, 1).unwrap();
        assert!(dropped.is_empty());
        assert_eq!(dropped.channels, vec!["Pz"]);
        assert!(dropped.column_names().ends_with(&["Pz".to_string(), "epoch_id".into(), "time".into()]));
    }

    #[test]
    fn sampled_drops_are_capped() {
        let mut rec = Recording::new();
        rec.add_block(block("a", 0, 100, &["Fz"])).unwrap();
        let t = table((0..5).map(|_| row("a", 99)).collect());
        let set = EpochExtractor::new(&rec).with_max_sampled_drops(2).set_epochs("e", &t, -1, 1).unwrap();
        assert_eq!(set.diagnostics.dropped_bounds, 5);
        assert_eq!(set.diagnostics.sampled.len(), 2);
    }

    #[test]
    fn cancelled_extraction_is_incomplete() {
        let mut rec = Recording::new();
        rec.add_block(block("a", 0, 100, &["Fz"])).unwrap();
        let flag = CancelFlag::new();
        flag.cancel();
        let set = EpochExtractor::new(&rec).with_cancel(flag).set_epochs("e", &table(vec![row("a", 50)]), -1, 1).unwrap();
        assert!(!set.diagnostics.complete);
        assert!(set.is_empty());
    }
}
