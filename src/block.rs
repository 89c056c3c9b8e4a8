//! Signal blocks.
//!
//! A block is a contiguous run of multichannel samples plus the event codes
//! logged while it was recorded. Blocks sit on a tick axis: block `b` covers
//! ticks `[b.start_tick, b.start_tick + b.n_times())`. Blocks are grouped by
//! the data-group prefix of their path (`s00/baseline/dblock_0` belongs to
//! `s00/baseline`); blocks in one group never overlap and are never joined
//! into one window.
//!
//! ```text
//!  group s00            dblock_0              dblock_1
//!  ticks          [0 ─────────── 5000)  [5000 ───────── 9000)
//!  samples        [C, 5000]             [C, 4000]
//! ```

use ndarray::{s, Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::stream::{CodeStream, LogEvent};

// ── Header ────────────────────────────────────────────────────────────────

/// What produced a channel's samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Digitised amplifier channel (EEG/EOG).
    DigChan,
    /// Computed from other channels.
    Derived,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub name: String,
    pub source: SourceKind,
    /// Path of the block whose calibration pulses scaled this channel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cal_dblock: Option<String>,
}

impl ChannelInfo {
    pub fn eeg(name: &str) -> Self {
        Self { name: name.to_string(), source: SourceKind::DigChan, cal_dblock: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Sampling rate in Hz.
    pub sfreq: f64,
    /// Tick of the block's first sample.
    pub start_tick: i64,
    pub channels: Vec<ChannelInfo>,
}

impl BlockHeader {
    pub fn source_of(&self, channel: &str) -> Option<SourceKind> {
        self.channels.iter().find(|c| c.name == channel).map(|c| c.source)
    }
}

// ── Block ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct SignalBlock {
    pub path: String,
    pub header: BlockHeader,
    /// `[C, T]` samples, channel order as in the header.
    pub data: Array2<f64>,
    stream: CodeStream,
}

impl SignalBlock {
    pub fn new(path: &str, header: BlockHeader, data: Array2<f64>, events: Vec<LogEvent>) -> Result<Self> {
        if header.channels.len() != data.nrows() {
            return Err(Error::schema(format!(
                "block '{path}': {} channel headers for {} data rows",
                header.channels.len(),
                data.nrows()
            )));
        }
        let block = Self { path: path.to_string(), header, data, stream: CodeStream::new(events) };
        if let Some(ev) = block.stream.events().iter().find(|e| !block.contains(e.tick)) {
            return Err(Error::schema(format!(
                "block '{path}': event code {} at tick {} outside [{}, {})",
                ev.code,
                ev.tick,
                block.start_tick(),
                block.end_tick()
            )));
        }
        Ok(block)
    }

    #[inline]
    pub fn n_times(&self) -> usize {
        self.data.ncols()
    }

    #[inline]
    pub fn start_tick(&self) -> i64 {
        self.header.start_tick
    }

    /// One past the last tick.
    #[inline]
    pub fn end_tick(&self) -> i64 {
        self.header.start_tick + self.n_times() as i64
    }

    #[inline]
    pub fn contains(&self, tick: i64) -> bool {
        tick >= self.start_tick() && tick < self.end_tick()
    }

    pub fn stream(&self) -> &CodeStream {
        &self.stream
    }

    pub fn channel_names(&self) -> Vec<&str> {
        self.header.channels.iter().map(|c| c.name.as_str()).collect()
    }

    /// Data-group prefix of the path (empty for top-level blocks).
    pub fn data_group(&self) -> &str {
        data_group(&self.path)
    }

    /// Samples for ticks `[first, last]` inclusive, or `None` if any tick is
    /// outside the block.
    pub fn window(&self, first: i64, last: i64) -> Option<ArrayView2<'_, f64>> {
        if first > last || !self.contains(first) || !self.contains(last) {
            return None;
        }
        let lo = (first - self.start_tick()) as usize;
        let hi = (last - self.start_tick()) as usize + 1;
        Some(self.data.slice(s![.., lo..hi]))
    }
}

/// Parent path of a block path.
pub fn data_group(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(group, _)| group)
}

// ── Accessor ──────────────────────────────────────────────────────────────

/// Read-only access to a collection of blocks.
pub trait BlockSource {
    /// Block paths in storage order.
    fn block_paths(&self) -> Vec<String>;

    fn get_block(&self, path: &str) -> Result<&SignalBlock>;

    /// Block in `group` whose tick range contains `tick`.
    fn block_at(&self, group: &str, tick: i64) -> Option<&SignalBlock> {
        self.block_paths()
            .iter()
            .filter_map(|p| self.get_block(p).ok())
            .find(|b| b.data_group() == group && b.contains(tick))
    }
}

/// In-memory recording: an ordered list of blocks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Recording {
    blocks: Vec<SignalBlock>,
}

impl Recording {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a block. Paths must be unique and blocks in one data group
    /// must not overlap.
    pub fn add_block(&mut self, block: SignalBlock) -> Result<()> {
        for b in &self.blocks {
            if b.path == block.path {
                return Err(Error::schema(format!("duplicate block path '{}'", block.path)));
            }
            let overlap = b.start_tick() < block.end_tick() && block.start_tick() < b.end_tick();
            if b.data_group() == block.data_group() && overlap {
                return Err(Error::schema(format!(
                    "block '{}' ticks [{}, {}) overlap block '{}'",
                    block.path,
                    block.start_tick(),
                    block.end_tick(),
                    b.path
                )));
            }
        }
        self.blocks.push(block);
        Ok(())
    }

    pub fn blocks(&self) -> &[SignalBlock] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Distinct data groups in first-seen order.
    pub fn data_groups(&self) -> Vec<&str> {
        let mut groups: Vec<&str> = Vec::new();
        for b in &self.blocks {
            if !groups.contains(&b.data_group()) {
                groups.push(b.data_group());
            }
        }
        groups
    }

    /// Paths referenced by any channel as its calibration block.
    pub fn calibration_blocks(&self) -> Vec<&str> {
        let mut cals: Vec<&str> = Vec::new();
        for ch in self.blocks.iter().flat_map(|b| &b.header.channels) {
            if let Some(cal) = ch.cal_dblock.as_deref() {
                if !cals.contains(&cal) {
                    cals.push(cal);
                }
            }
        }
        cals
    }
}

impl BlockSource for Recording {
    fn block_paths(&self) -> Vec<String> {
        self.blocks.iter().map(|b| b.path.clone()).collect()
    }

    fn get_block(&self, path: &str) -> Result<&SignalBlock> {
        self.blocks
            .iter()
            .find(|b| b.path == path)
            .ok_or_else(|| Error::UnknownBlock(path.to_string()))
    }

    fn block_at(&self, group: &str, tick: i64) -> Option<&SignalBlock> {
        self.blocks.iter().find(|b| b.data_group() == group && b.contains(tick))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(path: &str, start: i64, n: usize) -> SignalBlock {
        let header = BlockHeader {
            sfreq: 250.0,
            start_tick: start,
            channels: vec![ChannelInfo::eeg("Fz"), ChannelInfo::eeg("Cz")],
        };
        let data = Array2::from_shape_fn((2, n), |(c, t)| (c * 10_000 + t) as f64);
        SignalBlock::new(path, header, data, vec![LogEvent::new(start, 1)]).unwrap()
    }

    #[test]
    fn window_is_inclusive_and_bounded() {
        let b = block("s00/dblock_0", 100, 50);
        let w = b.window(100, 109).unwrap();
        assert_eq!(w.dim(), (2, 10));
        assert_eq!(w[[1, 0]], 10_000.0);
        assert!(b.window(99, 110).is_none());
        assert!(b.window(140, 150).is_none());
        assert!(b.window(149, 149).is_some());
    }

    #[test]
    fn overlapping_blocks_in_a_group_are_rejected() {
        let mut rec = Recording::new();
        rec.add_block(block("s00/dblock_0", 0, 100)).unwrap();
        assert!(rec.add_block(block("s00/dblock_1", 50, 100)).is_err());
        rec.add_block(block("s01/dblock_0", 0, 100)).unwrap();
        assert!(rec.add_block(block("s01/dblock_0", 500, 10)).is_err());
        assert_eq!(rec.data_groups(), vec!["s00", "s01"]);
    }

    #[test]
    fn block_lookup_is_per_group() {
        let mut rec = Recording::new();
        rec.add_block(block("s00/dblock_0", 0, 100)).unwrap();
        rec.add_block(block("s01/dblock_0", 0, 100)).unwrap();
        assert_eq!(rec.block_at("s01", 10).unwrap().path, "s01/dblock_0");
        assert!(rec.block_at("s02", 10).is_none());
    }

    #[test]
    fn events_must_fall_inside_block() {
        let header = BlockHeader { sfreq: 250.0, start_tick: 0, channels: vec![ChannelInfo::eeg("Fz")] };
        let data = Array2::zeros((1, 10));
        assert!(SignalBlock::new("b", header, data, vec![LogEvent::new(10, 1)]).is_err());
    }
}
