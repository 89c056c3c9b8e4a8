//! # tagepoch — event-code tagging and time-locked epochs
//!
//! `tagepoch` turns the sparse stream of integer event codes logged during an
//! EEG recording into a tagged event table, then cuts fixed windows of
//! multichannel signal around the tagged events and exports them.
//!
//! ## Pipeline overview
//!
//! ```text
//! codemap.tsv                           recording.safetensors
//!   │                                      │
//!   ├─ CodeMap::load()        patterns      ├─ Recording::load()   blocks [C, T] + log events
//!   │                                      │
//!   └──────────────┬───────────────────────┘
//!                  ├─ EventStreamMatcher::scan_blocks()   one row per matched code
//!                  ├─ EventTable filter / set_index / left_join / sort_by
//!                  ├─ EpochExtractor::set_epochs()        [tick+pre, tick+post] per row
//!                  └─ TabularExporter::export()           safetensors · JSON · TSV
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use std::path::Path;
//! use tagepoch::{CodeMap, EpochExtractor, EventStreamMatcher, ExportFormat, Recording};
//!
//! let rec = Recording::load(Path::new("p3.safetensors")).unwrap();
//! let codemap = CodeMap::load(Path::new("p3_codemap.tsv")).unwrap();
//!
//! // 1. Tag every block's event codes
//! let scan = EventStreamMatcher::new(&codemap).scan_blocks(&rec).unwrap();
//! println!("{} rows from {} codes", scan.summary.rows(), scan.summary.positions());
//!
//! // 2. Keep anchors and cut 100-tick windows
//! let events = scan.table.filter(|r| r.record.is_anchor);
//! let set = EpochExtractor::new(&rec).set_epochs("ms100", &events, -50, 50).unwrap();
//! println!("{} epochs, {} dropped", set.len(), set.diagnostics.dropped());
//!
//! // 3. Export
//! set.export(Path::new("p3.ms100.epochs.tsv"), ExportFormat::ColumnarFlat).unwrap();
//! ```
//!
//! ## Pattern syntax
//!
//! Whitespace-separated tokens, one of which is the anchor:
//!
//! | token            | matches                                   |
//! |------------------|-------------------------------------------|
//! | `1040`           | that code                                 |
//! | `.`              | any code                                  |
//! | `[1234]`         | one of the single-digit codes 1, 2, 3, 4  |
//! | `[11,12]`        | one of the listed codes                   |
//! | `(#X)`           | anchor, `X` any of the above              |
//! | `(X)`            | captured context token                    |
//! | `(?!(A\|B))`     | next slot is not A or B (zero width)      |

pub mod block;
pub mod cancel;
pub mod codemap;
pub mod config;
pub mod epoch;
pub mod error;
pub mod export;
pub mod io;
pub mod matcher;
pub mod phase;
pub mod stream;
pub mod table;
pub mod value;

use std::path::{Path, PathBuf};

// ── Crate-root re-exports ─────────────────────────────────────────────────

pub use block::{BlockHeader, BlockSource, ChannelInfo, Recording, SignalBlock, SourceKind};
pub use cancel::CancelFlag;
pub use codemap::{CodeMap, CodeMapTemplate, CodeSequencePattern, ItemTable, MatchResult, Token};
pub use config::{EpochSpec, PipelineConfig};
pub use epoch::{export_epochs, DroppedRow, Epoch, EpochDiagnostics, EpochExtractor, EpochSet};
pub use error::{Error, Result};
pub use export::{ExportFormat, TabularExporter};
pub use io::StWriter;
pub use matcher::{scan, EventStreamMatcher, MatchPolicy, Scan, ScanOptions, ScanSummary};
pub use phase::PhaseAlignment;
pub use stream::{CodeStream, LogEvent};
pub use table::{Column, EventRecord, EventTable, RowRef};
pub use value::{DType, TagValue};

/// Scan every block of `source` and cut one [`EpochSet`] per configured
/// window.
///
/// Every row of the scanned table is a time-lock event. Epoch bounds are
/// converted to ticks through [`PipelineConfig::sfreq`] when it is set.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use tagepoch::{tag_and_epoch, CodeMap, PipelineConfig, Recording};
///
/// let rec = Recording::load(Path::new("wr.safetensors")).unwrap();
/// let codemap = CodeMap::load(Path::new("wr_codemap.tsv")).unwrap();
/// let (scan, sets) = tag_and_epoch(&rec, &codemap, &PipelineConfig::default()).unwrap();
/// for set in &sets {
///     println!("{}: {} epochs", set.name, set.len());
/// }
/// ```
pub fn tag_and_epoch<'a, S>(
    source: &'a S,
    codemap: &CodeMap,
    cfg: &PipelineConfig,
) -> Result<(Scan, Vec<EpochSet<'a>>)>
where
    S: BlockSource + ?Sized,
{
    cfg.validate()?;
    let scan = EventStreamMatcher::with_options(codemap, cfg.scan_options()).scan_blocks(source)?;
    let sets = epoch_all(source, "", &scan.table, cfg)?;
    Ok((scan, sets))
}

/// One [`EpochSet`] per configured window over `events`. Set names are
/// `"{prefix}_{window}"`, or just the window name when `prefix` is empty.
pub fn epoch_all<'a, S>(
    source: &'a S,
    prefix: &str,
    events: &EventTable,
    cfg: &PipelineConfig,
) -> Result<Vec<EpochSet<'a>>>
where
    S: BlockSource + ?Sized,
{
    let extractor = EpochExtractor::new(source).with_max_sampled_drops(cfg.max_sampled_drops);
    cfg.epochs
        .iter()
        .map(|spec| {
            let (pre, post) = spec.ticks(cfg.sfreq);
            let name = if prefix.is_empty() { spec.name.clone() } else { format!("{prefix}_{}", spec.name) };
            extractor.set_epochs(&name, events, pre, post)
        })
        .collect()
}

/// Destination for every `(set, format)` pair under `out_dir`.
pub fn export_plan<'s, 'a>(
    sets: &'s [EpochSet<'a>],
    cfg: &PipelineConfig,
    out_dir: &Path,
) -> Vec<(&'s EpochSet<'a>, ExportFormat, PathBuf)> {
    sets.iter()
        .flat_map(|set| {
            cfg.formats
                .iter()
                .map(move |&f| (set, f, out_dir.join(cfg.export_file_name(&set.name, f))))
        })
        .collect()
}
