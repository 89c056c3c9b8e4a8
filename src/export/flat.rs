//! `columnar-flat`: one tab-separated row per (epoch, sample).
//!
//! ```text
//! dblock_path  stream_index  ...  bin  Fz    Cz    epoch_id  time
//! s00/dblock_0 3             ...  200  1.5   -0.25 0         -50
//! s00/dblock_0 3             ...  200  1.25  0.0   0         -49
//! ```
//!
//! Rows are written as they are produced, never buffered per epoch. Fields
//! holding a tab, quote or newline are quoted by the `csv` writer. Nulls are
//! written as `\N` so they stay distinct from the empty string; a string that
//! itself starts with `\` gets one more `\` in front. [`decode_field`] undoes
//! both.

use std::borrow::Cow;
use std::io::{self, Write};

use crate::epoch::EpochSet;
use crate::value::{DType, TagValue};

/// Field text for a null cell.
pub const NULL_FIELD: &str = "\\N";

pub fn write<W: Write>(set: &EpochSet<'_>, w: &mut W) -> io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().delimiter(b'\t').from_writer(w);
    wtr.write_record(set.column_names())?;

    let times = set.times();
    let mut record = csv::StringRecord::new();
    for (epoch, row) in set.epochs().iter().zip(set.events.rows()) {
        // Event fields repeat on every sample row of the epoch.
        let event: Vec<String> = row.values().map(|v| encode_field(&v).into_owned()).collect();
        let epoch_id = epoch.epoch_id.to_string();
        for (s, t) in times.iter().enumerate() {
            record.clear();
            for field in &event {
                record.push_field(field);
            }
            for v in epoch.signal.column(s) {
                record.push_field(&format!("{v:?}"));
            }
            record.push_field(&epoch_id);
            record.push_field(&t.to_string());
            wtr.write_record(&record)?;
        }
    }
    wtr.flush()
}

/// Field text for one event cell.
pub fn encode_field(v: &TagValue) -> Cow<'_, str> {
    match v {
        TagValue::Null => Cow::Borrowed(NULL_FIELD),
        TagValue::Str(s) if s.starts_with('\\') => Cow::Owned(format!("\\{s}")),
        TagValue::Str(s) => Cow::Borrowed(s),
        other => Cow::Owned(other.to_field()),
    }
}

/// Inverse of [`encode_field`] for a column of type `dtype`.
///
/// Returns `None` when `s` is neither the null marker nor a `dtype` value.
pub fn decode_field(s: &str, dtype: DType) -> Option<TagValue> {
    if s == NULL_FIELD {
        return Some(TagValue::Null);
    }
    match dtype {
        DType::Str => Some(TagValue::Str(s.strip_prefix('\\').unwrap_or(s).to_string())),
        _ => TagValue::parse_as(s, dtype),
    }
}
