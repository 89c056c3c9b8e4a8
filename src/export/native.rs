//! `native-hierarchical`: a safetensors container.
//!
//! ```text
//!   signal    F64 [E, C, T]
//!   epoch_id  I64 [E]
//!   time      I64 [T]          tick offsets pre..=post
//!   __metadata__
//!     name, pre, post          epoch-set identity
//!     columns                  JSON [{name, dtype}] of the event table
//!     channels                 JSON [name]
//!     events                   JSON [[value, ...]] one row per epoch
//! ```
//!
//! The signal tensor is written one epoch at a time straight from the block
//! views.

use std::io::{self, Write};

use crate::epoch::EpochSet;
use crate::io::{st_header, TensorSpec};
use crate::value::TagValue;

pub fn write<W: Write>(set: &EpochSet<'_>, w: &mut W) -> io::Result<()> {
    let (n_e, n_c, n_t) = (set.len(), set.channels.len(), set.n_times());
    let tensors = [
        TensorSpec::new("signal", "F64", &[n_e, n_c, n_t]),
        TensorSpec::new("epoch_id", "I64", &[n_e]),
        TensorSpec::new("time", "I64", &[n_t]),
    ];

    let events: Vec<Vec<TagValue>> = set
        .events
        .rows()
        .map(|r| r.values().map(|v| v.into_owned()).collect())
        .collect();
    let mut meta = serde_json::Map::new();
    meta.insert("name".into(), set.name.clone().into());
    meta.insert("pre".into(), set.pre.to_string().into());
    meta.insert("post".into(), set.post.to_string().into());
    meta.insert("columns".into(), serde_json::to_string(&set.events.columns())?.into());
    meta.insert("channels".into(), serde_json::to_string(&set.channels)?.into());
    meta.insert("events".into(), serde_json::to_string(&events)?.into());

    w.write_all(&st_header(&tensors, &meta)?)?;
    for epoch in set.epochs() {
        // Row-major [C, T] regardless of the view's strides.
        for ch in epoch.signal.rows() {
            for v in ch {
                w.write_all(&v.to_le_bytes())?;
            }
        }
    }
    for epoch in set.epochs() {
        w.write_all(&(epoch.epoch_id as i64).to_le_bytes())?;
    }
    for t in set.times() {
        w.write_all(&t.to_le_bytes())?;
    }
    Ok(())
}
