//! `portable-hierarchical`: a self-describing JSON document.
//!
//! ```json
//! { "name": "ms100", "pre": -50, "post": 50,
//!   "columns": [{"name": "dblock_path", "dtype": "str"}, ...],
//!   "channels": ["Fz", "Cz"],
//!   "epochs": [ { "epoch_id": 0, "event": [...], "time": [-50, ...],
//!                 "signal": [[...], [...]] }, ... ] }
//! ```
//!
//! `event` is aligned with `columns` and `signal` with `channels`. The
//! document is emitted epoch by epoch. Non-finite samples become `null`.

use std::borrow::Cow;
use std::io::{self, Write};

use serde::Serialize;

use crate::epoch::EpochSet;
use crate::value::TagValue;

#[derive(Serialize)]
struct PortableEpoch<'a> {
    epoch_id: usize,
    event: Vec<Cow<'a, TagValue>>,
    time: &'a [i64],
    signal: Vec<Vec<f64>>,
}

pub fn write<W: Write>(set: &EpochSet<'_>, w: &mut W) -> io::Result<()> {
    write!(
        w,
        "{{\"name\":{},\"pre\":{},\"post\":{},\"columns\":{},\"channels\":{},\"epochs\":[",
        serde_json::to_string(&set.name)?,
        set.pre,
        set.post,
        serde_json::to_string(&set.events.columns())?,
        serde_json::to_string(&set.channels)?,
    )?;

    let times = set.times();
    for (i, (epoch, row)) in set.epochs().iter().zip(set.events.rows()).enumerate() {
        if i > 0 {
            w.write_all(b",")?;
        }
        let doc = PortableEpoch {
            epoch_id: epoch.epoch_id,
            event: row.values().collect(),
            time: &times,
            signal: epoch.signal.rows().into_iter().map(|ch| ch.to_vec()).collect(),
        };
        serde_json::to_writer(&mut *w, &doc)?;
    }
    w.write_all(b"]}\n")
}
