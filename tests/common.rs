/// Shared fixtures: small synthetic recordings and codemaps.
use ndarray::Array2;
use tagepoch::codemap::table::parse_tsv;
use tagepoch::{BlockHeader, ChannelInfo, CodeMap, LogEvent, Recording, SignalBlock};

#[allow(unused)]
pub const CHANNELS: [&str; 3] = ["Fz", "Cz", "Pz"];

#[allow(unused)]
/// Sample value at (`channel`, `tick`): distinct per channel, linear in tick.
pub fn sample(channel: usize, tick: i64) -> f64 {
    channel as f64 * 1000.0 + tick as f64 * 0.5
}

/// One block of `n` samples starting at `start`, with `events` as (tick, code).
pub fn block(path: &str, start: i64, n: usize, events: &[(i64, i64)]) -> SignalBlock {
    let header = BlockHeader {
        sfreq: 250.0,
        start_tick: start,
        channels: CHANNELS.iter().map(|c| ChannelInfo::eeg(c)).collect(),
    };
    let data = Array2::from_shape_fn((CHANNELS.len(), n), |(c, t)| sample(c, start + t as i64));
    let events = events.iter().map(|&(tick, code)| LogEvent::new(tick, code)).collect();
    SignalBlock::new(path, header, data, events).unwrap()
}

#[allow(unused)]
pub fn recording(blocks: Vec<SignalBlock>) -> Recording {
    let mut rec = Recording::new();
    for b in blocks {
        rec.add_block(b).unwrap();
    }
    rec
}

/// Compile a codemap from `regexp<TAB>tags...` text.
#[allow(unused)]
pub fn codemap(tsv: &str) -> CodeMap {
    CodeMap::compile(parse_tsv(tsv).unwrap()).unwrap()
}

/// Two subjects, each with a stimulus/response block pair:
///
/// ```text
/// s0X/p3/dblock_0  ticks [0, 1000)     stim 1 @ 100, resp 8 @ 180, stim 2 @ 500, stim 1 @ 980
/// s0X/p3/dblock_1  ticks [1000, 2000)  stim 2 @ 1030, resp 8 @ 1100
/// ```
#[allow(unused)]
pub fn p3_recording() -> Recording {
    let mut blocks = Vec::new();
    for subject in ["s00", "s01"] {
        blocks.push(block(
            &format!("{subject}/p3/dblock_0"),
            0,
            1000,
            &[(100, 1), (180, 8), (500, 2), (980, 1)],
        ));
        blocks.push(block(&format!("{subject}/p3/dblock_1"), 1000, 1000, &[(1030, 2), (1100, 8)]));
    }
    recording(blocks)
}

#[allow(unused)]
pub const P3_CODEMAP: &str = "regexp\tbin\tstim\tresponse\n\
(#1) 8\t11\trare\thit\n\
(#2) 8\t12\tcommon\thit\n\
(#[12]) (?!(8))\t10\tany\tnone\n";
