//! Safetensors I/O and atomic file writes.
//!
//! A recording is stored as one `.safetensors` file:
//!
//! ```text
//!   __metadata__["tagepoch.blocks"]  JSON [{ "path", "header" }, ...]
//!   "{i}.data"                       F64 [C, T]   block i samples
//!   "{i}.events"                     I64 [N, 4]   (tick, code, ccode, flags)
//! ```
//!
//! Blocks are numbered in storage order so paths containing `/` never
//! collide with tensor names.
use anyhow::{bail, Context};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::block::{BlockHeader, Recording, SignalBlock};
use crate::error::Error;
use crate::stream::LogEvent;

const BLOCKS_KEY: &str = "tagepoch.blocks";

// ── Low-level safetensors parser (raw bytes → ndarray, no tensor crate) ─────

/// Parsed safetensors file: header entries plus the raw byte buffer.
pub struct SafeTensors {
    bytes: Vec<u8>,
    header: HashMap<String, serde_json::Value>,
    data_start: usize,
}

impl SafeTensors {
    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_bytes(bytes)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> anyhow::Result<Self> {
        if bytes.len() < 8 {
            bail!("safetensors file too small");
        }
        let mut len = [0u8; 8];
        len.copy_from_slice(&bytes[..8]);
        let n = u64::from_le_bytes(len) as usize;
        if bytes.len() < 8 + n {
            bail!("safetensors header length {n} exceeds file size {}", bytes.len());
        }
        let header: HashMap<String, serde_json::Value> =
            serde_json::from_slice(&bytes[8..8 + n]).context("failed to parse safetensors header")?;
        Ok(Self { bytes, header, data_start: 8 + n })
    }

    /// String metadata stored under `__metadata__`.
    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.header.get("__metadata__")?.get(key)?.as_str()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.header.keys().map(String::as_str).filter(|k| *k != "__metadata__")
    }

    pub fn shape(&self, name: &str) -> anyhow::Result<Vec<usize>> {
        let entry = self.entry(name)?;
        entry["shape"]
            .as_array()
            .with_context(|| format!("tensor '{name}' has no shape"))?
            .iter()
            .map(|v| v.as_u64().map(|d| d as usize).with_context(|| format!("bad shape in '{name}'")))
            .collect()
    }

    pub fn f64(&self, name: &str) -> anyhow::Result<Vec<f64>> {
        let raw = self.raw(name, "F64")?;
        Ok(raw
            .chunks_exact(8)
            .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
            .collect())
    }

    pub fn i64(&self, name: &str) -> anyhow::Result<Vec<i64>> {
        let raw = self.raw(name, "I64")?;
        Ok(raw
            .chunks_exact(8)
            .map(|b| i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
            .collect())
    }

    pub fn f64_arr2(&self, name: &str) -> anyhow::Result<Array2<f64>> {
        let shape = self.shape(name)?;
        if shape.len() != 2 {
            bail!("tensor '{name}' has rank {}, expected 2", shape.len());
        }
        Ok(Array2::from_shape_vec((shape[0], shape[1]), self.f64(name)?)?)
    }

    fn entry(&self, name: &str) -> anyhow::Result<&serde_json::Value> {
        self.header.get(name).with_context(|| format!("missing '{name}' key"))
    }

    fn raw(&self, name: &str, dtype: &str) -> anyhow::Result<&[u8]> {
        let entry = self.entry(name)?;
        let found = entry["dtype"].as_str().unwrap_or_default();
        if found != dtype {
            bail!("tensor '{name}' is {found}, expected {dtype}");
        }
        let offsets = entry["data_offsets"]
            .as_array()
            .with_context(|| format!("tensor '{name}' has no data_offsets"))?;
        let bound = |i: usize| -> anyhow::Result<usize> {
            offsets
                .get(i)
                .and_then(|v| v.as_u64())
                .map(|v| self.data_start + v as usize)
                .with_context(|| format!("bad data_offsets in '{name}'"))
        };
        let (s, e) = (bound(0)?, bound(1)?);
        self.bytes
            .get(s..e)
            .with_context(|| format!("tensor '{name}' data [{s}, {e}) out of file bounds"))
    }
}

// ── Header builder ────────────────────────────────────────────────────────────

/// Tensor declaration for a streamed safetensors file.
#[derive(Debug, Clone)]
pub struct TensorSpec {
    pub name: String,
    pub dtype: &'static str,
    pub shape: Vec<usize>,
}

impl TensorSpec {
    pub fn new(name: &str, dtype: &'static str, shape: &[usize]) -> Self {
        Self { name: name.to_string(), dtype, shape: shape.to_vec() }
    }

    pub fn byte_len(&self) -> usize {
        let elem = match self.dtype {
            "F64" | "I64" => 8,
            "F32" | "I32" => 4,
            _ => 1,
        };
        self.shape.iter().product::<usize>() * elem
    }
}

/// Length prefix and padded JSON header. Tensor payloads must follow in
/// declaration order.
pub fn st_header(tensors: &[TensorSpec], metadata: &serde_json::Map<String, serde_json::Value>) -> serde_json::Result<Vec<u8>> {
    let mut header_map = serde_json::Map::new();
    if !metadata.is_empty() {
        header_map.insert("__metadata__".into(), serde_json::Value::Object(metadata.clone()));
    }
    let mut offset: usize = 0;
    for t in tensors {
        header_map.insert(t.name.clone(), serde_json::json!({
            "dtype": t.dtype,
            "shape": t.shape,
            "data_offsets": [offset, offset + t.byte_len()],
        }));
        offset += t.byte_len();
    }
    let hdr_bytes = serde_json::to_vec(&header_map)?;
    let pad = (8 - hdr_bytes.len() % 8) % 8;
    let mut out = Vec::with_capacity(8 + hdr_bytes.len() + pad);
    out.extend_from_slice(&((hdr_bytes.len() + pad) as u64).to_le_bytes());
    out.extend_from_slice(&hdr_bytes);
    out.extend(std::iter::repeat(b' ').take(pad));
    Ok(out)
}

// ── In-memory safetensors builder ───────────────────────────────────────────

/// Safetensors writer for F64 and I64 tensors held in memory.
///
/// ```rust,no_run
/// use tagepoch::io::StWriter;
/// use std::path::Path;
/// let mut w = StWriter::new();
/// w.add_f64("signal", &[1.0f64, 2.0, 3.0], &[1, 3]);
/// w.add_i64("ticks", &[10, 11, 12], &[3]);
/// w.write(Path::new("/tmp/out.safetensors")).unwrap();
/// ```
#[derive(Default)]
pub struct StWriter {
    entries: Vec<(TensorSpec, Vec<u8>)>,
    metadata: serde_json::Map<String, serde_json::Value>,
}

impl StWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metadata(&mut self, key: &str, value: String) {
        self.metadata.insert(key.to_string(), serde_json::Value::String(value));
    }

    pub fn add_f64(&mut self, name: &str, data: &[f64], shape: &[usize]) {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.entries.push((TensorSpec::new(name, "F64", shape), bytes));
    }

    pub fn add_f64_arr2(&mut self, name: &str, arr: &Array2<f64>) {
        let data: Vec<f64> = arr.iter().copied().collect();
        self.add_f64(name, &data, &[arr.nrows(), arr.ncols()]);
    }

    pub fn add_i64(&mut self, name: &str, data: &[i64], shape: &[usize]) {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.entries.push((TensorSpec::new(name, "I64", shape), bytes));
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        let specs: Vec<TensorSpec> = self.entries.iter().map(|(s, _)| s.clone()).collect();
        w.write_all(&st_header(&specs, &self.metadata)?)?;
        for (_, data) in &self.entries {
            w.write_all(data)?;
        }
        Ok(())
    }

    pub fn write(&self, path: &Path) -> crate::Result<()> {
        write_atomic(path, |w| self.write_to(w))
    }
}

// ── Recording container ──────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
struct StoredBlock {
    path: String,
    header: BlockHeader,
}

impl Recording {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let st = SafeTensors::read(path)?;
        let listing = st
            .metadata(BLOCKS_KEY)
            .with_context(|| format!("{}: missing '{BLOCKS_KEY}' metadata", path.display()))?;
        let stored: Vec<StoredBlock> =
            serde_json::from_str(listing).context("failed to parse block listing")?;

        let mut rec = Recording::new();
        for (i, sb) in stored.into_iter().enumerate() {
            let data = st.f64_arr2(&format!("{i}.data"))?;
            let raw = st.i64(&format!("{i}.events"))?;
            let events = raw
                .chunks_exact(4)
                .map(|e| LogEvent { tick: e[0], code: e[1], ccode: e[2], flags: e[3] })
                .collect();
            let block = SignalBlock::new(&sb.path, sb.header, data, events)
                .with_context(|| format!("block {i} of {}", path.display()))?;
            rec.add_block(block)?;
        }
        log::info!("loaded {} blocks from {}", rec.len(), path.display());
        Ok(rec)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let mut w = StWriter::new();
        let stored: Vec<StoredBlock> = self
            .blocks()
            .iter()
            .map(|b| StoredBlock { path: b.path.clone(), header: b.header.clone() })
            .collect();
        w.metadata(BLOCKS_KEY, serde_json::to_string(&stored)?);
        for (i, b) in self.blocks().iter().enumerate() {
            w.add_f64_arr2(&format!("{i}.data"), &b.data);
            let events: Vec<i64> = b
                .stream()
                .events()
                .iter()
                .flat_map(|e| [e.tick, e.code, e.ccode, e.flags])
                .collect();
            w.add_i64(&format!("{i}.events"), &events, &[b.stream().len(), 4]);
        }
        w.write(path)?;
        Ok(())
    }
}

// ── Atomic replace ───────────────────────────────────────────────────────────

/// Write `path` through a temporary sibling and rename it into place.
///
/// Readers see the old file or the complete new one, never a partial write.
/// On failure the temporary file is removed and `path` is untouched.
pub fn write_atomic<F>(path: &Path, fill: F) -> crate::Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> std::io::Result<()>,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }

    let tmp_path = tmp_write_path(path);
    let written = (|| -> std::io::Result<()> {
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        fill(&mut writer)?;
        writer.flush()?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()
    })();

    if let Err(e) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(Error::io(&tmp_path, e));
    }
    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        Error::io(path, e)
    })
}

fn tmp_write_path(path: &Path) -> PathBuf {
    let unique = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let mut tmp: OsString = path.as_os_str().to_os_string();
    tmp.push(format!(".tmp.{}.{}", std::process::id(), unique));
    PathBuf::from(tmp)
}
