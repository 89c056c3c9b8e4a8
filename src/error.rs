//! Error taxonomy.
//!
//! Structural failures (a malformed codemap, a join on a non-unique key, an
//! unsupported export format) abort the operation and carry the pattern id or
//! column name that caused them. Per-row epoch failures ([`Error::Bounds`],
//! [`Error::BlockMismatch`]) are never returned from
//! [`crate::epoch::EpochExtractor::set_epochs`]; they are collected into
//! [`crate::epoch::EpochDiagnostics`] instead.

use std::path::PathBuf;

/// Result type for library operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed or inconsistent codemap / table schema.
    #[error("schema error: {0}")]
    Schema(String),

    /// Join or index precondition violated on `column`.
    #[error("key error on column '{column}': {reason}")]
    Key { column: String, reason: String },

    #[error("no block at '{0}'")]
    UnknownBlock(String),

    /// Epoch window exits the owning block's valid sample range.
    #[error("window [{start}, {end}] outside block '{block}' range [{lo}, {hi})")]
    Bounds {
        block: String,
        start: i64,
        end: i64,
        lo: i64,
        hi: i64,
    },

    /// Epoch window would need samples from a different block.
    #[error("window [{start}, {end}] in block '{block}' reaches into block '{other}'")]
    BlockMismatch {
        block: String,
        other: String,
        start: i64,
        end: i64,
    },

    /// Export format tag is not one of the supported encodings.
    #[error("unknown export format '{0}'")]
    UnknownFormat(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn schema(msg: impl Into<String>) -> Self {
        Error::Schema(msg.into())
    }

    pub(crate) fn key(column: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Key { column: column.into(), reason: reason.into() }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io { path: path.into(), source }
    }

    /// True for the per-row validation failures that drop a single epoch.
    pub fn is_row_level(&self) -> bool {
        matches!(self, Error::Bounds { .. } | Error::BlockMismatch { .. })
    }
}
