//! Epoch-set export.
//!
//! Three encodings share one column layout: event-table columns, then one
//! column per signal channel, then `epoch_id` and `time` (tick offset from
//! the time-lock event). Every export is written to a temporary sibling and
//! renamed into place, so re-exporting replaces the file and a failed export
//! leaves nothing behind.
//!
//! | format                  | alias     | file                  |
//! |-------------------------|-----------|-----------------------|
//! | `native-hierarchical`   | `h5`      | safetensors container |
//! | `portable-hierarchical` | `pdh5`    | JSON document         |
//! | `columnar-flat`         | `feather` | tab-separated table   |

pub mod flat;
pub mod native;
pub mod portable;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::epoch::EpochSet;
use crate::error::{Error, Result};
use crate::io::write_atomic;

/// Names of the two trailing identifier columns.
pub const EPOCH_ID_COLUMN: &str = "epoch_id";
pub const TIME_COLUMN: &str = "time";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExportFormat {
    #[serde(rename = "native-hierarchical", alias = "h5")]
    NativeHierarchical,
    #[serde(rename = "portable-hierarchical", alias = "pdh5")]
    PortableHierarchical,
    #[serde(rename = "columnar-flat", alias = "feather")]
    ColumnarFlat,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 3] = [
        ExportFormat::NativeHierarchical,
        ExportFormat::PortableHierarchical,
        ExportFormat::ColumnarFlat,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ExportFormat::NativeHierarchical => "native-hierarchical",
            ExportFormat::PortableHierarchical => "portable-hierarchical",
            ExportFormat::ColumnarFlat => "columnar-flat",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::NativeHierarchical => "safetensors",
            ExportFormat::PortableHierarchical => "json",
            ExportFormat::ColumnarFlat => "tsv",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "native-hierarchical" | "h5" => Ok(ExportFormat::NativeHierarchical),
            "portable-hierarchical" | "pdh5" => Ok(ExportFormat::PortableHierarchical),
            "columnar-flat" | "feather" => Ok(ExportFormat::ColumnarFlat),
            other => Err(Error::UnknownFormat(other.to_string())),
        }
    }
}

/// Writes epoch sets to files.
#[derive(Debug, Clone, Copy, Default)]
pub struct TabularExporter;

impl TabularExporter {
    /// Encode `set` as `format` at `destination`, replacing any existing file.
    pub fn export(&self, set: &EpochSet<'_>, destination: &Path, format: ExportFormat) -> Result<()> {
        log::debug!(
            "exporting '{}' ({} epochs) as {format} to {}",
            set.name,
            set.len(),
            destination.display()
        );
        write_atomic(destination, |w| match format {
            ExportFormat::NativeHierarchical => native::write(set, w),
            ExportFormat::PortableHierarchical => portable::write(set, w),
            ExportFormat::ColumnarFlat => flat::write(set, w),
        })
    }

    /// Like [`TabularExporter::export`] with a format tag such as `"feather"`.
    pub fn export_tagged(&self, set: &EpochSet<'_>, destination: &Path, format: &str) -> Result<()> {
        self.export(set, destination, format.parse()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_tags_and_aliases() {
        for f in ExportFormat::ALL {
            assert_eq!(f.name().parse::<ExportFormat>().unwrap(), f);
        }
        assert_eq!("pdh5".parse::<ExportFormat>().unwrap(), ExportFormat::PortableHierarchical);
        assert!(matches!("csv".parse::<ExportFormat>(), Err(Error::UnknownFormat(t)) if t == "csv"));
    }
}
