//! Pipeline configuration.
//!
//! [`PipelineConfig`] holds every tunable parameter of the scan → epoch →
//! export pipeline. All fields have defaults matching the epoch windows and
//! export formats used for the demo recordings, and a config can be read from
//! a TOML file with [`PipelineConfig::load`].

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::export::ExportFormat;
use crate::matcher::{MatchPolicy, ScanOptions};
use crate::phase::PhaseAlignment;

/// One named epoch window.
///
/// ```toml
/// [[epochs]]
/// name = "ms1500"
/// pre = -750
/// post = 750
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochSpec {
    pub name: String,
    /// Window start relative to the time-lock event. Ticks, or milliseconds
    /// when [`PipelineConfig::sfreq`] is set.
    pub pre: i64,
    /// Window end relative to the time-lock event, inclusive.
    pub post: i64,
}

impl EpochSpec {
    pub fn new(name: &str, pre: i64, post: i64) -> Self {
        Self { name: name.to_string(), pre, post }
    }

    /// `pre` must precede `post`. Asymmetric windows are fine.
    pub fn validate(&self) -> Result<()> {
        if self.pre >= self.post {
            return Err(Error::schema(format!(
                "epoch '{}': pre ({}) must be less than post ({})",
                self.name, self.pre, self.post
            )));
        }
        Ok(())
    }

    /// Window bounds in ticks. With a sampling rate the bounds are read as
    /// milliseconds and rounded to the nearest tick.
    pub fn ticks(&self, sfreq: Option<f64>) -> (i64, i64) {
        match sfreq {
            Some(hz) => {
                let to_ticks = |ms: i64| (ms as f64 * hz / 1000.0).round() as i64;
                (to_ticks(self.pre), to_ticks(self.post))
            }
            None => (self.pre, self.post),
        }
    }
}

/// Configuration for the full tagging and epoching pipeline.
///
/// All fields are `pub` so you can construct one with struct-update syntax:
///
/// ```
/// use tagepoch::{MatchPolicy, PipelineConfig};
///
/// let cfg = PipelineConfig {
///     match_policy: MatchPolicy::AllPatterns,
///     sfreq: Some(250.0),          // read epoch bounds as milliseconds
///     ..PipelineConfig::default()
/// };
/// ```
///
/// Or just call [`PipelineConfig::default()`] for the demo settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Epoch windows cut around every retained event.
    ///
    /// Each window yields one [`crate::EpochSet`] named after it, and names
    /// must be unique. Exports are written to
    /// `<output_stem>.<name>.epochs.<ext>`.
    ///
    /// Default: `ms100 (-50, 50)`, `ms1500 (-750, 750)`,
    /// `ms3000 (-1500, 1500)`, `ms10000 (-5000, 5000)`.
    pub epochs: Vec<EpochSpec>,

    /// Encodings written for every epoch set.
    ///
    /// Default: all three (`native-hierarchical`, `portable-hierarchical`,
    /// `columnar-flat`).
    pub formats: Vec<ExportFormat>,

    /// How patterns competing for one stream position are resolved.
    ///
    /// [`MatchPolicy::FirstMatch`] keeps the first pattern in declaration
    /// order and never emits two anchor rows at one position.
    /// [`MatchPolicy::AllPatterns`] emits one row per matching pattern.
    ///
    /// Default: `FirstMatch`.
    pub match_policy: MatchPolicy,

    /// Emit `is_anchor = false` rows for captured `(X)` context tokens.
    ///
    /// A context row is only written at a position no anchor row claims.
    ///
    /// Default: `false`.
    pub emit_context_rows: bool,

    /// Upper bound on dropped rows kept verbatim in the epoch diagnostics.
    ///
    /// Every drop is counted regardless; this only caps the sample list.
    ///
    /// Default: `10`.
    pub max_sampled_drops: usize,

    /// Sampling rate in Hz used to convert epoch bounds from milliseconds
    /// to ticks.
    ///
    /// When `None` the bounds in [`PipelineConfig::epochs`] are ticks.
    ///
    /// Default: `None`.
    pub sfreq: Option<f64>,

    /// File-name stem for exports, relative to the output directory.
    ///
    /// Default: `"epochs"`.
    pub output_stem: String,

    /// Study/test alignment used by the `align` workflow.
    ///
    /// Default: key `item_id`, study bins `>= 2000`, test bins `>= 1000`,
    /// `study_response` onto test rows, `test_response` and `accuracy` onto
    /// study rows. Both phases are scanned with `all_patterns` whatever
    /// [`Self::match_policy`] says.
    pub align: PhaseAlignment,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            epochs: vec![
                EpochSpec::new("ms100", -50, 50),
                EpochSpec::new("ms1500", -750, 750),
                EpochSpec::new("ms3000", -1500, 1500),
                EpochSpec::new("ms10000", -5000, 5000),
            ],
            formats: ExportFormat::ALL.to_vec(),
            match_policy: MatchPolicy::FirstMatch,
            emit_context_rows: false,
            max_sampled_drops: 10,
            sfreq: None,
            output_stem: "epochs".to_string(),
            align: PhaseAlignment::default(),
        }
    }
}

impl PipelineConfig {
    /// Read a TOML config. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if matches!(self.sfreq, Some(hz) if !(hz > 0.0)) {
            return Err(Error::Config("sfreq must be positive".into()));
        }
        for (i, spec) in self.epochs.iter().enumerate() {
            spec.validate()?;
            if self.epochs[..i].iter().any(|s| s.name == spec.name) {
                return Err(Error::Config(format!("duplicate epoch name '{}'", spec.name)));
            }
            if let Some(hz) = self.sfreq {
                let (pre, post) = spec.ticks(Some(hz));
                if pre >= post {
                    return Err(Error::Config(format!(
                        "epoch '{}': [{} ms, {} ms] at {hz} Hz rounds to ticks [{pre}, {post}]",
                        spec.name, spec.pre, spec.post
                    )));
                }
            }
        }
        Ok(())
    }

    /// Scanner options for this config.
    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            policy: self.match_policy,
            emit_context_rows: self.emit_context_rows,
            cancel: None,
        }
    }

    /// Export file name for one epoch set and format.
    ///
    /// ```
    /// use tagepoch::{ExportFormat, PipelineConfig};
    /// let cfg = PipelineConfig::default();
    /// assert_eq!(
    ///     cfg.export_file_name("study_ms100", ExportFormat::ColumnarFlat),
    ///     "epochs.study_ms100.epochs.tsv"
    /// );
    /// ```
    pub fn export_file_name(&self, epoch_name: &str, format: ExportFormat) -> String {
        format!("{}.{epoch_name}.epochs.{}", self.output_stem, format.extension())
    }
}
