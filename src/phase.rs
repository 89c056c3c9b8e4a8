//! Two-phase item alignment.
//!
//! A study phase and a test phase present the same items, each scanned with
//! its own codemap. Single-trial rows (anchors with a response-tagged bin)
//! are keyed by item, and each phase borrows the other phase's responses:
//!
//! ```text
//!  study rows (bin >= 2000) ──┐ set_index(item_id), sort
//!                             ├─ study ⟵ test[test_response, accuracy]
//!  test rows  (bin >= 1000) ──┘ test  ⟵ study[study_response]
//! ```
//!
//! Item ids repeat across subjects, so alignment runs separately for every
//! data group and the per-group results are concatenated in group order.
//!
//! Phase codemaps usually list catch-all rows before the response-tagged
//! ones, so [`PhaseAlignment::scan_phases`] scans with
//! [`MatchPolicy::AllPatterns`] unless told otherwise.

use serde::{Deserialize, Serialize};

use crate::block::{data_group, BlockSource};
use crate::codemap::CodeMap;
use crate::error::Result;
use crate::matcher::{EventStreamMatcher, MatchPolicy, ScanOptions};
use crate::table::EventTable;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PhaseAlignment {
    /// Item key shared by both phases.
    pub key: String,
    pub study_bin: String,
    /// Study rows with a bin below this are not single trials.
    pub study_min_bin: i64,
    pub test_bin: String,
    pub test_min_bin: i64,
    /// Study columns copied onto test rows.
    pub study_columns: Vec<String>,
    /// Test columns copied onto study rows.
    pub test_columns: Vec<String>,
    /// Policy for both phase scans. Under `FirstMatch` a leading catch-all
    /// row claims every anchor and no single trial survives.
    pub match_policy: MatchPolicy,
}

impl Default for PhaseAlignment {
    fn default() -> Self {
        Self {
            key: "item_id".into(),
            study_bin: "study_bin_id".into(),
            study_min_bin: 2000,
            test_bin: "test_bin_id".into(),
            test_min_bin: 1000,
            study_columns: vec!["study_response".into()],
            test_columns: vec!["test_response".into(), "accuracy".into()],
            match_policy: MatchPolicy::AllPatterns,
        }
    }
}

impl PhaseAlignment {
    /// Scan `source` once per phase codemap under [`Self::match_policy`],
    /// then [`align`](Self::align) the two tables.
    ///
    /// `options` supplies everything but the policy.
    pub fn scan_phases<S: BlockSource + ?Sized>(
        &self,
        source: &S,
        study: &CodeMap,
        test: &CodeMap,
        options: &ScanOptions,
    ) -> Result<(EventTable, EventTable)> {
        let options = ScanOptions { policy: self.match_policy, ..options.clone() };
        let study = EventStreamMatcher::with_options(study, options.clone()).scan_blocks(source)?;
        let test = EventStreamMatcher::with_options(test, options).scan_blocks(source)?;
        self.align(&study.table, &test.table)
    }

    /// Prune both tables to keyed single trials and cross-join responses.
    ///
    /// Returns `(study, test)`. Fails with [`crate::Error::Key`] when an
    /// item repeats within one data group and phase.
    pub fn align(&self, study: &EventTable, test: &EventTable) -> Result<(EventTable, EventTable)> {
        let study_cols: Vec<&str> = self.study_columns.iter().map(String::as_str).collect();
        let test_cols: Vec<&str> = self.test_columns.iter().map(String::as_str).collect();

        let mut studies = Vec::new();
        let mut tests = Vec::new();
        for group in groups(study, test) {
            let s = self.single_trials(study, &group, &self.study_bin, self.study_min_bin)?;
            let t = self.single_trials(test, &group, &self.test_bin, self.test_min_bin)?;
            if s.is_empty() {
                log::warn!("group '{group}': no study single trials ({} >= {})", self.study_bin, self.study_min_bin);
            }
            if t.is_empty() {
                log::warn!("group '{group}': no test single trials ({} >= {})", self.test_bin, self.test_min_bin);
            }
            let s = s.left_join(&t, &test_cols, &self.key)?;
            let t = t.left_join(&s, &study_cols, &self.key)?;
            log::info!("group '{group}': {} study items, {} test items", s.len(), t.len());
            studies.push(s);
            tests.push(t);
        }

        if studies.len() == 1 {
            if let (Some(s), Some(t)) = (studies.pop(), tests.pop()) {
                return Ok((s, t));
            }
        }
        Ok((EventTable::concat(studies)?, EventTable::concat(tests)?))
    }

    fn single_trials(&self, table: &EventTable, group: &str, bin: &str, min_bin: i64) -> Result<EventTable> {
        // Validate the bin column up front; a filter on a missing column
        // would silently drop every row.
        table.column_values(bin)?;
        table
            .filter(|r| {
                r.record.is_anchor
                    && data_group(&r.record.dblock_path) == group
                    && r.get_i64(bin).is_some_and(|b| b >= min_bin)
            })
            .set_index(&self.key)?
            .sort_by(&self.key)
    }
}

/// Data groups present in either table, first-seen order.
fn groups(a: &EventTable, b: &EventTable) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for r in a.records().iter().chain(b.records()) {
        let g = data_group(&r.dblock_path);
        if !out.iter().any(|x| x == g) {
            out.push(g.to_string());
        }
    }
    out
}
