// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Scrub vectors: which timepoints of an image to keep.
//!
//! A scrub vector is derived from threshold rules over confound columns. Each
//! rule flags timepoints whose absolute value exceeds a threshold, dilates the
//! flags backwards and forwards in time, and then flags any run of kept
//! timepoints that is too short to be useful. A timepoint is kept only if
//! every rule (and every column a rule expands to) keeps it.

#[cfg(test)]
mod tests;

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use log::{debug, trace};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    cli::Warn,
    constants::{DEFAULT_MOTION_OUTLIER_THRESHOLD, DEFAULT_SCRUB_VARIABLE},
    io::ConfoundsTable,
};

/// One threshold rule over a confound column (or, with a trailing `*`, over
/// every column with that prefix).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrubColumn {
    pub target_variable: String,
    pub threshold: f64,

    /// The number of timepoints after a flagged timepoint to also flag.
    pub scrub_ahead: usize,

    /// The number of timepoints before a flagged timepoint to also flag.
    pub scrub_behind: usize,

    /// Runs of kept timepoints shorter than this are flagged too.
    pub scrub_contiguous: usize,
}

impl Default for ScrubColumn {
    fn default() -> Self {
        ScrubColumn {
            target_variable: DEFAULT_SCRUB_VARIABLE.to_string(),
            threshold: DEFAULT_MOTION_OUTLIER_THRESHOLD,
            scrub_ahead: 0,
            scrub_behind: 0,
            scrub_contiguous: 0,
        }
    }
}

/// Per-timepoint keep (`true`) or scrub (`false`) flags.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScrubVector(Vec<bool>);

impl ScrubVector {
    pub fn new(keep: Vec<bool>) -> ScrubVector {
        ScrubVector(keep)
    }

    /// A vector that keeps all `n` timepoints.
    pub fn keep_all(n: usize) -> ScrubVector {
        ScrubVector(vec![true; n])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.0
    }

    pub fn num_kept(&self) -> usize {
        self.0.iter().filter(|&&k| k).count()
    }

    pub fn keeps_all(&self) -> bool {
        self.0.iter().all(|&k| k)
    }

    pub fn kept_indices(&self) -> Vec<usize> {
        self.0
            .iter()
            .enumerate()
            .filter_map(|(i, &k)| k.then_some(i))
            .collect()
    }

    pub fn scrubbed_indices(&self) -> Vec<usize> {
        self.0
            .iter()
            .enumerate()
            .filter_map(|(i, &k)| (!k).then_some(i))
            .collect()
    }

    /// Elementwise AND.
    pub fn and(&self, other: &ScrubVector) -> ScrubVector {
        assert_eq!(self.len(), other.len());
        ScrubVector(
            self.0
                .iter()
                .zip(other.0.iter())
                .map(|(&a, &b)| a && b)
                .collect(),
        )
    }

    /// The part of this vector that survives dropping `from_beginning` and
    /// `from_end` timepoints.
    pub fn trimmed(&self, from_beginning: usize, from_end: usize) -> ScrubVector {
        let end = self.len().saturating_sub(from_end).max(from_beginning);
        ScrubVector(self.0[from_beginning.min(self.len())..end.min(self.len())].to_vec())
    }

    /// Write an AFNI-style censor file: one line per timepoint, `1` to keep and
    /// `0` to censor.
    pub fn write_censor_file<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let mut f = BufWriter::new(File::create(path)?);
        for &keep in &self.0 {
            writeln!(f, "{}", u8::from(keep))?;
        }
        f.flush()
    }
}

/// Expand a column pattern against the available columns. A pattern ending in
/// `*` matches every column starting with the rest of the pattern; any other
/// pattern matches only itself. Matches are returned in table order.
pub fn expand_column_pattern(columns: &[String], pattern: &str) -> Vec<String> {
    match pattern.strip_suffix('*') {
        Some(prefix) => columns
            .iter()
            .filter(|c| c.starts_with(prefix))
            .cloned()
            .collect(),
        None => columns.iter().filter(|c| *c == pattern).cloned().collect(),
    }
}

/// Reduce the scrub rules over the confounds table into one scrub vector. It's
/// an error for the rules to scrub every timepoint.
pub fn get_scrub_vector(
    confounds: &ConfoundsTable,
    rules: &[ScrubColumn],
) -> Result<ScrubVector, ScrubError> {
    let keep = flag_timepoints(confounds, rules);
    let num_timepoints = keep.len();
    debug!(
        "Scrub vector keeps {}/{num_timepoints} timepoints",
        keep.num_kept()
    );
    if num_timepoints > 0 && keep.num_kept() == 0 {
        return Err(ScrubError::AllScrubbed { num_timepoints });
    }
    Ok(keep)
}

/// Like [`get_scrub_vector`], but any number of timepoints may be flagged.
pub fn flag_timepoints(confounds: &ConfoundsTable, rules: &[ScrubColumn]) -> ScrubVector {
    let num_timepoints = confounds.num_rows();
    let mut keep = ScrubVector::keep_all(num_timepoints);

    for rule in rules {
        let columns = expand_column_pattern(&confounds.columns, &rule.target_variable);
        if columns.is_empty() {
            format!(
                "Scrub target '{}' matched no confound columns; it won't scrub anything",
                rule.target_variable
            )
            .warn();
            continue;
        }
        trace!(
            "Scrub target '{}' expanded to {columns:?}",
            rule.target_variable
        );

        for column in columns {
            let values = confounds
                .column(&column)
                .expect("expanded columns come from this table");
            let mut indicator: Vec<bool> = values
                .iter()
                .map(|v| v.is_nan() || v.abs() <= rule.threshold)
                .collect();
            dilate(&mut indicator, rule.scrub_behind, rule.scrub_ahead);
            enforce_contiguous(&mut indicator, rule.scrub_contiguous);
            keep = keep.and(&ScrubVector(indicator));
        }
    }
    keep
}

/// Flag `behind` timepoints before and `ahead` timepoints after every
/// initially-flagged timepoint.
fn dilate(keep: &mut [bool], behind: usize, ahead: usize) {
    if behind == 0 && ahead == 0 {
        return;
    }
    let flagged: Vec<usize> = keep
        .iter()
        .enumerate()
        .filter_map(|(i, &k)| (!k).then_some(i))
        .collect();
    let last = keep.len().saturating_sub(1);
    for k in flagged {
        let start = k.saturating_sub(behind);
        let end = (k + ahead).min(last);
        keep[start..=end].iter_mut().for_each(|v| *v = false);
    }
}

/// Flag every maximal run of kept timepoints shorter than `min_run`.
fn enforce_contiguous(keep: &mut [bool], min_run: usize) {
    if min_run <= 1 {
        return;
    }
    let mut i = 0;
    while i < keep.len() {
        if !keep[i] {
            i += 1;
            continue;
        }
        let start = i;
        while i < keep.len() && keep[i] {
            i += 1;
        }
        if i - start < min_run {
            keep[start..i].iter_mut().for_each(|v| *v = false);
        }
    }
}

#[derive(Error, Debug)]
pub enum ScrubError {
    #[error("Scrubbing would remove all {num_timepoints} timepoints; loosen the scrub thresholds")]
    AllScrubbed { num_timepoints: usize },
}
