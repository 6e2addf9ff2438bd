// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The plumbing nodes that hold a workflow together: masking, confound
//! preparation, moving confounds in and out of image form, scrub vectors,
//! spike regressors and exports.

use std::path::Path;

use itertools::Itertools;
use log::{debug, trace};
use ndarray::prelude::*;

use super::{derived_path, optional_mask, out_file, StepError};
use crate::{
    cli::Warn,
    constants::MOTION_OUTLIER_PREFIX,
    io::{
        confounds::{read_matrix, write_matrix},
        ConfoundsTable, Image, Precision,
    },
    scrub::{flag_timepoints, get_scrub_vector, ScrubColumn},
    workflow::{ports, Node, PortValues},
};

/// Passes its inputs straight through. Used for a workflow's input and output
/// nodes.
#[derive(Debug, Clone)]
pub struct Passthrough;

impl Node for Passthrough {
    fn kind(&self) -> String {
        "passthrough".to_string()
    }

    fn run(&self, inputs: &PortValues, _: &Path) -> Result<PortValues, StepError> {
        Ok(inputs.clone())
    }
}

/// Zero every voxel outside the mask.
#[derive(Debug, Clone)]
pub struct ApplyMask;

impl Node for ApplyMask {
    fn kind(&self) -> String {
        "apply_mask".to_string()
    }

    fn run(&self, inputs: &PortValues, node_dir: &Path) -> Result<PortValues, StepError> {
        let in_file = inputs.file(ports::IN_FILE)?;
        let image = Image::read(in_file)?;
        let mask = optional_mask(inputs, &image)?.ok_or_else(|| StepError::MissingInput {
            port: ports::MASK_FILE.to_string(),
        })?;
        let mut m = image.to_matrix();
        for (v, _) in mask.iter().enumerate().filter(|(_, inside)| !**inside) {
            m.column_mut(v).fill(0.0);
        }
        let out = derived_path(node_dir, in_file);
        image
            .with_matrix(m.view())
            .write(&out, image.native_precision())?;
        Ok(out_file(out))
    }
}

/// Select the configured confound columns (an empty selection keeps them
/// all) and replace missing values with their column's mean.
#[derive(Debug, Clone)]
pub struct PrepareConfounds {
    pub columns: Vec<String>,
}

impl Node for PrepareConfounds {
    fn kind(&self) -> String {
        "prepare_confounds".to_string()
    }

    fn run(&self, inputs: &PortValues, node_dir: &Path) -> Result<PortValues, StepError> {
        let in_file = inputs.file(ports::CONFOUNDS_FILE)?;
        let table = ConfoundsTable::read(in_file)?;
        let mut table = if self.columns.is_empty() {
            table
        } else {
            let (selected, unmatched) = table.select(&self.columns);
            if !unmatched.is_empty() {
                format!(
                    "These confound columns weren't found in {}: {}",
                    in_file.display(),
                    unmatched.iter().join(", ")
                )
                .warn();
            }
            selected
        };
        trace!("Selected confound columns: {:?}", table.columns);
        table.fill_nan_with_mean();

        let out = derived_path(node_dir, in_file);
        table.write(&out)?;
        Ok(out_file(out))
    }
}

/// Wrap a confounds table as a `[1, 1, C, T]` image so that image steps can
/// process it.
#[derive(Debug, Clone)]
pub struct ConfoundsToImage;

impl Node for ConfoundsToImage {
    fn kind(&self) -> String {
        "confounds_to_image".to_string()
    }

    fn run(&self, inputs: &PortValues, node_dir: &Path) -> Result<PortValues, StepError> {
        let table = ConfoundsTable::read(inputs.file(ports::IN_FILE)?)?;
        let tr = inputs.float(ports::TR)?;
        let out = node_dir.join("confounds.nii.gz");
        Image::from_timeseries(table.data.view(), tr).write(&out, Precision::Double)?;
        Ok(out_file(out))
    }
}

/// Unwrap a `[1, 1, C, T]` image back into a table, taking the column names
/// from `columns_file`.
#[derive(Debug, Clone)]
pub struct ImageToConfounds;

impl Node for ImageToConfounds {
    fn kind(&self) -> String {
        "image_to_confounds".to_string()
    }

    fn run(&self, inputs: &PortValues, node_dir: &Path) -> Result<PortValues, StepError> {
        let columns_file = inputs.file(ports::COLUMNS_FILE)?;
        let columns = ConfoundsTable::read(columns_file)?.columns;
        let data = Image::read(inputs.file(ports::IN_FILE)?)?.to_timeseries()?;
        if data.ncols() != columns.len() {
            return Err(StepError::LengthMismatch {
                what: "confound columns",
                expected: columns.len(),
                got: data.ncols(),
            });
        }
        let out = derived_path(node_dir, columns_file);
        ConfoundsTable::new(columns, data).write(&out)?;
        Ok(out_file(out))
    }
}

/// Reduce scrub rules over the (unprocessed) confounds into a scrub vector.
#[derive(Debug, Clone)]
pub struct ScrubVectorProducer {
    pub rules: Vec<ScrubColumn>,
}

impl Node for ScrubVectorProducer {
    fn kind(&self) -> String {
        "scrub_vector".to_string()
    }

    fn run(&self, inputs: &PortValues, node_dir: &Path) -> Result<PortValues, StepError> {
        let table = ConfoundsTable::read(inputs.file(ports::CONFOUNDS_FILE)?)?;
        let scrub_vector = get_scrub_vector(&table, &self.rules)?;
        scrub_vector.write_censor_file(node_dir.join("scrub_vector.1D"))?;
        Ok(PortValues::new().with(ports::SCRUB_VECTOR, scrub_vector))
    }
}

/// Cut a scrub vector down to the timepoints that survive trimming.
#[derive(Debug, Clone)]
pub struct TrimScrubVector {
    pub from_beginning: usize,
    pub from_end: usize,
}

impl Node for TrimScrubVector {
    fn kind(&self) -> String {
        "trim_scrub_vector".to_string()
    }

    fn run(&self, inputs: &PortValues, node_dir: &Path) -> Result<PortValues, StepError> {
        let scrub_vector = inputs.scrub_vector(ports::SCRUB_VECTOR)?;
        if self.from_beginning + self.from_end >= scrub_vector.len() {
            return Err(StepError::InvalidTrim {
                from_beginning: self.from_beginning,
                from_end: self.from_end,
                num_timepoints: scrub_vector.len(),
            });
        }
        let trimmed = scrub_vector.trimmed(self.from_beginning, self.from_end);
        trimmed.write_censor_file(node_dir.join("scrub_vector.1D"))?;
        Ok(PortValues::new().with(ports::SCRUB_VECTOR, trimmed))
    }
}

/// Bring a MELODIC mixing matrix onto the timeline of the image it will be
/// regressed from: drop the trimmed rows and, if a scrub vector is given, the
/// rows of the removed volumes. The scrub vector is on the trimmed timeline.
#[derive(Debug, Clone)]
pub struct AlignMixing {
    pub from_beginning: usize,
    pub from_end: usize,
}

impl Node for AlignMixing {
    fn kind(&self) -> String {
        "align_mixing".to_string()
    }

    fn run(&self, inputs: &PortValues, node_dir: &Path) -> Result<PortValues, StepError> {
        let mixing = read_matrix(inputs.file(ports::MIXING_FILE)?)?;
        let num_rows = mixing.nrows();
        if self.from_beginning + self.from_end >= num_rows {
            return Err(StepError::InvalidTrim {
                from_beginning: self.from_beginning,
                from_end: self.from_end,
                num_timepoints: num_rows,
            });
        }
        let trimmed = mixing.slice(s![self.from_beginning..num_rows - self.from_end, ..]);
        let aligned = match inputs.optional_scrub_vector(ports::SCRUB_VECTOR)? {
            Some(v) if v.len() != trimmed.nrows() => {
                return Err(StepError::LengthMismatch {
                    what: "scrub vector entries",
                    expected: trimmed.nrows(),
                    got: v.len(),
                })
            }
            Some(v) => trimmed.select(Axis(0), &v.kept_indices()),
            None => trimmed.to_owned(),
        };
        trace!(
            "Aligned the mixing matrix from {num_rows} to {} rows",
            aligned.nrows()
        );

        let out = node_dir.join("mixing.tsv");
        write_matrix(&out, aligned.view())?;
        Ok(PortValues::new().with(ports::MIXING_FILE, out))
    }
}

/// Append one spike regressor per motion-outlier timepoint to the processed
/// confounds.
///
/// Outliers are found on the unprocessed confounds (`confounds_file`) and
/// then follow the processed table's timeline: trimmed timepoints lose their
/// spikes, and if a scrub vector is given, scrubbed timepoints either lose
/// their spikes (when they were removed) or become NaN rows (when
/// `insert_na` is set).
#[derive(Debug, Clone)]
pub struct MotionOutliers {
    pub rule: ScrubColumn,
    pub from_beginning: usize,
    pub from_end: usize,
    pub insert_na: bool,
}

impl Node for MotionOutliers {
    fn kind(&self) -> String {
        "motion_outliers".to_string()
    }

    fn run(&self, inputs: &PortValues, node_dir: &Path) -> Result<PortValues, StepError> {
        let in_file = inputs.file(ports::IN_FILE)?;
        let mut table = ConfoundsTable::read(in_file)?;
        let raw = ConfoundsTable::read(inputs.file(ports::CONFOUNDS_FILE)?)?;
        let scrub_vector = inputs.optional_scrub_vector(ports::SCRUB_VECTOR)?;

        let outliers = flag_timepoints(&raw, std::slice::from_ref(&self.rule))
            .trimmed(self.from_beginning, self.from_end);
        let timeline_len = outliers.len();
        if let Some(v) = scrub_vector {
            if v.len() != timeline_len {
                return Err(StepError::LengthMismatch {
                    what: "scrub vector entries",
                    expected: timeline_len,
                    got: v.len(),
                });
            }
        }

        // Where each timepoint of the trimmed timeline ended up.
        let (expected_rows, rows): (usize, Vec<Option<usize>>) = match scrub_vector {
            Some(v) if !self.insert_na => {
                let kept = v.kept_indices();
                (
                    kept.len(),
                    (0..timeline_len)
                        .map(|k| kept.binary_search(&k).ok())
                        .collect(),
                )
            }
            _ => (timeline_len, (0..timeline_len).map(Some).collect()),
        };
        if table.num_rows() != expected_rows {
            return Err(StepError::LengthMismatch {
                what: "processed confound rows",
                expected: expected_rows,
                got: table.num_rows(),
            });
        }

        let spikes: Vec<(usize, usize)> = outliers
            .scrubbed_indices()
            .into_iter()
            .filter_map(|k| rows[k].map(|row| (k, row)))
            .collect();
        debug!(
            "{} motion outliers; {} spike regressors",
            outliers.len() - outliers.num_kept(),
            spikes.len()
        );

        let out = derived_path(node_dir, in_file);
        if spikes.is_empty() {
            table.write(&out)?;
            return Ok(out_file(out));
        }

        let mut columns = Array2::<f64>::zeros((expected_rows, spikes.len()));
        for (c, &(_, row)) in spikes.iter().enumerate() {
            columns[[row, c]] = 1.0;
        }
        if let (Some(v), true) = (scrub_vector, self.insert_na) {
            for t in v.scrubbed_indices() {
                columns.row_mut(t).fill(f64::NAN);
            }
        }
        let names = spikes
            .iter()
            .map(|&(k, _)| format!("{MOTION_OUTLIER_PREFIX}_{}", k + self.from_beginning))
            .collect();
        table.append_columns(names, columns.view());
        table.write(&out)?;
        Ok(out_file(out))
    }
}

/// Copy a file to its final destination, creating parent directories.
#[derive(Debug, Clone)]
pub struct Export;

impl Node for Export {
    fn kind(&self) -> String {
        "export".to_string()
    }

    fn run(&self, inputs: &PortValues, _: &Path) -> Result<PortValues, StepError> {
        let in_file = inputs.file(ports::IN_FILE)?;
        let destination = inputs.file(ports::DESTINATION)?;
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(in_file, destination)?;
        debug!("Exported {} to {}", in_file.display(), destination.display());
        Ok(out_file(destination.to_path_buf()))
    }
}
