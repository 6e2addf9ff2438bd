// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Processing-step primitives.
//!
//! Every step is a workflow [`Node`](crate::workflow::Node): it takes an
//! `in_file` (a 4D image, or a confounds table wrapped as a `[1, 1, C, T]`
//! image) plus whatever else it needs, writes its result into its node
//! directory under the input's file name, and reports it on `out_file`.
//!
//! Some steps are native; others drive FSL or AFNI tools, which must be on
//! `PATH`.

mod aroma;
mod external;
mod normalization;
mod regression;
mod resample;
mod roi;
mod smoothing;
mod temporal_filter;
mod timepoints;
mod utility;


pub use aroma::AromaRegression;
pub use normalization::IntensityNormalization;
pub use regression::ConfoundRegression;
pub use resample::Resample;
pub use roi::SphereExtract;
pub use smoothing::SpatialSmoothing;
pub use temporal_filter::TemporalFilter;
pub use timepoints::{ScrubTimepoints, TrimTimepoints};
pub use utility::*;

use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
};

use thiserror::Error;

use crate::{
    filter::FilterError,
    io::{nifti::read_mask, ConfoundsError, Image, NiftiIoError},
    scrub::ScrubError,
    workflow::{ports, PortValues},
};

/// Where a step writes its result: the node directory, under the input's
/// file name.
pub(crate) fn derived_path(node_dir: &Path, in_file: &Path) -> PathBuf {
    node_dir.join(in_file.file_name().unwrap_or_else(|| OsStr::new("out.nii.gz")))
}

/// The flat mask for `image` from the optional `mask_file` port.
pub(crate) fn optional_mask(
    inputs: &PortValues,
    image: &Image,
) -> Result<Option<Vec<bool>>, StepError> {
    match inputs.optional_file(ports::MASK_FILE)? {
        Some(mask) => Ok(Some(read_mask(mask, image.spatial_shape())?)),
        None => Ok(None),
    }
}

/// The flat indices of voxels inside `mask`, or of every voxel if there's no
/// mask.
pub(crate) fn voxel_indices(mask: Option<&[bool]>, num_voxels: usize) -> Vec<usize> {
    match mask {
        Some(mask) => mask
            .iter()
            .enumerate()
            .filter_map(|(i, &m)| m.then_some(i))
            .collect(),
        None => (0..num_voxels).collect(),
    }
}

/// The median of the finite values, averaging the middle pair for an even
/// count.
pub(crate) fn median(mut values: Vec<f64>) -> Option<f64> {
    values.retain(|v| v.is_finite());
    if values.is_empty() {
        return None;
    }
    values.sort_unstable_by(f64::total_cmp);
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    })
}

/// A single-output result on the `out_file` port.
pub(crate) fn out_file(path: PathBuf) -> PortValues {
    PortValues::new().with(ports::OUT_FILE, path)
}

#[derive(Error, Debug)]
pub enum StepError {
    #[error("Input port '{port}' has no value")]
    MissingInput { port: String },

    #[error("Input port '{port}' should carry a {expected}")]
    WrongPortType { port: String, expected: &'static str },

    #[error("'{tool}' wasn't found; is it installed and on PATH?")]
    ToolNotFound { tool: String },

    #[error("'{tool}' exited with {status}: {stderr}")]
    Tool {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("Expected {expected} {what}, but got {got}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("Can't trim {from_beginning} + {from_end} timepoints from {num_timepoints}")]
    InvalidTrim {
        from_beginning: usize,
        from_end: usize,
        num_timepoints: usize,
    },

    #[error("AROMA noise component {component} is out of range; the mixing matrix has {num_components} components")]
    BadNoiseComponent {
        component: usize,
        num_components: usize,
    },

    #[error("Can't normalise {file}: {reason}")]
    DegenerateImage { file: String, reason: &'static str },

    #[error("The affine of {file} isn't invertible")]
    SingularAffine { file: String },

    #[error("Least-squares fit failed: {0}")]
    Regression(String),

    #[error("Couldn't read ROI coordinates {file}: {reason}")]
    Coordinates { file: String, reason: String },

    #[error(transparent)]
    NiftiIo(#[from] NiftiIoError),

    #[error(transparent)]
    Confounds(#[from] ConfoundsError),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Scrub(#[from] ScrubError),

    #[error(transparent)]
    IO(#[from] std::io::Error),
}
