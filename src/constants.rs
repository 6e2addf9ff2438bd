// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Useful constants.

All floating-point constants *must* be double precision; images are only
narrowed to single precision when they are written to disk.
 */

/// The name of the processing stream that applies no overlay to the project's
/// postprocessing options.
pub const DEFAULT_PROCESSING_STREAM: &str = "default";

/// The file name of the frozen run configuration, placed inside a stream's
/// working directory.
pub const RUN_CONFIG_FILENAME: &str = "run_config.json";

/// Bump this whenever the run configuration schema changes in a way that
/// child jobs can't read older files.
pub const RUN_CONFIG_VERSION: u32 = 1;

/// The directory (inside a stream's working directory) holding the BIDS index.
pub const BIDS_INDEX_DIRNAME: &str = "bids_index";

/// The file name of the persisted BIDS index.
pub const BIDS_INDEX_FILENAME: &str = "index.json";

pub const DESC_PREPROC: &str = "desc-preproc";
pub const DESC_POSTPROC: &str = "desc-postproc";

/// fMRIPrep writes missing confound values as this string.
pub const CONFOUNDS_NA: &str = "n/a";

/// Spike regressors appended for motion outliers are named with this prefix,
/// followed by the timepoint index.
pub const MOTION_OUTLIER_PREFIX: &str = "motion_outlier";

pub const DEFAULT_TARGET_IMAGE_SPACE: &str = "MNI152NLin2009cAsym";

pub const DEFAULT_FILTER_ORDER: usize = 2;
pub const DEFAULT_HIGH_PASS_HZ: f64 = 0.008;
pub const DEFAULT_LOW_PASS_HZ: f64 = -1.0;
pub const DEFAULT_FWHM_MM: f64 = 6.0;
pub const DEFAULT_MOTION_OUTLIER_THRESHOLD: f64 = 0.9;
pub const DEFAULT_SCRUB_VARIABLE: &str = "framewise_displacement";

/// SUSAN's brightness threshold is this fraction of the median in-mask
/// intensity, unless a threshold is configured.
pub const SUSAN_BRIGHTNESS_FRACTION: f64 = 0.75;

/// FWHM = sigma * sqrt(8 ln 2).
pub const FWHM_TO_SIGMA: f64 = 2.354_820_045_030_949_3;

/// ROIs overlapping the mask by less than this fraction of their voxels are
/// set to NaN.
pub const DEFAULT_PROP_VOXELS: f64 = 0.5;

/// Global-median intensity normalisation scales the in-mask median to this.
pub const GLOBAL_MEDIAN_TARGET: f64 = 10000.0;

/// Voxel-mean intensity normalisation scales each voxel's mean to this.
pub const VOXEL_MEAN_TARGET: f64 = 100.0;

/// AFNI's `3dTproject` interprets a low-pass cutoff this large as "no
/// low-pass".
pub const AFNI_NO_LOW_PASS_HZ: f64 = 99999.0;
