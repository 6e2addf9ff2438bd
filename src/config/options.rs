// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Typed project and postprocessing options.
//!
//! Every field has a default, so that partial files (and stream overlays)
//! deserialise.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::{constants::*, scrub::ScrubColumn};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectOptions {
    pub project_title: String,
    pub project_directory: PathBuf,
    pub contributors: String,
    pub email_address: String,

    /// The scheduler configuration. If this isn't set, a built-in SLURM
    /// configuration is used.
    pub batch_config_path: Option<PathBuf>,

    pub convert2bids: Convert2BidsOptions,
    pub postprocessing: PostProcessingOptions,
    pub processing_streams: Vec<ProcessingStream>,

    /// Options for stages that postprocessing doesn't use; kept so that they
    /// survive a load-and-save cycle.
    #[serde(flatten)]
    pub other: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Convert2BidsOptions {
    pub bids_directory: PathBuf,

    #[serde(flatten)]
    pub other: serde_json::Map<String, serde_json::Value>,
}

/// A named, partial set of postprocessing options to be deep-merged over the
/// project's postprocessing options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingStream {
    pub stream_name: String,
    pub postprocessing_options: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostProcessingOptions {
    pub working_directory: PathBuf,
    pub output_directory: PathBuf,

    /// The fMRIPrep derivatives directory.
    pub target_directory: PathBuf,
    pub log_directory: PathBuf,

    pub target_image_space: String,

    /// Only process these tasks; empty means all.
    pub target_tasks: Vec<String>,

    /// Only process these acquisitions; empty means all.
    pub target_acquisitions: Vec<String>,

    /// Applied in exactly this order.
    pub processing_steps: Vec<StepKind>,
    pub processing_step_options: ProcessingStepOptions,
    pub confound_options: ConfoundOptions,
    pub batch_options: BatchOptions,
    pub write_process_graph: bool,
    pub roi_extraction: Option<RoiExtractionOptions>,
}

impl Default for PostProcessingOptions {
    fn default() -> Self {
        PostProcessingOptions {
            working_directory: PathBuf::new(),
            output_directory: PathBuf::new(),
            target_directory: PathBuf::new(),
            log_directory: PathBuf::new(),
            target_image_space: DEFAULT_TARGET_IMAGE_SPACE.to_string(),
            target_tasks: vec![],
            target_acquisitions: vec![],
            processing_steps: vec![
                StepKind::TemporalFiltering,
                StepKind::IntensityNormalization,
                StepKind::SpatialSmoothing,
                StepKind::AromaRegression,
            ],
            processing_step_options: ProcessingStepOptions::default(),
            confound_options: ConfoundOptions::default(),
            batch_options: BatchOptions::default(),
            write_process_graph: true,
            roi_extraction: None,
        }
    }
}

/// The closed set of processing steps.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter, EnumString,
)]
pub enum StepKind {
    #[serde(rename = "TemporalFiltering")]
    #[strum(serialize = "TemporalFiltering")]
    TemporalFiltering,

    #[serde(rename = "IntensityNormalization")]
    #[strum(serialize = "IntensityNormalization")]
    IntensityNormalization,

    #[serde(rename = "SpatialSmoothing")]
    #[strum(serialize = "SpatialSmoothing")]
    SpatialSmoothing,

    #[serde(rename = "AROMARegression")]
    #[strum(serialize = "AROMARegression")]
    AromaRegression,

    #[serde(rename = "ConfoundRegression")]
    #[strum(serialize = "ConfoundRegression")]
    ConfoundRegression,

    #[serde(rename = "Resample")]
    #[strum(serialize = "Resample")]
    Resample,

    #[serde(rename = "TrimTimepoints")]
    #[strum(serialize = "TrimTimepoints")]
    TrimTimepoints,

    #[serde(rename = "ScrubTimepoints")]
    #[strum(serialize = "ScrubTimepoints")]
    ScrubTimepoints,
}

impl StepKind {
    /// A lower-case name for nodes and directories.
    pub fn snake_name(self) -> &'static str {
        match self {
            StepKind::TemporalFiltering => "temporal_filtering",
            StepKind::IntensityNormalization => "intensity_normalization",
            StepKind::SpatialSmoothing => "spatial_smoothing",
            StepKind::AromaRegression => "aroma_regression",
            StepKind::ConfoundRegression => "confound_regression",
            StepKind::Resample => "resample",
            StepKind::TrimTimepoints => "trim_timepoints",
            StepKind::ScrubTimepoints => "scrub_timepoints",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingStepOptions {
    #[serde(rename = "TemporalFiltering")]
    pub temporal_filtering: TemporalFilteringOptions,

    #[serde(rename = "IntensityNormalization")]
    pub intensity_normalization: IntensityNormalizationOptions,

    #[serde(rename = "SpatialSmoothing")]
    pub spatial_smoothing: SpatialSmoothingOptions,

    #[serde(rename = "AROMARegression")]
    pub aroma_regression: AromaRegressionOptions,

    #[serde(rename = "ConfoundRegression")]
    pub confound_regression: ConfoundRegressionOptions,

    #[serde(rename = "Resample")]
    pub resample: ResampleOptions,

    #[serde(rename = "TrimTimepoints")]
    pub trim_timepoints: TrimTimepointsOptions,

    #[serde(rename = "ScrubTimepoints")]
    pub scrub_timepoints: ScrubTimepointsOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum TemporalFilterImplementation {
    #[serde(rename = "butterworth", alias = "Butterworth")]
    #[strum(serialize = "butterworth")]
    Butterworth,

    #[serde(rename = "fslmaths")]
    #[strum(serialize = "fslmaths")]
    Fslmaths,

    #[serde(rename = "3dtproject", alias = "3dTproject", alias = "3dTProject")]
    #[strum(serialize = "3dtproject")]
    AfniTproject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemporalFilteringOptions {
    pub implementation: TemporalFilterImplementation,

    /// Hz; zero or negative disables the high-pass.
    pub filtering_high_pass: f64,

    /// Hz; zero or negative disables the low-pass.
    pub filtering_low_pass: f64,
    pub filtering_order: usize,
}

impl Default for TemporalFilteringOptions {
    fn default() -> Self {
        TemporalFilteringOptions {
            implementation: TemporalFilterImplementation::Butterworth,
            filtering_high_pass: DEFAULT_HIGH_PASS_HZ,
            filtering_low_pass: DEFAULT_LOW_PASS_HZ,
            filtering_order: DEFAULT_FILTER_ORDER,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum IntensityNormalizationImplementation {
    #[serde(rename = "10000_globalmedian", alias = "10000_GlobalMedian")]
    #[strum(serialize = "10000_globalmedian")]
    GlobalMedian,

    #[serde(rename = "100_voxelmean", alias = "100_VoxelMean")]
    #[strum(serialize = "100_voxelmean")]
    VoxelMean,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntensityNormalizationOptions {
    pub implementation: IntensityNormalizationImplementation,
}

impl Default for IntensityNormalizationOptions {
    fn default() -> Self {
        IntensityNormalizationOptions {
            implementation: IntensityNormalizationImplementation::GlobalMedian,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum SpatialSmoothingImplementation {
    #[serde(rename = "susan", alias = "SUSAN")]
    #[strum(serialize = "susan")]
    Susan,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpatialSmoothingOptions {
    pub implementation: SpatialSmoothingImplementation,
    pub fwhm_mm: f64,

    /// If unset, a fraction of the median in-mask intensity is used.
    pub brightness_threshold: Option<f64>,
}

impl Default for SpatialSmoothingOptions {
    fn default() -> Self {
        SpatialSmoothingOptions {
            implementation: SpatialSmoothingImplementation::Susan,
            fwhm_mm: DEFAULT_FWHM_MM,
            brightness_threshold: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum AromaImplementation {
    #[serde(rename = "fsl_regfilt")]
    #[strum(serialize = "fsl_regfilt")]
    FslRegfilt,

    #[serde(rename = "fsl_regfilt_R")]
    #[strum(serialize = "fsl_regfilt_R")]
    FslRegfiltR,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AromaRegressionOptions {
    pub implementation: AromaImplementation,
}

impl Default for AromaRegressionOptions {
    fn default() -> Self {
        AromaRegressionOptions {
            implementation: AromaImplementation::FslRegfilt,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum ConfoundRegressionImplementation {
    #[serde(rename = "least_squares", alias = "scikit_learn")]
    #[strum(serialize = "least_squares")]
    LeastSquares,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfoundRegressionOptions {
    pub implementation: ConfoundRegressionImplementation,
}

impl Default for ConfoundRegressionOptions {
    fn default() -> Self {
        ConfoundRegressionOptions {
            implementation: ConfoundRegressionImplementation::LeastSquares,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResampleOptions {
    pub reference_image: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrimTimepointsOptions {
    pub from_beginning: usize,
    pub from_end: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrubTimepointsOptions {
    /// Replace scrubbed volumes with NaN rather than removing them.
    pub insert_na: bool,
    pub scrub_columns: Vec<ScrubColumn>,
}

impl Default for ScrubTimepointsOptions {
    fn default() -> Self {
        ScrubTimepointsOptions {
            insert_na: true,
            scrub_columns: vec![ScrubColumn::default()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfoundOptions {
    /// Columns to keep; a trailing `*` matches by prefix. Empty keeps every
    /// column.
    pub columns: Vec<String>,
    pub motion_outliers: MotionOutliersOptions,
}

impl Default for ConfoundOptions {
    fn default() -> Self {
        ConfoundOptions {
            columns: [
                "csf",
                "csf_derivative1",
                "white_matter",
                "white_matter_derivative1",
            ]
            .iter()
            .map(|c| c.to_string())
            .collect(),
            motion_outliers: MotionOutliersOptions::default(),
        }
    }
}

/// Spike regressors: one column per flagged timepoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionOutliersOptions {
    pub include: bool,
    pub scrub_var: String,
    pub threshold: f64,
    pub scrub_ahead: usize,
    pub scrub_behind: usize,
    pub scrub_contiguous: usize,
}

impl Default for MotionOutliersOptions {
    fn default() -> Self {
        MotionOutliersOptions {
            include: true,
            scrub_var: DEFAULT_SCRUB_VARIABLE.to_string(),
            threshold: DEFAULT_MOTION_OUTLIER_THRESHOLD,
            scrub_ahead: 0,
            scrub_behind: 0,
            scrub_contiguous: 0,
        }
    }
}

impl MotionOutliersOptions {
    pub fn as_scrub_column(&self) -> ScrubColumn {
        ScrubColumn {
            target_variable: self.scrub_var.clone(),
            threshold: self.threshold,
            scrub_ahead: self.scrub_ahead,
            scrub_behind: self.scrub_behind,
            scrub_contiguous: self.scrub_contiguous,
        }
    }
}

/// Scheduler resources requested per job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchOptions {
    pub memory_usage: String,
    pub time_usage: String,
    pub n_threads: String,
}

impl Default for BatchOptions {
    fn default() -> Self {
        BatchOptions {
            memory_usage: "20G".to_string(),
            time_usage: "2:0:0".to_string(),
            n_threads: "2".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoiExtractionOptions {
    /// A TSV with `x`, `y` and `z` columns (world coordinates, mm) and an
    /// optional `label` column.
    pub coordinates_file: PathBuf,
    pub sphere_radius: f64,
    pub prop_voxels: f64,
}

impl Default for RoiExtractionOptions {
    fn default() -> Self {
        RoiExtractionOptions {
            coordinates_file: PathBuf::new(),
            sphere_radius: 5.0,
            prop_voxels: DEFAULT_PROP_VOXELS,
        }
    }
}
