// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The closed set of processing steps and what the composer needs to know
//! about each of them.

use super::{ports, InputError, Node};
use crate::{
    config::{AromaImplementation, PostProcessingOptions, StepKind},
    steps::*,
};

/// Which branch of the workflow a step node is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Branch {
    Image,
    Confounds,
}

type Builder = fn(&PostProcessingOptions, Branch) -> Result<Box<dyn Node>, InputError>;

#[derive(Clone, Copy)]
pub struct StepTraits {
    pub kind: StepKind,

    /// Ports (other than `in_file`) that must be connected.
    pub required_inputs: &'static [&'static str],

    /// The step takes an optional `mask_file`.
    pub takes_mask: bool,

    pub affects_image: bool,
    pub affects_confounds: bool,

    /// The step can change the number of timepoints.
    pub changes_length: bool,

    /// The step expects background voxels to be zero already.
    pub consumes_masked_image: bool,

    pub(crate) build: Builder,
}

impl std::fmt::Debug for StepTraits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepTraits")
            .field("kind", &self.kind)
            .field("required_inputs", &self.required_inputs)
            .field("affects_image", &self.affects_image)
            .field("affects_confounds", &self.affects_confounds)
            .field("changes_length", &self.changes_length)
            .finish_non_exhaustive()
    }
}

const REGISTRY: [StepTraits; 8] = [
    StepTraits {
        kind: StepKind::TemporalFiltering,
        required_inputs: &[ports::TR],
        takes_mask: true,
        affects_image: true,
        affects_confounds: true,
        changes_length: false,
        consumes_masked_image: false,
        build: build_temporal_filtering,
    },
    StepTraits {
        kind: StepKind::IntensityNormalization,
        required_inputs: &[],
        takes_mask: true,
        affects_image: true,
        affects_confounds: false,
        changes_length: false,
        consumes_masked_image: true,
        build: build_intensity_normalization,
    },
    StepTraits {
        kind: StepKind::SpatialSmoothing,
        required_inputs: &[],
        takes_mask: true,
        affects_image: true,
        affects_confounds: false,
        changes_length: false,
        consumes_masked_image: true,
        build: build_spatial_smoothing,
    },
    StepTraits {
        kind: StepKind::AromaRegression,
        required_inputs: &[ports::MIXING_FILE, ports::NOISE_FILE],
        takes_mask: true,
        affects_image: true,
        affects_confounds: true,
        changes_length: false,
        consumes_masked_image: false,
        build: build_aroma_regression,
    },
    StepTraits {
        kind: StepKind::ConfoundRegression,
        required_inputs: &[ports::CONFOUNDS_FILE],
        takes_mask: true,
        affects_image: true,
        affects_confounds: false,
        changes_length: false,
        consumes_masked_image: false,
        build: build_confound_regression,
    },
    StepTraits {
        kind: StepKind::Resample,
        required_inputs: &[],
        takes_mask: false,
        affects_image: true,
        affects_confounds: false,
        changes_length: false,
        consumes_masked_image: false,
        build: build_resample,
    },
    StepTraits {
        kind: StepKind::TrimTimepoints,
        required_inputs: &[],
        takes_mask: false,
        affects_image: true,
        affects_confounds: true,
        changes_length: true,
        consumes_masked_image: false,
        build: build_trim_timepoints,
    },
    StepTraits {
        kind: StepKind::ScrubTimepoints,
        required_inputs: &[ports::SCRUB_VECTOR],
        takes_mask: false,
        affects_image: true,
        affects_confounds: true,
        changes_length: true,
        consumes_masked_image: false,
        build: build_scrub_timepoints,
    },
];

pub fn step_traits(kind: StepKind) -> &'static StepTraits {
    REGISTRY
        .iter()
        .find(|t| t.kind == kind)
        .expect("every step kind is registered")
}

fn build_temporal_filtering(
    o: &PostProcessingOptions,
    _: Branch,
) -> Result<Box<dyn Node>, InputError> {
    let tf = &o.processing_step_options.temporal_filtering;
    Ok(Box::new(TemporalFilter {
        implementation: tf.implementation,
        high_pass: tf.filtering_high_pass,
        low_pass: tf.filtering_low_pass,
        order: tf.filtering_order,
        insert_na: o.processing_step_options.scrub_timepoints.insert_na,
    }))
}

fn build_intensity_normalization(
    o: &PostProcessingOptions,
    _: Branch,
) -> Result<Box<dyn Node>, InputError> {
    Ok(Box::new(IntensityNormalization {
        implementation: o.processing_step_options.intensity_normalization.implementation,
    }))
}

fn build_spatial_smoothing(
    o: &PostProcessingOptions,
    _: Branch,
) -> Result<Box<dyn Node>, InputError> {
    let s = &o.processing_step_options.spatial_smoothing;
    Ok(Box::new(SpatialSmoothing {
        implementation: s.implementation,
        fwhm_mm: s.fwhm_mm,
        brightness_threshold: s.brightness_threshold,
    }))
}

fn build_aroma_regression(
    o: &PostProcessingOptions,
    branch: Branch,
) -> Result<Box<dyn Node>, InputError> {
    // fsl_regfilt only understands real images.
    let implementation = match branch {
        Branch::Image => o.processing_step_options.aroma_regression.implementation,
        Branch::Confounds => AromaImplementation::FslRegfiltR,
    };
    Ok(Box::new(AromaRegression { implementation }))
}

fn build_confound_regression(
    o: &PostProcessingOptions,
    _: Branch,
) -> Result<Box<dyn Node>, InputError> {
    Ok(Box::new(ConfoundRegression {
        implementation: o.processing_step_options.confound_regression.implementation,
    }))
}

fn build_resample(o: &PostProcessingOptions, _: Branch) -> Result<Box<dyn Node>, InputError> {
    let reference_image = o
        .processing_step_options
        .resample
        .reference_image
        .clone()
        .ok_or(InputError::MissingReferenceImage)?;
    if !reference_image.exists() {
        return Err(InputError::ReferenceImageNotFound(reference_image));
    }
    Ok(Box::new(Resample { reference_image }))
}

fn build_trim_timepoints(
    o: &PostProcessingOptions,
    _: Branch,
) -> Result<Box<dyn Node>, InputError> {
    let t = &o.processing_step_options.trim_timepoints;
    Ok(Box::new(TrimTimepoints {
        from_beginning: t.from_beginning,
        from_end: t.from_end,
    }))
}

fn build_scrub_timepoints(
    o: &PostProcessingOptions,
    _: Branch,
) -> Result<Box<dyn Node>, InputError> {
    Ok(Box::new(ScrubTimepoints {
        insert_na: o.processing_step_options.scrub_timepoints.insert_na,
    }))
}
