// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors from composing and running workflows.

use std::path::PathBuf;

use thiserror::Error;

use crate::{
    config::{ConfigError, StepKind},
    filter::FilterError,
    io::{ConfoundsError, NiftiIoError},
    scrub::ScrubError,
    steps::StepError,
};

/// A mandatory input for a declared step is missing.
#[derive(Error, Debug)]
pub enum InputError {
    #[error("{step} needs a confounds file, but none was found")]
    MissingConfounds { step: StepKind },

    #[error("AROMARegression needs the AROMA {missing}, but none was found")]
    MissingAromaInputs { missing: &'static str },

    #[error("Resample needs a reference image; set 'reference_image' in the Resample options")]
    MissingReferenceImage,

    #[error("Reference image {0} doesn't exist")]
    ReferenceImageNotFound(PathBuf),

    #[error("ROI coordinates file {0} doesn't exist")]
    CoordinatesNotFound(PathBuf),

    #[error("Couldn't determine the repetition time of {image}; no sidecar carries 'RepetitionTime'")]
    MissingRepetitionTime { image: String },
}

/// The declared steps can't be composed into a sound workflow.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Nothing to process: neither an image nor a confounds file was given")]
    NothingToBuild,

    #[error("The workflow has a cycle through these nodes: {nodes}")]
    Cycle { nodes: String },

    #[error("Invalid pipeline: {reason}")]
    InvalidPipeline { reason: String },

    #[error("The image has {image_timepoints} timepoints, but its confounds have {confounds_rows} rows")]
    LengthMismatch {
        image_timepoints: usize,
        confounds_rows: usize,
    },

    #[error("The MELODIC mixing matrix has {mixing_rows} rows, but the data have {num_timepoints} timepoints")]
    MixingLengthMismatch {
        mixing_rows: usize,
        num_timepoints: usize,
    },

    #[error("ScrubTimepoints without insert_na is declared before TrimTimepoints; trimming must happen first")]
    ScrubBeforeTrim,

    #[error("Can't trim {from_beginning} timepoints from the beginning and {from_end} from the end of {num_timepoints} timepoints")]
    InvalidTrim {
        from_beginning: usize,
        from_end: usize,
        num_timepoints: usize,
    },

    #[error("Workflow node '{0}' was added twice")]
    DuplicateNode(String),

    #[error("Workflow node '{0}' doesn't exist")]
    UnknownNode(String),

    #[error("Input port '{port}' of node '{node}' is connected twice")]
    DuplicateConnection { node: String, port: String },
}

/// A node failed while the workflow ran.
#[derive(Error, Debug)]
#[error("Workflow node '{node}' failed: {source}\nIts working directory is preserved at {}", .node_dir.display())]
pub struct ExecutionError {
    pub node: String,
    pub node_dir: PathBuf,
    pub source: StepError,
}

/// Errors raised while composing a workflow, before anything runs.
#[derive(Error, Debug)]
pub enum ComposeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Scrub(#[from] ScrubError),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    NiftiIo(#[from] NiftiIoError),

    #[error(transparent)]
    Confounds(#[from] ConfoundsError),

    #[error(transparent)]
    IO(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}
