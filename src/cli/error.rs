// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error type for all postproc-related errors. This should be the *only*
//! error enum that is publicly visible from the binary's point of view.

use thiserror::Error;

use crate::{
    batch::BatchError,
    bids::IndexError,
    config::ConfigError,
    postprocess::PostprocessError,
    workflow::{ComposeError, InputError, PipelineError, WorkflowError},
};

const README: &str = "README.md";

/// The error reported to users of `postproc`. Each message points to the
/// section of the README covering the problem, unless it's "generic".
#[derive(Error, Debug)]
pub enum PostprocError {
    /// A problem with the project configuration or a run configuration.
    #[error("{0}\n\nSee the \"Configuration\" section of {README}")]
    Config(String),

    /// A problem with the BIDS index of the target directory.
    #[error("{0}\n\nSee the \"BIDS index\" section of {README}")]
    Index(String),

    /// A required input file or value couldn't be found for an image.
    #[error("{0}\n\nSee the \"Inputs\" section of {README}")]
    Input(String),

    /// The declared processing steps don't make a valid pipeline.
    #[error("{0}\n\nSee the \"Processing steps\" section of {README}")]
    Pipeline(String),

    /// A workflow node failed while running.
    #[error("{0}\n\nRun again with -vv to see every step as it runs.")]
    Execution(String),

    /// Scrubbing would remove every timepoint.
    #[error("{0}\n\nSee the \"Scrubbing\" section of {README}")]
    Scrub(String),

    /// A problem handing jobs to the cluster scheduler.
    #[error("{0}\n\nSee the \"Batch submission\" section of {README}")]
    Batch(String),

    /// A generic error that can't be clarified further with documentation,
    /// e.g. IO errors.
    #[error("{0}")]
    Generic(String),
}

// When changing the error propagation below, ensure `Self::from(e)` uses the
// correct `e`!

impl From<PostprocessError> for PostprocError {
    fn from(e: PostprocessError) -> Self {
        match e {
            PostprocessError::Config(e) => Self::from(e),
            PostprocessError::Index(e) => Self::from(e),
            PostprocessError::Input(e) => Self::from(e),
            PostprocessError::Pipeline(e) => Self::from(e),
            PostprocessError::Compose(e) => Self::from(e),
            PostprocessError::Workflow(e) => Self::from(e),
            PostprocessError::Batch(e) => Self::from(e),
            PostprocessError::IO(e) => Self::from(e),
        }
    }
}

impl From<ConfigError> for PostprocError {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::DuplicateSteps { .. } => Self::Pipeline(e.to_string()),
            ConfigError::IO(_) => Self::Generic(e.to_string()),
            _ => Self::Config(e.to_string()),
        }
    }
}

impl From<IndexError> for PostprocError {
    fn from(e: IndexError) -> Self {
        match e {
            IndexError::Read { .. } | IndexError::Write { .. } => Self::Generic(e.to_string()),
            _ => Self::Index(e.to_string()),
        }
    }
}

impl From<InputError> for PostprocError {
    fn from(e: InputError) -> Self {
        Self::Input(e.to_string())
    }
}

impl From<PipelineError> for PostprocError {
    fn from(e: PipelineError) -> Self {
        Self::Pipeline(e.to_string())
    }
}

impl From<ComposeError> for PostprocError {
    fn from(e: ComposeError) -> Self {
        match e {
            ComposeError::Config(e) => Self::from(e),
            ComposeError::Input(e) => Self::from(e),
            ComposeError::Pipeline(e) => Self::from(e),
            ComposeError::Scrub(_) => Self::Scrub(e.to_string()),
            ComposeError::Filter(_) => Self::Config(e.to_string()),
            ComposeError::NiftiIo(_) | ComposeError::Confounds(_) | ComposeError::IO(_) => {
                Self::Generic(e.to_string())
            }
        }
    }
}

impl From<WorkflowError> for PostprocError {
    fn from(e: WorkflowError) -> Self {
        match e {
            WorkflowError::Pipeline(e) => Self::from(e),
            WorkflowError::Execution(_) => Self::Execution(e.to_string()),
        }
    }
}

impl From<BatchError> for PostprocError {
    fn from(e: BatchError) -> Self {
        match e {
            BatchError::Config { .. } | BatchError::Submit { .. } => Self::Batch(e.to_string()),
            BatchError::JobsFailed { .. } => Self::Execution(e.to_string()),
            BatchError::IO(_) => Self::Generic(e.to_string()),
        }
    }
}

impl From<std::io::Error> for PostprocError {
    fn from(e: std::io::Error) -> Self {
        Self::Generic(e.to_string())
    }
}
