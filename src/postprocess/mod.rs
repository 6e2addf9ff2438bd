// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Postprocessing a project: freezing the run configuration, then fanning out
//! to one job per subject and one job per image.
//!
//! The parent job ([`postprocess_subjects`]) resolves the processing stream,
//! writes the [`RunConfig`](crate::config::RunConfig) and refreshes the BIDS
//! index. Subject jobs ([`postprocess_subject`]) find the images to process;
//! image jobs ([`postprocess_image`]) find an image's companion files and run
//! its workflow. Child jobs are only ever given the run configuration's path.

mod distribute;
mod image;
mod run_config;
#[cfg(test)]
mod tests;

pub use distribute::{postprocess_subject, postprocess_subjects};
pub use image::postprocess_image;
pub use run_config::{materialize_run_config, resolve_run_config};

use thiserror::Error;

use crate::{
    batch::{BatchError, JobCommand},
    bids::IndexError,
    config::ConfigError,
    workflow::{ComposeError, InputError, PipelineError, WorkflowError},
};

/// How a parent job hands out its child jobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct JobOptions {
    /// Submit to a cluster scheduler rather than running here.
    pub batch: bool,

    /// Actually run or submit the jobs; otherwise they're only printed.
    pub submit: bool,

    /// Pass `--debug` on to child jobs.
    pub debug: bool,
}

/// Run a child job in this process.
pub(crate) fn run_job(command: &JobCommand) -> Result<(), PostprocessError> {
    match command {
        JobCommand::PostprocessSubject {
            subject,
            run_config,
            batch,
            submit,
            debug,
        } => postprocess_subject(
            subject,
            run_config,
            JobOptions {
                batch: *batch,
                submit: *submit,
                debug: *debug,
            },
            false,
        ),

        JobCommand::PostprocessImage {
            image, run_config, ..
        } => postprocess_image(image, run_config, false).map(|_| ()),
    }
}

/// The first line of an error's message, for one-line reports.
fn one_line(e: &PostprocessError) -> String {
    e.to_string().lines().next().unwrap_or_default().to_string()
}

#[derive(Error, Debug)]
pub enum PostprocessError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Compose(#[from] ComposeError),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Batch(#[from] BatchError),

    #[error(transparent)]
    IO(#[from] std::io::Error),
}
