// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Distributing postprocessing jobs.
//!
//! A job is a typed [`JobCommand`] (one invocation of this program) plus where
//! its log goes. A [`JobManager`] either prints the commands, submits them to
//! a cluster scheduler ([`BatchManager`]) or runs them here, one after the
//! other ([`LocalManager`]).

mod config;
mod local;
mod scheduler;

pub use config::BatchConfig;
pub use local::LocalManager;
pub use scheduler::BatchManager;

use std::path::{Path, PathBuf};

use itertools::Itertools;
use thiserror::Error;

/// The name of this program's binary, used when the running executable's
/// path can't be determined.
const PROGRAM_NAME: &str = "postproc";

/// One invocation of this program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobCommand {
    PostprocessSubject {
        subject: String,
        run_config: PathBuf,
        batch: bool,
        submit: bool,
        debug: bool,
    },

    PostprocessImage {
        image: PathBuf,
        run_config: PathBuf,
        debug: bool,
    },
}

impl JobCommand {
    /// A scheduler-friendly name, e.g. `postproc_sub-01` or
    /// `postproc_sub-01_task-rest_..._bold`.
    pub fn job_id(&self) -> String {
        match self {
            JobCommand::PostprocessSubject { subject, .. } => format!("postproc_sub-{subject}"),
            JobCommand::PostprocessImage { image, .. } => {
                format!("postproc_{}", image_stem(image))
            }
        }
    }

    /// The arguments after the program name.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![];
        match self {
            JobCommand::PostprocessSubject {
                subject,
                run_config,
                batch,
                submit,
                debug,
            } => {
                args.push("postprocess-subject".to_string());
                args.push(subject.clone());
                args.push(run_config.display().to_string());
                args.push(if *batch { "--batch" } else { "--no-batch" }.to_string());
                if *submit {
                    args.push("--submit".to_string());
                }
                if *debug {
                    args.push("--debug".to_string());
                }
            }

            JobCommand::PostprocessImage {
                image,
                run_config,
                debug,
            } => {
                args.push("postprocess-image".to_string());
                args.push(image.display().to_string());
                args.push(run_config.display().to_string());
                if *debug {
                    args.push("--debug".to_string());
                }
            }
        }
        args
    }

    /// The whole command line, with arguments quoted where the shell needs
    /// it.
    pub fn render(&self, program: &str) -> String {
        std::iter::once(program.to_string())
            .chain(self.args())
            .map(|a| shell_quote(&a))
            .join(" ")
    }
}

/// A command and where its scheduler output goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub command: JobCommand,
    pub log_dir: PathBuf,
}

impl JobSpec {
    pub fn job_id(&self) -> String {
        self.command.job_id()
    }

    /// The scheduler log for this job.
    pub fn log_path(&self) -> PathBuf {
        self.log_dir.join(format!("{}.out", self.job_id()))
    }
}

/// Something that can run or hand off a collection of jobs.
pub trait JobManager {
    fn add_job(&mut self, job: JobSpec);

    /// Run (or submit) every added job. Jobs are independent; a failure
    /// doesn't stop the others, but is reported at the end.
    fn submit_jobs(&mut self) -> Result<(), BatchError>;

    /// Print what `submit_jobs` would do.
    fn print_jobs(&self);
}

/// The path of the running program, so that child jobs use the same build.
pub fn program_path() -> String {
    std::env::current_exe()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| PROGRAM_NAME.to_string())
}

/// A file name without any extensions.
pub(crate) fn image_stem(image: &Path) -> String {
    let name = image
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.find('.') {
        Some(i) => name[..i].to_string(),
        None => name,
    }
}

fn shell_quote(word: &str) -> String {
    if !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:+,@%".contains(c))
    {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Couldn't parse batch configuration {file}: {err}")]
    Config {
        file: String,
        err: serde_json::Error,
    },

    #[error("Submitting job {job_id} failed ({status}): {stderr}")]
    Submit {
        job_id: String,
        status: String,
        stderr: String,
    },

    #[error("{failed} of {total} jobs failed")]
    JobsFailed { failed: usize, total: usize },

    #[error(transparent)]
    IO(#[from] std::io::Error),
}
