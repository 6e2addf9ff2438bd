// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Arguments of the three postprocessing entry points.

use std::path::PathBuf;

use clap::Parser;

use super::PostprocError;
use crate::{
    constants::DEFAULT_PROCESSING_STREAM,
    postprocess::{postprocess_image, postprocess_subject, postprocess_subjects, JobOptions},
};

/// How child jobs are handed out.
#[derive(Parser, Debug)]
pub(super) struct JobArgs {
    /// Submit child jobs to the cluster scheduler (the default).
    #[clap(long, conflicts_with("no-batch"))]
    batch: bool,

    /// Run child jobs in this process, one after the other.
    #[clap(long)]
    no_batch: bool,

    /// Actually run or submit child jobs. Without this, the jobs are only
    /// printed.
    #[clap(long, conflicts_with("no-submit"))]
    submit: bool,

    /// Only print child jobs (the default).
    #[clap(long)]
    no_submit: bool,

    /// Log debug messages, here and in every child job.
    #[clap(long)]
    pub(super) debug: bool,
}

impl JobArgs {
    pub(super) fn job_options(&self) -> JobOptions {
        JobOptions {
            batch: self.batch || !self.no_batch,
            submit: self.submit && !self.no_submit,
            debug: self.debug,
        }
    }
}

#[derive(Parser, Debug)]
pub struct PostprocessSubjectsArgs {
    /// The project configuration file (json, yaml or toml).
    #[clap(name = "CONFIG_FILE", parse(from_os_str))]
    config_file: PathBuf,

    /// The subjects to postprocess, with or without the "sub-" prefix. If none
    /// are given, every subject in the target directory is postprocessed.
    #[clap(name = "SUBJECTS")]
    subjects: Vec<String>,

    /// The processing stream to run.
    #[clap(short = 's', long, default_value = DEFAULT_PROCESSING_STREAM)]
    processing_stream: String,

    /// Re-index the target directory even if an index already exists.
    #[clap(long)]
    refresh_index: bool,

    #[clap(flatten)]
    pub(super) job_args: JobArgs,
}

impl PostprocessSubjectsArgs {
    pub fn run(self, dry_run: bool) -> Result<(), PostprocError> {
        postprocess_subjects(
            &self.config_file,
            &self.subjects,
            &self.processing_stream,
            self.job_args.job_options(),
            self.refresh_index,
            dry_run,
        )?;
        Ok(())
    }
}

#[derive(Parser, Debug)]
pub struct PostprocessSubjectArgs {
    /// The subject to postprocess, with or without the "sub-" prefix.
    #[clap(name = "SUBJECT")]
    subject: String,

    /// The run configuration written by postprocess-subjects.
    #[clap(name = "RUN_CONFIG", parse(from_os_str))]
    run_config: PathBuf,

    #[clap(flatten)]
    pub(super) job_args: JobArgs,
}

impl PostprocessSubjectArgs {
    pub fn run(self, dry_run: bool) -> Result<(), PostprocError> {
        postprocess_subject(
            &self.subject,
            &self.run_config,
            self.job_args.job_options(),
            dry_run,
        )?;
        Ok(())
    }
}

#[derive(Parser, Debug)]
pub struct PostprocessImageArgs {
    /// The preprocessed BOLD image to postprocess.
    #[clap(name = "IMAGE", parse(from_os_str))]
    image: PathBuf,

    /// The run configuration written by postprocess-subjects.
    #[clap(name = "RUN_CONFIG", parse(from_os_str))]
    run_config: PathBuf,

    /// Log debug messages.
    #[clap(long)]
    pub(super) debug: bool,
}

impl PostprocessImageArgs {
    /// With `dry_run`, the workflow is composed and validated, but not run.
    pub fn run(self, dry_run: bool) -> Result<(), PostprocError> {
        postprocess_image(&self.image, &self.run_config, dry_run)?;
        Ok(())
    }
}
