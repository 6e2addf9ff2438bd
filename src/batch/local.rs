// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::fmt::Display;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{debug, info, warn};

use super::{BatchError, JobCommand, JobManager, JobSpec};
use crate::PROGRESS_BARS;

/// Runs jobs in this process, one at a time.
pub struct LocalManager<F> {
    runner: F,
    program: String,
    jobs: Vec<JobSpec>,
}

impl<F, E> LocalManager<F>
where
    F: FnMut(&JobCommand) -> Result<(), E>,
    E: Display,
{
    /// `runner` does the work of a job. It's responsible for reporting its
    /// own errors; here they're only counted.
    pub fn new(runner: F, program: String) -> LocalManager<F> {
        LocalManager {
            runner,
            program,
            jobs: vec![],
        }
    }
}

impl<F, E> JobManager for LocalManager<F>
where
    F: FnMut(&JobCommand) -> Result<(), E>,
    E: Display,
{
    fn add_job(&mut self, job: JobSpec) {
        self.jobs.push(job);
    }

    fn submit_jobs(&mut self) -> Result<(), BatchError> {
        let total = self.jobs.len();
        let pb = ProgressBar::with_draw_target(
            Some(total as _),
            if PROGRESS_BARS.load() {
                ProgressDrawTarget::stdout()
            } else {
                ProgressDrawTarget::hidden()
            },
        )
        .with_style(
            ProgressStyle::default_bar()
                .template("{msg:18}: [{wide_bar:.blue}] {pos:2}/{len:2} jobs ({elapsed_precise}<{eta_precise})")
                .expect("progress bar template is valid")
                .progress_chars("=> "),
        )
        .with_position(0)
        .with_message("Running jobs");

        let mut failed = 0;
        for job in &self.jobs {
            debug!("Running {}", job.job_id());
            if let Err(e) = (self.runner)(&job.command) {
                debug!("{} failed: {e}", job.job_id());
                failed += 1;
            }
            pb.inc(1);
        }
        pb.abandon_with_message("Finished jobs");

        if failed > 0 {
            warn!("{failed} of {total} jobs failed");
            return Err(BatchError::JobsFailed { failed, total });
        }
        info!("All {total} jobs succeeded");
        Ok(())
    }

    fn print_jobs(&self) {
        if self.jobs.is_empty() {
            info!("No jobs to run");
        }
        for job in &self.jobs {
            println!("{}", job.command.render(&self.program));
        }
    }
}
