// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::process::Command;

use log::{error, info};

use super::{BatchConfig, BatchError, JobManager, JobSpec};
use crate::config::BatchOptions;

/// Submits jobs to a cluster scheduler through the shell.
pub struct BatchManager {
    config: BatchConfig,
    options: BatchOptions,
    email_address: Option<String>,
    program: String,
    jobs: Vec<JobSpec>,
}

impl BatchManager {
    pub fn new(
        config: BatchConfig,
        options: BatchOptions,
        email_address: Option<String>,
        program: String,
    ) -> BatchManager {
        BatchManager {
            config,
            options,
            email_address: email_address.filter(|e| !e.is_empty()),
            program,
            jobs: vec![],
        }
    }

    /// The submission line for a job.
    pub fn render(&self, job: &JobSpec) -> String {
        let c = &self.config;
        let resources = c.resources(&self.options);
        let job_id = job.job_id();
        let output = job.log_path().display().to_string();

        let mut parts = vec![c.submission_head.clone()];
        for (template, key, value) in [
            (&c.memory_option, "{mem}", resources.memory),
            (&c.time_option, "{time}", resources.time),
            (&c.threads_option, "{threads}", resources.threads),
            (&c.job_id_option, "{job_id}", job_id.as_str()),
            (&c.output_option, "{output}", output.as_str()),
        ] {
            if !template.is_empty() {
                parts.push(template.replace(key, value));
            }
        }
        if let Some(email) = &self.email_address {
            if !c.email_option.is_empty() {
                parts.push(c.email_option.replace("{email}", email));
            }
        }

        let cmd = job.command.render(&self.program);
        let cmd = if c.no_quotes {
            cmd
        } else {
            format!("\"{}\"", cmd.replace('"', "\\\""))
        };
        if c.command_option.contains("{cmd}") {
            parts.push(c.command_option.replace("{cmd}", &cmd));
        } else {
            parts.push(c.command_option.clone());
            parts.push(cmd);
        }
        parts.retain(|p| !p.is_empty());
        parts.join(" ")
    }
}

impl JobManager for BatchManager {
    fn add_job(&mut self, job: JobSpec) {
        self.jobs.push(job);
    }

    fn submit_jobs(&mut self) -> Result<(), BatchError> {
        let total = self.jobs.len();
        let mut failed = 0;
        for job in &self.jobs {
            std::fs::create_dir_all(&job.log_dir)?;
            let line = self.render(job);
            let output = Command::new("sh").arg("-c").arg(&line).output()?;
            if output.status.success() {
                let stdout = String::from_utf8_lossy(&output.stdout);
                info!("{}: {}", job.job_id(), stdout.trim());
            } else {
                let e = BatchError::Submit {
                    job_id: job.job_id(),
                    status: output.status.to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                };
                error!("{e}");
                failed += 1;
            }
        }
        info!("Submitted {} of {total} jobs", total - failed);
        if failed > 0 {
            return Err(BatchError::JobsFailed { failed, total });
        }
        Ok(())
    }

    fn print_jobs(&self) {
        if self.jobs.is_empty() {
            info!("No jobs to submit");
        }
        for job in &self.jobs {
            println!("{}", self.render(job));
        }
    }
}
