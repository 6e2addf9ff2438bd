// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! How to talk to a cluster scheduler.

use std::{fs::File, io::BufReader, path::Path};

use log::debug;
use serde::{Deserialize, Serialize};

use super::BatchError;
use crate::config::BatchOptions;

/// Templates for a scheduler submission line. Placeholders in braces
/// (`{mem}`, `{time}`, `{threads}`, `{job_id}`, `{output}`, `{email}`,
/// `{cmd}`) are substituted per job.
///
/// The keys of older configuration files (e.g. "BatchCommand") are accepted
/// too.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    #[serde(alias = "BatchCommand")]
    pub submission_head: String,

    #[serde(alias = "MemoryCommand")]
    pub memory_option: String,

    #[serde(alias = "TimeCommand")]
    pub time_option: String,

    #[serde(alias = "NThreadsCommand")]
    pub threads_option: String,

    #[serde(alias = "JobIDCommand")]
    pub job_id_option: String,

    #[serde(alias = "OutputCommand")]
    pub output_option: String,

    #[serde(alias = "EmailCommand")]
    pub email_option: String,

    /// How the job's command line is handed to the scheduler.
    #[serde(alias = "CommandWrapper")]
    pub command_option: String,

    /// Don't wrap the command line in double quotes.
    #[serde(alias = "NoQuotes")]
    pub no_quotes: bool,

    #[serde(alias = "MemoryDefault")]
    pub memory_default: String,

    #[serde(alias = "TimeDefault")]
    pub time_default: String,

    #[serde(alias = "NThreads")]
    pub threads_default: String,
}

impl Default for BatchConfig {
    /// SLURM.
    fn default() -> Self {
        BatchConfig {
            submission_head: "sbatch --no-requeue".to_string(),
            memory_option: "--mem={mem}".to_string(),
            time_option: "--time={time}".to_string(),
            threads_option: "--cpus-per-task={threads}".to_string(),
            job_id_option: "--job-name={job_id}".to_string(),
            output_option: "--output={output}".to_string(),
            email_option: "--mail-user={email} --mail-type=FAIL".to_string(),
            command_option: "--wrap={cmd}".to_string(),
            no_quotes: false,
            memory_default: "5G".to_string(),
            time_default: "1:0:0".to_string(),
            threads_default: "1".to_string(),
        }
    }
}

/// The resources a job asks for, after falling back to the scheduler
/// configuration's defaults.
pub(super) struct Resources<'a> {
    pub(super) memory: &'a str,
    pub(super) time: &'a str,
    pub(super) threads: &'a str,
}

impl BatchConfig {
    /// Read a configuration file, or use the built-in SLURM configuration if
    /// none is given.
    pub fn load(path: Option<&Path>) -> Result<BatchConfig, BatchError> {
        let path = match path {
            Some(p) => p,
            None => {
                debug!("No batch configuration given; using SLURM defaults");
                return Ok(BatchConfig::default());
            }
        };
        debug!("Reading batch configuration {}", path.display());
        serde_json::from_reader(BufReader::new(File::open(path)?)).map_err(|err| {
            BatchError::Config {
                file: path.display().to_string(),
                err,
            }
        })
    }

    pub(super) fn resources<'a>(&'a self, options: &'a BatchOptions) -> Resources<'a> {
        let or = |v: &'a str, default: &'a str| if v.is_empty() { default } else { v };
        Resources {
            memory: or(&options.memory_usage, &self.memory_default),
            time: or(&options.time_usage, &self.time_default),
            threads: or(&options.n_threads, &self.threads_default),
        }
    }
}
