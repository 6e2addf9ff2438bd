// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The run configuration: everything a child job needs, resolved once by the
//! parent job and frozen on disk.

use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use log::debug;
use serde::{Deserialize, Serialize};

use super::{ConfigError, PostProcessingOptions};
use crate::constants::{RUN_CONFIG_FILENAME, RUN_CONFIG_VERSION};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub run_config_version: u32,
    pub processing_stream: String,

    /// The stream-resolved options.
    pub postprocessing: PostProcessingOptions,

    pub target_directory: PathBuf,
    pub bids_directory: PathBuf,
    pub batch_config_path: Option<PathBuf>,
    pub email_address: Option<String>,

    pub stream_working_directory: PathBuf,
    pub stream_log_directory: PathBuf,
    pub stream_output_directory: PathBuf,
    pub pybids_db_path: PathBuf,
}

impl RunConfig {
    /// Where this configuration lives on disk.
    pub fn path(&self) -> PathBuf {
        self.stream_working_directory.join(RUN_CONFIG_FILENAME)
    }

    /// Write the configuration into the stream working directory (creating
    /// it), returning the file's path.
    pub fn write(&self) -> Result<PathBuf, ConfigError> {
        std::fs::create_dir_all(&self.stream_working_directory)?;
        let path = self.path();
        let mut f = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(&mut f, self).map_err(|err| ConfigError::RunConfigWrite {
            file: path.display().to_string(),
            err,
        })?;
        writeln!(f)?;
        f.flush()?;
        debug!("Wrote run configuration {}", path.display());
        Ok(path)
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<RunConfig, ConfigError> {
        let path = path.as_ref();
        let file = path.display().to_string();
        let value: serde_json::Value = serde_json::from_reader(BufReader::new(File::open(path)?))
            .map_err(|err| ConfigError::RunConfigRead {
                file: file.clone(),
                err,
            })?;

        let found = value
            .get("run_config_version")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;
        if found != RUN_CONFIG_VERSION {
            return Err(ConfigError::RunConfigVersion {
                file,
                found,
                expected: RUN_CONFIG_VERSION,
            });
        }

        serde_json::from_value(value).map_err(|err| ConfigError::RunConfigRead { file, err })
    }

    /// The directories for one subject in this stream.
    pub fn subject_output_directory(&self, subject: &str) -> PathBuf {
        self.stream_output_directory.join(format!("sub-{subject}"))
    }

    pub fn subject_working_directory(&self, subject: &str) -> PathBuf {
        self.stream_working_directory.join(format!("sub-{subject}"))
    }

    pub fn subject_log_directory(&self, subject: &str) -> PathBuf {
        self.stream_log_directory.join(format!("sub-{subject}"))
    }
}
