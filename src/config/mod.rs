// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Project configuration: loading, legacy-key migration, processing streams,
//! and the frozen run configuration handed to child jobs.

mod legacy;
mod merge;
mod options;
mod run_config;

pub use legacy::migrate_legacy_keys;
pub use merge::deep_merge;
pub use options::*;
pub use run_config::RunConfig;

use std::{
    path::{Path, PathBuf},
    str::FromStr,
};

use itertools::Itertools;
use log::{debug, warn};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};
use thiserror::Error;

use crate::constants::DEFAULT_PROCESSING_STREAM;

lazy_static::lazy_static! {
    static ref CONFIG_FILE_TYPES_COMMA_SEPARATED: String = ConfigFileType::iter().join(", ");
}

/// The file types a project configuration can be read from.
#[derive(Debug, Display, EnumIter, EnumString)]
enum ConfigFileType {
    #[strum(serialize = "json")]
    Json,
    #[strum(serialize = "yaml")]
    Yaml,
    #[strum(serialize = "yml")]
    Yml,
    #[strum(serialize = "toml")]
    Toml,
}

impl ProjectOptions {
    /// Read a project configuration file. Legacy keys are renamed (with a
    /// warning each) before the options are deserialised.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<ProjectOptions, ConfigError> {
        let path = path.as_ref();
        let file = path.display().to_string();
        debug!("Attempting to parse configuration file {file}");

        let file_type = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .and_then(|e| ConfigFileType::from_str(&e).ok());
        let contents = std::fs::read_to_string(path)?;
        let mut value: serde_json::Value = match file_type {
            Some(ConfigFileType::Json) => {
                serde_json::from_str(&contents).map_err(|e| ConfigError::Parse {
                    file: file.clone(),
                    err: e.to_string(),
                })?
            }
            Some(ConfigFileType::Yaml | ConfigFileType::Yml) => serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::Parse {
                    file: file.clone(),
                    err: e.to_string(),
                })?,
            Some(ConfigFileType::Toml) => {
                toml::from_str(&contents).map_err(|e| ConfigError::Parse {
                    file: file.clone(),
                    err: e.to_string(),
                })?
            }
            None => {
                return Err(ConfigError::UnsupportedFileType {
                    file,
                    supported: CONFIG_FILE_TYPES_COMMA_SEPARATED.as_str(),
                })
            }
        };

        for rename in migrate_legacy_keys(&mut value) {
            warn!("{file}: {rename}");
        }

        let options: ProjectOptions =
            serde_json::from_value(value).map_err(|err| ConfigError::Invalid { file, err })?;
        options.postprocessing.validate()?;
        Ok(options)
    }

    /// The postprocessing options for a processing stream. The reserved
    /// stream name "default" gives the project's own options.
    pub fn resolve_stream(&self, stream: &str) -> Result<PostProcessingOptions, ConfigError> {
        if stream == DEFAULT_PROCESSING_STREAM {
            return Ok(self.postprocessing.clone());
        }
        let overlay = self
            .processing_streams
            .iter()
            .find(|s| s.stream_name == stream)
            .ok_or_else(|| ConfigError::StreamNotFound {
                stream: stream.to_string(),
                available: std::iter::once(DEFAULT_PROCESSING_STREAM)
                    .chain(self.processing_streams.iter().map(|s| s.stream_name.as_str()))
                    .join(", "),
            })?;

        let mut merged = serde_json::to_value(&self.postprocessing).map_err(|err| {
            ConfigError::InvalidStream {
                stream: stream.to_string(),
                err,
            }
        })?;
        deep_merge(&mut merged, &overlay.postprocessing_options);
        let options: PostProcessingOptions =
            serde_json::from_value(merged).map_err(|err| ConfigError::InvalidStream {
                stream: stream.to_string(),
                err,
            })?;
        options.validate()?;
        Ok(options)
    }
}

impl PostProcessingOptions {
    /// Reject step combinations that can't be composed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let duplicates: Vec<StepKind> = self
            .processing_steps
            .iter()
            .duplicates()
            .copied()
            .collect();
        if !duplicates.is_empty() {
            return Err(ConfigError::DuplicateSteps {
                steps: duplicates.iter().join(", "),
            });
        }
        Ok(())
    }
}

/// Make a path absolute against the current directory, so that it stays valid
/// for jobs started elsewhere.
pub(crate) fn absolutise(path: &Path) -> Result<PathBuf, std::io::Error> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file {file} has an unsupported type; supported types are: {supported}")]
    UnsupportedFileType {
        file: String,
        supported: &'static str,
    },

    #[error("Couldn't parse configuration file {file}: {err}")]
    Parse { file: String, err: String },

    #[error("Invalid options in {file}: {err}")]
    Invalid {
        file: String,
        err: serde_json::Error,
    },

    #[error("Processing stream '{stream}' isn't declared; available streams: {available}")]
    StreamNotFound { stream: String, available: String },

    #[error("Processing stream '{stream}' gives invalid options: {err}")]
    InvalidStream {
        stream: String,
        err: serde_json::Error,
    },

    #[error("Processing steps may only be declared once, but these are repeated: {steps}")]
    DuplicateSteps { steps: String },

    #[error("The '{field}' option must be set")]
    MissingDirectory { field: &'static str },

    #[error("Run configuration {file} has version {found}, but this program reads version {expected}")]
    RunConfigVersion {
        file: String,
        found: u32,
        expected: u32,
    },

    #[error("Couldn't write run configuration {file}: {err}")]
    RunConfigWrite {
        file: String,
        err: serde_json::Error,
    },

    #[error("Couldn't read run configuration {file}: {err}")]
    RunConfigRead {
        file: String,
        err: serde_json::Error,
    },

    #[error(transparent)]
    IO(#[from] std::io::Error),
}
