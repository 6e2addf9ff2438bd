// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};

use log::{debug, info};

use super::PostprocessError;
use crate::{
    config::{absolutise, ConfigError, ProjectOptions, RunConfig},
    constants::{BIDS_INDEX_DIRNAME, RUN_CONFIG_VERSION},
};

/// Resolve a processing stream of a project into a run configuration, without
/// writing anything.
pub fn resolve_run_config(
    options: &ProjectOptions,
    processing_stream: &str,
) -> Result<RunConfig, ConfigError> {
    let postprocessing = options.resolve_stream(processing_stream)?;

    let required = |dir: &Path, field: &'static str| -> Result<PathBuf, ConfigError> {
        if dir.as_os_str().is_empty() {
            Err(ConfigError::MissingDirectory { field })
        } else {
            Ok(absolutise(dir)?)
        }
    };
    let target_directory = required(&postprocessing.target_directory, "target_directory")?;
    let working_directory = required(&postprocessing.working_directory, "working_directory")?;
    let output_directory = required(&postprocessing.output_directory, "output_directory")?;
    let log_directory = if postprocessing.log_directory.as_os_str().is_empty() {
        working_directory.join("logs")
    } else {
        absolutise(&postprocessing.log_directory)?
    };
    let bids_directory = match &options.convert2bids.bids_directory {
        d if d.as_os_str().is_empty() => PathBuf::new(),
        d => absolutise(d)?,
    };
    let batch_config_path = options
        .batch_config_path
        .as_deref()
        .map(absolutise)
        .transpose()?;

    let stream_working_directory = working_directory.join(processing_stream);
    Ok(RunConfig {
        run_config_version: RUN_CONFIG_VERSION,
        processing_stream: processing_stream.to_string(),
        postprocessing,
        target_directory,
        bids_directory,
        batch_config_path,
        email_address: Some(options.email_address.clone()).filter(|e| !e.is_empty()),
        stream_log_directory: log_directory.join(processing_stream),
        stream_output_directory: output_directory.join(processing_stream),
        pybids_db_path: stream_working_directory.join(BIDS_INDEX_DIRNAME),
        stream_working_directory,
    })
}

/// Load a project configuration file, resolve the processing stream and write
/// the run configuration into the stream's working directory.
pub fn materialize_run_config(
    config_file: &Path,
    processing_stream: &str,
) -> Result<RunConfig, PostprocessError> {
    let options = ProjectOptions::load(config_file)?;
    let run_config = resolve_run_config(&options, processing_stream)?;
    debug!("Resolved run configuration: {run_config:#?}");

    std::fs::create_dir_all(&run_config.stream_output_directory)?;
    std::fs::create_dir_all(&run_config.stream_log_directory)?;
    let path = run_config.write()?;
    info!(
        "Processing stream '{processing_stream}': run configuration written to {}",
        path.display()
    );
    Ok(run_config)
}
