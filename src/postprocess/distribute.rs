// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::path::Path;

use log::{error, info, warn};

use super::{materialize_run_config, one_line, run_job, JobOptions, PostprocessError};
use crate::{
    batch::{
        program_path, BatchConfig, BatchError, BatchManager, JobCommand, JobManager, JobSpec,
        LocalManager,
    },
    bids::{FsIndex, ImageQuery, Index, IndexError},
    config::{absolutise, RunConfig},
};

/// The parent job: freeze the run configuration for a processing stream,
/// refresh the BIDS index and hand out one job per subject. With no
/// `subjects`, every subject with derivatives is processed.
pub fn postprocess_subjects(
    config_file: &Path,
    subjects: &[String],
    processing_stream: &str,
    job_options: JobOptions,
    refresh_index: bool,
    dry_run: bool,
) -> Result<(), PostprocessError> {
    let run_config = materialize_run_config(config_file, processing_stream)?;
    let index = FsIndex::open_or_build(
        &run_config.pybids_db_path,
        &run_config.target_directory,
        refresh_index,
    )?;

    let subjects: Vec<String> = if subjects.is_empty() {
        index.get_subjects()
    } else {
        subjects.iter().map(|s| strip_subject_prefix(s)).collect()
    };
    if subjects.is_empty() {
        return Err(IndexError::NoSubjects(run_config.target_directory).into());
    }
    info!(
        "Postprocessing {} subject(s) in stream '{processing_stream}'",
        subjects.len()
    );

    let mut manager = job_manager(&run_config, job_options)?;
    for subject in subjects {
        manager.add_job(JobSpec {
            command: JobCommand::PostprocessSubject {
                subject,
                run_config: run_config.path(),
                batch: job_options.batch,
                submit: job_options.submit,
                debug: job_options.debug,
            },
            log_dir: run_config.stream_log_directory.clone(),
        });
    }
    hand_out(manager.as_mut(), job_options, dry_run)
}

/// A subject job: find the subject's images and hand out one job per image.
pub fn postprocess_subject(
    subject: &str,
    run_config_file: &Path,
    job_options: JobOptions,
    dry_run: bool,
) -> Result<(), PostprocessError> {
    let subject = strip_subject_prefix(subject);
    let result = postprocess_subject_inner(&subject, run_config_file, job_options, dry_run);
    if let Err(e) = &result {
        match e {
            // Each failed image job has already reported itself.
            PostprocessError::Batch(BatchError::JobsFailed { .. }) => {
                warn!("sub-{subject}: {}", one_line(e))
            }
            _ => error!("sub-{subject}: {}", one_line(e)),
        }
    }
    result
}

fn postprocess_subject_inner(
    subject: &str,
    run_config_file: &Path,
    job_options: JobOptions,
    dry_run: bool,
) -> Result<(), PostprocessError> {
    let run_config_file = absolutise(run_config_file)?;
    let run_config = RunConfig::read(&run_config_file)?;
    let index = FsIndex::open(&run_config.pybids_db_path, &run_config.target_directory)?;
    if !index.has_subject(subject) {
        return Err(IndexError::SubjectNotFound {
            subject: subject.to_string(),
            directory: run_config.target_directory,
        }
        .into());
    }

    let options = &run_config.postprocessing;
    let query = ImageQuery {
        subject: subject.to_string(),
        space: options.target_image_space.clone(),
        tasks: options.target_tasks.clone(),
        acquisitions: options.target_acquisitions.clone(),
    };
    let images = index.get_images(&query);
    if images.is_empty() {
        return Err(IndexError::NoImages {
            subject: subject.to_string(),
            space: query.space,
        }
        .into());
    }
    info!("sub-{subject}: {} image(s) to postprocess", images.len());

    let log_dir = run_config.subject_log_directory(subject);
    for dir in [
        run_config.subject_output_directory(subject),
        run_config.subject_working_directory(subject),
        log_dir.clone(),
    ] {
        std::fs::create_dir_all(dir)?;
    }

    let mut manager = job_manager(&run_config, job_options)?;
    for image in images {
        manager.add_job(JobSpec {
            command: JobCommand::PostprocessImage {
                image,
                run_config: run_config_file.clone(),
                debug: job_options.debug,
            },
            log_dir: log_dir.clone(),
        });
    }
    hand_out(manager.as_mut(), job_options, dry_run)
}

fn job_manager(
    run_config: &RunConfig,
    job_options: JobOptions,
) -> Result<Box<dyn JobManager>, PostprocessError> {
    let program = program_path();
    let manager: Box<dyn JobManager> = if job_options.batch {
        let config = BatchConfig::load(run_config.batch_config_path.as_deref())?;
        Box::new(BatchManager::new(
            config,
            run_config.postprocessing.batch_options.clone(),
            run_config.email_address.clone(),
            program,
        ))
    } else {
        Box::new(LocalManager::new(run_job, program))
    };
    Ok(manager)
}

fn hand_out(
    manager: &mut dyn JobManager,
    job_options: JobOptions,
    dry_run: bool,
) -> Result<(), PostprocessError> {
    if job_options.submit && !dry_run {
        manager.submit_jobs()?;
    } else {
        manager.print_jobs();
    }
    Ok(())
}

fn strip_subject_prefix(subject: &str) -> String {
    subject.trim_start_matches("sub-").to_string()
}
