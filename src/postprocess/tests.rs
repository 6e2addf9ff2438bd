// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};

use approx::assert_abs_diff_eq;
use indoc::formatdoc;
use ndarray::prelude::*;
use nifti::NiftiHeader;
use serial_test::serial;
use tempfile::{tempdir, TempDir};

use super::*;
use crate::{
    bids::IndexError,
    config::{ConfigError, ProjectOptions, RunConfig, StepKind},
    io::{ConfoundsTable, Image, Precision},
    workflow::{ComposeError, InputError},
};

const BOLD: &str = "sub-01_task-rest_space-MNI152NLin2009cAsym_desc-preproc_bold";
const NUM_TIMEPOINTS: usize = 10;

/// A project with one fMRIPrep subject and two processing streams.
struct Project {
    tmp: TempDir,
    config_file: PathBuf,
}

impl Project {
    fn root(&self) -> &Path {
        self.tmp.path()
    }

    fn func(&self) -> PathBuf {
        self.root().join("fmriprep/sub-01/func")
    }

    fn image(&self) -> PathBuf {
        self.func().join(format!("{BOLD}.nii.gz"))
    }

    fn run_config(&self, stream: &str) -> PathBuf {
        self.root().join("work").join(stream).join("run_config.json")
    }

    fn output(&self, stream: &str) -> PathBuf {
        self.root()
            .join("out")
            .join(stream)
            .join("sub-01/func")
            .join(format!("{}.nii.gz", BOLD.replace("preproc", "postproc")))
    }
}

fn project(steps: &str) -> Project {
    let tmp = tempdir().unwrap();
    let root = tmp.path();
    let func = root.join("fmriprep/sub-01/func");
    std::fs::create_dir_all(&func).unwrap();

    let mut header = NiftiHeader::default();
    header.pixdim = [1.0, 2.0, 2.0, 2.0, 2.0, 1.0, 1.0, 1.0];
    let data = Array4::from_shape_fn((2, 2, 2, NUM_TIMEPOINTS), |(x, y, z, t)| {
        let v = (x * 2 + y) * 2 + z;
        500.0 + 20.0 * v as f64 + ((t * (v + 1)) as f64).sin()
    });
    Image {
        data,
        header: header.clone(),
    }
    .write(func.join(format!("{BOLD}.nii.gz")), Precision::Single)
    .unwrap();
    let mask = Array4::from_shape_fn((2, 2, 2, 1), |(x, y, z, _)| {
        if x + y + z == 0 {
            0.0
        } else {
            1.0
        }
    });
    Image { data: mask, header }
        .write(
            func.join("sub-01_task-rest_space-MNI152NLin2009cAsym_desc-brain_mask.nii.gz"),
            Precision::Single,
        )
        .unwrap();
    std::fs::write(
        func.join(format!("{BOLD}.json")),
        r#"{"RepetitionTime": 2.0}"#,
    )
    .unwrap();

    let names = ["framewise_displacement", "csf", "white_matter"];
    let table = Array2::from_shape_fn((NUM_TIMEPOINTS, names.len()), |(t, c)| match c {
        0 if t == 0 => f64::NAN,
        0 => 0.05,
        _ => (t as f64 * 0.3 * c as f64).cos(),
    });
    ConfoundsTable::new(names.iter().map(|n| n.to_string()).collect(), table)
        .write(func.join("sub-01_task-rest_desc-confounds_timeseries.tsv"))
        .unwrap();

    let config_file = root.join("project.yaml");
    std::fs::write(
        &config_file,
        formatdoc! {r#"
            project_title: test
            email_address: ""
            postprocessing:
              target_directory: {root}/fmriprep
              working_directory: {root}/work
              output_directory: {root}/out
              log_directory: {root}/logs
              processing_steps: {steps}
              confound_options:
                columns: [csf, white_matter]
            processing_streams:
              - stream_name: fc
                postprocessing_options:
                  processing_steps: [ConfoundRegression]
                  confound_options:
                    motion_outliers:
                      include: false
        "#, root = root.display()},
    )
    .unwrap();

    Project { tmp, config_file }
}

fn local() -> JobOptions {
    JobOptions {
        batch: false,
        submit: true,
        debug: false,
    }
}

#[test]
fn run_config_paths_are_scoped_by_stream() {
    let p = project("[TemporalFiltering]");
    let options = ProjectOptions::load(&p.config_file).unwrap();

    let rc = resolve_run_config(&options, "fc").unwrap();
    assert_eq!(rc.processing_stream, "fc");
    assert_eq!(rc.postprocessing.processing_steps, [StepKind::ConfoundRegression]);
    assert!(!rc.postprocessing.confound_options.motion_outliers.include);
    assert_eq!(rc.stream_working_directory, p.root().join("work/fc"));
    assert_eq!(rc.stream_output_directory, p.root().join("out/fc"));
    assert_eq!(rc.stream_log_directory, p.root().join("logs/fc"));
    assert_eq!(rc.pybids_db_path, p.root().join("work/fc/bids_index"));
    assert_eq!(rc.target_directory, p.root().join("fmriprep"));
    assert_eq!(rc.email_address, None);
    assert_eq!(rc.path(), p.run_config("fc"));

    let rc = resolve_run_config(&options, "default").unwrap();
    assert_eq!(rc.postprocessing, options.postprocessing);

    assert!(matches!(
        resolve_run_config(&options, "nope"),
        Err(ConfigError::StreamNotFound { .. })
    ));

    let mut options = options;
    options.postprocessing.output_directory = PathBuf::new();
    assert!(matches!(
        resolve_run_config(&options, "default"),
        Err(ConfigError::MissingDirectory {
            field: "output_directory"
        })
    ));
    options.postprocessing.output_directory = PathBuf::from("out");
    options.postprocessing.log_directory = PathBuf::new();
    let rc = resolve_run_config(&options, "default").unwrap();
    assert!(rc.stream_output_directory.is_absolute());
    assert_eq!(
        rc.stream_log_directory,
        p.root().join("work/logs/default")
    );
}

#[test]
fn materialized_run_config_is_what_children_read() {
    let p = project("[TemporalFiltering]");
    let written = materialize_run_config(&p.config_file, "default").unwrap();
    let read = RunConfig::read(p.run_config("default")).unwrap();
    assert_eq!(read, written);
    assert!(p.root().join("out/default").is_dir());
    assert!(p.root().join("logs/default").is_dir());
}

#[test]
#[serial]
fn subjects_run_locally_end_to_end() {
    let p = project("[IntensityNormalization]");
    postprocess_subjects(&p.config_file, &[], "default", local(), false, false).unwrap();

    let output = Image::read(p.output("default")).unwrap();
    assert_eq!(output.num_timepoints(), NUM_TIMEPOINTS);
    // The median is over every in-mask voxel at every timepoint.
    let mut in_mask: Vec<f64> = output
        .data
        .indexed_iter()
        .filter(|((x, y, z, _), _)| x + y + z > 0)
        .map(|(_, v)| *v)
        .collect();
    in_mask.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let n = in_mask.len();
    let median = (in_mask[n / 2 - 1] + in_mask[n / 2]) / 2.0;
    assert_abs_diff_eq!(median, 10000.0, epsilon = 1.0);

    let func = p.output("default").parent().unwrap().to_path_buf();
    let confounds =
        ConfoundsTable::read(func.join("sub-01_task-rest_desc-confounds_timeseries.tsv"))
            .unwrap();
    assert_eq!(confounds.num_rows(), NUM_TIMEPOINTS);
    assert!(p
        .root()
        .join("out/default/sub-01")
        .join(format!("{BOLD}_processing_graph.dot"))
        .exists());
    assert!(p.root().join("work/default/bids_index/index.json").exists());
}

#[test]
#[serial]
fn printing_jobs_runs_nothing() {
    let p = project("[TemporalFiltering]");
    let options = JobOptions {
        submit: false,
        ..local()
    };
    postprocess_subjects(&p.config_file, &["sub-01".to_string()], "default", options, false, false)
        .unwrap();
    assert!(p.run_config("default").exists());
    assert!(!p.output("default").exists());
}

#[test]
#[serial]
fn subject_jobs_check_the_index() {
    let p = project("[TemporalFiltering]");
    materialize_run_config(&p.config_file, "default").unwrap();
    let rc = p.run_config("default");

    // Children never build the index.
    let result = postprocess_subject("01", &rc, local(), false);
    assert!(matches!(
        result,
        Err(PostprocessError::Index(IndexError::Missing(_)))
    ));

    postprocess_subjects(&p.config_file, &[], "default", JobOptions::default(), false, false)
        .unwrap();
    let result = postprocess_subject("sub-02", &rc, local(), false);
    assert!(matches!(
        result,
        Err(PostprocessError::Index(IndexError::SubjectNotFound { .. }))
    ));
}

#[test]
#[serial]
fn missing_aroma_inputs_fail_before_any_output() {
    let p = project("[AROMARegression]");
    postprocess_subjects(&p.config_file, &[], "default", JobOptions::default(), false, false)
        .unwrap();
    let result = postprocess_image(&p.image(), &p.run_config("default"), false);
    assert!(matches!(
        result,
        Err(PostprocessError::Compose(ComposeError::Input(
            InputError::MissingAromaInputs { .. }
        )))
    ));
    let out = p.root().join("out/default");
    assert_eq!(std::fs::read_dir(out).unwrap().count(), 0);
}

#[test]
#[serial]
fn dry_runs_compose_without_running() {
    let p = project("[TemporalFiltering]");
    postprocess_subjects(&p.config_file, &[], "default", JobOptions::default(), false, false)
        .unwrap();
    let wf = postprocess_image(&p.image(), &p.run_config("default"), true).unwrap();
    assert!(wf.contains("image_temporal_filtering"));
    assert!(!p.output("default").exists());
}

#[test]
#[serial]
fn a_missing_repetition_time_is_an_input_error() {
    let p = project("[TemporalFiltering]");
    std::fs::remove_file(p.func().join(format!("{BOLD}.json"))).unwrap();
    postprocess_subjects(&p.config_file, &[], "default", JobOptions::default(), false, false)
        .unwrap();
    let result = postprocess_image(&p.image(), &p.run_config("default"), false);
    assert!(matches!(
        result,
        Err(PostprocessError::Input(
            InputError::MissingRepetitionTime { .. }
        ))
    ));
}

#[test]
#[serial]
fn streams_write_separate_trees() {
    let p = project("[TemporalFiltering]");
    for stream in ["default", "fc"] {
        postprocess_subjects(&p.config_file, &[], stream, local(), false, false).unwrap();
        assert!(p.output(stream).exists());
        assert!(p.run_config(stream).exists());
    }
    let confounds = |stream: &str| {
        std::fs::read(p.root().join(stream_confounds(stream))).unwrap()
    };
    assert_ne!(confounds("default"), confounds("fc"));
}

fn stream_confounds(stream: &str) -> String {
    format!("out/{stream}/sub-01/func/sub-01_task-rest_desc-confounds_timeseries.tsv")
}
