// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Tests of the postprocess-* subcommands against synthetic fMRIPrep trees.

use fmri_postproc::io::{ConfoundsTable, Image};

use crate::{get_cmd_output, postproc, Project, BOLD, NUM_TIMEPOINTS};

#[test]
fn test_subjects_run_locally() {
    let project = Project::new("[ConfoundRegression]");

    #[rustfmt::skip]
    let cmd = postproc()
        .args([
            "postprocess-subjects", &project.config_file(),
            "--no-batch",
            "--submit",
            "--no-progress-bars",
        ])
        .ok();
    assert!(cmd.is_ok(), "postprocess-subjects failed: {}", cmd.err().unwrap());
    let (stdout, _) = get_cmd_output(cmd);
    assert!(stdout.contains("postprocess-subjects complete"), "{stdout}");

    let output = Image::read(project.output_image("default")).unwrap();
    assert_eq!(output.data.dim(), (3, 2, 2, NUM_TIMEPOINTS));
    assert!(output.data.iter().all(|v| v.is_finite()));
    let confounds = ConfoundsTable::read(project.output_confounds("default")).unwrap();
    assert_eq!(confounds.num_rows(), NUM_TIMEPOINTS);
    assert!(project.run_config("default").exists());
}

#[test]
fn test_jobs_are_only_printed_without_submit() {
    let project = Project::new("[ConfoundRegression]");

    let cmd = postproc()
        .args(["postprocess-subjects", &project.config_file(), "sub-01"])
        .ok();
    assert!(cmd.is_ok(), "postprocess-subjects failed: {}", cmd.err().unwrap());
    let (stdout, _) = get_cmd_output(cmd);
    assert!(stdout.contains("sbatch"), "{stdout}");
    assert!(stdout.contains("--job-name=postproc_sub-01"), "{stdout}");
    assert!(stdout.contains("postprocess-subject 01"), "{stdout}");
    assert!(!project.output_image("default").exists());

    // The printed image job can be run by hand from the run configuration.
    let run_config = project.run_config("default");
    #[rustfmt::skip]
    let cmd = postproc()
        .args([
            "postprocess-image", &project.image(),
            &run_config.display().to_string(),
        ])
        .ok();
    assert!(cmd.is_ok(), "postprocess-image failed: {}", cmd.err().unwrap());
    assert!(project.output_image("default").exists());
}

#[test]
fn test_missing_aroma_inputs_fail_without_output() {
    let project = Project::new("[AROMARegression]");

    #[rustfmt::skip]
    let cmd = postproc()
        .args([
            "postprocess-subjects", &project.config_file(),
            "--no-batch",
            "--submit",
        ])
        .ok();
    assert!(cmd.is_err());
    let (stdout, stderr) = get_cmd_output(cmd);
    assert!(
        stdout.contains(&format!("sub-01 {BOLD}.nii.gz: ")),
        "no error line for the image: {stdout}"
    );
    assert!(stderr.starts_with("Error: "), "{stderr}");
    assert!(!project.output_dir("default").exists());
}

#[test]
fn test_streams_are_separate() {
    let project = Project::new("[TemporalFiltering]");

    for stream in ["default", "fc"] {
        #[rustfmt::skip]
        let cmd = postproc()
            .args([
                "postprocess-subjects", &project.config_file(),
                "--processing-stream", stream,
                "--no-batch",
                "--submit",
            ])
            .ok();
        assert!(cmd.is_ok(), "stream {stream} failed: {}", cmd.err().unwrap());
        assert!(project.output_image(stream).exists());

        let run_config: serde_json::Value =
            serde_json::from_slice(&std::fs::read(project.run_config(stream)).unwrap()).unwrap();
        assert_eq!(run_config["processing_stream"], stream);
    }

    let default = ConfoundsTable::read(project.output_confounds("default")).unwrap();
    let fc = ConfoundsTable::read(project.output_confounds("fc")).unwrap();
    assert!(fc.column("global_signal").is_some());
    assert!(default.column("global_signal").is_none());
}

#[test]
fn test_unknown_stream() {
    let project = Project::new("[ConfoundRegression]");

    #[rustfmt::skip]
    let cmd = postproc()
        .args([
            "postprocess-subjects", &project.config_file(),
            "--processing-stream", "nope",
        ])
        .ok();
    assert!(cmd.is_err());
    let (_, stderr) = get_cmd_output(cmd);
    assert!(stderr.contains("Processing stream 'nope'"), "{stderr}");
    assert!(stderr.contains("\"Configuration\" section"), "{stderr}");
    assert!(!project.run_config("nope").exists());
}

#[test]
fn test_dry_run_image() {
    let project = Project::new("[ConfoundRegression, TemporalFiltering]");

    let cmd = postproc()
        .args(["postprocess-subjects", &project.config_file()])
        .ok();
    assert!(cmd.is_ok(), "postprocess-subjects failed: {}", cmd.err().unwrap());

    let run_config = project.run_config("default");
    #[rustfmt::skip]
    let cmd = postproc()
        .args([
            "--dry-run",
            "postprocess-image", &project.image(),
            &run_config.display().to_string(),
        ])
        .ok();
    assert!(cmd.is_ok(), "dry run failed: {}", cmd.err().unwrap());
    let (stdout, _) = get_cmd_output(cmd);
    assert!(stdout.contains("image_temporal_filtering"), "{stdout}");
    assert!(!project.output_image("default").exists());
}
