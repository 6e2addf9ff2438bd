// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Integration tests.
//!
//! Some help for laying out these tests was taken from:
//! https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html

mod no_stderr;
mod postprocess;

use std::{
    path::{Path, PathBuf},
    process::Output,
    str::from_utf8,
};

use assert_cmd::{output::OutputError, Command};
use indoc::formatdoc;
use ndarray::prelude::*;
use nifti::NiftiHeader;
use tempfile::TempDir;

use fmri_postproc::io::{ConfoundsTable, Image, Precision};

const BOLD: &str = "sub-01_task-rest_space-MNI152NLin2009cAsym_desc-preproc_bold";
const NUM_TIMEPOINTS: usize = 12;

fn postproc() -> Command {
    Command::cargo_bin("postproc").unwrap()
}

fn get_cmd_output(result: Result<Output, OutputError>) -> (String, String) {
    let output = match result {
        Ok(o) => o,
        Err(o) => o.as_output().unwrap().clone(),
    };
    (
        from_utf8(&output.stdout).unwrap().to_string(),
        from_utf8(&output.stderr).unwrap().to_string(),
    )
}

/// A synthetic fMRIPrep derivatives tree with one subject and one BOLD run,
/// and a project configuration pointing at it.
struct Project {
    tmp_dir: TempDir,
    config_file: PathBuf,
}

impl Project {
    /// `steps` is the YAML list of processing steps of the default stream. A
    /// second stream, "fc", only does confound regression.
    fn new(steps: &str) -> Project {
        let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
        let root = tmp_dir.path();
        let func = root.join("fmriprep/sub-01/func");
        std::fs::create_dir_all(&func).unwrap();

        let mut header = NiftiHeader::default();
        header.pixdim = [1.0, 3.0, 3.0, 3.0, 2.0, 1.0, 1.0, 1.0];
        let data = Array4::from_shape_fn((3, 2, 2, NUM_TIMEPOINTS), |(x, y, z, t)| {
            let v = (x * 2 + y) * 2 + z;
            800.0 + 10.0 * v as f64 + 5.0 * (0.7 * t as f64 + v as f64).cos()
        });
        Image {
            data,
            header: header.clone(),
        }
        .write(func.join(format!("{BOLD}.nii.gz")), Precision::Single)
        .unwrap();
        Image {
            data: Array4::ones((3, 2, 2, 1)),
            header,
        }
        .write(
            func.join("sub-01_task-rest_space-MNI152NLin2009cAsym_desc-brain_mask.nii.gz"),
            Precision::Single,
        )
        .unwrap();
        std::fs::write(
            func.join(format!("{BOLD}.json")),
            r#"{"RepetitionTime": 2.0, "SkullStripped": false}"#,
        )
        .unwrap();

        let names = ["framewise_displacement", "csf", "white_matter", "global_signal"];
        let table = Array2::from_shape_fn((NUM_TIMEPOINTS, names.len()), |(t, c)| match c {
            0 if t == 0 => f64::NAN,
            0 => 0.1,
            _ => (0.4 * t as f64 * c as f64).sin(),
        });
        ConfoundsTable::new(names.iter().map(|n| n.to_string()).collect(), table)
            .write(func.join("sub-01_task-rest_desc-confounds_timeseries.tsv"))
            .unwrap();

        let config_file = root.join("project.yaml");
        std::fs::write(
            &config_file,
            formatdoc! {r#"
                project_title: integration
                postprocessing:
                  target_directory: {root}/fmriprep
                  working_directory: {root}/work
                  output_directory: {root}/out
                  processing_steps: {steps}
                  confound_options:
                    columns: [csf, white_matter]
                processing_streams:
                  - stream_name: fc
                    postprocessing_options:
                      processing_steps: [ConfoundRegression]
                      confound_options:
                        columns: [csf, white_matter, global_signal]
            "#, root = root.display()},
        )
        .unwrap();

        Project {
            tmp_dir,
            config_file,
        }
    }

    fn root(&self) -> &Path {
        self.tmp_dir.path()
    }

    fn config_file(&self) -> String {
        self.config_file.display().to_string()
    }

    fn image(&self) -> String {
        self.root()
            .join("fmriprep/sub-01/func")
            .join(format!("{BOLD}.nii.gz"))
            .display()
            .to_string()
    }

    fn run_config(&self, stream: &str) -> PathBuf {
        self.root().join("work").join(stream).join("run_config.json")
    }

    fn output_dir(&self, stream: &str) -> PathBuf {
        self.root().join("out").join(stream).join("sub-01/func")
    }

    fn output_image(&self, stream: &str) -> PathBuf {
        self.output_dir(stream)
            .join(format!("{}.nii.gz", BOLD.replace("preproc", "postproc")))
    }

    fn output_confounds(&self, stream: &str) -> PathBuf {
        self.output_dir(stream)
            .join("sub-01_task-rest_desc-confounds_timeseries.tsv")
    }
}
