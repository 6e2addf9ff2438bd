// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Tests to ensure there is no stderr output for successful commands.

use crate::{get_cmd_output, postproc, Project};

#[test]
fn test_postprocess_subjects_no_stderr() {
    let project = Project::new("[ConfoundRegression]");

    #[rustfmt::skip]
    let cmd = postproc()
        .args([
            "postprocess-subjects", &project.config_file(),
            "--no-batch",
            "--submit",
        ])
        .ok();
    assert!(
        cmd.is_ok(),
        "postprocess-subjects failed on simple test data: {}",
        cmd.err().unwrap()
    );
    let (_, stderr) = get_cmd_output(cmd);
    assert!(stderr.is_empty(), "stderr wasn't empty: {stderr}");
}

#[test]
fn test_help_no_stderr() {
    let cmd = postproc().arg("--help").ok();
    assert!(cmd.is_ok());
    let (stdout, stderr) = get_cmd_output(cmd);
    assert!(stdout.contains("postprocess-subjects"));
    assert!(stderr.is_empty(), "stderr wasn't empty: {stderr}");
}
