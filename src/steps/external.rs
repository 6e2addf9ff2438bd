// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Running FSL and AFNI command-line tools.

use std::{
    ffi::OsString,
    io::ErrorKind,
    path::Path,
    process::Command,
};

use itertools::Itertools;
use log::debug;

use super::StepError;

/// Run `tool` with `args` from inside `node_dir`. The command line and the
/// tool's stdout and stderr are kept in the node directory.
pub(crate) fn run_tool<I, S>(node_dir: &Path, tool: &str, args: I) -> Result<(), StepError>
where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
{
    let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
    let command_line = std::iter::once(tool.to_string())
        .chain(args.iter().map(|a| a.to_string_lossy().into_owned()))
        .join(" ");
    debug!("Running: {command_line}");

    let stem = tool.to_lowercase();
    std::fs::write(node_dir.join(format!("{stem}_command.txt")), &command_line)?;
    let output = Command::new(tool)
        .args(&args)
        .current_dir(node_dir)
        .output()
        .map_err(|e| match e.kind() {
            ErrorKind::NotFound => StepError::ToolNotFound {
                tool: tool.to_string(),
            },
            _ => StepError::IO(e),
        })?;
    std::fs::write(node_dir.join(format!("{stem}_stdout.txt")), &output.stdout)?;
    std::fs::write(node_dir.join(format!("{stem}_stderr.txt")), &output.stderr)?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(StepError::Tool {
            tool: tool.to_string(),
            status: output.status.to_string(),
            stderr: if stderr.is_empty() {
                "(no output on stderr)".to_string()
            } else {
                stderr
            },
        });
    }
    Ok(())
}
