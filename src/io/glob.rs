// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Finding files by glob pattern.

use std::path::PathBuf;

use thiserror::Error;

/// Every path matching `pattern`, sorted so that results don't depend on the
/// order the filesystem lists directories in.
pub(crate) fn glob_files(pattern: &str) -> Result<Vec<PathBuf>, GlobError> {
    let mut paths = glob::glob(pattern)?.collect::<Result<Vec<_>, _>>()?;
    paths.sort();
    Ok(paths)
}

/// The one path matching `pattern`. No match, or several, is an error.
pub(crate) fn glob_one_file(pattern: &str) -> Result<PathBuf, GlobError> {
    let mut paths = glob_files(pattern)?;
    match paths.len() {
        0 => Err(GlobError::NoMatches {
            pattern: pattern.to_string(),
        }),
        1 => Ok(paths.remove(0)),
        count => Err(GlobError::Ambiguous {
            pattern: pattern.to_string(),
            count,
        }),
    }
}

#[derive(Error, Debug)]
pub enum GlobError {
    #[error("Nothing matches {pattern}")]
    NoMatches { pattern: String },

    #[error("{count} files match {pattern}, but only one was expected")]
    Ambiguous { pattern: String, count: usize },

    #[error("Couldn't read a path matching a glob: {0}")]
    Walk(#[from] glob::GlobError),

    #[error(transparent)]
    Pattern(#[from] glob::PatternError),
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn touch_all(dir: &std::path::Path, names: &[&str]) {
        for name in names {
            let p = dir.join(name);
            std::fs::create_dir_all(p.parent().unwrap()).unwrap();
            std::fs::write(p, "").unwrap();
        }
    }

    #[test]
    fn glob_recursive() {
        let tmp = tempdir().unwrap();
        touch_all(
            tmp.path(),
            &[
                "sub-01/func/sub-01_task-rest_bold.json",
                "sub-01/ses-a/func/sub-01_ses-a_task-rest_bold.json",
                "sub-02/anat/sub-02_T1w.json",
            ],
        );
        let entries =
            glob_files(&format!("{}/sub-01/**/*_bold.json", tmp.path().display())).unwrap();
        assert_eq!(
            entries,
            [
                tmp.path().join("sub-01/func/sub-01_task-rest_bold.json"),
                tmp.path().join("sub-01/ses-a/func/sub-01_ses-a_task-rest_bold.json"),
            ]
        );
    }

    #[test]
    fn single_glob() {
        let tmp = tempdir().unwrap();
        touch_all(
            tmp.path(),
            &["task-rest_bold.json", "task-nback_bold.json", "dataset_description.json"],
        );
        let dir = tmp.path().display();

        let result = glob_one_file(&format!("{dir}/task-*_bold.json"));
        assert!(matches!(result, Err(GlobError::Ambiguous { .. })));

        let result = glob_one_file(&format!("{dir}/task-rest_*.json"));
        assert!(result.is_ok(), "{:?}", result.err().unwrap());
        assert_eq!(result.unwrap(), tmp.path().join("task-rest_bold.json"));

        let glob = format!("{dir}/dataset_descriptio?.json");
        assert_eq!(
            glob_one_file(&glob).unwrap(),
            tmp.path().join("dataset_description.json")
        );

        let glob = format!("{dir}/sub-*");
        assert!(matches!(
            glob_one_file(&glob),
            Err(GlobError::NoMatches { .. })
        ));
    }
}
