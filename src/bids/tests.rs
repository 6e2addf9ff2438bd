// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::path::Path;

use approx::assert_abs_diff_eq;
use tempfile::{tempdir, TempDir};

use super::*;

const SPACE: &str = "MNI152NLin2009cAsym";

fn touch(root: &Path, name: &str, contents: &str) {
    let p = root.join(name);
    std::fs::create_dir_all(p.parent().unwrap()).unwrap();
    std::fs::write(p, contents).unwrap();
}

/// An fMRIPrep tree with two subjects; sub-01 has two tasks, one of them with
/// AROMA outputs, and sub-02 has a session.
fn derivatives() -> TempDir {
    let tmp = tempdir().unwrap();
    let root = tmp.path();
    for name in [
        "sub-01/func/sub-01_task-rest_space-MNI152NLin2009cAsym_desc-preproc_bold.nii.gz",
        "sub-01/func/sub-01_task-rest_space-MNI152NLin2009cAsym_desc-brain_mask.nii.gz",
        "sub-01/func/sub-01_task-rest_space-T1w_desc-preproc_bold.nii.gz",
        "sub-01/func/sub-01_task-rest_space-T1w_desc-brain_mask.nii.gz",
        "sub-01/func/sub-01_task-rest_desc-confounds_timeseries.tsv",
        "sub-01/func/sub-01_task-rest_desc-MELODIC_mixing.tsv",
        "sub-01/func/sub-01_task-rest_AROMAnoiseICs.csv",
        "sub-01/func/sub-01_task-nback_run-1_space-MNI152NLin2009cAsym_desc-preproc_bold.nii.gz",
        "sub-01/func/sub-01_task-nback_run-1_desc-confounds_regressors.tsv",
        "sub-01/anat/sub-01_desc-preproc_T1w.nii.gz",
        "sub-02/ses-a/func/sub-02_ses-a_task-rest_acq-fast_space-MNI152NLin2009cAsym_desc-preproc_bold.nii.gz",
        "sub-02/ses-a/func/sub-02_ses-a_task-rest_acq-fast_desc-confounds_timeseries.tsv",
    ] {
        touch(root, name, "");
    }
    touch(
        root,
        "sub-01/func/sub-01_task-rest_space-MNI152NLin2009cAsym_desc-preproc_bold.json",
        r#"{"RepetitionTime": 2.0, "SkullStripped": false}"#,
    );
    touch(root, "dataset_description.json", "{}");
    touch(root, "sub-01.html", "");
    tmp
}

fn image(root: &Path, name: &str) -> std::path::PathBuf {
    let subject = &name[..6];
    let dir = match name.contains("_ses-a_") {
        true => root.join(subject).join("ses-a/func"),
        false => root.join(subject).join("func"),
    };
    dir.join(name)
}

#[test]
fn parsing_filenames() {
    let e = BidsEntities::parse(Path::new(
        "/data/sub-02/ses-a/func/sub-02_ses-a_task-rest_acq-fast_space-MNI152NLin2009cAsym_desc-preproc_bold.nii.gz",
    ))
    .unwrap();
    assert_eq!(e.subject(), "02");
    assert_eq!(e.get("ses"), Some("a"));
    assert_eq!(e.task(), Some("rest"));
    assert_eq!(e.get("acq"), Some("fast"));
    assert_eq!(e.get("space"), Some(SPACE));
    assert_eq!(e.desc(), Some("preproc"));
    assert_eq!(e.suffix, "bold");
    assert_eq!(e.extension, ".nii.gz");
    assert_eq!(e.datatype.as_deref(), Some("func"));
    assert_eq!(
        e.entities.keys().collect::<Vec<_>>(),
        ["sub", "ses", "task", "acq", "space", "desc"]
    );

    let e = BidsEntities::parse(Path::new("sub-01_task-rest_AROMAnoiseICs.csv")).unwrap();
    assert_eq!(e.suffix, "AROMAnoiseICs");
    assert_eq!(e.desc(), None);
    assert_eq!(e.datatype, None);

    assert!(BidsEntities::parse(Path::new("task-rest_bold.json")).is_none());
    assert!(BidsEntities::parse(Path::new("sub-01.html")).is_none());
    assert!(BidsEntities::parse(Path::new("sub-01_task_bold.nii.gz")).is_none());
}

#[test]
fn postproc_names() {
    assert_eq!(
        postproc_file_name("sub-01_task-rest_space-T1w_desc-preproc_bold.nii.gz"),
        "sub-01_task-rest_space-T1w_desc-postproc_bold.nii.gz"
    );
    assert_eq!(
        postproc_file_name("sub-01_task-rest_desc-confounds_timeseries.tsv"),
        "sub-01_task-rest_desc-confounds_timeseries.tsv"
    );
}

#[test]
fn subjects_and_images() {
    let tmp = derivatives();
    let index = FsIndex::build(tmp.path()).unwrap();
    assert_eq!(index.get_subjects(), ["01", "02"]);
    assert!(index.has_subject("02"));
    assert!(!index.has_subject("03"));

    let mut query = ImageQuery {
        subject: "01".to_string(),
        space: SPACE.to_string(),
        ..Default::default()
    };
    let images = index.get_images(&query);
    assert_eq!(
        images,
        [
            image(
                tmp.path(),
                "sub-01_task-nback_run-1_space-MNI152NLin2009cAsym_desc-preproc_bold.nii.gz"
            ),
            image(
                tmp.path(),
                "sub-01_task-rest_space-MNI152NLin2009cAsym_desc-preproc_bold.nii.gz"
            ),
        ]
    );

    query.tasks = vec!["rest".to_string()];
    assert_eq!(index.get_images(&query).len(), 1);
    query.space = "T1w".to_string();
    assert_eq!(index.get_images(&query).len(), 1);

    let query = ImageQuery {
        subject: "02".to_string(),
        space: SPACE.to_string(),
        tasks: vec![],
        acquisitions: vec!["slow".to_string()],
    };
    assert!(index.get_images(&query).is_empty());
}

#[test]
fn companion_files() {
    let tmp = derivatives();
    let root = tmp.path();
    let index = FsIndex::build(root).unwrap();

    let rest = image(
        root,
        "sub-01_task-rest_space-MNI152NLin2009cAsym_desc-preproc_bold.nii.gz",
    );
    assert_eq!(
        index.get_mask(&rest).unwrap(),
        Some(image(
            root,
            "sub-01_task-rest_space-MNI152NLin2009cAsym_desc-brain_mask.nii.gz"
        ))
    );
    assert_eq!(
        index.get_confounds(&rest).unwrap(),
        Some(image(root, "sub-01_task-rest_desc-confounds_timeseries.tsv"))
    );
    assert_eq!(
        index.get_mixing(&rest).unwrap(),
        Some(image(root, "sub-01_task-rest_desc-MELODIC_mixing.tsv"))
    );
    assert_eq!(
        index.get_noise(&rest).unwrap(),
        Some(image(root, "sub-01_task-rest_AROMAnoiseICs.csv"))
    );
    assert!(index.get_sidecar(&rest).unwrap().is_some());

    // The T1w-space image has its own mask.
    let t1w = image(root, "sub-01_task-rest_space-T1w_desc-preproc_bold.nii.gz");
    assert_eq!(
        index.get_mask(&t1w).unwrap(),
        Some(image(root, "sub-01_task-rest_space-T1w_desc-brain_mask.nii.gz"))
    );

    let nback = image(
        root,
        "sub-01_task-nback_run-1_space-MNI152NLin2009cAsym_desc-preproc_bold.nii.gz",
    );
    assert_eq!(index.get_mask(&nback).unwrap(), None);
    assert_eq!(index.get_mixing(&nback).unwrap(), None);
    assert_eq!(
        index.get_confounds(&nback).unwrap(),
        Some(image(root, "sub-01_task-nback_run-1_desc-confounds_regressors.tsv"))
    );

    assert!(matches!(
        index.get_mask(Path::new("/somewhere/bold.nii.gz")),
        Err(IndexError::NotBids(_))
    ));
}

#[test]
fn index_persistence() {
    let tmp = derivatives();
    let db = tempdir().unwrap();
    let db_path = db.path().join("bids_index");

    assert!(matches!(
        FsIndex::open(&db_path, tmp.path()),
        Err(IndexError::Missing(_))
    ));
    let built = FsIndex::open_or_build(&db_path, tmp.path(), false).unwrap();
    assert_eq!(FsIndex::open(&db_path, tmp.path()).unwrap(), built);

    // Opening without a refresh doesn't see new files.
    touch(
        tmp.path(),
        "sub-03/func/sub-03_task-rest_space-MNI152NLin2009cAsym_desc-preproc_bold.nii.gz",
        "",
    );
    let reopened = FsIndex::open_or_build(&db_path, tmp.path(), false).unwrap();
    assert_eq!(reopened.get_subjects(), ["01", "02"]);
    let refreshed = FsIndex::open_or_build(&db_path, tmp.path(), true).unwrap();
    assert_eq!(refreshed.get_subjects(), ["01", "02", "03"]);

    assert!(matches!(
        FsIndex::open(&db_path, db.path()),
        Err(IndexError::Stale { .. })
    ));
}

#[test]
fn repetition_time_from_derivatives_or_raw_data() {
    let tmp = derivatives();
    let root = tmp.path();
    let raw = tempdir().unwrap();
    touch(raw.path(), "task-rest_bold.json", r#"{"RepetitionTime": 0.8}"#);
    touch(
        raw.path(),
        "sub-01/func/sub-01_task-nback_run-1_bold.json",
        r#"{"RepetitionTime": 1.5}"#,
    );
    let index = FsIndex::build(root).unwrap();

    let rest = image(
        root,
        "sub-01_task-rest_space-MNI152NLin2009cAsym_desc-preproc_bold.nii.gz",
    );
    let tr = get_repetition_time(&index, &rest, raw.path()).unwrap().unwrap();
    assert_abs_diff_eq!(tr, 2.0);

    let nback = image(
        root,
        "sub-01_task-nback_run-1_space-MNI152NLin2009cAsym_desc-preproc_bold.nii.gz",
    );
    let tr = get_repetition_time(&index, &nback, raw.path()).unwrap().unwrap();
    assert_abs_diff_eq!(tr, 1.5);

    // Only the top-level sidecar applies here.
    let sub02 = image(
        root,
        "sub-02_ses-a_task-rest_acq-fast_space-MNI152NLin2009cAsym_desc-preproc_bold.nii.gz",
    );
    let tr = get_repetition_time(&index, &sub02, raw.path()).unwrap().unwrap();
    assert_abs_diff_eq!(tr, 0.8);

    let t1w = image(root, "sub-01_task-rest_space-T1w_desc-preproc_bold.nii.gz");
    let empty = tempdir().unwrap();
    assert_eq!(get_repetition_time(&index, &t1w, empty.path()).unwrap(), None);
}
