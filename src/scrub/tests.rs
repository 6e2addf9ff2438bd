// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use ndarray::prelude::*;

use super::*;

fn fd_table(fd: &[f64]) -> ConfoundsTable {
    ConfoundsTable::new(
        vec!["framewise_displacement".to_string()],
        Array2::from_shape_vec((fd.len(), 1), fd.to_vec()).unwrap(),
    )
}

fn rule(target: &str, threshold: f64) -> ScrubColumn {
    ScrubColumn {
        target_variable: target.to_string(),
        threshold,
        ..Default::default()
    }
}

fn bits(v: &ScrubVector) -> Vec<u8> {
    v.as_slice().iter().map(|&k| u8::from(k)).collect()
}

#[test]
fn threshold_only() {
    let table = fd_table(&[f64::NAN, 0.1, 0.5, 0.1, 0.1, -0.6, 0.1]);
    let v = get_scrub_vector(&table, &[rule("framewise_displacement", 0.3)]).unwrap();
    // NaN is kept, and the comparison is on the absolute value.
    assert_eq!(bits(&v), [1, 1, 0, 1, 1, 0, 1]);
    assert_eq!(v.scrubbed_indices(), [2, 5]);
}

#[test]
fn ahead_and_behind_are_clipped() {
    let table = fd_table(&[0.9, 0.0, 0.0, 0.0, 0.0, 0.0, 0.9]);
    let r = ScrubColumn {
        scrub_ahead: 1,
        scrub_behind: 2,
        ..rule("framewise_displacement", 0.5)
    };
    let v = get_scrub_vector(&table, &[r]).unwrap();
    assert_eq!(bits(&v), [0, 0, 1, 1, 0, 0, 0]);
}

#[test]
fn dilation_uses_only_the_original_flags() {
    let mut keep = vec![true, true, false, true, true, true];
    dilate(&mut keep, 0, 1);
    assert_eq!(keep, [true, true, false, false, true, true]);
}

#[test]
fn short_runs_are_scrubbed() {
    let table = fd_table(&[0.0, 0.9, 0.0, 0.0, 0.9, 0.0, 0.0, 0.0, 0.0]);
    let r = ScrubColumn {
        scrub_contiguous: 3,
        ..rule("framewise_displacement", 0.5)
    };
    let v = get_scrub_vector(&table, &[r]).unwrap();
    assert_eq!(bits(&v), [0, 0, 0, 0, 0, 1, 1, 1, 1]);
}

#[test]
fn contiguity_is_idempotent() {
    let mut keep = vec![true, false, true, true, false, true, true, true, false, true];
    enforce_contiguous(&mut keep, 2);
    let once = keep.clone();
    enforce_contiguous(&mut keep, 2);
    assert_eq!(keep, once);
}

#[test]
fn reducer_is_idempotent() {
    let table = ConfoundsTable::new(
        vec!["framewise_displacement".into(), "dvars".into()],
        array![
            [0.0, 1.0],
            [0.2, 1.0],
            [0.0, 9.0],
            [0.0, 1.0],
            [0.0, 1.0],
            [0.3, 1.0],
            [0.0, 1.0],
            [0.0, 1.0]
        ],
    );
    let rules = [
        ScrubColumn {
            scrub_ahead: 1,
            scrub_contiguous: 2,
            ..rule("framewise_displacement", 0.25)
        },
        rule("dvars", 5.0),
    ];
    let v = get_scrub_vector(&table, &rules).unwrap();
    assert_eq!(v.and(&get_scrub_vector(&table, &rules).unwrap()), v);
    // Feeding the kept rows back through gives a vector that keeps them all.
    let kept = table.data.select(Axis(0), &v.kept_indices());
    let kept = ConfoundsTable::new(table.columns.clone(), kept);
    let rules_no_dilation = [rule("framewise_displacement", 0.25), rule("dvars", 5.0)];
    assert!(get_scrub_vector(&kept, &rules_no_dilation)
        .unwrap()
        .keeps_all());
}

#[test]
fn rule_order_does_not_matter() {
    let table = ConfoundsTable::new(
        vec!["a".into(), "b".into()],
        array![[0.0, 0.0], [1.0, 0.0], [0.0, 0.0], [0.0, 1.0], [0.0, 0.0]],
    );
    let r1 = ScrubColumn {
        scrub_behind: 1,
        ..rule("a", 0.5)
    };
    let r2 = ScrubColumn {
        scrub_ahead: 1,
        ..rule("b", 0.5)
    };
    let forward = get_scrub_vector(&table, &[r1.clone(), r2.clone()]).unwrap();
    let backward = get_scrub_vector(&table, &[r2, r1]).unwrap();
    assert_eq!(forward, backward);
    assert_eq!(bits(&forward), [0, 0, 1, 0, 0]);
}

#[test]
fn wildcard_rules_cover_every_matched_column() {
    let table = ConfoundsTable::new(
        vec![
            "trans_x".into(),
            "trans_y".into(),
            "rot_x".into(),
            "framewise_displacement".into(),
        ],
        array![
            [0.0, 0.0, 9.0, 0.0],
            [0.0, 2.0, 0.0, 0.0],
            [0.0, 0.0, 0.0, 0.0],
            [2.0, 0.0, 0.0, 0.0]
        ],
    );
    let v = get_scrub_vector(&table, &[rule("trans_*", 1.0)]).unwrap();
    assert_eq!(bits(&v), [1, 0, 1, 0]);
}

#[test]
fn unmatched_rules_keep_everything() {
    let table = fd_table(&[0.0, 0.9, 0.0]);
    let v = get_scrub_vector(&table, &[rule("global_signal", 0.5)]).unwrap();
    assert!(v.keeps_all());
}

#[test]
fn scrubbing_everything_is_an_error() {
    let table = fd_table(&[1.0, 0.9, 2.0]);
    let result = get_scrub_vector(&table, &[rule("framewise_displacement", 0.5)]);
    assert!(matches!(
        result,
        Err(ScrubError::AllScrubbed { num_timepoints: 3 })
    ));
}

#[test]
fn expansion_is_prefix_based() {
    let columns: Vec<String> = [
        "csf",
        "csf_derivative1",
        "white_matter",
        "a_comp_cor_00",
        "a_comp_cor_01",
        "csf_wm",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    assert_eq!(
        expand_column_pattern(&columns, "csf*"),
        ["csf", "csf_derivative1", "csf_wm"]
    );
    assert_eq!(expand_column_pattern(&columns, "csf"), ["csf"]);
    assert_eq!(expand_column_pattern(&columns, "*").len(), columns.len());
    assert!(expand_column_pattern(&columns, "cosine*").is_empty());
}

#[test]
fn trimming_and_censor_files() {
    let v = ScrubVector::new(vec![true, false, true, true, false]);
    assert_eq!(bits(&v.trimmed(1, 1)), [0, 1, 1]);
    assert_eq!(v.trimmed(0, 0), v);
    assert!(v.trimmed(3, 2).is_empty());

    let tmp = tempfile::tempdir().unwrap();
    let censor = tmp.path().join("censor.1D");
    v.write_censor_file(&censor).unwrap();
    assert_eq!(std::fs::read_to_string(&censor).unwrap(), "1\n0\n1\n1\n0\n");
}

#[test]
fn flagging_everything_is_only_an_error_for_scrub_vectors() {
    let table = fd_table(&[1.0, 2.0, 3.0]);
    let rules = [rule("framewise_displacement", 0.5)];
    assert_eq!(bits(&flag_timepoints(&table, &rules)), [0, 0, 0]);
    assert!(get_scrub_vector(&table, &rules).is_err());
}
