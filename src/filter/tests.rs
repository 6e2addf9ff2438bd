// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::f64::consts::PI;

use approx::assert_abs_diff_eq;
use ndarray::prelude::*;

use super::*;

fn rms(x: &[f64]) -> f64 {
    (x.iter().map(|v| v * v).sum::<f64>() / x.len() as f64).sqrt()
}

fn sine(n: usize, tr: f64, freq: f64) -> Vec<f64> {
    (0..n)
        .map(|i| (2.0 * PI * freq * i as f64 * tr).sin())
        .collect()
}

#[test]
fn second_order_low_pass_coefficients() {
    // Known values for a 2nd order low-pass at half the Nyquist frequency.
    let sos = butterworth(2, Band::LowPass(0.5)).unwrap();
    assert_eq!(sos.num_sections(), 1);
    let [b0, b1, b2, a0, a1, a2] = sos.sections[0];
    assert_abs_diff_eq!(b0, 0.292_893_218_813_452_4, epsilon = 1e-12);
    assert_abs_diff_eq!(b1, 0.585_786_437_626_904_9, epsilon = 1e-12);
    assert_abs_diff_eq!(b2, 0.292_893_218_813_452_4, epsilon = 1e-12);
    assert_abs_diff_eq!(a0, 1.0);
    assert_abs_diff_eq!(a1, 0.0, epsilon = 1e-12);
    assert_abs_diff_eq!(a2, 0.171_572_875_253_809_9, epsilon = 1e-12);
}

#[test]
fn section_counts() {
    assert_eq!(butterworth(3, Band::LowPass(0.2)).unwrap().num_sections(), 2);
    assert_eq!(butterworth(2, Band::HighPass(0.2)).unwrap().num_sections(), 1);
    assert_eq!(
        butterworth(2, Band::BandPass(0.1, 0.4))
            .unwrap()
            .num_sections(),
        2
    );
}

#[test]
fn low_pass_keeps_a_constant() {
    let sos = butterworth(2, Band::LowPass(0.3)).unwrap();
    let x = vec![5.0; 50];
    for v in sos.filtfilt(&x) {
        assert_abs_diff_eq!(v, 5.0, epsilon = 1e-9);
    }
}

#[test]
fn high_pass_removes_a_constant() {
    let sos = butterworth(2, Band::HighPass(0.1)).unwrap();
    let x = vec![100.0; 60];
    for v in sos.filtfilt(&x) {
        assert_abs_diff_eq!(v, 0.0, epsilon = 1e-8);
    }
}

#[test]
fn initial_conditions_are_steady_state() {
    let sos = butterworth(4, Band::LowPass(0.25)).unwrap();
    let zi = sos.initial_conditions();
    let mut x = vec![1.0; 20];
    sos.filter_in_place(&mut x, &zi, 1.0);
    for v in x {
        assert_abs_diff_eq!(v, 1.0, epsilon = 1e-9);
    }
}

#[test]
fn bandpass_separates_frequencies() {
    let tr = 2.0;
    let n = 200;
    // Nyquist is 0.25 Hz.
    let sos = bandpass_for_tr(2, tr, 0.01, 0.08).unwrap().unwrap();
    let pass = sine(n, tr, 0.04);
    let stop = sine(n, tr, 0.2);

    let passed = sos.filtfilt(&pass);
    let stopped = sos.filtfilt(&stop);
    // Ignore the edges.
    let mid = 40..n - 40;
    assert!(rms(&passed[mid.clone()]) > 0.8 * rms(&pass[mid.clone()]));
    assert!(rms(&stopped[mid.clone()]) < 0.1 * rms(&stop[mid]));
}

#[test]
fn filtfilt_has_zero_phase() {
    let tr = 1.0;
    let n = 256;
    let sos = bandpass_for_tr(2, tr, -1.0, 0.2).unwrap().unwrap();
    let x = sine(n, tr, 0.05);
    let y = sos.filtfilt(&x);
    // The peak of the filtered sine lines up with the original peak.
    let peak = |s: &[f64]| {
        s[100..120]
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap()
    };
    assert_eq!(peak(&x), peak(&y));
}

#[test]
fn disabled_cutoffs_give_no_filter() {
    assert_eq!(bandpass_for_tr(2, 2.0, -1.0, -1.0).unwrap(), None);
    assert_eq!(bandpass_for_tr(2, 2.0, 0.0, 0.0).unwrap(), None);
}

#[test]
fn bad_cutoffs_are_rejected() {
    assert!(matches!(
        bandpass_for_tr(2, 2.0, -1.0, 0.25),
        Err(FilterError::CutoffAboveNyquist { .. })
    ));
    assert!(matches!(
        bandpass_for_tr(2, 2.0, 0.1, 0.05),
        Err(FilterError::EmptyPassband { .. })
    ));
    assert_eq!(
        bandpass_for_tr(0, 2.0, 0.01, -1.0),
        Err(FilterError::ZeroOrder)
    );
    assert!(matches!(
        bandpass_for_tr(2, 0.0, 0.01, -1.0),
        Err(FilterError::BadRepetitionTime(_))
    ));
}

#[test]
fn short_signals_are_handled() {
    let sos = butterworth(2, Band::HighPass(0.2)).unwrap();
    assert_eq!(sos.filtfilt(&[3.0]), vec![3.0]);
    assert_eq!(sos.filtfilt(&[1.0, 2.0, 3.0]).len(), 3);
}

#[test]
fn columns_are_filtered_independently() {
    let sos = butterworth(2, Band::HighPass(0.1)).unwrap();
    let mut data = Array2::from_shape_fn((40, 3), |(t, v)| v as f64 * 10.0 + (t as f64 * 0.9).sin());
    let expected = sos.filtfilt(&data.column(1).to_vec());
    filtfilt_columns(&sos, data.view_mut());
    for (a, b) in data.column(1).iter().zip(expected) {
        assert_abs_diff_eq!(*a, b, epsilon = 1e-12);
    }
}

#[test]
fn missing_samples_stay_missing() {
    let sos = butterworth(2, Band::HighPass(0.1)).unwrap();
    let clean: Vec<f64> = (0..40).map(|t| 5.0 + (t as f64 * 0.9).sin()).collect();
    let mut data = Array2::from_shape_fn((40, 3), |(t, v)| match v {
        0 => clean[t],
        1 if t == 0 || t == 12 || t == 13 || t == 39 => f64::NAN,
        1 => clean[t],
        _ => f64::NAN,
    });
    filtfilt_columns(&sos, data.view_mut());

    let expected = sos.filtfilt(&clean);
    for (a, b) in data.column(0).iter().zip(&expected) {
        assert_abs_diff_eq!(*a, b, epsilon = 1e-12);
    }
    for (t, v) in data.column(1).iter().enumerate() {
        assert_eq!(v.is_nan(), [0, 12, 13, 39].contains(&t), "t = {t}");
    }
    // The gaps don't spread; the filtered values stay close to the clean run.
    for t in [5, 20, 30] {
        assert_abs_diff_eq!(data[[t, 1]], expected[t], epsilon = 1.0);
    }
    assert!(data.column(2).iter().all(|v| v.is_nan()));
}
