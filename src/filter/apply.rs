// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Zero-phase application of second-order sections.

use ndarray::{prelude::*, Zip};

use super::Sos;

impl Sos {
    /// Steady-state initial conditions for a unit step, one `[z0, z1]` pair
    /// per section.
    pub(super) fn initial_conditions(&self) -> Vec<[f64; 2]> {
        let mut scale = 1.0;
        self.sections
            .iter()
            .map(|&[b0, b1, b2, _, a1, a2]| {
                let big_b0 = b1 - a1 * b0;
                let big_b1 = b2 - a2 * b0;
                let det = 1.0 + a1 + a2;
                let z0 = (big_b0 + big_b1) / det;
                let z1 = ((1.0 + a1) * big_b1 - a2 * big_b0) / det;
                let zi = [scale * z0, scale * z1];
                scale *= (b0 + b1 + b2) / (1.0 + a1 + a2);
                zi
            })
            .collect()
    }

    /// Run the cascade once over `x` in place (transposed direct form II),
    /// starting every section from `zi * x0`.
    pub(super) fn filter_in_place(&self, x: &mut [f64], zi: &[[f64; 2]], x0: f64) {
        for (&[b0, b1, b2, _, a1, a2], zi) in self.sections.iter().zip(zi) {
            let mut z0 = zi[0] * x0;
            let mut z1 = zi[1] * x0;
            for v in x.iter_mut() {
                let input = *v;
                let y = b0 * input + z0;
                z0 = b1 * input - a1 * y + z1;
                z1 = b2 * input - a2 * y;
                *v = y;
            }
        }
    }

    /// The number of samples used to pad each end before filtering.
    fn pad_len(&self) -> usize {
        let trailing_b = self.sections.iter().filter(|s| s[2] == 0.0).count();
        let trailing_a = self.sections.iter().filter(|s| s[5] == 0.0).count();
        let ntaps = 2 * self.sections.len() + 1 - trailing_b.min(trailing_a);
        3 * ntaps
    }

    /// Forward-backward filter a signal. The signal is extended at both ends by
    /// odd reflection so that the filter's start-up transients fall outside
    /// the returned samples.
    pub fn filtfilt(&self, x: &[f64]) -> Vec<f64> {
        let n = x.len();
        if n < 2 {
            return x.to_vec();
        }
        let pad = self.pad_len().min(n - 1);
        let (first, last) = (x[0], x[n - 1]);

        let mut ext = Vec::with_capacity(n + 2 * pad);
        ext.extend((1..=pad).rev().map(|i| 2.0 * first - x[i]));
        ext.extend_from_slice(x);
        ext.extend((1..=pad).map(|i| 2.0 * last - x[n - 1 - i]));

        let zi = self.initial_conditions();
        let x0 = ext[0];
        self.filter_in_place(&mut ext, &zi, x0);
        ext.reverse();
        let y0 = ext[0];
        self.filter_in_place(&mut ext, &zi, y0);
        ext.reverse();

        ext[pad..pad + n].to_vec()
    }
}

/// Fill the non-finite samples of `x` by linear interpolation between their
/// finite neighbours. Gaps at either end take the nearest finite value.
/// Returns the indices that were filled, or `None` if nothing is finite.
fn fill_gaps(x: &mut [f64]) -> Option<Vec<usize>> {
    let gaps: Vec<usize> = (0..x.len()).filter(|&i| !x[i].is_finite()).collect();
    if gaps.len() == x.len() {
        return None;
    }
    let mut previous: Option<usize> = None;
    let mut i = 0;
    while i < x.len() {
        if x[i].is_finite() {
            previous = Some(i);
            i += 1;
            continue;
        }
        let start = i;
        while i < x.len() && !x[i].is_finite() {
            i += 1;
        }
        let next = (i < x.len()).then_some(i);
        match (previous, next) {
            (Some(p), Some(n)) => {
                let (a, b) = (x[p], x[n]);
                for j in start..n {
                    let w = (j - p) as f64 / (n - p) as f64;
                    x[j] = a + w * (b - a);
                }
            }
            (Some(p), None) => {
                let a = x[p];
                x[start..].iter_mut().for_each(|v| *v = a);
            }
            (None, Some(n)) => {
                let b = x[n];
                x[start..n].iter_mut().for_each(|v| *v = b);
            }
            (None, None) => unreachable!("at least one sample is finite"),
        }
    }
    Some(gaps)
}

/// Zero-phase filter every column of a `[T × V]` matrix in parallel.
///
/// Non-finite samples (e.g. scrubbed volumes) are bridged before filtering
/// and put back afterwards, so they stay NaN without leaking into their
/// neighbours. Columns with no finite samples are left alone.
pub fn filtfilt_columns(sos: &Sos, mut data: ArrayViewMut2<f64>) {
    Zip::from(data.columns_mut()).par_for_each(|mut column| {
        let mut x = column.to_vec();
        let gaps = match fill_gaps(&mut x) {
            Some(gaps) => gaps,
            None => return,
        };
        let filtered = sos.filtfilt(&x);
        column
            .iter_mut()
            .zip(filtered)
            .for_each(|(dst, src)| *dst = src);
        for i in gaps {
            column[i] = f64::NAN;
        }
    });
}
