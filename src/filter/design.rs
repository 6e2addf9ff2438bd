// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Digital Butterworth design.
//!
//! Frequencies are normalised to the Nyquist frequency. The analog prototype
//! is pre-warped with a sampling frequency of 2, transformed to the requested
//! band, mapped to the z-plane with the bilinear transform, and finally split
//! into second-order sections.

use std::f64::consts::PI;

use num_complex::Complex64;

use super::{FilterError, Sos};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Band {
    LowPass(f64),
    HighPass(f64),
    BandPass(f64, f64),
}

/// Zeros, poles and gain.
struct Zpk {
    z: Vec<Complex64>,
    p: Vec<Complex64>,
    k: f64,
}

const FS: f64 = 2.0;

pub fn butterworth(order: usize, band: Band) -> Result<Sos, FilterError> {
    if order == 0 {
        return Err(FilterError::ZeroOrder);
    }
    let check = |wn: f64| {
        if wn > 0.0 && wn < 1.0 {
            Ok(wn)
        } else {
            Err(FilterError::BadNormalisedCutoff(wn))
        }
    };
    let warp = |wn: f64| 2.0 * FS * (PI * wn / FS).tan();

    let proto = prototype(order);
    let analog = match band {
        Band::LowPass(wn) => lp2lp(proto, warp(check(wn)?)),
        Band::HighPass(wn) => lp2hp(proto, warp(check(wn)?)),
        Band::BandPass(lo, hi) => {
            let (lo, hi) = (warp(check(lo)?), warp(check(hi)?));
            lp2bp(proto, (lo * hi).sqrt(), hi - lo)
        }
    };
    Ok(zpk_to_sos(bilinear(analog)))
}

/// The analog Butterworth low-pass prototype with a cutoff of 1 rad/s.
fn prototype(order: usize) -> Zpk {
    let n = order as i64;
    let p = (-n + 1..n)
        .step_by(2)
        .map(|m| -Complex64::from_polar(1.0, PI * m as f64 / (2 * n) as f64))
        .collect();
    Zpk {
        z: vec![],
        p,
        k: 1.0,
    }
}

fn lp2lp(Zpk { z, p, k }: Zpk, wo: f64) -> Zpk {
    let degree = p.len() - z.len();
    Zpk {
        z: z.into_iter().map(|z| z * wo).collect(),
        p: p.into_iter().map(|p| p * wo).collect(),
        k: k * wo.powi(degree as i32),
    }
}

fn lp2hp(Zpk { z, p, k }: Zpk, wo: f64) -> Zpk {
    let degree = p.len() - z.len();
    let num: Complex64 = z.iter().map(|&z| -z).product();
    let den: Complex64 = p.iter().map(|&p| -p).product();
    let mut z_hp: Vec<Complex64> = z.iter().map(|&z| wo / z).collect();
    z_hp.extend(std::iter::repeat(Complex64::new(0.0, 0.0)).take(degree));
    Zpk {
        z: z_hp,
        p: p.iter().map(|&p| wo / p).collect(),
        k: k * (num / den).re,
    }
}

fn lp2bp(Zpk { z, p, k }: Zpk, wo: f64, bw: f64) -> Zpk {
    let degree = p.len() - z.len();
    let split = |roots: &[Complex64]| -> Vec<Complex64> {
        let scaled: Vec<Complex64> = roots.iter().map(|&r| r * (bw / 2.0)).collect();
        let root = |r: Complex64| (r * r - wo * wo).sqrt();
        scaled
            .iter()
            .map(|&r| r + root(r))
            .chain(scaled.iter().map(|&r| r - root(r)))
            .collect()
    };
    let mut z_bp = split(&z);
    z_bp.extend(std::iter::repeat(Complex64::new(0.0, 0.0)).take(degree));
    Zpk {
        z: z_bp,
        p: split(&p),
        k: k * bw.powi(degree as i32),
    }
}

fn bilinear(Zpk { z, p, k }: Zpk) -> Zpk {
    let fs2 = Complex64::new(2.0 * FS, 0.0);
    let degree = p.len() - z.len();
    let num: Complex64 = z.iter().map(|&z| fs2 - z).product();
    let den: Complex64 = p.iter().map(|&p| fs2 - p).product();
    let mut z_z: Vec<Complex64> = z.iter().map(|&z| (fs2 + z) / (fs2 - z)).collect();
    // Zeros at infinity move to the Nyquist frequency.
    z_z.extend(std::iter::repeat(Complex64::new(-1.0, 0.0)).take(degree));
    Zpk {
        z: z_z,
        p: p.iter().map(|&p| (fs2 + p) / (fs2 - p)).collect(),
        k: k * (num / den).re,
    }
}

const IMAG_TOL: f64 = 1e-10;

/// Group roots so that complex conjugates share a section. Each group has one
/// or two roots.
fn pair_roots(roots: &[Complex64]) -> Vec<Vec<Complex64>> {
    let mut complex: Vec<Complex64> = roots.iter().copied().filter(|r| r.im > IMAG_TOL).collect();
    complex.sort_by(|a, b| a.norm().total_cmp(&b.norm()));
    let mut real: Vec<Complex64> = roots
        .iter()
        .copied()
        .filter(|r| r.im.abs() <= IMAG_TOL)
        .map(|r| Complex64::new(r.re, 0.0))
        .collect();
    real.sort_by(|a, b| a.re.total_cmp(&b.re));

    let mut groups: Vec<Vec<Complex64>> = complex.into_iter().map(|r| vec![r, r.conj()]).collect();
    // Interleave real roots from both ends so that a band-pass gets one zero at
    // each of z = -1 and z = 1 per section.
    let mut interleaved = Vec::with_capacity(real.len());
    let (mut lo, mut hi) = (0, real.len());
    while lo < hi {
        interleaved.push(real[lo]);
        lo += 1;
        if lo < hi {
            hi -= 1;
            interleaved.push(real[hi]);
        }
    }
    groups.extend(interleaved.chunks(2).map(|c| c.to_vec()));
    groups
}

/// `[1, c1, c2]` for the monic polynomial with the given one or two roots.
fn poly(roots: &[Complex64]) -> [f64; 3] {
    match roots {
        [] => [1.0, 0.0, 0.0],
        [r] => [1.0, -r.re, 0.0],
        [r1, r2] => [1.0, -(*r1 + *r2).re, (*r1 * *r2).re],
        _ => unreachable!("sections have at most two roots"),
    }
}

fn zpk_to_sos(Zpk { z, p, k }: Zpk) -> Sos {
    let pole_groups = pair_roots(&p);
    let mut zero_groups = pair_roots(&z);
    // Zeros are all real for Butterworth filters; keep them in the interleaved
    // order but regroup them so every pole pair gets two zeros.
    let flat_zeros: Vec<Complex64> = zero_groups.drain(..).flatten().collect();
    let mut zeros = flat_zeros.chunks(2);

    let mut sections: Vec<[f64; 6]> = pole_groups
        .iter()
        .map(|poles| {
            let b = zeros.next().map(poly).unwrap_or([1.0, 0.0, 0.0]);
            let a = poly(poles);
            [b[0], b[1], b[2], a[0], a[1], a[2]]
        })
        .collect();
    if let Some(first) = sections.first_mut() {
        first[0] *= k;
        first[1] *= k;
        first[2] *= k;
    }
    Sos { sections }
}
