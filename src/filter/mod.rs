// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Butterworth filters in second-order sections, applied with zero phase.
//!
//! - [`design`]: digital Butterworth design through an analog prototype and
//!   the bilinear transform.
//! - [`apply`]: forward-backward filtering with odd-extension padding and
//!   steady-state initial conditions.

mod apply;
mod design;
#[cfg(test)]
mod tests;

pub use apply::filtfilt_columns;
pub use design::{butterworth, Band};

use thiserror::Error;

/// A cascade of biquads. Each section is `[b0, b1, b2, a0, a1, a2]` with
/// `a0 == 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct Sos {
    pub(crate) sections: Vec<[f64; 6]>,
}

impl Sos {
    pub fn num_sections(&self) -> usize {
        self.sections.len()
    }
}

/// Design the Butterworth filter for a temporal bandpass over fMRI
/// timeseries. Cutoffs are in Hz and a cutoff that is zero or negative is
/// disabled; `None` is returned when both are disabled, i.e. the filter
/// would be the identity.
pub fn bandpass_for_tr(
    order: usize,
    tr: f64,
    high_pass: f64,
    low_pass: f64,
) -> Result<Option<Sos>, FilterError> {
    if !(tr > 0.0) {
        return Err(FilterError::BadRepetitionTime(tr));
    }
    let nyquist = 1.0 / (2.0 * tr);
    let normalise = |cutoff: f64| -> Result<f64, FilterError> {
        let wn = cutoff / nyquist;
        if wn >= 1.0 {
            Err(FilterError::CutoffAboveNyquist { cutoff, nyquist })
        } else {
            Ok(wn)
        }
    };

    let band = match (high_pass > 0.0, low_pass > 0.0) {
        (false, false) => return Ok(None),
        (true, false) => Band::HighPass(normalise(high_pass)?),
        (false, true) => Band::LowPass(normalise(low_pass)?),
        (true, true) => {
            if high_pass >= low_pass {
                return Err(FilterError::EmptyPassband {
                    high_pass,
                    low_pass,
                });
            }
            Band::BandPass(normalise(high_pass)?, normalise(low_pass)?)
        }
    };
    butterworth(order, band).map(Some)
}

#[derive(Error, Debug, PartialEq)]
pub enum FilterError {
    #[error("A Butterworth filter needs an order of at least 1")]
    ZeroOrder,

    #[error("Cutoff frequency {cutoff} Hz is at or above the Nyquist frequency ({nyquist} Hz)")]
    CutoffAboveNyquist { cutoff: f64, nyquist: f64 },

    #[error("Normalised cutoff {0} must be within (0, 1)")]
    BadNormalisedCutoff(f64),

    #[error("High-pass cutoff {high_pass} Hz must be below the low-pass cutoff {low_pass} Hz")]
    EmptyPassband { high_pass: f64, low_pass: f64 },

    #[error("The repetition time must be positive, but got {0}")]
    BadRepetitionTime(f64),
}
