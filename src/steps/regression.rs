// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Least-squares nuisance regression.

use std::path::Path;

use log::{debug, warn};
use nalgebra::DMatrix;
use ndarray::prelude::*;
use rayon::prelude::*;

use super::{derived_path, optional_mask, out_file, voxel_indices, StepError};
use crate::{
    config::ConfoundRegressionImplementation,
    io::{ConfoundsTable, Image},
    workflow::{ports, Node, PortValues},
};

/// Singular values below this are treated as zero by the pseudoinverse.
const PINV_EPS: f64 = 1e-10;

/// Columns of the data are fitted this many at a time.
const CHUNK_SIZE: usize = 4096;

/// Fit the listed `columns` of `y` (`[T × V]`) on `[1 | x]` and subtract the
/// fitted contribution of the regressors in `remove` (indices into the
/// columns of `x`). The intercept is never removed, so the data keep their
/// means.
///
/// Only timepoints where every regressor and every listed column is finite
/// take part in the fit; other timepoints are left untouched.
pub(crate) fn partial_regression(
    y: &mut Array2<f64>,
    x: ArrayView2<f64>,
    remove: &[usize],
    columns: &[usize],
) -> Result<(), StepError> {
    let (num_timepoints, num_regressors) = x.dim();
    if y.nrows() != num_timepoints {
        return Err(StepError::LengthMismatch {
            what: "regressor rows",
            expected: y.nrows(),
            got: num_timepoints,
        });
    }
    if remove.is_empty() || columns.is_empty() {
        return Ok(());
    }

    let rows: Vec<usize> = (0..num_timepoints)
        .filter(|&t| {
            x.row(t).iter().all(|v| v.is_finite())
                && columns.iter().all(|&c| y[[t, c]].is_finite())
        })
        .collect();
    let n = rows.len();
    if n == 0 {
        return Err(StepError::Regression(
            "no timepoint has finite values for every regressor".to_string(),
        ));
    }
    if n <= num_regressors + 1 {
        warn!(
            "Fitting {} regressors (plus an intercept) to only {n} timepoints",
            num_regressors
        );
    }
    debug!(
        "Regressing {} of {num_regressors} regressors from {} columns over {n} timepoints",
        remove.len(),
        columns.len()
    );

    // The design matrix with an intercept in the first column.
    let design = Array2::from_shape_fn((n, num_regressors + 1), |(i, j)| {
        if j == 0 {
            1.0
        } else {
            x[[rows[i], j - 1]]
        }
    });
    let pinv = DMatrix::from_fn(n, num_regressors + 1, |i, j| design[[i, j]])
        .pseudo_inverse(PINV_EPS)
        .map_err(|e| StepError::Regression(e.to_string()))?;
    let pinv = Array2::from_shape_fn((num_regressors + 1, n), |(i, j)| pinv[(i, j)]);

    let removed: Vec<usize> = remove.iter().map(|&r| r + 1).collect();
    let removed_design = design.select(Axis(1), &removed);
    let removed_pinv = pinv.select(Axis(0), &removed);

    let fits: Vec<(&[usize], Array2<f64>)> = columns
        .par_chunks(CHUNK_SIZE)
        .map(|chunk| {
            let data = Array2::from_shape_fn((n, chunk.len()), |(i, c)| y[[rows[i], chunk[c]]]);
            let beta = removed_pinv.dot(&data);
            (chunk, removed_design.dot(&beta))
        })
        .collect();
    for (chunk, fitted) in fits {
        for (c, &column) in chunk.iter().enumerate() {
            for (i, &t) in rows.iter().enumerate() {
                y[[t, column]] -= fitted[[i, c]];
            }
        }
    }
    Ok(())
}

/// Regress the processed confounds out of every (in-mask) voxel.
#[derive(Debug, Clone)]
pub struct ConfoundRegression {
    pub implementation: ConfoundRegressionImplementation,
}

impl Node for ConfoundRegression {
    fn kind(&self) -> String {
        format!("confound_regression:{}", self.implementation)
    }

    fn run(&self, inputs: &PortValues, node_dir: &Path) -> Result<PortValues, StepError> {
        let in_file = inputs.file(ports::IN_FILE)?;
        let confounds = ConfoundsTable::read(inputs.file(ports::CONFOUNDS_FILE)?)?;
        let image = Image::read(in_file)?;
        if confounds.num_rows() != image.num_timepoints() {
            return Err(StepError::LengthMismatch {
                what: "confound rows",
                expected: image.num_timepoints(),
                got: confounds.num_rows(),
            });
        }
        let mask = optional_mask(inputs, &image)?;
        let columns = voxel_indices(mask.as_deref(), image.num_voxels());

        let mut m = image.to_matrix();
        let all: Vec<usize> = (0..confounds.columns.len()).collect();
        partial_regression(&mut m, confounds.data.view(), &all, &columns)?;

        let out = derived_path(node_dir, in_file);
        image
            .with_matrix(m.view())
            .write(&out, image.native_precision())?;
        Ok(out_file(out))
    }
}
