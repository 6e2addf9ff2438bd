// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};

use log::debug;
use nalgebra::Vector4;
use ndarray::prelude::*;
use rayon::prelude::*;

use super::{derived_path, out_file, StepError};
use crate::{
    io::{
        nifti::{header_affine, header_spatial_shape, read_header},
        Image,
    },
    workflow::{ports, Node, PortValues},
};

/// Trilinear resampling onto the grid of a reference image. Reference voxels
/// that fall outside the input's field of view are zero.
#[derive(Debug, Clone)]
pub struct Resample {
    pub reference_image: PathBuf,
}

/// The (up to) eight input voxels and their weights that make up one output
/// voxel.
type Stencil = Vec<(usize, f64)>;

impl Node for Resample {
    fn kind(&self) -> String {
        "resample:trilinear".to_string()
    }

    fn run(&self, inputs: &PortValues, node_dir: &Path) -> Result<PortValues, StepError> {
        let in_file = inputs.file(ports::IN_FILE)?;
        let image = Image::read(in_file)?;
        let reference = read_header(&self.reference_image)?;

        let (nx, ny, nz) = image.spatial_shape();
        let (rx, ry, rz) = header_spatial_shape(&reference);
        let to_input_voxels = image
            .affine()
            .try_inverse()
            .ok_or_else(|| StepError::SingularAffine {
                file: in_file.display().to_string(),
            })?
            * header_affine(&reference);
        debug!(
            "Resampling {:?} onto {:?} from {}",
            (nx, ny, nz),
            (rx, ry, rz),
            self.reference_image.display()
        );

        let stencils: Vec<Stencil> = (0..rx * ry * rz)
            .into_par_iter()
            .map(|flat| {
                let (i, j, k) = (flat / (ry * rz), (flat / rz) % ry, flat % rz);
                let p = to_input_voxels * Vector4::new(i as f64, j as f64, k as f64, 1.0);
                trilinear_stencil([p.x, p.y, p.z], (nx, ny, nz))
            })
            .collect();

        let input = image.to_matrix();
        let mut output = Array2::<f64>::zeros((image.num_timepoints(), stencils.len()));
        output
            .axis_iter_mut(Axis(1))
            .into_par_iter()
            .zip(stencils.par_iter())
            .for_each(|(mut column, stencil)| {
                for &(v, w) in stencil {
                    column.scaled_add(w, &input.column(v));
                }
            });

        let mut header = reference.clone();
        header.pixdim[4] = image.header.pixdim[4];
        header.xyzt_units = image.header.xyzt_units;
        header.datatype = image.header.datatype;
        let resampled = Image::from_matrix(output.view(), (rx, ry, rz), header);

        let out = derived_path(node_dir, in_file);
        resampled.write(&out, image.native_precision())?;
        Ok(out_file(out))
    }
}

/// Trilinear weights for a point in continuous voxel coordinates. Points
/// outside the grid get no voxels at all.
fn trilinear_stencil(p: [f64; 3], (nx, ny, nz): (usize, usize, usize)) -> Stencil {
    let dims = [nx, ny, nz];
    let mut lower = [0usize; 3];
    let mut frac = [0f64; 3];
    for axis in 0..3 {
        let max = (dims[axis] - 1) as f64;
        let c = p[axis];
        // Allow for rounding error at the grid's edges.
        if !(c > -1e-6 && c < max + 1e-6) {
            return vec![];
        }
        let c = c.clamp(0.0, max);
        let l = (c.floor() as usize).min(dims[axis].saturating_sub(2));
        lower[axis] = l;
        frac[axis] = if dims[axis] == 1 { 0.0 } else { c - l as f64 };
    }

    let mut stencil = Vec::with_capacity(8);
    for corner in 0..8 {
        let mut index = [0usize; 3];
        let mut weight = 1.0;
        for axis in 0..3 {
            let upper = (corner >> axis) & 1 == 1;
            index[axis] = lower[axis] + usize::from(upper);
            weight *= if upper { frac[axis] } else { 1.0 - frac[axis] };
        }
        if weight > 0.0 && index.iter().zip(dims).all(|(&i, d)| i < d) {
            stencil.push(((index[0] * ny + index[1]) * nz + index[2], weight));
        }
    }
    stencil
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn stencil_weights_sum_to_one() {
        let s = trilinear_stencil([0.25, 1.5, 0.0], (2, 3, 1));
        assert_abs_diff_eq!(s.iter().map(|(_, w)| w).sum::<f64>(), 1.0, epsilon = 1e-12);
        // (0, 1, 0) and (0, 2, 0) take most of the weight.
        let w = |v: usize| s.iter().find(|(i, _)| *i == v).map(|(_, w)| *w).unwrap();
        assert_abs_diff_eq!(w(1), 0.75 * 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(w(2), 0.75 * 0.5, epsilon = 1e-12);
    }

    #[test]
    fn points_on_a_voxel_use_only_that_voxel() {
        let s = trilinear_stencil([1.0, 2.0, 0.0], (2, 3, 1));
        assert_eq!(s, vec![(5, 1.0)]);
    }

    #[test]
    fn points_outside_the_grid_are_empty() {
        assert!(trilinear_stencil([-0.5, 0.0, 0.0], (2, 3, 1)).is_empty());
        assert!(trilinear_stencil([0.0, 2.5, 0.0], (2, 3, 1)).is_empty());
    }
}
