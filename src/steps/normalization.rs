// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::path::Path;

use log::debug;
use ndarray::prelude::*;
use rayon::prelude::*;

use super::{derived_path, median, optional_mask, out_file, voxel_indices, StepError};
use crate::{
    config::IntensityNormalizationImplementation,
    constants::{GLOBAL_MEDIAN_TARGET, VOXEL_MEAN_TARGET},
    io::Image,
    workflow::{ports, Node, PortValues},
};

/// Scale intensities so that either the in-mask median over all time is
/// 10000, or each voxel's temporal mean is 100.
#[derive(Debug, Clone)]
pub struct IntensityNormalization {
    pub implementation: IntensityNormalizationImplementation,
}

impl Node for IntensityNormalization {
    fn kind(&self) -> String {
        format!("intensity_normalization:{}", self.implementation)
    }

    fn run(&self, inputs: &PortValues, node_dir: &Path) -> Result<PortValues, StepError> {
        let in_file = inputs.file(ports::IN_FILE)?;
        let image = Image::read(in_file)?;
        let mask = optional_mask(inputs, &image)?;
        let voxels = voxel_indices(mask.as_deref(), image.num_voxels());
        let mut m = image.to_matrix();

        match self.implementation {
            IntensityNormalizationImplementation::GlobalMedian => {
                let values: Vec<f64> = voxels
                    .iter()
                    .flat_map(|&v| m.column(v).to_vec())
                    .collect();
                let median = median(values).ok_or_else(|| StepError::DegenerateImage {
                    file: in_file.display().to_string(),
                    reason: "there are no finite voxels to take the median of",
                })?;
                if median == 0.0 {
                    return Err(StepError::DegenerateImage {
                        file: in_file.display().to_string(),
                        reason: "the median intensity is zero",
                    });
                }
                let scale = GLOBAL_MEDIAN_TARGET / median;
                debug!("Global median {median}; scaling by {scale}");
                m.mapv_inplace(|x| x * scale);
            }

            IntensityNormalizationImplementation::VoxelMean => {
                let in_mask = {
                    let mut in_mask = vec![false; image.num_voxels()];
                    voxels.iter().for_each(|&v| in_mask[v] = true);
                    in_mask
                };
                m.axis_iter_mut(Axis(1))
                    .into_par_iter()
                    .zip(in_mask.par_iter())
                    .filter(|(_, keep)| **keep)
                    .for_each(|(mut column, _)| {
                        let finite: Vec<f64> =
                            column.iter().copied().filter(|x| x.is_finite()).collect();
                        let mean = if finite.is_empty() {
                            0.0
                        } else {
                            finite.iter().sum::<f64>() / finite.len() as f64
                        };
                        if mean == 0.0 {
                            column.fill(0.0);
                        } else {
                            let scale = VOXEL_MEAN_TARGET / mean;
                            column.mapv_inplace(|x| x * scale);
                        }
                    });
            }
        }

        let out = derived_path(node_dir, in_file);
        image
            .with_matrix(m.view())
            .write(&out, image.native_precision())?;
        Ok(out_file(out))
    }
}
