// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::path::Path;

use log::debug;
use ndarray::prelude::*;

use super::{
    derived_path, external::run_tool, median, optional_mask, out_file, voxel_indices, StepError,
};
use crate::{
    config::SpatialSmoothingImplementation,
    constants::{FWHM_TO_SIGMA, SUSAN_BRIGHTNESS_FRACTION},
    io::{Image, Precision},
    workflow::{ports, Node, PortValues},
};

/// Edge-preserving smoothing with FSL's SUSAN.
#[derive(Debug, Clone)]
pub struct SpatialSmoothing {
    pub implementation: SpatialSmoothingImplementation,
    pub fwhm_mm: f64,
    pub brightness_threshold: Option<f64>,
}

impl Node for SpatialSmoothing {
    fn kind(&self) -> String {
        format!("spatial_smoothing:{}", self.implementation)
    }

    fn run(&self, inputs: &PortValues, node_dir: &Path) -> Result<PortValues, StepError> {
        let in_file = inputs.file(ports::IN_FILE)?;
        let image = Image::read(in_file)?;
        let mask = optional_mask(inputs, &image)?;

        // SUSAN uses the temporal mean as its USAN image.
        let mean = image
            .data
            .mean_axis(Axis(3))
            .ok_or_else(|| StepError::DegenerateImage {
                file: in_file.display().to_string(),
                reason: "the image has no volumes",
            })?
            .insert_axis(Axis(3));
        let mean_image = image.with_data(mean);
        let mean_file = node_dir.join("tmean.nii.gz");
        mean_image.write(&mean_file, Precision::Single)?;

        let brightness_threshold = match self.brightness_threshold {
            Some(bt) => bt,
            None => {
                let flat = mean_image.to_matrix();
                let values: Vec<f64> = voxel_indices(mask.as_deref(), mean_image.num_voxels())
                    .into_iter()
                    .map(|v| flat[[0, v]])
                    .filter(|&v| v != 0.0)
                    .collect();
                let median = median(values).ok_or_else(|| StepError::DegenerateImage {
                    file: in_file.display().to_string(),
                    reason: "there are no non-zero voxels to take the median of",
                })?;
                SUSAN_BRIGHTNESS_FRACTION * median
            }
        };
        let sigma = self.fwhm_mm / FWHM_TO_SIGMA;
        debug!("SUSAN brightness threshold {brightness_threshold}, sigma {sigma} mm");

        let out = derived_path(node_dir, in_file);
        let bt = brightness_threshold.to_string();
        run_tool(
            node_dir,
            "susan",
            [
                in_file.display().to_string(),
                bt.clone(),
                sigma.to_string(),
                // 3D smoothing, use the median when no neighbours are found,
                // one USAN image.
                "3".to_string(),
                "1".to_string(),
                "1".to_string(),
                mean_file.display().to_string(),
                bt,
                out.display().to_string(),
            ],
        )?;

        // SUSAN smooths into the background.
        if let Some(mask) = mask {
            let smoothed = Image::read(&out)?;
            let mut m = smoothed.to_matrix();
            for (v, _) in mask.iter().enumerate().filter(|(_, inside)| !**inside) {
                m.column_mut(v).fill(0.0);
            }
            smoothed
                .with_matrix(m.view())
                .write(&out, image.native_precision())?;
        }
        Ok(out_file(out))
    }
}
