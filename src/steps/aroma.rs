// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::path::Path;

use itertools::Itertools;
use log::debug;

use super::{
    derived_path, external::run_tool, optional_mask, out_file, regression::partial_regression,
    voxel_indices, StepError,
};
use crate::{
    config::AromaImplementation,
    io::{
        confounds::{read_matrix, read_noise_components},
        Image,
    },
    workflow::{ports, Node, PortValues},
};

/// Remove the ICA-AROMA noise components from the data using the MELODIC
/// mixing matrix. All components are fitted together and only the noise
/// components are subtracted.
#[derive(Debug, Clone)]
pub struct AromaRegression {
    pub implementation: AromaImplementation,
}

impl Node for AromaRegression {
    fn kind(&self) -> String {
        format!("aroma_regression:{}", self.implementation)
    }

    fn run(&self, inputs: &PortValues, node_dir: &Path) -> Result<PortValues, StepError> {
        let in_file = inputs.file(ports::IN_FILE)?;
        let mixing_file = inputs.file(ports::MIXING_FILE)?;
        let noise = read_noise_components(inputs.file(ports::NOISE_FILE)?)?;
        let out = derived_path(node_dir, in_file);

        if noise.is_empty() {
            debug!("AROMA classified no components as noise; copying the input");
            std::fs::copy(in_file, &out)?;
            return Ok(out_file(out));
        }

        match self.implementation {
            AromaImplementation::FslRegfilt => {
                let mut args = vec![
                    "-i".to_string(),
                    in_file.display().to_string(),
                    "-d".to_string(),
                    mixing_file.display().to_string(),
                    "-f".to_string(),
                    noise.iter().map(|c| c + 1).join(","),
                    "-o".to_string(),
                    out.display().to_string(),
                ];
                if let Some(mask) = inputs.optional_file(ports::MASK_FILE)? {
                    args.extend(["-m".to_string(), mask.display().to_string()]);
                }
                run_tool(node_dir, "fsl_regfilt", args)?;
            }

            AromaImplementation::FslRegfiltR => {
                let image = Image::read(in_file)?;
                let mixing = read_matrix(mixing_file)?;
                if mixing.nrows() != image.num_timepoints() {
                    return Err(StepError::LengthMismatch {
                        what: "mixing matrix rows",
                        expected: image.num_timepoints(),
                        got: mixing.nrows(),
                    });
                }
                if let Some(&component) = noise.iter().find(|&&c| c >= mixing.ncols()) {
                    return Err(StepError::BadNoiseComponent {
                        component: component + 1,
                        num_components: mixing.ncols(),
                    });
                }

                let mask = optional_mask(inputs, &image)?;
                let columns = voxel_indices(mask.as_deref(), image.num_voxels());
                let mut m = image.to_matrix();
                partial_regression(&mut m, mixing.view(), &noise, &columns)?;
                image
                    .with_matrix(m.view())
                    .write(&out, image.native_precision())?;
            }
        }
        Ok(out_file(out))
    }
}
