// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Temporal bandpass filtering.

use std::path::Path;

use log::debug;
use ndarray::prelude::*;

use super::{
    derived_path, external::run_tool, optional_mask, out_file, voxel_indices, StepError,
};
use crate::{
    config::TemporalFilterImplementation,
    constants::AFNI_NO_LOW_PASS_HZ,
    filter::{bandpass_for_tr, filtfilt_columns},
    io::Image,
    workflow::{ports, Node, PortValues},
};

/// Bandpass every voxel's timeseries. Cutoffs are in Hz; a cutoff that is
/// zero or negative is disabled.
///
/// The 3dTproject variant also accepts a scrub vector, so that censoring and
/// filtering are solved together. Censored volumes are removed, unless
/// `insert_na` is set, in which case they are kept as NaN volumes.
#[derive(Debug, Clone)]
pub struct TemporalFilter {
    pub implementation: TemporalFilterImplementation,
    pub high_pass: f64,
    pub low_pass: f64,
    pub order: usize,
    pub insert_na: bool,
}

impl Node for TemporalFilter {
    fn kind(&self) -> String {
        format!("temporal_filter:{}", self.implementation)
    }

    fn run(&self, inputs: &PortValues, node_dir: &Path) -> Result<PortValues, StepError> {
        let in_file = inputs.file(ports::IN_FILE)?;
        let tr = inputs.float(ports::TR)?;
        let out = derived_path(node_dir, in_file);
        match self.implementation {
            TemporalFilterImplementation::Butterworth => self.butterworth(inputs, in_file, tr, &out)?,
            TemporalFilterImplementation::Fslmaths => {
                self.fslmaths(inputs, in_file, tr, node_dir, &out)?
            }
            TemporalFilterImplementation::AfniTproject => {
                self.tproject(inputs, in_file, tr, node_dir, &out)?
            }
        }
        Ok(out_file(out))
    }
}

impl TemporalFilter {
    fn butterworth(
        &self,
        inputs: &PortValues,
        in_file: &Path,
        tr: f64,
        out: &Path,
    ) -> Result<(), StepError> {
        let sos = match bandpass_for_tr(self.order, tr, self.high_pass, self.low_pass)? {
            Some(sos) => sos,
            None => {
                debug!("Both cutoffs are disabled; copying {}", in_file.display());
                std::fs::copy(in_file, out)?;
                return Ok(());
            }
        };

        let image = Image::read(in_file)?;
        let mask = optional_mask(inputs, &image)?;
        let mut m = image.to_matrix();
        match mask {
            None => filtfilt_columns(&sos, m.view_mut()),
            Some(mask) => {
                let voxels = voxel_indices(Some(&mask), image.num_voxels());
                let mut selected = m.select(Axis(1), &voxels);
                filtfilt_columns(&sos, selected.view_mut());
                for (column, &v) in selected.columns().into_iter().zip(&voxels) {
                    m.column_mut(v).assign(&column);
                }
            }
        }
        image
            .with_matrix(m.view())
            .write(out, image.native_precision())?;
        Ok(())
    }

    fn fslmaths(
        &self,
        inputs: &PortValues,
        in_file: &Path,
        tr: f64,
        node_dir: &Path,
        out: &Path,
    ) -> Result<(), StepError> {
        // fslmaths wants the half-widths of its Gaussian-weighted filters in
        // volumes.
        let sigma = |cutoff: f64| {
            if cutoff > 0.0 {
                1.0 / (2.0 * tr * cutoff)
            } else {
                -1.0
            }
        };
        let mean = node_dir.join("tmean.nii.gz");
        run_tool(
            node_dir,
            "fslmaths",
            [in_file.as_os_str(), "-Tmean".as_ref(), mean.as_os_str()],
        )?;

        let mut args: Vec<String> = vec![
            in_file.display().to_string(),
            "-bptf".to_string(),
            sigma(self.high_pass).to_string(),
            sigma(self.low_pass).to_string(),
            "-add".to_string(),
            mean.display().to_string(),
        ];
        if let Some(mask) = inputs.optional_file(ports::MASK_FILE)? {
            args.extend(["-mas".to_string(), mask.display().to_string()]);
        }
        args.push(out.display().to_string());
        run_tool(node_dir, "fslmaths", args)
    }

    fn tproject(
        &self,
        inputs: &PortValues,
        in_file: &Path,
        tr: f64,
        node_dir: &Path,
        out: &Path,
    ) -> Result<(), StepError> {
        let high_pass = self.high_pass.max(0.0);
        let low_pass = if self.low_pass > 0.0 {
            self.low_pass
        } else {
            AFNI_NO_LOW_PASS_HZ
        };
        let mut args: Vec<String> = vec![
            "-input".to_string(),
            in_file.display().to_string(),
            "-prefix".to_string(),
            out.display().to_string(),
            "-passband".to_string(),
            high_pass.to_string(),
            low_pass.to_string(),
            "-TR".to_string(),
            tr.to_string(),
        ];
        if let Some(mask) = inputs.optional_file(ports::MASK_FILE)? {
            args.extend(["-mask".to_string(), mask.display().to_string()]);
        }

        let scrub_vector = inputs.optional_scrub_vector(ports::SCRUB_VECTOR)?;
        if let Some(v) = scrub_vector {
            let censor = node_dir.join("censor.1D");
            v.write_censor_file(&censor)?;
            let cenmode = if self.insert_na { "ZERO" } else { "KILL" };
            args.extend([
                "-censor".to_string(),
                censor.display().to_string(),
                "-cenmode".to_string(),
                cenmode.to_string(),
            ]);
        }
        run_tool(node_dir, "3dTproject", args)?;

        // AFNI zeroes censored volumes; mark them as missing.
        if let (Some(v), true) = (scrub_vector, self.insert_na) {
            if !v.keeps_all() {
                let mut image = Image::read(out)?;
                if image.num_timepoints() != v.len() {
                    return Err(StepError::LengthMismatch {
                        what: "timepoints from 3dTproject",
                        expected: v.len(),
                        got: image.num_timepoints(),
                    });
                }
                for t in v.scrubbed_indices() {
                    image.data.index_axis_mut(Axis(3), t).fill(f64::NAN);
                }
                image.write(out, image.native_precision())?;
            }
        }
        Ok(())
    }
}
