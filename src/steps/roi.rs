// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Mean timeseries of spherical ROIs.

use std::path::{Path, PathBuf};

use log::debug;
use nalgebra::{Vector3, Vector4};
use ndarray::prelude::*;

use super::{optional_mask, out_file, StepError};
use crate::{
    cli::Warn,
    io::{ConfoundsTable, Image},
    workflow::{ports, Node, PortValues},
};

/// A sphere centre in world coordinates [mm].
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Roi {
    pub(crate) label: String,
    pub(crate) centre: Vector3<f64>,
}

/// Read a TSV with `x`, `y` and `z` columns and an optional `label` column.
/// Unlabelled ROIs are called `roi_<n>`, counting from 1.
pub(crate) fn read_coordinates(path: &Path) -> Result<Vec<Roi>, StepError> {
    let bad = |reason: String| StepError::Coordinates {
        file: path.display().to_string(),
        reason,
    };
    let contents = std::fs::read_to_string(path)?;
    let mut lines = contents.lines().filter(|l| !l.trim().is_empty());
    let header: Vec<&str> = lines
        .next()
        .ok_or_else(|| bad("the file is empty".to_string()))?
        .split('\t')
        .map(str::trim)
        .collect();
    let find = |name: &str| header.iter().position(|h| h.eq_ignore_ascii_case(name));
    let (x, y, z) = match (find("x"), find("y"), find("z")) {
        (Some(x), Some(y), Some(z)) => (x, y, z),
        _ => return Err(bad("the header needs 'x', 'y' and 'z' columns".to_string())),
    };
    let label = find("label");

    lines
        .enumerate()
        .map(|(i, line)| {
            let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
            let coordinate = |c: usize| -> Result<f64, StepError> {
                fields
                    .get(c)
                    .and_then(|f| f.parse().ok())
                    .ok_or_else(|| bad(format!("row {} has no number in column {}", i + 1, c + 1)))
            };
            Ok(Roi {
                label: label
                    .and_then(|l| fields.get(l))
                    .filter(|l| !l.is_empty())
                    .map(|l| l.to_string())
                    .unwrap_or_else(|| format!("roi_{}", i + 1)),
                centre: Vector3::new(coordinate(x)?, coordinate(y)?, coordinate(z)?),
            })
        })
        .collect()
}

/// Average the voxels of spheres centred on world coordinates, giving a
/// `[T × R]` table. ROIs with too little of their volume inside the mask are
/// all NaN.
#[derive(Debug, Clone)]
pub struct SphereExtract {
    pub coordinates_file: PathBuf,
    pub sphere_radius: f64,
    pub prop_voxels: f64,
}

impl Node for SphereExtract {
    fn kind(&self) -> String {
        format!("sphere_extract:{}mm", self.sphere_radius)
    }

    fn run(&self, inputs: &PortValues, node_dir: &Path) -> Result<PortValues, StepError> {
        let in_file = inputs.file(ports::IN_FILE)?;
        let image = Image::read(in_file)?;
        let mask = optional_mask(inputs, &image)?;
        let rois = read_coordinates(&self.coordinates_file)?;

        let affine = image.affine();
        let (nx, ny, nz) = image.spatial_shape();
        let world: Vec<Vector3<f64>> = (0..nx * ny * nz)
            .map(|flat| {
                let (i, j, k) = (flat / (ny * nz), (flat / nz) % ny, flat % nz);
                let p = affine * Vector4::new(i as f64, j as f64, k as f64, 1.0);
                Vector3::new(p.x, p.y, p.z)
            })
            .collect();

        let m = image.to_matrix();
        let num_timepoints = image.num_timepoints();
        let mut timeseries = Array2::from_elem((num_timepoints, rois.len()), f64::NAN);
        for (r, roi) in rois.iter().enumerate() {
            let sphere: Vec<usize> = world
                .iter()
                .enumerate()
                .filter(|(_, w)| (*w - roi.centre).norm() <= self.sphere_radius)
                .map(|(v, _)| v)
                .collect();
            let inside: Vec<usize> = match &mask {
                Some(mask) => sphere.iter().copied().filter(|&v| mask[v]).collect(),
                None => sphere.clone(),
            };
            let proportion = if sphere.is_empty() {
                0.0
            } else {
                inside.len() as f64 / sphere.len() as f64
            };
            debug!(
                "ROI '{}': {} voxels, {} inside the mask",
                roi.label,
                sphere.len(),
                inside.len()
            );
            if inside.is_empty() || proportion < self.prop_voxels {
                format!(
                    "ROI '{}' has only {:.0}% of its voxels inside the mask; its timeseries is NaN",
                    roi.label,
                    proportion * 100.0
                )
                .warn();
                continue;
            }

            for t in 0..num_timepoints {
                let values: Vec<f64> = inside
                    .iter()
                    .map(|&v| m[[t, v]])
                    .filter(|x| x.is_finite())
                    .collect();
                if !values.is_empty() {
                    timeseries[[t, r]] = values.iter().sum::<f64>() / values.len() as f64;
                }
            }
        }

        let table = ConfoundsTable::new(rois.into_iter().map(|r| r.label).collect(), timeseries);
        let out = node_dir.join("timeseries.tsv");
        table.write(&out)?;
        Ok(out_file(out))
    }
}
