// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Reading and writing NIfTI-1 images.
//!
//! All images are held in memory as 4D double-precision arrays with axes
//! `[x, y, z, t]`; 3D images get a singleton time axis. Most processing
//! happens on a `[T × V]` matrix view of the image (one row per timepoint, one
//! column per voxel), which is what [`Image::to_matrix`] and
//! [`Image::with_matrix`] convert between.

use std::path::Path;

use nalgebra::Matrix4;
use ndarray::prelude::*;
use nifti::{writer::WriterOptions, IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};
use thiserror::Error;

/// NIfTI-1 datatype code for 64-bit floats.
const DT_FLOAT64: i16 = 64;

/// The precision that image voxels are written with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    Single,
    Double,
}

#[derive(Debug, Clone)]
pub struct Image {
    /// Voxel values, `[x, y, z, t]`.
    pub data: Array4<f64>,

    /// The header this image was read with. Dimensions and data type are
    /// rewritten when the image is saved; everything else (affines, units,
    /// TR) is preserved.
    pub header: NiftiHeader,
}

impl Image {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Image, NiftiIoError> {
        let path = path.as_ref();
        let file = path.display().to_string();
        let obj = ReaderOptions::new()
            .read_file(path)
            .map_err(|err| NiftiIoError::Read {
                file: file.clone(),
                err,
            })?;
        let header = obj.header().clone();
        let data = obj
            .into_volume()
            .into_ndarray::<f64>()
            .map_err(|err| NiftiIoError::Read {
                file: file.clone(),
                err,
            })?;
        let data = match data.ndim() {
            3 => data.insert_axis(Axis(3)).into_dimensionality::<Ix4>()?,
            4 => data.into_dimensionality::<Ix4>()?,
            ndim => return Err(NiftiIoError::BadDimensionality { file, ndim }),
        };

        Ok(Image { data, header })
    }

    /// Write the image. The file is gzipped if the path ends in ".gz".
    pub fn write<P: AsRef<Path>>(&self, path: P, precision: Precision) -> Result<(), NiftiIoError> {
        let path = path.as_ref();
        // Voxels are stored unscaled.
        let mut header = self.header.clone();
        header.scl_slope = 1.0;
        header.scl_inter = 0.0;
        let writer = WriterOptions::new(path).reference_header(&header);
        let result = match precision {
            Precision::Single => writer.write_nifti(&self.data.mapv(|v| v as f32)),
            Precision::Double => writer.write_nifti(&self.data),
        };
        result.map_err(|err| NiftiIoError::Write {
            file: path.display().to_string(),
            err,
        })
    }

    /// Wrap a `[T × C]` timeseries matrix into a `[1, 1, C, T]` image with an
    /// identity affine. This is how confounds tables travel through the same
    /// processing steps as images.
    pub fn from_timeseries(timeseries: ArrayView2<f64>, tr: f64) -> Image {
        let (num_timepoints, num_columns) = timeseries.dim();
        let data = Array4::from_shape_fn((1, 1, num_columns, num_timepoints), |(_, _, c, t)| {
            timeseries[[t, c]]
        });

        let mut header = NiftiHeader::default();
        header.pixdim = [1.0, 1.0, 1.0, 1.0, tr as f32, 1.0, 1.0, 1.0];
        header.sform_code = 1;
        header.srow_x = [1.0, 0.0, 0.0, 0.0];
        header.srow_y = [0.0, 1.0, 0.0, 0.0];
        header.srow_z = [0.0, 0.0, 1.0, 0.0];
        // mm and seconds.
        header.xyzt_units = 2 | 8;
        header.datatype = DT_FLOAT64;

        Image { data, header }
    }

    /// The inverse of [`Image::from_timeseries`].
    pub fn to_timeseries(&self) -> Result<Array2<f64>, NiftiIoError> {
        let (nx, ny, nc, nt) = self.data.dim();
        if nx != 1 || ny != 1 {
            return Err(NiftiIoError::NotATimeseries {
                shape: self.data.shape().to_vec(),
            });
        }
        Ok(Array2::from_shape_fn((nt, nc), |(t, c)| self.data[[0, 0, c, t]]))
    }

    /// The precision the image was stored with; anything that isn't double
    /// precision is written back as single precision.
    pub fn native_precision(&self) -> Precision {
        if self.header.datatype == DT_FLOAT64 {
            Precision::Double
        } else {
            Precision::Single
        }
    }

    /// Make a new image with the same header as this one.
    pub fn with_data(&self, data: Array4<f64>) -> Image {
        Image {
            data,
            header: self.header.clone(),
        }
    }

    pub fn num_timepoints(&self) -> usize {
        self.data.len_of(Axis(3))
    }

    pub fn num_voxels(&self) -> usize {
        let (nx, ny, nz, _) = self.data.dim();
        nx * ny * nz
    }

    pub fn spatial_shape(&self) -> (usize, usize, usize) {
        let (nx, ny, nz, _) = self.data.dim();
        (nx, ny, nz)
    }

    /// The repetition time recorded in the header [seconds].
    pub fn tr(&self) -> f64 {
        f64::from(self.header.pixdim[4])
    }

    /// Flatten into `[T × V]`. Voxels are enumerated in logical row-major
    /// order of `(x, y, z)`, which is also the order of
    /// [`Image::flat_mask`].
    pub fn to_matrix(&self) -> Array2<f64> {
        let nt = self.num_timepoints();
        let nv = self.num_voxels();
        let mut m = Array2::zeros((nt, nv));
        for (t, volume) in self.data.axis_iter(Axis(3)).enumerate() {
            for (v, &val) in volume.iter().enumerate() {
                m[[t, v]] = val;
            }
        }
        m
    }

    /// Un-flatten a `[T' × V]` matrix into a new image with this image's
    /// spatial shape and header. `T'` may differ from this image's number of
    /// timepoints.
    pub fn with_matrix(&self, m: ArrayView2<f64>) -> Image {
        Image::from_matrix(m, self.spatial_shape(), self.header.clone())
    }

    /// Un-flatten a `[T × V]` matrix into an image of the given spatial
    /// shape.
    pub fn from_matrix(
        m: ArrayView2<f64>,
        (nx, ny, nz): (usize, usize, usize),
        header: NiftiHeader,
    ) -> Image {
        let nt = m.nrows();
        let data = Array4::from_shape_fn((nx, ny, nz, nt), |(x, y, z, t)| {
            m[[t, (x * ny + y) * nz + z]]
        });
        Image { data, header }
    }

    pub fn affine(&self) -> Matrix4<f64> {
        header_affine(&self.header)
    }

    /// A flattened boolean mask from the first volume of this image; any
    /// finite, non-zero voxel is "in".
    pub fn flat_mask(&self) -> Vec<bool> {
        self.data
            .index_axis(Axis(3), 0)
            .iter()
            .map(|&v| v.is_finite() && v != 0.0)
            .collect()
    }
}

/// Read a mask image and check that it fits an image of the given spatial
/// shape.
pub fn read_mask<P: AsRef<Path>>(
    path: P,
    expected: (usize, usize, usize),
) -> Result<Vec<bool>, NiftiIoError> {
    let path = path.as_ref();
    let mask = Image::read(path)?;
    if mask.spatial_shape() != expected {
        return Err(NiftiIoError::MaskShapeMismatch {
            file: path.display().to_string(),
            mask: mask.spatial_shape(),
            image: expected,
        });
    }
    Ok(mask.flat_mask())
}

pub fn read_header<P: AsRef<Path>>(path: P) -> Result<NiftiHeader, NiftiIoError> {
    let path = path.as_ref();
    NiftiHeader::from_file(path).map_err(|err| NiftiIoError::Read {
        file: path.display().to_string(),
        err,
    })
}

/// Read only the header of an image to get its number of timepoints.
pub fn read_num_timepoints<P: AsRef<Path>>(path: P) -> Result<usize, NiftiIoError> {
    let header = read_header(path)?;
    Ok(if header.dim[0] >= 4 {
        usize::from(header.dim[4].max(1))
    } else {
        1
    })
}

/// The spatial shape recorded in a header.
pub fn header_spatial_shape(header: &NiftiHeader) -> (usize, usize, usize) {
    let d = |i: usize| {
        if usize::from(header.dim[0]) >= i {
            usize::from(header.dim[i].max(1))
        } else {
            1
        }
    };
    (d(1), d(2), d(3))
}

/// The voxel-to-world affine: the sform if it's set, otherwise the qform if
/// that's set, otherwise just the voxel sizes.
pub fn header_affine(h: &NiftiHeader) -> Matrix4<f64> {
    let p = |i: usize| match f64::from(h.pixdim[i]) {
        d if d > 0.0 => d,
        _ => 1.0,
    };
    if h.sform_code > 0 {
        let r = |row: [f32; 4]| row.map(f64::from);
        let (x, y, z) = (r(h.srow_x), r(h.srow_y), r(h.srow_z));
        Matrix4::new(
            x[0], x[1], x[2], x[3], //
            y[0], y[1], y[2], y[3], //
            z[0], z[1], z[2], z[3], //
            0.0, 0.0, 0.0, 1.0,
        )
    } else if h.qform_code > 0 {
        let (b, c, d) = (
            f64::from(h.quatern_b),
            f64::from(h.quatern_c),
            f64::from(h.quatern_d),
        );
        // The quaternion is stored without its scalar part; rounding can push
        // b² + c² + d² slightly past 1.
        let a = (1.0 - (b * b + c * c + d * d)).max(0.0).sqrt();
        let qfac = if h.pixdim[0] < 0.0 { -1.0 } else { 1.0 };
        let (dx, dy, dz) = (p(1), p(2), qfac * p(3));
        let (ox, oy, oz) = (
            f64::from(h.quatern_x),
            f64::from(h.quatern_y),
            f64::from(h.quatern_z),
        );
        Matrix4::new(
            (a * a + b * b - c * c - d * d) * dx,
            2.0 * (b * c - a * d) * dy,
            2.0 * (b * d + a * c) * dz,
            ox,
            2.0 * (b * c + a * d) * dx,
            (a * a + c * c - b * b - d * d) * dy,
            2.0 * (c * d - a * b) * dz,
            oy,
            2.0 * (b * d - a * c) * dx,
            2.0 * (c * d + a * b) * dy,
            (a * a + d * d - b * b - c * c) * dz,
            oz,
            0.0,
            0.0,
            0.0,
            1.0,
        )
    } else {
        Matrix4::from_diagonal(&nalgebra::Vector4::new(p(1), p(2), p(3), 1.0))
    }
}

#[derive(Error, Debug)]
pub enum NiftiIoError {
    #[error("Couldn't read NIfTI image {file}: {err}")]
    Read { file: String, err: nifti::NiftiError },

    #[error("Couldn't write NIfTI image {file}: {err}")]
    Write { file: String, err: nifti::NiftiError },

    #[error("NIfTI image {file} has {ndim} dimensions; only 3D or 4D images are supported")]
    BadDimensionality { file: String, ndim: usize },

    #[error("Mask {file} has spatial shape {mask:?}, but the image has {image:?}")]
    MaskShapeMismatch {
        file: String,
        mask: (usize, usize, usize),
        image: (usize, usize, usize),
    },

    #[error("Expected a timeseries image with shape [1, 1, C, T], got {shape:?}")]
    NotATimeseries { shape: Vec<usize> },

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use tempfile::tempdir;

    use super::*;

    fn ramp_image(nt: usize) -> Image {
        let data = Array4::from_shape_fn((3, 4, 2, nt), |(x, y, z, t)| {
            (x * 100 + y * 10 + z) as f64 + t as f64 * 0.5
        });
        let mut header = NiftiHeader::default();
        header.pixdim = [1.0, 2.0, 2.0, 2.0, 2.0, 1.0, 1.0, 1.0];
        Image { data, header }
    }

    #[test]
    fn matrix_round_trip_preserves_voxel_order() {
        let image = ramp_image(5);
        let m = image.to_matrix();
        assert_eq!(m.dim(), (5, 24));
        // Voxel (1, 2, 1) is at flat index (1 * 4 + 2) * 2 + 1 = 13.
        assert_abs_diff_eq!(m[[3, 13]], 121.0 + 1.5);
        let back = image.with_matrix(m.view());
        assert_eq!(back.data, image.data);
    }

    #[test]
    fn with_matrix_can_change_the_number_of_timepoints() {
        let image = ramp_image(5);
        let m = image.to_matrix();
        let shorter = image.with_matrix(m.slice(s![1..4, ..]));
        assert_eq!(shorter.num_timepoints(), 3);
        assert_eq!(shorter.data.index_axis(Axis(3), 0), image.data.index_axis(Axis(3), 1));
    }

    #[test]
    fn timeseries_image_round_trip() {
        let ts = array![[1.0, 10.0], [2.0, 20.0], [3.0, 30.0]];
        let image = Image::from_timeseries(ts.view(), 2.5);
        assert_eq!(image.data.dim(), (1, 1, 2, 3));
        assert_abs_diff_eq!(image.tr(), 2.5);
        assert_eq!(image.native_precision(), Precision::Double);
        assert_eq!(image.to_timeseries().unwrap(), ts);

        let not_ts = ramp_image(2);
        assert!(matches!(
            not_ts.to_timeseries(),
            Err(NiftiIoError::NotATimeseries { .. })
        ));
    }

    #[test]
    fn write_and_read_back() {
        let tmp = tempdir().unwrap();
        let image = ramp_image(4);
        let file = tmp.path().join("ramp.nii.gz");
        image.write(&file, Precision::Double).unwrap();

        let read = Image::read(&file).unwrap();
        assert_eq!(read.data.dim(), image.data.dim());
        for (a, b) in read.data.iter().zip(image.data.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
        }
        assert_abs_diff_eq!(read.tr(), 2.0);
        assert_eq!(read_num_timepoints(&file).unwrap(), 4);
    }

    #[test]
    fn affine_prefers_sform_then_qform() {
        let mut header = NiftiHeader {
            pixdim: [-1.0, 2.0, 3.0, 4.0, 1.0, 1.0, 1.0, 1.0],
            sform_code: 1,
            srow_x: [1.5, 0.0, 0.0, -10.0],
            srow_y: [0.0, 1.5, 0.0, -20.0],
            srow_z: [0.0, 0.0, 1.5, -30.0],
            qform_code: 1,
            // 90 degrees about z.
            quatern_b: 0.0,
            quatern_c: 0.0,
            quatern_d: std::f32::consts::FRAC_1_SQRT_2,
            quatern_x: 5.0,
            quatern_y: 6.0,
            quatern_z: 7.0,
            ..Default::default()
        };
        let sform = header_affine(&header);
        assert_abs_diff_eq!(sform[(0, 0)], 1.5);
        assert_abs_diff_eq!(sform[(2, 3)], -30.0);

        header.sform_code = 0;
        let qform = header_affine(&header);
        #[rustfmt::skip]
        let expected = Matrix4::new(
            0.0, -3.0, 0.0, 5.0,
            2.0, 0.0, 0.0, 6.0,
            // pixdim[0] < 0 flips the third axis.
            0.0, 0.0, -4.0, 7.0,
            0.0, 0.0, 0.0, 1.0,
        );
        for (a, b) in qform.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-6);
        }

        header.qform_code = 0;
        let fallback = header_affine(&header);
        assert_eq!(
            fallback,
            Matrix4::from_diagonal(&nalgebra::Vector4::new(2.0, 3.0, 4.0, 1.0))
        );
    }

    #[test]
    fn mask_shape_is_checked() {
        let tmp = tempdir().unwrap();
        let mask = ramp_image(1);
        let file = tmp.path().join("mask.nii");
        mask.write(&file, Precision::Single).unwrap();

        let flat = read_mask(&file, (3, 4, 2)).unwrap();
        // Only voxel (0, 0, 0) is zero.
        assert_eq!(flat.iter().filter(|&&m| !m).count(), 1);
        assert!(matches!(
            read_mask(&file, (3, 3, 2)),
            Err(NiftiIoError::MaskShapeMismatch { .. })
        ));
    }
}
