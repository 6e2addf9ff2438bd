// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! File stuff (input/output, reading/writing, globs), for images, confounds
//! tables and others.

pub(crate) mod confounds;
mod glob;
pub(crate) mod nifti;

pub use self::confounds::{ConfoundsError, ConfoundsTable};
pub(crate) use self::glob::{glob_files, glob_one_file};
pub use self::glob::GlobError;
pub use self::nifti::{Image, NiftiIoError, Precision};
