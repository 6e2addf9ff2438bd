// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Postprocessing of fMRIPrep derivatives.

A project configuration declares the processing steps of one or more named
processing streams. For each stream, the configuration is frozen into a run
configuration, the derivatives are indexed, and every subject and image gets a
job of its own. An image job composes a workflow (a DAG of step nodes)
processing the image and its confounds together, and runs it.
 */

pub mod batch;
pub mod bids;
mod cli;
pub mod config;
pub mod constants;
pub mod filter;
pub mod io;
pub mod postprocess;
pub mod scrub;
pub mod steps;
pub mod workflow;

// Re-exports.
pub use cli::{Postproc, PostprocError};

use crossbeam_utils::atomic::AtomicCell;

lazy_static::lazy_static! {
    /// Are progress bars being drawn? This should only ever be enabled by CLI
    /// code.
    static ref PROGRESS_BARS: AtomicCell<bool> = AtomicCell::new(false);
}
