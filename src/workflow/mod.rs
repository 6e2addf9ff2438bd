// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Per-image postprocessing workflows.
//!
//! A [`Workflow`] is a DAG of [`Node`]s joined port-to-port. The composer
//! ([`build_postprocessing_wf`]) turns the declared processing steps into
//! one such graph with two time-aligned branches: one for the image and one
//! for its confounds, which travel through the same step primitives as a
//! `[1, 1, C, T]` image.

mod compose;
mod error;
mod graph;
mod node;
mod registry;

pub use compose::{build_postprocessing_wf, WorkflowInputs};
pub use error::*;
pub use graph::{Edge, Workflow, WorkflowOutputs};
pub use node::{Node, PortValues, Value};
pub use registry::{step_traits, StepTraits};

/// Port names shared by nodes.
pub mod ports {
    pub const IN_FILE: &str = "in_file";
    pub const OUT_FILE: &str = "out_file";
    pub const MASK_FILE: &str = "mask_file";
    pub const CONFOUNDS_FILE: &str = "confounds_file";
    pub const MIXING_FILE: &str = "mixing_file";
    pub const NOISE_FILE: &str = "noise_file";
    pub const TR: &str = "tr";
    pub const SCRUB_VECTOR: &str = "scrub_vector";

    /// The table whose header names the columns of a confounds image.
    pub const COLUMNS_FILE: &str = "columns_file";

    /// Where an export node copies its input to.
    pub const DESTINATION: &str = "destination";

    /// Output ports of a workflow's output node.
    pub const OUT_CONFOUNDS_FILE: &str = "out_confounds_file";
    pub const OUT_TIMESERIES_FILE: &str = "out_timeseries_file";
}
