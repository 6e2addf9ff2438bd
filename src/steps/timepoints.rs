// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Steps that change which timepoints an image has.

use std::path::Path;

use log::debug;
use ndarray::prelude::*;

use super::{derived_path, out_file, StepError};
use crate::{
    io::Image,
    workflow::{ports, Node, PortValues},
};

/// Drop volumes from the start and end of the timeseries.
#[derive(Debug, Clone)]
pub struct TrimTimepoints {
    pub from_beginning: usize,
    pub from_end: usize,
}

impl Node for TrimTimepoints {
    fn kind(&self) -> String {
        "trim_timepoints".to_string()
    }

    fn run(&self, inputs: &PortValues, node_dir: &Path) -> Result<PortValues, StepError> {
        let in_file = inputs.file(ports::IN_FILE)?;
        let image = Image::read(in_file)?;
        let num_timepoints = image.num_timepoints();
        if self.from_beginning + self.from_end >= num_timepoints {
            return Err(StepError::InvalidTrim {
                from_beginning: self.from_beginning,
                from_end: self.from_end,
                num_timepoints,
            });
        }

        let trimmed = image
            .data
            .slice(s![
                ..,
                ..,
                ..,
                self.from_beginning..num_timepoints - self.from_end
            ])
            .to_owned();
        debug!(
            "Trimmed {num_timepoints} timepoints to {}",
            trimmed.len_of(Axis(3))
        );
        let out = derived_path(node_dir, in_file);
        image
            .with_data(trimmed)
            .write(&out, image.native_precision())?;
        Ok(out_file(out))
    }
}

/// Apply a scrub vector: scrubbed volumes either become NaN or are removed.
#[derive(Debug, Clone)]
pub struct ScrubTimepoints {
    pub insert_na: bool,
}

impl Node for ScrubTimepoints {
    fn kind(&self) -> String {
        if self.insert_na {
            "scrub_timepoints:insert_na".to_string()
        } else {
            "scrub_timepoints:remove".to_string()
        }
    }

    fn run(&self, inputs: &PortValues, node_dir: &Path) -> Result<PortValues, StepError> {
        let in_file = inputs.file(ports::IN_FILE)?;
        let scrub_vector = inputs.scrub_vector(ports::SCRUB_VECTOR)?;
        let mut image = Image::read(in_file)?;
        if scrub_vector.len() != image.num_timepoints() {
            return Err(StepError::LengthMismatch {
                what: "scrub vector entries",
                expected: image.num_timepoints(),
                got: scrub_vector.len(),
            });
        }

        if self.insert_na {
            for t in scrub_vector.scrubbed_indices() {
                image.data.index_axis_mut(Axis(3), t).fill(f64::NAN);
            }
        } else {
            image.data = image
                .data
                .select(Axis(3), &scrub_vector.kept_indices());
        }
        debug!(
            "Scrubbed {} of {} timepoints",
            scrub_vector.len() - scrub_vector.num_kept(),
            scrub_vector.len()
        );

        let out = derived_path(node_dir, in_file);
        image.write(&out, image.native_precision())?;
        Ok(out_file(out))
    }
}
