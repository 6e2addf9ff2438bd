// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Renaming of legacy option keys.
//!
//! Older configuration files use CamelCase keys. This table is a
//! compatibility shim only: it maps each old key onto an existing field and
//! never introduces a key the typed options don't have. Keys that aren't in
//! the table are left alone.

use serde_json::{Map, Value};

/// Legacy key → current key. Applies at every level of the tree, except where
/// [`STREAM_KEYS`] overrides it inside a processing stream.
const LEGACY_KEYS: &[(&str, &str)] = &[
    ("ProjectTitle", "project_title"),
    ("ProjectDirectory", "project_directory"),
    ("Authors/Contributors", "contributors"),
    ("Contributors", "contributors"),
    ("EmailAddress", "email_address"),
    ("BatchConfig", "batch_config_path"),
    ("DICOMToBIDSOptions", "convert2bids"),
    ("BIDSDirectory", "bids_directory"),
    ("PostProcessingOptions", "postprocessing"),
    ("ProcessingStreams", "processing_streams"),
    ("WorkingDirectory", "working_directory"),
    ("OutputDirectory", "output_directory"),
    ("TargetDirectory", "target_directory"),
    ("LogDirectory", "log_directory"),
    ("TargetImageSpace", "target_image_space"),
    ("TargetTasks", "target_tasks"),
    ("TargetAcquisitions", "target_acquisitions"),
    ("ProcessingSteps", "processing_steps"),
    ("ProcessingStepOptions", "processing_step_options"),
    ("ConfoundOptions", "confound_options"),
    ("Columns", "columns"),
    ("MotionOutliers", "motion_outliers"),
    ("Include", "include"),
    ("ScrubVar", "scrub_var"),
    ("Threshold", "threshold"),
    ("ScrubAhead", "scrub_ahead"),
    ("ScrubBehind", "scrub_behind"),
    ("ScrubContiguous", "scrub_contiguous"),
    ("ScrubColumns", "scrub_columns"),
    ("TargetVariable", "target_variable"),
    ("InsertNA", "insert_na"),
    ("BatchOptions", "batch_options"),
    ("MemoryUsage", "memory_usage"),
    ("TimeUsage", "time_usage"),
    ("NThreads", "n_threads"),
    ("WriteProcessGraph", "write_process_graph"),
    ("Implementation", "implementation"),
    ("FilteringHighPass", "filtering_high_pass"),
    ("FilteringLowPass", "filtering_low_pass"),
    ("FilteringOrder", "filtering_order"),
    ("FWHM", "fwhm_mm"),
    ("BrightnessThreshold", "brightness_threshold"),
    ("ReferenceImage", "reference_image"),
    ("FromBeginning", "from_beginning"),
    ("FromEnd", "from_end"),
    ("ROIExtraction", "roi_extraction"),
    ("CoordinatesFile", "coordinates_file"),
    ("SphereRadius", "sphere_radius"),
    ("PropVoxels", "prop_voxels"),
];

/// Inside an element of `processing_streams`.
const STREAM_KEYS: &[(&str, &str)] = &[
    ("ProcessingStream", "stream_name"),
    ("PostProcessingOptions", "postprocessing_options"),
];

/// Rename legacy keys throughout `value`, returning `(path, old, new)` for
/// every rename. A legacy key is dropped without renaming if the new key is
/// also present; the new key wins.
pub fn migrate_legacy_keys(value: &mut Value) -> Vec<String> {
    let mut renames = vec![];
    migrate(value, "", false, &mut renames);
    renames
}

fn lookup(table: &[(&str, &'static str)], key: &str) -> Option<&'static str> {
    table.iter().find(|(old, _)| *old == key).map(|(_, new)| *new)
}

fn migrate(value: &mut Value, path: &str, in_stream: bool, renames: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            rename_keys(map, path, in_stream, renames);
            for (key, child) in map.iter_mut() {
                let child_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                if key == "processing_streams" {
                    if let Value::Array(streams) = child {
                        for (i, stream) in streams.iter_mut().enumerate() {
                            migrate(stream, &format!("{child_path}[{i}]"), true, renames);
                        }
                        continue;
                    }
                }
                migrate(child, &child_path, false, renames);
            }
        }
        Value::Array(values) => {
            for (i, v) in values.iter_mut().enumerate() {
                migrate(v, &format!("{path}[{i}]"), false, renames);
            }
        }
        _ => (),
    }
}

fn rename_keys(map: &mut Map<String, Value>, path: &str, in_stream: bool, renames: &mut Vec<String>) {
    let keys: Vec<String> = map.keys().cloned().collect();
    for old in keys {
        let new = in_stream
            .then(|| lookup(STREAM_KEYS, &old))
            .flatten()
            .or_else(|| lookup(LEGACY_KEYS, &old));
        let Some(new) = new else { continue };
        let Some(v) = map.remove(&old) else { continue };
        let location = if path.is_empty() {
            String::new()
        } else {
            format!(" (in {path})")
        };
        if map.contains_key(new) {
            renames.push(format!(
                "Legacy option '{old}'{location} ignored; '{new}' is also set"
            ));
        } else {
            map.insert(new.to_string(), v);
            renames.push(format!(
                "Legacy option '{old}'{location} renamed to '{new}'"
            ));
        }
    }
}
