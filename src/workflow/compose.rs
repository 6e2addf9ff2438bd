// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Composing the declared processing steps into a per-image workflow.
//!
//! The workflow has two branches. The image branch applies every declared
//! step that affects images, in the declared order. The confounds branch
//! selects and prepares the configured confound columns, wraps them as a
//! `[1, 1, C, T]` image, applies the declared steps that affect confounds
//! (in the same order), unwraps them and optionally appends spike
//! regressors. Both branches take their scrub vector from one producer node,
//! and ConfoundRegression in the image branch takes the end of the confounds
//! branch as its regressors. The ends of both branches meet in one gather
//! node, and only that node feeds the exports, so nothing is exported unless
//! the whole workflow succeeded.
//!
//! Everything that can be checked without running a node is checked here,
//! so that a bad configuration fails before any expensive work starts.

use std::path::PathBuf;

use log::{debug, trace};

use super::{
    ports,
    registry::{step_traits, Branch},
    ComposeError, InputError, PipelineError, Workflow,
};
use crate::{
    cli::Warn,
    config::{PostProcessingOptions, StepKind, TemporalFilterImplementation},
    filter::bandpass_for_tr,
    io::{confounds::read_matrix, nifti::read_num_timepoints, ConfoundsTable},
    scrub::{get_scrub_vector, ScrubError},
    steps::*,
};

const INPUT_NODE: &str = "inputnode";
const OUTPUT_NODE: &str = "outputnode";
const SCRUB_VECTOR_NODE: &str = "scrub_vector";
const TRIM_SCRUB_VECTOR_NODE: &str = "trim_scrub_vector";
const ALIGN_MIXING_NODE: &str = "align_mixing";
const GATHER_NODE: &str = "gather_outputs";

/// Everything about one image that a workflow is built from. Either
/// `image_file` or `confounds_file` (or both) must be set; a branch is built
/// for each one that is.
#[derive(Debug, Clone, Default)]
pub struct WorkflowInputs {
    /// The workflow's name, which is also its directory under `working_dir`.
    pub name: String,
    pub working_dir: PathBuf,

    /// Repetition time [seconds].
    pub tr: f64,

    pub image_file: Option<PathBuf>,
    pub image_export_path: Option<PathBuf>,
    pub confounds_file: Option<PathBuf>,
    pub confounds_export_path: Option<PathBuf>,
    pub mask_file: Option<PathBuf>,
    pub mixing_file: Option<PathBuf>,
    pub noise_file: Option<PathBuf>,

    /// Where ROI timeseries go, if ROI extraction is configured.
    pub timeseries_export_path: Option<PathBuf>,

    /// Where the rendered graph goes, if `write_process_graph` is set.
    pub graph_path: Option<PathBuf>,
}

/// A node's output port.
type Source = (&'static str, &'static str);

/// Where the declared steps sit relative to each other.
struct Plan<'a> {
    options: &'a PostProcessingOptions,
    steps: &'a [StepKind],

    /// 3dTproject censors while it filters, so ScrubTimepoints doesn't get a
    /// node of its own.
    joint_scrub: bool,
}

impl Plan<'_> {
    fn position(&self, kind: StepKind) -> Option<usize> {
        self.steps.iter().position(|&s| s == kind)
    }

    fn has(&self, kind: StepKind) -> bool {
        self.position(kind).is_some()
    }

    /// The step that applies the scrub vector.
    fn scrub_position(&self) -> Option<usize> {
        if self.joint_scrub {
            self.position(StepKind::TemporalFiltering)
        } else {
            self.position(StepKind::ScrubTimepoints)
        }
    }

    /// The scrub vector as seen by a node at position `index` (`None` for the
    /// end of a branch): trimmed if TrimTimepoints comes earlier.
    fn scrub_source(&self, index: Option<usize>) -> Source {
        match (self.position(StepKind::TrimTimepoints), index) {
            (Some(trim), Some(i)) if trim < i => (TRIM_SCRUB_VECTOR_NODE, ports::SCRUB_VECTOR),
            (Some(_), None) => (TRIM_SCRUB_VECTOR_NODE, ports::SCRUB_VECTOR),
            _ => (SCRUB_VECTOR_NODE, ports::SCRUB_VECTOR),
        }
    }

    /// Whether the step at `index` removes timepoints. The step that applies
    /// the scrub vector only does when it doesn't insert NaN volumes instead.
    fn drops_timepoints(&self, index: usize) -> bool {
        if self.scrub_position() == Some(index) {
            return !self.options.processing_step_options.scrub_timepoints.insert_na;
        }
        let kind = self.steps[index];
        kind != StepKind::ScrubTimepoints && step_traits(kind).changes_length
    }

    /// How the MELODIC mixing matrix has to be cut down to match the data
    /// that AromaRegression sees: the trim, and the scrub vector if volumes
    /// were removed. `None` if the data arrive at full length.
    fn mixing_alignment(&self) -> Option<((usize, usize), Option<Source>)> {
        let aroma = self.position(StepKind::AromaRegression)?;
        let trimmed = matches!(self.position(StepKind::TrimTimepoints), Some(t) if t < aroma);
        let scrubbed = self
            .scrub_position()
            .filter(|&s| s < aroma && self.drops_timepoints(s));
        if !trimmed && scrubbed.is_none() {
            return None;
        }
        let trim = if trimmed { self.trim() } else { (0, 0) };
        Some((trim, scrubbed.map(|s| self.scrub_source(Some(s)))))
    }

    /// The trim applied by the end of a branch.
    fn trim(&self) -> (usize, usize) {
        if self.has(StepKind::TrimTimepoints) {
            let t = &self.options.processing_step_options.trim_timepoints;
            (t.from_beginning, t.from_end)
        } else {
            (0, 0)
        }
    }
}

/// Compose the workflow for one image and/or its confounds.
pub fn build_postprocessing_wf(
    options: &PostProcessingOptions,
    inputs: &WorkflowInputs,
) -> Result<Workflow, ComposeError> {
    if inputs.image_file.is_none() && inputs.confounds_file.is_none() {
        return Err(PipelineError::NothingToBuild.into());
    }
    options.validate()?;

    let steps = options.processing_steps.as_slice();
    let step_options = &options.processing_step_options;
    let plan = Plan {
        options,
        steps,
        joint_scrub: steps.contains(&StepKind::ScrubTimepoints)
            && steps.contains(&StepKind::TemporalFiltering)
            && step_options.temporal_filtering.implementation
                == TemporalFilterImplementation::AfniTproject,
    };
    check_inputs(&plan, inputs)?;
    let num_timepoints = check_lengths(&plan, inputs)?;
    debug!(
        "Composing workflow '{}' ({num_timepoints} timepoints): {:?}",
        inputs.name, steps
    );

    let mut wf = Workflow::new(&inputs.name, &inputs.working_dir);
    wf.add_node(INPUT_NODE, Passthrough)?;
    let given = [
        (ports::IN_FILE, &inputs.image_file),
        (ports::CONFOUNDS_FILE, &inputs.confounds_file),
        (ports::MASK_FILE, &inputs.mask_file),
        (ports::MIXING_FILE, &inputs.mixing_file),
        (ports::NOISE_FILE, &inputs.noise_file),
    ];
    for (port, file) in given {
        if let Some(file) = file {
            wf.set_input(INPUT_NODE, port, file.clone())?;
        }
    }
    wf.set_input(INPUT_NODE, ports::TR, inputs.tr)?;
    wf.add_node(OUTPUT_NODE, Passthrough)?;

    if plan.has(StepKind::ScrubTimepoints) {
        wf.add_node(
            SCRUB_VECTOR_NODE,
            ScrubVectorProducer {
                rules: step_options.scrub_timepoints.scrub_columns.clone(),
            },
        )?;
        wf.connect(
            INPUT_NODE,
            ports::CONFOUNDS_FILE,
            SCRUB_VECTOR_NODE,
            ports::CONFOUNDS_FILE,
        )?;
        if plan.has(StepKind::TrimTimepoints) {
            let (from_beginning, from_end) = plan.trim();
            wf.add_node(
                TRIM_SCRUB_VECTOR_NODE,
                TrimScrubVector {
                    from_beginning,
                    from_end,
                },
            )?;
            wf.connect(
                SCRUB_VECTOR_NODE,
                ports::SCRUB_VECTOR,
                TRIM_SCRUB_VECTOR_NODE,
                ports::SCRUB_VECTOR,
            )?;
        }
    }

    if let Some(((from_beginning, from_end), scrub_vector)) = plan.mixing_alignment() {
        wf.add_node(
            ALIGN_MIXING_NODE,
            AlignMixing {
                from_beginning,
                from_end,
            },
        )?;
        wf.connect(INPUT_NODE, ports::MIXING_FILE, ALIGN_MIXING_NODE, ports::MIXING_FILE)?;
        if let Some((node, out)) = scrub_vector {
            wf.connect(node, out, ALIGN_MIXING_NODE, ports::SCRUB_VECTOR)?;
        }
    }

    // The confounds branch goes first; image ConfoundRegression needs its end.
    let confounds_end = match inputs.confounds_file {
        Some(_) => Some(build_confounds_branch(&plan, inputs, &mut wf)?),
        None => None,
    };
    let (image_end, timeseries) = match inputs.image_file {
        Some(_) => {
            let (end, timeseries) =
                build_image_branch(&plan, inputs, confounds_end.as_ref(), &mut wf)?;
            (Some(end), timeseries)
        }
        None => (None, None),
    };

    wf.add_node(GATHER_NODE, Passthrough)?;
    let results = [
        (image_end, ports::OUT_FILE, &inputs.image_export_path, "export_image"),
        (
            confounds_end,
            ports::OUT_CONFOUNDS_FILE,
            &inputs.confounds_export_path,
            "export_confounds",
        ),
        (
            timeseries,
            ports::OUT_TIMESERIES_FILE,
            &inputs.timeseries_export_path,
            "export_timeseries",
        ),
    ];
    for (end, port, destination, export_name) in results {
        let (node, out) = match end {
            Some(end) => end,
            None => continue,
        };
        wf.connect(&node, out, GATHER_NODE, port)?;
        match destination {
            Some(destination) => add_export(&mut wf, export_name, port, destination)?,
            None => wf.connect(GATHER_NODE, port, OUTPUT_NODE, port)?,
        }
    }

    // A cycle would only show up when running; fail now instead.
    let order = wf.topological_order()?;
    trace!("Execution order: {order:?}");

    if let (true, Some(graph_path)) = (options.write_process_graph, &inputs.graph_path) {
        wf.write_graph(graph_path)?;
        debug!("Wrote the processing graph to {}", graph_path.display());
    }
    Ok(wf)
}

/// Check that every declared step has its inputs and that the steps can be
/// put together.
fn check_inputs(plan: &Plan, inputs: &WorkflowInputs) -> Result<(), ComposeError> {
    let step_options = &plan.options.processing_step_options;

    if plan.has(StepKind::AromaRegression) {
        if inputs.mixing_file.is_none() {
            return Err(InputError::MissingAromaInputs {
                missing: "MELODIC mixing matrix",
            }
            .into());
        }
        if inputs.noise_file.is_none() {
            return Err(InputError::MissingAromaInputs {
                missing: "noise component list",
            }
            .into());
        }
    }
    for step in [StepKind::ConfoundRegression, StepKind::ScrubTimepoints] {
        let needed = match step {
            StepKind::ConfoundRegression => inputs.image_file.is_some(),
            _ => true,
        };
        if needed && plan.has(step) && inputs.confounds_file.is_none() {
            return Err(InputError::MissingConfounds { step }.into());
        }
    }

    if let (Some(scrub), Some(trim), false) = (
        plan.scrub_position(),
        plan.position(StepKind::TrimTimepoints),
        step_options.scrub_timepoints.insert_na,
    ) {
        if scrub < trim {
            return Err(PipelineError::ScrubBeforeTrim.into());
        }
    }

    // ConfoundRegression regresses the fully processed confounds, so their
    // length must already be final when it runs.
    if let Some(cr) = plan.position(StepKind::ConfoundRegression) {
        if let Some(i) = (cr + 1..plan.steps.len()).find(|&i| plan.drops_timepoints(i)) {
            return Err(PipelineError::InvalidPipeline {
                reason: format!(
                    "{} is declared after ConfoundRegression and would leave the regressors longer than the image; declare it before ConfoundRegression",
                    plan.steps[i]
                ),
            }
            .into());
        }
    }

    if plan.has(StepKind::TemporalFiltering) {
        let tf = &step_options.temporal_filtering;
        if tf.implementation == TemporalFilterImplementation::Butterworth {
            bandpass_for_tr(
                tf.filtering_order,
                inputs.tr,
                tf.filtering_high_pass,
                tf.filtering_low_pass,
            )?;
        }
    }

    if let (Some(roi), Some(_)) = (&plan.options.roi_extraction, &inputs.timeseries_export_path) {
        if !roi.coordinates_file.exists() {
            return Err(InputError::CoordinatesNotFound(roi.coordinates_file.clone()).into());
        }
    }
    Ok(())
}

/// Check that the image and confounds line up, that trimming leaves
/// something, and that scrubbing doesn't remove everything. Returns the
/// number of timepoints.
fn check_lengths(plan: &Plan, inputs: &WorkflowInputs) -> Result<usize, ComposeError> {
    let image_timepoints = match &inputs.image_file {
        Some(image) => Some(read_num_timepoints(image)?),
        None => None,
    };
    let confounds = match &inputs.confounds_file {
        Some(file) => Some(ConfoundsTable::read(file)?),
        None => None,
    };
    let num_timepoints = match (image_timepoints, &confounds) {
        (Some(image_timepoints), Some(confounds)) => {
            if image_timepoints != confounds.num_rows() {
                return Err(PipelineError::LengthMismatch {
                    image_timepoints,
                    confounds_rows: confounds.num_rows(),
                }
                .into());
            }
            image_timepoints
        }
        (Some(n), None) => n,
        (None, Some(confounds)) => confounds.num_rows(),
        (None, None) => unreachable!("checked by the caller"),
    };

    if let (true, Some(mixing_file)) = (plan.has(StepKind::AromaRegression), &inputs.mixing_file) {
        let mixing_rows = read_matrix(mixing_file)?.nrows();
        if mixing_rows != num_timepoints {
            return Err(PipelineError::MixingLengthMismatch {
                mixing_rows,
                num_timepoints,
            }
            .into());
        }
    }

    let (from_beginning, from_end) = plan.trim();
    if plan.has(StepKind::TrimTimepoints) && from_beginning + from_end >= num_timepoints {
        return Err(PipelineError::InvalidTrim {
            from_beginning,
            from_end,
            num_timepoints,
        }
        .into());
    }

    if let (true, Some(confounds)) = (plan.has(StepKind::ScrubTimepoints), &confounds) {
        let rules = &plan.options.processing_step_options.scrub_timepoints.scrub_columns;
        let scrub_vector = get_scrub_vector(confounds, rules)?;
        let trimmed = scrub_vector.trimmed(from_beginning, from_end);
        if trimmed.num_kept() == 0 {
            return Err(ScrubError::AllScrubbed {
                num_timepoints: trimmed.len(),
            }
            .into());
        }
        debug!(
            "Scrubbing will keep {} of {} timepoints",
            trimmed.num_kept(),
            trimmed.len()
        );
    }
    Ok(num_timepoints)
}

/// Add the step nodes for one branch, starting from `source`. Returns the
/// branch's last output.
fn add_steps(
    plan: &Plan,
    branch: Branch,
    mut source: (String, &'static str),
    confounds_end: Option<&(String, &'static str)>,
    mask: bool,
    wf: &mut Workflow,
) -> Result<(String, &'static str), ComposeError> {
    let prefix = match branch {
        Branch::Image => "image",
        Branch::Confounds => "confounds",
    };
    for (i, &kind) in plan.steps.iter().enumerate() {
        let traits = step_traits(kind);
        let applies = match branch {
            Branch::Image => traits.affects_image,
            Branch::Confounds => traits.affects_confounds,
        };
        if !applies || (kind == StepKind::ScrubTimepoints && plan.joint_scrub) {
            continue;
        }

        let name = format!("{prefix}_{}", kind.snake_name());
        wf.add_boxed_node(&name, (traits.build)(plan.options, branch)?)?;
        wf.connect(&source.0, source.1, &name, ports::IN_FILE)?;
        if traits.takes_mask && mask {
            wf.connect(INPUT_NODE, ports::MASK_FILE, &name, ports::MASK_FILE)?;
        }
        for &port in traits.required_inputs {
            match port {
                ports::CONFOUNDS_FILE => {
                    let (node, out) = confounds_end.ok_or(InputError::MissingConfounds { step: kind })?;
                    wf.connect(node, out, &name, ports::CONFOUNDS_FILE)?;
                }
                ports::SCRUB_VECTOR => {
                    let (node, out) = plan.scrub_source(Some(i));
                    wf.connect(node, out, &name, ports::SCRUB_VECTOR)?;
                }
                ports::MIXING_FILE if wf.contains(ALIGN_MIXING_NODE) => {
                    wf.connect(ALIGN_MIXING_NODE, ports::MIXING_FILE, &name, port)?;
                }
                port => wf.connect(INPUT_NODE, port, &name, port)?,
            }
        }
        if kind == StepKind::TemporalFiltering && plan.joint_scrub {
            let (node, out) = plan.scrub_source(Some(i));
            wf.connect(node, out, &name, ports::SCRUB_VECTOR)?;
        }
        source = (name, ports::OUT_FILE);
    }
    Ok(source)
}

/// Returns the end of the image branch, and the ROI timeseries if they're
/// extracted.
fn build_image_branch(
    plan: &Plan,
    inputs: &WorkflowInputs,
    confounds_end: Option<&(String, &'static str)>,
    wf: &mut Workflow,
) -> Result<((String, &'static str), Option<(String, &'static str)>), ComposeError> {
    let mask = inputs.mask_file.is_some();
    let mut source = (INPUT_NODE.to_string(), ports::IN_FILE);

    let first_wants_mask = plan
        .steps
        .iter()
        .find(|&&k| step_traits(k).affects_image)
        .map(|&k| step_traits(k).consumes_masked_image)
        .unwrap_or(false);
    if mask && first_wants_mask {
        wf.add_node("apply_mask", ApplyMask)?;
        wf.connect(INPUT_NODE, ports::IN_FILE, "apply_mask", ports::IN_FILE)?;
        wf.connect(INPUT_NODE, ports::MASK_FILE, "apply_mask", ports::MASK_FILE)?;
        source = ("apply_mask".to_string(), ports::OUT_FILE);
    }

    let end = add_steps(plan, Branch::Image, source, confounds_end, mask, wf)?;

    let mut timeseries = None;
    if let (Some(roi), Some(_)) = (&plan.options.roi_extraction, &inputs.timeseries_export_path) {
        wf.add_node(
            "sphere_extract",
            SphereExtract {
                coordinates_file: roi.coordinates_file.clone(),
                sphere_radius: roi.sphere_radius,
                prop_voxels: roi.prop_voxels,
            },
        )?;
        wf.connect(&end.0, end.1, "sphere_extract", ports::IN_FILE)?;
        if mask {
            wf.connect(INPUT_NODE, ports::MASK_FILE, "sphere_extract", ports::MASK_FILE)?;
        }
        timeseries = Some(("sphere_extract".to_string(), ports::OUT_FILE));
    }
    Ok((end, timeseries))
}

/// Returns the end of the confounds branch.
fn build_confounds_branch(
    plan: &Plan,
    inputs: &WorkflowInputs,
    wf: &mut Workflow,
) -> Result<(String, &'static str), ComposeError> {
    let confound_options = &plan.options.confound_options;

    let end = if plan.steps.is_empty() {
        // Nothing to do; the confounds go out as they came in.
        (INPUT_NODE.to_string(), ports::CONFOUNDS_FILE)
    } else {
        wf.add_node(
            "prepare_confounds",
            PrepareConfounds {
                columns: confound_options.columns.clone(),
            },
        )?;
        wf.connect(
            INPUT_NODE,
            ports::CONFOUNDS_FILE,
            "prepare_confounds",
            ports::CONFOUNDS_FILE,
        )?;
        let mut end = ("prepare_confounds".to_string(), ports::OUT_FILE);

        let any_steps = plan
            .steps
            .iter()
            .any(|&k| step_traits(k).affects_confounds);
        if any_steps && !selects_nothing(plan, inputs)? {
            wf.add_node("confounds_to_image", ConfoundsToImage)?;
            wf.connect(&end.0, end.1, "confounds_to_image", ports::IN_FILE)?;
            wf.connect(INPUT_NODE, ports::TR, "confounds_to_image", ports::TR)?;

            let source = ("confounds_to_image".to_string(), ports::OUT_FILE);
            let stepped = add_steps(plan, Branch::Confounds, source, None, false, wf)?;

            wf.add_node("image_to_confounds", ImageToConfounds)?;
            wf.connect(&stepped.0, stepped.1, "image_to_confounds", ports::IN_FILE)?;
            wf.connect(
                "prepare_confounds",
                ports::OUT_FILE,
                "image_to_confounds",
                ports::COLUMNS_FILE,
            )?;
            end = ("image_to_confounds".to_string(), ports::OUT_FILE);
        }

        if confound_options.motion_outliers.include {
            let (from_beginning, from_end) = plan.trim();
            wf.add_node(
                "motion_outliers",
                MotionOutliers {
                    rule: confound_options.motion_outliers.as_scrub_column(),
                    from_beginning,
                    from_end,
                    insert_na: plan.options.processing_step_options.scrub_timepoints.insert_na,
                },
            )?;
            wf.connect(&end.0, end.1, "motion_outliers", ports::IN_FILE)?;
            wf.connect(
                INPUT_NODE,
                ports::CONFOUNDS_FILE,
                "motion_outliers",
                ports::CONFOUNDS_FILE,
            )?;
            if plan.has(StepKind::ScrubTimepoints) {
                let (node, out) = plan.scrub_source(None);
                wf.connect(node, out, "motion_outliers", ports::SCRUB_VECTOR)?;
            }
            end = ("motion_outliers".to_string(), ports::OUT_FILE);
        }
        end
    };

    Ok(end)
}

/// Whether the configured confound columns select nothing from the confounds
/// file, in which case there's nothing for the steps to process.
fn selects_nothing(plan: &Plan, inputs: &WorkflowInputs) -> Result<bool, ComposeError> {
    let columns = &plan.options.confound_options.columns;
    let file = match &inputs.confounds_file {
        Some(file) if !columns.is_empty() => file,
        _ => return Ok(false),
    };
    let (selected, _) = ConfoundsTable::read(file)?.select(columns);
    if selected.columns.is_empty() {
        format!(
            "None of the configured confound columns are in {}; the confounds won't be processed",
            file.display()
        )
        .warn();
        return Ok(true);
    }
    Ok(false)
}

/// Copy the gathered result on `port` to `destination` and report it on the
/// output node.
fn add_export(
    wf: &mut Workflow,
    name: &str,
    port: &'static str,
    destination: &std::path::Path,
) -> Result<(), ComposeError> {
    wf.add_node(name, Export)?;
    wf.connect(GATHER_NODE, port, name, ports::IN_FILE)?;
    wf.set_input(name, ports::DESTINATION, destination.to_path_buf())?;
    wf.connect(name, ports::OUT_FILE, OUTPUT_NODE, port)?;
    Ok(())
}
