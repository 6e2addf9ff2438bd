// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{
    borrow::Cow,
    path::{Path, PathBuf},
};

use itertools::Itertools;
use log::{error, info};

use super::{one_line, PostprocessError};
use crate::{
    batch::image_stem,
    bids::{get_repetition_time, postproc_file_name, BidsEntities, FsIndex, Index, IndexError},
    cli::{InfoPrinter, Warn},
    config::{absolutise, RunConfig, StepKind},
    workflow::{build_postprocessing_wf, InputError, Workflow, WorkflowInputs},
};

/// The name of every image workflow, and so its directory inside the image's
/// working directory.
const WORKFLOW_NAME: &str = "postproc_wf";

/// An image job: find the image's companion files, compose its workflow and
/// (unless `dry_run`) run it. Returns the composed workflow.
///
/// Any failure is reported on one line naming the subject and the image.
pub fn postprocess_image(
    image: &Path,
    run_config_file: &Path,
    dry_run: bool,
) -> Result<Workflow, PostprocessError> {
    let result = postprocess_image_inner(image, run_config_file, dry_run);
    if let Err(e) = &result {
        let subject = BidsEntities::parse(image)
            .map(|e| format!("sub-{}", e.subject()))
            .unwrap_or_else(|| "sub-?".to_string());
        let basename = image
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        error!("{subject} {basename}: {}", one_line(e));
    }
    result
}

fn postprocess_image_inner(
    image: &Path,
    run_config_file: &Path,
    dry_run: bool,
) -> Result<Workflow, PostprocessError> {
    let run_config = RunConfig::read(run_config_file)?;
    let options = &run_config.postprocessing;
    let image = absolutise(image)?;
    let entities =
        BidsEntities::parse(&image).ok_or_else(|| IndexError::NotBids(image.clone()))?;
    let subject = entities.subject();
    let basename = image
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let index = FsIndex::open(&run_config.pybids_db_path, &run_config.target_directory)?;

    let tr = get_repetition_time(&index, &image, &run_config.bids_directory)?.ok_or_else(|| {
        InputError::MissingRepetitionTime {
            image: basename.clone(),
        }
    })?;
    let mask_file = index.get_mask(&image)?;
    if mask_file.is_none() {
        format!("No brain mask was found for {basename}; it's processed without one").warn();
    }
    let confounds_file = index.get_confounds(&image)?;
    if confounds_file.is_none() {
        format!("No confounds file was found for {basename}").warn();
    }
    let (mixing_file, noise_file) = if options.processing_steps.contains(&StepKind::AromaRegression)
    {
        (index.get_mixing(&image)?, index.get_noise(&image)?)
    } else {
        (None, None)
    };

    let outputs = OutputPaths::new(&run_config, &image, subject);
    let inputs = WorkflowInputs {
        name: WORKFLOW_NAME.to_string(),
        working_dir: run_config
            .subject_working_directory(subject)
            .join(image_stem(&image)),
        tr,
        image_export_path: Some(outputs.image),
        confounds_export_path: confounds_file
            .as_deref()
            .map(|c| outputs.dir.join(file_name(c))),
        timeseries_export_path: options.roi_extraction.as_ref().map(|_| outputs.timeseries),
        graph_path: Some(outputs.graph),
        image_file: Some(image.clone()),
        confounds_file,
        mask_file,
        mixing_file,
        noise_file,
    };

    let mut printer = InfoPrinter::new(format!("Postprocessing sub-{subject} {basename}").into());
    printer.push_block(vec![
        format!("Stream: {}", run_config.processing_stream).into(),
        format!("Steps: [{}]", options.processing_steps.iter().join(", ")).into(),
        format!("TR: {tr} s").into(),
    ]);
    let mut found: Vec<Cow<'static, str>> = vec![];
    for (what, file) in [
        ("Mask", &inputs.mask_file),
        ("Confounds", &inputs.confounds_file),
        ("Mixing matrix", &inputs.mixing_file),
        ("Noise ICs", &inputs.noise_file),
    ] {
        if let Some(file) = file {
            found.push(format!("{what}: {}", file.display()).into());
        }
    }
    if !found.is_empty() {
        printer.push_block(found);
    }
    if let Some(export) = &inputs.image_export_path {
        printer.push_line(format!("Output: {}", export.display()).into());
    }
    printer.display();

    let wf = build_postprocessing_wf(options, &inputs)?;
    if dry_run {
        info!(
            "Dry run; not running the workflow ({})",
            wf.topological_order()?.iter().join(" -> ")
        );
        return Ok(wf);
    }
    wf.run()?;
    info!("sub-{subject} {basename}: postprocessing complete");
    Ok(wf)
}

/// Where an image's products go: the fMRIPrep layout below the subject,
/// mirrored under the subject's output directory.
struct OutputPaths {
    dir: PathBuf,
    image: PathBuf,
    timeseries: PathBuf,
    graph: PathBuf,
}

impl OutputPaths {
    fn new(run_config: &RunConfig, image: &Path, subject: &str) -> OutputPaths {
        let subject_out_dir = run_config.subject_output_directory(subject);
        let subject_in_dir = run_config.target_directory.join(format!("sub-{subject}"));
        let relative = image
            .parent()
            .and_then(|p| p.strip_prefix(&subject_in_dir).ok())
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("func"));
        let dir = subject_out_dir.join(relative);

        let name = postproc_file_name(&file_name(image));
        let stem = image_stem(Path::new(&name));
        let timeseries = match stem.strip_suffix("_bold") {
            Some(s) => format!("{s}_timeseries.tsv"),
            None => format!("{stem}_timeseries.tsv"),
        };
        OutputPaths {
            image: dir.join(&name),
            timeseries: dir.join(timeseries),
            graph: subject_out_dir.join(format!("{}_processing_graph.dot", image_stem(image))),
            dir,
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
