// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! BIDS filenames and a queryable index over an fMRIPrep derivatives tree.
//!
//! fMRIPrep writes, next to each preprocessed image, a JSON sidecar, a brain
//! mask, a confounds table and (with ICA-AROMA) a MELODIC mixing matrix and a
//! noise-component list. The [`Index`] trait finds those for an image; the
//! filesystem implementation is [`FsIndex`].

mod index;
#[cfg(test)]
mod tests;

pub use index::FsIndex;

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use log::trace;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    constants::{DESC_POSTPROC, DESC_PREPROC},
    io::{glob_files, glob_one_file, GlobError},
};

lazy_static::lazy_static! {
    static ref ENTITY: Regex = Regex::new(r"^([a-zA-Z]+)-([a-zA-Z0-9+]+)$").unwrap();

    static ref SUFFIX: Regex = Regex::new(r"^([a-zA-Z0-9]+)((?:\.[a-zA-Z0-9]+)*)$").unwrap();
}

/// Entities that locate an image in space rather than in the acquisition.
/// Files derived from the run as a whole (confounds, MELODIC outputs) don't
/// carry them.
const SPATIAL_ENTITIES: [&str; 3] = ["space", "res", "den"];

/// The entities of a BIDS filename, e.g.
/// `sub-01_ses-a_task-rest_space-MNI152NLin2009cAsym_desc-preproc_bold.nii.gz`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidsEntities {
    /// Key-value entities in filename order.
    pub entities: IndexMap<String, String>,
    pub suffix: String,

    /// Including the leading dot, e.g. ".nii.gz". Empty if there is none.
    pub extension: String,

    /// The directory the file lives in (e.g. "func"), if it's a BIDS
    /// datatype directory.
    pub datatype: Option<String>,
}

impl BidsEntities {
    /// Parse a path's filename. Returns `None` if it isn't a BIDS filename
    /// starting with a subject.
    pub fn parse(path: &Path) -> Option<BidsEntities> {
        let name = path.file_name()?.to_str()?;
        let mut parts: Vec<&str> = name.split('_').collect();
        let last = parts.pop()?;
        let captures = SUFFIX.captures(last)?;

        let mut entities = IndexMap::new();
        for part in parts {
            let captures = ENTITY.captures(part)?;
            entities.insert(captures[1].to_string(), captures[2].to_string());
        }
        if entities.get_index(0).map(|(k, _)| k.as_str()) != Some("sub") {
            return None;
        }

        let datatype = path
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|p| p.to_str())
            .filter(|d| !d.starts_with("sub-") && !d.starts_with("ses-"))
            .map(|d| d.to_string());

        Some(BidsEntities {
            entities,
            suffix: captures[1].to_string(),
            extension: captures[2].to_string(),
            datatype,
        })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entities.get(key).map(|s| s.as_str())
    }

    pub fn subject(&self) -> &str {
        self.get("sub").expect("parsed entities always have a subject")
    }

    pub fn task(&self) -> Option<&str> {
        self.get("task")
    }

    pub fn desc(&self) -> Option<&str> {
        self.get("desc")
    }

    /// Whether `other` names the same acquisition run. Entities listed in
    /// `ignore` aren't compared; neither is `desc`.
    fn same_run(&self, other: &BidsEntities, ignore: &[&str]) -> bool {
        let compared = |k: &str| k != "desc" && !ignore.contains(&k);
        self.entities.keys().filter(|k| compared(k)).count()
            == other.entities.keys().filter(|k| compared(k)).count()
            && self.applies_to(other, ignore)
    }

    /// Whether every entity of this (raw, possibly inherited) file has the
    /// same value in `other`. `desc` and entities in `ignore` aren't
    /// compared.
    fn applies_to(&self, other: &BidsEntities, ignore: &[&str]) -> bool {
        self.entities
            .iter()
            .filter(|(k, _)| k.as_str() != "desc" && !ignore.contains(&k.as_str()))
            .all(|(k, v)| other.get(k) == Some(v.as_str()))
    }
}

/// Which preprocessed images to postprocess.
#[derive(Debug, Clone, Default)]
pub struct ImageQuery {
    pub subject: String,
    pub space: String,

    /// Empty means any task.
    pub tasks: Vec<String>,

    /// Empty means any acquisition.
    pub acquisitions: Vec<String>,
}

impl ImageQuery {
    fn matches(&self, e: &BidsEntities) -> bool {
        let in_list = |list: &[String], value: Option<&str>| {
            list.is_empty() || value.map(|v| list.iter().any(|l| l == v)).unwrap_or(false)
        };
        e.subject() == self.subject
            && e.datatype.as_deref() == Some("func")
            && e.suffix == "bold"
            && e.extension.starts_with(".nii")
            && e.desc() == Some("preproc")
            && e.get("space") == Some(self.space.as_str())
            && in_list(&self.tasks, e.task())
            && in_list(&self.acquisitions, e.get("acq"))
    }
}

/// Queries over a derivatives tree. Lookups for an image return `None` when
/// the file doesn't exist.
pub trait Index {
    /// Every subject with derivatives, sorted.
    fn get_subjects(&self) -> Vec<String>;

    /// Preprocessed BOLD images matching the query, sorted.
    fn get_images(&self, query: &ImageQuery) -> Vec<PathBuf>;

    fn get_sidecar(&self, image: &Path) -> Result<Option<PathBuf>, IndexError>;

    fn get_confounds(&self, image: &Path) -> Result<Option<PathBuf>, IndexError>;

    fn get_mask(&self, image: &Path) -> Result<Option<PathBuf>, IndexError>;

    fn get_mixing(&self, image: &Path) -> Result<Option<PathBuf>, IndexError>;

    fn get_noise(&self, image: &Path) -> Result<Option<PathBuf>, IndexError>;
}

/// An image's repetition time [seconds], from its derivatives sidecar or,
/// failing that, from the raw dataset (including top-level sidecars that
/// apply to every subject).
pub fn get_repetition_time(
    index: &dyn Index,
    image: &Path,
    bids_directory: &Path,
) -> Result<Option<f64>, IndexError> {
    if let Some(sidecar) = index.get_sidecar(image)? {
        if let Some(tr) = read_repetition_time(&sidecar)? {
            return Ok(Some(tr));
        }
    }

    // Without a raw dataset, only the derivatives can say.
    if bids_directory.as_os_str().is_empty() {
        return Ok(None);
    }
    let entities = parse_image(image)?;
    let subject = entities.subject();
    let mut candidates = glob_files(&format!(
        "{}/sub-{subject}/**/sub-{subject}_*_bold.json",
        bids_directory.display()
    ))?;
    if let Some(task) = entities.task() {
        match glob_one_file(&format!(
            "{}/task-{task}_bold.json",
            bids_directory.display()
        )) {
            Ok(top_level) => candidates.push(top_level),
            Err(GlobError::NoMatches { .. }) => (),
            Err(e) => return Err(e.into()),
        }
    }

    for candidate in candidates {
        let applies = match BidsEntities::parse(&candidate) {
            Some(raw) => raw.applies_to(&entities, &SPATIAL_ENTITIES),
            // Top-level sidecars have no subject.
            None => true,
        };
        if applies {
            trace!("Trying {} for the repetition time", candidate.display());
            if let Some(tr) = read_repetition_time(&candidate)? {
                return Ok(Some(tr));
            }
        }
    }
    Ok(None)
}

fn read_repetition_time(sidecar: &Path) -> Result<Option<f64>, IndexError> {
    let contents = std::fs::read_to_string(sidecar)?;
    let value: serde_json::Value =
        serde_json::from_str(&contents).map_err(|err| IndexError::Sidecar {
            file: sidecar.display().to_string(),
            err,
        })?;
    Ok(value.get("RepetitionTime").and_then(|tr| tr.as_f64()))
}

fn parse_image(image: &Path) -> Result<BidsEntities, IndexError> {
    BidsEntities::parse(image).ok_or_else(|| IndexError::NotBids(image.to_path_buf()))
}

/// The exported name of a preprocessed file: "desc-preproc" becomes
/// "desc-postproc".
pub fn postproc_file_name(file_name: &str) -> String {
    file_name.replacen(DESC_PREPROC, DESC_POSTPROC, 1)
}

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("There's no BIDS index at {0}; run postprocess-subjects to build it")]
    Missing(PathBuf),

    #[error("The BIDS index at {index} was built for {indexed}, not {expected}; rebuild it with --refresh-index")]
    Stale {
        index: PathBuf,
        indexed: PathBuf,
        expected: PathBuf,
    },

    #[error("Subject '{subject}' has no derivatives in {directory}")]
    SubjectNotFound { subject: String, directory: PathBuf },

    #[error("No subjects with derivatives were found in {0}")]
    NoSubjects(PathBuf),

    #[error("Subject '{subject}' has no preprocessed BOLD images in space '{space}' matching the target tasks and acquisitions")]
    NoImages { subject: String, space: String },

    #[error("{0} isn't a BIDS filename")]
    NotBids(PathBuf),

    #[error("Couldn't read sidecar {file}: {err}")]
    Sidecar {
        file: String,
        err: serde_json::Error,
    },

    #[error("Couldn't read the BIDS index {file}: {err}")]
    Read {
        file: String,
        err: serde_json::Error,
    },

    #[error("Couldn't write the BIDS index {file}: {err}")]
    Write {
        file: String,
        err: serde_json::Error,
    },

    #[error(transparent)]
    Glob(#[from] GlobError),

    #[error(transparent)]
    IO(#[from] std::io::Error),
}
