// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use itertools::Itertools;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::{parse_image, BidsEntities, ImageQuery, Index, IndexError, SPATIAL_ENTITIES};
use crate::{constants::BIDS_INDEX_FILENAME, io::glob_files};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct IndexedFile {
    /// Relative to the indexed directory.
    path: PathBuf,
    entities: BidsEntities,
}

/// An index of every BIDS-named file below a derivatives directory, stored as
/// JSON so that child jobs don't have to walk the tree again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FsIndex {
    root: PathBuf,
    files: Vec<IndexedFile>,
}

/// What a lookup for one of an image's companion files is looking for.
struct Companion<'a> {
    desc: Option<&'a str>,
    suffix: &'a str,
    extension: &'a str,

    /// Companions of the whole run don't share the image's space.
    whole_run: bool,
}

impl FsIndex {
    /// Walk `root` and index every file below its subject directories.
    pub fn build(root: &Path) -> Result<FsIndex, IndexError> {
        let mut files: Vec<IndexedFile> =
            glob_files(&format!("{}/sub-*/**/sub-*", root.display()))?
                .into_iter()
                .filter(|p| p.is_file())
                .filter_map(|p| {
                    let entities = BidsEntities::parse(&p)?;
                    let path = p.strip_prefix(root).ok()?.to_path_buf();
                    Some(IndexedFile { path, entities })
                })
                .collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        info!("Indexed {} files in {}", files.len(), root.display());
        Ok(FsIndex {
            root: root.to_path_buf(),
            files,
        })
    }

    /// Open an existing index. `root` is the directory it must have been
    /// built for.
    pub fn open(db_path: &Path, root: &Path) -> Result<FsIndex, IndexError> {
        let file = db_path.join(BIDS_INDEX_FILENAME);
        if !file.exists() {
            return Err(IndexError::Missing(db_path.to_path_buf()));
        }
        let index: FsIndex = serde_json::from_reader(BufReader::new(File::open(&file)?))
            .map_err(|err| IndexError::Read {
                file: file.display().to_string(),
                err,
            })?;
        if index.root != root {
            return Err(IndexError::Stale {
                index: db_path.to_path_buf(),
                indexed: index.root,
                expected: root.to_path_buf(),
            });
        }
        debug!("Opened the BIDS index {}", file.display());
        Ok(index)
    }

    /// Open the index at `db_path`, building (and saving) it if it doesn't
    /// exist, is for another directory, or `refresh` is set.
    pub fn open_or_build(db_path: &Path, root: &Path, refresh: bool) -> Result<FsIndex, IndexError> {
        if !refresh {
            match FsIndex::open(db_path, root) {
                Ok(index) => return Ok(index),
                Err(IndexError::Missing(_) | IndexError::Stale { .. }) => (),
                Err(e) => return Err(e),
            }
        }
        let index = FsIndex::build(root)?;
        index.save(db_path)?;
        Ok(index)
    }

    pub fn save(&self, db_path: &Path) -> Result<(), IndexError> {
        std::fs::create_dir_all(db_path)?;
        let file = db_path.join(BIDS_INDEX_FILENAME);
        let mut f = BufWriter::new(File::create(&file)?);
        serde_json::to_writer(&mut f, self).map_err(|err| IndexError::Write {
            file: file.display().to_string(),
            err,
        })?;
        f.flush()?;
        debug!("Saved the BIDS index to {}", file.display());
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether `subject` has any derivatives.
    pub fn has_subject(&self, subject: &str) -> bool {
        self.files.iter().any(|f| f.entities.subject() == subject)
    }

    fn find(&self, image: &Path, companion: Companion) -> Result<Option<PathBuf>, IndexError> {
        let image = parse_image(image)?;
        let ignore: &[&str] = if companion.whole_run {
            &SPATIAL_ENTITIES
        } else {
            &[]
        };
        let found = self
            .files
            .iter()
            .find(|f| {
                let e = &f.entities;
                e.suffix == companion.suffix
                    && e.extension == companion.extension
                    && e.desc() == companion.desc
                    && e.same_run(&image, ignore)
            })
            .map(|f| self.root.join(&f.path));
        Ok(found)
    }
}

impl Index for FsIndex {
    fn get_subjects(&self) -> Vec<String> {
        self.files
            .iter()
            .map(|f| f.entities.subject().to_string())
            .unique()
            .sorted()
            .collect()
    }

    fn get_images(&self, query: &ImageQuery) -> Vec<PathBuf> {
        self.files
            .iter()
            .filter(|f| query.matches(&f.entities))
            .map(|f| self.root.join(&f.path))
            .collect()
    }

    fn get_sidecar(&self, image: &Path) -> Result<Option<PathBuf>, IndexError> {
        let entities = parse_image(image)?;
        self.find(
            image,
            Companion {
                desc: entities.desc(),
                suffix: &entities.suffix,
                extension: ".json",
                whole_run: false,
            },
        )
    }

    fn get_confounds(&self, image: &Path) -> Result<Option<PathBuf>, IndexError> {
        // Older fMRIPrep releases call them "regressors".
        for suffix in ["timeseries", "regressors"] {
            let found = self.find(
                image,
                Companion {
                    desc: Some("confounds"),
                    suffix,
                    extension: ".tsv",
                    whole_run: true,
                },
            )?;
            if found.is_some() {
                return Ok(found);
            }
        }
        Ok(None)
    }

    fn get_mask(&self, image: &Path) -> Result<Option<PathBuf>, IndexError> {
        let entities = parse_image(image)?;
        self.find(
            image,
            Companion {
                desc: Some("brain"),
                suffix: "mask",
                extension: &entities.extension,
                whole_run: false,
            },
        )
    }

    fn get_mixing(&self, image: &Path) -> Result<Option<PathBuf>, IndexError> {
        self.find(
            image,
            Companion {
                desc: Some("MELODIC"),
                suffix: "mixing",
                extension: ".tsv",
                whole_run: true,
            },
        )
    }

    fn get_noise(&self, image: &Path) -> Result<Option<PathBuf>, IndexError> {
        self.find(
            image,
            Companion {
                desc: None,
                suffix: "AROMAnoiseICs",
                extension: ".csv",
                whole_run: true,
            },
        )
    }
}
