// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Nodes and the values that flow between their ports.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::{scrub::ScrubVector, steps::StepError};

/// A value on a port.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    File(PathBuf),
    Float(f64),
    ScrubVector(ScrubVector),
}

impl From<PathBuf> for Value {
    fn from(p: PathBuf) -> Self {
        Value::File(p)
    }
}

impl From<&Path> for Value {
    fn from(p: &Path) -> Self {
        Value::File(p.to_path_buf())
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<ScrubVector> for Value {
    fn from(v: ScrubVector) -> Self {
        Value::ScrubVector(v)
    }
}

/// Named port values, in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortValues(IndexMap<String, Value>);

impl PortValues {
    pub fn new() -> PortValues {
        PortValues::default()
    }

    pub fn insert<V: Into<Value>>(&mut self, port: &str, value: V) {
        self.0.insert(port.to_string(), value.into());
    }

    /// Builder-style [`PortValues::insert`].
    pub fn with<V: Into<Value>>(mut self, port: &str, value: V) -> PortValues {
        self.insert(port, value);
        self
    }

    pub fn get(&self, port: &str) -> Option<&Value> {
        self.0.get(port)
    }

    pub fn contains(&self, port: &str) -> bool {
        self.0.contains_key(port)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn file(&self, port: &str) -> Result<&Path, StepError> {
        match self.0.get(port) {
            Some(Value::File(p)) => Ok(p),
            Some(_) => Err(StepError::WrongPortType {
                port: port.to_string(),
                expected: "file",
            }),
            None => Err(StepError::MissingInput {
                port: port.to_string(),
            }),
        }
    }

    pub fn optional_file(&self, port: &str) -> Result<Option<&Path>, StepError> {
        if self.contains(port) {
            self.file(port).map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn float(&self, port: &str) -> Result<f64, StepError> {
        match self.0.get(port) {
            Some(Value::Float(f)) => Ok(*f),
            Some(_) => Err(StepError::WrongPortType {
                port: port.to_string(),
                expected: "float",
            }),
            None => Err(StepError::MissingInput {
                port: port.to_string(),
            }),
        }
    }

    pub fn scrub_vector(&self, port: &str) -> Result<&ScrubVector, StepError> {
        match self.0.get(port) {
            Some(Value::ScrubVector(v)) => Ok(v),
            Some(_) => Err(StepError::WrongPortType {
                port: port.to_string(),
                expected: "scrub vector",
            }),
            None => Err(StepError::MissingInput {
                port: port.to_string(),
            }),
        }
    }

    pub fn optional_scrub_vector(&self, port: &str) -> Result<Option<&ScrubVector>, StepError> {
        if self.contains(port) {
            self.scrub_vector(port).map(Some)
        } else {
            Ok(None)
        }
    }
}

/// A unit of work in a workflow. A node reads its inputs, writes anything it
/// produces under its own directory and returns its outputs.
pub trait Node: Send + Sync {
    /// A short description of what the node does, e.g. "butterworth".
    fn kind(&self) -> String;

    fn run(&self, inputs: &PortValues, node_dir: &Path) -> Result<PortValues, StepError>;
}
