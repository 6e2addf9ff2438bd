// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! A directed acyclic graph of nodes and its executor.
//!
//! Nodes run level by level: every node whose upstream nodes have all
//! finished is started, and nodes within a level run in parallel. Each node
//! gets its own directory under `<base_dir>/<workflow name>/`; when a node
//! fails, its directory is kept along with a `crash.txt` describing the
//! failure, and nothing downstream of it runs.

use std::{
    fmt::Write as _,
    path::{Path, PathBuf},
};

use indexmap::IndexMap;
use itertools::Itertools;
use log::{debug, info, trace};
use rayon::prelude::*;

use super::{ExecutionError, Node, PipelineError, PortValues, Value, WorkflowError};
use crate::steps::StepError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub from: String,
    pub from_port: String,
    pub to: String,
    pub to_port: String,
}

pub struct Workflow {
    name: String,
    base_dir: PathBuf,
    nodes: IndexMap<String, Box<dyn Node>>,
    static_inputs: IndexMap<String, PortValues>,
    edges: Vec<Edge>,
}

/// The outputs of every node of a finished workflow.
pub type WorkflowOutputs = IndexMap<String, PortValues>;

impl Workflow {
    pub fn new(name: &str, base_dir: &Path) -> Workflow {
        Workflow {
            name: name.to_string(),
            base_dir: base_dir.to_path_buf(),
            nodes: IndexMap::new(),
            static_inputs: IndexMap::new(),
            edges: vec![],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn workflow_dir(&self) -> PathBuf {
        self.base_dir.join(&self.name)
    }

    pub fn node_dir(&self, node: &str) -> PathBuf {
        self.workflow_dir().join(node)
    }

    pub fn add_node<N: Node + 'static>(&mut self, name: &str, node: N) -> Result<(), PipelineError> {
        self.add_boxed_node(name, Box::new(node))
    }

    pub fn add_boxed_node(&mut self, name: &str, node: Box<dyn Node>) -> Result<(), PipelineError> {
        if self.nodes.contains_key(name) {
            return Err(PipelineError::DuplicateNode(name.to_string()));
        }
        self.nodes.insert(name.to_string(), node);
        self.static_inputs.insert(name.to_string(), PortValues::new());
        Ok(())
    }

    pub fn contains(&self, node: &str) -> bool {
        self.nodes.contains_key(node)
    }

    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(|k| k.as_str())
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Give a node's input port a fixed value.
    pub fn set_input<V: Into<Value>>(
        &mut self,
        node: &str,
        port: &str,
        value: V,
    ) -> Result<(), PipelineError> {
        self.static_inputs
            .get_mut(node)
            .ok_or_else(|| PipelineError::UnknownNode(node.to_string()))?
            .insert(port, value);
        Ok(())
    }

    /// Feed `from`'s output port into `to`'s input port.
    pub fn connect(
        &mut self,
        from: &str,
        from_port: &str,
        to: &str,
        to_port: &str,
    ) -> Result<(), PipelineError> {
        for node in [from, to] {
            if !self.contains(node) {
                return Err(PipelineError::UnknownNode(node.to_string()));
            }
        }
        if self.edges.iter().any(|e| e.to == to && e.to_port == to_port) {
            return Err(PipelineError::DuplicateConnection {
                node: to.to_string(),
                port: to_port.to_string(),
            });
        }
        self.edges.push(Edge {
            from: from.to_string(),
            from_port: from_port.to_string(),
            to: to.to_string(),
            to_port: to_port.to_string(),
        });
        Ok(())
    }

    /// Group nodes into levels; every node's upstream nodes are in earlier
    /// levels. Within a level, nodes keep the order they were added in.
    pub fn levels(&self) -> Result<Vec<Vec<&str>>, PipelineError> {
        let mut in_degree: IndexMap<&str, usize> =
            self.nodes.keys().map(|n| (n.as_str(), 0)).collect();
        for edge in &self.edges {
            *in_degree
                .get_mut(edge.to.as_str())
                .expect("edges only join known nodes") += 1;
        }

        let mut levels = vec![];
        let mut remaining = in_degree.len();
        let mut ready: Vec<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(&n, _)| n)
            .collect();
        while !ready.is_empty() {
            remaining -= ready.len();
            let mut next = vec![];
            for &node in &ready {
                for edge in self.edges.iter().filter(|e| e.from == node) {
                    let d = in_degree
                        .get_mut(edge.to.as_str())
                        .expect("edges only join known nodes");
                    *d -= 1;
                    if *d == 0 {
                        next.push(edge.to.as_str());
                    }
                }
            }
            next.sort_by_key(|n| self.nodes.get_index_of(*n));
            levels.push(std::mem::replace(&mut ready, next));
        }

        if remaining > 0 {
            let placed: Vec<&str> = levels.iter().flatten().copied().collect();
            return Err(PipelineError::Cycle {
                nodes: self
                    .node_names()
                    .filter(|n| !placed.contains(n))
                    .join(", "),
            });
        }
        Ok(levels)
    }

    /// All nodes in execution order.
    pub fn topological_order(&self) -> Result<Vec<&str>, PipelineError> {
        Ok(self.levels()?.into_iter().flatten().collect())
    }

    /// Run every node. Nothing runs if the graph has a cycle.
    pub fn run(&self) -> Result<WorkflowOutputs, WorkflowError> {
        let levels = self.levels()?;
        info!(
            "Running workflow '{}' ({} nodes) in {}",
            self.name,
            self.nodes.len(),
            self.workflow_dir().display()
        );

        let mut outputs: WorkflowOutputs = IndexMap::new();
        for level in levels {
            let results: Vec<Result<(String, PortValues), ExecutionError>> = level
                .par_iter()
                .map(|&name| {
                    let node_dir = self.node_dir(name);
                    self.run_node(name, &node_dir, &outputs)
                        .map(|out| (name.to_string(), out))
                        .map_err(|source| {
                            write_crash_file(&node_dir, name, &source);
                            ExecutionError {
                                node: name.to_string(),
                                node_dir,
                                source,
                            }
                        })
                })
                .collect();
            for result in results {
                let (name, out) = result?;
                outputs.insert(name, out);
            }
        }

        debug!("Workflow '{}' finished", self.name);
        Ok(outputs)
    }

    fn run_node(
        &self,
        name: &str,
        node_dir: &Path,
        finished: &WorkflowOutputs,
    ) -> Result<PortValues, StepError> {
        let node = &self.nodes[name];
        let mut inputs = self.static_inputs[name].clone();
        for edge in self.edges.iter().filter(|e| e.to == name) {
            if let Some(v) = finished
                .get(&edge.from)
                .and_then(|out| out.get(&edge.from_port))
            {
                inputs.insert(&edge.to_port, v.clone());
            }
        }

        std::fs::create_dir_all(node_dir)?;
        debug!("Running node '{name}' ({})", node.kind());
        for (port, value) in inputs.iter() {
            trace!("  {name}.{port} = {value:?}");
        }
        node.run(&inputs, node_dir)
    }

    /// Render the graph in Graphviz DOT.
    pub fn to_dot(&self) -> String {
        let mut dot = String::new();
        let _ = writeln!(dot, "digraph \"{}\" {{", self.name);
        let _ = writeln!(dot, "  rankdir=TB;");
        for (name, node) in &self.nodes {
            let _ = writeln!(dot, "  \"{name}\" [label=\"{name}\\n({})\"];", node.kind());
        }
        for e in &self.edges {
            let _ = writeln!(
                dot,
                "  \"{}\" -> \"{}\" [label=\"{} -> {}\"];",
                e.from, e.to, e.from_port, e.to_port
            );
        }
        dot.push_str("}\n");
        dot
    }

    pub fn write_graph(&self, path: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_dot())
    }
}

fn write_crash_file(node_dir: &Path, name: &str, error: &StepError) {
    let contents = format!("Node: {name}\nError: {error}\nDebug: {error:?}\n");
    if std::fs::create_dir_all(node_dir).is_ok() {
        let _ = std::fs::write(node_dir.join("crash.txt"), contents);
    }
}
