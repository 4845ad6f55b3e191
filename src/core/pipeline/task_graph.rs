//! Stage dependency graph.
//!
//! Stages are nodes; an edge `a -> b` means `a` must complete before `b` may
//! start. Data edges also name the payload handed over. Order edges carry no
//! payload and only express must-happen-before, like stitching after the
//! manifest has been written.

use std::collections::{HashMap, HashSet};
use std::fmt;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, SerStitchError};

/// One step of the export-and-stitch pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Select acquisition files
    Discover,
    /// Per-file tile export (fan-out)
    Export,
    /// Manifest writing (fan-in)
    Aggregate,
    /// Mosaic composition
    Stitch,
}

impl Stage {
    /// Stable lower-case name used in logs and errors
    pub fn name(self) -> &'static str {
        match self {
            Self::Discover => "discovering",
            Self::Export => "exporting",
            Self::Aggregate => "aggregating",
            Self::Stitch => "stitching",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Kind of a must-happen-before edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dependency {
    /// The upstream stage's output is the downstream stage's input
    Data(&'static str),
    /// Ordering only, nothing is handed over
    Order,
}

/// Directed acyclic graph of stages.
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    graph: DiGraph<Stage, Dependency>,
    nodes: HashMap<Stage, NodeIndex>,
}

impl TaskGraph {
    /// Empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Discover → export → aggregate, plus the payload-less
    /// aggregate → stitch edge when stitching is enabled.
    pub fn export_and_stitch(stitch_enabled: bool) -> Self {
        let mut graph = Self::new();
        graph.add_dependency(Stage::Discover, Stage::Export, Dependency::Data("input files"));
        graph.add_dependency(Stage::Export, Stage::Aggregate, Dependency::Data("export records"));
        if stitch_enabled {
            graph.add_dependency(Stage::Aggregate, Stage::Stitch, Dependency::Order);
        }
        graph
    }

    fn node(&mut self, stage: Stage) -> NodeIndex {
        if let Some(&index) = self.nodes.get(&stage) {
            return index;
        }
        let index = self.graph.add_node(stage);
        self.nodes.insert(stage, index);
        index
    }

    /// Record that `before` must complete before `after` starts
    pub fn add_dependency(&mut self, before: Stage, after: Stage, dependency: Dependency) {
        let from = self.node(before);
        let to = self.node(after);
        self.graph.update_edge(from, to, dependency);
    }

    /// Whether the stage is part of this run
    pub fn contains(&self, stage: Stage) -> bool {
        self.nodes.contains_key(&stage)
    }

    /// Stages in an order that honors every edge
    pub fn execution_order(&self) -> Result<Vec<Stage>> {
        toposort(&self.graph, None)
            .map(|order| order.into_iter().map(|index| self.graph[index]).collect())
            .map_err(|cycle| {
                SerStitchError::internal(format!(
                    "stage graph has a cycle through '{}'",
                    self.graph[cycle.node_id()]
                ))
            })
    }

    /// Direct predecessors of a stage with the kind of each edge
    pub fn prerequisites(&self, stage: Stage) -> Vec<(Stage, Dependency)> {
        let Some(&index) = self.nodes.get(&stage) else {
            return Vec::new();
        };
        let mut prerequisites: Vec<(Stage, Dependency)> = self
            .graph
            .edges_directed(index, Direction::Incoming)
            .map(|edge| (self.graph[edge.source()], *edge.weight()))
            .collect();
        prerequisites.sort_by_key(|(stage, _)| *stage);
        prerequisites
    }

    /// Stages that directly wait on this one
    pub fn successors(&self, stage: Stage) -> Vec<Stage> {
        let Some(&index) = self.nodes.get(&stage) else {
            return Vec::new();
        };
        let mut successors: Vec<Stage> = self
            .graph
            .neighbors_directed(index, Direction::Outgoing)
            .map(|next| self.graph[next])
            .collect();
        successors.sort();
        successors
    }

    /// A stage may start once every predecessor has completed
    pub fn is_ready(&self, stage: Stage, completed: &HashSet<Stage>) -> bool {
        self.contains(stage)
            && self
                .prerequisites(stage)
                .iter()
                .all(|(before, _)| completed.contains(before))
    }
}
