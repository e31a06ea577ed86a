//! Mod/ref summarization: which memory nodes enter and exit lambdas,
//! calls and the looping/branching structural nodes.

use crate::analyses::points_to_graph::{MemoryNodeId, PointsToGraph};
use crate::core::{NodeId, Origin};
use std::collections::BTreeSet;

/// The interface the memory-state encoder consumes.
pub trait ModRefSummary {
    fn points_to_graph(&self) -> &PointsToGraph;

    /// Memory nodes split out of the lambda's entry state.
    fn lambda_entry_nodes(&self, lambda: NodeId) -> BTreeSet<MemoryNodeId>;

    /// Memory nodes merged into the lambda's exit state.
    fn lambda_exit_nodes(&self, lambda: NodeId) -> BTreeSet<MemoryNodeId>;

    fn call_entry_nodes(&self, call: NodeId) -> BTreeSet<MemoryNodeId>;

    fn call_exit_nodes(&self, call: NodeId) -> BTreeSet<MemoryNodeId>;

    fn gamma_entry_nodes(&self, gamma: NodeId) -> BTreeSet<MemoryNodeId>;

    fn gamma_exit_nodes(&self, gamma: NodeId) -> BTreeSet<MemoryNodeId>;

    fn theta_entry_exit_nodes(&self, theta: NodeId) -> BTreeSet<MemoryNodeId>;

    /// Memory nodes potentially reached through a pointer output.
    fn output_nodes(&self, output: Origin) -> BTreeSet<MemoryNodeId>;
}

/// The lifetime-agnostic summarizer: the full memory-node set everywhere,
/// trading precision for linear-time construction.
pub struct AgnosticModRefSummarizer {
    points_to_graph: PointsToGraph,
    all: BTreeSet<MemoryNodeId>,
}

impl AgnosticModRefSummarizer {
    pub fn create(points_to_graph: PointsToGraph) -> AgnosticModRefSummarizer {
        let all = points_to_graph.memory_node_ids();
        AgnosticModRefSummarizer {
            points_to_graph,
            all,
        }
    }
}

impl ModRefSummary for AgnosticModRefSummarizer {
    fn points_to_graph(&self) -> &PointsToGraph {
        &self.points_to_graph
    }

    fn lambda_entry_nodes(&self, _lambda: NodeId) -> BTreeSet<MemoryNodeId> {
        self.all.clone()
    }

    fn lambda_exit_nodes(&self, _lambda: NodeId) -> BTreeSet<MemoryNodeId> {
        self.all.clone()
    }

    fn call_entry_nodes(&self, _call: NodeId) -> BTreeSet<MemoryNodeId> {
        self.all.clone()
    }

    fn call_exit_nodes(&self, _call: NodeId) -> BTreeSet<MemoryNodeId> {
        self.all.clone()
    }

    fn gamma_entry_nodes(&self, _gamma: NodeId) -> BTreeSet<MemoryNodeId> {
        self.all.clone()
    }

    fn gamma_exit_nodes(&self, _gamma: NodeId) -> BTreeSet<MemoryNodeId> {
        self.all.clone()
    }

    fn theta_entry_exit_nodes(&self, _theta: NodeId) -> BTreeSet<MemoryNodeId> {
        self.all.clone()
    }

    fn output_nodes(&self, output: Origin) -> BTreeSet<MemoryNodeId> {
        self.points_to_graph.output_nodes(output)
    }
}
