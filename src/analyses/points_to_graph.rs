//! The points-to graph: abstract memory objects and, for every pointer
//! output, the set of objects it may refer to.

use crate::core::{NodeId, Origin};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Stable index of a memory node in its points-to graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemoryNodeId(pub(crate) usize);

impl fmt::Display for MemoryNodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

/// The abstract runtime object a memory node stands for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MemoryNodeKind {
    /// Everything the module cannot see.
    External,
    Alloca(NodeId),
    Malloc(NodeId),
    Global(NodeId),
    Lambda(NodeId),
    /// A root-region import, by argument index.
    Import(usize),
}

/// What a pointer register may refer to.
#[derive(Clone, Debug, Default)]
pub struct RegisterTargets {
    pub targets: BTreeSet<MemoryNodeId>,
    /// The register may point to unknown memory.
    pub unknown: bool,
}

/// The result of the points-to analysis.
#[derive(Debug, Default)]
pub struct PointsToGraph {
    memory_nodes: Vec<MemoryNodeKind>,
    registers: HashMap<Origin, RegisterTargets>,
    escaped: BTreeSet<MemoryNodeId>,
    by_alloca: HashMap<NodeId, MemoryNodeId>,
    by_malloc: HashMap<NodeId, MemoryNodeId>,
    by_global: HashMap<NodeId, MemoryNodeId>,
    by_lambda: HashMap<NodeId, MemoryNodeId>,
    by_import: HashMap<usize, MemoryNodeId>,
}

impl PointsToGraph {
    pub fn new() -> PointsToGraph {
        let mut graph = PointsToGraph::default();
        graph.memory_nodes.push(MemoryNodeKind::External);
        graph
    }

    pub fn external_node(&self) -> MemoryNodeId {
        MemoryNodeId(0)
    }

    pub(crate) fn add_memory_node(&mut self, kind: MemoryNodeKind) -> MemoryNodeId {
        let existing = match &kind {
            MemoryNodeKind::External => return self.external_node(),
            MemoryNodeKind::Alloca(node) => self.by_alloca.get(node),
            MemoryNodeKind::Malloc(node) => self.by_malloc.get(node),
            MemoryNodeKind::Global(node) => self.by_global.get(node),
            MemoryNodeKind::Lambda(node) => self.by_lambda.get(node),
            MemoryNodeKind::Import(index) => self.by_import.get(index),
        };
        if let Some(id) = existing {
            return *id;
        }
        let id = MemoryNodeId(self.memory_nodes.len());
        match &kind {
            MemoryNodeKind::External => unreachable!(),
            MemoryNodeKind::Alloca(node) => {
                self.by_alloca.insert(*node, id);
            }
            MemoryNodeKind::Malloc(node) => {
                self.by_malloc.insert(*node, id);
            }
            MemoryNodeKind::Global(node) => {
                self.by_global.insert(*node, id);
            }
            MemoryNodeKind::Lambda(node) => {
                self.by_lambda.insert(*node, id);
            }
            MemoryNodeKind::Import(index) => {
                self.by_import.insert(*index, id);
            }
        }
        self.memory_nodes.push(kind);
        id
    }

    pub(crate) fn set_register(&mut self, origin: Origin, targets: RegisterTargets) {
        self.registers.insert(origin, targets);
    }

    pub(crate) fn mark_escaped(&mut self, id: MemoryNodeId) {
        self.escaped.insert(id);
    }

    pub fn kind(&self, id: MemoryNodeId) -> &MemoryNodeKind {
        &self.memory_nodes[id.0]
    }

    pub fn nmemory_nodes(&self) -> usize {
        self.memory_nodes.len()
    }

    /// Every memory node of the graph, the external sentinel included.
    pub fn memory_node_ids(&self) -> BTreeSet<MemoryNodeId> {
        (0..self.memory_nodes.len()).map(MemoryNodeId).collect()
    }

    pub fn alloca_node(&self, node: NodeId) -> Option<MemoryNodeId> {
        self.by_alloca.get(&node).copied()
    }

    pub fn malloc_node(&self, node: NodeId) -> Option<MemoryNodeId> {
        self.by_malloc.get(&node).copied()
    }

    pub fn global_node(&self, node: NodeId) -> Option<MemoryNodeId> {
        self.by_global.get(&node).copied()
    }

    pub fn lambda_node(&self, node: NodeId) -> Option<MemoryNodeId> {
        self.by_lambda.get(&node).copied()
    }

    pub fn import_node(&self, argument: usize) -> Option<MemoryNodeId> {
        self.by_import.get(&argument).copied()
    }

    /// The recorded register targets for a pointer output.
    pub fn register_targets(&self, origin: Origin) -> Option<&RegisterTargets> {
        self.registers.get(&origin)
    }

    pub fn escaped(&self) -> &BTreeSet<MemoryNodeId> {
        &self.escaped
    }

    /// The memory nodes potentially reached through a pointer output. A
    /// register that may point to unknown memory also reaches the escaped
    /// nodes and the external sentinel.
    pub fn output_nodes(&self, origin: Origin) -> BTreeSet<MemoryNodeId> {
        let mut nodes = BTreeSet::new();
        if let Some(targets) = self.registers.get(&origin) {
            nodes.extend(targets.targets.iter().copied());
            if targets.unknown {
                nodes.insert(self.external_node());
                nodes.extend(self.escaped.iter().copied());
            }
        }
        nodes
    }
}
