//! Region traversers honoring dependency order.
//!
//! Both traversers are restartable: the graph may be mutated between
//! `next` calls as long as new nodes are inserted either in
//! already-yielded positions or after the cursor. When the internal queue
//! runs dry the traverser rescans the region for ready nodes, so the
//! documented restart-after-rewrite pattern needs no extra bookkeeping.

use crate::core::graph::{Graph, NodeId, Origin, RegionId, User};
use std::collections::{HashSet, VecDeque};

/// Yields a node only after every node that owns one of its input origins
/// in the same region has been yielded; a topological order on the
/// intra-region DAG. Structural nodes are yielded as a single unit.
pub struct TopDownTraverser {
    region: RegionId,
    visited: HashSet<NodeId>,
    queue: VecDeque<NodeId>,
}

impl TopDownTraverser {
    pub fn new(graph: &Graph, region: RegionId) -> TopDownTraverser {
        let queue = graph.region(region).top_nodes().iter().copied().collect();
        TopDownTraverser {
            region,
            visited: HashSet::new(),
            queue,
        }
    }

    fn is_ready(&self, graph: &Graph, node: NodeId) -> bool {
        graph.node(node).inputs().iter().all(|i| match i.origin() {
            Origin::Output(pred, _) => self.visited.contains(&pred),
            Origin::Argument(..) => true,
        })
    }

    pub fn next(&mut self, graph: &Graph) -> Option<NodeId> {
        loop {
            match self.queue.pop_front() {
                Some(node) => {
                    if !graph.is_alive(node)
                        || self.visited.contains(&node)
                        || graph.node(node).region() != self.region
                    {
                        continue;
                    }
                    if !self.is_ready(graph, node) {
                        // re-enqueued when its last predecessor is yielded
                        continue;
                    }
                    self.visited.insert(node);
                    for output in 0..graph.node(node).noutputs() {
                        for user in graph.users(Origin::Output(node, output)) {
                            if let User::Input(succ, _) = user {
                                if graph.node(succ).region() == self.region {
                                    self.queue.push_back(succ);
                                }
                            }
                        }
                    }
                    return Some(node);
                }
                None => {
                    // rescan: nodes inserted during traversal
                    let pending: Vec<NodeId> = graph
                        .region(self.region)
                        .nodes()
                        .iter()
                        .copied()
                        .filter(|n| !self.visited.contains(n) && self.is_ready(graph, *n))
                        .collect();
                    if pending.is_empty() {
                        return None;
                    }
                    self.queue.extend(pending);
                }
            }
        }
    }

    pub fn into_vec(mut self, graph: &Graph) -> Vec<NodeId> {
        let mut order = Vec::new();
        while let Some(node) = self.next(graph) {
            order.push(node);
        }
        order
    }
}

/// Dual of [`TopDownTraverser`]: a node is yielded only after every node
/// reading one of its outputs in the same region has been yielded.
pub struct BottomUpTraverser {
    region: RegionId,
    visited: HashSet<NodeId>,
    queue: VecDeque<NodeId>,
}

impl BottomUpTraverser {
    pub fn new(graph: &Graph, region: RegionId) -> BottomUpTraverser {
        let queue = graph
            .region(region)
            .bottom_nodes()
            .iter()
            .copied()
            .collect();
        BottomUpTraverser {
            region,
            visited: HashSet::new(),
            queue,
        }
    }

    fn is_ready(&self, graph: &Graph, node: NodeId) -> bool {
        (0..graph.node(node).noutputs()).all(|output| {
            graph
                .users(Origin::Output(node, output))
                .into_iter()
                .all(|user| match user {
                    User::Input(succ, _) => {
                        graph.node(succ).region() != self.region || self.visited.contains(&succ)
                    }
                    User::Result(..) => true,
                })
        })
    }

    pub fn next(&mut self, graph: &Graph) -> Option<NodeId> {
        loop {
            match self.queue.pop_front() {
                Some(node) => {
                    if !graph.is_alive(node)
                        || self.visited.contains(&node)
                        || graph.node(node).region() != self.region
                    {
                        continue;
                    }
                    if !self.is_ready(graph, node) {
                        continue;
                    }
                    self.visited.insert(node);
                    for input in graph.node(node).inputs() {
                        if let Origin::Output(pred, _) = input.origin() {
                            self.queue.push_back(pred);
                        }
                    }
                    return Some(node);
                }
                None => {
                    let pending: Vec<NodeId> = graph
                        .region(self.region)
                        .nodes()
                        .iter()
                        .copied()
                        .filter(|n| !self.visited.contains(n) && self.is_ready(graph, *n))
                        .collect();
                    if pending.is_empty() {
                        return None;
                    }
                    self.queue.extend(pending);
                }
            }
        }
    }

    pub fn into_vec(mut self, graph: &Graph) -> Vec<NodeId> {
        let mut order = Vec::new();
        while let Some(node) = self.next(graph) {
            order.push(node);
        }
        order
    }
}
