//! Normalization: eager insertion-time reductions, the graph-wide fixed
//! point, common-subexpression elimination and associative flattening.
//!
//! A rewrite never increases the node weight (node count, then total input
//! count), so the fixed point terminates.

use crate::core::gamma;
use crate::core::graph::{Graph, NodeId, Origin, RegionId};
use crate::core::operation::{
    BinaryOperation, FlattenedBinaryOperation, Operation, BINOP_REDUCTION_NONE,
    UNOP_REDUCTION_NONE,
};
use crate::core::theta;
use anyhow::Result;
use std::collections::VecDeque;
use tracing::trace;

/// How a flattened n-ary application is re-serialized into binary nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlattenMode {
    /// Left-linear chain.
    Linear,
    /// Balanced tree of independent applications.
    Parallel,
}

impl Graph {
    /// Creates a simple node with eager normalization: the operation's own
    /// rewrite hook, the unary/binary reducers and CSE are consulted first
    /// when the operation kind's `mutable` policy is on. Returns the
    /// origins standing for the operation's results.
    pub fn create_normalized(
        &mut self,
        region: RegionId,
        operation: Box<dyn Operation>,
        operands: &[Origin],
    ) -> Result<Vec<Origin>> {
        let policy = self.policy_of(operation.as_ref());
        if policy.mutable {
            if let Some(outputs) = operation.normalize(self, region, operands)? {
                return Ok(outputs);
            }
            if operands.len() == 1 {
                if let Some(unary) = operation.as_unary() {
                    let path = unary.can_reduce_operand(self, operands[0]);
                    if path != UNOP_REDUCTION_NONE {
                        let replacement = unary.reduce_operand(self, path, operands[0])?;
                        return Ok(vec![replacement]);
                    }
                }
            }
            if operands.len() == 2 {
                if let Some(binary) = operation.as_binary() {
                    let path = binary.can_reduce_operand_pair(self, operands[0], operands[1]);
                    if path != BINOP_REDUCTION_NONE {
                        let replacement =
                            binary.reduce_operand_pair(self, path, operands[0], operands[1])?;
                        return Ok(vec![replacement]);
                    }
                }
            }
            if policy.cse {
                if let Some(node) = self.find_congruent_node(region, operation.as_ref(), operands)
                {
                    return Ok(self.outputs(node));
                }
            }
        }

        let node = self.add_simple_node(region, operation, operands)?;
        Ok(self.outputs(node))
    }

    /// Runs all enabled reductions until no reducer returns a new result.
    pub fn normalize(&mut self) -> Result<()> {
        loop {
            let mut changed = false;
            let mut worklist: VecDeque<NodeId> = {
                let mut nodes = self.live_nodes();
                nodes.sort_by_key(|n| self.node(*n).depth());
                nodes.into_iter().collect()
            };
            while let Some(node) = worklist.pop_front() {
                if !self.is_alive(node) {
                    continue;
                }
                let rewrote = if self.node(node).is_structural() {
                    normalize_structural_node(self, node)?
                } else {
                    normalize_simple_node(self, node)?
                };
                changed |= rewrote;
            }
            if !changed {
                break;
            }
        }
        self.denormalized = false;
        Ok(())
    }
}

fn replace_node(graph: &mut Graph, node: NodeId, replacements: &[Origin]) -> Result<()> {
    let outputs = graph.outputs(node);
    assert_eq!(outputs.len(), replacements.len());
    for (output, replacement) in outputs.into_iter().zip(replacements.iter()) {
        graph.divert_users(output, *replacement)?;
    }
    graph.remove_node(node);
    Ok(())
}

/// Collects the transitive operand list of an associative application by
/// looking through producers of the same operation (or its flattened form).
fn associative_operands(
    graph: &Graph,
    operation: &dyn Operation,
    operands: &[Origin],
) -> Vec<Origin> {
    let mut flattened = Vec::new();
    for operand in operands {
        let inline = match graph.origin_node(*operand) {
            Some(producer) => {
                let producer_op = graph.node(producer).operation();
                let same = producer_op.eq_operation(operation);
                let same_flattened = producer_op
                    .downcast_ref::<FlattenedBinaryOperation>()
                    .map(|f| f.bin_operation().eq_operation(operation))
                    .unwrap_or(false);
                same || same_flattened
            }
            None => false,
        };
        if inline {
            let producer = graph.origin_node(*operand).unwrap();
            flattened.extend(graph.operands(producer));
        } else {
            flattened.push(*operand);
        }
    }
    flattened
}

/// Pairwise reduction over an operand list; commutative operations try all
/// pairs, others only adjacent ones.
fn pairwise_reduce(
    graph: &mut Graph,
    operation: &dyn BinaryOperation,
    operands: Vec<Origin>,
) -> Result<Vec<Origin>> {
    let mut current = operands;
    loop {
        let mut reduced = false;
        'scan: for i in 0..current.len() {
            let limit = if operation.is_commutative() {
                current.len()
            } else {
                (i + 2).min(current.len())
            };
            for j in i + 1..limit {
                let path = operation.can_reduce_operand_pair(graph, current[i], current[j]);
                if path != BINOP_REDUCTION_NONE {
                    let replacement =
                        operation.reduce_operand_pair(graph, path, current[i], current[j])?;
                    current[i] = replacement;
                    current.remove(j);
                    reduced = true;
                    break 'scan;
                }
            }
        }
        if !reduced {
            return Ok(current);
        }
    }
}

fn normalize_simple_node(graph: &mut Graph, node: NodeId) -> Result<bool> {
    let operation = graph.node(node).operation().copy_operation();
    let policy = graph.policy_of(operation.as_ref());
    if !policy.mutable {
        return Ok(false);
    }

    let region = graph.node(node).region();
    let operands = graph.operands(node);

    // unary reducers
    if operands.len() == 1 {
        if let Some(unary) = operation.as_unary() {
            let path = unary.can_reduce_operand(graph, operands[0]);
            if path != UNOP_REDUCTION_NONE {
                trace!(node = %node, path, "unary reduction");
                let replacement = unary.reduce_operand(graph, path, operands[0])?;
                replace_node(graph, node, &[replacement])?;
                return Ok(true);
            }
        }
    }

    // binary reducers and associative flattening
    if operands.len() == 2 {
        if let Some(binary) = operation.as_binary() {
            if binary.is_associative() {
                let flattened = associative_operands(graph, operation.as_ref(), &operands);
                if flattened.len() > 2 {
                    trace!(node = %node, arity = flattened.len(), "associative flattening");
                    let flat_op = FlattenedBinaryOperation::new(
                        operation.copy_operation(),
                        flattened.len(),
                    );
                    let flat = graph.add_simple_node(region, Box::new(flat_op), &flattened)?;
                    replace_node(graph, node, &[Origin::Output(flat, 0)])?;
                    return Ok(true);
                }
            }
            let path = binary.can_reduce_operand_pair(graph, operands[0], operands[1]);
            if path != BINOP_REDUCTION_NONE {
                trace!(node = %node, path, "binary reduction");
                let replacement =
                    binary.reduce_operand_pair(graph, path, operands[0], operands[1])?;
                replace_node(graph, node, &[replacement])?;
                return Ok(true);
            }
        }
    }

    // flattened n-ary applications
    if let Some(flat) = operation.downcast_ref::<FlattenedBinaryOperation>() {
        let expanded = associative_operands(graph, flat.inner_operation(), &operands);
        let reduced = pairwise_reduce(graph, flat.bin_operation(), expanded)?;
        if reduced.len() != operands.len() || reduced != operands {
            let replacement = match reduced.len() {
                1 => reduced[0],
                2 => {
                    let bin = graph.add_simple_node(
                        region,
                        flat.bin_operation().copy_operation(),
                        &reduced,
                    )?;
                    Origin::Output(bin, 0)
                }
                n => {
                    let flat_op =
                        FlattenedBinaryOperation::new(flat.bin_operation().copy_operation(), n);
                    let new = graph.add_simple_node(region, Box::new(flat_op), &reduced)?;
                    Origin::Output(new, 0)
                }
            };
            replace_node(graph, node, &[replacement])?;
            return Ok(true);
        }
    }

    // operation-specific rewrites
    if let Some(outputs) = operation.normalize(graph, region, &operands)? {
        trace!(node = %node, op = %operation.debug_string(), "operation rewrite");
        replace_node(graph, node, &outputs)?;
        return Ok(true);
    }

    // common-subexpression elimination: merge with a congruent earlier node
    if policy.cse {
        if let Some(other) = graph.find_congruent_node(region, operation.as_ref(), &operands) {
            if other != node {
                let position = |id: NodeId| {
                    graph
                        .region(region)
                        .nodes()
                        .iter()
                        .position(|n| *n == id)
                        .unwrap()
                };
                let (keep, drop) = if position(other) < position(node) {
                    (other, node)
                } else {
                    (node, other)
                };
                trace!(keep = %keep, drop = %drop, "cse");
                let replacements = graph.outputs(keep);
                replace_node(graph, drop, &replacements)?;
                return Ok(true);
            }
        }
    }

    Ok(false)
}

fn normalize_structural_node(graph: &mut Graph, node: NodeId) -> Result<bool> {
    let is_gamma;
    let is_theta;
    {
        let operation = graph.node(node).operation();
        if !graph.policy_of(operation).mutable {
            return Ok(false);
        }
        is_gamma = operation.downcast_ref::<gamma::GammaOperation>().is_some();
        is_theta = operation.downcast_ref::<theta::ThetaOperation>().is_some();
    }
    if is_gamma {
        return gamma::normalize_gamma(graph, node);
    }
    if is_theta {
        return theta::normalize_theta(graph, node);
    }
    Ok(false)
}

/// Re-serializes every flattened n-ary application in `region` (and, for
/// structural nodes, its subregions) back into binary trees.
pub fn expand_flattened(graph: &mut Graph, region: RegionId, mode: FlattenMode) -> Result<()> {
    let mut traverser = crate::core::traverse::TopDownTraverser::new(graph, region);
    while let Some(node) = traverser.next(graph) {
        if graph.node(node).is_structural() {
            for sub in graph.node(node).subregions().to_vec() {
                expand_flattened(graph, sub, mode)?;
            }
            continue;
        }
        let operation = graph.node(node).operation().copy_operation();
        let Some(flat) = operation.downcast_ref::<FlattenedBinaryOperation>() else {
            continue;
        };
        let operands = graph.operands(node);
        let replacement = build_binary_tree(graph, flat.bin_operation(), operands, mode)?;
        replace_node(graph, node, &[replacement])?;
    }
    Ok(())
}

fn build_binary_tree(
    graph: &mut Graph,
    operation: &dyn BinaryOperation,
    operands: Vec<Origin>,
    mode: FlattenMode,
) -> Result<Origin> {
    assert!(operands.len() > 1);
    let region = graph.origin_region(operands[0]);
    let mut worklist: VecDeque<Origin> = operands.into_iter().collect();
    while worklist.len() > 1 {
        let lhs = worklist.pop_front().unwrap();
        let rhs = worklist.pop_front().unwrap();
        let node =
            graph.add_simple_node(region, operation.copy_operation(), &[lhs, rhs])?;
        match mode {
            FlattenMode::Linear => worklist.push_front(Origin::Output(node, 0)),
            FlattenMode::Parallel => worklist.push_back(Origin::Output(node, 0)),
        }
    }
    Ok(worklist.pop_front().unwrap())
}
