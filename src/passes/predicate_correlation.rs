//! Predicate correlation.
//!
//! A theta repeat predicate synthesized from a gamma whose branches all
//! produce constants is structurally dependent on the gamma's own
//! predicate. Two correlation shapes are recognized: the gamma output
//! feeding the theta predicate directly, and the theta predicate being a
//! match whose selector is such a gamma output. When the direct shape
//! carries the constant alternatives `[0, 1]`, the theta predicate is
//! diverted to the gamma's predicate origin, letting dead-node
//! elimination erase the gamma afterwards.

use crate::core::{
    ControlConstantOperation, GammaNode, Graph, MatchOperation, NodeId, Origin, RegionId,
    ThetaNode,
};
use crate::dialects::bits::BitConstantOperation;
use crate::passes::Transformation;
use anyhow::Result;
use tracing::debug;

#[derive(Default)]
pub struct PredicateCorrelation;

impl Transformation for PredicateCorrelation {
    fn name(&self) -> &'static str {
        "predicate-correlation"
    }

    fn run(&mut self, graph: &mut Graph) -> Result<()> {
        correlate_region(graph, graph.root())
    }
}

/// A structural dependence between a theta's repeat predicate and a gamma
/// with constant-per-branch outputs.
#[derive(Debug)]
pub enum ThetaGammaPredicateCorrelation {
    /// The predicate reads the gamma output directly.
    ControlConstant {
        gamma: GammaNode,
        alternatives: Vec<u64>,
    },
    /// The predicate reads a match whose selector is the gamma output.
    MatchConstant {
        gamma: GammaNode,
        match_node: NodeId,
        alternatives: Vec<u64>,
    },
}

fn correlate_region(graph: &mut Graph, region: RegionId) -> Result<()> {
    for node in graph.region(region).nodes().to_vec() {
        if !graph.is_alive(node) {
            continue;
        }
        // innermost subregions first
        for sub in graph.node(node).subregions().to_vec() {
            correlate_region(graph, sub)?;
        }
        if let Some(theta) = ThetaNode::from_node(graph, node) {
            correlate_theta(graph, theta)?;
        }
    }
    Ok(())
}

/// The constant alternative produced by every branch of a gamma output,
/// if all branches feed constants.
fn constant_alternatives(graph: &Graph, gamma: &GammaNode, output: usize) -> Option<Vec<u64>> {
    let exit_var = gamma.map_output_exit_var(graph, output);
    let mut alternatives = Vec::new();
    for (k, result) in exit_var.branch_results.iter().enumerate() {
        let sub = gamma.subregion(graph, k);
        let origin = graph.region(sub).result(*result).origin();
        let producer = graph.origin_node(origin)?;
        let operation = graph.node(producer).operation();
        if let Some(constant) = operation.downcast_ref::<ControlConstantOperation>() {
            alternatives.push(constant.value().alternative() as u64);
            continue;
        }
        if let Some(constant) = operation.downcast_ref::<BitConstantOperation>() {
            alternatives.push(constant.value());
            continue;
        }
        return None;
    }
    Some(alternatives)
}

fn compute_control_constant_correlation(
    graph: &Graph,
    theta: &ThetaNode,
) -> Option<ThetaGammaPredicateCorrelation> {
    let operand = theta.predicate_origin(graph);
    let Origin::Output(node, output) = operand else {
        return None;
    };
    let gamma = GammaNode::from_node(graph, node)?;
    let alternatives = constant_alternatives(graph, &gamma, output)?;
    Some(ThetaGammaPredicateCorrelation::ControlConstant {
        gamma,
        alternatives,
    })
}

fn compute_match_constant_correlation(
    graph: &Graph,
    theta: &ThetaNode,
) -> Option<ThetaGammaPredicateCorrelation> {
    let operand = theta.predicate_origin(graph);
    let match_node = graph.origin_node(operand)?;
    graph
        .node(match_node)
        .operation()
        .downcast_ref::<MatchOperation>()?;

    let selector = graph.node(match_node).input(0).origin();
    let Origin::Output(node, output) = selector else {
        return None;
    };
    let gamma = GammaNode::from_node(graph, node)?;
    let alternatives = constant_alternatives(graph, &gamma, output)?;
    Some(ThetaGammaPredicateCorrelation::MatchConstant {
        gamma,
        match_node,
        alternatives,
    })
}

/// The correlation between a theta's predicate and a gamma, if any.
pub fn compute_theta_gamma_predicate_correlation(
    graph: &Graph,
    theta: &ThetaNode,
) -> Option<ThetaGammaPredicateCorrelation> {
    compute_control_constant_correlation(graph, theta)
        .or_else(|| compute_match_constant_correlation(graph, theta))
}

fn correlate_theta(graph: &mut Graph, theta: ThetaNode) -> Result<()> {
    let Some(correlation) = compute_theta_gamma_predicate_correlation(graph, &theta) else {
        return Ok(());
    };

    // only the direct control-constant shape is rewritten; the
    // match-wrapped shape is detection-only
    let ThetaGammaPredicateCorrelation::ControlConstant {
        gamma,
        alternatives,
    } = correlation
    else {
        return Ok(());
    };
    if alternatives != [0, 1] {
        return Ok(());
    }

    debug!(theta = %theta.node(), gamma = %gamma.node(), "correlating predicates");
    let origin = gamma.predicate_origin(graph);
    graph.divert(theta.predicate_user(graph), origin)
}
