//! Function inlining.
//!
//! A lambda is inlined when it has exactly one direct call site and no
//! other users. The callee's captured-context origins are routed from the
//! call site's region outward through every enclosing structural scope
//! using the normal entry/loop/context variable machinery, then the body
//! is cloned into the call site's region with the formals substituted by
//! the call arguments.

use crate::core::{
    GammaNode, Graph, LambdaNode, NodeId, Origin, PhiNode, RegionId, StructuralError,
    SubstitutionMap, ThetaNode, TopDownTraverser, UnsupportedError, User,
};
use crate::core::copy_region_body;
use crate::dialects::mem::CallOperation;
use crate::passes::Transformation;
use anyhow::{bail, Result};
use tracing::debug;

/// External symbols with these prefixes are preserved and never inlined.
const RESERVED_PREFIXES: [&str; 2] = ["decouple_", "hls_"];

#[derive(Default)]
pub struct FunctionInlining;

impl Transformation for FunctionInlining {
    fn name(&self) -> &'static str {
        "function-inlining"
    }

    fn run(&mut self, graph: &mut Graph) -> Result<()> {
        let root = graph.root();
        let order = TopDownTraverser::new(graph, root).into_vec(graph);
        for node in order {
            if !graph.is_alive(node) {
                continue;
            }
            let Some(lambda) = LambdaNode::from_node(graph, node) else {
                continue;
            };
            let name = lambda.name(graph);
            if RESERVED_PREFIXES.iter().any(|p| name.starts_with(p)) {
                continue;
            }
            let summary = compute_call_summary(graph, &lambda);
            if summary.direct_calls.len() == 1 && !summary.has_other_users {
                debug!(lambda = %name, "inlining single call site");
                inline_call(graph, summary.direct_calls[0], &lambda)?;
            }
        }
        Ok(())
    }
}

/// How a lambda's naming output is used across the graph.
pub struct CallSummary {
    pub direct_calls: Vec<NodeId>,
    pub has_other_users: bool,
}

/// Traces the lambda output through structural boundaries, collecting the
/// call nodes applying it directly.
pub fn compute_call_summary(graph: &Graph, lambda: &LambdaNode) -> CallSummary {
    let mut summary = CallSummary {
        direct_calls: Vec::new(),
        has_other_users: false,
    };
    trace_users(graph, lambda.output(graph), &mut summary);
    summary
}

fn trace_users(graph: &Graph, origin: Origin, summary: &mut CallSummary) {
    for user in graph.users(origin) {
        match user {
            User::Input(node, 0)
                if graph
                    .node(node)
                    .operation()
                    .downcast_ref::<CallOperation>()
                    .is_some() =>
            {
                summary.direct_calls.push(node);
            }
            User::Input(node, index) if graph.node(node).is_structural() => {
                // follow the value through the boundary into each subregion
                for sub in graph.node(node).subregions() {
                    for (arg_index, arg) in graph.region(*sub).arguments().iter().enumerate() {
                        let mapped = match arg.kind() {
                            crate::core::ArgumentKind::Entry { input } => *input == index,
                            crate::core::ArgumentKind::Loop { input, .. } => *input == index,
                            _ => false,
                        };
                        if mapped {
                            trace_users(graph, Origin::Argument(*sub, arg_index), summary);
                        }
                    }
                }
            }
            _ => {
                summary.has_other_users = true;
            }
        }
    }
}

/// Routes `origin` into `region` through every enclosing structural
/// scope: each gamma traversed adds an entry variable, each theta a loop
/// variable, each lambda/phi a context variable.
fn route_to_region(graph: &mut Graph, origin: Origin, region: RegionId) -> Result<Origin> {
    if graph.origin_region(origin) == region {
        return Ok(origin);
    }
    let Some((owner, subregion_index)) = graph.region(region).owner() else {
        bail!(StructuralError(
            "origin is not visible from any enclosing region".to_string(),
        ));
    };
    let parent = graph.node(owner).region();
    let outer = route_to_region(graph, origin, parent)?;

    if let Some(gamma) = GammaNode::from_node(graph, owner) {
        let ev = gamma.add_entry_var(graph, outer)?;
        return Ok(ev.branch_arguments[subregion_index]);
    }
    if let Some(theta) = ThetaNode::from_node(graph, owner) {
        let lv = theta.add_loop_var(graph, outer)?;
        return Ok(lv.pre);
    }
    if let Some(lambda) = LambdaNode::from_node(graph, owner) {
        let cv = lambda.add_context_var(graph, outer)?;
        return Ok(cv.inner);
    }
    if let Some(phi) = PhiNode::from_node(graph, owner) {
        let cv = phi.add_context_var(graph, outer)?;
        return Ok(cv.inner);
    }
    bail!(UnsupportedError(
        "cannot route a dependency through this structural node".to_string(),
    ))
}

/// Inlines `lambda`'s body at `call` and deletes the call.
pub fn inline_call(graph: &mut Graph, call: NodeId, lambda: &LambdaNode) -> Result<()> {
    let call_region = graph.node(call).region();

    // route each captured-context origin to the call site
    let context_vars = lambda.context_vars(graph);
    let mut dependencies = Vec::new();
    for cv in &context_vars {
        let origin = graph.node(lambda.node()).input(cv.input).origin();
        let producer = graph.trace_producer(origin);
        dependencies.push(route_to_region(graph, producer, call_region)?);
    }

    let mut smap = SubstitutionMap::new();
    let formals = lambda.function_arguments(graph);
    if formals.len() != graph.node(call).ninputs() - 1 {
        bail!(StructuralError(
            "call arity does not match the callee's signature".to_string(),
        ));
    }
    for (index, formal) in formals.iter().enumerate() {
        smap.insert(*formal, graph.node(call).input(index + 1).origin());
    }
    for (cv, dependency) in context_vars.iter().zip(dependencies) {
        smap.insert(cv.inner, dependency);
    }

    let sub = lambda.subregion(graph);
    copy_region_body(graph, sub, call_region, &mut smap)?;

    let results = lambda.function_results(graph);
    for (index, result) in results.iter().enumerate() {
        let origin = graph.region(sub).result(*result).origin();
        graph.divert_users(Origin::Output(call, index), smap.apply(origin))?;
    }
    graph.remove_node(call);
    Ok(())
}
