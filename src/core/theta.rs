//! The theta node: a tail-controlled loop with a single subregion.
//!
//! Every loop variable is a quadruple (input, pre-argument, post-result,
//! output): the input origin feeds the pre-argument on the first iteration
//! and the post-result feeds it on every subsequent one. The final result
//! of the subregion is the control-2 continuation predicate.

use crate::core::control::control_false;
use crate::core::graph::{
    ArgumentKind, Graph, NodeId, Origin, RegionId, ResultKind, StructuralError, User,
};
use crate::core::operation::Operation;
use crate::core::types::Type;
use anyhow::{bail, Result};
use tracing::trace;

/// Structural operation of a theta node.
#[derive(Clone, Debug)]
pub struct ThetaOperation;

impl Operation for ThetaOperation {
    fn arguments(&self) -> Vec<Type> {
        Vec::new()
    }

    fn results(&self) -> Vec<Type> {
        Vec::new()
    }

    fn debug_string(&self) -> String {
        "THETA".to_string()
    }

    fn copy_operation(&self) -> Box<dyn Operation> {
        Box::new(ThetaOperation)
    }

    fn eq_operation(&self, other: &dyn Operation) -> bool {
        other.downcast_ref::<ThetaOperation>().is_some()
    }

    fn is_structural(&self) -> bool {
        true
    }

    fn allows_backedges(&self) -> bool {
        true
    }
}

/// A loop variable quadruple.
#[derive(Clone, Copy, Debug)]
pub struct LoopVar {
    /// Structural input feeding the first iteration.
    pub input: usize,
    /// Pre-argument seen by the loop body.
    pub pre: Origin,
    /// Post-result index carrying the next-iteration value.
    pub post: usize,
    /// Structural output carrying the value after the final iteration.
    pub output: usize,
}

/// Typed handle on a theta node.
#[derive(Clone, Copy, Debug)]
pub struct ThetaNode {
    node: NodeId,
}

impl ThetaNode {
    /// Creates a theta in `region`. The subregion starts with an
    /// exit-immediately predicate; rewire it with
    /// [`ThetaNode::set_predicate`].
    pub fn create(graph: &mut Graph, region: RegionId) -> Result<ThetaNode> {
        let node = graph.add_structural_node(region, Box::new(ThetaOperation), 1);
        let theta = ThetaNode { node };
        let sub = theta.subregion(graph);
        let predicate = control_false(graph, sub)?;
        graph.add_result(sub, predicate, Type::control(2), ResultKind::Predicate)?;
        Ok(theta)
    }

    pub fn from_node(graph: &Graph, node: NodeId) -> Option<ThetaNode> {
        graph
            .node(node)
            .operation()
            .downcast_ref::<ThetaOperation>()
            .map(|_| ThetaNode { node })
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn subregion(&self, graph: &Graph) -> RegionId {
        graph.node(self.node).subregion(0)
    }

    /// Index of the predicate result; always the final result.
    pub fn predicate_result(&self, graph: &Graph) -> usize {
        let sub = self.subregion(graph);
        let index = graph.region(sub).nresults() - 1;
        assert!(matches!(
            graph.region(sub).result(index).kind(),
            ResultKind::Predicate
        ));
        index
    }

    pub fn predicate_origin(&self, graph: &Graph) -> Origin {
        let sub = self.subregion(graph);
        graph
            .region(sub)
            .result(self.predicate_result(graph))
            .origin()
    }

    pub fn predicate_user(&self, graph: &Graph) -> User {
        User::Result(self.subregion(graph), self.predicate_result(graph))
    }

    /// Rewires the continuation predicate, pruning the previous producer if
    /// it became dead.
    pub fn set_predicate(&self, graph: &mut Graph, origin: Origin) -> Result<()> {
        let old = self.predicate_origin(graph);
        graph.divert(self.predicate_user(graph), origin)?;
        if let Some(producer) = graph.origin_node(old) {
            if graph.node(producer).is_dead() {
                graph.remove_node(producer);
            }
        }
        Ok(())
    }

    /// Appends a loop variable atomically: structural input, pre-argument,
    /// post-result (initially fed by the pre-argument) and structural
    /// output.
    pub fn add_loop_var(&self, graph: &mut Graph, origin: Origin) -> Result<LoopVar> {
        let ty = graph.origin_type(origin);
        let sub = self.subregion(graph);

        let input = graph.add_input(self.node, origin)?;
        let output = graph.add_output(self.node, ty.clone());

        // the post-result goes right before the trailing predicate
        let post = self.predicate_result(graph);
        let argument = graph.add_argument(sub, ty.clone(), ArgumentKind::Function);
        graph.insert_result_at(
            sub,
            post,
            Origin::Argument(sub, argument),
            ty,
            ResultKind::Loop { output, argument },
        )?;
        graph.region_mut(sub).arguments[argument].kind = ArgumentKind::Loop {
            input,
            result: post,
        };

        Ok(LoopVar {
            input,
            pre: Origin::Argument(sub, argument),
            post,
            output,
        })
    }

    pub fn loop_vars(&self, graph: &Graph) -> Vec<LoopVar> {
        let sub = self.subregion(graph);
        let mut vars = Vec::new();
        for (index, arg) in graph.region(sub).arguments().iter().enumerate() {
            if let ArgumentKind::Loop { input, result } = arg.kind() {
                let ResultKind::Loop { output, .. } = graph.region(sub).result(*result).kind()
                else {
                    panic!("loop argument paired with a non-loop result");
                };
                vars.push(LoopVar {
                    input: *input,
                    pre: Origin::Argument(sub, index),
                    post: *result,
                    output: *output,
                });
            }
        }
        vars
    }

    pub fn map_output_loop_var(&self, graph: &Graph, output: usize) -> Result<LoopVar> {
        self.loop_vars(graph)
            .into_iter()
            .find(|lv| lv.output == output)
            .ok_or_else(|| StructuralError("output is not a loop variable".to_string()).into())
    }

    pub fn map_pre_loop_var(&self, graph: &Graph, pre: Origin) -> Result<LoopVar> {
        self.loop_vars(graph)
            .into_iter()
            .find(|lv| lv.pre == pre)
            .ok_or_else(|| StructuralError("origin is not a loop pre-argument".to_string()).into())
    }

    /// A loop variable is invariant when its post-result still reads its
    /// pre-argument.
    pub fn is_invariant(&self, graph: &Graph, loop_var: &LoopVar) -> bool {
        let sub = self.subregion(graph);
        graph.region(sub).result(loop_var.post).origin() == loop_var.pre
    }

    /// Removes a loop variable quadruple. The output must be dead and the
    /// variable invariant.
    pub fn remove_loop_var(&self, graph: &mut Graph, loop_var: &LoopVar) -> Result<()> {
        let sub = self.subregion(graph);
        if graph.nusers(Origin::Output(self.node, loop_var.output)) != 0 {
            bail!(StructuralError(
                "removing a loop variable with a live output".to_string(),
            ));
        }
        if !self.is_invariant(graph, loop_var) {
            bail!(StructuralError(
                "removing a loop-carried loop variable".to_string(),
            ));
        }
        let Origin::Argument(_, argument) = loop_var.pre else {
            unreachable!();
        };
        // unpair, then drop result, argument, input and output
        graph.region_mut(sub).arguments[argument].kind = ArgumentKind::Function;
        graph.remove_result(sub, loop_var.post);
        if graph.region(sub).argument(argument).nusers() != 0 {
            bail!(StructuralError(
                "removing a loop variable whose pre-argument is still read".to_string(),
            ));
        }
        graph.remove_argument(sub, argument);
        graph.remove_input(self.node, loop_var.input);
        graph.remove_output(self.node, loop_var.output);
        Ok(())
    }
}

/// Applies the theta reductions: invariant loop variables are replaced by
/// their inputs for all downstream uses, and dead invariant loop variables
/// are removed.
pub fn normalize_theta(graph: &mut Graph, node: NodeId) -> Result<bool> {
    let theta = ThetaNode::from_node(graph, node).expect("not a theta node");
    let mut changed = false;

    loop {
        let mut rewrote = false;
        for loop_var in theta.loop_vars(graph) {
            if !theta.is_invariant(graph, &loop_var) {
                continue;
            }
            let output = Origin::Output(node, loop_var.output);
            if graph.nusers(output) > 0 {
                trace!(node = %node, output = loop_var.output, "theta invariant loopvar");
                let origin = graph.node(node).input(loop_var.input).origin();
                graph.divert_users(output, origin)?;
                rewrote = true;
                break;
            }
            // dead loopvar: the pre-argument may only feed the post-result
            let pre_users = graph.users(loop_var.pre);
            let sub = theta.subregion(graph);
            let only_post = pre_users
                .iter()
                .all(|u| *u == User::Result(sub, loop_var.post));
            if only_post {
                trace!(node = %node, output = loop_var.output, "theta dead loopvar");
                theta.remove_loop_var(graph, &loop_var)?;
                rewrote = true;
                break;
            }
        }
        if !rewrote {
            break;
        }
        changed = true;
    }

    Ok(changed)
}
