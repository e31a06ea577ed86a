//! Dead-node elimination.
//!
//! A bottom-up sweep over every region removes every node whose outputs
//! all have zero users. Structural nodes are first pruned of unused
//! entry/exit/loop/context variables, reducing their arity, before the
//! node itself is tested for deadness. The sweep iterates to a fixed
//! point and is idempotent.

use crate::core::{
    BottomUpTraverser, DeltaNode, GammaNode, Graph, LambdaNode, NodeId, Origin, RegionId,
    ThetaNode, User,
};
use crate::passes::Transformation;
use anyhow::Result;
use tracing::debug;

#[derive(Default)]
pub struct DeadNodeElimination;

impl Transformation for DeadNodeElimination {
    fn name(&self) -> &'static str {
        "dead-node-elimination"
    }

    fn run(&mut self, graph: &mut Graph) -> Result<()> {
        let mut rounds = 0usize;
        loop {
            let changed = sweep_region(graph, graph.root())?;
            rounds += 1;
            if !changed {
                break;
            }
        }
        debug!(rounds, "dead node elimination converged");
        Ok(())
    }
}

fn sweep_region(graph: &mut Graph, region: RegionId) -> Result<bool> {
    let mut changed = false;
    let order = BottomUpTraverser::new(graph, region).into_vec(graph);
    for node in order {
        if !graph.is_alive(node) {
            continue;
        }
        if graph.node(node).is_structural() {
            changed |= prune_structural_vars(graph, node)?;
            for sub in graph.node(node).subregions().to_vec() {
                changed |= sweep_region(graph, sub)?;
            }
        }
        if graph.node(node).is_dead() {
            graph.remove_node(node);
            changed = true;
        }
    }
    Ok(changed)
}

fn prune_structural_vars(graph: &mut Graph, node: NodeId) -> Result<bool> {
    if let Some(gamma) = GammaNode::from_node(graph, node) {
        return prune_gamma_vars(graph, gamma);
    }
    if let Some(theta) = ThetaNode::from_node(graph, node) {
        return prune_theta_vars(graph, theta);
    }
    if let Some(lambda) = LambdaNode::from_node(graph, node) {
        let before = graph.node(node).ninputs();
        lambda.prune_context_vars(graph)?;
        return Ok(graph.node(node).ninputs() != before);
    }
    if let Some(delta) = DeltaNode::from_node(graph, node) {
        return prune_delta_vars(graph, delta);
    }
    Ok(false)
}

fn prune_gamma_vars(graph: &mut Graph, gamma: GammaNode) -> Result<bool> {
    let mut changed = false;

    // exit variables nobody reads
    loop {
        let dead = gamma
            .exit_vars(graph)
            .into_iter()
            .find(|xv| graph.nusers(xv.output) == 0);
        let Some(xv) = dead else {
            break;
        };
        for (k, result) in xv.branch_results.iter().enumerate().rev() {
            let sub = gamma.subregion(graph, k);
            graph.remove_result(sub, *result);
        }
        let Origin::Output(_, output) = xv.output else {
            unreachable!();
        };
        graph.remove_output(gamma.node(), output);
        changed = true;
    }

    // entry variables whose arguments are all unused
    loop {
        let dead = gamma.entry_vars(graph).into_iter().find(|ev| {
            ev.branch_arguments
                .iter()
                .all(|arg| graph.nusers(*arg) == 0)
        });
        let Some(ev) = dead else {
            break;
        };
        for argument in ev.branch_arguments.iter().rev() {
            let Origin::Argument(sub, index) = *argument else {
                unreachable!();
            };
            graph.remove_argument(sub, index);
        }
        graph.remove_input(gamma.node(), ev.input);
        changed = true;
    }

    Ok(changed)
}

fn prune_theta_vars(graph: &mut Graph, theta: ThetaNode) -> Result<bool> {
    let mut changed = false;
    loop {
        let sub = theta.subregion(graph);
        let removable = theta.loop_vars(graph).into_iter().find(|lv| {
            graph.nusers(Origin::Output(theta.node(), lv.output)) == 0
                && theta.is_invariant(graph, lv)
                && graph
                    .users(lv.pre)
                    .iter()
                    .all(|u| *u == User::Result(sub, lv.post))
        });
        let Some(lv) = removable else {
            break;
        };
        theta.remove_loop_var(graph, &lv)?;
        changed = true;
    }
    Ok(changed)
}

fn prune_delta_vars(graph: &mut Graph, delta: DeltaNode) -> Result<bool> {
    let mut changed = false;
    loop {
        let unused = delta
            .context_vars(graph)
            .into_iter()
            .find(|cv| graph.nusers(cv.inner) == 0);
        let Some(cv) = unused else {
            break;
        };
        let Origin::Argument(sub, index) = cv.inner else {
            unreachable!();
        };
        graph.remove_argument(sub, index);
        graph.remove_input(delta.node(), cv.input);
        changed = true;
    }
    Ok(changed)
}
