//! Loop unrolling.
//!
//! A theta is unrollable when its repeat predicate is a match over a
//! comparison of an additive or subtractive induction chain against a
//! bound, with known init, step and end. The trip count is derived by
//! folding the chain; with the factor dividing the count the body is
//! cloned inside the theta, otherwise a straight-line prologue of the
//! remainder precedes the unrolled loop. Fully covered loops are peeled
//! away entirely.

use crate::core::{
    copy_node, Graph, MatchOperation, Origin, RegionId, SubstitutionMap, ThetaNode,
    TopDownTraverser, User,
};
use crate::dialects::bits::{
    constant_value, BitBinaryKind, BitBinaryOperation, BitCompareKind, BitCompareOperation,
};
use crate::passes::Transformation;
use anyhow::Result;
use tracing::debug;

/// Cap on folded trip counts; anything longer is left alone.
const MAX_TRIP_COUNT: u64 = 1 << 20;

pub struct LoopUnrolling {
    factor: usize,
}

impl LoopUnrolling {
    pub fn new(factor: usize) -> LoopUnrolling {
        assert!(factor >= 2);
        LoopUnrolling { factor }
    }
}

impl Transformation for LoopUnrolling {
    fn name(&self) -> &'static str {
        "loop-unrolling"
    }

    fn run(&mut self, graph: &mut Graph) -> Result<()> {
        unroll_region(graph, graph.root(), self.factor)
    }
}

fn unroll_region(graph: &mut Graph, region: RegionId, factor: usize) -> Result<()> {
    for node in graph.region(region).nodes().to_vec() {
        if !graph.is_alive(node) {
            continue;
        }
        // innermost loops first
        for sub in graph.node(node).subregions().to_vec() {
            unroll_region(graph, sub, factor)?;
        }
        if let Some(theta) = ThetaNode::from_node(graph, node) {
            unroll_theta(graph, theta, factor)?;
        }
    }
    Ok(())
}

/// Attempts to unroll one theta by `factor`; returns whether the graph
/// changed.
pub fn unroll_theta(graph: &mut Graph, theta: ThetaNode, factor: usize) -> Result<bool> {
    let Some(info) = UnrollInfo::create(graph, &theta) else {
        return Ok(false);
    };
    let Some(count) = info.trip_count(graph) else {
        return Ok(false);
    };
    debug!(theta = %theta.node(), count, factor, "unrolling");

    let remainder = (count as usize) % factor;
    let quotient = (count as usize) / factor;

    if remainder > 0 {
        peel(graph, &theta, remainder)?;
    }
    if quotient <= 1 {
        // the whole loop fits in the prologue plus one unrolled pass
        if quotient == 1 {
            peel(graph, &theta, factor)?;
        }
        let loop_vars = theta.loop_vars(graph);
        for lv in &loop_vars {
            let origin = graph.node(theta.node()).input(lv.input).origin();
            graph.divert_users(Origin::Output(theta.node(), lv.output), origin)?;
        }
        graph.remove_node(theta.node());
    } else {
        unroll_in_place(graph, &theta, factor)?;
    }
    Ok(true)
}

/// Executes `times` iterations straight-line before the theta, rewiring
/// the theta inputs to the peeled values.
fn peel(graph: &mut Graph, theta: &ThetaNode, times: usize) -> Result<()> {
    let sub = theta.subregion(graph);
    let parent = graph.node(theta.node()).region();
    let order = TopDownTraverser::new(graph, sub).into_vec(graph);
    let loop_vars = theta.loop_vars(graph);

    let mut current: Vec<Origin> = loop_vars
        .iter()
        .map(|lv| graph.node(theta.node()).input(lv.input).origin())
        .collect();
    let posts: Vec<Origin> = loop_vars
        .iter()
        .map(|lv| graph.region(sub).result(lv.post).origin())
        .collect();

    for _ in 0..times {
        let mut smap = SubstitutionMap::new();
        for (lv, value) in loop_vars.iter().zip(current.iter()) {
            smap.insert(lv.pre, *value);
        }
        for node in &order {
            copy_node(graph, *node, parent, &mut smap)?;
        }
        for (index, post) in posts.iter().enumerate() {
            current[index] = smap.apply(*post);
        }
    }

    for (lv, value) in loop_vars.iter().zip(current.iter()) {
        graph.divert(User::Input(theta.node(), lv.input), *value)?;
    }
    Ok(())
}

/// Clones the body `factor - 1` times inside the theta, chaining each
/// clone through the previous one and taking the repeat predicate from
/// the last clone.
fn unroll_in_place(graph: &mut Graph, theta: &ThetaNode, factor: usize) -> Result<()> {
    let sub = theta.subregion(graph);
    let order = TopDownTraverser::new(graph, sub).into_vec(graph);
    let loop_vars = theta.loop_vars(graph);

    let posts: Vec<Origin> = loop_vars
        .iter()
        .map(|lv| graph.region(sub).result(lv.post).origin())
        .collect();
    let original_predicate = theta.predicate_origin(graph);

    let mut current = posts.clone();
    let mut predicate = original_predicate;
    for _ in 1..factor {
        let mut smap = SubstitutionMap::new();
        for (lv, value) in loop_vars.iter().zip(current.iter()) {
            smap.insert(lv.pre, *value);
        }
        for node in &order {
            copy_node(graph, *node, sub, &mut smap)?;
        }
        for (index, post) in posts.iter().enumerate() {
            current[index] = smap.apply(*post);
        }
        predicate = smap.apply(original_predicate);
    }

    for (lv, value) in loop_vars.iter().zip(current.iter()) {
        graph.divert(User::Result(sub, lv.post), *value)?;
    }
    graph.divert(theta.predicate_user(graph), predicate)?;
    Ok(())
}

/// The recognized induction shape of an unrollable theta.
struct UnrollInfo {
    arm_kind: BitBinaryKind,
    width: usize,
    init: Origin,
    step: Origin,
    end: Origin,
    cmp_kind: BitCompareKind,
    /// Whether the induction value sits on the left of the comparison.
    idv_on_lhs: bool,
    /// Whether the comparison reads the post-increment value.
    compares_post: bool,
    match_operation: MatchOperation,
}

impl UnrollInfo {
    fn create(graph: &Graph, theta: &ThetaNode) -> Option<UnrollInfo> {
        let sub = theta.subregion(graph);

        let match_node = graph.origin_node(theta.predicate_origin(graph))?;
        let match_operation = graph
            .node(match_node)
            .operation()
            .downcast_ref::<MatchOperation>()?
            .clone();
        if match_operation.nalternatives() != 2 {
            return None;
        }

        let selector = graph.node(match_node).input(0).origin();
        let cmp = graph.origin_node(selector)?;
        let cmp_operation = graph
            .node(cmp)
            .operation()
            .downcast_ref::<BitCompareOperation>()?;
        let cmp_kind = cmp_operation.kind();
        let width = cmp_operation.width();
        let lhs = graph.node(cmp).input(0).origin();
        let rhs = graph.node(cmp).input(1).origin();

        for lv in theta.loop_vars(graph) {
            let post = graph.region(sub).result(lv.post).origin();
            let Some(arm) = graph.origin_node(post) else {
                continue;
            };
            let Some(arm_operation) = graph
                .node(arm)
                .operation()
                .downcast_ref::<BitBinaryOperation>()
            else {
                continue;
            };
            let arm_kind = arm_operation.kind();
            if !matches!(arm_kind, BitBinaryKind::Add | BitBinaryKind::Sub) {
                continue;
            }

            let o0 = graph.node(arm).input(0).origin();
            let o1 = graph.node(arm).input(1).origin();
            let step = if o0 == lv.pre {
                o1
            } else if o1 == lv.pre && arm_kind == BitBinaryKind::Add {
                o0
            } else {
                continue;
            };

            let arm_output = Origin::Output(arm, 0);
            let (idv_on_lhs, compares_post, end) = if lhs == arm_output {
                (true, true, rhs)
            } else if lhs == lv.pre {
                (true, false, rhs)
            } else if rhs == arm_output {
                (false, true, lhs)
            } else if rhs == lv.pre {
                (false, false, lhs)
            } else {
                continue;
            };

            return Some(UnrollInfo {
                arm_kind,
                width,
                init: graph.node(theta.node()).input(lv.input).origin(),
                step,
                end,
                cmp_kind,
                idv_on_lhs,
                compares_post,
                match_operation,
            });
        }
        None
    }

    fn known(&self, graph: &Graph, origin: Origin) -> Option<u64> {
        let traced = graph.trace_producer(origin);
        constant_value(graph, traced).map(|(_, value)| value)
    }

    /// Folds the induction chain to the number of body executions. `None`
    /// if init, step or end is unknown, or the count exceeds the cap.
    fn trip_count(&self, graph: &Graph) -> Option<u64> {
        let init = self.known(graph, self.init)?;
        let step = self.known(graph, self.step)?;
        let end = self.known(graph, self.end)?;

        let mut value = init;
        let mut count = 0u64;
        loop {
            let next = self.arm_kind.fold(self.width, value, step);
            count += 1;
            if count > MAX_TRIP_COUNT {
                return None;
            }
            let idv = if self.compares_post { next } else { value };
            let (l, r) = if self.idv_on_lhs { (idv, end) } else { (end, idv) };
            let condition = self.cmp_kind.fold(self.width, l, r);
            value = next;
            // the theta repeats while the predicate selects alternative 1
            if self.match_operation.alternative(condition as u64) != 1 {
                return Some(count);
            }
        }
    }
}
