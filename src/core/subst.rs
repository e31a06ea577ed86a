//! Substitution maps and deep copy of nodes and regions.
//!
//! A substitution map is a partial function from origins to origins used to
//! rewire operand origins during copy. Copying a structural node clones
//! each subregion in three passes: arguments first (kind-preserving, so the
//! back-edge and loop pairings survive by index), then the body top-down,
//! then the results from the mapped origins of the originals.

use crate::core::graph::{Graph, NodeId, Origin, RegionId};
use crate::core::traverse::TopDownTraverser;
use anyhow::Result;
use std::collections::HashMap;

/// Partial function from origins (outputs and arguments) to origins.
#[derive(Debug, Default)]
pub struct SubstitutionMap {
    map: HashMap<Origin, Origin>,
}

impl SubstitutionMap {
    pub fn new() -> SubstitutionMap {
        SubstitutionMap::default()
    }

    pub fn insert(&mut self, original: Origin, substitute: Origin) {
        self.map.insert(original, substitute);
    }

    pub fn lookup(&self, original: Origin) -> Option<Origin> {
        self.map.get(&original).copied()
    }

    /// Maps `original`, falling back to the identity. The fallback covers
    /// origins that are already visible from the copy's target region.
    pub fn apply(&self, original: Origin) -> Origin {
        self.lookup(original).unwrap_or(original)
    }
}

/// Copies `node` into `target`, rewiring operands through `smap` and
/// recording the new outputs as images of the originals.
pub fn copy_node(
    graph: &mut Graph,
    node: NodeId,
    target: RegionId,
    smap: &mut SubstitutionMap,
) -> Result<NodeId> {
    let operation = graph.node(node).operation().copy_operation();
    let operands: Vec<Origin> = graph
        .operands(node)
        .into_iter()
        .map(|o| smap.apply(o))
        .collect();

    if !graph.node(node).is_structural() {
        let copy = graph.add_simple_node(target, operation, &operands)?;
        for index in 0..graph.node(node).noutputs() {
            smap.insert(Origin::Output(node, index), Origin::Output(copy, index));
        }
        return Ok(copy);
    }

    let nsubregions = graph.node(node).nsubregions();
    let copy = graph.add_structural_node(target, operation, nsubregions);
    for origin in operands {
        graph.add_input(copy, origin)?;
    }
    for index in 0..graph.node(node).noutputs() {
        let ty = graph.node(node).output(index).ty().clone();
        graph.add_output(copy, ty);
    }

    for k in 0..nsubregions {
        let source_sub = graph.node(node).subregion(k);
        let copy_sub = graph.node(copy).subregion(k);

        // pass 1: arguments, kinds cloned verbatim so pairings keep their
        // indices
        for index in 0..graph.region(source_sub).narguments() {
            let arg = graph.region(source_sub).argument(index);
            let ty = arg.ty().clone();
            let kind = arg.kind().clone();
            let new_index = graph.add_argument(copy_sub, ty, kind);
            debug_assert_eq!(new_index, index);
            smap.insert(
                Origin::Argument(source_sub, index),
                Origin::Argument(copy_sub, index),
            );
        }

        // pass 2: body, top-down
        copy_region_body(graph, source_sub, copy_sub, smap)?;

        // pass 3: results; back-edge results land on the mapped origin of
        // the original back-edge result's origin
        for index in 0..graph.region(source_sub).nresults() {
            let res = graph.region(source_sub).result(index);
            let ty = res.ty().clone();
            let kind = res.kind().clone();
            let origin = smap.apply(res.origin());
            graph.add_result(copy_sub, origin, ty, kind)?;
        }
    }

    for index in 0..graph.node(node).noutputs() {
        smap.insert(Origin::Output(node, index), Origin::Output(copy, index));
    }
    Ok(copy)
}

/// Clones every node of `source` into `target` in dependency order.
pub fn copy_region_body(
    graph: &mut Graph,
    source: RegionId,
    target: RegionId,
    smap: &mut SubstitutionMap,
) -> Result<()> {
    let mut traverser = TopDownTraverser::new(graph, source);
    while let Some(node) = traverser.next(graph) {
        copy_node(graph, node, target, smap)?;
    }
    Ok(())
}

/// Copies a region wholesale: optionally its arguments, always its body,
/// optionally its results. Round-trip with an empty map is the identity up
/// to node identity.
pub fn copy_region(
    graph: &mut Graph,
    source: RegionId,
    target: RegionId,
    smap: &mut SubstitutionMap,
    copy_arguments: bool,
    copy_results: bool,
) -> Result<()> {
    if copy_arguments {
        for index in 0..graph.region(source).narguments() {
            let arg = graph.region(source).argument(index);
            let ty = arg.ty().clone();
            let kind = arg.kind().clone();
            let new_index = graph.add_argument(target, ty, kind);
            smap.insert(
                Origin::Argument(source, index),
                Origin::Argument(target, new_index),
            );
        }
    }

    copy_region_body(graph, source, target, smap)?;

    if copy_results {
        for index in 0..graph.region(source).nresults() {
            let res = graph.region(source).result(index);
            let ty = res.ty().clone();
            let kind = res.kind().clone();
            let origin = smap.apply(res.origin());
            graph.add_result(target, origin, ty, kind)?;
        }
    }
    Ok(())
}
