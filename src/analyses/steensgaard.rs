//! Flow-insensitive, unification-based points-to analysis over a Location
//! lattice.
//!
//! Every pointer-typed output owns a register location; allocas, mallocs,
//! globals, lambdas and imports own memory locations; dummies are created
//! lazily during constraint resolution. A disjoint set over locations
//! represents the points-to equivalence: all locations of a set share one
//! points-to target and one may-point-to-unknown flag, both kept at the
//! set representative.

use crate::analyses::points_to_graph::{
    MemoryNodeId, MemoryNodeKind, PointsToGraph, RegisterTargets,
};
use crate::core::{
    ArgumentKind, DeltaNode, GammaNode, Graph, LambdaNode, NodeId, Origin, PhiNode, RegionId,
    ThetaNode, TopDownTraverser,
};
use crate::dialects::mem::{
    AllocaOperation, BitCastOperation, Bits2PtrOperation, CallOperation, ConstantPointerNullOperation,
    GetElementPtrOperation, LoadOperation, MallocOperation, MemCpyOperation, Ptr2BitsOperation,
    SelectOperation, StoreOperation, UndefValueOperation,
};
use crate::util::DisjointSet;
use anyhow::Result;
use std::collections::HashMap;
use tracing::debug;

#[derive(Clone, Debug)]
enum LocationKind {
    Register(Origin),
    Alloca(NodeId),
    Malloc(NodeId),
    Global(NodeId),
    Lambda(NodeId),
    Import(usize),
    Dummy,
}

#[derive(Debug)]
struct LocationData {
    kind: LocationKind,
    /// Valid at the set representative only.
    points_to: Option<usize>,
    /// Valid at the set representative only.
    unknown: bool,
}

/// The Steensgaard analysis driver.
#[derive(Default)]
pub struct Steensgaard {
    dset: DisjointSet,
    locations: Vec<LocationData>,
    registers: HashMap<Origin, usize>,
}

impl Steensgaard {
    /// Runs the analysis over the whole graph and builds the points-to
    /// graph.
    pub fn analyze(graph: &Graph) -> Result<PointsToGraph> {
        let mut analysis = Steensgaard::default();
        analysis.analyze_root(graph)?;
        Ok(analysis.finish())
    }

    fn fresh(&mut self, kind: LocationKind) -> usize {
        let id = self.dset.insert();
        self.locations.push(LocationData {
            kind,
            points_to: None,
            unknown: false,
        });
        id
    }

    fn register(&mut self, origin: Origin) -> usize {
        if let Some(id) = self.registers.get(&origin) {
            return *id;
        }
        let id = self.fresh(LocationKind::Register(origin));
        self.registers.insert(origin, id);
        id
    }

    fn mark_unknown(&mut self, location: usize) {
        let root = self.dset.find(location);
        self.locations[root].unknown = true;
    }

    /// The set-wide points-to target, creating a dummy if the set has
    /// none yet.
    fn ensure_pointee(&mut self, location: usize) -> usize {
        let root = self.dset.find(location);
        if let Some(pointee) = self.locations[root].points_to {
            return self.dset.find(pointee);
        }
        let dummy = self.fresh(LocationKind::Dummy);
        self.locations[root].points_to = Some(dummy);
        dummy
    }

    /// Unifies the sets of `x` and `y`, merging flags and recursively
    /// joining their points-to targets.
    fn join(&mut self, x: usize, y: usize) -> usize {
        let rx = self.dset.find(x);
        let ry = self.dset.find(y);
        if rx == ry {
            return rx;
        }

        let px = self.locations[rx].points_to;
        let py = self.locations[ry].points_to;
        let unknown = self.locations[rx].unknown || self.locations[ry].unknown;

        let root = self.dset.union(rx, ry);
        self.locations[root].unknown = unknown;
        let pointee = match (px, py) {
            (Some(a), Some(b)) => Some(self.join(a, b)),
            (Some(a), None) => Some(a),
            (None, other) => other,
        };
        let root = self.dset.find(root);
        self.locations[root].points_to = pointee;
        root
    }

    fn join_registers(&mut self, graph: &Graph, a: Origin, b: Origin) {
        if !graph.origin_type(a).is_pointer() || !graph.origin_type(b).is_pointer() {
            return;
        }
        let la = self.register(a);
        let lb = self.register(b);
        self.join(la, lb);
    }

    // ---- graph walk --------------------------------------------------------

    fn analyze_root(&mut self, graph: &Graph) -> Result<()> {
        // pointer imports are abstract objects of unknown provenance
        let root = graph.root();
        for index in 0..graph.region(root).narguments() {
            let arg = graph.region(root).argument(index);
            if !arg.ty().is_pointer() {
                continue;
            }
            if matches!(arg.kind(), ArgumentKind::Import { .. }) {
                let register = self.register(Origin::Argument(root, index));
                let import = self.fresh(LocationKind::Import(index));
                let pointee = self.ensure_pointee(register);
                self.join(pointee, import);
                self.mark_unknown(register);
                self.mark_unknown(import);
            }
        }
        self.analyze_region(graph, root)
    }

    fn analyze_region(&mut self, graph: &Graph, region: RegionId) -> Result<()> {
        let mut traverser = TopDownTraverser::new(graph, region);
        while let Some(node) = traverser.next(graph) {
            if graph.node(node).is_structural() {
                self.analyze_structural(graph, node)?;
            } else {
                self.analyze_simple(graph, node)?;
            }
        }
        Ok(())
    }

    fn analyze_structural(&mut self, graph: &Graph, node: NodeId) -> Result<()> {
        if let Some(lambda) = LambdaNode::from_node(graph, node) {
            return self.analyze_lambda(graph, lambda);
        }
        if let Some(delta) = DeltaNode::from_node(graph, node) {
            return self.analyze_delta(graph, delta);
        }
        if let Some(phi) = PhiNode::from_node(graph, node) {
            return self.analyze_phi(graph, phi);
        }
        if let Some(gamma) = GammaNode::from_node(graph, node) {
            return self.analyze_gamma(graph, gamma);
        }
        if let Some(theta) = ThetaNode::from_node(graph, node) {
            return self.analyze_theta(graph, theta);
        }
        Ok(())
    }

    fn analyze_lambda(&mut self, graph: &Graph, lambda: LambdaNode) -> Result<()> {
        for cv in lambda.context_vars(graph) {
            let origin = graph.node(lambda.node()).input(cv.input).origin();
            self.join_registers(graph, origin, cv.inner);
        }

        // the lambda itself is an abstract object named by its output
        let location = self.fresh(LocationKind::Lambda(lambda.node()));
        let register = self.register(Origin::Output(lambda.node(), 0));
        let pointee = self.ensure_pointee(register);
        self.join(pointee, location);

        if lambda.linkage(graph).is_exported() {
            self.mark_unknown(location);
            // arguments of an exported function come from anywhere
            for argument in lambda.function_arguments(graph) {
                if graph.origin_type(argument).is_pointer() {
                    let reg = self.register(argument);
                    self.mark_unknown(reg);
                }
            }
        }

        self.analyze_region(graph, lambda.subregion(graph))
    }

    fn analyze_delta(&mut self, graph: &Graph, delta: DeltaNode) -> Result<()> {
        for cv in delta.context_vars(graph) {
            let origin = graph.node(delta.node()).input(cv.input).origin();
            self.join_registers(graph, origin, cv.inner);
        }

        self.analyze_region(graph, delta.subregion(graph))?;

        let location = self.fresh(LocationKind::Global(delta.node()));
        let register = self.register(delta.output(graph));
        let pointee = self.ensure_pointee(register);
        self.join(pointee, location);

        // the global holds its initializer value
        let sub = delta.subregion(graph);
        let initializer = graph.region(sub).result(0).origin();
        if graph.origin_type(initializer).is_pointer() {
            let value = self.register(initializer);
            let held = self.ensure_pointee(location);
            self.join(held, value);
        }

        if delta.linkage(graph).is_exported() {
            self.mark_unknown(location);
        }
        Ok(())
    }

    fn analyze_phi(&mut self, graph: &Graph, phi: PhiNode) -> Result<()> {
        for cv in phi.context_vars(graph) {
            let origin = graph.node(phi.node()).input(cv.input).origin();
            self.join_registers(graph, origin, cv.inner);
        }
        self.analyze_region(graph, phi.subregion(graph))?;
        let sub = phi.subregion(graph);
        for rv in phi.recursion_vars(graph) {
            let definition = graph.region(sub).result(rv.result).origin();
            self.join_registers(graph, rv.argument, definition);
            self.join_registers(graph, rv.argument, phi.recursion_output(&rv));
        }
        Ok(())
    }

    fn analyze_gamma(&mut self, graph: &Graph, gamma: GammaNode) -> Result<()> {
        for ev in gamma.entry_vars(graph) {
            let origin = graph.node(gamma.node()).input(ev.input).origin();
            for argument in &ev.branch_arguments {
                self.join_registers(graph, origin, *argument);
            }
        }
        for k in 0..gamma.nsubregions(graph) {
            self.analyze_region(graph, gamma.subregion(graph, k))?;
        }
        for xv in gamma.exit_vars(graph) {
            for (k, result) in xv.branch_results.iter().enumerate() {
                let sub = gamma.subregion(graph, k);
                let origin = graph.region(sub).result(*result).origin();
                self.join_registers(graph, xv.output, origin);
            }
        }
        Ok(())
    }

    fn analyze_theta(&mut self, graph: &Graph, theta: ThetaNode) -> Result<()> {
        let sub = theta.subregion(graph);
        for lv in theta.loop_vars(graph) {
            let origin = graph.node(theta.node()).input(lv.input).origin();
            self.join_registers(graph, origin, lv.pre);
        }
        self.analyze_region(graph, sub)?;
        for lv in theta.loop_vars(graph) {
            let post = graph.region(sub).result(lv.post).origin();
            self.join_registers(graph, lv.pre, post);
            self.join_registers(graph, lv.pre, Origin::Output(theta.node(), lv.output));
        }
        Ok(())
    }

    fn analyze_simple(&mut self, graph: &Graph, node: NodeId) -> Result<()> {
        let operation = graph.node(node).operation();

        if operation.downcast_ref::<AllocaOperation>().is_some() {
            let location = self.fresh(LocationKind::Alloca(node));
            let register = self.register(Origin::Output(node, 0));
            let pointee = self.ensure_pointee(register);
            self.join(pointee, location);
            return Ok(());
        }
        if operation.downcast_ref::<MallocOperation>().is_some() {
            let location = self.fresh(LocationKind::Malloc(node));
            let register = self.register(Origin::Output(node, 0));
            let pointee = self.ensure_pointee(register);
            self.join(pointee, location);
            return Ok(());
        }
        if operation.downcast_ref::<LoadOperation>().is_some() {
            let loaded = Origin::Output(node, 0);
            if graph.origin_type(loaded).is_pointer() {
                let address = self.register(graph.node(node).input(0).origin());
                let object = self.ensure_pointee(address);
                let held = self.ensure_pointee(object);
                let value = self.register(loaded);
                let value_pointee = self.ensure_pointee(value);
                self.join(held, value_pointee);
            }
            return Ok(());
        }
        if operation.downcast_ref::<StoreOperation>().is_some() {
            let stored = graph.node(node).input(1).origin();
            if graph.origin_type(stored).is_pointer() {
                let address = self.register(graph.node(node).input(0).origin());
                let object = self.ensure_pointee(address);
                let held = self.ensure_pointee(object);
                let value = self.register(stored);
                let value_pointee = self.ensure_pointee(value);
                self.join(held, value_pointee);
            }
            return Ok(());
        }
        if operation.downcast_ref::<GetElementPtrOperation>().is_some() {
            self.join_registers(
                graph,
                graph.node(node).input(0).origin(),
                Origin::Output(node, 0),
            );
            return Ok(());
        }
        if operation.downcast_ref::<BitCastOperation>().is_some() {
            self.join_registers(
                graph,
                graph.node(node).input(0).origin(),
                Origin::Output(node, 0),
            );
            return Ok(());
        }
        if operation.downcast_ref::<SelectOperation>().is_some() {
            let output = Origin::Output(node, 0);
            self.join_registers(graph, graph.node(node).input(1).origin(), output);
            self.join_registers(graph, graph.node(node).input(2).origin(), output);
            return Ok(());
        }
        if operation.downcast_ref::<Bits2PtrOperation>().is_some() {
            let register = self.register(Origin::Output(node, 0));
            self.mark_unknown(register);
            return Ok(());
        }
        if operation.downcast_ref::<Ptr2BitsOperation>().is_some() {
            let register = self.register(graph.node(node).input(0).origin());
            self.mark_unknown(register);
            return Ok(());
        }
        if operation
            .downcast_ref::<ConstantPointerNullOperation>()
            .is_some()
        {
            self.register(Origin::Output(node, 0));
            return Ok(());
        }
        if operation.downcast_ref::<UndefValueOperation>().is_some() {
            if graph.origin_type(Origin::Output(node, 0)).is_pointer() {
                self.register(Origin::Output(node, 0));
            }
            return Ok(());
        }
        if operation.downcast_ref::<MemCpyOperation>().is_some() {
            let destination = self.register(graph.node(node).input(0).origin());
            let source = self.register(graph.node(node).input(1).origin());
            let destination_object = self.ensure_pointee(destination);
            let source_object = self.ensure_pointee(source);
            // the copied contents may themselves be pointers; join what
            // the two objects hold, one level of indirection deep
            let destination_held = self.ensure_pointee(destination_object);
            let source_held = self.ensure_pointee(source_object);
            self.join(destination_held, source_held);
            return Ok(());
        }
        if operation.downcast_ref::<CallOperation>().is_some() {
            return self.analyze_call(graph, node);
        }

        Ok(())
    }

    fn analyze_call(&mut self, graph: &Graph, node: NodeId) -> Result<()> {
        let callee = graph.trace_producer(graph.node(node).input(0).origin());
        let target = graph
            .origin_node(callee)
            .and_then(|producer| LambdaNode::from_node(graph, producer));

        match target {
            Some(lambda) => {
                // direct call: arguments flow into formals, results flow
                // out of the function results
                let formals = lambda.function_arguments(graph);
                for (index, formal) in formals.iter().enumerate() {
                    let actual = graph.node(node).input(index + 1).origin();
                    self.join_registers(graph, actual, *formal);
                }
                let sub = lambda.subregion(graph);
                for (index, result) in lambda.function_results(graph).iter().enumerate() {
                    let returned = graph.region(sub).result(*result).origin();
                    self.join_registers(graph, returned, Origin::Output(node, index));
                }
            }
            None => {
                debug!(call = %node, "indirect call; marking pointer operands unknown");
                for input in 1..graph.node(node).ninputs() {
                    let origin = graph.node(node).input(input).origin();
                    if graph.origin_type(origin).is_pointer() {
                        let register = self.register(origin);
                        self.mark_unknown(register);
                    }
                }
                for output in 0..graph.node(node).noutputs() {
                    let origin = Origin::Output(node, output);
                    if graph.origin_type(origin).is_pointer() {
                        let register = self.register(origin);
                        self.mark_unknown(register);
                    }
                }
            }
        }
        Ok(())
    }

    // ---- points-to graph construction --------------------------------------

    fn finish(mut self) -> PointsToGraph {
        let mut graph = PointsToGraph::new();

        // materialize memory nodes
        let mut memory_of: HashMap<usize, MemoryNodeId> = HashMap::new();
        for index in 0..self.locations.len() {
            let id = match self.locations[index].kind {
                LocationKind::Alloca(node) => graph.add_memory_node(MemoryNodeKind::Alloca(node)),
                LocationKind::Malloc(node) => graph.add_memory_node(MemoryNodeKind::Malloc(node)),
                LocationKind::Global(node) => graph.add_memory_node(MemoryNodeKind::Global(node)),
                LocationKind::Lambda(node) => graph.add_memory_node(MemoryNodeKind::Lambda(node)),
                LocationKind::Import(arg) => graph.add_memory_node(MemoryNodeKind::Import(arg)),
                LocationKind::Register(..) | LocationKind::Dummy => continue,
            };
            memory_of.insert(index, id);
        }

        // group members by set representative
        let mut members: HashMap<usize, Vec<usize>> = HashMap::new();
        for index in 0..self.locations.len() {
            let root = self.dset.find(index);
            members.entry(root).or_default().push(index);
        }

        let memory_members = |members: &HashMap<usize, Vec<usize>>,
                              memory_of: &HashMap<usize, MemoryNodeId>,
                              root: usize| {
            members
                .get(&root)
                .map(|locs| {
                    locs.iter()
                        .filter_map(|l| memory_of.get(l).copied())
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default()
        };

        // escape closure: imports and exported symbols escape, and so does
        // everything an escaped object may hold
        let mut escaped: Vec<usize> = Vec::new();
        for index in 0..self.locations.len() {
            let is_seed = match self.locations[index].kind {
                LocationKind::Import(..) => true,
                LocationKind::Global(..) | LocationKind::Lambda(..) => {
                    let root = self.dset.find(index);
                    self.locations[root].unknown
                }
                _ => false,
            };
            if is_seed {
                escaped.push(index);
            }
        }
        let mut worklist = escaped.clone();
        while let Some(location) = worklist.pop() {
            let root = self.dset.find(location);
            if let Some(pointee) = self.locations[root].points_to {
                let proot = self.dset.find(pointee);
                for member in members.get(&proot).cloned().unwrap_or_default() {
                    if memory_of.contains_key(&member) && !escaped.contains(&member) {
                        escaped.push(member);
                        worklist.push(member);
                    }
                }
            }
        }
        for location in &escaped {
            if let Some(id) = memory_of.get(location) {
                graph.mark_escaped(*id);
            }
        }

        // register targets
        let register_origins: Vec<(Origin, usize)> =
            self.registers.iter().map(|(o, l)| (*o, *l)).collect();
        for (origin, location) in register_origins {
            let root = self.dset.find(location);
            let unknown = self.locations[root].unknown;
            let mut targets = RegisterTargets {
                targets: Default::default(),
                unknown,
            };
            if let Some(pointee) = self.locations[root].points_to {
                let proot = self.dset.find(pointee);
                for id in memory_members(&members, &memory_of, proot) {
                    targets.targets.insert(id);
                }
            }
            graph.set_register(origin, targets);
        }

        graph
    }
}
