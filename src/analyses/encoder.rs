//! The memory-state encoder.
//!
//! For each lambda, consumes a mod/ref summary over the points-to graph
//! and routes one memory-state edge per memory node through exactly those
//! operations that may touch the memory it represents. Recoverable
//! failures (a pointer reaching an empty memory-node set, a state missing
//! on region entry) are resolved by inserting an undefined memory state;
//! they are never reported.

use crate::analyses::mod_ref::ModRefSummary;
use crate::analyses::points_to_graph::MemoryNodeId;
use crate::core::{
    DeltaNode, GammaNode, Graph, LambdaNode, NodeId, Origin, PhiNode, RegionId, ThetaNode,
    TopDownTraverser, Type, User,
};
use crate::dialects::mem::{
    self, AllocaOperation, CallOperation, FreeOperation, LoadOperation, MallocOperation,
    MemCpyOperation, StoreOperation,
};
use crate::passes::{DeadNodeElimination, Transformation};
use anyhow::Result;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

/// Rewrites a graph in place so that every memory-touching operation
/// threads the state edges of the memory nodes it may reach.
pub struct MemoryStateEncoder<'a> {
    summary: &'a dyn ModRefSummary,
    /// Per-region: the current state edge for each memory node.
    states: HashMap<RegionId, HashMap<MemoryNodeId, Origin>>,
    /// Per-region undef sentinel, created on first demand.
    undef_states: HashMap<RegionId, Origin>,
    /// New pointer outputs standing for analyzed ones.
    address_aliases: HashMap<Origin, Origin>,
    /// Replacement nodes the traversal must not encode again.
    replacements: HashSet<NodeId>,
}

impl<'a> MemoryStateEncoder<'a> {
    /// Encodes the whole graph and sweeps the dead pre-encoding state
    /// chains.
    pub fn encode(graph: &mut Graph, summary: &'a dyn ModRefSummary) -> Result<()> {
        let mut encoder = MemoryStateEncoder {
            summary,
            states: HashMap::new(),
            undef_states: HashMap::new(),
            address_aliases: HashMap::new(),
            replacements: HashSet::new(),
        };
        encoder.encode_region(graph, graph.root())?;

        DeadNodeElimination::default().run(graph)?;
        Ok(())
    }

    fn encode_region(&mut self, graph: &mut Graph, region: RegionId) -> Result<()> {
        let mut traverser = TopDownTraverser::new(graph, region);
        while let Some(node) = traverser.next(graph) {
            if self.replacements.contains(&node) {
                continue;
            }
            if graph.node(node).is_structural() {
                self.encode_structural(graph, node)?;
            } else {
                self.encode_simple(graph, node)?;
            }
        }
        Ok(())
    }

    fn encode_structural(&mut self, graph: &mut Graph, node: NodeId) -> Result<()> {
        if let Some(lambda) = LambdaNode::from_node(graph, node) {
            return self.encode_lambda(graph, lambda);
        }
        if DeltaNode::from_node(graph, node).is_some() {
            return Ok(());
        }
        if let Some(phi) = PhiNode::from_node(graph, node) {
            let sub = phi.subregion(graph);
            return self.encode_region(graph, sub);
        }
        if let Some(gamma) = GammaNode::from_node(graph, node) {
            return self.encode_gamma(graph, gamma);
        }
        if let Some(theta) = ThetaNode::from_node(graph, node) {
            return self.encode_theta(graph, theta);
        }
        Ok(())
    }

    fn encode_simple(&mut self, graph: &mut Graph, node: NodeId) -> Result<()> {
        let operation = graph.node(node).operation();
        if operation.downcast_ref::<AllocaOperation>().is_some() {
            self.encode_alloca(graph, node)
        } else if operation.downcast_ref::<MallocOperation>().is_some() {
            self.encode_malloc(graph, node)
        } else if operation.downcast_ref::<LoadOperation>().is_some() {
            self.encode_load(graph, node)
        } else if operation.downcast_ref::<StoreOperation>().is_some() {
            self.encode_store(graph, node)
        } else if operation.downcast_ref::<CallOperation>().is_some() {
            self.encode_call(graph, node)
        } else if operation.downcast_ref::<FreeOperation>().is_some() {
            self.encode_free(graph, node)
        } else if operation.downcast_ref::<MemCpyOperation>().is_some() {
            self.encode_memcpy(graph, node)
        } else {
            // memory-state routing nodes and stateless operations pass
            // through untouched
            Ok(())
        }
    }

    // ---- state map plumbing ------------------------------------------------

    fn push_region(&mut self, region: RegionId) {
        let previous = self.states.insert(region, HashMap::new());
        assert!(previous.is_none(), "region pushed twice");
    }

    fn pop_region(&mut self, region: RegionId) {
        self.states.remove(&region);
        self.undef_states.remove(&region);
    }

    fn insert_state(&mut self, region: RegionId, memory_node: MemoryNodeId, state: Origin) {
        self.states
            .entry(region)
            .or_default()
            .insert(memory_node, state);
    }

    fn known_state(&self, region: RegionId, memory_node: MemoryNodeId) -> Option<Origin> {
        self.states
            .get(&region)
            .and_then(|map| map.get(&memory_node))
            .copied()
    }

    /// The current state edge for a memory node, falling back to the
    /// region's undef sentinel.
    fn state_or_undef(
        &mut self,
        graph: &mut Graph,
        region: RegionId,
        memory_node: MemoryNodeId,
    ) -> Result<Origin> {
        if let Some(state) = self.known_state(region, memory_node) {
            return Ok(state);
        }
        let undef = match self.undef_states.get(&region) {
            Some(undef) => *undef,
            None => {
                let undef = mem::undef(graph, region, Type::memory_state())?;
                self.undef_states.insert(region, undef);
                undef
            }
        };
        self.insert_state(region, memory_node, undef);
        Ok(undef)
    }

    fn states_or_undef(
        &mut self,
        graph: &mut Graph,
        region: RegionId,
        memory_nodes: &BTreeSet<MemoryNodeId>,
    ) -> Result<Vec<Origin>> {
        memory_nodes
            .iter()
            .map(|m| self.state_or_undef(graph, region, *m))
            .collect()
    }

    fn resolve_address(&self, origin: Origin) -> Origin {
        let mut current = origin;
        while let Some(next) = self.address_aliases.get(&current) {
            current = *next;
        }
        current
    }

    fn output_nodes(&self, origin: Origin) -> BTreeSet<MemoryNodeId> {
        self.summary.output_nodes(self.resolve_address(origin))
    }

    // ---- simple operations -------------------------------------------------

    fn encode_alloca(&mut self, graph: &mut Graph, node: NodeId) -> Result<()> {
        let region = graph.node(node).region();
        let Some(memory_node) = self.summary.points_to_graph().alloca_node(node) else {
            return Ok(());
        };
        let state = Origin::Output(node, 1);
        // under lifetime-agnostic summarization the state already exists;
        // the fresh allocation takes it over
        self.insert_state(region, memory_node, state);
        Ok(())
    }

    fn encode_malloc(&mut self, graph: &mut Graph, node: NodeId) -> Result<()> {
        let region = graph.node(node).region();
        let Some(memory_node) = self.summary.points_to_graph().malloc_node(node) else {
            return Ok(());
        };
        // static heap model: multiple runtime invocations share one
        // abstract location, so the previous state must survive the merge
        let previous = self.state_or_undef(graph, region, memory_node)?;
        let merged = mem::memory_state_merge(graph, region, &[Origin::Output(node, 1), previous])?;
        self.insert_state(region, memory_node, merged);
        Ok(())
    }

    fn encode_load(&mut self, graph: &mut Graph, node: NodeId) -> Result<()> {
        let region = graph.node(node).region();
        let address = graph.node(node).input(0).origin();
        let memory_nodes = self.output_nodes(address);
        let states = self.states_or_undef(graph, region, &memory_nodes)?;

        let operation = graph
            .node(node)
            .operation()
            .downcast_ref::<LoadOperation>()
            .unwrap();
        let loaded_type = operation.loaded_type().clone();
        let alignment = operation.alignment();

        let outputs = mem::load(graph, address, &states, loaded_type.clone(), alignment)?;
        let new_node = graph.origin_node(outputs[0]).unwrap();
        self.replacements.insert(new_node);

        graph.divert_users(Origin::Output(node, 0), outputs[0])?;
        for (index, memory_node) in memory_nodes.iter().enumerate() {
            self.insert_state(region, *memory_node, outputs[1 + index]);
        }

        if loaded_type.is_pointer() {
            let original = self.resolve_address(Origin::Output(node, 0));
            self.address_aliases.insert(outputs[0], original);
        }
        Ok(())
    }

    fn encode_store(&mut self, graph: &mut Graph, node: NodeId) -> Result<()> {
        let region = graph.node(node).region();
        let address = graph.node(node).input(0).origin();
        let value = graph.node(node).input(1).origin();
        let memory_nodes = self.output_nodes(address);
        let states = self.states_or_undef(graph, region, &memory_nodes)?;

        let alignment = 0;
        let outputs = mem::store(graph, address, value, &states, alignment)?;
        if let Some(first) = outputs.first() {
            let new_node = graph.origin_node(*first).unwrap();
            self.replacements.insert(new_node);
        }
        for (index, memory_node) in memory_nodes.iter().enumerate() {
            self.insert_state(region, *memory_node, outputs[index]);
        }
        Ok(())
    }

    fn encode_free(&mut self, graph: &mut Graph, node: NodeId) -> Result<()> {
        let region = graph.node(node).region();
        let address = graph.node(node).input(0).origin();
        let io = graph.node(node).input(graph.node(node).ninputs() - 1).origin();
        let memory_nodes = self.output_nodes(address);
        let states = self.states_or_undef(graph, region, &memory_nodes)?;

        let outputs = mem::free(graph, address, &states, io)?;
        let new_node = graph.origin_node(outputs[0]).unwrap();
        self.replacements.insert(new_node);

        // the i/o state is threaded separately
        let old_io = Origin::Output(node, graph.node(node).noutputs() - 1);
        graph.divert_users(old_io, *outputs.last().unwrap())?;

        for (index, memory_node) in memory_nodes.iter().enumerate() {
            self.insert_state(region, *memory_node, outputs[index]);
        }
        Ok(())
    }

    fn encode_call(&mut self, graph: &mut Graph, node: NodeId) -> Result<()> {
        let region = graph.node(node).region();

        // entry: merge the per-memory-node edges into the call's state input
        let entry_nodes = self.summary.call_entry_nodes(node);
        let entry_states = self.states_or_undef(graph, region, &entry_nodes)?;
        if !entry_states.is_empty() {
            let merged = mem::call_entry_memory_state_merge(graph, region, &entry_states)?;
            graph.divert(mem::call_memory_state_input(graph, node), merged)?;
        }

        // exit: split the call's state output back into per-node edges
        let exit_nodes = self.summary.call_exit_nodes(node);
        if !exit_nodes.is_empty() {
            let states = mem::call_exit_memory_state_split(
                graph,
                region,
                mem::call_memory_state_output(graph, node),
                exit_nodes.len(),
            )?;
            for (index, memory_node) in exit_nodes.iter().enumerate() {
                self.insert_state(region, *memory_node, states[index]);
            }
        }
        Ok(())
    }

    fn encode_memcpy(&mut self, graph: &mut Graph, node: NodeId) -> Result<()> {
        let region = graph.node(node).region();
        let destination = graph.node(node).input(0).origin();
        let source = graph.node(node).input(1).origin();
        let length = graph.node(node).input(2).origin();

        let destination_nodes = self.output_nodes(destination);
        let source_nodes = self.output_nodes(source);
        let mut states = self.states_or_undef(graph, region, &destination_nodes)?;
        states.extend(self.states_or_undef(graph, region, &source_nodes)?);

        let outputs = mem::memcpy(graph, destination, source, length, &states)?;
        if let Some(first) = outputs.first() {
            let new_node = graph.origin_node(*first).unwrap();
            self.replacements.insert(new_node);
        }

        let ndest = destination_nodes.len();
        for (index, memory_node) in destination_nodes.iter().enumerate() {
            self.insert_state(region, *memory_node, outputs[index]);
        }
        for (index, memory_node) in source_nodes.iter().enumerate() {
            self.insert_state(region, *memory_node, outputs[ndest + index]);
        }
        Ok(())
    }

    // ---- structural operations ---------------------------------------------

    fn encode_lambda(&mut self, graph: &mut Graph, lambda: LambdaNode) -> Result<()> {
        let sub = lambda.subregion(graph);
        self.push_region(sub);
        self.encode_lambda_entry(graph, &lambda)?;
        self.encode_region(graph, sub)?;
        self.encode_lambda_exit(graph, &lambda)?;
        self.pop_region(sub);
        Ok(())
    }

    fn encode_lambda_entry(&mut self, graph: &mut Graph, lambda: &LambdaNode) -> Result<()> {
        let sub = lambda.subregion(graph);
        let argument = match mem::lambda_memory_state_argument(graph, lambda) {
            Ok(argument) => argument,
            Err(_) => {
                debug!(lambda = %lambda.node(), "lambda carries no memory state; skipping");
                return Ok(());
            }
        };
        let users = graph.users(argument);

        let memory_nodes = self.summary.lambda_entry_nodes(lambda.node());
        if memory_nodes.is_empty() {
            return Ok(());
        }

        let states =
            mem::lambda_entry_memory_state_split(graph, sub, argument, memory_nodes.len())?;
        for (index, memory_node) in memory_nodes.iter().enumerate() {
            self.insert_state(sub, *memory_node, states[index]);
        }

        // every memory-state consumer in the body must transitively depend
        // on the split, so the split can never sink below a consumer
        let merged = mem::memory_state_merge(graph, sub, &states)?;
        for user in users {
            graph.divert(user, merged)?;
        }
        Ok(())
    }

    fn encode_lambda_exit(&mut self, graph: &mut Graph, lambda: &LambdaNode) -> Result<()> {
        let sub = lambda.subregion(graph);
        let result_user = match mem::lambda_memory_state_result(graph, lambda) {
            Ok(user) => user,
            Err(_) => return Ok(()),
        };

        let memory_nodes = self.summary.lambda_exit_nodes(lambda.node());
        let merged = if memory_nodes.is_empty() {
            mem::undef(graph, sub, Type::memory_state())?
        } else {
            let states = self.states_or_undef(graph, sub, &memory_nodes)?;
            mem::lambda_exit_memory_state_merge(graph, sub, &states)?
        };
        graph.divert(result_user, merged)?;
        Ok(())
    }

    fn encode_gamma(&mut self, graph: &mut Graph, gamma: GammaNode) -> Result<()> {
        for k in 0..gamma.nsubregions(graph) {
            self.push_region(gamma.subregion(graph, k));
        }

        self.encode_gamma_entry(graph, &gamma)?;
        for k in 0..gamma.nsubregions(graph) {
            let sub = gamma.subregion(graph, k);
            self.encode_region(graph, sub)?;
        }
        self.encode_gamma_exit(graph, &gamma)?;

        for k in 0..gamma.nsubregions(graph) {
            self.pop_region(gamma.subregion(graph, k));
        }
        Ok(())
    }

    fn encode_gamma_entry(&mut self, graph: &mut Graph, gamma: &GammaNode) -> Result<()> {
        let region = graph.node(gamma.node()).region();
        let memory_nodes = self.summary.gamma_entry_nodes(gamma.node());
        for memory_node in memory_nodes {
            let state = self.state_or_undef(graph, region, memory_node)?;
            let entry = gamma.add_entry_var(graph, state)?;
            for argument in entry.branch_arguments {
                let sub = graph.origin_region(argument);
                self.insert_state(sub, memory_node, argument);
            }
        }
        Ok(())
    }

    fn encode_gamma_exit(&mut self, graph: &mut Graph, gamma: &GammaNode) -> Result<()> {
        let region = graph.node(gamma.node()).region();
        let memory_nodes = self.summary.gamma_exit_nodes(gamma.node());
        for memory_node in memory_nodes {
            let mut origins = Vec::new();
            for k in 0..gamma.nsubregions(graph) {
                let sub = gamma.subregion(graph, k);
                origins.push(self.state_or_undef(graph, sub, memory_node)?);
            }
            let exit = gamma.add_exit_var(graph, &origins)?;
            self.insert_state(region, memory_node, exit.output);
        }
        Ok(())
    }

    fn encode_theta(&mut self, graph: &mut Graph, theta: ThetaNode) -> Result<()> {
        let sub = theta.subregion(graph);
        self.push_region(sub);

        let region = graph.node(theta.node()).region();
        let memory_nodes = self.summary.theta_entry_exit_nodes(theta.node());

        // entry: every memory node becomes a loop variable
        let mut loop_vars = Vec::new();
        for memory_node in &memory_nodes {
            let state = self.state_or_undef(graph, region, *memory_node)?;
            let lv = theta.add_loop_var(graph, state)?;
            self.insert_state(sub, *memory_node, lv.pre);
            loop_vars.push((*memory_node, lv));
        }

        self.encode_region(graph, sub)?;

        // exit: wire each post-result to the subregion's final state
        for (memory_node, lv) in loop_vars {
            let state = self.state_or_undef(graph, sub, memory_node)?;
            graph.divert(User::Result(sub, lv.post), state)?;
            self.insert_state(region, memory_node, Origin::Output(theta.node(), lv.output));
        }

        self.pop_region(sub);
        Ok(())
    }
}
