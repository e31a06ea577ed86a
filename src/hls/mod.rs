//! High-level-synthesis constructs: the loop node built on back-edges,
//! the dataflow routing operations (mux, branch, buffer), and the
//! conversion of routing-only gammas into muxes.

use crate::core::{
    control_false, ArgumentKind, EntryVar, GammaNode, Graph, NodeId, Operation, Origin, RegionId,
    StructuralError, Type, UnsupportedError, User,
};
use anyhow::{bail, Result};
use tracing::{debug, trace};

/// Structural operation of the HLS loop node.
#[derive(Clone, Debug)]
pub struct LoopOperation;

impl Operation for LoopOperation {
    fn arguments(&self) -> Vec<Type> {
        Vec::new()
    }

    fn results(&self) -> Vec<Type> {
        Vec::new()
    }

    fn debug_string(&self) -> String {
        "HLS_LOOP".to_string()
    }

    fn copy_operation(&self) -> Box<dyn Operation> {
        Box::new(LoopOperation)
    }

    fn eq_operation(&self, other: &dyn Operation) -> bool {
        other.downcast_ref::<LoopOperation>().is_some()
    }

    fn is_structural(&self) -> bool {
        true
    }

    fn allows_backedges(&self) -> bool {
        true
    }
}

/// Selects one of N data inputs by a control predicate.
#[derive(Clone, Debug)]
pub struct MuxOperation {
    nalternatives: usize,
    ty: Type,
    /// A discarding mux drops the non-selected tokens.
    discarding: bool,
}

impl MuxOperation {
    pub fn new(nalternatives: usize, ty: Type, discarding: bool) -> MuxOperation {
        MuxOperation {
            nalternatives,
            ty,
            discarding,
        }
    }

    pub fn discarding(&self) -> bool {
        self.discarding
    }
}

impl Operation for MuxOperation {
    fn arguments(&self) -> Vec<Type> {
        let mut types = vec![Type::control(self.nalternatives)];
        types.extend(vec![self.ty.clone(); self.nalternatives]);
        types
    }

    fn results(&self) -> Vec<Type> {
        vec![self.ty.clone()]
    }

    fn debug_string(&self) -> String {
        "HLS_MUX".to_string()
    }

    fn copy_operation(&self) -> Box<dyn Operation> {
        Box::new(self.clone())
    }

    fn eq_operation(&self, other: &dyn Operation) -> bool {
        other
            .downcast_ref::<MuxOperation>()
            .map(|op| {
                op.nalternatives == self.nalternatives
                    && op.ty == self.ty
                    && op.discarding == self.discarding
            })
            .unwrap_or(false)
    }
}

/// Routes one data input to one of N outputs by a control predicate.
#[derive(Clone, Debug)]
pub struct BranchOperation {
    nalternatives: usize,
    ty: Type,
    /// Loop branches close the iteration/exit split of a loop node.
    loop_branch: bool,
}

impl BranchOperation {
    pub fn new(nalternatives: usize, ty: Type, loop_branch: bool) -> BranchOperation {
        BranchOperation {
            nalternatives,
            ty,
            loop_branch,
        }
    }
}

impl Operation for BranchOperation {
    fn arguments(&self) -> Vec<Type> {
        vec![Type::control(self.nalternatives), self.ty.clone()]
    }

    fn results(&self) -> Vec<Type> {
        vec![self.ty.clone(); self.nalternatives]
    }

    fn debug_string(&self) -> String {
        "HLS_BRANCH".to_string()
    }

    fn copy_operation(&self) -> Box<dyn Operation> {
        Box::new(self.clone())
    }

    fn eq_operation(&self, other: &dyn Operation) -> bool {
        other
            .downcast_ref::<BranchOperation>()
            .map(|op| {
                op.nalternatives == self.nalternatives
                    && op.ty == self.ty
                    && op.loop_branch == self.loop_branch
            })
            .unwrap_or(false)
    }
}

/// A FIFO of fixed capacity on a dataflow edge.
#[derive(Clone, Debug)]
pub struct BufferOperation {
    capacity: usize,
    ty: Type,
    pass_through: bool,
}

impl BufferOperation {
    pub fn new(capacity: usize, ty: Type, pass_through: bool) -> BufferOperation {
        BufferOperation {
            capacity,
            ty,
            pass_through,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Operation for BufferOperation {
    fn arguments(&self) -> Vec<Type> {
        vec![self.ty.clone()]
    }

    fn results(&self) -> Vec<Type> {
        vec![self.ty.clone()]
    }

    fn debug_string(&self) -> String {
        format!("HLS_BUF({})", self.capacity)
    }

    fn copy_operation(&self) -> Box<dyn Operation> {
        Box::new(self.clone())
    }

    fn eq_operation(&self, other: &dyn Operation) -> bool {
        other
            .downcast_ref::<BufferOperation>()
            .map(|op| {
                op.capacity == self.capacity
                    && op.ty == self.ty
                    && op.pass_through == self.pass_through
            })
            .unwrap_or(false)
    }
}

/// Decouples the loop predicate from the iteration logic consuming it.
#[derive(Clone, Debug)]
pub struct PredicateBufferOperation {
    nalternatives: usize,
}

impl PredicateBufferOperation {
    pub fn new(nalternatives: usize) -> PredicateBufferOperation {
        PredicateBufferOperation { nalternatives }
    }
}

impl Operation for PredicateBufferOperation {
    fn arguments(&self) -> Vec<Type> {
        vec![Type::control(self.nalternatives)]
    }

    fn results(&self) -> Vec<Type> {
        vec![Type::control(self.nalternatives)]
    }

    fn debug_string(&self) -> String {
        "HLS_PRED_BUF".to_string()
    }

    fn copy_operation(&self) -> Box<dyn Operation> {
        Box::new(self.clone())
    }

    fn eq_operation(&self, other: &dyn Operation) -> bool {
        other
            .downcast_ref::<PredicateBufferOperation>()
            .map(|op| op.nalternatives == self.nalternatives)
            .unwrap_or(false)
    }
}

// ---- creation helpers ------------------------------------------------------

pub fn mux(
    graph: &mut Graph,
    predicate: Origin,
    operands: &[Origin],
    discarding: bool,
) -> Result<Origin> {
    let region = graph.origin_region(predicate);
    let nalternatives = graph
        .origin_type(predicate)
        .nalternatives()
        .ok_or_else(|| StructuralError("mux predicate must be a control type".to_string()))?;
    if operands.len() != nalternatives {
        bail!(StructuralError(format!(
            "mux needs {} operands, {} given",
            nalternatives,
            operands.len()
        )));
    }
    let ty = graph.origin_type(operands[0]);
    let op = MuxOperation::new(nalternatives, ty, discarding);
    let mut inputs = vec![predicate];
    inputs.extend_from_slice(operands);
    let node = graph.add_simple_node(region, Box::new(op), &inputs)?;
    Ok(Origin::Output(node, 0))
}

pub fn branch(
    graph: &mut Graph,
    predicate: Origin,
    value: Origin,
    loop_branch: bool,
) -> Result<Vec<Origin>> {
    let region = graph.origin_region(predicate);
    let nalternatives = graph
        .origin_type(predicate)
        .nalternatives()
        .ok_or_else(|| StructuralError("branch predicate must be a control type".to_string()))?;
    let ty = graph.origin_type(value);
    let op = BranchOperation::new(nalternatives, ty, loop_branch);
    let node = graph.add_simple_node(region, Box::new(op), &[predicate, value])?;
    Ok(graph.outputs(node))
}

pub fn buffer(
    graph: &mut Graph,
    operand: Origin,
    capacity: usize,
    pass_through: bool,
) -> Result<Origin> {
    let region = graph.origin_region(operand);
    let ty = graph.origin_type(operand);
    let op = BufferOperation::new(capacity, ty, pass_through);
    let node = graph.add_simple_node(region, Box::new(op), &[operand])?;
    Ok(Origin::Output(node, 0))
}

pub fn predicate_buffer(graph: &mut Graph, operand: Origin) -> Result<Origin> {
    let region = graph.origin_region(operand);
    let nalternatives = graph
        .origin_type(operand)
        .nalternatives()
        .ok_or_else(|| StructuralError("predicate buffer needs a control type".to_string()))?;
    let op = PredicateBufferOperation::new(nalternatives);
    let node = graph.add_simple_node(region, Box::new(op), &[operand])?;
    Ok(Origin::Output(node, 0))
}

// ---- the loop node ---------------------------------------------------------

/// The HLS loop: a theta specialization whose iteration state lives on
/// explicit back-edges, with a buffered predicate.
#[derive(Clone, Copy, Debug)]
pub struct LoopNode {
    node: NodeId,
}

impl LoopNode {
    pub fn create(graph: &mut Graph, region: RegionId) -> Result<LoopNode> {
        let node = graph.add_structural_node(region, Box::new(LoopOperation), 1);
        let loop_node = LoopNode { node };
        let sub = loop_node.subregion(graph);

        // the predicate travels on its own back-edge; a two-deep buffer
        // breaks the ready-signal cycle
        let (pred_arg, pred_res) = graph.add_backedge(sub, Type::control(2))?;
        let initial = control_false(graph, sub)?;
        graph.divert(User::Result(sub, pred_res), initial)?;
        let pre = buffer(graph, pred_arg, 2, false)?;
        predicate_buffer(graph, pre)?;

        Ok(loop_node)
    }

    pub fn from_node(graph: &Graph, node: NodeId) -> Option<LoopNode> {
        graph
            .node(node)
            .operation()
            .downcast_ref::<LoopOperation>()
            .map(|_| LoopNode { node })
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn subregion(&self, graph: &Graph) -> RegionId {
        graph.node(self.node).subregion(0)
    }

    /// The predicate's back-edge result (always result 0).
    pub fn predicate_result(&self) -> usize {
        0
    }

    /// The current loop-repeat predicate origin.
    pub fn predicate_origin(&self, graph: &Graph) -> Origin {
        let sub = self.subregion(graph);
        graph.region(sub).result(self.predicate_result()).origin()
    }

    /// The buffered predicate all iteration muxes listen to.
    pub fn predicate_buffer(&self, graph: &Graph) -> Result<Origin> {
        let sub = self.subregion(graph);
        for user in graph.users(Origin::Argument(sub, 0)) {
            let User::Input(buf, _) = user else { continue };
            if graph
                .node(buf)
                .operation()
                .downcast_ref::<BufferOperation>()
                .is_none()
            {
                continue;
            }
            for buf_user in graph.users(Origin::Output(buf, 0)) {
                let User::Input(pbuf, _) = buf_user else { continue };
                if graph
                    .node(pbuf)
                    .operation()
                    .downcast_ref::<PredicateBufferOperation>()
                    .is_some()
                {
                    return Ok(Origin::Output(pbuf, 0));
                }
            }
        }
        bail!(StructuralError(
            "loop node lost its predicate buffer".to_string(),
        ))
    }

    /// Rewires the loop-repeat predicate, pruning the previous producer
    /// when it became dead.
    pub fn set_predicate(&self, graph: &mut Graph, origin: Origin) -> Result<()> {
        let old = self.predicate_origin(graph);
        graph.divert_users(old, origin)?;
        if let Some(producer) = graph.origin_node(old) {
            if graph.node(producer).is_dead() {
                graph.remove_node(producer);
            }
        }
        Ok(())
    }

    pub fn add_backedge(&self, graph: &mut Graph, ty: Type) -> Result<(Origin, usize)> {
        let sub = self.subregion(graph);
        graph.add_backedge(sub, ty)
    }

    /// Adds a loop variable: an entry mux joining first-iteration and
    /// back-edge values, and an exit branch splitting iteration from exit.
    /// Returns the mux output (the in-loop value) and the structural
    /// output.
    pub fn add_loop_var(&self, graph: &mut Graph, origin: Origin) -> Result<(Origin, Origin)> {
        let sub = self.subregion(graph);
        let ty = graph.origin_type(origin);

        let input = graph.add_input(self.node, origin)?;
        let output = graph.add_output(self.node, ty.clone());

        let entry = graph.add_argument(sub, ty.clone(), ArgumentKind::Entry { input });
        let (loop_arg, loop_res) = graph.add_backedge(sub, ty.clone())?;

        let pbuf = self.predicate_buffer(graph)?;
        let mux = mux(
            graph,
            pbuf,
            &[Origin::Argument(sub, entry), loop_arg],
            false,
        )?;
        let predicate = self.predicate_origin(graph);
        let branches = branch(graph, predicate, mux, true)?;

        graph.add_result(
            sub,
            branches[0],
            ty.clone(),
            crate::core::ResultKind::Exit { output },
        )?;
        let buffered = buffer(graph, branches[1], 2, false)?;
        graph.divert(User::Result(sub, loop_res), buffered)?;

        Ok((mux, Origin::Output(self.node, output)))
    }
}

// ---- gamma-to-mux conversion -----------------------------------------------

/// Converts routing-only gammas (no body nodes in any subregion) into mux
/// operations on the gamma predicate.
#[derive(Default)]
pub struct GammaToMux;

impl crate::passes::Transformation for GammaToMux {
    fn name(&self) -> &'static str {
        "gamma-to-mux"
    }

    fn run(&mut self, graph: &mut Graph) -> Result<()> {
        convert_region(graph, graph.root())
    }
}

fn convert_region(graph: &mut Graph, region: RegionId) -> Result<()> {
    for node in graph.region(region).nodes().to_vec() {
        if !graph.is_alive(node) {
            continue;
        }
        for sub in graph.node(node).subregions().to_vec() {
            convert_region(graph, sub)?;
        }
        if let Some(gamma) = GammaNode::from_node(graph, node) {
            convert_gamma(graph, gamma)?;
        }
    }
    Ok(())
}

fn convert_gamma(graph: &mut Graph, gamma: GammaNode) -> Result<()> {
    for k in 0..gamma.nsubregions(graph) {
        if graph.region(gamma.subregion(graph, k)).nnodes() != 0 {
            trace!(gamma = %gamma.node(), "gamma has body nodes; not converted");
            return Ok(());
        }
    }

    let entry_vars = gamma.entry_vars(graph);
    let predicate = gamma.predicate_origin(graph);

    // every exit result must route an entry variable straight through
    let mut replacements = Vec::new();
    for xv in gamma.exit_vars(graph) {
        let mut values = Vec::new();
        for (k, result) in xv.branch_results.iter().enumerate() {
            let sub = gamma.subregion(graph, k);
            let origin = graph.region(sub).result(*result).origin();
            let Some(value) = routed_value(graph, &gamma, &entry_vars, k, origin) else {
                bail!(UnsupportedError(
                    "gamma exit result does not route an entry variable".to_string(),
                ));
            };
            values.push(value);
        }
        replacements.push((xv.output, values));
    }

    debug!(gamma = %gamma.node(), "converting gamma to muxes");
    for (output, values) in replacements {
        let selected = mux(graph, predicate, &values, true)?;
        graph.divert_users(output, selected)?;
    }
    graph.remove_node(gamma.node());
    Ok(())
}

/// Maps a branch result origin back to the gamma operand feeding it.
fn routed_value(
    graph: &Graph,
    gamma: &GammaNode,
    entry_vars: &[EntryVar],
    branch: usize,
    origin: Origin,
) -> Option<Origin> {
    for ev in entry_vars {
        if ev.branch_arguments[branch] == origin {
            return Some(graph.node(gamma.node()).input(ev.input).origin());
        }
    }
    None
}
