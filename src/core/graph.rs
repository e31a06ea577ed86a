//! The graph substrate: nodes, ports, regions and their ownership.
//!
//! The graph owns slabs of nodes and regions; every cross-reference is a
//! stable typed index into those slabs. Producer endpoints ([`Origin`]) are
//! node outputs or region arguments; consumer endpoints ([`User`]) are node
//! inputs or region results. Outputs and arguments carry their user sets,
//! inputs and results carry a single origin. Node depth (longest path from
//! any region argument) is maintained incrementally after every rewire, and
//! every region tracks its top and bottom nodes for traversal seeding.

use crate::core::operation::Operation;
use crate::core::types::Type;
use anyhow::{bail, Result};
use std::any::TypeId;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Stable index of a node in its graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

/// Stable index of a region in its graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionId(pub(crate) usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl RegionId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// A producer endpoint: the output of a node, or a region argument.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Origin {
    Output(NodeId, usize),
    Argument(RegionId, usize),
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Origin::Output(node, index) => write!(f, "{}:{}", node, index),
            Origin::Argument(_, index) => write!(f, "a{}", index),
        }
    }
}

/// A consumer endpoint: the input of a node, or a region result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum User {
    Input(NodeId, usize),
    Result(RegionId, usize),
}

/// Ties a region argument to the structural boundary it crosses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArgumentKind {
    /// Root-region import of an external symbol.
    Import { name: String },
    /// Entry argument routed from a structural input (gamma entry
    /// variables, lambda/phi/delta context variables).
    Entry { input: usize },
    /// Theta pre-argument: fed by `input` on the first iteration and by the
    /// paired `result` on every subsequent one.
    Loop { input: usize, result: usize },
    /// Lambda function argument.
    Function,
    /// Phi recursion variable binding: visible inside, named outside.
    Recursion { output: usize, result: usize },
    /// Back-edge argument, paired with the back-edge result `result`.
    BackEdge { result: usize },
}

/// Ties a region result to the structural boundary it crosses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResultKind {
    /// Root-region export of a value under an external name.
    Export { name: String },
    /// Exit result wired to a structural output (gamma exit variables).
    Exit { output: usize },
    /// Theta post-result: feeds the paired pre-`argument` on iteration and
    /// the structural `output` on exit.
    Loop { output: usize, argument: usize },
    /// Lambda function result or delta initializer.
    Body,
    /// Phi recursion variable result.
    Recursion { output: usize, argument: usize },
    /// Back-edge result, paired with the back-edge argument `argument`.
    BackEdge { argument: usize },
    /// Loop continuation predicate; always the final result of its region.
    Predicate,
}

#[derive(Debug)]
pub struct InputPort {
    pub(crate) origin: Origin,
    pub(crate) ty: Type,
}

impl InputPort {
    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn ty(&self) -> &Type {
        &self.ty
    }
}

#[derive(Debug)]
pub struct OutputPort {
    pub(crate) ty: Type,
    pub(crate) users: BTreeSet<User>,
}

impl OutputPort {
    pub fn ty(&self) -> &Type {
        &self.ty
    }

    pub fn nusers(&self) -> usize {
        self.users.len()
    }

    pub fn users(&self) -> &BTreeSet<User> {
        &self.users
    }

    pub fn is_dead(&self) -> bool {
        self.users.is_empty()
    }
}

#[derive(Debug)]
pub struct ArgumentData {
    pub(crate) ty: Type,
    pub(crate) kind: ArgumentKind,
    pub(crate) users: BTreeSet<User>,
}

impl ArgumentData {
    pub fn ty(&self) -> &Type {
        &self.ty
    }

    pub fn kind(&self) -> &ArgumentKind {
        &self.kind
    }

    pub fn nusers(&self) -> usize {
        self.users.len()
    }

    pub fn users(&self) -> &BTreeSet<User> {
        &self.users
    }
}

#[derive(Debug)]
pub struct ResultData {
    pub(crate) origin: Origin,
    pub(crate) ty: Type,
    pub(crate) kind: ResultKind,
}

impl ResultData {
    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn ty(&self) -> &Type {
        &self.ty
    }

    pub fn kind(&self) -> &ResultKind {
        &self.kind
    }
}

/// A vertex of the graph: an ordered input vector, an ordered output
/// vector, one operation, and (for structural nodes) owned subregions.
#[derive(Debug)]
pub struct NodeData {
    pub(crate) region: RegionId,
    pub(crate) operation: Box<dyn Operation>,
    pub(crate) inputs: Vec<InputPort>,
    pub(crate) outputs: Vec<OutputPort>,
    pub(crate) subregions: Vec<RegionId>,
    pub(crate) depth: usize,
}

impl NodeData {
    pub fn region(&self) -> RegionId {
        self.region
    }

    pub fn operation(&self) -> &dyn Operation {
        self.operation.as_ref()
    }

    pub fn ninputs(&self) -> usize {
        self.inputs.len()
    }

    pub fn input(&self, index: usize) -> &InputPort {
        &self.inputs[index]
    }

    pub fn inputs(&self) -> &[InputPort] {
        &self.inputs
    }

    pub fn noutputs(&self) -> usize {
        self.outputs.len()
    }

    pub fn output(&self, index: usize) -> &OutputPort {
        &self.outputs[index]
    }

    pub fn outputs(&self) -> &[OutputPort] {
        &self.outputs
    }

    pub fn nsubregions(&self) -> usize {
        self.subregions.len()
    }

    pub fn subregion(&self, index: usize) -> RegionId {
        self.subregions[index]
    }

    pub fn subregions(&self) -> &[RegionId] {
        &self.subregions
    }

    pub fn is_structural(&self) -> bool {
        !self.subregions.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// A node is dead iff every one of its outputs has zero users.
    pub fn is_dead(&self) -> bool {
        self.outputs.iter().all(|o| o.is_dead())
    }
}

/// A scope in which nodes live; owned by the graph root or by a structural
/// node.
#[derive(Debug)]
pub struct RegionData {
    pub(crate) owner: Option<(NodeId, usize)>,
    pub(crate) arguments: Vec<ArgumentData>,
    pub(crate) results: Vec<ResultData>,
    pub(crate) nodes: Vec<NodeId>,
    pub(crate) top_nodes: BTreeSet<NodeId>,
    pub(crate) bottom_nodes: BTreeSet<NodeId>,
}

impl RegionData {
    /// The owning structural node and this region's subregion index, or
    /// `None` for the root region.
    pub fn owner(&self) -> Option<(NodeId, usize)> {
        self.owner
    }

    pub fn narguments(&self) -> usize {
        self.arguments.len()
    }

    pub fn argument(&self, index: usize) -> &ArgumentData {
        &self.arguments[index]
    }

    pub fn arguments(&self) -> &[ArgumentData] {
        &self.arguments
    }

    pub fn nresults(&self) -> usize {
        self.results.len()
    }

    pub fn result(&self, index: usize) -> &ResultData {
        &self.results[index]
    }

    pub fn results(&self) -> &[ResultData] {
        &self.results
    }

    /// Nodes of this region, in construction order.
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn nnodes(&self) -> usize {
        self.nodes.len()
    }

    /// Nodes with no node-input dependencies within this region.
    pub fn top_nodes(&self) -> &BTreeSet<NodeId> {
        &self.top_nodes
    }

    /// Nodes with no node-output users within this region.
    pub fn bottom_nodes(&self) -> &BTreeSet<NodeId> {
        &self.bottom_nodes
    }
}

/// A port was wired to an origin of incompatible type.
#[derive(Debug)]
pub struct TypeMismatchError {
    pub expected: String,
    pub received: String,
}

impl fmt::Display for TypeMismatchError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "type mismatch: expected {}, received {}",
            self.expected, self.received
        )
    }
}

impl std::error::Error for TypeMismatchError {}

/// A malformed graph shape; indicates a bug in the producing pass.
#[derive(Debug)]
pub struct StructuralError(pub String);

impl fmt::Display for StructuralError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "structural error: {}", self.0)
    }
}

impl std::error::Error for StructuralError {}

/// A construct a pass does not handle; the caller decides whether to skip
/// or fail.
#[derive(Debug)]
pub struct UnsupportedError(pub String);

impl fmt::Display for UnsupportedError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "unsupported: {}", self.0)
    }
}

impl std::error::Error for UnsupportedError {}

/// Per-operation-kind normal-form toggles.
#[derive(Clone, Copy, Debug)]
pub struct NormalFormPolicy {
    /// Apply reductions eagerly during node insertion.
    pub mutable: bool,
    /// Subject to common-subexpression elimination.
    pub cse: bool,
}

impl Default for NormalFormPolicy {
    fn default() -> NormalFormPolicy {
        NormalFormPolicy {
            mutable: true,
            cse: true,
        }
    }
}

/// A root region plus the per-operation-kind normal-form directory.
pub struct Graph {
    pub(crate) nodes: Vec<Option<NodeData>>,
    pub(crate) regions: Vec<Option<RegionData>>,
    root: RegionId,
    policies: HashMap<TypeId, NormalFormPolicy>,
    default_policy: NormalFormPolicy,
    pub(crate) denormalized: bool,
}

impl Default for Graph {
    fn default() -> Graph {
        Graph::new()
    }
}

impl Graph {
    pub fn new() -> Graph {
        let root = RegionData {
            owner: None,
            arguments: Vec::new(),
            results: Vec::new(),
            nodes: Vec::new(),
            top_nodes: BTreeSet::new(),
            bottom_nodes: BTreeSet::new(),
        };
        Graph {
            nodes: Vec::new(),
            regions: vec![Some(root)],
            root: RegionId(0),
            policies: HashMap::new(),
            default_policy: NormalFormPolicy::default(),
            denormalized: false,
        }
    }

    pub fn root(&self) -> RegionId {
        self.root
    }

    pub fn is_alive(&self, node: NodeId) -> bool {
        self.nodes
            .get(node.0)
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    pub fn node(&self, node: NodeId) -> &NodeData {
        self.nodes[node.0]
            .as_ref()
            .expect("node has been removed from the graph")
    }

    pub(crate) fn node_mut(&mut self, node: NodeId) -> &mut NodeData {
        self.nodes[node.0]
            .as_mut()
            .expect("node has been removed from the graph")
    }

    pub fn region(&self, region: RegionId) -> &RegionData {
        self.regions[region.0]
            .as_ref()
            .expect("region has been removed from the graph")
    }

    pub(crate) fn region_mut(&mut self, region: RegionId) -> &mut RegionData {
        self.regions[region.0]
            .as_mut()
            .expect("region has been removed from the graph")
    }

    /// All node ids of the graph that are currently alive.
    pub fn live_nodes(&self) -> Vec<NodeId> {
        (0..self.nodes.len())
            .filter(|i| self.nodes[*i].is_some())
            .map(NodeId)
            .collect()
    }

    pub fn origin_type(&self, origin: Origin) -> Type {
        match origin {
            Origin::Output(node, index) => self.node(node).output(index).ty.clone(),
            Origin::Argument(region, index) => self.region(region).argument(index).ty.clone(),
        }
    }

    pub fn origin_region(&self, origin: Origin) -> RegionId {
        match origin {
            Origin::Output(node, _) => self.node(node).region,
            Origin::Argument(region, _) => region,
        }
    }

    /// The node producing `origin`, if it is a node output.
    pub fn origin_node(&self, origin: Origin) -> Option<NodeId> {
        match origin {
            Origin::Output(node, _) => Some(node),
            Origin::Argument(..) => None,
        }
    }

    pub fn nusers(&self, origin: Origin) -> usize {
        match origin {
            Origin::Output(node, index) => self.node(node).output(index).nusers(),
            Origin::Argument(region, index) => self.region(region).argument(index).nusers(),
        }
    }

    /// The users of `origin`, cloned out so callers may mutate the graph
    /// while iterating.
    pub fn users(&self, origin: Origin) -> Vec<User> {
        match origin {
            Origin::Output(node, index) => self
                .node(node)
                .output(index)
                .users
                .iter()
                .copied()
                .collect(),
            Origin::Argument(region, index) => self
                .region(region)
                .argument(index)
                .users
                .iter()
                .copied()
                .collect(),
        }
    }

    pub fn user_origin(&self, user: User) -> Origin {
        match user {
            User::Input(node, index) => self.node(node).input(index).origin,
            User::Result(region, index) => self.region(region).result(index).origin,
        }
    }

    pub fn user_type(&self, user: User) -> Type {
        match user {
            User::Input(node, index) => self.node(node).input(index).ty.clone(),
            User::Result(region, index) => self.region(region).result(index).ty.clone(),
        }
    }

    pub fn user_region(&self, user: User) -> RegionId {
        match user {
            User::Input(node, _) => self.node(node).region,
            User::Result(region, _) => region,
        }
    }

    /// Ordered input origins of a node.
    pub fn operands(&self, node: NodeId) -> Vec<Origin> {
        self.node(node).inputs.iter().map(|i| i.origin).collect()
    }

    /// Ordered output origins of a node.
    pub fn outputs(&self, node: NodeId) -> Vec<Origin> {
        (0..self.node(node).noutputs())
            .map(|i| Origin::Output(node, i))
            .collect()
    }

    // ---- user-set and bookkeeping maintenance ------------------------------

    fn users_mut(&mut self, origin: Origin) -> &mut BTreeSet<User> {
        match origin {
            Origin::Output(node, index) => &mut self.node_mut(node).outputs[index].users,
            Origin::Argument(region, index) => &mut self.region_mut(region).arguments[index].users,
        }
    }

    fn set_user_origin(&mut self, user: User, origin: Origin) {
        match user {
            User::Input(node, index) => self.node_mut(node).inputs[index].origin = origin,
            User::Result(region, index) => self.region_mut(region).results[index].origin = origin,
        }
    }

    fn refresh_top(&mut self, node: NodeId) {
        let is_top = self
            .node(node)
            .inputs
            .iter()
            .all(|i| !matches!(i.origin, Origin::Output(..)));
        let region = self.node(node).region;
        if is_top {
            self.region_mut(region).top_nodes.insert(node);
        } else {
            self.region_mut(region).top_nodes.remove(&node);
        }
    }

    fn refresh_bottom(&mut self, node: NodeId) {
        if !self.is_alive(node) {
            return;
        }
        let is_bottom = self
            .node(node)
            .outputs
            .iter()
            .all(|o| o.users.iter().all(|u| !matches!(u, User::Input(..))));
        let region = self.node(node).region;
        if is_bottom {
            self.region_mut(region).bottom_nodes.insert(node);
        } else {
            self.region_mut(region).bottom_nodes.remove(&node);
        }
    }

    fn computed_depth(&self, node: NodeId) -> usize {
        self.node(node)
            .inputs
            .iter()
            .map(|i| match i.origin {
                Origin::Output(pred, _) => self.node(pred).depth + 1,
                Origin::Argument(..) => 0,
            })
            .max()
            .unwrap_or(0)
    }

    fn update_depth(&mut self, node: NodeId) {
        let mut stack = vec![node];
        while let Some(n) = stack.pop() {
            if !self.is_alive(n) {
                continue;
            }
            let depth = self.computed_depth(n);
            if depth == self.node(n).depth {
                continue;
            }
            self.node_mut(n).depth = depth;
            for index in 0..self.node(n).noutputs() {
                for user in self.users(Origin::Output(n, index)) {
                    if let User::Input(succ, _) = user {
                        stack.push(succ);
                    }
                }
            }
        }
    }

    // ---- construction ------------------------------------------------------

    fn alloc_node(&mut self, region: RegionId, operation: Box<dyn Operation>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Some(NodeData {
            region,
            operation,
            inputs: Vec::new(),
            outputs: Vec::new(),
            subregions: Vec::new(),
            depth: 0,
        }));
        let r = self.region_mut(region);
        r.nodes.push(id);
        r.top_nodes.insert(id);
        r.bottom_nodes.insert(id);
        id
    }

    pub(crate) fn alloc_region(&mut self, owner: NodeId, index: usize) -> RegionId {
        let id = RegionId(self.regions.len());
        self.regions.push(Some(RegionData {
            owner: Some((owner, index)),
            arguments: Vec::new(),
            results: Vec::new(),
            nodes: Vec::new(),
            top_nodes: BTreeSet::new(),
            bottom_nodes: BTreeSet::new(),
        }));
        id
    }

    /// Creates a simple node from an operation plus ordered input origins,
    /// checking the operands against the operation's declared signature.
    /// No normalization is applied; see [`Graph::create_normalized`].
    pub fn add_simple_node(
        &mut self,
        region: RegionId,
        operation: Box<dyn Operation>,
        operands: &[Origin],
    ) -> Result<NodeId> {
        let signature = operation.arguments();
        if signature.len() != operands.len() {
            bail!(StructuralError(format!(
                "operation {} declares {} arguments, {} operands given",
                operation.debug_string(),
                signature.len(),
                operands.len()
            )));
        }
        for (expected, operand) in signature.iter().zip(operands.iter()) {
            let received = self.origin_type(*operand);
            if *expected != received {
                bail!(TypeMismatchError {
                    expected: expected.debug_string(),
                    received: received.debug_string(),
                });
            }
            if self.origin_region(*operand) != region {
                bail!(StructuralError(
                    "operand origin is not visible from the node's region".to_string(),
                ));
            }
        }

        if !self.policy_of(operation.as_ref()).mutable {
            self.denormalized = true;
        }

        let results = operation.results();
        let node = self.alloc_node(region, operation);
        for origin in operands {
            self.add_input(node, *origin)?;
        }
        for ty in results {
            self.add_output(node, ty);
        }
        Ok(node)
    }

    /// Creates a structural node. Ports and subregions are wired by the
    /// owning node kind's builder.
    pub fn add_structural_node(
        &mut self,
        region: RegionId,
        operation: Box<dyn Operation>,
        nsubregions: usize,
    ) -> NodeId {
        assert!(nsubregions >= 1);
        assert!(operation.is_structural());
        let node = self.alloc_node(region, operation);
        for index in 0..nsubregions {
            let sub = self.alloc_region(node, index);
            self.node_mut(node).subregions.push(sub);
        }
        node
    }

    pub(crate) fn add_input(&mut self, node: NodeId, origin: Origin) -> Result<usize> {
        let region = self.node(node).region;
        if self.origin_region(origin) != region {
            bail!(StructuralError(
                "input origin is not visible from the node's region".to_string(),
            ));
        }
        let ty = self.origin_type(origin);
        let index = self.node(node).ninputs();
        self.node_mut(node).inputs.push(InputPort { origin, ty });
        self.users_mut(origin).insert(User::Input(node, index));
        self.refresh_top(node);
        if let Origin::Output(pred, _) = origin {
            self.refresh_bottom(pred);
        }
        self.update_depth(node);
        Ok(index)
    }

    pub(crate) fn add_output(&mut self, node: NodeId, ty: Type) -> usize {
        let index = self.node(node).noutputs();
        self.node_mut(node).outputs.push(OutputPort {
            ty,
            users: BTreeSet::new(),
        });
        index
    }

    pub(crate) fn add_argument(&mut self, region: RegionId, ty: Type, kind: ArgumentKind) -> usize {
        let index = self.region(region).narguments();
        self.region_mut(region).arguments.push(ArgumentData {
            ty,
            kind,
            users: BTreeSet::new(),
        });
        index
    }

    pub(crate) fn add_result(
        &mut self,
        region: RegionId,
        origin: Origin,
        ty: Type,
        kind: ResultKind,
    ) -> Result<usize> {
        let index = self.region(region).nresults();
        self.insert_result_at(region, index, origin, ty, kind)?;
        Ok(index)
    }

    /// Inserts a region result at `index`, shifting later results. User
    /// sets and argument kinds referencing shifted results are adjusted.
    pub(crate) fn insert_result_at(
        &mut self,
        region: RegionId,
        index: usize,
        origin: Origin,
        ty: Type,
        kind: ResultKind,
    ) -> Result<()> {
        if self.origin_region(origin) != region {
            bail!(StructuralError(
                "result origin is not visible from its region".to_string(),
            ));
        }
        let received = self.origin_type(origin);
        if received != ty {
            bail!(TypeMismatchError {
                expected: ty.debug_string(),
                received: received.debug_string(),
            });
        }

        let len = self.region(region).nresults();
        assert!(index <= len);
        for j in (index..len).rev() {
            let shifted = self.region(region).result(j).origin;
            let users = self.users_mut(shifted);
            users.remove(&User::Result(region, j));
            users.insert(User::Result(region, j + 1));
        }
        // a plain append displaces nothing; only true insertions shift the
        // pairings of existing results
        if index < len {
            for arg in self.region_mut(region).arguments.iter_mut() {
                match &mut arg.kind {
                    ArgumentKind::Loop { result, .. }
                    | ArgumentKind::Recursion { result, .. }
                    | ArgumentKind::BackEdge { result } => {
                        if *result >= index {
                            *result += 1;
                        }
                    }
                    _ => {}
                }
            }
        }
        self.region_mut(region)
            .results
            .insert(index, ResultData { origin, ty, kind });
        self.users_mut(origin).insert(User::Result(region, index));
        Ok(())
    }

    pub(crate) fn remove_result(&mut self, region: RegionId, index: usize) {
        let origin = self.region(region).result(index).origin;
        self.users_mut(origin).remove(&User::Result(region, index));
        if let Origin::Output(pred, _) = origin {
            self.refresh_bottom(pred);
        }
        let len = self.region(region).nresults();
        for j in index + 1..len {
            let shifted = self.region(region).result(j).origin;
            let users = self.users_mut(shifted);
            users.remove(&User::Result(region, j));
            users.insert(User::Result(region, j - 1));
        }
        for arg in self.region_mut(region).arguments.iter_mut() {
            match &mut arg.kind {
                ArgumentKind::Loop { result, .. }
                | ArgumentKind::Recursion { result, .. }
                | ArgumentKind::BackEdge { result } => {
                    assert!(*result != index, "removing a result that is still paired");
                    if *result > index {
                        *result -= 1;
                    }
                }
                _ => {}
            }
        }
        self.region_mut(region).results.remove(index);
    }

    pub(crate) fn remove_argument(&mut self, region: RegionId, index: usize) {
        assert!(
            self.region(region).argument(index).users.is_empty(),
            "removing a region argument with live users"
        );
        let len = self.region(region).narguments();
        for j in index + 1..len {
            for user in self.users(Origin::Argument(region, j)) {
                self.set_user_origin(user, Origin::Argument(region, j - 1));
            }
        }
        for res in self.region_mut(region).results.iter_mut() {
            match &mut res.kind {
                ResultKind::Loop { argument, .. }
                | ResultKind::Recursion { argument, .. }
                | ResultKind::BackEdge { argument } => {
                    assert!(
                        *argument != index,
                        "removing an argument that is still paired"
                    );
                    if *argument > index {
                        *argument -= 1;
                    }
                }
                _ => {}
            }
        }
        self.region_mut(region).arguments.remove(index);
    }

    pub(crate) fn remove_input(&mut self, node: NodeId, index: usize) {
        let origin = self.node(node).input(index).origin;
        self.users_mut(origin).remove(&User::Input(node, index));
        let len = self.node(node).ninputs();
        for j in index + 1..len {
            let shifted = self.node(node).input(j).origin;
            let users = self.users_mut(shifted);
            users.remove(&User::Input(node, j));
            users.insert(User::Input(node, j - 1));
        }
        for sub in self.node(node).subregions.clone() {
            for arg in self.region_mut(sub).arguments.iter_mut() {
                match &mut arg.kind {
                    ArgumentKind::Entry { input } | ArgumentKind::Loop { input, .. } => {
                        assert!(*input != index, "removing an input that is still mapped");
                        if *input > index {
                            *input -= 1;
                        }
                    }
                    _ => {}
                }
            }
        }
        self.node_mut(node).inputs.remove(index);
        self.refresh_top(node);
        if let Origin::Output(pred, _) = origin {
            self.refresh_bottom(pred);
        }
        self.update_depth(node);
    }

    pub(crate) fn remove_output(&mut self, node: NodeId, index: usize) {
        assert!(
            self.node(node).output(index).users.is_empty(),
            "removing a node output with live users"
        );
        let len = self.node(node).noutputs();
        for j in index + 1..len {
            for user in self.users(Origin::Output(node, j)) {
                self.set_user_origin(user, Origin::Output(node, j - 1));
            }
        }
        for sub in self.node(node).subregions.clone() {
            for res in self.region_mut(sub).results.iter_mut() {
                match &mut res.kind {
                    ResultKind::Exit { output }
                    | ResultKind::Loop { output, .. }
                    | ResultKind::Recursion { output, .. } => {
                        assert!(*output != index, "removing an output that is still mapped");
                        if *output > index {
                            *output -= 1;
                        }
                    }
                    _ => {}
                }
            }
        }
        self.node_mut(node).outputs.remove(index);
    }

    /// Creates a back-edge argument/result pair in `region`: the argument
    /// first, then the result with the argument as its origin. Only
    /// permitted in subregions of operations with loop semantics. Returns
    /// the argument origin and the result index.
    pub fn add_backedge(&mut self, region: RegionId, ty: Type) -> Result<(Origin, usize)> {
        let owner = match self.region(region).owner {
            Some((node, _)) => node,
            None => bail!(StructuralError("back-edge in the root region".to_string())),
        };
        if !self.node(owner).operation().allows_backedges() {
            bail!(StructuralError(
                "back-edge in a subregion without loop semantics".to_string(),
            ));
        }

        // keep a trailing predicate result trailing
        let nresults = self.region(region).nresults();
        let result_index = match self.region(region).results.last() {
            Some(res) if matches!(res.kind, ResultKind::Predicate) => nresults - 1,
            _ => nresults,
        };

        let arg_index = self.add_argument(region, ty.clone(), ArgumentKind::Function);
        let argument = Origin::Argument(region, arg_index);
        self.insert_result_at(
            region,
            result_index,
            argument,
            ty,
            ResultKind::BackEdge {
                argument: arg_index,
            },
        )?;
        self.region_mut(region).arguments[arg_index].kind = ArgumentKind::BackEdge {
            result: result_index,
        };
        Ok((argument, result_index))
    }

    // ---- rewiring ----------------------------------------------------------

    /// Diverts a consumer endpoint to a new origin, maintaining user sets,
    /// depths and the top/bottom node lists.
    pub fn divert(&mut self, user: User, new_origin: Origin) -> Result<()> {
        let old_origin = self.user_origin(user);
        if old_origin == new_origin {
            return Ok(());
        }

        let expected = self.user_type(user);
        let received = self.origin_type(new_origin);
        if expected != received {
            bail!(TypeMismatchError {
                expected: expected.debug_string(),
                received: received.debug_string(),
            });
        }
        if self.user_region(user) != self.origin_region(new_origin) {
            bail!(StructuralError(
                "divert target origin is not visible from the user's region".to_string(),
            ));
        }

        self.users_mut(old_origin).remove(&user);
        self.users_mut(new_origin).insert(user);
        self.set_user_origin(user, new_origin);

        if let Origin::Output(pred, _) = old_origin {
            self.refresh_bottom(pred);
        }
        if let Origin::Output(pred, _) = new_origin {
            self.refresh_bottom(pred);
        }
        if let User::Input(node, _) = user {
            self.refresh_top(node);
            self.update_depth(node);
        }
        Ok(())
    }

    /// Diverts every user of `from` to `to`.
    pub fn divert_users(&mut self, from: Origin, to: Origin) -> Result<()> {
        if from == to {
            return Ok(());
        }
        for user in self.users(from) {
            self.divert(user, to)?;
        }
        Ok(())
    }

    // ---- removal -----------------------------------------------------------

    /// Removes a node. The node must be dead; removing a node with a live
    /// user is an operational fault.
    pub fn remove_node(&mut self, node: NodeId) {
        assert!(self.is_alive(node), "removing a node twice");
        assert!(self.node(node).is_dead(), "removing a node with live users");

        for sub in self.node(node).subregions.clone() {
            self.teardown_region(sub);
        }
        while self.node(node).ninputs() > 0 {
            let last = self.node(node).ninputs() - 1;
            self.remove_input(node, last);
        }
        while self.node(node).noutputs() > 0 {
            let last = self.node(node).noutputs() - 1;
            self.remove_output(node, last);
        }

        let region = self.node(node).region;
        let r = self.region_mut(region);
        r.nodes.retain(|n| *n != node);
        r.top_nodes.remove(&node);
        r.bottom_nodes.remove(&node);
        self.nodes[node.0] = None;
    }

    fn teardown_region(&mut self, region: RegionId) {
        // unpair back-edges and loop results first so result removal does
        // not trip the pairing checks
        for arg in self.region_mut(region).arguments.iter_mut() {
            match arg.kind {
                ArgumentKind::BackEdge { .. }
                | ArgumentKind::Loop { .. }
                | ArgumentKind::Recursion { .. } => arg.kind = ArgumentKind::Function,
                _ => {}
            }
        }
        while self.region(region).nresults() > 0 {
            let last = self.region(region).nresults() - 1;
            let origin = self.region(region).result(last).origin;
            self.users_mut(origin).remove(&User::Result(region, last));
            if let Origin::Output(pred, _) = origin {
                self.refresh_bottom(pred);
            }
            self.region_mut(region).results.pop();
        }
        loop {
            let dead: Vec<NodeId> = self
                .region(region)
                .nodes
                .iter()
                .copied()
                .filter(|n| self.node(*n).is_dead())
                .collect();
            if dead.is_empty() {
                break;
            }
            for n in dead {
                self.remove_node(n);
            }
        }
        assert!(
            self.region(region).nodes.is_empty(),
            "tearing down a region with externally used nodes"
        );
        while self.region(region).narguments() > 0 {
            let last = self.region(region).narguments() - 1;
            self.remove_argument(region, last);
        }
        self.regions[region.0] = None;
    }

    /// Removes dead nodes from `region` until none remain; idempotent.
    pub fn prune_region(&mut self, region: RegionId, recursive: bool) {
        loop {
            let dead: Vec<NodeId> = self
                .region(region)
                .nodes
                .iter()
                .rev()
                .copied()
                .filter(|n| self.node(*n).is_dead())
                .collect();
            if dead.is_empty() {
                break;
            }
            for n in dead {
                if self.is_alive(n) {
                    self.remove_node(n);
                }
            }
        }
        if recursive {
            for n in self.region(region).nodes.clone() {
                for sub in self.node(n).subregions.clone() {
                    self.prune_region(sub, true);
                }
            }
        }
    }

    // ---- root imports/exports ----------------------------------------------

    pub fn add_import(&mut self, ty: Type, name: &str) -> Origin {
        let root = self.root;
        let index = self.add_argument(
            root,
            ty,
            ArgumentKind::Import {
                name: name.to_string(),
            },
        );
        Origin::Argument(root, index)
    }

    pub fn add_export(&mut self, origin: Origin, name: &str) -> Result<usize> {
        let root = self.root;
        let ty = self.origin_type(origin);
        self.add_result(
            root,
            origin,
            ty,
            ResultKind::Export {
                name: name.to_string(),
            },
        )
    }

    // ---- normal-form directory ---------------------------------------------

    pub fn policy_of(&self, operation: &dyn Operation) -> NormalFormPolicy {
        let key = operation.as_any().type_id();
        self.policies
            .get(&key)
            .copied()
            .unwrap_or(self.default_policy)
    }

    pub fn set_mutable<T: Operation>(&mut self, enable: bool) {
        let default = self.default_policy;
        let entry = self.policies.entry(TypeId::of::<T>()).or_insert(default);
        entry.mutable = enable;
    }

    pub fn set_cse<T: Operation>(&mut self, enable: bool) {
        let default = self.default_policy;
        let entry = self.policies.entry(TypeId::of::<T>()).or_insert(default);
        entry.cse = enable;
    }

    pub fn set_default_mutable(&mut self, enable: bool) {
        self.default_policy.mutable = enable;
        for policy in self.policies.values_mut() {
            policy.mutable = enable;
        }
    }

    pub fn set_default_cse(&mut self, enable: bool) {
        self.default_policy.cse = enable;
        for policy in self.policies.values_mut() {
            policy.cse = enable;
        }
    }

    pub fn is_denormalized(&self) -> bool {
        self.denormalized
    }

    pub(crate) fn mark_denormalized(&mut self) {
        self.denormalized = true;
    }

    // ---- lookups -----------------------------------------------------------

    /// Finds a simple node in `region` with an equal operation and the same
    /// input origins; the CSE congruence.
    pub fn find_congruent_node(
        &self,
        region: RegionId,
        operation: &dyn Operation,
        operands: &[Origin],
    ) -> Option<NodeId> {
        for id in self.region(region).nodes.iter() {
            let node = self.node(*id);
            if node.is_structural() {
                continue;
            }
            if node.ninputs() != operands.len() {
                continue;
            }
            if !node
                .inputs
                .iter()
                .zip(operands.iter())
                .all(|(i, o)| i.origin == *o)
            {
                continue;
            }
            if operation.eq_operation(node.operation()) {
                return Some(*id);
            }
        }
        None
    }

    /// Follows entry arguments (and invariant loop pre-arguments) outward to
    /// the origin that ultimately produces `origin`.
    pub fn trace_producer(&self, origin: Origin) -> Origin {
        let mut current = origin;
        loop {
            let Origin::Argument(region, index) = current else {
                return current;
            };
            let Some((owner, _)) = self.region(region).owner else {
                return current;
            };
            match self.region(region).argument(index).kind.clone() {
                ArgumentKind::Entry { input } => {
                    current = self.node(owner).input(input).origin;
                }
                ArgumentKind::Loop { input, result } => {
                    // only safe to look through when the loop variable is
                    // invariant
                    if self.region(region).result(result).origin == current {
                        current = self.node(owner).input(input).origin;
                    } else {
                        return current;
                    }
                }
                _ => return current,
            }
        }
    }
}
