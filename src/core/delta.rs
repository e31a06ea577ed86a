//! The delta node: a global variable or constant.
//!
//! The single subregion computes the initializer through one region
//! result; the single structural output is the global's address.

use crate::core::graph::{
    ArgumentKind, Graph, NodeId, Origin, RegionId, ResultKind, StructuralError, TypeMismatchError,
};
use crate::core::lambda::Linkage;
use crate::core::operation::Operation;
use crate::core::types::Type;
use anyhow::{bail, Result};

/// Structural operation of a delta node.
#[derive(Clone, Debug)]
pub struct DeltaOperation {
    name: String,
    value_type: Type,
    linkage: Linkage,
    section: String,
    constant: bool,
}

impl DeltaOperation {
    pub fn new(
        name: &str,
        value_type: Type,
        linkage: Linkage,
        section: &str,
        constant: bool,
    ) -> DeltaOperation {
        DeltaOperation {
            name: name.to_string(),
            value_type,
            linkage,
            section: section.to_string(),
            constant,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value_type(&self) -> &Type {
        &self.value_type
    }

    pub fn linkage(&self) -> Linkage {
        self.linkage
    }

    pub fn section(&self) -> &str {
        &self.section
    }

    pub fn constant(&self) -> bool {
        self.constant
    }
}

impl Operation for DeltaOperation {
    fn arguments(&self) -> Vec<Type> {
        Vec::new()
    }

    fn results(&self) -> Vec<Type> {
        Vec::new()
    }

    fn debug_string(&self) -> String {
        format!("DELTA[{}]", self.name)
    }

    fn copy_operation(&self) -> Box<dyn Operation> {
        Box::new(self.clone())
    }

    fn eq_operation(&self, other: &dyn Operation) -> bool {
        other
            .downcast_ref::<DeltaOperation>()
            .map(|op| {
                op.name == self.name
                    && op.value_type == self.value_type
                    && op.linkage == self.linkage
                    && op.section == self.section
                    && op.constant == self.constant
            })
            .unwrap_or(false)
    }

    fn is_structural(&self) -> bool {
        true
    }
}

/// A context variable, as on lambdas.
#[derive(Clone, Copy, Debug)]
pub struct DeltaCtxVar {
    pub input: usize,
    pub inner: Origin,
}

/// Typed handle on a delta node.
#[derive(Clone, Copy, Debug)]
pub struct DeltaNode {
    node: NodeId,
}

impl DeltaNode {
    pub fn create(
        graph: &mut Graph,
        region: RegionId,
        name: &str,
        value_type: Type,
        linkage: Linkage,
        section: &str,
        constant: bool,
    ) -> DeltaNode {
        let operation = DeltaOperation::new(name, value_type, linkage, section, constant);
        let node = graph.add_structural_node(region, Box::new(operation), 1);
        DeltaNode { node }
    }

    pub fn from_node(graph: &Graph, node: NodeId) -> Option<DeltaNode> {
        graph
            .node(node)
            .operation()
            .downcast_ref::<DeltaOperation>()
            .map(|_| DeltaNode { node })
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn subregion(&self, graph: &Graph) -> RegionId {
        graph.node(self.node).subregion(0)
    }

    pub fn operation<'a>(&self, graph: &'a Graph) -> &'a DeltaOperation {
        graph
            .node(self.node)
            .operation()
            .downcast_ref::<DeltaOperation>()
            .unwrap()
    }

    pub fn name(&self, graph: &Graph) -> String {
        self.operation(graph).name().to_string()
    }

    pub fn value_type(&self, graph: &Graph) -> Type {
        self.operation(graph).value_type().clone()
    }

    pub fn linkage(&self, graph: &Graph) -> Linkage {
        self.operation(graph).linkage()
    }

    pub fn add_context_var(&self, graph: &mut Graph, origin: Origin) -> Result<DeltaCtxVar> {
        let input = graph.add_input(self.node, origin)?;
        let ty = graph.origin_type(origin);
        let sub = self.subregion(graph);
        let index = graph.add_argument(sub, ty, ArgumentKind::Entry { input });
        Ok(DeltaCtxVar {
            input,
            inner: Origin::Argument(sub, index),
        })
    }

    pub fn context_vars(&self, graph: &Graph) -> Vec<DeltaCtxVar> {
        let sub = self.subregion(graph);
        graph
            .region(sub)
            .arguments()
            .iter()
            .enumerate()
            .filter_map(|(index, arg)| match arg.kind() {
                ArgumentKind::Entry { input } => Some(DeltaCtxVar {
                    input: *input,
                    inner: Origin::Argument(sub, index),
                }),
                _ => None,
            })
            .collect()
    }

    /// Wires the initializer result and creates the address output.
    pub fn finalize(&self, graph: &mut Graph, initializer: Origin) -> Result<Origin> {
        if graph.node(self.node).noutputs() != 0 {
            bail!(StructuralError("delta already finalized".to_string()));
        }
        let value_type = self.value_type(graph);
        let received = graph.origin_type(initializer);
        if received != value_type {
            bail!(TypeMismatchError {
                expected: value_type.debug_string(),
                received: received.debug_string(),
            });
        }
        let sub = self.subregion(graph);
        graph.add_result(sub, initializer, value_type, ResultKind::Body)?;
        let output = graph.add_output(self.node, Type::pointer());
        Ok(Origin::Output(self.node, output))
    }

    /// The global's address.
    pub fn output(&self, graph: &Graph) -> Origin {
        assert!(graph.node(self.node).noutputs() == 1);
        Origin::Output(self.node, 0)
    }
}
