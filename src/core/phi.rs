//! The phi node: mutually recursive bindings.
//!
//! A recursion variable binds a name that is simultaneously an inner
//! argument visible in the subregion, an outer structural output, and an
//! inner region result. A phi closes a cycle among lambda definitions and
//! delta values.

use crate::core::graph::{
    ArgumentKind, Graph, NodeId, Origin, RegionId, ResultKind, StructuralError, User,
};
use crate::core::operation::Operation;
use crate::core::types::Type;
use anyhow::{bail, Result};

/// Structural operation of a phi node.
#[derive(Clone, Debug)]
pub struct PhiOperation;

impl Operation for PhiOperation {
    fn arguments(&self) -> Vec<Type> {
        Vec::new()
    }

    fn results(&self) -> Vec<Type> {
        Vec::new()
    }

    fn debug_string(&self) -> String {
        "PHI".to_string()
    }

    fn copy_operation(&self) -> Box<dyn Operation> {
        Box::new(PhiOperation)
    }

    fn eq_operation(&self, other: &dyn Operation) -> bool {
        other.downcast_ref::<PhiOperation>().is_some()
    }

    fn is_structural(&self) -> bool {
        true
    }
}

/// A recursion variable: inner argument, outer output, inner result.
#[derive(Clone, Copy, Debug)]
pub struct RecVar {
    pub output: usize,
    pub argument: Origin,
    pub result: usize,
}

/// A context variable, as on lambdas.
#[derive(Clone, Copy, Debug)]
pub struct PhiCtxVar {
    pub input: usize,
    pub inner: Origin,
}

/// Typed handle on a phi node.
#[derive(Clone, Copy, Debug)]
pub struct PhiNode {
    node: NodeId,
}

impl PhiNode {
    pub fn create(graph: &mut Graph, region: RegionId) -> PhiNode {
        let node = graph.add_structural_node(region, Box::new(PhiOperation), 1);
        PhiNode { node }
    }

    pub fn from_node(graph: &Graph, node: NodeId) -> Option<PhiNode> {
        graph
            .node(node)
            .operation()
            .downcast_ref::<PhiOperation>()
            .map(|_| PhiNode { node })
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn subregion(&self, graph: &Graph) -> RegionId {
        graph.node(self.node).subregion(0)
    }

    /// Adds a recursion variable of the given type. The result initially
    /// reads the freshly created argument; bind the definition with
    /// [`PhiNode::set_recursion_origin`].
    pub fn add_recursion_var(&self, graph: &mut Graph, ty: Type) -> Result<RecVar> {
        let sub = self.subregion(graph);
        let output = graph.add_output(self.node, ty.clone());
        let argument = graph.add_argument(sub, ty.clone(), ArgumentKind::Function);
        let result = graph.add_result(
            sub,
            Origin::Argument(sub, argument),
            ty,
            ResultKind::Recursion { output, argument },
        )?;
        graph.region_mut(sub).arguments[argument].kind =
            ArgumentKind::Recursion { output, result };
        Ok(RecVar {
            output,
            argument: Origin::Argument(sub, argument),
            result,
        })
    }

    /// Binds the definition of a recursion variable.
    pub fn set_recursion_origin(
        &self,
        graph: &mut Graph,
        rec_var: &RecVar,
        origin: Origin,
    ) -> Result<()> {
        let sub = self.subregion(graph);
        graph.divert(User::Result(sub, rec_var.result), origin)
    }

    pub fn add_context_var(&self, graph: &mut Graph, origin: Origin) -> Result<PhiCtxVar> {
        let input = graph.add_input(self.node, origin)?;
        let ty = graph.origin_type(origin);
        let sub = self.subregion(graph);
        let index = graph.add_argument(sub, ty, ArgumentKind::Entry { input });
        Ok(PhiCtxVar {
            input,
            inner: Origin::Argument(sub, index),
        })
    }

    pub fn recursion_vars(&self, graph: &Graph) -> Vec<RecVar> {
        let sub = self.subregion(graph);
        graph
            .region(sub)
            .arguments()
            .iter()
            .enumerate()
            .filter_map(|(index, arg)| match arg.kind() {
                ArgumentKind::Recursion { output, result } => Some(RecVar {
                    output: *output,
                    argument: Origin::Argument(sub, index),
                    result: *result,
                }),
                _ => None,
            })
            .collect()
    }

    pub fn context_vars(&self, graph: &Graph) -> Vec<PhiCtxVar> {
        let sub = self.subregion(graph);
        graph
            .region(sub)
            .arguments()
            .iter()
            .enumerate()
            .filter_map(|(index, arg)| match arg.kind() {
                ArgumentKind::Entry { input } => Some(PhiCtxVar {
                    input: *input,
                    inner: Origin::Argument(sub, index),
                }),
                _ => None,
            })
            .collect()
    }

    /// The structural output of a recursion variable.
    pub fn recursion_output(&self, rec_var: &RecVar) -> Origin {
        Origin::Output(self.node, rec_var.output)
    }

    /// Checks that every recursion variable has been bound to a definition
    /// other than its own argument.
    pub fn verify_bound(&self, graph: &Graph) -> Result<()> {
        let sub = self.subregion(graph);
        for rec_var in self.recursion_vars(graph) {
            if graph.region(sub).result(rec_var.result).origin() == rec_var.argument {
                bail!(StructuralError(
                    "phi recursion variable was never bound".to_string(),
                ));
            }
        }
        Ok(())
    }
}
