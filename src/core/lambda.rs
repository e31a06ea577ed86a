//! The lambda node: a function definition.
//!
//! The subregion's first arguments are the function arguments, one per
//! argument of the function type; context variables (captured free
//! variables) follow. The single structural output names the lambda from
//! outside.

use crate::core::graph::{
    ArgumentKind, Graph, NodeId, Origin, RegionId, ResultKind, StructuralError, TypeMismatchError,
};
use crate::core::operation::Operation;
use crate::core::types::Type;
use anyhow::{bail, Result};

/// Symbol linkage of lambdas and deltas.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Linkage {
    External,
    Internal,
}

impl Linkage {
    pub fn is_exported(&self) -> bool {
        matches!(self, Linkage::External)
    }
}

/// Structural operation of a lambda node.
#[derive(Clone, Debug)]
pub struct LambdaOperation {
    name: String,
    function_type: Type,
    linkage: Linkage,
}

impl LambdaOperation {
    pub fn new(name: &str, function_type: Type, linkage: Linkage) -> LambdaOperation {
        assert!(function_type.is_function());
        LambdaOperation {
            name: name.to_string(),
            function_type,
            linkage,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn function_type(&self) -> &Type {
        &self.function_type
    }

    pub fn linkage(&self) -> Linkage {
        self.linkage
    }
}

impl Operation for LambdaOperation {
    fn arguments(&self) -> Vec<Type> {
        Vec::new()
    }

    fn results(&self) -> Vec<Type> {
        Vec::new()
    }

    fn debug_string(&self) -> String {
        format!("LAMBDA[{}]", self.name)
    }

    fn copy_operation(&self) -> Box<dyn Operation> {
        Box::new(self.clone())
    }

    fn eq_operation(&self, other: &dyn Operation) -> bool {
        other
            .downcast_ref::<LambdaOperation>()
            .map(|op| {
                op.name == self.name
                    && op.function_type == self.function_type
                    && op.linkage == self.linkage
            })
            .unwrap_or(false)
    }

    fn is_structural(&self) -> bool {
        true
    }
}

/// A context variable: an external origin plus the inner argument visible
/// in the subregion.
#[derive(Clone, Copy, Debug)]
pub struct CtxVar {
    pub input: usize,
    pub inner: Origin,
}

/// Typed handle on a lambda node.
#[derive(Clone, Copy, Debug)]
pub struct LambdaNode {
    node: NodeId,
}

impl LambdaNode {
    pub fn create(
        graph: &mut Graph,
        region: RegionId,
        function_type: Type,
        name: &str,
        linkage: Linkage,
    ) -> Result<LambdaNode> {
        if !function_type.is_function() {
            bail!(TypeMismatchError {
                expected: "fn(...) -> (...)".to_string(),
                received: function_type.debug_string(),
            });
        }
        let operation = LambdaOperation::new(name, function_type.clone(), linkage);
        let node = graph.add_structural_node(region, Box::new(operation), 1);
        let lambda = LambdaNode { node };
        let sub = lambda.subregion(graph);
        for ty in function_type.function_arguments().unwrap() {
            graph.add_argument(sub, ty.clone(), ArgumentKind::Function);
        }
        Ok(lambda)
    }

    pub fn from_node(graph: &Graph, node: NodeId) -> Option<LambdaNode> {
        graph
            .node(node)
            .operation()
            .downcast_ref::<LambdaOperation>()
            .map(|_| LambdaNode { node })
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn subregion(&self, graph: &Graph) -> RegionId {
        graph.node(self.node).subregion(0)
    }

    pub fn operation<'a>(&self, graph: &'a Graph) -> &'a LambdaOperation {
        graph
            .node(self.node)
            .operation()
            .downcast_ref::<LambdaOperation>()
            .unwrap()
    }

    pub fn name(&self, graph: &Graph) -> String {
        self.operation(graph).name().to_string()
    }

    pub fn function_type(&self, graph: &Graph) -> Type {
        self.operation(graph).function_type().clone()
    }

    pub fn linkage(&self, graph: &Graph) -> Linkage {
        self.operation(graph).linkage()
    }

    /// Inner arguments standing for the function's arguments.
    pub fn function_arguments(&self, graph: &Graph) -> Vec<Origin> {
        let sub = self.subregion(graph);
        graph
            .region(sub)
            .arguments()
            .iter()
            .enumerate()
            .filter(|(_, arg)| matches!(arg.kind(), ArgumentKind::Function))
            .map(|(index, _)| Origin::Argument(sub, index))
            .collect()
    }

    pub fn add_context_var(&self, graph: &mut Graph, origin: Origin) -> Result<CtxVar> {
        let input = graph.add_input(self.node, origin)?;
        let ty = graph.origin_type(origin);
        let sub = self.subregion(graph);
        let index = graph.add_argument(sub, ty, ArgumentKind::Entry { input });
        Ok(CtxVar {
            input,
            inner: Origin::Argument(sub, index),
        })
    }

    pub fn context_vars(&self, graph: &Graph) -> Vec<CtxVar> {
        let sub = self.subregion(graph);
        graph
            .region(sub)
            .arguments()
            .iter()
            .enumerate()
            .filter_map(|(index, arg)| match arg.kind() {
                ArgumentKind::Entry { input } => Some(CtxVar {
                    input: *input,
                    inner: Origin::Argument(sub, index),
                }),
                _ => None,
            })
            .collect()
    }

    /// Maps an inner context argument back to its variable.
    pub fn map_inner_context(&self, graph: &Graph, origin: Origin) -> Option<CtxVar> {
        self.context_vars(graph)
            .into_iter()
            .find(|cv| cv.inner == origin)
    }

    /// Wires the function results and creates the naming output. The
    /// output signature must equal the function type of the operation.
    pub fn finalize(&self, graph: &mut Graph, results: &[Origin]) -> Result<Origin> {
        if graph.node(self.node).noutputs() != 0 {
            bail!(StructuralError("lambda already finalized".to_string()));
        }
        let function_type = self.function_type(graph);
        let declared = function_type.function_results().unwrap().to_vec();
        if declared.len() != results.len() {
            bail!(StructuralError(format!(
                "lambda {} declares {} results, {} given",
                self.name(graph),
                declared.len(),
                results.len()
            )));
        }
        let sub = self.subregion(graph);
        for (ty, origin) in declared.iter().zip(results.iter()) {
            let received = graph.origin_type(*origin);
            if received != *ty {
                bail!(TypeMismatchError {
                    expected: ty.debug_string(),
                    received: received.debug_string(),
                });
            }
            graph.add_result(sub, *origin, ty.clone(), ResultKind::Body)?;
        }
        let output = graph.add_output(self.node, function_type);
        Ok(Origin::Output(self.node, output))
    }

    /// The structural output naming the lambda.
    pub fn output(&self, graph: &Graph) -> Origin {
        assert!(graph.node(self.node).noutputs() == 1);
        Origin::Output(self.node, 0)
    }

    /// Region results standing for the function's results.
    pub fn function_results(&self, graph: &Graph) -> Vec<usize> {
        let sub = self.subregion(graph);
        graph
            .region(sub)
            .results()
            .iter()
            .enumerate()
            .filter(|(_, res)| matches!(res.kind(), ResultKind::Body))
            .map(|(index, _)| index)
            .collect()
    }

    /// Removes context variables whose inner argument is unused.
    pub fn prune_context_vars(&self, graph: &mut Graph) -> Result<()> {
        let sub = self.subregion(graph);
        loop {
            let unused = self
                .context_vars(graph)
                .into_iter()
                .find(|cv| graph.nusers(cv.inner) == 0);
            let Some(cv) = unused else {
                return Ok(());
            };
            let Origin::Argument(_, index) = cv.inner else {
                unreachable!();
            };
            graph.remove_argument(sub, index);
            graph.remove_input(self.node, cv.input);
        }
    }
}
