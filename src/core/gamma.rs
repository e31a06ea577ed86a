//! The gamma node: conditional/switch execution of N subregions.
//!
//! Exactly one input is the predicate, typed control-N. Entry variables
//! route a structural input into every subregion as an entry argument; exit
//! variables collect one exit result per subregion into a structural
//! output.

use crate::core::control::{ControlConstantOperation, ControlValue, MatchOperation};
use crate::core::graph::{
    ArgumentKind, Graph, NodeId, Origin, RegionId, ResultKind, StructuralError, TypeMismatchError,
    User,
};
use crate::core::operation::Operation;
use crate::core::subst::{copy_region_body, SubstitutionMap};
use crate::core::types::Type;
use anyhow::{bail, Result};
use tracing::trace;

/// Structural operation of a gamma node.
#[derive(Clone, Debug)]
pub struct GammaOperation {
    nalternatives: usize,
}

impl GammaOperation {
    pub fn new(nalternatives: usize) -> GammaOperation {
        assert!(nalternatives >= 2);
        GammaOperation { nalternatives }
    }

    pub fn nalternatives(&self) -> usize {
        self.nalternatives
    }
}

impl Operation for GammaOperation {
    fn arguments(&self) -> Vec<Type> {
        Vec::new()
    }

    fn results(&self) -> Vec<Type> {
        Vec::new()
    }

    fn debug_string(&self) -> String {
        "GAMMA".to_string()
    }

    fn copy_operation(&self) -> Box<dyn Operation> {
        Box::new(self.clone())
    }

    fn eq_operation(&self, other: &dyn Operation) -> bool {
        other
            .downcast_ref::<GammaOperation>()
            .map(|op| op.nalternatives == self.nalternatives)
            .unwrap_or(false)
    }

    fn is_structural(&self) -> bool {
        true
    }
}

/// An entry variable: one structural input fanned into every subregion.
#[derive(Clone, Debug)]
pub struct EntryVar {
    pub input: usize,
    pub branch_arguments: Vec<Origin>,
}

/// An exit variable: one exit result per subregion collected into a
/// structural output.
#[derive(Clone, Debug)]
pub struct ExitVar {
    pub output: Origin,
    pub branch_results: Vec<usize>,
}

/// Typed handle on a gamma node.
#[derive(Clone, Copy, Debug)]
pub struct GammaNode {
    node: NodeId,
}

impl GammaNode {
    /// Creates a gamma branching on `predicate`; the number of subregions
    /// equals the predicate's control alternatives.
    pub fn create(graph: &mut Graph, predicate: Origin) -> Result<GammaNode> {
        let ty = graph.origin_type(predicate);
        let Some(nalternatives) = ty.nalternatives() else {
            bail!(TypeMismatchError {
                expected: "ctl<N>".to_string(),
                received: ty.debug_string(),
            });
        };
        let region = graph.origin_region(predicate);
        let node = graph.add_structural_node(
            region,
            Box::new(GammaOperation::new(nalternatives)),
            nalternatives,
        );
        graph.add_input(node, predicate)?;
        Ok(GammaNode { node })
    }

    /// Views `node` as a gamma if its operation says so.
    pub fn from_node(graph: &Graph, node: NodeId) -> Option<GammaNode> {
        graph
            .node(node)
            .operation()
            .downcast_ref::<GammaOperation>()
            .map(|_| GammaNode { node })
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn nsubregions(&self, graph: &Graph) -> usize {
        graph.node(self.node).nsubregions()
    }

    pub fn subregion(&self, graph: &Graph, index: usize) -> RegionId {
        graph.node(self.node).subregion(index)
    }

    /// The predicate input (always input 0).
    pub fn predicate_user(&self) -> User {
        User::Input(self.node, 0)
    }

    pub fn predicate_origin(&self, graph: &Graph) -> Origin {
        graph.node(self.node).input(0).origin()
    }

    pub fn add_entry_var(&self, graph: &mut Graph, origin: Origin) -> Result<EntryVar> {
        let input = graph.add_input(self.node, origin)?;
        let ty = graph.origin_type(origin);
        let mut branch_arguments = Vec::new();
        for k in 0..self.nsubregions(graph) {
            let sub = self.subregion(graph, k);
            let index = graph.add_argument(sub, ty.clone(), ArgumentKind::Entry { input });
            branch_arguments.push(Origin::Argument(sub, index));
        }
        Ok(EntryVar {
            input,
            branch_arguments,
        })
    }

    pub fn add_exit_var(&self, graph: &mut Graph, origins: &[Origin]) -> Result<ExitVar> {
        let nsubregions = self.nsubregions(graph);
        if origins.len() != nsubregions {
            bail!(StructuralError(format!(
                "exit variable needs {} origins, {} given",
                nsubregions,
                origins.len()
            )));
        }
        let ty = graph.origin_type(origins[0]);
        let output = graph.add_output(self.node, ty.clone());
        let mut branch_results = Vec::new();
        for (k, origin) in origins.iter().enumerate() {
            let sub = self.subregion(graph, k);
            let index = graph.add_result(sub, *origin, ty.clone(), ResultKind::Exit { output })?;
            branch_results.push(index);
        }
        Ok(ExitVar {
            output: Origin::Output(self.node, output),
            branch_results,
        })
    }

    pub fn entry_vars(&self, graph: &Graph) -> Vec<EntryVar> {
        let mut vars = Vec::new();
        for input in 1..graph.node(self.node).ninputs() {
            let mut branch_arguments = Vec::new();
            for k in 0..self.nsubregions(graph) {
                let sub = self.subregion(graph, k);
                for (index, arg) in graph.region(sub).arguments().iter().enumerate() {
                    if matches!(arg.kind(), ArgumentKind::Entry { input: i } if *i == input) {
                        branch_arguments.push(Origin::Argument(sub, index));
                    }
                }
            }
            vars.push(EntryVar {
                input,
                branch_arguments,
            });
        }
        vars
    }

    pub fn exit_vars(&self, graph: &Graph) -> Vec<ExitVar> {
        let mut vars = Vec::new();
        for output in 0..graph.node(self.node).noutputs() {
            vars.push(self.map_output_exit_var(graph, output));
        }
        vars
    }

    pub fn map_output_exit_var(&self, graph: &Graph, output: usize) -> ExitVar {
        let mut branch_results = Vec::new();
        for k in 0..self.nsubregions(graph) {
            let sub = self.subregion(graph, k);
            for (index, res) in graph.region(sub).results().iter().enumerate() {
                if matches!(res.kind(), ResultKind::Exit { output: o } if *o == output) {
                    branch_results.push(index);
                }
            }
        }
        ExitVar {
            output: Origin::Output(self.node, output),
            branch_results,
        }
    }

    /// Maps a subregion argument back to its entry variable.
    pub fn map_branch_argument(&self, graph: &Graph, origin: Origin) -> Option<EntryVar> {
        let Origin::Argument(region, index) = origin else {
            return None;
        };
        let (owner, _) = graph.region(region).owner()?;
        if owner != self.node {
            return None;
        }
        match graph.region(region).argument(index).kind() {
            ArgumentKind::Entry { input } => {
                let input = *input;
                self.entry_vars(graph).into_iter().find(|ev| ev.input == input)
            }
            _ => None,
        }
    }

    /// True when every branch result of the exit variable originates from
    /// the same entry variable's arguments; returns the invariant origin.
    pub fn is_invariant(&self, graph: &Graph, exit_var: &ExitVar) -> Option<Origin> {
        let mut common: Option<usize> = None;
        for (k, result) in exit_var.branch_results.iter().enumerate() {
            let sub = self.subregion(graph, k);
            let origin = graph.region(sub).result(*result).origin();
            let Origin::Argument(_, index) = origin else {
                return None;
            };
            let ArgumentKind::Entry { input } = graph.region(sub).argument(index).kind() else {
                return None;
            };
            match common {
                None => common = Some(*input),
                Some(existing) if existing == *input => {}
                Some(_) => return None,
            }
        }
        common.map(|input| graph.node(self.node).input(input).origin())
    }
}

/// Applies the gamma reductions; returns true if the node was rewritten
/// (and possibly removed).
pub fn normalize_gamma(graph: &mut Graph, node: NodeId) -> Result<bool> {
    let gamma = GammaNode::from_node(graph, node).expect("not a gamma node");

    if predicate_is_constant(graph, &gamma).is_some() {
        trace!(node = %node, "gamma predicate reduction");
        perform_predicate_reduction(graph, gamma)?;
        return Ok(true);
    }

    let mut changed = false;

    // invariant exit variables
    for exit_var in gamma.exit_vars(graph) {
        if graph.nusers(exit_var.output) == 0 {
            continue;
        }
        if let Some(origin) = gamma.is_invariant(graph, &exit_var) {
            trace!(node = %node, "gamma invariant reduction");
            graph.divert_users(exit_var.output, origin)?;
            changed = true;
        }
    }

    changed |= perform_control_constant_reduction(graph, &gamma)?;

    Ok(changed)
}

fn predicate_is_constant(graph: &Graph, gamma: &GammaNode) -> Option<usize> {
    let producer = graph.origin_node(gamma.predicate_origin(graph))?;
    graph
        .node(producer)
        .operation()
        .downcast_ref::<ControlConstantOperation>()
        .map(|op| op.value().alternative())
}

/// Inlines the selected subregion into the parent and removes the gamma.
fn perform_predicate_reduction(graph: &mut Graph, gamma: GammaNode) -> Result<()> {
    let alternative =
        predicate_is_constant(graph, &gamma).expect("predicate must be a control constant");
    let region = graph.node(gamma.node()).region();
    let sub = gamma.subregion(graph, alternative);

    let mut smap = SubstitutionMap::new();
    for entry_var in gamma.entry_vars(graph) {
        let origin = graph.node(gamma.node()).input(entry_var.input).origin();
        smap.insert(entry_var.branch_arguments[alternative], origin);
    }

    copy_region_body(graph, sub, region, &mut smap)?;

    for exit_var in gamma.exit_vars(graph) {
        let result = exit_var.branch_results[alternative];
        let origin = graph.region(sub).result(result).origin();
        graph.divert_users(exit_var.output, smap.apply(origin))?;
    }

    graph.remove_node(gamma.node());
    Ok(())
}

/// Fuses a match-predicated gamma whose control-typed exit variables carry
/// a distinct control constant per branch into a re-parameterized match.
fn perform_control_constant_reduction(graph: &mut Graph, gamma: &GammaNode) -> Result<bool> {
    let Some(match_node) = graph.origin_node(gamma.predicate_origin(graph)) else {
        return Ok(false);
    };
    let Some(match_operation) = graph
        .node(match_node)
        .operation()
        .downcast_ref::<MatchOperation>()
        .map(|op| op.clone())
    else {
        return Ok(false);
    };

    // the match must cover exactly the gamma's alternatives
    let mut alternatives: Vec<u64> = match_operation
        .mapping()
        .iter()
        .map(|(_, a)| *a)
        .collect();
    alternatives.push(match_operation.default_alternative());
    alternatives.sort_unstable();
    alternatives.dedup();
    if alternatives.len() != gamma.nsubregions(graph) {
        return Ok(false);
    }

    // alternative -> selector value
    let mut inverse: Vec<Option<u64>> = vec![None; gamma.nsubregions(graph)];
    for (value, alternative) in match_operation.mapping() {
        inverse[*alternative as usize] = Some(*value);
    }

    let mut changed = false;
    for exit_var in gamma.exit_vars(graph) {
        if graph.nusers(exit_var.output) == 0 {
            continue;
        }
        let ty = graph.origin_type(exit_var.output);
        if ty.nalternatives().is_none() {
            continue;
        }

        // every branch must produce a control constant, all of the same
        // alternative count
        let mut constants: Vec<ControlValue> = Vec::new();
        for (k, result) in exit_var.branch_results.iter().enumerate() {
            let sub = gamma.subregion(graph, k);
            let origin = graph.region(sub).result(*result).origin();
            let constant = graph.origin_node(origin).and_then(|producer| {
                graph
                    .node(producer)
                    .operation()
                    .downcast_ref::<ControlConstantOperation>()
                    .map(|op| op.value())
            });
            match constant {
                Some(value)
                    if constants
                        .first()
                        .map(|first| first.nalternatives() == value.nalternatives())
                        .unwrap_or(true) =>
                {
                    constants.push(value)
                }
                _ => {
                    constants.clear();
                    break;
                }
            }
        }
        if constants.len() != gamma.nsubregions(graph) {
            continue;
        }
        let nalternatives = constants[0].nalternatives();

        let mut new_mapping = Vec::new();
        let mut default_alternative = 0u64;
        for (branch, constant) in constants.iter().enumerate() {
            match inverse[branch] {
                Some(value) => new_mapping.push((value, constant.alternative() as u64)),
                None => default_alternative = constant.alternative() as u64,
            }
        }

        trace!(node = %gamma.node(), "gamma control constant reduction");
        let selector = graph.node(match_node).input(0).origin();
        let region = graph.node(gamma.node()).region();
        let fused = crate::core::control::match_op(
            graph,
            region,
            match_operation.nbits(),
            new_mapping,
            default_alternative,
            nalternatives,
            selector,
        )?;
        graph.divert_users(exit_var.output, fused)?;
        changed = true;
    }

    Ok(changed)
}
