//! Control constants and the match operation.
//!
//! Control values select one of N alternatives; gammas branch on them and
//! thetas repeat on them (alternative 1 repeats, alternative 0 exits). A
//! match maps a bitstring to a control value through a case table.

use crate::core::graph::{Graph, Origin, RegionId};
use crate::core::operation::{
    Operation, ReductionPath, UnaryOperation, UNOP_REDUCTION_CONSTANT, UNOP_REDUCTION_NONE,
};
use crate::core::types::Type;
use crate::dialects::bits::BitConstantOperation;
use anyhow::Result;

/// One alternative out of a fixed number of them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ControlValue {
    alternative: usize,
    nalternatives: usize,
}

impl ControlValue {
    pub fn new(alternative: usize, nalternatives: usize) -> ControlValue {
        assert!(alternative < nalternatives);
        ControlValue {
            alternative,
            nalternatives,
        }
    }

    pub fn alternative(&self) -> usize {
        self.alternative
    }

    pub fn nalternatives(&self) -> usize {
        self.nalternatives
    }
}

/// A constant control value.
#[derive(Clone, Debug)]
pub struct ControlConstantOperation {
    value: ControlValue,
}

impl ControlConstantOperation {
    pub fn new(value: ControlValue) -> ControlConstantOperation {
        ControlConstantOperation { value }
    }

    pub fn value(&self) -> ControlValue {
        self.value
    }
}

impl Operation for ControlConstantOperation {
    fn arguments(&self) -> Vec<Type> {
        Vec::new()
    }

    fn results(&self) -> Vec<Type> {
        vec![Type::control(self.value.nalternatives())]
    }

    fn debug_string(&self) -> String {
        format!(
            "CTL({}/{})",
            self.value.alternative(),
            self.value.nalternatives()
        )
    }

    fn copy_operation(&self) -> Box<dyn Operation> {
        Box::new(self.clone())
    }

    fn eq_operation(&self, other: &dyn Operation) -> bool {
        other
            .downcast_ref::<ControlConstantOperation>()
            .map(|op| op.value == self.value)
            .unwrap_or(false)
    }
}

pub fn control_constant(
    graph: &mut Graph,
    region: RegionId,
    alternative: usize,
    nalternatives: usize,
) -> Result<Origin> {
    let op = ControlConstantOperation::new(ControlValue::new(alternative, nalternatives));
    let outputs = graph.create_normalized(region, Box::new(op), &[])?;
    Ok(outputs[0])
}

/// The control-2 value that exits a loop.
pub fn control_false(graph: &mut Graph, region: RegionId) -> Result<Origin> {
    control_constant(graph, region, 0, 2)
}

/// The control-2 value that repeats a loop.
pub fn control_true(graph: &mut Graph, region: RegionId) -> Result<Origin> {
    control_constant(graph, region, 1, 2)
}

/// Maps a bit-N selector to a control value through a case table.
#[derive(Clone, Debug)]
pub struct MatchOperation {
    nbits: usize,
    mapping: Vec<(u64, u64)>,
    default_alternative: u64,
    nalternatives: usize,
}

impl MatchOperation {
    pub fn new(
        nbits: usize,
        mapping: Vec<(u64, u64)>,
        default_alternative: u64,
        nalternatives: usize,
    ) -> MatchOperation {
        assert!((default_alternative as usize) < nalternatives);
        for (_, alternative) in &mapping {
            assert!((*alternative as usize) < nalternatives);
        }
        MatchOperation {
            nbits,
            mapping,
            default_alternative,
            nalternatives,
        }
    }

    pub fn nbits(&self) -> usize {
        self.nbits
    }

    pub fn mapping(&self) -> &[(u64, u64)] {
        &self.mapping
    }

    pub fn default_alternative(&self) -> u64 {
        self.default_alternative
    }

    pub fn nalternatives(&self) -> usize {
        self.nalternatives
    }

    /// The alternative selected for a concrete selector value.
    pub fn alternative(&self, value: u64) -> u64 {
        self.mapping
            .iter()
            .find(|(v, _)| *v == value)
            .map(|(_, a)| *a)
            .unwrap_or(self.default_alternative)
    }
}

impl Operation for MatchOperation {
    fn arguments(&self) -> Vec<Type> {
        vec![Type::bit(self.nbits)]
    }

    fn results(&self) -> Vec<Type> {
        vec![Type::control(self.nalternatives)]
    }

    fn debug_string(&self) -> String {
        format!("MATCH[{} -> ctl{}]", self.nbits, self.nalternatives)
    }

    fn copy_operation(&self) -> Box<dyn Operation> {
        Box::new(self.clone())
    }

    fn eq_operation(&self, other: &dyn Operation) -> bool {
        other
            .downcast_ref::<MatchOperation>()
            .map(|op| {
                op.nbits == self.nbits
                    && op.mapping == self.mapping
                    && op.default_alternative == self.default_alternative
                    && op.nalternatives == self.nalternatives
            })
            .unwrap_or(false)
    }

    fn as_unary(&self) -> Option<&dyn UnaryOperation> {
        Some(self)
    }
}

impl UnaryOperation for MatchOperation {
    fn can_reduce_operand(&self, graph: &Graph, operand: Origin) -> ReductionPath {
        match graph.origin_node(operand) {
            Some(producer) => {
                if graph
                    .node(producer)
                    .operation()
                    .downcast_ref::<BitConstantOperation>()
                    .is_some()
                {
                    UNOP_REDUCTION_CONSTANT
                } else {
                    UNOP_REDUCTION_NONE
                }
            }
            None => UNOP_REDUCTION_NONE,
        }
    }

    fn reduce_operand(
        &self,
        graph: &mut Graph,
        path: ReductionPath,
        operand: Origin,
    ) -> Result<Origin> {
        assert_eq!(path, UNOP_REDUCTION_CONSTANT);
        let producer = graph.origin_node(operand).unwrap();
        let value = graph
            .node(producer)
            .operation()
            .downcast_ref::<BitConstantOperation>()
            .unwrap()
            .value();
        let alternative = self.alternative(value) as usize;
        let region = graph.origin_region(operand);
        control_constant(graph, region, alternative, self.nalternatives)
    }
}

/// Creates a normalized match of `operand` against the case table.
pub fn match_op(
    graph: &mut Graph,
    region: RegionId,
    nbits: usize,
    mapping: Vec<(u64, u64)>,
    default_alternative: u64,
    nalternatives: usize,
    operand: Origin,
) -> Result<Origin> {
    let op = MatchOperation::new(nbits, mapping, default_alternative, nalternatives);
    let outputs = graph.create_normalized(region, Box::new(op), &[operand])?;
    Ok(outputs[0])
}
