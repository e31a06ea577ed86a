//! The operation framework.
//!
//! An operation is an immutable descriptor attached to a node: it declares
//! the node's port signature, a debug string and a deep-copy method.
//! Capability views (`as_unary`, `as_binary`) narrow an operation to the
//! unary/binary reduction protocols; structural operations additionally
//! declare subregion semantics.

use crate::core::graph::{Graph, Origin, RegionId};
use crate::core::types::Type;
use anyhow::Result;
use downcast_rs::{impl_downcast, Downcast};

/// Identifies which applicable rewrite a reducer selected for a given
/// operand shape. `0` always means "no reduction applies".
pub type ReductionPath = u8;

pub const UNOP_REDUCTION_NONE: ReductionPath = 0;
/// The operand is a constant; fold the application.
pub const UNOP_REDUCTION_CONSTANT: ReductionPath = 1;
/// The operand is produced by the inverse operation; cancel both.
pub const UNOP_REDUCTION_INVERSE: ReductionPath = 2;

pub const BINOP_REDUCTION_NONE: ReductionPath = 0;
/// Both operands are constants; fold the pair.
pub const BINOP_REDUCTION_CONSTANTS: ReductionPath = 1;
/// The operands can be merged into a single equivalent operand.
pub const BINOP_REDUCTION_MERGE: ReductionPath = 2;
/// The left operand folds into the right one.
pub const BINOP_REDUCTION_LFOLD: ReductionPath = 3;
/// The right operand folds into the left one.
pub const BINOP_REDUCTION_RFOLD: ReductionPath = 4;
/// The left operand is the neutral element.
pub const BINOP_REDUCTION_LNEUTRAL: ReductionPath = 5;
/// The right operand is the neutral element.
pub const BINOP_REDUCTION_RNEUTRAL: ReductionPath = 6;
/// A common factor can be pulled out of both operands.
pub const BINOP_REDUCTION_FACTOR: ReductionPath = 7;

/// Flags carried by binary operations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BinaryFlags {
    pub associative: bool,
    pub commutative: bool,
}

impl BinaryFlags {
    pub const NONE: BinaryFlags = BinaryFlags {
        associative: false,
        commutative: false,
    };

    pub const ASSOCIATIVE_COMMUTATIVE: BinaryFlags = BinaryFlags {
        associative: true,
        commutative: true,
    };
}

/// The immutable descriptor attached to every node.
pub trait Operation: Downcast + std::fmt::Debug {
    /// Ordered argument (input) types of the port signature. Structural
    /// operations return an empty list; their ports are managed by the
    /// variable machinery of the owning node kind.
    fn arguments(&self) -> Vec<Type>;

    /// Ordered result (output) types of the port signature.
    fn results(&self) -> Vec<Type>;

    fn debug_string(&self) -> String;

    fn copy_operation(&self) -> Box<dyn Operation>;

    /// Structural equality: same dynamic kind, same port signature, same
    /// kind-specific attributes.
    fn eq_operation(&self, other: &dyn Operation) -> bool;

    /// Narrow to the unary reduction protocol.
    fn as_unary(&self) -> Option<&dyn UnaryOperation> {
        None
    }

    /// Narrow to the binary reduction protocol.
    fn as_binary(&self) -> Option<&dyn BinaryOperation> {
        None
    }

    /// Whether this operation owns subregions.
    fn is_structural(&self) -> bool {
        false
    }

    /// Whether subregions of this operation may contain back-edge
    /// argument/result pairs.
    fn allows_backedges(&self) -> bool {
        false
    }

    /// Operation-specific normalization, consulted before a node is created
    /// (under the `mutable` policy) and by the graph-wide fixed point.
    /// Returns the replacement origins if a rewrite applies.
    fn normalize(
        &self,
        graph: &mut Graph,
        region: RegionId,
        operands: &[Origin],
    ) -> Result<Option<Vec<Origin>>> {
        let _ = (graph, region, operands);
        Ok(None)
    }
}
impl_downcast!(Operation);

/// One input, one output.
pub trait UnaryOperation: Operation {
    fn can_reduce_operand(&self, graph: &Graph, operand: Origin) -> ReductionPath;

    /// Applies the reduction selected by `path`, returning the replacement
    /// origin. May create nodes in the operand's region.
    fn reduce_operand(
        &self,
        graph: &mut Graph,
        path: ReductionPath,
        operand: Origin,
    ) -> Result<Origin>;
}

/// Two inputs, one output.
pub trait BinaryOperation: Operation {
    fn flags(&self) -> BinaryFlags {
        BinaryFlags::NONE
    }

    fn is_associative(&self) -> bool {
        self.flags().associative
    }

    fn is_commutative(&self) -> bool {
        self.flags().commutative
    }

    fn can_reduce_operand_pair(&self, graph: &Graph, op1: Origin, op2: Origin) -> ReductionPath;

    fn reduce_operand_pair(
        &self,
        graph: &mut Graph,
        path: ReductionPath,
        op1: Origin,
        op2: Origin,
    ) -> Result<Origin>;
}

/// An associative binary operation applied to more than two operands at
/// once. Produced by associative flattening; re-serialized into binary
/// trees on demand.
#[derive(Debug)]
pub struct FlattenedBinaryOperation {
    operation: Box<dyn Operation>,
    narguments: usize,
}

impl FlattenedBinaryOperation {
    pub fn new(operation: Box<dyn Operation>, narguments: usize) -> FlattenedBinaryOperation {
        assert!(narguments > 2);
        assert!(operation.as_binary().is_some());
        FlattenedBinaryOperation {
            operation,
            narguments,
        }
    }

    /// The flattened binary operation.
    pub fn bin_operation(&self) -> &dyn BinaryOperation {
        self.operation
            .as_binary()
            .expect("flattened operation must wrap a binary operation")
    }

    /// The flattened operation as a plain operation descriptor.
    pub fn inner_operation(&self) -> &dyn Operation {
        self.operation.as_ref()
    }

    pub fn narguments(&self) -> usize {
        self.narguments
    }
}

impl Operation for FlattenedBinaryOperation {
    fn arguments(&self) -> Vec<Type> {
        let ty = self.operation.arguments()[0].clone();
        vec![ty; self.narguments]
    }

    fn results(&self) -> Vec<Type> {
        self.operation.results()
    }

    fn debug_string(&self) -> String {
        format!("FLATTENED[{}]", self.operation.debug_string())
    }

    fn copy_operation(&self) -> Box<dyn Operation> {
        Box::new(FlattenedBinaryOperation {
            operation: self.operation.copy_operation(),
            narguments: self.narguments,
        })
    }

    fn eq_operation(&self, other: &dyn Operation) -> bool {
        match other.downcast_ref::<FlattenedBinaryOperation>() {
            Some(op) => {
                op.narguments == self.narguments
                    && self.operation.eq_operation(op.operation.as_ref())
            }
            None => false,
        }
    }
}
