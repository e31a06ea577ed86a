//! Core functionality: the graph substrate ([`Graph`]), the type system,
//! the operation and normalization framework, the structural node kinds,
//! substitution/copy, traversal and the textual dump.

mod control;
mod delta;
mod diagnostics;
mod display;
mod gamma;
mod graph;
mod lambda;
mod normalize;
mod operation;
mod phi;
mod subst;
mod theta;
mod traverse;
mod types;

// Public API.
pub use self::{
    control::{
        control_constant, control_false, control_true, match_op, ControlConstantOperation,
        ControlValue, MatchOperation,
    },
    delta::{DeltaCtxVar, DeltaNode, DeltaOperation},
    diagnostics::{diagnostics_color_disable, diagnostics_setup},
    gamma::{EntryVar, ExitVar, GammaNode, GammaOperation},
    graph::{
        ArgumentData, ArgumentKind, Graph, InputPort, NodeData, NodeId, NormalFormPolicy, Origin,
        OutputPort, RegionData, RegionId, ResultData, ResultKind, StructuralError,
        TypeMismatchError, UnsupportedError, User,
    },
    lambda::{CtxVar, LambdaNode, LambdaOperation, Linkage},
    normalize::{expand_flattened, FlattenMode},
    operation::{
        BinaryFlags, BinaryOperation, FlattenedBinaryOperation, Operation, ReductionPath,
        UnaryOperation, BINOP_REDUCTION_CONSTANTS, BINOP_REDUCTION_FACTOR, BINOP_REDUCTION_LFOLD,
        BINOP_REDUCTION_LNEUTRAL, BINOP_REDUCTION_MERGE, BINOP_REDUCTION_NONE,
        BINOP_REDUCTION_RFOLD, BINOP_REDUCTION_RNEUTRAL, UNOP_REDUCTION_CONSTANT,
        UNOP_REDUCTION_INVERSE, UNOP_REDUCTION_NONE,
    },
    phi::{PhiCtxVar, PhiNode, PhiOperation, RecVar},
    subst::{copy_node, copy_region, copy_region_body, SubstitutionMap},
    theta::{LoopVar, ThetaNode, ThetaOperation},
    traverse::{BottomUpTraverser, TopDownTraverser},
    types::{FloatSize, StructDeclaration, Type, TypeKind},
};
