//! Bitstring operations: constants, arithmetic, comparisons and width
//! changes, with their reducers.

use crate::core::{
    BinaryFlags, BinaryOperation, Graph, Operation, Origin, ReductionPath, RegionId, Type,
    UnaryOperation, BINOP_REDUCTION_CONSTANTS, BINOP_REDUCTION_LNEUTRAL, BINOP_REDUCTION_NONE,
    BINOP_REDUCTION_RNEUTRAL, UNOP_REDUCTION_CONSTANT, UNOP_REDUCTION_INVERSE,
    UNOP_REDUCTION_NONE,
};
use anyhow::Result;

fn mask(width: usize) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// Sign-extends a `width`-bit value into an i64.
pub fn to_signed(width: usize, value: u64) -> i64 {
    let value = value & mask(width);
    if width < 64 && value & (1u64 << (width - 1)) != 0 {
        (value | !mask(width)) as i64
    } else {
        value as i64
    }
}

/// A bitstring constant of a fixed width.
#[derive(Clone, Debug)]
pub struct BitConstantOperation {
    width: usize,
    value: u64,
}

impl BitConstantOperation {
    pub fn new(width: usize, value: u64) -> BitConstantOperation {
        BitConstantOperation {
            width,
            value: value & mask(width),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn value_signed(&self) -> i64 {
        to_signed(self.width, self.value)
    }
}

impl Operation for BitConstantOperation {
    fn arguments(&self) -> Vec<Type> {
        Vec::new()
    }

    fn results(&self) -> Vec<Type> {
        vec![Type::bit(self.width)]
    }

    fn debug_string(&self) -> String {
        format!("BITS{}({})", self.width, self.value)
    }

    fn copy_operation(&self) -> Box<dyn Operation> {
        Box::new(self.clone())
    }

    fn eq_operation(&self, other: &dyn Operation) -> bool {
        other
            .downcast_ref::<BitConstantOperation>()
            .map(|op| op.width == self.width && op.value == self.value)
            .unwrap_or(false)
    }
}

/// Reads the constant value behind an origin, if its producer is a bit
/// constant.
pub fn constant_value(graph: &Graph, origin: Origin) -> Option<(usize, u64)> {
    let producer = graph.origin_node(origin)?;
    graph
        .node(producer)
        .operation()
        .downcast_ref::<BitConstantOperation>()
        .map(|op| (op.width(), op.value()))
}

/// The binary bitstring arithmetic kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BitBinaryKind {
    Add,
    Sub,
    Mul,
    And,
    Or,
    Xor,
}

impl BitBinaryKind {
    fn name(&self) -> &'static str {
        match self {
            BitBinaryKind::Add => "BITADD",
            BitBinaryKind::Sub => "BITSUB",
            BitBinaryKind::Mul => "BITMUL",
            BitBinaryKind::And => "BITAND",
            BitBinaryKind::Or => "BITOR",
            BitBinaryKind::Xor => "BITXOR",
        }
    }

    fn flags(&self) -> BinaryFlags {
        match self {
            BitBinaryKind::Sub => BinaryFlags::NONE,
            _ => BinaryFlags::ASSOCIATIVE_COMMUTATIVE,
        }
    }

    pub fn fold(&self, width: usize, lhs: u64, rhs: u64) -> u64 {
        let value = match self {
            BitBinaryKind::Add => lhs.wrapping_add(rhs),
            BitBinaryKind::Sub => lhs.wrapping_sub(rhs),
            BitBinaryKind::Mul => lhs.wrapping_mul(rhs),
            BitBinaryKind::And => lhs & rhs,
            BitBinaryKind::Or => lhs | rhs,
            BitBinaryKind::Xor => lhs ^ rhs,
        };
        value & mask(width)
    }

    /// The right neutral element, if the operation has one.
    fn right_neutral(&self, width: usize) -> Option<u64> {
        match self {
            BitBinaryKind::Add | BitBinaryKind::Sub | BitBinaryKind::Or | BitBinaryKind::Xor => {
                Some(0)
            }
            BitBinaryKind::Mul => Some(1),
            BitBinaryKind::And => Some(mask(width)),
        }
    }

    /// The left neutral element, if the operation has one.
    fn left_neutral(&self, width: usize) -> Option<u64> {
        match self {
            BitBinaryKind::Sub => None,
            _ => self.right_neutral(width),
        }
    }
}

/// A binary bitstring arithmetic operation.
#[derive(Clone, Debug)]
pub struct BitBinaryOperation {
    kind: BitBinaryKind,
    width: usize,
}

impl BitBinaryOperation {
    pub fn new(kind: BitBinaryKind, width: usize) -> BitBinaryOperation {
        BitBinaryOperation { kind, width }
    }

    pub fn kind(&self) -> BitBinaryKind {
        self.kind
    }

    pub fn width(&self) -> usize {
        self.width
    }
}

impl Operation for BitBinaryOperation {
    fn arguments(&self) -> Vec<Type> {
        vec![Type::bit(self.width); 2]
    }

    fn results(&self) -> Vec<Type> {
        vec![Type::bit(self.width)]
    }

    fn debug_string(&self) -> String {
        format!("{}{}", self.kind.name(), self.width)
    }

    fn copy_operation(&self) -> Box<dyn Operation> {
        Box::new(self.clone())
    }

    fn eq_operation(&self, other: &dyn Operation) -> bool {
        other
            .downcast_ref::<BitBinaryOperation>()
            .map(|op| op.kind == self.kind && op.width == self.width)
            .unwrap_or(false)
    }

    fn as_binary(&self) -> Option<&dyn BinaryOperation> {
        Some(self)
    }
}

impl BinaryOperation for BitBinaryOperation {
    fn flags(&self) -> BinaryFlags {
        self.kind.flags()
    }

    fn can_reduce_operand_pair(&self, graph: &Graph, op1: Origin, op2: Origin) -> ReductionPath {
        let lhs = constant_value(graph, op1);
        let rhs = constant_value(graph, op2);
        if lhs.is_some() && rhs.is_some() {
            return BINOP_REDUCTION_CONSTANTS;
        }
        if let Some((_, value)) = rhs {
            if self.kind.right_neutral(self.width) == Some(value) {
                return BINOP_REDUCTION_RNEUTRAL;
            }
        }
        if let Some((_, value)) = lhs {
            if self.kind.left_neutral(self.width) == Some(value) {
                return BINOP_REDUCTION_LNEUTRAL;
            }
        }
        BINOP_REDUCTION_NONE
    }

    fn reduce_operand_pair(
        &self,
        graph: &mut Graph,
        path: ReductionPath,
        op1: Origin,
        op2: Origin,
    ) -> Result<Origin> {
        match path {
            BINOP_REDUCTION_CONSTANTS => {
                let (_, lhs) = constant_value(graph, op1).unwrap();
                let (_, rhs) = constant_value(graph, op2).unwrap();
                let folded = self.kind.fold(self.width, lhs, rhs);
                let region = graph.origin_region(op1);
                bitconstant(graph, region, self.width, folded)
            }
            BINOP_REDUCTION_RNEUTRAL => Ok(op1),
            BINOP_REDUCTION_LNEUTRAL => Ok(op2),
            _ => unreachable!("unknown binary reduction path"),
        }
    }
}

/// The bitstring comparison kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BitCompareKind {
    Eq,
    Ne,
    Ult,
    Ule,
    Ugt,
    Uge,
    Slt,
    Sle,
    Sgt,
    Sge,
}

impl BitCompareKind {
    fn name(&self) -> &'static str {
        match self {
            BitCompareKind::Eq => "BITEQ",
            BitCompareKind::Ne => "BITNE",
            BitCompareKind::Ult => "BITULT",
            BitCompareKind::Ule => "BITULE",
            BitCompareKind::Ugt => "BITUGT",
            BitCompareKind::Uge => "BITUGE",
            BitCompareKind::Slt => "BITSLT",
            BitCompareKind::Sle => "BITSLE",
            BitCompareKind::Sgt => "BITSGT",
            BitCompareKind::Sge => "BITSGE",
        }
    }

    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            BitCompareKind::Slt | BitCompareKind::Sle | BitCompareKind::Sgt | BitCompareKind::Sge
        )
    }

    pub fn fold(&self, width: usize, lhs: u64, rhs: u64) -> bool {
        let (sl, sr) = (to_signed(width, lhs), to_signed(width, rhs));
        match self {
            BitCompareKind::Eq => lhs == rhs,
            BitCompareKind::Ne => lhs != rhs,
            BitCompareKind::Ult => lhs < rhs,
            BitCompareKind::Ule => lhs <= rhs,
            BitCompareKind::Ugt => lhs > rhs,
            BitCompareKind::Uge => lhs >= rhs,
            BitCompareKind::Slt => sl < sr,
            BitCompareKind::Sle => sl <= sr,
            BitCompareKind::Sgt => sl > sr,
            BitCompareKind::Sge => sl >= sr,
        }
    }
}

/// A bitstring comparison producing a single bit.
#[derive(Clone, Debug)]
pub struct BitCompareOperation {
    kind: BitCompareKind,
    width: usize,
}

impl BitCompareOperation {
    pub fn new(kind: BitCompareKind, width: usize) -> BitCompareOperation {
        BitCompareOperation { kind, width }
    }

    pub fn kind(&self) -> BitCompareKind {
        self.kind
    }

    pub fn width(&self) -> usize {
        self.width
    }
}

impl Operation for BitCompareOperation {
    fn arguments(&self) -> Vec<Type> {
        vec![Type::bit(self.width); 2]
    }

    fn results(&self) -> Vec<Type> {
        vec![Type::bit(1)]
    }

    fn debug_string(&self) -> String {
        format!("{}{}", self.kind.name(), self.width)
    }

    fn copy_operation(&self) -> Box<dyn Operation> {
        Box::new(self.clone())
    }

    fn eq_operation(&self, other: &dyn Operation) -> bool {
        other
            .downcast_ref::<BitCompareOperation>()
            .map(|op| op.kind == self.kind && op.width == self.width)
            .unwrap_or(false)
    }

    fn as_binary(&self) -> Option<&dyn BinaryOperation> {
        Some(self)
    }
}

impl BinaryOperation for BitCompareOperation {
    fn flags(&self) -> BinaryFlags {
        match self.kind {
            BitCompareKind::Eq | BitCompareKind::Ne => BinaryFlags {
                associative: false,
                commutative: true,
            },
            _ => BinaryFlags::NONE,
        }
    }

    fn can_reduce_operand_pair(&self, graph: &Graph, op1: Origin, op2: Origin) -> ReductionPath {
        if constant_value(graph, op1).is_some() && constant_value(graph, op2).is_some() {
            BINOP_REDUCTION_CONSTANTS
        } else {
            BINOP_REDUCTION_NONE
        }
    }

    fn reduce_operand_pair(
        &self,
        graph: &mut Graph,
        path: ReductionPath,
        op1: Origin,
        op2: Origin,
    ) -> Result<Origin> {
        assert_eq!(path, BINOP_REDUCTION_CONSTANTS);
        let (_, lhs) = constant_value(graph, op1).unwrap();
        let (_, rhs) = constant_value(graph, op2).unwrap();
        let folded = self.kind.fold(self.width, lhs, rhs);
        let region = graph.origin_region(op1);
        bitconstant(graph, region, 1, folded as u64)
    }
}

/// Zero- or sign-extension to a wider bitstring.
#[derive(Clone, Debug)]
pub struct BitExtendOperation {
    signed: bool,
    from: usize,
    to: usize,
}

impl BitExtendOperation {
    pub fn new(signed: bool, from: usize, to: usize) -> BitExtendOperation {
        assert!(from < to);
        BitExtendOperation { signed, from, to }
    }

    pub fn from_width(&self) -> usize {
        self.from
    }

    pub fn to_width(&self) -> usize {
        self.to
    }
}

impl Operation for BitExtendOperation {
    fn arguments(&self) -> Vec<Type> {
        vec![Type::bit(self.from)]
    }

    fn results(&self) -> Vec<Type> {
        vec![Type::bit(self.to)]
    }

    fn debug_string(&self) -> String {
        let tag = if self.signed { "SEXT" } else { "ZEXT" };
        format!("{}[{} -> {}]", tag, self.from, self.to)
    }

    fn copy_operation(&self) -> Box<dyn Operation> {
        Box::new(self.clone())
    }

    fn eq_operation(&self, other: &dyn Operation) -> bool {
        other
            .downcast_ref::<BitExtendOperation>()
            .map(|op| op.signed == self.signed && op.from == self.from && op.to == self.to)
            .unwrap_or(false)
    }

    fn as_unary(&self) -> Option<&dyn UnaryOperation> {
        Some(self)
    }
}

impl UnaryOperation for BitExtendOperation {
    fn can_reduce_operand(&self, graph: &Graph, operand: Origin) -> ReductionPath {
        if constant_value(graph, operand).is_some() {
            UNOP_REDUCTION_CONSTANT
        } else {
            UNOP_REDUCTION_NONE
        }
    }

    fn reduce_operand(
        &self,
        graph: &mut Graph,
        path: ReductionPath,
        operand: Origin,
    ) -> Result<Origin> {
        assert_eq!(path, UNOP_REDUCTION_CONSTANT);
        let (_, value) = constant_value(graph, operand).unwrap();
        let extended = if self.signed {
            to_signed(self.from, value) as u64
        } else {
            value
        };
        let region = graph.origin_region(operand);
        bitconstant(graph, region, self.to, extended)
    }
}

/// Truncation to a narrower bitstring; cancels a preceding extension.
#[derive(Clone, Debug)]
pub struct BitTruncateOperation {
    from: usize,
    to: usize,
}

impl BitTruncateOperation {
    pub fn new(from: usize, to: usize) -> BitTruncateOperation {
        assert!(from > to);
        BitTruncateOperation { from, to }
    }
}

impl Operation for BitTruncateOperation {
    fn arguments(&self) -> Vec<Type> {
        vec![Type::bit(self.from)]
    }

    fn results(&self) -> Vec<Type> {
        vec![Type::bit(self.to)]
    }

    fn debug_string(&self) -> String {
        format!("TRUNC[{} -> {}]", self.from, self.to)
    }

    fn copy_operation(&self) -> Box<dyn Operation> {
        Box::new(self.clone())
    }

    fn eq_operation(&self, other: &dyn Operation) -> bool {
        other
            .downcast_ref::<BitTruncateOperation>()
            .map(|op| op.from == self.from && op.to == self.to)
            .unwrap_or(false)
    }

    fn as_unary(&self) -> Option<&dyn UnaryOperation> {
        Some(self)
    }
}

impl UnaryOperation for BitTruncateOperation {
    fn can_reduce_operand(&self, graph: &Graph, operand: Origin) -> ReductionPath {
        if constant_value(graph, operand).is_some() {
            return UNOP_REDUCTION_CONSTANT;
        }
        if let Some(producer) = graph.origin_node(operand) {
            if let Some(ext) = graph
                .node(producer)
                .operation()
                .downcast_ref::<BitExtendOperation>()
            {
                if ext.from_width() == self.to {
                    return UNOP_REDUCTION_INVERSE;
                }
            }
        }
        UNOP_REDUCTION_NONE
    }

    fn reduce_operand(
        &self,
        graph: &mut Graph,
        path: ReductionPath,
        operand: Origin,
    ) -> Result<Origin> {
        match path {
            UNOP_REDUCTION_CONSTANT => {
                let (_, value) = constant_value(graph, operand).unwrap();
                let region = graph.origin_region(operand);
                bitconstant(graph, region, self.to, value)
            }
            UNOP_REDUCTION_INVERSE => {
                let producer = graph.origin_node(operand).unwrap();
                Ok(graph.node(producer).input(0).origin())
            }
            _ => unreachable!("unknown unary reduction path"),
        }
    }
}

// ---- creation helpers ------------------------------------------------------

pub fn bitconstant(graph: &mut Graph, region: RegionId, width: usize, value: u64) -> Result<Origin> {
    let op = BitConstantOperation::new(width, value);
    let outputs = graph.create_normalized(region, Box::new(op), &[])?;
    Ok(outputs[0])
}

fn binary(graph: &mut Graph, kind: BitBinaryKind, lhs: Origin, rhs: Origin) -> Result<Origin> {
    let width = match graph.origin_type(lhs).kind() {
        crate::core::TypeKind::Bit(w) => *w,
        _ => 0,
    };
    let region = graph.origin_region(lhs);
    let op = BitBinaryOperation::new(kind, width);
    let outputs = graph.create_normalized(region, Box::new(op), &[lhs, rhs])?;
    Ok(outputs[0])
}

pub fn bitadd(graph: &mut Graph, lhs: Origin, rhs: Origin) -> Result<Origin> {
    binary(graph, BitBinaryKind::Add, lhs, rhs)
}

pub fn bitsub(graph: &mut Graph, lhs: Origin, rhs: Origin) -> Result<Origin> {
    binary(graph, BitBinaryKind::Sub, lhs, rhs)
}

pub fn bitmul(graph: &mut Graph, lhs: Origin, rhs: Origin) -> Result<Origin> {
    binary(graph, BitBinaryKind::Mul, lhs, rhs)
}

pub fn bitand(graph: &mut Graph, lhs: Origin, rhs: Origin) -> Result<Origin> {
    binary(graph, BitBinaryKind::And, lhs, rhs)
}

pub fn bitor(graph: &mut Graph, lhs: Origin, rhs: Origin) -> Result<Origin> {
    binary(graph, BitBinaryKind::Or, lhs, rhs)
}

pub fn bitxor(graph: &mut Graph, lhs: Origin, rhs: Origin) -> Result<Origin> {
    binary(graph, BitBinaryKind::Xor, lhs, rhs)
}

pub fn bitcompare(
    graph: &mut Graph,
    kind: BitCompareKind,
    lhs: Origin,
    rhs: Origin,
) -> Result<Origin> {
    let width = match graph.origin_type(lhs).kind() {
        crate::core::TypeKind::Bit(w) => *w,
        _ => 0,
    };
    let region = graph.origin_region(lhs);
    let op = BitCompareOperation::new(kind, width);
    let outputs = graph.create_normalized(region, Box::new(op), &[lhs, rhs])?;
    Ok(outputs[0])
}

pub fn biteq(graph: &mut Graph, lhs: Origin, rhs: Origin) -> Result<Origin> {
    bitcompare(graph, BitCompareKind::Eq, lhs, rhs)
}

pub fn bitne(graph: &mut Graph, lhs: Origin, rhs: Origin) -> Result<Origin> {
    bitcompare(graph, BitCompareKind::Ne, lhs, rhs)
}

pub fn bitult(graph: &mut Graph, lhs: Origin, rhs: Origin) -> Result<Origin> {
    bitcompare(graph, BitCompareKind::Ult, lhs, rhs)
}

pub fn bitule(graph: &mut Graph, lhs: Origin, rhs: Origin) -> Result<Origin> {
    bitcompare(graph, BitCompareKind::Ule, lhs, rhs)
}

pub fn bitslt(graph: &mut Graph, lhs: Origin, rhs: Origin) -> Result<Origin> {
    bitcompare(graph, BitCompareKind::Slt, lhs, rhs)
}

pub fn bitext(graph: &mut Graph, signed: bool, operand: Origin, to: usize) -> Result<Origin> {
    let from = match graph.origin_type(operand).kind() {
        crate::core::TypeKind::Bit(w) => *w,
        _ => 0,
    };
    let region = graph.origin_region(operand);
    let op = BitExtendOperation::new(signed, from, to);
    let outputs = graph.create_normalized(region, Box::new(op), &[operand])?;
    Ok(outputs[0])
}

pub fn bittrunc(graph: &mut Graph, operand: Origin, to: usize) -> Result<Origin> {
    let from = match graph.origin_type(operand).kind() {
        crate::core::TypeKind::Bit(w) => *w,
        _ => 0,
    };
    let region = graph.origin_region(operand);
    let op = BitTruncateOperation::new(from, to);
    let outputs = graph.create_normalized(region, Box::new(op), &[operand])?;
    Ok(outputs[0])
}
