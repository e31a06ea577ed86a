//! Memory, pointer and call operations, plus the memory-state split/merge
//! operations the encoder threads state edges through.
//!
//! Function types carry their sequencing states explicitly: by convention
//! the final two arguments and results of a function type are the I/O
//! state and the memory state, and calls/lambdas thread them through the
//! corresponding trailing ports.

use crate::core::{
    Graph, LambdaNode, NodeId, Operation, Origin, RegionId, StructuralError, Type, User,
};
use anyhow::{bail, Result};

/// An undefined value of an arbitrary type; also the encoder's failure
/// sentinel for missing memory states.
#[derive(Clone, Debug)]
pub struct UndefValueOperation {
    ty: Type,
}

impl UndefValueOperation {
    pub fn new(ty: Type) -> UndefValueOperation {
        UndefValueOperation { ty }
    }
}

impl Operation for UndefValueOperation {
    fn arguments(&self) -> Vec<Type> {
        Vec::new()
    }

    fn results(&self) -> Vec<Type> {
        vec![self.ty.clone()]
    }

    fn debug_string(&self) -> String {
        format!("UNDEF[{}]", self.ty)
    }

    fn copy_operation(&self) -> Box<dyn Operation> {
        Box::new(self.clone())
    }

    fn eq_operation(&self, other: &dyn Operation) -> bool {
        other
            .downcast_ref::<UndefValueOperation>()
            .map(|op| op.ty == self.ty)
            .unwrap_or(false)
    }
}

/// Stack allocation: element count in, address and fresh memory state out.
#[derive(Clone, Debug)]
pub struct AllocaOperation {
    value_type: Type,
    alignment: usize,
}

impl AllocaOperation {
    pub fn new(value_type: Type, alignment: usize) -> AllocaOperation {
        AllocaOperation {
            value_type,
            alignment,
        }
    }

    pub fn value_type(&self) -> &Type {
        &self.value_type
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }
}

impl Operation for AllocaOperation {
    fn arguments(&self) -> Vec<Type> {
        vec![Type::bit(32)]
    }

    fn results(&self) -> Vec<Type> {
        vec![Type::pointer(), Type::memory_state()]
    }

    fn debug_string(&self) -> String {
        format!("ALLOCA[{}]", self.value_type)
    }

    fn copy_operation(&self) -> Box<dyn Operation> {
        Box::new(self.clone())
    }

    fn eq_operation(&self, other: &dyn Operation) -> bool {
        other
            .downcast_ref::<AllocaOperation>()
            .map(|op| op.value_type == self.value_type && op.alignment == self.alignment)
            .unwrap_or(false)
    }
}

/// Heap allocation: size in bytes in, address and fresh memory state out.
#[derive(Clone, Debug)]
pub struct MallocOperation;

impl Operation for MallocOperation {
    fn arguments(&self) -> Vec<Type> {
        vec![Type::bit(64)]
    }

    fn results(&self) -> Vec<Type> {
        vec![Type::pointer(), Type::memory_state()]
    }

    fn debug_string(&self) -> String {
        "MALLOC".to_string()
    }

    fn copy_operation(&self) -> Box<dyn Operation> {
        Box::new(MallocOperation)
    }

    fn eq_operation(&self, other: &dyn Operation) -> bool {
        other.downcast_ref::<MallocOperation>().is_some()
    }
}

/// A load threading `nstates` memory-state edges.
#[derive(Clone, Debug)]
pub struct LoadOperation {
    loaded_type: Type,
    nstates: usize,
    alignment: usize,
}

impl LoadOperation {
    pub fn new(loaded_type: Type, nstates: usize, alignment: usize) -> LoadOperation {
        LoadOperation {
            loaded_type,
            nstates,
            alignment,
        }
    }

    pub fn loaded_type(&self) -> &Type {
        &self.loaded_type
    }

    pub fn nstates(&self) -> usize {
        self.nstates
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }
}

impl Operation for LoadOperation {
    fn arguments(&self) -> Vec<Type> {
        let mut types = vec![Type::pointer()];
        types.extend(vec![Type::memory_state(); self.nstates]);
        types
    }

    fn results(&self) -> Vec<Type> {
        let mut types = vec![self.loaded_type.clone()];
        types.extend(vec![Type::memory_state(); self.nstates]);
        types
    }

    fn debug_string(&self) -> String {
        format!("LOAD[{}]", self.loaded_type)
    }

    fn copy_operation(&self) -> Box<dyn Operation> {
        Box::new(self.clone())
    }

    fn eq_operation(&self, other: &dyn Operation) -> bool {
        other
            .downcast_ref::<LoadOperation>()
            .map(|op| {
                op.loaded_type == self.loaded_type
                    && op.nstates == self.nstates
                    && op.alignment == self.alignment
            })
            .unwrap_or(false)
    }
}

/// A store threading `nstates` memory-state edges.
#[derive(Clone, Debug)]
pub struct StoreOperation {
    stored_type: Type,
    nstates: usize,
    alignment: usize,
}

impl StoreOperation {
    pub fn new(stored_type: Type, nstates: usize, alignment: usize) -> StoreOperation {
        StoreOperation {
            stored_type,
            nstates,
            alignment,
        }
    }

    pub fn stored_type(&self) -> &Type {
        &self.stored_type
    }

    pub fn nstates(&self) -> usize {
        self.nstates
    }
}

impl Operation for StoreOperation {
    fn arguments(&self) -> Vec<Type> {
        let mut types = vec![Type::pointer(), self.stored_type.clone()];
        types.extend(vec![Type::memory_state(); self.nstates]);
        types
    }

    fn results(&self) -> Vec<Type> {
        vec![Type::memory_state(); self.nstates]
    }

    fn debug_string(&self) -> String {
        format!("STORE[{}]", self.stored_type)
    }

    fn copy_operation(&self) -> Box<dyn Operation> {
        Box::new(self.clone())
    }

    fn eq_operation(&self, other: &dyn Operation) -> bool {
        other
            .downcast_ref::<StoreOperation>()
            .map(|op| {
                op.stored_type == self.stored_type
                    && op.nstates == self.nstates
                    && op.alignment == self.alignment
            })
            .unwrap_or(false)
    }
}

/// Heap release; threads its memory states and the I/O state.
#[derive(Clone, Debug)]
pub struct FreeOperation {
    nstates: usize,
}

impl FreeOperation {
    pub fn new(nstates: usize) -> FreeOperation {
        FreeOperation { nstates }
    }

    pub fn nstates(&self) -> usize {
        self.nstates
    }
}

impl Operation for FreeOperation {
    fn arguments(&self) -> Vec<Type> {
        let mut types = vec![Type::pointer()];
        types.extend(vec![Type::memory_state(); self.nstates]);
        types.push(Type::io_state());
        types
    }

    fn results(&self) -> Vec<Type> {
        let mut types = vec![Type::memory_state(); self.nstates];
        types.push(Type::io_state());
        types
    }

    fn debug_string(&self) -> String {
        "FREE".to_string()
    }

    fn copy_operation(&self) -> Box<dyn Operation> {
        Box::new(self.clone())
    }

    fn eq_operation(&self, other: &dyn Operation) -> bool {
        other
            .downcast_ref::<FreeOperation>()
            .map(|op| op.nstates == self.nstates)
            .unwrap_or(false)
    }
}

/// Block copy from source to destination; threads the state edges of both.
#[derive(Clone, Debug)]
pub struct MemCpyOperation {
    nstates: usize,
}

impl MemCpyOperation {
    pub fn new(nstates: usize) -> MemCpyOperation {
        MemCpyOperation { nstates }
    }

    pub fn nstates(&self) -> usize {
        self.nstates
    }
}

impl Operation for MemCpyOperation {
    fn arguments(&self) -> Vec<Type> {
        let mut types = vec![Type::pointer(), Type::pointer(), Type::bit(64)];
        types.extend(vec![Type::memory_state(); self.nstates]);
        types
    }

    fn results(&self) -> Vec<Type> {
        vec![Type::memory_state(); self.nstates]
    }

    fn debug_string(&self) -> String {
        "MEMCPY".to_string()
    }

    fn copy_operation(&self) -> Box<dyn Operation> {
        Box::new(self.clone())
    }

    fn eq_operation(&self, other: &dyn Operation) -> bool {
        other
            .downcast_ref::<MemCpyOperation>()
            .map(|op| op.nstates == self.nstates)
            .unwrap_or(false)
    }
}

/// A function application. The callee is the first input; the remaining
/// ports mirror the function type.
#[derive(Clone, Debug)]
pub struct CallOperation {
    function_type: Type,
}

impl CallOperation {
    pub fn new(function_type: Type) -> CallOperation {
        assert!(function_type.is_function());
        CallOperation { function_type }
    }

    pub fn function_type(&self) -> &Type {
        &self.function_type
    }
}

impl Operation for CallOperation {
    fn arguments(&self) -> Vec<Type> {
        let mut types = vec![self.function_type.clone()];
        types.extend(self.function_type.function_arguments().unwrap().to_vec());
        types
    }

    fn results(&self) -> Vec<Type> {
        self.function_type.function_results().unwrap().to_vec()
    }

    fn debug_string(&self) -> String {
        "CALL".to_string()
    }

    fn copy_operation(&self) -> Box<dyn Operation> {
        Box::new(self.clone())
    }

    fn eq_operation(&self, other: &dyn Operation) -> bool {
        other
            .downcast_ref::<CallOperation>()
            .map(|op| op.function_type == self.function_type)
            .unwrap_or(false)
    }
}

/// Pointer offset computation.
#[derive(Clone, Debug)]
pub struct GetElementPtrOperation {
    noffsets: usize,
}

impl GetElementPtrOperation {
    pub fn new(noffsets: usize) -> GetElementPtrOperation {
        GetElementPtrOperation { noffsets }
    }
}

impl Operation for GetElementPtrOperation {
    fn arguments(&self) -> Vec<Type> {
        let mut types = vec![Type::pointer()];
        types.extend(vec![Type::bit(64); self.noffsets]);
        types
    }

    fn results(&self) -> Vec<Type> {
        vec![Type::pointer()]
    }

    fn debug_string(&self) -> String {
        "GEP".to_string()
    }

    fn copy_operation(&self) -> Box<dyn Operation> {
        Box::new(self.clone())
    }

    fn eq_operation(&self, other: &dyn Operation) -> bool {
        other
            .downcast_ref::<GetElementPtrOperation>()
            .map(|op| op.noffsets == self.noffsets)
            .unwrap_or(false)
    }
}

/// Value-preserving reinterpretation between value types.
#[derive(Clone, Debug)]
pub struct BitCastOperation {
    from: Type,
    to: Type,
}

impl BitCastOperation {
    pub fn new(from: Type, to: Type) -> BitCastOperation {
        BitCastOperation { from, to }
    }
}

impl Operation for BitCastOperation {
    fn arguments(&self) -> Vec<Type> {
        vec![self.from.clone()]
    }

    fn results(&self) -> Vec<Type> {
        vec![self.to.clone()]
    }

    fn debug_string(&self) -> String {
        format!("BITCAST[{} -> {}]", self.from, self.to)
    }

    fn copy_operation(&self) -> Box<dyn Operation> {
        Box::new(self.clone())
    }

    fn eq_operation(&self, other: &dyn Operation) -> bool {
        other
            .downcast_ref::<BitCastOperation>()
            .map(|op| op.from == self.from && op.to == self.to)
            .unwrap_or(false)
    }
}

/// Integer-to-pointer conversion; the result may point anywhere.
#[derive(Clone, Debug)]
pub struct Bits2PtrOperation {
    nbits: usize,
}

impl Bits2PtrOperation {
    pub fn new(nbits: usize) -> Bits2PtrOperation {
        Bits2PtrOperation { nbits }
    }
}

impl Operation for Bits2PtrOperation {
    fn arguments(&self) -> Vec<Type> {
        vec![Type::bit(self.nbits)]
    }

    fn results(&self) -> Vec<Type> {
        vec![Type::pointer()]
    }

    fn debug_string(&self) -> String {
        "BITS2PTR".to_string()
    }

    fn copy_operation(&self) -> Box<dyn Operation> {
        Box::new(self.clone())
    }

    fn eq_operation(&self, other: &dyn Operation) -> bool {
        other
            .downcast_ref::<Bits2PtrOperation>()
            .map(|op| op.nbits == self.nbits)
            .unwrap_or(false)
    }
}

/// Pointer-to-integer conversion.
#[derive(Clone, Debug)]
pub struct Ptr2BitsOperation {
    nbits: usize,
}

impl Ptr2BitsOperation {
    pub fn new(nbits: usize) -> Ptr2BitsOperation {
        Ptr2BitsOperation { nbits }
    }
}

impl Operation for Ptr2BitsOperation {
    fn arguments(&self) -> Vec<Type> {
        vec![Type::pointer()]
    }

    fn results(&self) -> Vec<Type> {
        vec![Type::bit(self.nbits)]
    }

    fn debug_string(&self) -> String {
        "PTR2BITS".to_string()
    }

    fn copy_operation(&self) -> Box<dyn Operation> {
        Box::new(self.clone())
    }

    fn eq_operation(&self, other: &dyn Operation) -> bool {
        other
            .downcast_ref::<Ptr2BitsOperation>()
            .map(|op| op.nbits == self.nbits)
            .unwrap_or(false)
    }
}

/// The null pointer constant.
#[derive(Clone, Debug)]
pub struct ConstantPointerNullOperation;

impl Operation for ConstantPointerNullOperation {
    fn arguments(&self) -> Vec<Type> {
        Vec::new()
    }

    fn results(&self) -> Vec<Type> {
        vec![Type::pointer()]
    }

    fn debug_string(&self) -> String {
        "NULLPTR".to_string()
    }

    fn copy_operation(&self) -> Box<dyn Operation> {
        Box::new(ConstantPointerNullOperation)
    }

    fn eq_operation(&self, other: &dyn Operation) -> bool {
        other.downcast_ref::<ConstantPointerNullOperation>().is_some()
    }
}

/// Two-way selection on a single bit.
#[derive(Clone, Debug)]
pub struct SelectOperation {
    ty: Type,
}

impl SelectOperation {
    pub fn new(ty: Type) -> SelectOperation {
        SelectOperation { ty }
    }
}

impl Operation for SelectOperation {
    fn arguments(&self) -> Vec<Type> {
        vec![Type::bit(1), self.ty.clone(), self.ty.clone()]
    }

    fn results(&self) -> Vec<Type> {
        vec![self.ty.clone()]
    }

    fn debug_string(&self) -> String {
        format!("SELECT[{}]", self.ty)
    }

    fn copy_operation(&self) -> Box<dyn Operation> {
        Box::new(self.clone())
    }

    fn eq_operation(&self, other: &dyn Operation) -> bool {
        other
            .downcast_ref::<SelectOperation>()
            .map(|op| op.ty == self.ty)
            .unwrap_or(false)
    }
}

// ---- memory state operations -----------------------------------------------

/// Merges memory states into one.
#[derive(Clone, Debug)]
pub struct MemoryStateMergeOperation {
    noperands: usize,
}

impl MemoryStateMergeOperation {
    pub fn new(noperands: usize) -> MemoryStateMergeOperation {
        assert!(noperands >= 1);
        MemoryStateMergeOperation { noperands }
    }

    pub fn noperands(&self) -> usize {
        self.noperands
    }
}

impl Operation for MemoryStateMergeOperation {
    fn arguments(&self) -> Vec<Type> {
        vec![Type::memory_state(); self.noperands]
    }

    fn results(&self) -> Vec<Type> {
        vec![Type::memory_state()]
    }

    fn debug_string(&self) -> String {
        "MemStateMerge".to_string()
    }

    fn copy_operation(&self) -> Box<dyn Operation> {
        Box::new(self.clone())
    }

    fn eq_operation(&self, other: &dyn Operation) -> bool {
        other
            .downcast_ref::<MemoryStateMergeOperation>()
            .map(|op| op.noperands == self.noperands)
            .unwrap_or(false)
    }

    fn normalize(
        &self,
        graph: &mut Graph,
        region: RegionId,
        operands: &[Origin],
    ) -> Result<Option<Vec<Origin>>> {
        // merge(x) is the identity
        if operands.len() == 1 {
            return Ok(Some(vec![operands[0]]));
        }

        // merge(split(x)) with equal arity collapses to x
        if let Some(input) = merged_split_input::<MemoryStateSplitOperation>(graph, operands) {
            return Ok(Some(vec![input]));
        }

        // duplicate operands are merged once
        let mut deduped: Vec<Origin> = Vec::new();
        for operand in operands {
            if !deduped.contains(operand) {
                deduped.push(*operand);
            }
        }

        // nested merges are flattened
        let mut flattened: Vec<Origin> = Vec::new();
        let mut changed = deduped.len() != operands.len();
        for operand in &deduped {
            let nested = graph.origin_node(*operand).filter(|producer| {
                graph
                    .node(*producer)
                    .operation()
                    .downcast_ref::<MemoryStateMergeOperation>()
                    .is_some()
            });
            match nested {
                Some(producer) => {
                    flattened.extend(graph.operands(producer));
                    changed = true;
                }
                None => flattened.push(*operand),
            }
        }

        if !changed {
            return Ok(None);
        }
        if flattened.len() == 1 {
            return Ok(Some(vec![flattened[0]]));
        }
        let merged = memory_state_merge(graph, region, &flattened)?;
        Ok(Some(vec![merged]))
    }
}

/// Splits one memory state into many.
#[derive(Clone, Debug)]
pub struct MemoryStateSplitOperation {
    nresults: usize,
}

impl MemoryStateSplitOperation {
    pub fn new(nresults: usize) -> MemoryStateSplitOperation {
        assert!(nresults >= 1);
        MemoryStateSplitOperation { nresults }
    }

    pub fn nresults(&self) -> usize {
        self.nresults
    }
}

impl Operation for MemoryStateSplitOperation {
    fn arguments(&self) -> Vec<Type> {
        vec![Type::memory_state()]
    }

    fn results(&self) -> Vec<Type> {
        vec![Type::memory_state(); self.nresults]
    }

    fn debug_string(&self) -> String {
        "MemStateSplit".to_string()
    }

    fn copy_operation(&self) -> Box<dyn Operation> {
        Box::new(self.clone())
    }

    fn eq_operation(&self, other: &dyn Operation) -> bool {
        other
            .downcast_ref::<MemoryStateSplitOperation>()
            .map(|op| op.nresults == self.nresults)
            .unwrap_or(false)
    }

    fn normalize(
        &self,
        graph: &mut Graph,
        region: RegionId,
        operands: &[Origin],
    ) -> Result<Option<Vec<Origin>>> {
        let operand = operands[0];

        // split(x, 1) is the identity
        if self.nresults == 1 {
            return Ok(Some(vec![operand]));
        }

        if let Some(producer) = graph.origin_node(operand) {
            // split(merge(a1..an)) with equal arity replaces each result
            // by the corresponding merge operand
            if let Some(merge) = graph
                .node(producer)
                .operation()
                .downcast_ref::<MemoryStateMergeOperation>()
            {
                if merge.noperands() == self.nresults {
                    return Ok(Some(graph.operands(producer)));
                }
            }
            // split of a nested split reads the original state directly
            if graph
                .node(producer)
                .operation()
                .downcast_ref::<MemoryStateSplitOperation>()
                .is_some()
            {
                let original = graph.node(producer).input(0).origin();
                let outputs = memory_state_split(graph, region, original, self.nresults)?;
                return Ok(Some(outputs));
            }
        }

        Ok(None)
    }
}

/// Splits the lambda's single entry memory state into per-memory-node
/// edges.
#[derive(Clone, Debug)]
pub struct LambdaEntryMemoryStateSplitOperation {
    nresults: usize,
}

impl LambdaEntryMemoryStateSplitOperation {
    pub fn new(nresults: usize) -> LambdaEntryMemoryStateSplitOperation {
        assert!(nresults >= 1);
        LambdaEntryMemoryStateSplitOperation { nresults }
    }

    pub fn nresults(&self) -> usize {
        self.nresults
    }
}

impl Operation for LambdaEntryMemoryStateSplitOperation {
    fn arguments(&self) -> Vec<Type> {
        vec![Type::memory_state()]
    }

    fn results(&self) -> Vec<Type> {
        vec![Type::memory_state(); self.nresults]
    }

    fn debug_string(&self) -> String {
        "LambdaEntryMemStateSplit".to_string()
    }

    fn copy_operation(&self) -> Box<dyn Operation> {
        Box::new(self.clone())
    }

    fn eq_operation(&self, other: &dyn Operation) -> bool {
        other
            .downcast_ref::<LambdaEntryMemoryStateSplitOperation>()
            .map(|op| op.nresults == self.nresults)
            .unwrap_or(false)
    }
}

/// Merges the per-memory-node edges back into the lambda's single exit
/// memory state.
#[derive(Clone, Debug)]
pub struct LambdaExitMemoryStateMergeOperation {
    noperands: usize,
}

impl LambdaExitMemoryStateMergeOperation {
    pub fn new(noperands: usize) -> LambdaExitMemoryStateMergeOperation {
        assert!(noperands >= 1);
        LambdaExitMemoryStateMergeOperation { noperands }
    }

    pub fn noperands(&self) -> usize {
        self.noperands
    }
}

impl Operation for LambdaExitMemoryStateMergeOperation {
    fn arguments(&self) -> Vec<Type> {
        vec![Type::memory_state(); self.noperands]
    }

    fn results(&self) -> Vec<Type> {
        vec![Type::memory_state()]
    }

    fn debug_string(&self) -> String {
        "LambdaExitMemStateMerge".to_string()
    }

    fn copy_operation(&self) -> Box<dyn Operation> {
        Box::new(self.clone())
    }

    fn eq_operation(&self, other: &dyn Operation) -> bool {
        other
            .downcast_ref::<LambdaExitMemoryStateMergeOperation>()
            .map(|op| op.noperands == self.noperands)
            .unwrap_or(false)
    }

    fn normalize(
        &self,
        graph: &mut Graph,
        region: RegionId,
        operands: &[Origin],
    ) -> Result<Option<Vec<Origin>>> {
        // an operand that is the state output of a load from a fresh
        // alloca is replaced by the alloca state; the load cannot affect
        // an alloca it itself reads unmodified
        let mut replaced = Vec::with_capacity(operands.len());
        let mut changed = false;
        for operand in operands {
            replaced.push(match load_from_fresh_alloca(graph, *operand) {
                Some(alloca_state) => {
                    changed = true;
                    alloca_state
                }
                None => *operand,
            });
        }
        if !changed {
            return Ok(None);
        }
        let merged = lambda_exit_memory_state_merge(graph, region, &replaced)?;
        Ok(Some(vec![merged]))
    }
}

/// Merges the caller-side state edges into the single call input state.
#[derive(Clone, Debug)]
pub struct CallEntryMemoryStateMergeOperation {
    noperands: usize,
}

impl CallEntryMemoryStateMergeOperation {
    pub fn new(noperands: usize) -> CallEntryMemoryStateMergeOperation {
        assert!(noperands >= 1);
        CallEntryMemoryStateMergeOperation { noperands }
    }

    pub fn noperands(&self) -> usize {
        self.noperands
    }
}

impl Operation for CallEntryMemoryStateMergeOperation {
    fn arguments(&self) -> Vec<Type> {
        vec![Type::memory_state(); self.noperands]
    }

    fn results(&self) -> Vec<Type> {
        vec![Type::memory_state()]
    }

    fn debug_string(&self) -> String {
        "CallEntryMemStateMerge".to_string()
    }

    fn copy_operation(&self) -> Box<dyn Operation> {
        Box::new(self.clone())
    }

    fn eq_operation(&self, other: &dyn Operation) -> bool {
        other
            .downcast_ref::<CallEntryMemoryStateMergeOperation>()
            .map(|op| op.noperands == self.noperands)
            .unwrap_or(false)
    }
}

/// Splits the single call output state back into per-memory-node edges.
#[derive(Clone, Debug)]
pub struct CallExitMemoryStateSplitOperation {
    nresults: usize,
}

impl CallExitMemoryStateSplitOperation {
    pub fn new(nresults: usize) -> CallExitMemoryStateSplitOperation {
        assert!(nresults >= 1);
        CallExitMemoryStateSplitOperation { nresults }
    }

    pub fn nresults(&self) -> usize {
        self.nresults
    }
}

impl Operation for CallExitMemoryStateSplitOperation {
    fn arguments(&self) -> Vec<Type> {
        vec![Type::memory_state()]
    }

    fn results(&self) -> Vec<Type> {
        vec![Type::memory_state(); self.nresults]
    }

    fn debug_string(&self) -> String {
        "CallExitMemStateSplit".to_string()
    }

    fn copy_operation(&self) -> Box<dyn Operation> {
        Box::new(self.clone())
    }

    fn eq_operation(&self, other: &dyn Operation) -> bool {
        other
            .downcast_ref::<CallExitMemoryStateSplitOperation>()
            .map(|op| op.nresults == self.nresults)
            .unwrap_or(false)
    }
}

/// True for every operation whose only purpose is memory-state routing.
pub fn is_memory_state_operation(operation: &dyn Operation) -> bool {
    operation.downcast_ref::<MemoryStateMergeOperation>().is_some()
        || operation.downcast_ref::<MemoryStateSplitOperation>().is_some()
        || operation
            .downcast_ref::<LambdaEntryMemoryStateSplitOperation>()
            .is_some()
        || operation
            .downcast_ref::<LambdaExitMemoryStateMergeOperation>()
            .is_some()
        || operation
            .downcast_ref::<CallEntryMemoryStateMergeOperation>()
            .is_some()
        || operation
            .downcast_ref::<CallExitMemoryStateSplitOperation>()
            .is_some()
}

/// If every operand is an output of one split node of kind `S` and the
/// arities match, returns the split's input origin.
fn merged_split_input<S: Operation>(graph: &Graph, operands: &[Origin]) -> Option<Origin> {
    let first = graph.origin_node(operands[0])?;
    let split = graph.node(first).operation().downcast_ref::<S>()?;
    let _ = split;
    if graph.node(first).noutputs() != operands.len() {
        return None;
    }
    let mut seen = vec![false; operands.len()];
    for operand in operands {
        match operand {
            Origin::Output(node, index) if *node == first => {
                if seen[*index] {
                    return None;
                }
                seen[*index] = true;
            }
            _ => return None,
        }
    }
    Some(graph.node(first).input(0).origin())
}

/// Recognizes a load state output whose address and incoming state both
/// come straight from one alloca; returns the alloca's state output.
fn load_from_fresh_alloca(graph: &Graph, operand: Origin) -> Option<Origin> {
    let Origin::Output(load, index) = operand else {
        return None;
    };
    if index == 0 {
        return None;
    }
    graph.node(load).operation().downcast_ref::<LoadOperation>()?;
    let address = graph.node(load).input(0).origin();
    let Origin::Output(alloca, 0) = address else {
        return None;
    };
    graph
        .node(alloca)
        .operation()
        .downcast_ref::<AllocaOperation>()?;
    let state_in = graph.node(load).input(index).origin();
    if state_in != Origin::Output(alloca, 1) {
        return None;
    }
    Some(Origin::Output(alloca, 1))
}

// ---- creation helpers ------------------------------------------------------

pub fn undef(graph: &mut Graph, region: RegionId, ty: Type) -> Result<Origin> {
    let node = graph.add_simple_node(region, Box::new(UndefValueOperation::new(ty)), &[])?;
    Ok(Origin::Output(node, 0))
}

pub fn alloca(
    graph: &mut Graph,
    region: RegionId,
    value_type: Type,
    count: Origin,
    alignment: usize,
) -> Result<Vec<Origin>> {
    let op = AllocaOperation::new(value_type, alignment);
    let node = graph.add_simple_node(region, Box::new(op), &[count])?;
    Ok(graph.outputs(node))
}

pub fn malloc(graph: &mut Graph, region: RegionId, size: Origin) -> Result<Vec<Origin>> {
    let node = graph.add_simple_node(region, Box::new(MallocOperation), &[size])?;
    Ok(graph.outputs(node))
}

pub fn load(
    graph: &mut Graph,
    address: Origin,
    states: &[Origin],
    loaded_type: Type,
    alignment: usize,
) -> Result<Vec<Origin>> {
    let region = graph.origin_region(address);
    let op = LoadOperation::new(loaded_type, states.len(), alignment);
    let mut operands = vec![address];
    operands.extend_from_slice(states);
    let node = graph.add_simple_node(region, Box::new(op), &operands)?;
    Ok(graph.outputs(node))
}

pub fn store(
    graph: &mut Graph,
    address: Origin,
    value: Origin,
    states: &[Origin],
    alignment: usize,
) -> Result<Vec<Origin>> {
    let region = graph.origin_region(address);
    let stored_type = graph.origin_type(value);
    let op = StoreOperation::new(stored_type, states.len(), alignment);
    let mut operands = vec![address, value];
    operands.extend_from_slice(states);
    let node = graph.add_simple_node(region, Box::new(op), &operands)?;
    Ok(graph.outputs(node))
}

pub fn free(
    graph: &mut Graph,
    address: Origin,
    states: &[Origin],
    io: Origin,
) -> Result<Vec<Origin>> {
    let region = graph.origin_region(address);
    let op = FreeOperation::new(states.len());
    let mut operands = vec![address];
    operands.extend_from_slice(states);
    operands.push(io);
    let node = graph.add_simple_node(region, Box::new(op), &operands)?;
    Ok(graph.outputs(node))
}

pub fn memcpy(
    graph: &mut Graph,
    destination: Origin,
    source: Origin,
    length: Origin,
    states: &[Origin],
) -> Result<Vec<Origin>> {
    let region = graph.origin_region(destination);
    let op = MemCpyOperation::new(states.len());
    let mut operands = vec![destination, source, length];
    operands.extend_from_slice(states);
    let node = graph.add_simple_node(region, Box::new(op), &operands)?;
    Ok(graph.outputs(node))
}

pub fn call(graph: &mut Graph, callee: Origin, arguments: &[Origin]) -> Result<Vec<Origin>> {
    let region = graph.origin_region(callee);
    let function_type = graph.origin_type(callee);
    if !function_type.is_function() {
        bail!(StructuralError(format!(
            "call callee has non-function type {}",
            function_type
        )));
    }
    let op = CallOperation::new(function_type);
    let mut operands = vec![callee];
    operands.extend_from_slice(arguments);
    let node = graph.add_simple_node(region, Box::new(op), &operands)?;
    Ok(graph.outputs(node))
}

pub fn getelementptr(
    graph: &mut Graph,
    base: Origin,
    offsets: &[Origin],
) -> Result<Origin> {
    let region = graph.origin_region(base);
    let op = GetElementPtrOperation::new(offsets.len());
    let mut operands = vec![base];
    operands.extend_from_slice(offsets);
    let node = graph.add_simple_node(region, Box::new(op), &operands)?;
    Ok(Origin::Output(node, 0))
}

pub fn bits2ptr(graph: &mut Graph, operand: Origin, nbits: usize) -> Result<Origin> {
    let region = graph.origin_region(operand);
    let node =
        graph.add_simple_node(region, Box::new(Bits2PtrOperation::new(nbits)), &[operand])?;
    Ok(Origin::Output(node, 0))
}

pub fn ptr2bits(graph: &mut Graph, operand: Origin, nbits: usize) -> Result<Origin> {
    let region = graph.origin_region(operand);
    let node =
        graph.add_simple_node(region, Box::new(Ptr2BitsOperation::new(nbits)), &[operand])?;
    Ok(Origin::Output(node, 0))
}

pub fn select(
    graph: &mut Graph,
    predicate: Origin,
    on_true: Origin,
    on_false: Origin,
) -> Result<Origin> {
    let region = graph.origin_region(predicate);
    let ty = graph.origin_type(on_true);
    let node = graph.add_simple_node(
        region,
        Box::new(SelectOperation::new(ty)),
        &[predicate, on_true, on_false],
    )?;
    Ok(Origin::Output(node, 0))
}

pub fn memory_state_merge(
    graph: &mut Graph,
    region: RegionId,
    operands: &[Origin],
) -> Result<Origin> {
    let op = MemoryStateMergeOperation::new(operands.len());
    let node = graph.add_simple_node(region, Box::new(op), operands)?;
    Ok(Origin::Output(node, 0))
}

pub fn memory_state_split(
    graph: &mut Graph,
    region: RegionId,
    operand: Origin,
    nresults: usize,
) -> Result<Vec<Origin>> {
    let op = MemoryStateSplitOperation::new(nresults);
    let node = graph.add_simple_node(region, Box::new(op), &[operand])?;
    Ok(graph.outputs(node))
}

pub fn lambda_entry_memory_state_split(
    graph: &mut Graph,
    region: RegionId,
    operand: Origin,
    nresults: usize,
) -> Result<Vec<Origin>> {
    let op = LambdaEntryMemoryStateSplitOperation::new(nresults);
    let node = graph.add_simple_node(region, Box::new(op), &[operand])?;
    Ok(graph.outputs(node))
}

pub fn lambda_exit_memory_state_merge(
    graph: &mut Graph,
    region: RegionId,
    operands: &[Origin],
) -> Result<Origin> {
    let op = LambdaExitMemoryStateMergeOperation::new(operands.len());
    let node = graph.add_simple_node(region, Box::new(op), operands)?;
    Ok(Origin::Output(node, 0))
}

pub fn call_entry_memory_state_merge(
    graph: &mut Graph,
    region: RegionId,
    operands: &[Origin],
) -> Result<Origin> {
    let op = CallEntryMemoryStateMergeOperation::new(operands.len());
    let node = graph.add_simple_node(region, Box::new(op), operands)?;
    Ok(Origin::Output(node, 0))
}

pub fn call_exit_memory_state_split(
    graph: &mut Graph,
    region: RegionId,
    operand: Origin,
    nresults: usize,
) -> Result<Vec<Origin>> {
    let op = CallExitMemoryStateSplitOperation::new(nresults);
    let node = graph.add_simple_node(region, Box::new(op), &[operand])?;
    Ok(graph.outputs(node))
}

// ---- call and lambda state port lenses -------------------------------------

/// The memory-state input of a call node (always the final input).
pub fn call_memory_state_input(graph: &Graph, call: NodeId) -> User {
    let index = graph.node(call).ninputs() - 1;
    User::Input(call, index)
}

/// The memory-state output of a call node (always the final output).
pub fn call_memory_state_output(graph: &Graph, call: NodeId) -> Origin {
    let index = graph.node(call).noutputs() - 1;
    Origin::Output(call, index)
}

/// The memory-state argument of a lambda: its final function argument.
pub fn lambda_memory_state_argument(graph: &Graph, lambda: &LambdaNode) -> Result<Origin> {
    let arguments = lambda.function_arguments(graph);
    let last = arguments
        .last()
        .copied()
        .ok_or_else(|| StructuralError("lambda has no arguments".to_string()))?;
    if !graph.origin_type(last).is_memory_state() {
        bail!(StructuralError(
            "lambda lacks a trailing memory-state argument".to_string(),
        ));
    }
    Ok(last)
}

/// The memory-state result of a lambda: its final function result.
pub fn lambda_memory_state_result(graph: &Graph, lambda: &LambdaNode) -> Result<User> {
    let sub = lambda.subregion(graph);
    let results = lambda.function_results(graph);
    let last = results
        .last()
        .copied()
        .ok_or_else(|| StructuralError("lambda has no results".to_string()))?;
    if !graph.region(sub).result(last).ty().is_memory_state() {
        bail!(StructuralError(
            "lambda lacks a trailing memory-state result".to_string(),
        ));
    }
    Ok(User::Result(sub, last))
}

/// The I/O-state argument of a lambda: second-to-last function argument.
pub fn lambda_io_state_argument(graph: &Graph, lambda: &LambdaNode) -> Result<Origin> {
    let arguments = lambda.function_arguments(graph);
    if arguments.len() < 2 {
        bail!(StructuralError("lambda has no io-state argument".to_string()));
    }
    let origin = arguments[arguments.len() - 2];
    if !graph.origin_type(origin).is_io_state() {
        bail!(StructuralError(
            "lambda lacks an io-state argument".to_string(),
        ));
    }
    Ok(origin)
}
