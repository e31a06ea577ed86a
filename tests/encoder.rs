use rvsdg::analyses::{AgnosticModRefSummarizer, MemoryStateEncoder, ModRefSummary, Steensgaard};
use rvsdg::dialects::bits::bitconstant;
use rvsdg::dialects::mem::{
    alloca, call, load, store, AllocaOperation, CallEntryMemoryStateMergeOperation,
    CallExitMemoryStateSplitOperation, LambdaEntryMemoryStateSplitOperation,
    LambdaExitMemoryStateMergeOperation, LoadOperation, MemoryStateMergeOperation,
    MemoryStateSplitOperation, StoreOperation,
};
use rvsdg::{Graph, LambdaNode, Linkage, NodeId, Origin, Type};

fn state_fn() -> Type {
    Type::function(
        vec![Type::io_state(), Type::memory_state()],
        vec![Type::bit(32), Type::io_state(), Type::memory_state()],
    )
}

fn find_op<T: rvsdg::Operation>(graph: &Graph) -> Vec<NodeId> {
    graph
        .live_nodes()
        .into_iter()
        .filter(|n| graph.node(*n).operation().downcast_ref::<T>().is_some())
        .collect()
}

fn build_local_store_load(graph: &mut Graph) -> LambdaNode {
    let root = graph.root();
    let f = LambdaNode::create(graph, root, state_fn(), "f", Linkage::External).unwrap();
    let sub = f.subregion(graph);
    let args = f.function_arguments(graph);
    let io = args[0];

    let count = bitconstant(graph, sub, 32, 1).unwrap();
    let slot = alloca(graph, sub, Type::bit(32), count, 4).unwrap();
    let value = bitconstant(graph, sub, 32, 42).unwrap();
    let stored = store(graph, slot[0], value, &[slot[1]], 4).unwrap();
    let loaded = load(graph, slot[0], &[stored[0]], Type::bit(32), 4).unwrap();
    f.finalize(graph, &[loaded[0], io, loaded[1]]).unwrap();
    let output = f.output(graph);
    graph.add_export(output, "f").unwrap();
    f
}

/// After encoding, the store reads the alloca state, the load reads the
/// store state, and the lambda exit merges every per-memory-node edge.
#[test]
fn store_load_chain_is_threaded_per_memory_node() {
    let mut graph = Graph::new();
    let f = build_local_store_load(&mut graph);

    let points_to = Steensgaard::analyze(&graph).unwrap();
    let summary = AgnosticModRefSummarizer::create(points_to);
    MemoryStateEncoder::encode(&mut graph, &summary).unwrap();

    let allocas = find_op::<AllocaOperation>(&graph);
    assert_eq!(allocas.len(), 1);
    let alloca_state = Origin::Output(allocas[0], 1);

    // one store and one load survived; their state edges chain through
    // the alloca
    let stores = find_op::<StoreOperation>(&graph);
    assert_eq!(stores.len(), 1);
    let store_node = stores[0];
    assert_eq!(graph.node(store_node).ninputs(), 3);
    assert_eq!(graph.node(store_node).input(2).origin(), alloca_state);

    let loads = find_op::<LoadOperation>(&graph);
    assert_eq!(loads.len(), 1);
    let load_node = loads[0];
    assert_eq!(graph.node(load_node).ninputs(), 2);
    assert_eq!(
        graph.node(load_node).input(1).origin(),
        Origin::Output(store_node, 0)
    );

    // property 10a: the state count equals the summarizer's set for the
    // address
    let address = graph.node(load_node).input(0).origin();
    assert_eq!(
        graph.node(load_node).ninputs() - 1,
        summary.output_nodes(address).len()
    );

    // the lambda entry splits, the exit merges
    assert_eq!(find_op::<LambdaEntryMemoryStateSplitOperation>(&graph).len(), 1);
    let exits = find_op::<LambdaExitMemoryStateMergeOperation>(&graph);
    assert_eq!(exits.len(), 1);
    let sub = f.subregion(&graph);
    let state_result = graph.region(sub).results().iter().last().unwrap();
    assert_eq!(
        graph.origin_node(state_result.origin()),
        Some(exits[0])
    );
}

/// Property 11: no split(merge) or merge(split) with matching arity, and
/// no trivial merges or splits, survive normalization.
#[test]
fn encoding_then_normalizing_leaves_no_fusable_state_routing() {
    let mut graph = Graph::new();
    build_local_store_load(&mut graph);

    let points_to = Steensgaard::analyze(&graph).unwrap();
    let summary = AgnosticModRefSummarizer::create(points_to);
    MemoryStateEncoder::encode(&mut graph, &summary).unwrap();
    graph.normalize().unwrap();

    for node in find_op::<MemoryStateMergeOperation>(&graph) {
        assert!(graph.node(node).ninputs() > 1);
        // no operand set covering a whole split of matching arity
        let first = graph.node(node).input(0).origin();
        if let Some(producer) = graph.origin_node(first) {
            if graph
                .node(producer)
                .operation()
                .downcast_ref::<MemoryStateSplitOperation>()
                .is_some()
            {
                assert_ne!(
                    graph.node(producer).noutputs(),
                    graph.node(node).ninputs()
                );
            }
        }
    }
    for node in find_op::<MemoryStateSplitOperation>(&graph) {
        assert!(graph.node(node).noutputs() > 1);
        let operand = graph.node(node).input(0).origin();
        if let Some(producer) = graph.origin_node(operand) {
            if graph
                .node(producer)
                .operation()
                .downcast_ref::<MemoryStateMergeOperation>()
                .is_some()
            {
                assert_ne!(
                    graph.node(producer).ninputs(),
                    graph.node(node).noutputs()
                );
            }
        }
    }
}

/// Property 10b: every call is bracketed by a CallEntryMemoryStateMerge
/// of the call-entry set and a CallExitMemoryStateSplit of the call-exit
/// set.
#[test]
fn calls_are_bracketed_by_state_merge_and_split() {
    let mut graph = Graph::new();
    let root = graph.root();

    let callee_ty = Type::function(
        vec![Type::io_state(), Type::memory_state()],
        vec![Type::io_state(), Type::memory_state()],
    );
    let callee =
        LambdaNode::create(&mut graph, root, callee_ty, "callee", Linkage::Internal).unwrap();
    let callee_args = callee.function_arguments(&graph);
    callee
        .finalize(&mut graph, &[callee_args[0], callee_args[1]])
        .unwrap();

    let caller_ty = Type::function(
        vec![Type::io_state(), Type::memory_state()],
        vec![Type::io_state(), Type::memory_state()],
    );
    let caller =
        LambdaNode::create(&mut graph, root, caller_ty, "caller", Linkage::External).unwrap();
    let callee_output = callee.output(&graph);
    let cv = caller
        .add_context_var(&mut graph, callee_output)
        .unwrap();
    let caller_args = caller.function_arguments(&graph);
    let outputs = call(&mut graph, cv.inner, &[caller_args[0], caller_args[1]]).unwrap();
    caller
        .finalize(&mut graph, &[outputs[0], outputs[1]])
        .unwrap();
    graph.add_export(caller.output(&graph), "caller").unwrap();

    let points_to = Steensgaard::analyze(&graph).unwrap();
    let summary = AgnosticModRefSummarizer::create(points_to);
    let full_set = summary.points_to_graph().memory_node_ids().len();
    MemoryStateEncoder::encode(&mut graph, &summary).unwrap();

    let calls = find_op::<rvsdg::dialects::mem::CallOperation>(&graph);
    assert_eq!(calls.len(), 1);
    let call_node = calls[0];

    let state_in = graph
        .node(call_node)
        .input(graph.node(call_node).ninputs() - 1)
        .origin();
    let merge = graph.origin_node(state_in).unwrap();
    assert!(graph
        .node(merge)
        .operation()
        .downcast_ref::<CallEntryMemoryStateMergeOperation>()
        .is_some());
    assert_eq!(graph.node(merge).ninputs(), full_set);

    let state_out = Origin::Output(call_node, graph.node(call_node).noutputs() - 1);
    let users = graph.users(state_out);
    assert_eq!(users.len(), 1);
    let rvsdg::User::Input(split, _) = users[0] else {
        panic!("call state output must feed the exit split");
    };
    assert!(graph
        .node(split)
        .operation()
        .downcast_ref::<CallExitMemoryStateSplitOperation>()
        .is_some());
    assert_eq!(graph.node(split).noutputs(), full_set);
}
