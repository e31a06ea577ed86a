use rvsdg::dialects::bits::{
    bitadd, bitconstant, bitmul, BitBinaryKind, BitBinaryOperation, BitConstantOperation,
};
use rvsdg::dialects::mem::{
    memory_state_merge, memory_state_split, MemoryStateMergeOperation, MemoryStateSplitOperation,
};
use rvsdg::{expand_flattened, FlattenMode, FlattenedBinaryOperation, Graph, NodeId, Type};

fn count_ops<T: rvsdg::Operation>(graph: &Graph) -> usize {
    graph
        .live_nodes()
        .into_iter()
        .filter(|n| graph.node(*n).operation().downcast_ref::<T>().is_some())
        .count()
}

#[test]
fn constant_fold_and_identity_elim() {
    // add(mul(3, 0), x) collapses to x with no remaining internals
    let mut graph = Graph::new();
    let root = graph.root();
    let x = graph.add_import(Type::bit(32), "x");

    let three = bitconstant(&mut graph, root, 32, 3).unwrap();
    let zero = bitconstant(&mut graph, root, 32, 0).unwrap();
    let product = bitmul(&mut graph, three, zero).unwrap();
    assert_eq!(product, zero);

    let sum = bitadd(&mut graph, product, x).unwrap();
    assert_eq!(sum, x);
    graph.add_export(sum, "result").unwrap();

    graph.prune_region(root, true);
    assert_eq!(graph.region(root).nnodes(), 0);
}

#[test]
fn cse_merges_congruent_nodes() {
    let mut graph = Graph::new();
    let root = graph.root();
    let x = graph.add_import(Type::bit(32), "x");
    let y = graph.add_import(Type::bit(32), "y");

    let op = || Box::new(BitBinaryOperation::new(BitBinaryKind::Add, 32));
    let a = graph.add_simple_node(root, op(), &[x, y]).unwrap();
    let b = graph.add_simple_node(root, op(), &[x, y]).unwrap();
    graph.add_export(rvsdg::Origin::Output(a, 0), "a").unwrap();
    graph.add_export(rvsdg::Origin::Output(b, 0), "b").unwrap();

    graph.normalize().unwrap();

    // one add remains and both exports read it
    assert_eq!(count_ops::<BitBinaryOperation>(&graph), 1);
    let exports: Vec<_> = graph
        .region(root)
        .results()
        .iter()
        .map(|r| r.origin())
        .collect();
    assert_eq!(exports[0], exports[1]);
}

#[test]
fn normalization_is_a_fixed_point() {
    let mut graph = Graph::new();
    let root = graph.root();
    let x = graph.add_import(Type::bit(32), "x");
    let c = bitconstant(&mut graph, root, 32, 0).unwrap();
    let sum = graph
        .add_simple_node(
            root,
            Box::new(BitBinaryOperation::new(BitBinaryKind::Add, 32)),
            &[x, c],
        )
        .unwrap();
    graph
        .add_export(rvsdg::Origin::Output(sum, 0), "sum")
        .unwrap();

    graph.normalize().unwrap();
    assert!(!graph.is_denormalized());
    let count = graph.live_nodes().len();

    graph.normalize().unwrap();
    assert_eq!(graph.live_nodes().len(), count);

    // the neutral element was eliminated
    assert_eq!(graph.region(root).result(0).origin(), x);
}

#[test]
fn binary_flattening_round_trip() {
    let mut graph = Graph::new();
    let root = graph.root();
    let a = graph.add_import(Type::bit(32), "a");
    let b = graph.add_import(Type::bit(32), "b");
    let c = graph.add_import(Type::bit(32), "c");
    let d = graph.add_import(Type::bit(32), "d");

    let ab = bitadd(&mut graph, a, b).unwrap();
    let cd = bitadd(&mut graph, c, d).unwrap();
    let top = bitadd(&mut graph, ab, cd).unwrap();
    graph.add_export(top, "sum").unwrap();

    graph.normalize().unwrap();

    // a single flattened 4-ary application remains
    let flattened: Vec<NodeId> = graph
        .live_nodes()
        .into_iter()
        .filter(|n| {
            graph
                .node(*n)
                .operation()
                .downcast_ref::<FlattenedBinaryOperation>()
                .is_some()
        })
        .collect();
    assert_eq!(flattened.len(), 1);
    assert_eq!(graph.operands(flattened[0]), vec![a, b, c, d]);

    // re-serialize into a linear tree of three applications
    expand_flattened(&mut graph, root, FlattenMode::Linear).unwrap();
    graph.prune_region(root, true);
    assert_eq!(count_ops::<FlattenedBinaryOperation>(&graph), 0);
    assert_eq!(count_ops::<BitBinaryOperation>(&graph), 3);
}

#[test]
fn parallel_expansion_balances_the_tree() {
    let mut graph = Graph::new();
    let root = graph.root();
    let imports: Vec<_> = (0..4)
        .map(|i| graph.add_import(Type::bit(32), &format!("i{}", i)))
        .collect();

    let mut acc = imports[0];
    for value in &imports[1..] {
        acc = bitadd(&mut graph, acc, *value).unwrap();
    }
    graph.add_export(acc, "sum").unwrap();

    graph.normalize().unwrap();
    expand_flattened(&mut graph, root, FlattenMode::Parallel).unwrap();
    graph.prune_region(root, true);

    assert_eq!(count_ops::<BitBinaryOperation>(&graph), 3);
    // the export is the root of a two-level tree
    let top = graph.origin_node(graph.region(root).result(0).origin()).unwrap();
    assert_eq!(graph.node(top).depth(), 1);
}

#[test]
fn state_split_merge_fusion() {
    let mut graph = Graph::new();
    let root = graph.root();
    let state = graph.add_import(Type::memory_state(), "s");

    // merge(split(x)) with matching arity collapses to x
    let parts = memory_state_split(&mut graph, root, state, 3).unwrap();
    let merged = memory_state_merge(&mut graph, root, &parts).unwrap();
    graph.add_export(merged, "m").unwrap();

    graph.normalize().unwrap();
    graph.prune_region(root, true);
    assert_eq!(graph.region(root).result(0).origin(), state);
    assert_eq!(count_ops::<MemoryStateSplitOperation>(&graph), 0);
    assert_eq!(count_ops::<MemoryStateMergeOperation>(&graph), 0);
}

#[test]
fn split_of_merge_pairs_off() {
    let mut graph = Graph::new();
    let root = graph.root();
    let s0 = graph.add_import(Type::memory_state(), "s0");
    let s1 = graph.add_import(Type::memory_state(), "s1");

    let merged = memory_state_merge(&mut graph, root, &[s0, s1]).unwrap();
    let parts = memory_state_split(&mut graph, root, merged, 2).unwrap();
    graph.add_export(parts[0], "p0").unwrap();
    graph.add_export(parts[1], "p1").unwrap();

    graph.normalize().unwrap();
    graph.prune_region(root, true);
    assert_eq!(graph.region(root).result(0).origin(), s0);
    assert_eq!(graph.region(root).result(1).origin(), s1);
}

#[test]
fn merge_deduplicates_and_unwraps() {
    let mut graph = Graph::new();
    let root = graph.root();
    let s0 = graph.add_import(Type::memory_state(), "s0");
    let s1 = graph.add_import(Type::memory_state(), "s1");

    // merge(a, a, b) => merge(a, b)
    let merged = memory_state_merge(&mut graph, root, &[s0, s0, s1]).unwrap();
    graph.add_export(merged, "m").unwrap();
    graph.normalize().unwrap();
    graph.prune_region(root, true);

    let node = graph
        .origin_node(graph.region(root).result(0).origin())
        .unwrap();
    let merge = graph
        .node(node)
        .operation()
        .downcast_ref::<MemoryStateMergeOperation>()
        .unwrap();
    assert_eq!(merge.noperands(), 2);

    // merge(x) is the identity
    let mut graph = Graph::new();
    let root = graph.root();
    let s = graph.add_import(Type::memory_state(), "s");
    let merged = memory_state_merge(&mut graph, root, &[s]).unwrap();
    graph.add_export(merged, "m").unwrap();
    graph.normalize().unwrap();
    graph.prune_region(root, true);
    assert_eq!(graph.region(root).result(0).origin(), s);
}

#[test]
fn cse_can_be_disabled_per_kind() {
    let mut graph = Graph::new();
    let root = graph.root();
    graph.set_cse::<BitConstantOperation>(false);

    let a = bitconstant(&mut graph, root, 32, 9).unwrap();
    let b = bitconstant(&mut graph, root, 32, 9).unwrap();
    assert_ne!(a, b);

    graph.add_export(a, "a").unwrap();
    graph.add_export(b, "b").unwrap();
}
