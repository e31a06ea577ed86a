use rvsdg::analyses::{MemoryNodeKind, Steensgaard};
use rvsdg::dialects::bits::bitconstant;
use rvsdg::dialects::mem::{alloca, bits2ptr, load, store};
use rvsdg::{Graph, LambdaNode, Linkage, Type};

fn state_fn() -> Type {
    Type::function(
        vec![Type::io_state(), Type::memory_state()],
        vec![Type::bit(32), Type::io_state(), Type::memory_state()],
    )
}

/// A function allocating a bit-32 slot, storing 42 and loading it back:
/// the stack pointer register points to exactly the alloca memory node.
#[test]
fn local_alloca_points_to_itself_only() {
    let mut graph = Graph::new();
    let root = graph.root();

    let f = LambdaNode::create(&mut graph, root, state_fn(), "f", Linkage::Internal).unwrap();
    let sub = f.subregion(&graph);
    let args = f.function_arguments(&graph);
    let io = args[0];

    let count = bitconstant(&mut graph, sub, 32, 1).unwrap();
    let slot = alloca(&mut graph, sub, Type::bit(32), count, 4).unwrap();
    let value = bitconstant(&mut graph, sub, 32, 42).unwrap();
    let stored = store(&mut graph, slot[0], value, &[slot[1]], 4).unwrap();
    let loaded = load(&mut graph, slot[0], &[stored[0]], Type::bit(32), 4).unwrap();
    f.finalize(&mut graph, &[loaded[0], io, loaded[1]]).unwrap();

    let points_to = Steensgaard::analyze(&graph).unwrap();

    let alloca_node = graph.origin_node(slot[0]).unwrap();
    let memory_node = points_to.alloca_node(alloca_node).unwrap();
    assert!(matches!(
        points_to.kind(memory_node),
        MemoryNodeKind::Alloca(n) if *n == alloca_node
    ));

    let register = points_to.register_targets(slot[0]).unwrap();
    assert!(!register.unknown);
    assert_eq!(register.targets.len(), 1);
    assert!(register.targets.contains(&memory_node));
}

/// Storing a pointer into a slot and loading it back reports the stored
/// pointer's target.
#[test]
fn loaded_pointers_reach_the_stored_target() {
    let mut graph = Graph::new();
    let root = graph.root();

    let f = LambdaNode::create(&mut graph, root, state_fn(), "f", Linkage::Internal).unwrap();
    let sub = f.subregion(&graph);
    let args = f.function_arguments(&graph);
    let io = args[0];

    let count = bitconstant(&mut graph, sub, 32, 1).unwrap();
    // q: a data slot; p: a slot holding a pointer
    let q = alloca(&mut graph, sub, Type::bit(32), count, 4).unwrap();
    let p = alloca(&mut graph, sub, Type::pointer(), count, 8).unwrap();

    let stored = store(&mut graph, p[0], q[0], &[p[1]], 8).unwrap();
    let loaded = load(&mut graph, p[0], &[stored[0]], Type::pointer(), 8).unwrap();
    let through = load(&mut graph, loaded[0], &[q[1]], Type::bit(32), 4).unwrap();
    f.finalize(&mut graph, &[through[0], io, through[1]])
        .unwrap();

    let points_to = Steensgaard::analyze(&graph).unwrap();

    let q_node = points_to
        .alloca_node(graph.origin_node(q[0]).unwrap())
        .unwrap();
    let r = points_to.register_targets(loaded[0]).unwrap();
    assert!(r.targets.contains(&q_node));
}

/// Integer-to-pointer conversions may point anywhere.
#[test]
fn bits2ptr_is_unknown() {
    let mut graph = Graph::new();
    let root = graph.root();

    let f = LambdaNode::create(&mut graph, root, state_fn(), "f", Linkage::Internal).unwrap();
    let sub = f.subregion(&graph);
    let args = f.function_arguments(&graph);
    let io = args[0];

    let raw = bitconstant(&mut graph, sub, 64, 0xdead).unwrap();
    let p = bits2ptr(&mut graph, raw, 64).unwrap();
    let loaded = load(&mut graph, p, &[], Type::bit(32), 4).unwrap();
    f.finalize(&mut graph, &[loaded[0], io, args[1]]).unwrap();

    let points_to = Steensgaard::analyze(&graph).unwrap();
    let register = points_to.register_targets(p).unwrap();
    assert!(register.unknown);

    // unknown registers reach the external sentinel
    let nodes = points_to.output_nodes(p);
    assert!(nodes.contains(&points_to.external_node()));
}

/// Pointer imports are abstract objects of unknown provenance.
#[test]
fn imports_escape() {
    let mut graph = Graph::new();
    let p = graph.add_import(Type::pointer(), "p");
    graph.add_export(p, "p").unwrap();

    let points_to = Steensgaard::analyze(&graph).unwrap();
    let register = points_to.register_targets(p).unwrap();
    assert!(register.unknown);
    assert_eq!(register.targets.len(), 1);

    let import = points_to.import_node(0).unwrap();
    assert!(points_to.escaped().contains(&import));
}
