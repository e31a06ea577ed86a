#![cfg(feature = "hls")]

use rvsdg::hls::{GammaToMux, LoopNode, MuxOperation};
use rvsdg::passes::Transformation;
use rvsdg::{match_op, ArgumentKind, GammaNode, GammaOperation, Graph, ResultKind, Type};

#[test]
fn loop_node_wires_mux_branch_and_buffer() {
    let mut graph = Graph::new();
    let root = graph.root();
    let value = graph.add_import(Type::bit(32), "v");

    let loop_node = LoopNode::create(&mut graph, root).unwrap();
    assert!(loop_node.predicate_buffer(&graph).is_ok());

    let (in_loop, out) = loop_node.add_loop_var(&mut graph, value).unwrap();
    let sub = loop_node.subregion(&graph);

    // the in-loop value is a mux over entry and back-edge
    let mux = graph.origin_node(in_loop).unwrap();
    assert!(graph
        .node(mux)
        .operation()
        .downcast_ref::<MuxOperation>()
        .is_some());

    // the loop variable produced a fresh back-edge pair
    let backedges = graph
        .region(sub)
        .arguments()
        .iter()
        .filter(|a| matches!(a.kind(), ArgumentKind::BackEdge { .. }))
        .count();
    assert_eq!(backedges, 2); // predicate + loop variable

    // the exit side reaches the structural output
    let rvsdg::Origin::Output(_, output_index) = out else {
        panic!("loop var must yield a structural output");
    };
    let exit_results = graph
        .region(sub)
        .results()
        .iter()
        .filter(|r| matches!(r.kind(), ResultKind::Exit { output } if *output == output_index))
        .count();
    assert_eq!(exit_results, 1);
}

#[test]
fn routing_only_gammas_become_muxes() {
    let mut graph = Graph::new();
    let root = graph.root();
    let x = graph.add_import(Type::bit(32), "x");
    let a = graph.add_import(Type::bit(32), "a");
    let b = graph.add_import(Type::bit(32), "b");

    let predicate = match_op(&mut graph, root, 32, vec![(0, 0)], 1, 2, x).unwrap();
    let gamma = GammaNode::create(&mut graph, predicate).unwrap();
    let ev_a = gamma.add_entry_var(&mut graph, a).unwrap();
    let ev_b = gamma.add_entry_var(&mut graph, b).unwrap();
    let xv = gamma
        .add_exit_var(
            &mut graph,
            &[ev_a.branch_arguments[0], ev_b.branch_arguments[1]],
        )
        .unwrap();
    graph.add_export(xv.output, "out").unwrap();

    GammaToMux::default().run(&mut graph).unwrap();

    // the gamma is gone; a mux over (predicate, a, b) replaced it
    let gammas = graph
        .live_nodes()
        .into_iter()
        .filter(|n| {
            graph
                .node(*n)
                .operation()
                .downcast_ref::<GammaOperation>()
                .is_some()
        })
        .count();
    assert_eq!(gammas, 0);

    let out = graph.region(root).result(0).origin();
    let mux = graph.origin_node(out).unwrap();
    assert!(graph
        .node(mux)
        .operation()
        .downcast_ref::<MuxOperation>()
        .is_some());
    assert_eq!(graph.operands(mux), vec![predicate, a, b]);
}

#[test]
fn gammas_with_bodies_are_left_alone() {
    let mut graph = Graph::new();
    let root = graph.root();
    let x = graph.add_import(Type::bit(32), "x");
    let a = graph.add_import(Type::bit(32), "a");

    let predicate = match_op(&mut graph, root, 32, vec![(0, 0)], 1, 2, x).unwrap();
    let gamma = GammaNode::create(&mut graph, predicate).unwrap();
    let ev = gamma.add_entry_var(&mut graph, a).unwrap();

    // branch 0 computes something, so the gamma must stay
    let sub0 = gamma.subregion(&graph, 0);
    let one = rvsdg::dialects::bits::bitconstant(&mut graph, sub0, 32, 1).unwrap();
    let sum =
        rvsdg::dialects::bits::bitadd(&mut graph, ev.branch_arguments[0], one).unwrap();
    let xv = gamma
        .add_exit_var(&mut graph, &[sum, ev.branch_arguments[1]])
        .unwrap();
    graph.add_export(xv.output, "out").unwrap();

    GammaToMux::default().run(&mut graph).unwrap();
    assert!(graph.is_alive(gamma.node()));
}
