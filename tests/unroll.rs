use rvsdg::dialects::bits::{
    bitadd, bitconstant, bitult, BitBinaryKind, BitBinaryOperation, BitConstantOperation,
};
use rvsdg::passes::{unroll_theta, DeadNodeElimination, LoopUnrolling, Transformation};
use rvsdg::{match_op, Graph, Origin, ThetaNode, ThetaOperation, Type, User};

fn count_thetas(graph: &Graph) -> usize {
    graph
        .live_nodes()
        .into_iter()
        .filter(|n| {
            graph
                .node(*n)
                .operation()
                .downcast_ref::<ThetaOperation>()
                .is_some()
        })
        .count()
}

fn count_adds_in(graph: &Graph, region: rvsdg::RegionId) -> usize {
    graph
        .region(region)
        .nodes()
        .iter()
        .filter(|n| {
            graph
                .node(**n)
                .operation()
                .downcast_ref::<BitBinaryOperation>()
                .map(|op| op.kind() == BitBinaryKind::Add)
                .unwrap_or(false)
        })
        .count()
}

/// for (i = 0; i < bound; i++), counting up by one.
fn counting_theta(graph: &mut Graph, bound: u64) -> (ThetaNode, Origin) {
    let root = graph.root();
    let init = bitconstant(graph, root, 32, 0).unwrap();
    let theta = ThetaNode::create(graph, root).unwrap();
    let lv = theta.add_loop_var(graph, init).unwrap();
    let sub = theta.subregion(graph);

    let step = bitconstant(graph, sub, 32, 1).unwrap();
    let next = bitadd(graph, lv.pre, step).unwrap();
    graph.divert(User::Result(sub, lv.post), next).unwrap();

    let end = bitconstant(graph, sub, 32, bound).unwrap();
    let cmp = bitult(graph, next, end).unwrap();
    let predicate = match_op(graph, sub, 1, vec![(1, 1)], 0, 2, cmp).unwrap();
    theta.set_predicate(graph, predicate).unwrap();

    (theta, Origin::Output(theta.node(), lv.output))
}

/// Unrolling by exactly the trip count leaves straight-line code and no
/// theta.
#[test]
fn full_unroll_eliminates_the_theta() {
    let mut graph = Graph::new();
    let (theta, output) = counting_theta(&mut graph, 4);
    graph.add_export(output, "i").unwrap();

    let changed = unroll_theta(&mut graph, theta, 4).unwrap();
    assert!(changed);
    assert_eq!(count_thetas(&graph), 0);

    graph.normalize().unwrap();
    DeadNodeElimination::default().run(&mut graph).unwrap();

    let result = graph.region(graph.root()).result(0).origin();
    let node = graph.origin_node(result).unwrap();
    let constant = graph
        .node(node)
        .operation()
        .downcast_ref::<BitConstantOperation>()
        .unwrap();
    assert_eq!(constant.value(), 4);
}

/// A factor dividing the trip count clones the body inside the theta.
#[test]
fn even_factor_unrolls_in_place() {
    let mut graph = Graph::new();
    let (theta, output) = counting_theta(&mut graph, 4);
    graph.add_export(output, "i").unwrap();

    let changed = unroll_theta(&mut graph, theta, 2).unwrap();
    assert!(changed);
    assert_eq!(count_thetas(&graph), 1);

    DeadNodeElimination::default().run(&mut graph).unwrap();
    let sub = theta.subregion(&graph);
    assert_eq!(count_adds_in(&graph, sub), 2);

    // the repeat predicate now comes from the last clone
    let predicate = theta.predicate_origin(&graph);
    let match_node = graph.origin_node(predicate).unwrap();
    let selector = graph.node(match_node).input(0).origin();
    let cmp = graph.origin_node(selector).unwrap();
    let compared = graph.node(cmp).input(0).origin();
    let last_add = graph.origin_node(compared).unwrap();
    let first_operand = graph.node(last_add).input(0).origin();
    assert!(graph.origin_node(first_operand).is_some());
}

/// A remainder peels straight-line copies in front of the loop.
#[test]
fn remainder_becomes_a_prologue() {
    let mut graph = Graph::new();
    let (theta, output) = counting_theta(&mut graph, 5);
    graph.add_export(output, "i").unwrap();

    // 5 iterations, factor 2: one peeled, four in the loop
    let changed = unroll_theta(&mut graph, theta, 2).unwrap();
    assert!(changed);
    assert_eq!(count_thetas(&graph), 1);

    // the prologue left one add in the root region
    DeadNodeElimination::default().run(&mut graph).unwrap();
    assert_eq!(count_adds_in(&graph, graph.root()), 1);

    graph.normalize().unwrap();
    assert_eq!(count_thetas(&graph), 1);
}

/// An unknown bound blocks unrolling entirely.
#[test]
fn unknown_bounds_are_left_alone() {
    let mut graph = Graph::new();
    let root = graph.root();
    let init = bitconstant(&mut graph, root, 32, 0).unwrap();
    let bound = graph.add_import(Type::bit(32), "n");

    let theta = ThetaNode::create(&mut graph, root).unwrap();
    let lv = theta.add_loop_var(&mut graph, init).unwrap();
    let lb = theta.add_loop_var(&mut graph, bound).unwrap();
    let sub = theta.subregion(&graph);

    let step = bitconstant(&mut graph, sub, 32, 1).unwrap();
    let next = bitadd(&mut graph, lv.pre, step).unwrap();
    graph.divert(User::Result(sub, lv.post), next).unwrap();
    let cmp = bitult(&mut graph, next, lb.pre).unwrap();
    let predicate = match_op(&mut graph, sub, 1, vec![(1, 1)], 0, 2, cmp).unwrap();
    theta.set_predicate(&mut graph, predicate).unwrap();
    graph
        .add_export(Origin::Output(theta.node(), lv.output), "i")
        .unwrap();

    let changed = unroll_theta(&mut graph, theta, 2).unwrap();
    assert!(!changed);
    assert_eq!(count_thetas(&graph), 1);
}

/// The whole-graph pass unrolls innermost loops.
#[test]
fn pass_drives_innermost_loops() {
    let mut graph = Graph::new();
    let (_, output) = counting_theta(&mut graph, 6);
    graph.add_export(output, "i").unwrap();

    LoopUnrolling::new(3).run(&mut graph).unwrap();
    graph.normalize().unwrap();
    DeadNodeElimination::default().run(&mut graph).unwrap();

    // 6 iterations unrolled by 3 leave a theta with three body copies
    assert_eq!(count_thetas(&graph), 1);
}
