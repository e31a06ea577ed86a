use rvsdg::dialects::bits::{bitadd, bitconstant, bitult};
use rvsdg::{match_op, Graph, ResultKind, ThetaNode, ThetaOperation, Type, User};

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

#[test]
fn loop_variable_quadruples() {
    let mut graph = Graph::new();
    let root = graph.root();
    let init = graph.add_import(Type::bit(32), "init");

    let theta = ThetaNode::create(&mut graph, root).unwrap();
    let lv = theta.add_loop_var(&mut graph, init).unwrap();
    let sub = theta.subregion(&graph);

    // the post-result initially reads the pre-argument
    assert!(theta.is_invariant(&graph, &lv));
    assert_eq!(graph.region(sub).result(lv.post).origin(), lv.pre);

    // the predicate stays the final result as variables are added
    let other = theta.add_loop_var(&mut graph, init).unwrap();
    let last = graph.region(sub).nresults() - 1;
    assert!(matches!(
        graph.region(sub).result(last).kind(),
        ResultKind::Predicate
    ));
    assert_eq!(theta.loop_vars(&graph).len(), 2);
    let _ = other;
}

#[test]
fn set_predicate_replaces_the_initial_constant() {
    let mut graph = Graph::new();
    let root = graph.root();
    let init = graph.add_import(Type::bit(32), "init");

    let theta = ThetaNode::create(&mut graph, root).unwrap();
    let lv = theta.add_loop_var(&mut graph, init).unwrap();
    let sub = theta.subregion(&graph);
    let nodes_before = graph.region(sub).nnodes();

    let bound = bitconstant(&mut graph, sub, 32, 10).unwrap();
    let cmp = bitult(&mut graph, lv.pre, bound).unwrap();
    let predicate = match_op(&mut graph, sub, 1, vec![(1, 1)], 0, 2, cmp).unwrap();
    theta.set_predicate(&mut graph, predicate).unwrap();

    assert_eq!(theta.predicate_origin(&graph), predicate);
    // the initial exit-immediately constant was pruned
    assert_eq!(graph.region(sub).nnodes(), nodes_before + 2);
}

#[test]
fn invariant_loop_variables_are_eliminated() {
    let mut graph = Graph::new();
    let root = graph.root();
    let v = graph.add_import(Type::bit(32), "v");

    let theta = ThetaNode::create(&mut graph, root).unwrap();
    let lv = theta.add_loop_var(&mut graph, v).unwrap();
    graph
        .add_export(rvsdg::Origin::Output(theta.node(), lv.output), "out")
        .unwrap();

    graph.normalize().unwrap();

    // downstream uses were rewired to the loop variable's input origin
    assert_eq!(graph.region(root).result(0).origin(), v);
    // and the loop variable quadruple is gone
    assert_eq!(theta.loop_vars(&graph).len(), 0);
    assert_eq!(count_thetas(&graph), 1);
}

#[test]
fn loop_carried_variables_survive_normalization() {
    let mut graph = Graph::new();
    let root = graph.root();
    let init = graph.add_import(Type::bit(32), "init");

    let theta = ThetaNode::create(&mut graph, root).unwrap();
    let lv = theta.add_loop_var(&mut graph, init).unwrap();
    let sub = theta.subregion(&graph);

    let step = bitconstant(&mut graph, sub, 32, 1).unwrap();
    let next = bitadd(&mut graph, lv.pre, step).unwrap();
    graph.divert(User::Result(sub, lv.post), next).unwrap();
    graph
        .add_export(rvsdg::Origin::Output(theta.node(), lv.output), "out")
        .unwrap();

    graph.normalize().unwrap();
    assert_eq!(theta.loop_vars(&graph).len(), 1);
    assert!(!theta.is_invariant(&graph, &theta.loop_vars(&graph)[0]));
}
