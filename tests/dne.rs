use rvsdg::dialects::bits::{bitadd, bitconstant};
use rvsdg::passes::{DeadNodeElimination, Transformation};
use rvsdg::{GammaNode, Graph, LambdaNode, Linkage, Origin, ThetaNode, Type};

#[test]
fn removes_dead_chains_to_a_fixed_point() {
    let mut graph = Graph::new();
    let root = graph.root();
    let x = graph.add_import(Type::bit(32), "x");

    // dead chain: c -> a -> b, nothing exported
    let c = bitconstant(&mut graph, root, 32, 1).unwrap();
    let a = bitadd(&mut graph, c, x).unwrap();
    let b = bitadd(&mut graph, a, x).unwrap();
    let _ = b;

    let live = bitadd(&mut graph, x, x).unwrap();
    graph.add_export(live, "live").unwrap();

    DeadNodeElimination::default().run(&mut graph).unwrap();
    assert_eq!(graph.region(root).nnodes(), 1);

    // idempotent: a second run removes nothing
    let count = graph.live_nodes().len();
    DeadNodeElimination::default().run(&mut graph).unwrap();
    assert_eq!(graph.live_nodes().len(), count);
}

#[test]
fn prunes_gamma_variables_before_the_node() {
    let mut graph = Graph::new();
    let root = graph.root();
    let pred = graph.add_import(Type::control(2), "p");
    let x = graph.add_import(Type::bit(32), "x");
    let y = graph.add_import(Type::bit(32), "y");

    let gamma = GammaNode::create(&mut graph, pred).unwrap();
    let used = gamma.add_entry_var(&mut graph, x).unwrap();
    let unused = gamma.add_entry_var(&mut graph, y).unwrap();
    let _ = unused;
    let xv = gamma
        .add_exit_var(&mut graph, &used.branch_arguments.clone())
        .unwrap();
    // a second exit variable nobody reads
    let dead_xv = gamma
        .add_exit_var(&mut graph, &used.branch_arguments.clone())
        .unwrap();
    let _ = dead_xv;
    graph.add_export(xv.output, "out").unwrap();

    DeadNodeElimination::default().run(&mut graph).unwrap();

    assert_eq!(gamma.entry_vars(&graph).len(), 1);
    assert_eq!(gamma.exit_vars(&graph).len(), 1);
    assert_eq!(graph.nusers(y), 0);
}

#[test]
fn prunes_dead_thetas_and_lambdas() {
    let mut graph = Graph::new();
    let root = graph.root();
    let v = graph.add_import(Type::bit(32), "v");

    // a theta whose only loop variable is invariant and unread
    let theta = ThetaNode::create(&mut graph, root).unwrap();
    theta.add_loop_var(&mut graph, v).unwrap();

    // a lambda nobody references, capturing v
    let fn_ty = Type::function(vec![Type::bit(32)], vec![Type::bit(32)]);
    let lambda = LambdaNode::create(&mut graph, root, fn_ty, "dead", Linkage::Internal).unwrap();
    let cv = lambda.add_context_var(&mut graph, v).unwrap();
    let _ = cv;
    let arg = lambda.function_arguments(&graph)[0];
    lambda.finalize(&mut graph, &[arg]).unwrap();

    DeadNodeElimination::default().run(&mut graph).unwrap();

    assert!(!graph.is_alive(theta.node()));
    assert!(!graph.is_alive(lambda.node()));
    assert_eq!(graph.nusers(v), 0);
}

#[test]
fn keeps_exported_structural_nodes() {
    let mut graph = Graph::new();
    let root = graph.root();
    let fn_ty = Type::function(vec![Type::bit(32)], vec![Type::bit(32)]);
    let lambda = LambdaNode::create(&mut graph, root, fn_ty, "kept", Linkage::External).unwrap();
    let arg = lambda.function_arguments(&graph)[0];
    let sub = lambda.subregion(&graph);
    let one = bitconstant(&mut graph, sub, 32, 1).unwrap();
    let sum = bitadd(&mut graph, arg, one).unwrap();
    lambda.finalize(&mut graph, &[sum]).unwrap();
    graph.add_export(lambda.output(&graph), "kept").unwrap();

    DeadNodeElimination::default().run(&mut graph).unwrap();
    assert!(graph.is_alive(lambda.node()));

    let sub = lambda.subregion(&graph);
    assert_eq!(graph.region(sub).nnodes(), 2);

    // the exported origin must be untouched
    assert_eq!(
        graph.region(root).result(0).origin(),
        Origin::Output(lambda.node(), 0)
    );
}
