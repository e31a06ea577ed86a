use rvsdg::dialects::bits::{bitconstant, biteq};
use rvsdg::{
    control_constant, match_op, GammaNode, GammaOperation, Graph, MatchOperation, Type,
};

fn count_gammas(graph: &Graph) -> usize {
    graph
        .live_nodes()
        .into_iter()
        .filter(|n| {
            graph
                .node(*n)
                .operation()
                .downcast_ref::<GammaOperation>()
                .is_some()
        })
        .count()
}

#[test]
fn entry_and_exit_variable_machinery() {
    let mut graph = Graph::new();
    let pred = graph.add_import(Type::control(3), "p");
    let x = graph.add_import(Type::bit(32), "x");

    let gamma = GammaNode::create(&mut graph, pred).unwrap();
    assert_eq!(gamma.nsubregions(&graph), 3);

    let ev = gamma.add_entry_var(&mut graph, x).unwrap();
    assert_eq!(ev.branch_arguments.len(), 3);

    let xv = gamma
        .add_exit_var(&mut graph, &ev.branch_arguments.clone())
        .unwrap();
    assert_eq!(xv.branch_results.len(), 3);

    assert_eq!(gamma.entry_vars(&graph).len(), 1);
    assert_eq!(gamma.exit_vars(&graph).len(), 1);
    assert_eq!(gamma.is_invariant(&graph, &xv), Some(x));
}

#[test]
fn predicate_folding_inlines_the_selected_branch() {
    let mut graph = Graph::new();
    let root = graph.root();
    let x = graph.add_import(Type::bit(32), "x");

    let pred = control_constant(&mut graph, root, 1, 2).unwrap();
    let gamma = GammaNode::create(&mut graph, pred).unwrap();
    let ev = gamma.add_entry_var(&mut graph, x).unwrap();

    // branch 0 produces a constant, branch 1 routes the entry variable
    let sub0 = gamma.subregion(&graph, 0);
    let seven = bitconstant(&mut graph, sub0, 32, 7).unwrap();
    let xv = gamma
        .add_exit_var(&mut graph, &[seven, ev.branch_arguments[1]])
        .unwrap();
    graph.add_export(xv.output, "out").unwrap();

    graph.normalize().unwrap();
    graph.prune_region(root, true);

    assert_eq!(count_gammas(&graph), 0);
    assert_eq!(graph.region(root).result(0).origin(), x);
}

#[test]
fn predicate_folding_selects_the_constant_branch() {
    let mut graph = Graph::new();
    let root = graph.root();
    let x = graph.add_import(Type::bit(32), "x");

    let pred = control_constant(&mut graph, root, 0, 2).unwrap();
    let gamma = GammaNode::create(&mut graph, pred).unwrap();
    let ev = gamma.add_entry_var(&mut graph, x).unwrap();

    let sub0 = gamma.subregion(&graph, 0);
    let seven = bitconstant(&mut graph, sub0, 32, 7).unwrap();
    let xv = gamma
        .add_exit_var(&mut graph, &[seven, ev.branch_arguments[1]])
        .unwrap();
    graph.add_export(xv.output, "out").unwrap();

    graph.normalize().unwrap();
    graph.prune_region(root, true);

    assert_eq!(count_gammas(&graph), 0);
    // branch 0's constant was copied out into the root region
    let origin = graph.region(root).result(0).origin();
    let node = graph.origin_node(origin).unwrap();
    let constant = graph
        .node(node)
        .operation()
        .downcast_ref::<rvsdg::dialects::bits::BitConstantOperation>()
        .unwrap();
    assert_eq!(constant.value(), 7);
}

#[test]
fn invariant_exit_variables_bypass_the_gamma() {
    let mut graph = Graph::new();
    let root = graph.root();
    let pred = graph.add_import(Type::control(2), "p");
    let x = graph.add_import(Type::bit(32), "x");

    let gamma = GammaNode::create(&mut graph, pred).unwrap();
    let ev = gamma.add_entry_var(&mut graph, x).unwrap();
    let xv = gamma
        .add_exit_var(&mut graph, &ev.branch_arguments.clone())
        .unwrap();
    graph.add_export(xv.output, "out").unwrap();

    graph.normalize().unwrap();
    assert_eq!(graph.region(root).result(0).origin(), x);
}

#[test]
fn control_constant_branches_fuse_into_a_match() {
    // gamma over match(eq(x, 5)) whose branches produce swapped control
    // constants becomes a re-parameterized match
    let mut graph = Graph::new();
    let root = graph.root();
    let x = graph.add_import(Type::bit(32), "x");

    let five = bitconstant(&mut graph, root, 32, 5).unwrap();
    let cmp = biteq(&mut graph, x, five).unwrap();
    let pred = match_op(&mut graph, root, 1, vec![(1, 1)], 0, 2, cmp).unwrap();

    let gamma = GammaNode::create(&mut graph, pred).unwrap();
    let sub0 = gamma.subregion(&graph, 0);
    let sub1 = gamma.subregion(&graph, 1);
    let c0 = control_constant(&mut graph, sub0, 1, 2).unwrap();
    let c1 = control_constant(&mut graph, sub1, 0, 2).unwrap();
    let xv = gamma.add_exit_var(&mut graph, &[c0, c1]).unwrap();
    graph.add_export(xv.output, "out").unwrap();

    graph.normalize().unwrap();

    let origin = graph.region(root).result(0).origin();
    let node = graph.origin_node(origin).unwrap();
    let fused = graph
        .node(node)
        .operation()
        .downcast_ref::<MatchOperation>()
        .unwrap();
    assert_eq!(fused.mapping(), &[(1, 0)]);
    assert_eq!(fused.default_alternative(), 1);
    assert_eq!(fused.nalternatives(), 2);
    // the fused match reads the comparison directly
    assert_eq!(graph.node(node).input(0).origin(), cmp);

    // the gamma is now dead and removable
    use rvsdg::passes::{DeadNodeElimination, Transformation};
    DeadNodeElimination::default().run(&mut graph).unwrap();
    assert_eq!(count_gammas(&graph), 0);
}

#[test]
fn nary_control_constant_branches_fuse() {
    // a three-way gamma whose branches permute the control alternatives
    // fuses into a re-parameterized three-way match
    let mut graph = Graph::new();
    let root = graph.root();
    let x = graph.add_import(Type::bit(32), "x");

    let pred = match_op(&mut graph, root, 32, vec![(0, 0), (1, 1)], 2, 3, x).unwrap();
    let gamma = GammaNode::create(&mut graph, pred).unwrap();
    let sub0 = gamma.subregion(&graph, 0);
    let sub1 = gamma.subregion(&graph, 1);
    let sub2 = gamma.subregion(&graph, 2);
    let c0 = control_constant(&mut graph, sub0, 2, 3).unwrap();
    let c1 = control_constant(&mut graph, sub1, 0, 3).unwrap();
    let c2 = control_constant(&mut graph, sub2, 1, 3).unwrap();
    let xv = gamma.add_exit_var(&mut graph, &[c0, c1, c2]).unwrap();
    graph.add_export(xv.output, "out").unwrap();

    graph.normalize().unwrap();

    let origin = graph.region(root).result(0).origin();
    let node = graph.origin_node(origin).unwrap();
    let fused = graph
        .node(node)
        .operation()
        .downcast_ref::<MatchOperation>()
        .unwrap();
    assert_eq!(fused.nalternatives(), 3);
    assert_eq!(fused.mapping(), &[(0, 2), (1, 0)]);
    assert_eq!(fused.default_alternative(), 1);
    assert_eq!(graph.node(node).input(0).origin(), x);
}

#[test]
fn mixed_alternative_counts_cannot_form_an_exit_var() {
    let mut graph = Graph::new();
    let root = graph.root();
    let pred = graph.add_import(Type::control(2), "p");

    let gamma = GammaNode::create(&mut graph, pred).unwrap();
    // branch constants disagreeing on their alternative count differ in
    // type, so the exit variable is rejected before any reduction runs
    let sub0 = gamma.subregion(&graph, 0);
    let sub1 = gamma.subregion(&graph, 1);
    let c0 = control_constant(&mut graph, sub0, 1, 2).unwrap();
    let c1 = control_constant(&mut graph, sub1, 0, 3).unwrap();
    let err = gamma.add_exit_var(&mut graph, &[c0, c1]).unwrap_err();
    assert!(err.downcast_ref::<rvsdg::TypeMismatchError>().is_some());
}
