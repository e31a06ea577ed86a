use rvsdg::dialects::bits::{bitadd, bitconstant};
use rvsdg::{
    copy_node, ArgumentKind, Graph, LambdaNode, Linkage, Origin, RegionId, ResultKind,
    SubstitutionMap, ThetaNode, Type, User,
};

fn bit_fn(nargs: usize, nresults: usize) -> Type {
    Type::function(vec![Type::bit(32); nargs], vec![Type::bit(32); nresults])
}

/// Checks the back-edge/loop pairing bijection of a region.
fn pairings_consistent(graph: &Graph, region: RegionId) {
    for (index, arg) in graph.region(region).arguments().iter().enumerate() {
        match arg.kind() {
            ArgumentKind::BackEdge { result } => {
                assert_eq!(
                    *graph.region(region).result(*result).kind(),
                    ResultKind::BackEdge { argument: index }
                );
            }
            ArgumentKind::Loop { result, .. } => {
                assert!(matches!(
                    graph.region(region).result(*result).kind(),
                    ResultKind::Loop { argument, .. } if *argument == index
                ));
            }
            _ => {}
        }
    }
    for res in graph.region(region).results().iter() {
        match res.kind() {
            ResultKind::BackEdge { argument } => {
                assert!(matches!(
                    graph.region(region).argument(*argument).kind(),
                    ArgumentKind::BackEdge { .. }
                ));
            }
            ResultKind::Loop { argument, .. } => {
                assert!(matches!(
                    graph.region(region).argument(*argument).kind(),
                    ArgumentKind::Loop { .. }
                ));
            }
            _ => {}
        }
    }
}

#[test]
fn lambda_copy_round_trip() {
    let mut graph = Graph::new();
    let root = graph.root();

    let lambda = LambdaNode::create(&mut graph, root, bit_fn(1, 1), "f", Linkage::Internal)
        .unwrap();
    let sub = lambda.subregion(&graph);
    let arg = lambda.function_arguments(&graph)[0];
    let one = bitconstant(&mut graph, sub, 32, 1).unwrap();
    let sum = bitadd(&mut graph, arg, one).unwrap();
    lambda.finalize(&mut graph, &[sum]).unwrap();

    let mut smap = SubstitutionMap::new();
    let copy = copy_node(&mut graph, lambda.node(), root, &mut smap).unwrap();
    let copied = LambdaNode::from_node(&graph, copy).unwrap();
    let copied_sub = copied.subregion(&graph);

    assert_eq!(
        graph.region(sub).nnodes(),
        graph.region(copied_sub).nnodes()
    );
    assert_eq!(
        graph.region(sub).narguments(),
        graph.region(copied_sub).narguments()
    );
    assert_eq!(
        graph.region(sub).nresults(),
        graph.region(copied_sub).nresults()
    );
    assert_eq!(smap.lookup(lambda.output(&graph)), Some(copied.output(&graph)));

    // the copy copies identically
    let mut again = SubstitutionMap::new();
    let second = copy_node(&mut graph, copy, root, &mut again).unwrap();
    let second = LambdaNode::from_node(&graph, second).unwrap();
    assert_eq!(
        graph.region(copied_sub).nnodes(),
        graph.region(second.subregion(&graph)).nnodes()
    );
}

#[test]
fn theta_copy_preserves_loop_pairing() {
    let mut graph = Graph::new();
    let root = graph.root();
    let init = graph.add_import(Type::bit(32), "init");
    let bound = graph.add_import(Type::bit(32), "bound");

    let theta = ThetaNode::create(&mut graph, root).unwrap();
    let lv = theta.add_loop_var(&mut graph, init).unwrap();
    let lw = theta.add_loop_var(&mut graph, bound).unwrap();
    let sub = theta.subregion(&graph);

    let step = bitconstant(&mut graph, sub, 32, 1).unwrap();
    let next = bitadd(&mut graph, lv.pre, step).unwrap();
    graph.divert(User::Result(sub, lv.post), next).unwrap();

    pairings_consistent(&graph, sub);

    let mut smap = SubstitutionMap::new();
    let copy = copy_node(&mut graph, theta.node(), root, &mut smap).unwrap();
    let copied = ThetaNode::from_node(&graph, copy).unwrap();
    let copied_sub = copied.subregion(&graph);

    pairings_consistent(&graph, copied_sub);
    assert_eq!(copied.loop_vars(&graph).len(), 2);

    // the loop-carried chain survived the copy
    let copied_lv = copied.loop_vars(&graph)[0];
    let post = graph.region(copied_sub).result(copied_lv.post).origin();
    assert!(graph.origin_node(post).is_some());
    assert_ne!(post, copied_lv.pre);

    // the invariant one still reads its own pre-argument
    let copied_lw = copied.loop_vars(&graph)[1];
    let post = graph.region(copied_sub).result(copied_lw.post).origin();
    assert_eq!(post, copied_lw.pre);
    let _ = lw;
}

#[cfg(feature = "hls")]
#[test]
fn hls_loop_copy_preserves_backedges() {
    use rvsdg::hls::LoopNode;

    let mut graph = Graph::new();
    let root = graph.root();
    let value = graph.add_import(Type::bit(32), "v");

    let loop_node = LoopNode::create(&mut graph, root).unwrap();
    let (in_loop, _out) = loop_node.add_loop_var(&mut graph, value).unwrap();
    let _ = in_loop;
    pairings_consistent(&graph, loop_node.subregion(&graph));

    let mut smap = SubstitutionMap::new();
    let copy = copy_node(&mut graph, loop_node.node(), root, &mut smap).unwrap();
    let copied = LoopNode::from_node(&graph, copy).unwrap();
    let copied_sub = copied.subregion(&graph);

    pairings_consistent(&graph, copied_sub);
    assert!(copied.predicate_buffer(&graph).is_ok());
    assert_eq!(
        graph.region(loop_node.subregion(&graph)).nnodes(),
        graph.region(copied_sub).nnodes()
    );
}

#[test]
fn copy_with_substitution_rewires_operands() {
    let mut graph = Graph::new();
    let root = graph.root();
    let x = graph.add_import(Type::bit(32), "x");
    let y = graph.add_import(Type::bit(32), "y");

    let sum = bitadd(&mut graph, x, x).unwrap();
    let node = graph.origin_node(sum).unwrap();

    let mut smap = SubstitutionMap::new();
    smap.insert(x, y);
    let copy = copy_node(&mut graph, node, root, &mut smap).unwrap();
    assert_eq!(graph.operands(copy), vec![y, y]);
    assert_eq!(smap.apply(sum), Origin::Output(copy, 0));
}
