use rvsdg::dialects::bits::{bitadd, bitconstant, BitConstantOperation};
use rvsdg::dialects::mem::{call, CallOperation};
use rvsdg::passes::{DeadNodeElimination, FunctionInlining, Transformation};
use rvsdg::{Graph, LambdaNode, LambdaOperation, Linkage, Type};

fn count_lambdas(graph: &Graph) -> usize {
    graph
        .live_nodes()
        .into_iter()
        .filter(|n| {
            graph
                .node(*n)
                .operation()
                .downcast_ref::<LambdaOperation>()
                .is_some()
        })
        .count()
}

fn count_calls(graph: &Graph) -> usize {
    graph
        .live_nodes()
        .into_iter()
        .filter(|n| {
            graph
                .node(*n)
                .operation()
                .downcast_ref::<CallOperation>()
                .is_some()
        })
        .count()
}

/// f(x) = x + 1 called once at f(3): the export folds to 4 and no lambda
/// f remains.
#[test]
fn single_call_site_is_inlined() {
    let mut graph = Graph::new();
    let root = graph.root();

    let f_ty = Type::function(vec![Type::bit(32)], vec![Type::bit(32)]);
    let f = LambdaNode::create(&mut graph, root, f_ty, "f", Linkage::Internal).unwrap();
    let f_sub = f.subregion(&graph);
    let x = f.function_arguments(&graph)[0];
    let one = bitconstant(&mut graph, f_sub, 32, 1).unwrap();
    let sum = bitadd(&mut graph, x, one).unwrap();
    f.finalize(&mut graph, &[sum]).unwrap();

    let main_ty = Type::function(vec![], vec![Type::bit(32)]);
    let main = LambdaNode::create(&mut graph, root, main_ty, "main", Linkage::External).unwrap();
    let f_out = f.output(&graph);
    let cv = main.add_context_var(&mut graph, f_out).unwrap();
    let main_sub = main.subregion(&graph);
    let three = bitconstant(&mut graph, main_sub, 32, 3).unwrap();
    let outputs = call(&mut graph, cv.inner, &[three]).unwrap();
    main.finalize(&mut graph, &[outputs[0]]).unwrap();
    graph.add_export(main.output(&graph), "main").unwrap();

    FunctionInlining::default().run(&mut graph).unwrap();
    assert_eq!(count_calls(&graph), 0);

    graph.normalize().unwrap();
    DeadNodeElimination::default().run(&mut graph).unwrap();

    assert_eq!(count_lambdas(&graph), 1);
    let result = graph.region(main.subregion(&graph)).result(0).origin();
    let node = graph.origin_node(result).unwrap();
    let constant = graph
        .node(node)
        .operation()
        .downcast_ref::<BitConstantOperation>()
        .unwrap();
    assert_eq!(constant.value(), 4);
}

/// A lambda called twice keeps both call sites.
#[test]
fn multiple_call_sites_are_left_alone() {
    let mut graph = Graph::new();
    let root = graph.root();

    let f_ty = Type::function(vec![Type::bit(32)], vec![Type::bit(32)]);
    let f = LambdaNode::create(&mut graph, root, f_ty, "twice", Linkage::Internal).unwrap();
    let x = f.function_arguments(&graph)[0];
    f.finalize(&mut graph, &[x]).unwrap();

    let main_ty = Type::function(vec![], vec![Type::bit(32)]);
    let main = LambdaNode::create(&mut graph, root, main_ty, "main", Linkage::External).unwrap();
    let f_out = f.output(&graph);
    let cv = main.add_context_var(&mut graph, f_out).unwrap();
    let main_sub = main.subregion(&graph);
    let three = bitconstant(&mut graph, main_sub, 32, 3).unwrap();
    let first = call(&mut graph, cv.inner, &[three]).unwrap();
    let second = call(&mut graph, cv.inner, &[first[0]]).unwrap();
    main.finalize(&mut graph, &[second[0]]).unwrap();
    graph.add_export(main.output(&graph), "main").unwrap();

    FunctionInlining::default().run(&mut graph).unwrap();
    assert_eq!(count_calls(&graph), 2);
    assert_eq!(count_lambdas(&graph), 2);
}

/// Reserved name prefixes are never inlined.
#[test]
fn reserved_prefixes_are_preserved() {
    let mut graph = Graph::new();
    let root = graph.root();

    let f_ty = Type::function(vec![Type::bit(32)], vec![Type::bit(32)]);
    let f = LambdaNode::create(&mut graph, root, f_ty, "hls_stage", Linkage::Internal).unwrap();
    let x = f.function_arguments(&graph)[0];
    f.finalize(&mut graph, &[x]).unwrap();

    let main_ty = Type::function(vec![], vec![Type::bit(32)]);
    let main = LambdaNode::create(&mut graph, root, main_ty, "main", Linkage::External).unwrap();
    let f_out = f.output(&graph);
    let cv = main.add_context_var(&mut graph, f_out).unwrap();
    let main_sub = main.subregion(&graph);
    let three = bitconstant(&mut graph, main_sub, 32, 3).unwrap();
    let outputs = call(&mut graph, cv.inner, &[three]).unwrap();
    main.finalize(&mut graph, &[outputs[0]]).unwrap();
    graph.add_export(main.output(&graph), "main").unwrap();

    FunctionInlining::default().run(&mut graph).unwrap();
    assert_eq!(count_calls(&graph), 1);
}

/// Context captured by the callee is routed through the caller's scopes.
#[test]
fn captured_context_is_routed_to_the_call_site() {
    let mut graph = Graph::new();
    let root = graph.root();
    let global = graph.add_import(Type::bit(32), "g");

    let f_ty = Type::function(vec![Type::bit(32)], vec![Type::bit(32)]);
    let f = LambdaNode::create(&mut graph, root, f_ty, "addg", Linkage::Internal).unwrap();
    let captured = f.add_context_var(&mut graph, global).unwrap();
    let x = f.function_arguments(&graph)[0];
    let sum = bitadd(&mut graph, x, captured.inner).unwrap();
    f.finalize(&mut graph, &[sum]).unwrap();

    let main_ty = Type::function(vec![], vec![Type::bit(32)]);
    let main = LambdaNode::create(&mut graph, root, main_ty, "main", Linkage::External).unwrap();
    let f_out = f.output(&graph);
    let cv = main.add_context_var(&mut graph, f_out).unwrap();
    let main_sub = main.subregion(&graph);
    let three = bitconstant(&mut graph, main_sub, 32, 3).unwrap();
    let outputs = call(&mut graph, cv.inner, &[three]).unwrap();
    main.finalize(&mut graph, &[outputs[0]]).unwrap();
    graph.add_export(main.output(&graph), "main").unwrap();

    FunctionInlining::default().run(&mut graph).unwrap();
    assert_eq!(count_calls(&graph), 0);

    // main gained a context variable for the routed capture
    assert_eq!(main.context_vars(&graph).len(), 2);

    DeadNodeElimination::default().run(&mut graph).unwrap();
    // the add now lives in main's body, fed by the routed capture
    let result = graph.region(main.subregion(&graph)).result(0).origin();
    let node = graph.origin_node(result).unwrap();
    assert!(graph
        .node(node)
        .operation()
        .downcast_ref::<rvsdg::dialects::bits::BitBinaryOperation>()
        .is_some());
}
