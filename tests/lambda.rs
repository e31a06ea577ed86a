use rvsdg::dialects::bits::bitadd;
use rvsdg::dialects::mem::call;
use rvsdg::{Graph, LambdaNode, Linkage, PhiNode, Type};

fn bit_fn() -> Type {
    Type::function(vec![Type::bit(32)], vec![Type::bit(32)])
}

#[test]
fn lambda_signature_must_match() {
    let mut graph = Graph::new();
    let root = graph.root();

    let lambda = LambdaNode::create(&mut graph, root, bit_fn(), "f", Linkage::Internal).unwrap();
    assert_eq!(lambda.function_arguments(&graph).len(), 1);

    // finalizing with the wrong result count is a structural error
    let err = lambda.finalize(&mut graph, &[]).unwrap_err();
    assert!(err.downcast_ref::<rvsdg::StructuralError>().is_some());

    let arg = lambda.function_arguments(&graph)[0];
    let output = lambda.finalize(&mut graph, &[arg]).unwrap();
    assert_eq!(graph.origin_type(output), bit_fn());
}

#[test]
fn unused_context_variables_can_be_pruned() {
    let mut graph = Graph::new();
    let root = graph.root();
    let x = graph.add_import(Type::bit(32), "x");
    let y = graph.add_import(Type::bit(32), "y");

    let lambda = LambdaNode::create(&mut graph, root, bit_fn(), "f", Linkage::Internal).unwrap();
    let used = lambda.add_context_var(&mut graph, x).unwrap();
    let unused = lambda.add_context_var(&mut graph, y).unwrap();
    let _ = unused;

    let arg = lambda.function_arguments(&graph)[0];
    let sum = bitadd(&mut graph, arg, used.inner).unwrap();
    lambda.finalize(&mut graph, &[sum]).unwrap();

    lambda.prune_context_vars(&mut graph).unwrap();
    assert_eq!(lambda.context_vars(&graph).len(), 1);
    assert_eq!(graph.nusers(y), 0);
    assert_eq!(graph.nusers(x), 1);
}

/// A phi closing a self-recursive lambda: the inner call applies the
/// recursion argument, the outer output names the bound lambda.
#[test]
fn phi_binds_recursive_definitions() {
    let mut graph = Graph::new();
    let root = graph.root();

    let phi = PhiNode::create(&mut graph, root);
    let rv = phi.add_recursion_var(&mut graph, bit_fn()).unwrap();

    // before binding, the result reads the recursion argument itself
    assert!(phi.verify_bound(&graph).is_err());

    let sub = phi.subregion(&graph);
    let lambda = LambdaNode::create(&mut graph, sub, bit_fn(), "fac", Linkage::Internal).unwrap();
    let cv = lambda.add_context_var(&mut graph, rv.argument).unwrap();
    let arg = lambda.function_arguments(&graph)[0];
    let rec = call(&mut graph, cv.inner, &[arg]).unwrap();
    lambda.finalize(&mut graph, &[rec[0]]).unwrap();

    let lambda_output = lambda.output(&graph);
    phi.set_recursion_origin(&mut graph, &rv, lambda_output)
        .unwrap();
    assert!(phi.verify_bound(&graph).is_ok());

    graph
        .add_export(phi.recursion_output(&rv), "fac")
        .unwrap();

    assert_eq!(phi.recursion_vars(&graph).len(), 1);
    assert_eq!(
        graph.region(sub).result(rv.result).origin(),
        lambda.output(&graph)
    );
}
