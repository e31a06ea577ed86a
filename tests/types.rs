use rvsdg::{FloatSize, StructDeclaration, Type};

#[test]
fn structural_equality() {
    let a = Type::function(
        vec![Type::bit(32), Type::pointer()],
        vec![Type::array(Type::bit(8), 16)],
    );
    let b = Type::function(
        vec![Type::bit(32), Type::pointer()],
        vec![Type::array(Type::bit(8), 16)],
    );
    assert_eq!(a, b);
    assert_eq!(a.hash_value(), b.hash_value());
    assert_eq!(a.debug_string(), b.debug_string());

    assert_ne!(Type::bit(32), Type::bit(64));
    assert_ne!(Type::control(2), Type::control(3));
    assert_ne!(Type::memory_state(), Type::io_state());
}

#[test]
fn interned_small_types_share_storage() {
    // repeated construction of the small types must agree in every respect
    let a = Type::control(2);
    let b = Type::control(2);
    assert_eq!(a, b);
    assert_eq!(a.hash_value(), b.hash_value());

    let x = Type::bit(1);
    let y = Type::bit(1);
    assert_eq!(x, y);
}

#[test]
fn structs_are_name_compatible() {
    let decl = StructDeclaration::create(Some("point"), vec![Type::bit(32), Type::bit(32)], false);
    let a = Type::strct(decl.clone());
    let b = Type::strct(decl);
    assert_eq!(a, b);

    // structurally identical but separately declared structs differ
    let other = StructDeclaration::create(Some("point"), vec![Type::bit(32), Type::bit(32)], false);
    let c = Type::strct(other);
    assert_ne!(a, c);
}

#[test]
fn value_and_state_families() {
    assert!(Type::bit(32).is_value_type());
    assert!(Type::pointer().is_value_type());
    assert!(Type::float(FloatSize::Double).is_value_type());
    assert!(Type::vector(Type::bit(8), 4).is_value_type());

    assert!(Type::memory_state().is_state_type());
    assert!(Type::io_state().is_state_type());
    assert!(Type::trigger().is_state_type());
    assert!(Type::control(4).is_state_type());

    assert_eq!(Type::control(4).nalternatives(), Some(4));
    assert_eq!(Type::bit(4).nalternatives(), None);
}

#[test]
fn total_order_is_consistent() {
    let mut types = vec![
        Type::bit(64),
        Type::bit(8),
        Type::pointer(),
        Type::memory_state(),
        Type::control(2),
    ];
    types.sort();
    let mut again = types.clone();
    again.sort();
    assert_eq!(types, again);
}
