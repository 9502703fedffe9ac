//! Integration tests for type descriptors

use tessera::foundation::{EntityId, ErrorKind, Member, Type, Value};

fn vec2() -> Type {
    Type::structure([Member::new("x", Type::Float), Member::new("y", Type::Float)])
}

// =============================================================================
// Defaults
// =============================================================================

#[test]
fn scalar_defaults() {
    assert_eq!(Type::Bool.default_value(), Value::Bool(false));
    assert_eq!(Type::Int.default_value(), Value::Int(0));
    assert_eq!(Type::Float.default_value(), Value::Float(0.0));
    assert_eq!(Type::Entity.default_value(), Value::Entity(EntityId::NULL));
    assert_eq!(Type::option(Type::Int).default_value(), Value::Nil);
}

#[test]
fn composite_defaults() {
    let ty = Type::structure([
        Member::new("pos", vec2()),
        Member::new("hp", Type::Int).with_default(100),
        Member::new("slots", Type::array(Type::Bool, 2)),
    ]);
    let value = ty.default_value();
    assert_eq!(
        value,
        Value::structure([
            Value::structure([Value::Float(0.0), Value::Float(0.0)]),
            Value::Int(100),
            Value::list([Value::Bool(false), Value::Bool(false)]),
        ])
    );
    assert!(ty.accepts(&value));
}

// =============================================================================
// Reflection
// =============================================================================

#[test]
fn members_and_children() {
    let ty = vec2();
    assert_eq!(ty.member_index("y"), Some(1));
    assert_eq!(ty.member_index("z"), None);
    assert_eq!(ty.members().map(<[Member]>::len), Some(2));
    assert!(matches!(ty.child(0), Some(Type::Float)));
    assert!(ty.child(2).is_none());

    let list = Type::list(Type::Int);
    assert!(matches!(list.child(10), Some(Type::Int)));
    let array = Type::array(Type::Int, 3);
    assert!(array.child(3).is_none());
}

// =============================================================================
// Validation and coercion
// =============================================================================

#[test]
fn accepts_checks_shape() {
    assert!(Type::Float.accepts(&Value::Int(1)));
    assert!(!Type::Int.accepts(&Value::Float(1.0)));
    assert!(Type::option(Type::String).accepts(&Value::Nil));
    assert!(Type::Any.accepts(&Value::Bool(true)));
    assert!(!Type::array(Type::Int, 2).accepts(&Value::list([Value::Int(1)])));
    assert!(!vec2().accepts(&Value::structure([Value::Float(1.0)])));
}

#[test]
fn coerce_promotes_nested_ints() {
    let ty = Type::list(vec2());
    let value = Value::list([Value::structure([Value::Int(1), Value::Float(2.5)])]);
    let coerced = ty.coerce(value).unwrap();
    assert_eq!(
        coerced,
        Value::list([Value::structure([Value::Float(1.0), Value::Float(2.5)])])
    );
}

#[test]
fn coerce_rejects_mismatch() {
    let err = Type::Int.coerce(Value::from("seven")).unwrap_err();
    match err.kind {
        ErrorKind::TypeMismatch { expected, actual } => {
            assert_eq!(expected, "int");
            assert_eq!(actual, "string");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}
