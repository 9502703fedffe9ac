//! Integration tests for the Value type

use tessera::foundation::{EntityId, Value};

// =============================================================================
// Conversions
// =============================================================================

#[test]
fn from_primitives() {
    assert_eq!(Value::from(true), Value::Bool(true));
    assert_eq!(Value::from(7_i64), Value::Int(7));
    assert_eq!(Value::from(7_i32), Value::Int(7));
    assert_eq!(Value::from(0.5), Value::Float(0.5));
    assert_eq!(Value::from("hi").as_str(), Some("hi"));
    assert_eq!(Value::from(String::from("hi")).as_str(), Some("hi"));

    let e = EntityId::new(50, 1);
    assert_eq!(Value::from(e).as_entity(), Some(e));
}

#[test]
fn kind_names() {
    assert_eq!(Value::Nil.kind_name(), "nil");
    assert_eq!(Value::Int(1).kind_name(), "int");
    assert_eq!(Value::list([]).kind_name(), "list");
    assert_eq!(Value::structure([]).kind_name(), "struct");
}

// =============================================================================
// Accessors
// =============================================================================

#[test]
fn numbers_widen() {
    assert_eq!(Value::Int(3).as_number(), Some(3.0));
    assert_eq!(Value::Float(1.5).as_number(), Some(1.5));
    assert_eq!(Value::Bool(true).as_number(), None);
    assert_eq!(Value::Int(3).as_float(), None);
}

#[test]
fn struct_members() {
    let value = Value::structure([Value::Int(1), Value::from("two")]);
    assert_eq!(value.member(0), Some(&Value::Int(1)));
    assert_eq!(value.member(1).and_then(Value::as_str), Some("two"));
    assert_eq!(value.member(2), None);
    assert_eq!(Value::Int(1).member(0), None);
}

#[test]
fn list_elements() {
    let value = Value::list([Value::Int(1), Value::Int(2)]);
    let items = value.as_list().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items.last(), Some(&Value::Int(2)));
    assert!(value.as_struct().is_none());
}
