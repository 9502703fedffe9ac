//! Integration tests for the table store and its move engine

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tessera::foundation::{EntityId, ErrorKind, Id, Type, Value};
use tessera::storage::{
    Archetype, ComponentHooks, ComponentSchema, TableEvent, TableId, TableStore,
};

// =============================================================================
// Helper Functions
// =============================================================================

struct Setup {
    store: TableStore,
    health: Id,
    name: Id,
    marker: Id,
}

fn setup() -> Setup {
    let mut store = TableStore::new();
    let health = store.entities_mut().allocate();
    let name = store.entities_mut().allocate();
    let marker = store.entities_mut().allocate();
    store
        .registry_mut()
        .insert_component(health, ComponentSchema::new("Health", Type::Int))
        .unwrap();
    store
        .registry_mut()
        .insert_component(name, ComponentSchema::new("Name", Type::String))
        .unwrap();
    Setup {
        store,
        health: health.into(),
        name: name.into(),
        marker: marker.into(),
    }
}

fn spawn(store: &mut TableStore) -> EntityId {
    let e = store.entities_mut().allocate();
    store.move_entity(e, TableId::ROOT, &mut |_| None).unwrap();
    e
}

fn add(store: &mut TableStore, e: EntityId, id: Id, value: Option<Value>) {
    let src = store.entities().location(e).unwrap().table;
    let dst = store.traverse_add(src, id);
    let mut value = value;
    store.move_entity(e, dst, &mut |_| value.take()).unwrap();
}

fn remove(store: &mut TableStore, e: EntityId, id: Id) {
    let src = store.entities().location(e).unwrap().table;
    let dst = store.traverse_remove(src, id);
    store.move_entity(e, dst, &mut |_| None).unwrap();
}

// =============================================================================
// Archetypes
// =============================================================================

#[test]
fn archetype_is_sorted_and_deduplicated() {
    let a = Id::from(EntityId::new(50, 0));
    let b = Id::from(EntityId::new(40, 0));
    let archetype = Archetype::from_ids(vec![a, b, a]);
    assert_eq!(archetype.ids(), &[b, a]);
    assert_eq!(archetype.with(a), archetype);
    assert_eq!(archetype.without(a).ids(), &[b]);
}

#[test]
fn same_archetype_same_table() {
    let Setup {
        mut store,
        health,
        marker,
        ..
    } = setup();
    let a = spawn(&mut store);
    let b = spawn(&mut store);
    add(&mut store, a, health, None);
    add(&mut store, a, marker, None);
    add(&mut store, b, marker, None);
    add(&mut store, b, health, None);

    let ta = store.table_of(a).unwrap().id();
    let tb = store.table_of(b).unwrap().id();
    assert_eq!(ta, tb);
    assert_eq!(store.table(ta).unwrap().len(), 2);
}

// =============================================================================
// Moves
// =============================================================================

#[test]
fn values_survive_moves() {
    let Setup {
        mut store,
        health,
        name,
        marker,
    } = setup();
    let e = spawn(&mut store);
    add(&mut store, e, health, Some(Value::Int(7)));
    add(&mut store, e, name, Some(Value::from("orc")));
    add(&mut store, e, marker, None);
    remove(&mut store, e, name);

    assert_eq!(store.get(e, health), Some(&Value::Int(7)));
    assert!(store.get(e, name).is_none());
    assert!(store.has(e, marker));
    // Tags have no column
    assert!(store.get(e, marker).is_none());
}

#[test]
fn added_columns_are_default_constructed() {
    let Setup {
        mut store, name, ..
    } = setup();
    let e = spawn(&mut store);
    add(&mut store, e, name, None);
    assert_eq!(store.get(e, name).and_then(Value::as_str), Some(""));
}

#[test]
fn swap_remove_fixes_relocated_row() {
    let Setup {
        mut store, health, ..
    } = setup();
    let entities: Vec<EntityId> = (0..3).map(|_| spawn(&mut store)).collect();
    for (i, &e) in entities.iter().enumerate() {
        add(&mut store, e, health, Some(Value::Int(i as i64)));
    }

    store.delete_entity(entities[0]).unwrap();
    for (i, &e) in entities.iter().enumerate().skip(1) {
        let loc = store.entities().location(e).unwrap();
        assert_eq!(store.table(loc.table).unwrap().entities()[loc.row()], e);
        assert_eq!(store.get(e, health), Some(&Value::Int(i as i64)));
    }
}

#[test]
fn move_to_own_table_is_noop() {
    let Setup {
        mut store, health, ..
    } = setup();
    let e = spawn(&mut store);
    add(&mut store, e, health, Some(Value::Int(1)));
    let table = store.table_of(e).unwrap().id();
    let moves = store.stats().table_moves;

    assert!(!store.move_entity(e, table, &mut |_| None).unwrap());
    assert_eq!(store.stats().table_moves, moves);
}

#[test]
fn move_table_carries_every_row() {
    let Setup {
        mut store,
        health,
        marker,
        ..
    } = setup();
    let entities: Vec<EntityId> = (0..4).map(|_| spawn(&mut store)).collect();
    for (i, &e) in entities.iter().enumerate() {
        add(&mut store, e, health, Some(Value::Int(i as i64)));
    }
    let src = store.table_of(entities[0]).unwrap().id();
    let dst = store.traverse_add(src, marker);

    let moved = store.move_table(src, dst, &mut |_, _| None).unwrap();
    assert_eq!(moved.len(), 4);
    assert!(store.table(src).unwrap().is_empty());
    for (i, &e) in entities.iter().enumerate() {
        assert!(store.has(e, marker));
        assert_eq!(store.get(e, health), Some(&Value::Int(i as i64)));
    }
}

#[test]
fn delete_rows_frees_entities() {
    let Setup {
        mut store, marker, ..
    } = setup();
    let a = spawn(&mut store);
    let b = spawn(&mut store);
    add(&mut store, a, marker, None);
    add(&mut store, b, marker, None);
    let table = store.table_of(a).unwrap().id();

    let deleted = store.delete_rows(table);
    assert_eq!(deleted.len(), 2);
    assert!(!store.entities().is_alive(a));
    assert!(!store.entities().is_alive(b));
}

#[test]
fn hooks_run_on_construct_and_destruct() {
    struct Counting(Arc<AtomicUsize>, Arc<AtomicUsize>);
    impl ComponentHooks for Counting {
        fn construct(&self, _ty: &Type) -> Value {
            self.0.fetch_add(1, Ordering::SeqCst);
            Value::Int(42)
        }
        fn destruct(&self, _value: Value) {
            self.1.fetch_add(1, Ordering::SeqCst);
        }
    }

    let mut store = TableStore::new();
    let constructed = Arc::new(AtomicUsize::new(0));
    let destructed = Arc::new(AtomicUsize::new(0));
    let ammo = store.entities_mut().allocate();
    store
        .registry_mut()
        .insert_component(
            ammo,
            ComponentSchema::new("Ammo", Type::Int)
                .with_hooks(Counting(constructed.clone(), destructed.clone())),
        )
        .unwrap();

    let e = spawn(&mut store);
    add(&mut store, e, ammo.into(), None);
    assert_eq!(store.get(e, ammo.into()), Some(&Value::Int(42)));
    assert_eq!(constructed.load(Ordering::SeqCst), 1);

    remove(&mut store, e, ammo.into());
    assert_eq!(destructed.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Change Stamps
// =============================================================================

#[test]
fn writes_advance_column_stamp() {
    let Setup {
        mut store, health, ..
    } = setup();
    let e = spawn(&mut store);
    add(&mut store, e, health, Some(Value::Int(1)));
    let table = store.table_of(e).unwrap().id();
    let column = store.table(table).unwrap().column_index(health).unwrap();
    let before = store.table(table).unwrap().column_stamp(column);

    store.set_value(e, health, Value::Int(2)).unwrap();
    let after = store.table(table).unwrap().column_stamp(column);
    assert!(after > before);
    assert_eq!(store.get(e, health), Some(&Value::Int(2)));
}

#[test]
fn set_value_requires_column() {
    let Setup {
        mut store,
        health,
        marker,
        ..
    } = setup();
    let e = spawn(&mut store);
    add(&mut store, e, marker, None);
    let err = store.set_value(e, health, Value::Int(1)).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::InvalidParameter(_)));
    assert!(!store.mark_modified(e, marker));
}

// =============================================================================
// Graph and Sweeping
// =============================================================================

#[test]
fn edges_are_cached_both_ways() {
    let Setup {
        mut store, marker, ..
    } = setup();
    let with_marker = store.traverse_add(TableId::ROOT, marker);
    assert_eq!(store.table(TableId::ROOT).unwrap().add_edge(marker), Some(with_marker));
    assert_eq!(store.traverse_remove(with_marker, marker), TableId::ROOT);
    assert_eq!(
        store.table(with_marker).unwrap().remove_edge(marker),
        Some(TableId::ROOT)
    );
}

#[test]
fn sweep_deletes_empty_tables_and_reports_events() {
    let Setup {
        mut store, marker, ..
    } = setup();
    store.take_events();
    let e = spawn(&mut store);
    add(&mut store, e, marker, None);
    let table = store.table_of(e).unwrap().id();
    assert_eq!(store.take_events(), vec![TableEvent::Created(table)]);

    assert_eq!(store.delete_empty_tables(), 0);
    remove(&mut store, e, marker);
    assert_eq!(store.delete_empty_tables(), 1);
    assert!(store.table(table).is_none());
    assert_eq!(store.take_events(), vec![TableEvent::Deleted(table)]);
    assert!(store.table(TableId::ROOT).is_some());
    assert_eq!(store.table(TableId::ROOT).unwrap().add_edge(marker), None);
}
