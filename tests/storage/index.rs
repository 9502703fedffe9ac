//! Integration tests for the id index

use tessera::foundation::{EntityId, Id, Type};
use tessera::storage::{ComponentSchema, TableId, TableStore};

fn spawn_with(store: &mut TableStore, ids: &[Id]) -> EntityId {
    let e = store.entities_mut().allocate();
    let mut table = TableId::ROOT;
    for &id in ids {
        table = store.traverse_add(table, id);
    }
    store.move_entity(e, table, &mut |_| None).unwrap();
    e
}

#[test]
fn concrete_ids_list_their_tables() {
    let mut store = TableStore::new();
    let a = Id::from(store.entities_mut().allocate());
    let b = Id::from(store.entities_mut().allocate());
    spawn_with(&mut store, &[a]);
    spawn_with(&mut store, &[a, b]);

    assert_eq!(store.id_index().table_count(a), 2);
    assert_eq!(store.id_index().table_count(b), 1);
    assert!(store.id_index().is_used(a));
}

#[test]
fn pair_wildcards_cover_concrete_pairs() {
    let mut store = TableStore::new();
    let likes = store.entities_mut().allocate();
    let alice = store.entities_mut().allocate();
    let bob = store.entities_mut().allocate();
    spawn_with(&mut store, &[Id::pair(likes, alice)]);
    spawn_with(&mut store, &[Id::pair(likes, alice), Id::pair(likes, bob)]);

    let index = store.id_index();
    let any_target = Id::pair(likes, EntityId::WILDCARD);
    assert_eq!(index.table_count(any_target), 2);
    assert_eq!(
        index.matching_ids(any_target),
        vec![Id::pair(likes, alice), Id::pair(likes, bob)]
    );
    assert_eq!(index.table_count(Id::pair(EntityId::WILDCARD, bob)), 1);

    let both = index
        .tables(any_target)
        .find(|record| record.count == 2)
        .unwrap();
    assert_eq!(both.index, 0);
}

#[test]
fn records_track_columns() {
    let mut store = TableStore::new();
    let health = store.entities_mut().allocate();
    let tag = store.entities_mut().allocate();
    store
        .registry_mut()
        .insert_component(health, ComponentSchema::new("Health", Type::Int))
        .unwrap();
    let e = spawn_with(&mut store, &[health.into(), tag.into()]);
    let table = store.table_of(e).unwrap().id();

    let index = store.id_index();
    assert_eq!(index.record(health.into()).unwrap().get(table).unwrap().column, Some(0));
    assert_eq!(index.record(tag.into()).unwrap().get(table).unwrap().column, None);
}

#[test]
fn empty_tables_are_split_out() {
    let mut store = TableStore::new();
    let tag = Id::from(store.entities_mut().allocate());
    let e = spawn_with(&mut store, &[tag]);
    let table = store.table_of(e).unwrap().id();

    let record = store.id_index().record(tag).unwrap();
    assert_eq!(record.non_empty_tables().count(), 1);
    assert_eq!(record.empty_tables().count(), 0);

    store.delete_entity(e).unwrap();
    let record = store.id_index().record(tag).unwrap();
    assert_eq!(record.non_empty_tables().count(), 0);
    assert_eq!(record.empty_tables().collect::<Vec<_>>(), vec![table]);
}

#[test]
fn records_drop_with_their_last_table() {
    let mut store = TableStore::new();
    let tag = Id::from(store.entities_mut().allocate());
    let e = spawn_with(&mut store, &[tag]);
    store.delete_entity(e).unwrap();

    assert_eq!(store.delete_empty_tables(), 1);
    assert!(store.id_index().record(tag).is_none());
    assert!(store.id_index().record(Id::WILDCARD).is_none());
    assert_eq!(store.id_index().table_count(tag), 0);
}
