//! Integration tests for cached queries

use std::cmp::Ordering;
use std::collections::HashSet;

use tessera::engine::{QueryDesc, Term, World};
use tessera::foundation::{EntityId, ErrorKind, Type, Value};

// =============================================================================
// Helper Functions
// =============================================================================

fn world_with_components() -> (World, EntityId, EntityId, EntityId) {
    let mut world = World::new();
    let health = world.component("Health", Type::Int).unwrap();
    let armor = world.component("Armor", Type::Int).unwrap();
    let boss = world.tag("Boss").unwrap();
    (world, health, armor, boss)
}

fn by_value(a: &Value, b: &Value) -> Ordering {
    a.as_int().cmp(&b.as_int())
}

fn collect(world: &mut World, query: tessera::engine::QueryId) -> HashSet<EntityId> {
    world.query_entities(query).unwrap().into_iter().collect()
}

// =============================================================================
// Matching
// =============================================================================

#[test]
fn query_spans_several_tables() {
    let (mut world, health, armor, boss) = world_with_components();
    let plain = world.entity();
    world.set(plain, health, 10).unwrap();
    let armored = world.entity();
    world.set(armored, health, 20).unwrap();
    world.set(armored, armor, 5).unwrap();
    let big = world.entity();
    world.set(big, health, 30).unwrap();
    world.add(big, boss).unwrap();

    let query = world.query(QueryDesc::new().with(health)).unwrap();
    let mut total = 0;
    let mut tables = 0;
    let mut it = world.iter(query).unwrap();
    while it.next() {
        tables += 1;
        assert!(it.table().archetype().contains(health.into()));
        total += it
            .field(0)
            .iter()
            .filter_map(Value::as_int)
            .sum::<i64>();
    }
    assert_eq!(tables, 3);
    assert_eq!(total, 60);
}

#[test]
fn unknown_and_removed_queries_are_errors() {
    let (mut world, health, ..) = world_with_components();
    let query = world.query(QueryDesc::new().with(health)).unwrap();
    assert!(world.remove_query(query));
    let err = world.count(query).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::InvalidParameter(_)));
}

#[test]
fn empty_descriptions_are_rejected() {
    let mut world = World::new();
    let err = world.query(QueryDesc::new()).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::InvalidParameter(_)));
}

#[test]
fn not_terms_alone_are_rejected() {
    let (mut world, health, ..) = world_with_components();
    let err = world.query(QueryDesc::new().without(health)).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::InvalidParameter(_)));
}

#[test]
fn disabled_entities_are_skipped_unless_requested() {
    let (mut world, health, ..) = world_with_components();
    let active = world.entity();
    world.set(active, health, 1).unwrap();
    let asleep = world.entity();
    world.set(asleep, health, 1).unwrap();
    world.add(asleep, EntityId::DISABLED).unwrap();

    let default = world.query(QueryDesc::new().with(health)).unwrap();
    let all = world
        .query(QueryDesc::new().with(health).match_disabled())
        .unwrap();
    assert_eq!(world.query_entities(default).unwrap(), vec![active]);
    assert_eq!(collect(&mut world, all), HashSet::from([active, asleep]));
}

#[test]
fn self_up_prefers_own_value() {
    let (mut world, health, ..) = world_with_components();
    let parent = world.entity();
    world.set(parent, health, 100).unwrap();
    let inherits = world.entity();
    world.add_pair(inherits, EntityId::CHILD_OF, parent).unwrap();
    let owns = world.entity();
    world.set(owns, health, 5).unwrap();
    world.add_pair(owns, EntityId::CHILD_OF, parent).unwrap();

    let query = world
        .query(
            QueryDesc::new()
                .term(Term::new(health).self_up(EntityId::CHILD_OF))
                .term(Term::pair(EntityId::CHILD_OF, EntityId::WILDCARD)),
        )
        .unwrap();

    let mut seen = Vec::new();
    let mut it = world.iter(query).unwrap();
    while it.next() {
        for row in 0..it.count() {
            let value = it.get(0, row).and_then(Value::as_int);
            seen.push((it.entities()[row], it.is_self(0), value));
        }
    }
    seen.sort();
    let mut expected = vec![(inherits, false, Some(100)), (owns, true, Some(5))];
    expected.sort();
    assert_eq!(seen, expected);
}

// =============================================================================
// Writes and Change Detection
// =============================================================================

#[test]
fn run_writes_are_visible_to_other_queries() {
    let (mut world, health, armor, _) = world_with_components();
    let e = world.entity();
    world.set(e, health, 10).unwrap();
    world.set(e, armor, 3).unwrap();

    let damage = world
        .query(
            QueryDesc::new()
                .term(Term::new(health).write())
                .with(armor),
        )
        .unwrap();
    let watch = world
        .query(QueryDesc::new().with(health).detect_changes())
        .unwrap();
    let mut it = world.iter(watch).unwrap();
    while it.next() {}
    assert!(!world.changed(watch).unwrap());

    world
        .run(damage, |it| {
            let armor: Vec<i64> = it.field(1).iter().filter_map(Value::as_int).collect();
            for (h, a) in it.field_mut(0).unwrap().iter_mut().zip(armor) {
                *h = Value::Int(h.as_int().unwrap_or_default() - (8 - a));
            }
        })
        .unwrap();

    assert_eq!(world.get(e, health), Some(&Value::Int(5)));
    assert!(world.changed(watch).unwrap());
}

#[test]
fn read_terms_cannot_be_written() {
    let (mut world, health, ..) = world_with_components();
    let e = world.entity();
    world.set(e, health, 1).unwrap();
    let query = world.query(QueryDesc::new().with(health)).unwrap();

    let mut failed = false;
    world
        .run(query, |it| {
            failed = it.field_mut(0).is_err();
        })
        .unwrap();
    assert!(failed);
}

#[test]
fn skipped_results_stay_changed() {
    let (mut world, health, ..) = world_with_components();
    let e = world.entity();
    world.set(e, health, 1).unwrap();
    let query = world
        .query(QueryDesc::new().with(health).detect_changes())
        .unwrap();

    let mut it = world.iter(query).unwrap();
    while it.next() {
        assert!(it.changed());
        it.skip();
    }
    assert!(world.changed(query).unwrap());

    let mut it = world.iter(query).unwrap();
    while it.next() {}
    assert!(!world.changed(query).unwrap());
}

#[test]
fn filter_terms_do_not_trigger_changes() {
    let (mut world, health, armor, _) = world_with_components();
    let e = world.entity();
    world.set(e, health, 1).unwrap();
    world.set(e, armor, 1).unwrap();
    let query = world
        .query(
            QueryDesc::new()
                .with(health)
                .term(Term::new(armor).filter())
                .detect_changes(),
        )
        .unwrap();
    let mut it = world.iter(query).unwrap();
    while it.next() {}

    world.set(e, armor, 2).unwrap();
    assert!(!world.changed(query).unwrap());
    world.set(e, health, 2).unwrap();
    assert!(world.changed(query).unwrap());
}

// =============================================================================
// Sorting
// =============================================================================

#[test]
fn sorted_query_counts_rows_added_after_sort() {
    let (mut world, health, ..) = world_with_components();
    let first = world.entity();
    world.set(first, health, 50).unwrap();
    let query = world
        .query(QueryDesc::new().with(health).order_by(health, by_value))
        .unwrap();
    assert_eq!(world.query_entities(query).unwrap(), vec![first]);

    let later: Vec<EntityId> = (0..4_i64)
        .map(|hp| {
            let e = world.entity();
            world.set(e, health, hp).unwrap();
            e
        })
        .collect();
    assert_eq!(world.count(query).unwrap(), 5);
    assert!(world.is_true(query).unwrap());

    let sorted = world.query_entities(query).unwrap();
    assert_eq!(&sorted[..4], &later[..]);
    assert_eq!(sorted.last(), Some(&first));
    assert_eq!(world.count(query).unwrap(), 5);
}

#[test]
fn sorted_query_is_false_once_emptied() {
    let (mut world, health, ..) = world_with_components();
    let only = world.entity();
    world.set(only, health, 1).unwrap();
    let query = world
        .query(QueryDesc::new().with(health).order_by(health, by_value))
        .unwrap();
    assert_eq!(world.query_entities(query).unwrap(), vec![only]);

    world.remove(only, health).unwrap();
    assert!(!world.is_true(query).unwrap());
    assert_eq!(world.count(query).unwrap(), 0);
    assert!(world.query_entities(query).unwrap().is_empty());
}

// =============================================================================
// One-Shot Scans
// =============================================================================

#[test]
fn each_scans_matching_tables_once() {
    let (mut world, health, armor, boss) = world_with_components();
    let plain = world.entity();
    world.set(plain, health, 10).unwrap();
    let armored = world.entity();
    world.set(armored, health, 20).unwrap();
    world.set(armored, armor, 5).unwrap();
    let big = world.entity();
    world.set(big, health, 30).unwrap();
    world.add(big, boss).unwrap();

    let mut seen = HashSet::new();
    let mut total = 0;
    world
        .each(QueryDesc::new().with(health).without(boss), |it| {
            seen.extend(it.entities().iter().copied());
            total += it
                .field(0)
                .iter()
                .filter_map(Value::as_int)
                .sum::<i64>();
        })
        .unwrap();
    assert_eq!(seen, HashSet::from([plain, armored]));
    assert_eq!(total, 30);
}

#[test]
fn each_rejects_sorted_descriptions() {
    let (world, health, ..) = world_with_components();
    let err = world
        .each(QueryDesc::new().with(health).order_by(health, by_value), |_| {})
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::InvalidParameter(_)));

    let err = world
        .each(QueryDesc::new().without(health), |_| {})
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::InvalidParameter(_)));
}
