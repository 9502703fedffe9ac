//! Integration tests for entity allocation and liveness

use tessera::foundation::{EntityId, ErrorKind};
use tessera::storage::EntityIndex;

#[test]
fn allocation_skips_reserved_range() {
    let mut index = EntityIndex::new();
    let e = index.allocate();
    assert!(e.index() >= EntityId::FIRST_USER_INDEX);
    assert_eq!(e.generation(), 0);
    assert!(index.is_alive(e));
}

#[test]
fn destroy_bumps_generation_and_recycles() {
    let mut index = EntityIndex::new();
    let a = index.allocate();
    let b = index.allocate();
    index.destroy(a).unwrap();

    assert!(!index.is_alive(a));
    assert!(index.is_alive(b));
    assert_eq!(index.generation(a.index()), Some(1));

    let c = index.allocate();
    assert_eq!(c.index(), a.index());
    assert_eq!(c.generation(), 1);
    assert_ne!(c, a);
}

#[test]
fn stale_ids_are_rejected() {
    let mut index = EntityIndex::new();
    let a = index.allocate();
    index.destroy(a).unwrap();

    let err = index.destroy(a).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::NotAlive(_)));
    assert!(index.validate(a).is_err());
    assert!(index.location(a).is_none());
}

#[test]
fn ensure_makes_fixed_ids_alive() {
    let mut index = EntityIndex::new();
    let fixed = EntityId::new(100, 0);
    index.ensure(fixed).unwrap();
    assert!(index.is_alive(fixed));
    assert_eq!(index.alive_at(100), Some(fixed));

    let err = index.ensure(EntityId::new(100, 4)).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::AlreadyInUse(_)));
}

#[test]
fn iteration_lists_live_entities() {
    let mut index = EntityIndex::new();
    let a = index.allocate();
    let b = index.allocate();
    let c = index.allocate();
    index.destroy(b).unwrap();

    let live: Vec<EntityId> = index.iter().collect();
    assert!(live.contains(&a));
    assert!(live.contains(&c));
    assert!(!live.contains(&b));
}
