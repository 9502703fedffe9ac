//! Integration tests for entity ids and component ids

use tessera::foundation::{EntityId, Id};

// =============================================================================
// EntityId Tests
// =============================================================================

#[test]
fn entity_id_packs_index_and_generation() {
    let e = EntityId::new(40, 3);
    assert_eq!(e.index(), 40);
    assert_eq!(e.generation(), 3);
    assert_eq!(EntityId::from_raw(e.raw()), e);
}

#[test]
fn builtins_are_below_first_user_index() {
    for builtin in EntityId::BUILTINS {
        assert!(builtin.is_builtin());
        assert!(builtin.index() < EntityId::FIRST_USER_INDEX);
    }
    assert!(!EntityId::new(EntityId::FIRST_USER_INDEX, 0).is_builtin());
}

#[test]
fn null_and_wildcards() {
    assert!(EntityId::NULL.is_null());
    assert!(EntityId::WILDCARD.is_wildcard());
    assert!(EntityId::ANY.is_wildcard());
    assert!(!EntityId::CHILD_OF.is_wildcard());
}

// =============================================================================
// Id Tests
// =============================================================================

#[test]
fn plain_id_round_trips_entity() {
    let e = EntityId::new(33, 0);
    let id = Id::from(e);
    assert!(!id.is_pair());
    assert_eq!(id.entity(), Some(e));
    assert_eq!(id.first(), e);
    assert_eq!(id.second(), None);
}

#[test]
fn pair_exposes_both_elements() {
    let likes = EntityId::new(40, 0);
    let bob = EntityId::new(41, 0);
    let pair = Id::pair(likes, bob);
    assert!(pair.is_pair());
    assert_eq!(pair.entity(), None);
    assert_eq!(pair.first(), likes);
    assert_eq!(pair.second(), Some(bob));
    assert!(!pair.is_wildcard());
}

#[test]
fn pair_drops_generations() {
    let a = EntityId::new(40, 7);
    let b = EntityId::new(41, 2);
    let pair = Id::pair(a, b);
    assert_eq!(pair.first().index(), 40);
    assert_eq!(pair.first().generation(), 0);
    assert_eq!(pair, Id::pair(EntityId::new(40, 0), EntityId::new(41, 0)));
}

#[test]
fn wildcard_matching() {
    let likes = EntityId::new(40, 0);
    let bob = EntityId::new(41, 0);
    let alice = EntityId::new(42, 0);
    let pair = Id::pair(likes, bob);

    assert!(pair.matches(Id::pair(likes, EntityId::WILDCARD)));
    assert!(pair.matches(Id::pair(EntityId::WILDCARD, bob)));
    assert!(pair.matches(Id::pair(EntityId::WILDCARD, EntityId::WILDCARD)));
    assert!(!pair.matches(Id::pair(likes, alice)));
    assert!(!pair.matches(Id::WILDCARD));

    let plain = Id::from(alice);
    assert!(plain.matches(Id::WILDCARD));
    assert!(!plain.matches(Id::pair(EntityId::WILDCARD, EntityId::WILDCARD)));
}

#[test]
fn wildcard_patterns_cover_every_match() {
    let pair = Id::pair(EntityId::new(40, 0), EntityId::new(41, 0));
    let patterns = pair.wildcard_patterns();
    assert_eq!(patterns.len(), 3);
    for pattern in patterns {
        assert!(pattern.is_wildcard());
        assert!(pair.matches(pattern));
    }
    assert_eq!(Id::from(EntityId::new(40, 0)).wildcard_patterns(), vec![Id::WILDCARD]);
}

#[test]
fn any_is_detected_in_pairs() {
    assert!(Id::ANY.is_any());
    assert!(Id::pair(EntityId::CHILD_OF, EntityId::ANY).is_any());
    assert!(!Id::pair(EntityId::CHILD_OF, EntityId::WILDCARD).is_any());
}
