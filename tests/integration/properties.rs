//! Property tests for structural operations

use proptest::prelude::*;

use tessera::engine::World;
use tessera::foundation::{EntityId, Id};

fn world_with_tags(count: usize) -> (World, Vec<EntityId>) {
    let mut world = World::new();
    let tags = (0..count)
        .map(|i| world.tag(&format!("Tag{i}")).unwrap())
        .collect();
    (world, tags)
}

fn sorted_ids(world: &World, e: EntityId) -> Vec<Id> {
    world
        .type_of(e)
        .map(|a| a.ids().to_vec())
        .unwrap_or_default()
}

proptest! {
    #[test]
    fn add_order_lands_in_the_same_table(order in Just((0..6usize).collect::<Vec<_>>()).prop_shuffle()) {
        let (mut world, tags) = world_with_tags(6);
        let forward = world.entity();
        for &tag in &tags {
            world.add(forward, tag).unwrap();
        }
        let shuffled = world.entity();
        for &i in &order {
            world.add(shuffled, tags[i]).unwrap();
        }

        let a = world.store().table_of(forward).unwrap().id();
        let b = world.store().table_of(shuffled).unwrap().id();
        prop_assert_eq!(a, b);
        prop_assert_eq!(sorted_ids(&world, forward), sorted_ids(&world, shuffled));
    }

    #[test]
    fn add_then_remove_restores_the_type(
        base in prop::collection::vec(0..8usize, 0..4),
        extra in 0..8usize,
    ) {
        let (mut world, tags) = world_with_tags(8);
        let e = world.entity();
        for &i in &base {
            world.add(e, tags[i]).unwrap();
        }
        prop_assume!(!base.contains(&extra));

        let before = world.store().table_of(e).unwrap().id();
        world.add(e, tags[extra]).unwrap();
        world.remove(e, tags[extra]).unwrap();
        prop_assert_eq!(world.store().table_of(e).unwrap().id(), before);
    }

    #[test]
    fn repeated_adds_are_idempotent(repeats in 1..5usize) {
        let (mut world, tags) = world_with_tags(1);
        let e = world.entity();
        world.add(e, tags[0]).unwrap();
        let moves = world.store().stats().table_moves;
        for _ in 0..repeats {
            world.add(e, tags[0]).unwrap();
        }
        prop_assert_eq!(world.store().stats().table_moves, moves);
    }

    #[test]
    fn recycled_ids_never_alias(deletes in 1..20usize) {
        let mut world = World::new();
        let mut dead = Vec::new();
        for _ in 0..deletes {
            let e = world.entity();
            world.delete(e).unwrap();
            dead.push(e);
        }
        let fresh = world.entity();
        prop_assert!(world.is_alive(fresh));
        for e in dead {
            prop_assert!(!world.is_alive(e));
            prop_assert_ne!(e, fresh);
        }
    }
}
