//! Randomized checks that cached queries agree with a full rescan
//!
//! A seeded sequence of structural operations is applied to a world while
//! a few cached queries stay registered. After every step, each cache is
//! compared with the answer computed by scanning every live entity.

use std::collections::BTreeMap;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use tessera::engine::{QueryDesc, QueryId, Term, World};
use tessera::foundation::{EntityId, Id, Type};

// =============================================================================
// Helper Functions
// =============================================================================

struct Sim {
    world: World,
    rng: ChaCha8Rng,
    tags: Vec<EntityId>,
    health: EntityId,
    likes: EntityId,
    entities: Vec<EntityId>,
}

/// A query together with the brute-force predicate it must agree with.
struct Check {
    name: &'static str,
    query: QueryId,
    matches: Box<dyn Fn(&World, EntityId) -> usize>,
}

impl Sim {
    fn new(seed: u64) -> Self {
        let mut world = World::new();
        let tags = (0..4)
            .map(|i| world.tag(&format!("T{i}")).unwrap())
            .collect();
        let health = world.component("Health", Type::Int).unwrap();
        let likes = world.entity_named("Likes");
        Self {
            world,
            rng: ChaCha8Rng::seed_from_u64(seed),
            tags,
            health,
            likes,
            entities: Vec::new(),
        }
    }

    fn pick_entity(&mut self) -> Option<EntityId> {
        if self.entities.is_empty() {
            None
        } else {
            let i = self.rng.gen_range(0..self.entities.len());
            Some(self.entities[i])
        }
    }

    fn pick_tag(&mut self) -> EntityId {
        self.tags[self.rng.gen_range(0..self.tags.len())]
    }

    fn step(&mut self) {
        match self.rng.gen_range(0..10) {
            0 | 1 => {
                let e = self.world.entity();
                self.entities.push(e);
            }
            2 => {
                if let Some(e) = self.pick_entity() {
                    self.world.delete(e).unwrap();
                    self.entities.retain(|&x| x != e);
                }
            }
            3 | 4 => {
                if let Some(e) = self.pick_entity() {
                    let tag = self.pick_tag();
                    self.world.add(e, tag).unwrap();
                }
            }
            5 => {
                if let Some(e) = self.pick_entity() {
                    let tag = self.pick_tag();
                    self.world.remove(e, tag).unwrap();
                }
            }
            6 => {
                if let Some(e) = self.pick_entity() {
                    let hp = self.rng.gen_range(0..100_i64);
                    self.world.set(e, self.health, hp).unwrap();
                }
            }
            7 => {
                if let (Some(e), Some(target)) = (self.pick_entity(), self.pick_entity()) {
                    self.world.add_pair(e, self.likes, target).unwrap();
                }
            }
            8 => {
                if let Some(e) = self.pick_entity() {
                    let tags: Vec<EntityId> = self.tags.clone();
                    let count = self.rng.gen_range(1..=3);
                    self.world.defer_begin();
                    for &tag in tags.iter().take(count) {
                        if self.rng.gen_bool(0.5) {
                            self.world.add(e, tag).unwrap();
                        } else {
                            self.world.remove(e, tag).unwrap();
                        }
                    }
                    self.world.defer_end().unwrap();
                }
            }
            _ => {
                self.world.delete_empty_tables();
            }
        }
    }

    fn checks(&mut self) -> Vec<Check> {
        let (t0, t1, t2, t3) = (self.tags[0], self.tags[1], self.tags[2], self.tags[3]);
        let (health, likes) = (self.health, self.likes);
        let any_likes = Id::pair(likes, EntityId::WILDCARD);
        vec![
            Check {
                name: "with T0",
                query: self.world.query(QueryDesc::new().with(t0)).unwrap(),
                matches: Box::new(move |w: &World, e: EntityId| usize::from(w.owns(e, t0))),
            },
            Check {
                name: "T1 without T2",
                query: self
                    .world
                    .query(QueryDesc::new().with(t1).without(t2))
                    .unwrap(),
                matches: Box::new(move |w: &World, e: EntityId| {
                    usize::from(w.owns(e, t1) && !w.owns(e, t2))
                }),
            },
            Check {
                name: "Health optional T3",
                query: self
                    .world
                    .query(QueryDesc::new().with(health).optional(t3))
                    .unwrap(),
                matches: Box::new(move |w: &World, e: EntityId| usize::from(w.owns(e, health))),
            },
            Check {
                name: "(Likes, *)",
                query: self
                    .world
                    .query(QueryDesc::new().term(Term::new(any_likes)))
                    .unwrap(),
                matches: Box::new(move |w: &World, e: EntityId| {
                    w.type_of(e)
                        .map_or(0, |a| a.matching(any_likes).count())
                }),
            },
        ]
    }

    fn verify(&mut self, checks: &[Check], step: usize) {
        for check in checks {
            let mut expected: BTreeMap<EntityId, usize> = BTreeMap::new();
            for &e in &self.entities {
                let n = (check.matches)(&self.world, e);
                if n > 0 {
                    expected.insert(e, n);
                }
            }
            let mut actual: BTreeMap<EntityId, usize> = BTreeMap::new();
            for e in self.world.query_entities(check.query).unwrap() {
                *actual.entry(e).or_default() += 1;
            }
            assert_eq!(
                actual, expected,
                "query `{}` diverged from a rescan at step {step}",
                check.name
            );
            assert_eq!(
                self.world.count(check.query).unwrap(),
                expected.values().sum::<usize>()
            );
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[test]
fn caches_match_rescan_across_random_operations() {
    for seed in [1, 7, 42, 1234] {
        let mut sim = Sim::new(seed);
        let checks = sim.checks();
        for step in 0..400 {
            sim.step();
            sim.verify(&checks, step);
        }
    }
}

#[test]
fn late_registered_queries_match_rescan() {
    let mut sim = Sim::new(99);
    for _ in 0..300 {
        sim.step();
    }
    let checks = sim.checks();
    sim.verify(&checks, 300);
    for step in 300..500 {
        sim.step();
        sim.verify(&checks, step);
    }
}
