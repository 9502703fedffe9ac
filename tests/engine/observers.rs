//! Integration tests for observers and events

use std::sync::{Arc, Mutex};

use tessera::engine::{EventDesc, ObserverDesc, Term, World};
use tessera::foundation::{EntityId, Id, Type, Value};

type Log = Arc<Mutex<Vec<(EntityId, Id)>>>;

fn log() -> (Log, Log) {
    let log = Arc::new(Mutex::new(Vec::new()));
    (log.clone(), log)
}

fn entries(log: &Log) -> Vec<(EntityId, Id)> {
    log.lock().unwrap().clone()
}

// =============================================================================
// Built-in Events
// =============================================================================

#[test]
fn on_add_fires_once_the_filter_is_complete() {
    let mut world = World::new();
    let health = world.component("Health", Type::Int).unwrap();
    let armor = world.component("Armor", Type::Int).unwrap();
    let (seen, sink) = log();
    world
        .observer(
            ObserverDesc::new()
                .with(health)
                .with(armor)
                .event(EntityId::ON_ADD)
                .callback(move |it| {
                    if let (Some(e), Ok(mut sink)) = (it.entity(), sink.lock()) {
                        sink.push((e, it.event_id()));
                    }
                }),
        )
        .unwrap();

    let e = world.entity();
    world.set(e, health, 1).unwrap();
    assert!(entries(&seen).is_empty());
    world.set(e, armor, 1).unwrap();
    assert_eq!(entries(&seen), vec![(e, Id::from(armor))]);
}

#[test]
fn wildcard_observers_see_each_pair() {
    let mut world = World::new();
    let likes = world.entity_named("Likes");
    let (apple, pear) = (world.entity(), world.entity());
    let (seen, sink) = log();
    world
        .observer(
            ObserverDesc::new()
                .term(Term::pair(likes, EntityId::WILDCARD))
                .event(EntityId::ON_ADD)
                .callback(move |it| {
                    if let (Some(e), Ok(mut sink)) = (it.entity(), sink.lock()) {
                        sink.push((e, it.event_id()));
                    }
                }),
        )
        .unwrap();

    let e = world.entity();
    world.add_pair(e, likes, apple).unwrap();
    world.add_pair(e, likes, pear).unwrap();
    assert_eq!(
        entries(&seen),
        vec![(e, Id::pair(likes, apple)), (e, Id::pair(likes, pear))]
    );
}

#[test]
fn deferred_sets_notify_at_flush() {
    let mut world = World::new();
    let health = world.component("Health", Type::Int).unwrap();
    let values = Arc::new(Mutex::new(Vec::new()));
    let sink = values.clone();
    world
        .observer(
            ObserverDesc::new()
                .with(health)
                .event(EntityId::ON_SET)
                .callback(move |it| {
                    if let (Some(v), Ok(mut sink)) = (it.field(0).cloned(), sink.lock()) {
                        sink.push(v);
                    }
                }),
        )
        .unwrap();

    let e = world.entity();
    world.defer_begin();
    world.set(e, health, 5).unwrap();
    world.set(e, health, 6).unwrap();
    assert!(values.lock().unwrap().is_empty());
    world.defer_end().unwrap();
    assert_eq!(*values.lock().unwrap(), vec![Value::Int(5), Value::Int(6)]);
}

#[test]
fn monitors_respect_not_terms() {
    let mut world = World::new();
    let health = world.component("Health", Type::Int).unwrap();
    let dead = world.tag("Dead").unwrap();
    let (seen, sink) = log();
    world
        .observer(
            ObserverDesc::new()
                .with(health)
                .without(dead)
                .monitor()
                .callback(move |it| {
                    if let (Some(e), Ok(mut sink)) = (it.entity(), sink.lock()) {
                        sink.push((e, Id::from(it.event())));
                    }
                }),
        )
        .unwrap();

    let e = world.entity();
    world.set(e, health, 3).unwrap();
    world.add(e, dead).unwrap();
    world.remove(e, dead).unwrap();
    assert_eq!(
        entries(&seen),
        vec![
            (e, Id::from(EntityId::ON_ADD)),
            (e, Id::from(EntityId::ON_REMOVE)),
            (e, Id::from(EntityId::ON_ADD)),
        ]
    );
}

#[test]
fn observers_can_chain_through_commands() {
    let mut world = World::new();
    let burning = world.tag("Burning").unwrap();
    let smoking = world.tag("Smoking").unwrap();
    let (seen, sink) = log();
    world
        .observer(
            ObserverDesc::new()
                .with(burning)
                .event(EntityId::ON_ADD)
                .callback(move |it| {
                    if let Some(e) = it.entity() {
                        it.commands().add(e, smoking);
                    }
                }),
        )
        .unwrap();
    world
        .observer(
            ObserverDesc::new()
                .with(smoking)
                .event(EntityId::ON_ADD)
                .callback(move |it| {
                    if let (Some(e), Ok(mut sink)) = (it.entity(), sink.lock()) {
                        sink.push((e, it.event_id()));
                    }
                }),
        )
        .unwrap();

    let e = world.entity();
    world.add(e, burning).unwrap();
    assert!(world.has(e, smoking));
    assert_eq!(entries(&seen), vec![(e, Id::from(smoking))]);
}

// =============================================================================
// Custom Events
// =============================================================================

#[test]
fn custom_events_only_reach_matching_entities() {
    let mut world = World::new();
    let player = world.tag("Player").unwrap();
    let jumped = world.entity_named("Jumped");
    let heights = Arc::new(Mutex::new(Vec::new()));
    let sink = heights.clone();
    world
        .observer(
            ObserverDesc::new()
                .with(player)
                .event(jumped)
                .callback(move |it| {
                    if let (Some(h), Ok(mut sink)) = (it.payload().cloned(), sink.lock()) {
                        sink.push(h);
                    }
                }),
        )
        .unwrap();

    let hero = world.entity();
    world.add(hero, player).unwrap();
    let rock = world.entity();

    world
        .emit(EventDesc::new(jumped).id(player).entity(hero).payload(2.5))
        .unwrap();
    world
        .emit(EventDesc::new(jumped).id(player).entity(rock).payload(9.0))
        .unwrap();
    assert_eq!(*heights.lock().unwrap(), vec![Value::Float(2.5)]);
}
