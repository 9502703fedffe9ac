//! Integration tests for deferred commands and stages

use tessera::engine::{Command, Commands, World};
use tessera::foundation::{ErrorKind, Id, Type, Value};

// =============================================================================
// Command Buffers
// =============================================================================

#[test]
fn commands_record_in_order() {
    let mut world = World::new();
    let tag = world.tag("Tag").unwrap();
    let e = world.entity();

    let mut commands = Commands::new();
    commands.add(e, tag).set(e, tag, 1).remove(e, tag).delete(e);
    assert_eq!(commands.len(), 4);
    let names: Vec<&str> = commands.as_slice().iter().map(Command::name).collect();
    assert_eq!(names, vec!["add", "set", "remove", "delete"]);
    assert_eq!(commands.as_slice()[0].entity(), Some(e));
    assert_eq!(commands.as_slice()[0].id(), Some(Id::from(tag)));
    assert_eq!(commands.as_slice()[3].id(), None);

    let mut other = Commands::new();
    other.clear(e);
    commands.append(&mut other);
    assert!(other.is_empty());
    assert_eq!(commands.take().len(), 5);
    assert!(commands.is_empty());
}

// =============================================================================
// Deferral
// =============================================================================

#[test]
fn entities_created_while_deferred_are_placed_at_flush() {
    let mut world = World::new();
    let health = world.component("Health", Type::Int).unwrap();

    let e = world
        .defer(|world| {
            let e = world.entity();
            assert!(world.is_alive(e));
            world.set(e, health, 9).unwrap();
            assert!(!world.has(e, health));
            e
        })
        .unwrap();
    assert_eq!(world.get(e, health), Some(&Value::Int(9)));
    assert_eq!(world.pending(), 0);
}

#[test]
fn flush_while_deferred_is_refused() {
    let mut world = World::new();
    world.defer_begin();
    let err = world.flush().unwrap_err();
    assert!(matches!(err.kind, ErrorKind::InvalidOperation(_)));
    world.defer_end().unwrap();

    let err = world.defer_end().unwrap_err();
    assert!(matches!(err.kind, ErrorKind::InvalidOperation(_)));
}

#[test]
fn flush_errors_carry_context() {
    let mut world = World::new();
    let health = world.component("Health", Type::Int).unwrap();
    let e = world.entity();

    world.defer_begin();
    world.set(e, health, "lots").unwrap();
    let err = world.defer_end().unwrap_err();
    let context = err.context.unwrap();
    assert_eq!(context.operation, Some("set"));
    assert_eq!(context.entity, Some(e));
    assert_eq!(context.id, Some(Id::from(health)));
}

// =============================================================================
// Stages
// =============================================================================

#[test]
fn stages_from_threads_merge_in_stage_order() {
    let mut world = World::new();
    let score = world.component("Score", Type::Int).unwrap();
    let players: Vec<_> = (0..4).map(|_| world.entity()).collect();

    let stages: Vec<_> = (0..4).map(|_| world.stage()).collect();
    let handles: Vec<_> = stages
        .into_iter()
        .enumerate()
        .map(|(i, mut stage)| {
            let players = players.clone();
            std::thread::spawn(move || {
                for &p in &players {
                    stage.set(p, score, i64::try_from(i).unwrap());
                }
                stage
            })
        })
        .collect();
    let mut merged: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    merged.sort_by_key(tessera::engine::Stage::id);

    world.merge(merged).unwrap();
    for &p in &players {
        assert_eq!(world.get(p, score), Some(&Value::Int(3)));
    }
}
