//! End-to-end scenarios

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tessera::engine::{ObserverDesc, QueryDesc, Term, World, WorldConfig};
use tessera::foundation::{EntityId, Member, Type, Value};

fn vec2() -> Type {
    Type::structure([Member::new("x", Type::Float), Member::new("y", Type::Float)])
}

fn xy(value: Option<&Value>) -> (f64, f64) {
    let member = |i| {
        value
            .and_then(|v| v.member(i))
            .and_then(Value::as_number)
            .unwrap_or(f64::NAN)
    };
    (member(0), member(1))
}

// =============================================================================
// Movement System
// =============================================================================

#[test]
fn movement_system_over_several_frames() {
    let mut world = World::new();
    let position = world.component("Position", vec2()).unwrap();
    let velocity = world.component("Velocity", vec2()).unwrap();
    let stunned = world.tag("Stunned").unwrap();

    let runner = world.entity();
    world.set(runner, position, Value::structure([0.into(), 0.into()])).unwrap();
    world.set(runner, velocity, Value::structure([1.into(), 2.into()])).unwrap();
    let dazed = world.entity();
    world.set(dazed, position, Value::structure([5.into(), 5.into()])).unwrap();
    world.set(dazed, velocity, Value::structure([1.into(), 1.into()])).unwrap();
    world.add(dazed, stunned).unwrap();
    let statue = world.entity();
    world.set(statue, position, Value::structure([9.into(), 9.into()])).unwrap();

    let movement = world
        .query(
            QueryDesc::new()
                .term(Term::new(position).write())
                .with(velocity)
                .without(stunned),
        )
        .unwrap();

    for _ in 0..3 {
        world
            .run(movement, |it| {
                let deltas: Vec<Value> = it.field(1).to_vec();
                for (p, v) in it.field_mut(0).unwrap().iter_mut().zip(deltas) {
                    let (px, py) = xy(Some(p));
                    let (vx, vy) = xy(Some(&v));
                    *p = Value::structure([Value::Float(px + vx), Value::Float(py + vy)]);
                }
            })
            .unwrap();
    }

    assert_eq!(xy(world.get(runner, position)), (3.0, 6.0));
    assert_eq!(xy(world.get(dazed, position)), (5.0, 5.0));
    assert_eq!(xy(world.get(statue, position)), (9.0, 9.0));

    world.remove(dazed, stunned).unwrap();
    world
        .run(movement, |it| {
            let deltas: Vec<Value> = it.field(1).to_vec();
            for (p, v) in it.field_mut(0).unwrap().iter_mut().zip(deltas) {
                let (px, py) = xy(Some(p));
                let (vx, vy) = xy(Some(&v));
                *p = Value::structure([Value::Float(px + vx), Value::Float(py + vy)]);
            }
        })
        .unwrap();
    assert_eq!(xy(world.get(dazed, position)), (6.0, 6.0));
}

// =============================================================================
// Cursor Editing
// =============================================================================

#[test]
fn cursor_edits_nested_members() {
    let mut world = World::new();
    let inventory = world
        .component(
            "Inventory",
            Type::structure([
                Member::new("gold", Type::Int),
                Member::new("items", Type::list(Type::String)),
            ]),
        )
        .unwrap();
    let e = world.entity();
    world.add(e, inventory).unwrap();

    {
        let mut cursor = world.cursor(e, inventory).unwrap();
        cursor.push().unwrap();
        cursor.member("gold").unwrap();
        cursor.set_int(120).unwrap();
        cursor.member("items").unwrap();
        cursor.push().unwrap();
        cursor.set_str("rope").unwrap();
        cursor.next().unwrap();
        cursor.set_str("lamp").unwrap();
    }

    let value = world.get(e, inventory).unwrap();
    assert_eq!(value.member(0), Some(&Value::Int(120)));
    assert_eq!(
        value.member(1),
        Some(&Value::list([Value::from("rope"), Value::from("lamp")]))
    );
}

// =============================================================================
// Scene Graph
// =============================================================================

#[test]
fn scene_graph_teardown_notifies_observers() {
    let mut world = World::new();
    let mesh = world.tag("Mesh").unwrap();
    let removed = Arc::new(AtomicUsize::new(0));
    let count = removed.clone();
    world
        .observer(
            ObserverDesc::new()
                .with(mesh)
                .event(EntityId::ON_REMOVE)
                .callback(move |_| {
                    count.fetch_add(1, Ordering::SeqCst);
                }),
        )
        .unwrap();

    let scene = world.entity_named("scene");
    let mut nodes = Vec::new();
    for i in 0..3 {
        let group = world.entity();
        world.add_pair(group, EntityId::CHILD_OF, scene).unwrap();
        for _ in 0..=i {
            let node = world.entity();
            world.add_pair(node, EntityId::CHILD_OF, group).unwrap();
            world.add(node, mesh).unwrap();
            nodes.push(node);
        }
        nodes.push(group);
    }

    let meshes = world.query(QueryDesc::new().with(mesh)).unwrap();
    assert_eq!(world.count(meshes).unwrap(), 6);

    world.delete(scene).unwrap();
    assert!(nodes.iter().all(|&n| !world.is_alive(n)));
    assert_eq!(world.lookup("scene"), None);
    assert_eq!(world.count(meshes).unwrap(), 0);
    assert_eq!(removed.load(Ordering::SeqCst), 6);
}

// =============================================================================
// Configuration
// =============================================================================

#[test]
fn configured_worlds_behave_alike() {
    for config in [
        WorldConfig::default(),
        WorldConfig::minimal(),
        WorldConfig::large(1024).with_max_traversal_depth(8),
    ] {
        let mut world = World::with_config(config);
        let tag = world.tag("Tag").unwrap();
        let query = world.query(QueryDesc::new().with(tag)).unwrap();
        let entities: Vec<EntityId> = (0..10).map(|_| world.entity()).collect();
        for &e in &entities[..5] {
            world.add(e, tag).unwrap();
        }
        assert_eq!(world.count(query).unwrap(), 5);
        world.delete(entities[0]).unwrap();
        assert_eq!(world.count(query).unwrap(), 4);
    }
}
