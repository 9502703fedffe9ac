//! Observer registration and event dispatch.

use std::collections::{HashMap, HashSet};

use tracing::{debug, trace, warn};

use tessera_foundation::{EntityId, Error, Id, Result, Value};
use tessera_storage::TableId;

use super::World;
use crate::commands::{Command, Commands};
use crate::observer::{EventDesc, Observer, ObserverDesc, ObserverId, ObserverIter};
use crate::query::cache::{Compiled, FieldMatch, FieldSource};
use crate::query::term::TermSource;

/// One pending observer call.
struct Invocation {
    observer: ObserverId,
    event: EntityId,
    event_id: Id,
    entity: Option<EntityId>,
    table: Option<TableId>,
    fields: Vec<FieldMatch>,
}

/// A monitor whose filter an entity enters or leaves.
pub(super) struct MonitorChange {
    observer: ObserverId,
    enter: bool,
    event_id: Id,
    table: TableId,
    fields: Vec<FieldMatch>,
}

/// What an up observer resolves through relationships for one entity.
struct UpState {
    entity: EntityId,
    observer: ObserverId,
    table: TableId,
    fields: Vec<FieldMatch>,
    shared: Vec<(Id, EntityId)>,
}

impl World {
    /// Registers an observer.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for an invalid description and `NotAlive`
    /// for a dead fixed source.
    pub fn observer(&mut self, desc: ObserverDesc) -> Result<ObserverId> {
        desc.validate()?;
        for term in &desc.terms {
            if let TermSource::Fixed(source) = term.src {
                self.store.entities().validate(source)?;
            }
        }
        let callback = desc
            .callback
            .clone()
            .ok_or_else(|| Error::invalid_parameter("observer has no callback"))?;
        let compiled = Compiled::new(desc.terms.clone(), self.store.registry(), false, false);
        let yield_existing = desc.yield_existing;
        let observer = Observer::new(desc, compiled, callback);
        let (events, monitor) = (observer.events.clone(), observer.monitor);
        let id = self.observers.insert(observer);
        debug!(observer = id.index(), ?events, monitor, "observer registered");
        if yield_existing {
            self.yield_existing(id);
        }
        self.settle()?;
        Ok(id)
    }

    /// Unregisters an observer. Returns false if it was already removed.
    pub fn remove_observer(&mut self, observer: ObserverId) -> bool {
        let removed = self.observers.remove(observer);
        if removed {
            debug!(observer = observer.index(), "observer removed");
        }
        removed
    }

    /// Emits a custom event now (or at the next flush while deferred).
    ///
    /// # Errors
    ///
    /// Returns `NotAlive` if the event names a dead entity.
    pub fn emit(&mut self, desc: EventDesc) -> Result<()> {
        self.submit(Command::Emit(desc))
    }

    /// Queues a custom event for the next flush.
    pub fn enqueue(&mut self, desc: EventDesc) {
        self.record(Command::Emit(desc));
    }

    pub(super) fn emit_now(&mut self, desc: &EventDesc) -> Result<()> {
        let ids = if desc.ids.is_empty() {
            vec![Id::WILDCARD]
        } else {
            desc.ids.clone()
        };
        match desc.entity {
            Some(entity) => {
                self.store.entities().validate(entity)?;
                let table = self.table_id_of(entity).unwrap_or(TableId::ROOT);
                for id in ids {
                    self.emit_id(desc.event, id, entity, table, desc.payload.as_ref());
                }
            }
            None => {
                for id in ids {
                    for observer in self.observers.candidates(desc.event, id) {
                        let fields = self
                            .observers
                            .get(observer)
                            .map(|o| {
                                o.compiled
                                    .terms
                                    .iter()
                                    .map(|t| FieldMatch::not_set(t.id))
                                    .collect()
                            })
                            .unwrap_or_default();
                        let invocation = Invocation {
                            observer,
                            event: desc.event,
                            event_id: id,
                            entity: None,
                            table: None,
                            fields,
                        };
                        self.invoke(invocation, desc.payload.clone());
                    }
                }
            }
        }
        Ok(())
    }

    /// Notifies observers of `event` for `id` on `entity`, which currently
    /// lives in `table`, then propagates to entities that reach `entity`
    /// through a traversed relationship.
    pub(super) fn emit_id(
        &mut self,
        event: EntityId,
        id: Id,
        entity: EntityId,
        table: TableId,
        payload: Option<&Value>,
    ) {
        let candidates = self.observers.candidates(event, id);
        if candidates.is_empty() {
            return;
        }
        trace!(event = %event, id = %id, entity = %entity, "event emitted");

        let mut invocations = Vec::new();
        if let Some(t) = self.store.table(table) {
            let matcher = self.matcher();
            for &observer in &candidates {
                let Some(o) = self.observers.get(observer) else {
                    continue;
                };
                let hit = matcher
                    .match_table(&o.compiled, t)
                    .into_iter()
                    .find(|fields| o.triggered_by(fields, id, FieldSource::This));
                if let Some(fields) = hit {
                    invocations.push(Invocation {
                        observer,
                        event,
                        event_id: id,
                        entity: Some(entity),
                        table: Some(table),
                        fields,
                    });
                }
            }
        }
        for invocation in invocations {
            self.invoke(invocation, payload.cloned());
        }
        self.propagate(event, id, entity, &candidates, payload);
    }

    fn propagate(
        &mut self,
        event: EntityId,
        id: Id,
        origin: EntityId,
        candidates: &[ObserverId],
        payload: Option<&Value>,
    ) {
        if !self.observers.has_up() || !self.store.entities().is_traversed(origin) {
            return;
        }
        let up: Vec<ObserverId> = candidates
            .iter()
            .copied()
            .filter(|&o| self.observers.get(o).is_some_and(|o| !o.up_rels.is_empty()))
            .collect();
        if up.is_empty() {
            return;
        }
        let rels = self.up_rels(&up);

        let mut invocations = Vec::new();
        let matcher = self.matcher();
        for (entity, table) in self.descendants(&[origin], &rels) {
            let Some(t) = self.store.table(table) else {
                continue;
            };
            for &observer in &up {
                let Some(o) = self.observers.get(observer) else {
                    continue;
                };
                let hit = matcher
                    .match_table(&o.compiled, t)
                    .into_iter()
                    .find(|fields| o.triggered_by(fields, id, FieldSource::Shared(origin)));
                if let Some(fields) = hit {
                    invocations.push(Invocation {
                        observer,
                        event,
                        event_id: id,
                        entity: Some(entity),
                        table: Some(table),
                        fields,
                    });
                }
            }
        }
        if !invocations.is_empty() {
            trace!(event = %event, id = %id, origin = %origin, count = invocations.len(), "event propagated");
        }
        for invocation in invocations {
            self.invoke(invocation, payload.cloned());
        }
    }

    fn invoke(&mut self, invocation: Invocation, payload: Option<Value>) {
        let Some(callback) = self
            .observers
            .get(invocation.observer)
            .map(|o| o.callback.clone())
        else {
            return;
        };
        let mut it = ObserverIter {
            world: &*self,
            event: invocation.event,
            event_id: invocation.event_id,
            entity: invocation.entity,
            table: invocation.table,
            fields: invocation.fields,
            payload,
            commands: Commands::new(),
        };
        callback(&mut it);
        let commands = it.into_commands();
        if self.config.track_stats {
            self.stats.observers_invoked += 1;
        }
        for command in commands {
            self.record(command);
        }
    }

    fn yield_existing(&mut self, id: ObserverId) {
        let mut invocations = Vec::new();
        if let Some(o) = self.observers.get(id) {
            let matcher = self.matcher();
            for table in self.store.tables().filter(|t| !t.is_empty()) {
                let Some(fields) = matcher.match_table(&o.compiled, table).into_iter().next() else {
                    continue;
                };
                let mut events = Vec::new();
                if o.monitor {
                    events.push((EntityId::ON_ADD, fields[o.triggers[0]].id));
                } else {
                    for event in [EntityId::ON_ADD, EntityId::ON_SET] {
                        if !o.observes(event) {
                            continue;
                        }
                        for &t in &o.triggers {
                            let field = &fields[t];
                            if field.is_set() && (event != EntityId::ON_SET || field.column.is_some()) {
                                events.push((event, field.id));
                            }
                        }
                    }
                }
                for &entity in table.entities() {
                    for &(event, event_id) in &events {
                        invocations.push(Invocation {
                            observer: id,
                            event,
                            event_id,
                            entity: Some(entity),
                            table: Some(table.id()),
                            fields: fields.clone(),
                        });
                    }
                }
            }
        }
        trace!(observer = id.index(), count = invocations.len(), "existing entities yielded");
        for invocation in invocations {
            self.invoke(invocation, None);
        }
    }

    // --- Moves ---

    /// Moves an entity and emits `OnRemove` (before), `OnAdd` and `OnSet`
    /// (after) for the ids that changed, plus monitor and up-observer
    /// transitions.
    pub(super) fn move_with_events(
        &mut self,
        entity: EntityId,
        src: Option<TableId>,
        dst: TableId,
        mut init: HashMap<Id, Value>,
        set: &[Id],
    ) -> Result<()> {
        if src == Some(dst) {
            return Ok(());
        }
        let (removed, added) = self.diff(src, dst)?;
        let monitors = self.monitor_changes(src, Some(dst));
        let affected = self.up_affected(&[entity], &removed, &added);
        let before = affected.as_ref().map(|a| self.up_snapshot(a));

        if let Some(from) = src {
            for &id in &removed {
                self.emit_id(EntityId::ON_REMOVE, id, entity, from, None);
            }
        }
        self.fire_monitors(&monitors, false, entity);

        let traversed = self.store.entities().is_traversed(entity);
        self.store.move_entity(entity, dst, &mut |id| init.remove(&id))?;
        self.sync_tables();
        if traversed {
            self.rematch_queries();
        }

        for &id in &added {
            self.emit_id(EntityId::ON_ADD, id, entity, dst, None);
        }
        for &id in set {
            self.emit_id(EntityId::ON_SET, id, entity, dst, None);
        }
        self.fire_monitors(&monitors, true, entity);
        if let (Some(affected), Some(before)) = (affected, before) {
            let after = self.up_snapshot(&affected);
            self.fire_up_diff(&before, &after);
        }
        Ok(())
    }

    /// Moves every row of `src` to `dst` in one pass, with the same events
    /// as [`World::move_with_events`] for each row.
    pub(super) fn move_table_with_events(&mut self, src: TableId, dst: TableId) -> Result<()> {
        if src == dst {
            return Ok(());
        }
        let entities = self.table(src)?.entities().to_vec();
        if entities.is_empty() {
            return Ok(());
        }
        let (removed, added) = self.diff(Some(src), dst)?;
        let monitors = self.monitor_changes(Some(src), Some(dst));
        let affected = self.up_affected(&entities, &removed, &added);
        let before = affected.as_ref().map(|a| self.up_snapshot(a));

        for &entity in &entities {
            for &id in &removed {
                self.emit_id(EntityId::ON_REMOVE, id, entity, src, None);
            }
            self.fire_monitors(&monitors, false, entity);
        }

        let traversed = entities
            .iter()
            .any(|&e| self.store.entities().is_traversed(e));
        self.store.move_table(src, dst, &mut |_, _| None)?;
        self.sync_tables();
        if traversed {
            self.rematch_queries();
        }

        for &entity in &entities {
            for &id in &added {
                self.emit_id(EntityId::ON_ADD, id, entity, dst, None);
            }
            self.fire_monitors(&monitors, true, entity);
        }
        if let (Some(affected), Some(before)) = (affected, before) {
            let after = self.up_snapshot(&affected);
            self.fire_up_diff(&before, &after);
        }
        Ok(())
    }

    /// Ids only in `src`, and ids only in `dst`.
    fn diff(&self, src: Option<TableId>, dst: TableId) -> Result<(Vec<Id>, Vec<Id>)> {
        let to = self.table(dst)?.archetype();
        Ok(match src.and_then(|s| self.store.table(s)) {
            Some(from) => (
                from.archetype().difference(to).collect(),
                to.difference(from.archetype()).collect(),
            ),
            None => (Vec::new(), to.ids().to_vec()),
        })
    }

    // --- Monitors ---

    pub(super) fn monitor_changes(&self, from: Option<TableId>, to: Option<TableId>) -> Vec<MonitorChange> {
        if self.observers.monitors().is_empty() {
            return Vec::new();
        }
        let matcher = self.matcher();
        let first = |compiled: &Compiled, table: Option<TableId>| {
            let table = self.store.table(table?)?;
            matcher.match_table(compiled, table).into_iter().next()
        };
        let mut changes = Vec::new();
        for &observer in self.observers.monitors() {
            let Some(o) = self.observers.get(observer) else {
                continue;
            };
            let (fields, enter, table) = match (first(&o.compiled, from), first(&o.compiled, to)) {
                (Some(fields), None) => (fields, false, from),
                (None, Some(fields)) => (fields, true, to),
                _ => continue,
            };
            let (Some(table), Some(&trigger)) = (table, o.triggers.first()) else {
                continue;
            };
            changes.push(MonitorChange {
                observer,
                enter,
                event_id: fields[trigger].id,
                table,
                fields,
            });
        }
        changes
    }

    pub(super) fn fire_monitors(&mut self, changes: &[MonitorChange], enter: bool, entity: EntityId) {
        for change in changes.iter().filter(|c| c.enter == enter) {
            let event = if enter {
                EntityId::ON_ADD
            } else {
                EntityId::ON_REMOVE
            };
            let invocation = Invocation {
                observer: change.observer,
                event,
                event_id: change.event_id,
                entity: Some(entity),
                table: Some(change.table),
                fields: change.fields.clone(),
            };
            self.invoke(invocation, None);
        }
    }

    // --- Up observers ---

    fn up_rels(&self, observers: &[ObserverId]) -> Vec<EntityId> {
        let mut rels: Vec<EntityId> = observers
            .iter()
            .filter_map(|&o| self.observers.get(o))
            .flat_map(|o| o.up_rels.iter().copied())
            .collect();
        rels.sort_unstable();
        rels.dedup();
        rels
    }

    /// Entities reaching any of `roots` through `rels`, with their tables.
    pub(super) fn descendants(
        &self,
        roots: &[EntityId],
        rels: &[EntityId],
    ) -> Vec<(EntityId, TableId)> {
        let mut found = Vec::new();
        let mut visited: HashSet<EntityId> = roots.iter().copied().collect();
        let mut frontier: Vec<(EntityId, usize)> = roots.iter().map(|&r| (r, 0)).collect();
        while let Some((ancestor, depth)) = frontier.pop() {
            if depth >= self.config.max_traversal_depth {
                warn!(entity = %ancestor, depth, "traversal depth limit reached");
                continue;
            }
            for &rel in rels {
                for record in self.store.id_index().tables(Id::pair(rel, ancestor)) {
                    let Some(table) = self.store.table(record.table) else {
                        continue;
                    };
                    for &entity in table.entities() {
                        if visited.insert(entity) {
                            found.push((entity, table.id()));
                            frontier.push((entity, depth + 1));
                        }
                    }
                }
            }
        }
        found
    }

    /// Entities whose up resolution can change when `removed`/`added`
    /// change on `entities`; `None` if no up observer can notice.
    fn up_affected(
        &self,
        entities: &[EntityId],
        removed: &[Id],
        added: &[Id],
    ) -> Option<Vec<EntityId>> {
        if !self.observers.has_up() {
            return None;
        }
        let registry = self.store.registry();
        let traversal_changed = removed
            .iter()
            .chain(added)
            .any(|id| id.is_pair() && registry.relationship(id.first()).traversable);
        if !traversal_changed {
            return None;
        }
        let rels = self.up_rels(&self.observers.up_observers());
        let mut affected = entities.to_vec();
        affected.extend(self.descendants(entities, &rels).into_iter().map(|(e, _)| e));
        Some(affected)
    }

    fn up_snapshot(&self, entities: &[EntityId]) -> Vec<UpState> {
        let observers = self.observers.up_observers();
        let matcher = self.matcher();
        let mut states = Vec::new();
        for &entity in entities {
            let Some(table) = self.store.table_of(entity) else {
                continue;
            };
            for &observer in &observers {
                let Some(o) = self.observers.get(observer) else {
                    continue;
                };
                let Some(fields) = matcher.match_table(&o.compiled, table).into_iter().next() else {
                    continue;
                };
                let shared: Vec<(Id, EntityId)> = o
                    .triggers
                    .iter()
                    .filter_map(|&t| match fields[t].source {
                        FieldSource::Shared(source) => Some((fields[t].id, source)),
                        FieldSource::This | FieldSource::NotSet => None,
                    })
                    .collect();
                if !shared.is_empty() {
                    states.push(UpState {
                        entity,
                        observer,
                        table: table.id(),
                        fields,
                        shared,
                    });
                }
            }
        }
        states
    }

    /// Fires `OnRemove` for ids an entity stopped reaching through a
    /// relationship and `OnAdd` for ids it started reaching.
    fn fire_up_diff(&mut self, before: &[UpState], after: &[UpState]) {
        let find = |states: &[UpState], entity: EntityId, observer: ObserverId| {
            states
                .iter()
                .position(|s| s.entity == entity && s.observer == observer)
        };
        let mut invocations = Vec::new();
        for (event, from, to) in [
            (EntityId::ON_REMOVE, before, after),
            (EntityId::ON_ADD, after, before),
        ] {
            for state in from {
                if !self
                    .observers
                    .get(state.observer)
                    .is_some_and(|o| o.observes(event))
                {
                    continue;
                }
                let other = find(to, state.entity, state.observer).map(|i| &to[i]);
                for &(id, source) in &state.shared {
                    if other.is_some_and(|o| o.shared.contains(&(id, source))) {
                        continue;
                    }
                    invocations.push(Invocation {
                        observer: state.observer,
                        event,
                        event_id: id,
                        entity: Some(state.entity),
                        table: Some(state.table),
                        fields: state.fields.clone(),
                    });
                }
            }
        }
        for invocation in invocations {
            self.invoke(invocation, None);
        }
    }
}
