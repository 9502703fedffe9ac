//! The world: entities, components and the operations that change them.
//!
//! Every live entity sits in exactly one table (entities without ids sit in
//! the root table). Structural changes move the entity along the table
//! graph, keep query caches in step with created and deleted tables, and
//! emit `OnRemove`/`OnAdd`/`OnSet` around the move.
//!
//! While deferred, the same operations are recorded as [`Command`]s and
//! replayed in submission order by the outermost `defer_end`.

mod cleanup;
mod events;
mod queries;


use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use tessera_foundation::{EntityId, Error, ErrorContext, Id, Result, Type, Value};
use tessera_storage::{
    Archetype, ComponentSchema, OnInstantiate, RelationshipSchema, Table, TableEvent, TableId,
    TableStore,
};

use crate::commands::{Command, Commands, Stage};
use crate::config::{WorldConfig, WorldStats};
use crate::cursor::Cursor;
use crate::observer::ObserverSet;
use crate::query::cache::{FieldSource, Matcher, QueryCache};

const BUILTIN_NAMES: [(EntityId, &str); 9] = [
    (EntityId::WILDCARD, "*"),
    (EntityId::ANY, "_"),
    (EntityId::CHILD_OF, "ChildOf"),
    (EntityId::IS_A, "IsA"),
    (EntityId::PREFAB, "Prefab"),
    (EntityId::DISABLED, "Disabled"),
    (EntityId::ON_ADD, "OnAdd"),
    (EntityId::ON_REMOVE, "OnRemove"),
    (EntityId::ON_SET, "OnSet"),
];

/// An in-process entity store.
pub struct World {
    pub(crate) store: TableStore,
    queries: Vec<Option<QueryCache>>,
    observers: ObserverSet,
    commands: Commands,
    defer_depth: usize,
    flushing: bool,
    /// Entities deleted by the flush in progress.
    flush_deleted: HashSet<EntityId>,
    next_stage: usize,
    names: HashMap<Arc<str>, EntityId>,
    entity_names: HashMap<EntityId, Arc<str>>,
    stats: WorldStats,
    config: WorldConfig,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    /// Creates a world with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(WorldConfig::default())
    }

    /// Creates a world.
    ///
    /// # Panics
    ///
    /// Panics if a builtin entity cannot take its reserved index, which
    /// means the entity index is broken.
    #[must_use]
    pub fn with_config(config: WorldConfig) -> Self {
        let mut world = Self {
            store: TableStore::with_capacity(config.entity_capacity),
            queries: Vec::new(),
            observers: ObserverSet::default(),
            commands: Commands::new(),
            defer_depth: 0,
            flushing: false,
            flush_deleted: HashSet::new(),
            next_stage: 0,
            names: HashMap::new(),
            entity_names: HashMap::new(),
            stats: WorldStats::default(),
            config,
        };
        for (builtin, name) in BUILTIN_NAMES {
            let placed = world
                .store
                .entities_mut()
                .ensure(builtin)
                .and_then(|()| world.store.move_entity(builtin, TableId::ROOT, &mut |_| None));
            if let Err(err) = placed {
                panic!("builtin {builtin} cannot take its reserved index: {err}");
            }
            world.bind_name(builtin, name.into());
        }
        world.store.take_events();
        debug!(
            max_traversal_depth = world.config.max_traversal_depth,
            entity_capacity = world.config.entity_capacity,
            "world created"
        );
        world
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// Work counters; all zero when `track_stats` is off.
    #[must_use]
    pub fn stats(&self) -> WorldStats {
        if !self.config.track_stats {
            return WorldStats::default();
        }
        let store = self.store.stats();
        WorldStats {
            tables_created: store.tables_created,
            tables_deleted: store.tables_deleted,
            table_moves: store.table_moves,
            ..self.stats
        }
    }

    /// Read access to the underlying tables.
    #[must_use]
    pub fn store(&self) -> &TableStore {
        &self.store
    }

    // --- Entities and names ---

    /// Creates an entity with no ids.
    ///
    /// # Panics
    ///
    /// Panics if the freshly allocated entity cannot be placed, which means
    /// the entity index is broken.
    pub fn entity(&mut self) -> EntityId {
        let entity = self.store.entities_mut().allocate();
        if self.is_deferred() {
            self.record(Command::New(entity));
        } else if let Err(err) = self.place(entity) {
            panic!("fresh {entity} cannot be placed: {err}");
        }
        entity
    }

    /// Returns the entity with `name`, creating it if needed.
    pub fn entity_named(&mut self, name: &str) -> EntityId {
        if let Some(entity) = self.lookup(name) {
            return entity;
        }
        let entity = self.entity();
        self.bind_name(entity, name.into());
        entity
    }

    /// Finds an entity by name.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<EntityId> {
        self.names
            .get(name)
            .copied()
            .filter(|&e| self.store.entities().is_alive(e))
    }

    /// The name of an entity.
    #[must_use]
    pub fn name(&self, entity: EntityId) -> Option<&str> {
        self.entity_names.get(&entity).map(AsRef::as_ref)
    }

    /// Names an entity, replacing its previous name.
    ///
    /// # Errors
    ///
    /// Returns `NotAlive` for a dead entity and `AlreadyDefined` if another
    /// entity has the name.
    pub fn set_name(&mut self, entity: EntityId, name: &str) -> Result<()> {
        self.store.entities().validate(entity)?;
        match self.lookup(name) {
            Some(owner) if owner == entity => return Ok(()),
            Some(owner) => {
                return Err(Error::already_defined(format!(
                    "name {name:?} (held by {owner})"
                )));
            }
            None => {}
        }
        self.release_name(entity);
        self.bind_name(entity, name.into());
        Ok(())
    }

    fn bind_name(&mut self, entity: EntityId, name: Arc<str>) {
        self.names.insert(name.clone(), entity);
        self.entity_names.insert(entity, name);
    }

    fn release_name(&mut self, entity: EntityId) {
        if let Some(name) = self.entity_names.remove(&entity) {
            self.names.remove(&name);
        }
    }

    /// Returns true if the entity is alive.
    #[must_use]
    pub fn is_alive(&self, entity: EntityId) -> bool {
        self.store.entities().is_alive(entity)
    }

    // --- Registration ---

    /// Creates a named component carrying values of `ty`.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyDefined` if the name is taken.
    pub fn component(&mut self, name: &str, ty: Type) -> Result<EntityId> {
        let entity = self.define(name)?;
        self.register_component(entity, ComponentSchema::new(name, ty))?;
        Ok(entity)
    }

    /// Creates a named tag.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyDefined` if the name is taken.
    pub fn tag(&mut self, name: &str) -> Result<EntityId> {
        let entity = self.define(name)?;
        self.register_component(entity, ComponentSchema::tag(name))?;
        Ok(entity)
    }

    /// Creates a named relationship.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyDefined` if the name is taken.
    pub fn relationship(&mut self, name: &str, schema: RelationshipSchema) -> Result<EntityId> {
        let entity = self.define(name)?;
        self.register_relationship(entity, schema)?;
        Ok(entity)
    }

    fn define(&mut self, name: &str) -> Result<EntityId> {
        if let Some(owner) = self.lookup(name) {
            return Err(Error::already_defined(format!(
                "name {name:?} (held by {owner})"
            )));
        }
        let entity = self.entity();
        self.bind_name(entity, name.into());
        Ok(entity)
    }

    /// Attaches a component schema to an existing entity.
    ///
    /// # Errors
    ///
    /// Returns `NotAlive` for a dead entity and `AlreadyInUse` once the
    /// entity has been used as an id.
    pub fn register_component(&mut self, entity: EntityId, schema: ComponentSchema) -> Result<()> {
        self.store.entities().validate(entity)?;
        self.check_unused(entity)?;
        debug!(entity = %entity, name = %schema.name, tag = schema.is_tag(), "component registered");
        self.store.registry_mut().insert_component(entity, schema)
    }

    /// Attaches relationship traits to an existing entity.
    ///
    /// # Errors
    ///
    /// Returns `NotAlive` for a dead entity and `AlreadyInUse` once the
    /// entity has been used in a pair.
    pub fn register_relationship(
        &mut self,
        entity: EntityId,
        schema: RelationshipSchema,
    ) -> Result<()> {
        self.store.entities().validate(entity)?;
        self.check_unused(entity)?;
        debug!(entity = %entity, ?schema, "relationship registered");
        self.store.registry_mut().insert_relationship(entity, schema)
    }

    fn check_unused(&self, entity: EntityId) -> Result<()> {
        let index = self.store.id_index();
        if index.is_used(Id::from(entity))
            || index.is_used(Id::pair(entity, EntityId::WILDCARD))
            || index.is_used(Id::pair(EntityId::WILDCARD, entity))
        {
            return Err(Error::already_in_use(format!(
                "{entity} is already used as an id"
            )));
        }
        Ok(())
    }

    // --- Structural operations ---

    /// Adds an id. Adding an id the entity already has does nothing.
    ///
    /// Adding `(IsA, base)` instantiates `base`: its overridable components
    /// are copied in the same move.
    ///
    /// # Errors
    ///
    /// - `NotAlive` if the entity or an element of the id is dead
    /// - `InvalidParameter` for wildcard ids
    /// - `InvalidOperation` if an acyclic relationship would form a cycle
    pub fn add(&mut self, entity: EntityId, id: impl Into<Id>) -> Result<()> {
        self.submit(Command::Add(entity, id.into()))
    }

    /// Adds the pair `(rel, target)`.
    ///
    /// # Errors
    ///
    /// See [`World::add`].
    pub fn add_pair(&mut self, entity: EntityId, rel: EntityId, target: EntityId) -> Result<()> {
        self.add(entity, Id::pair(rel, target))
    }

    /// Removes an id; a wildcard removes every matching id. Removing an id
    /// the entity lacks does nothing.
    ///
    /// # Errors
    ///
    /// Returns `NotAlive` for a dead entity.
    pub fn remove(&mut self, entity: EntityId, id: impl Into<Id>) -> Result<()> {
        self.submit(Command::Remove(entity, id.into()))
    }

    /// Sets a component value, adding the component if missing, and emits
    /// `OnSet`.
    ///
    /// # Errors
    ///
    /// - `InvalidParameter` if the id is a tag
    /// - `TypeMismatch` if the value does not fit the component type
    /// - see [`World::add`]
    pub fn set(&mut self, entity: EntityId, id: impl Into<Id>, value: impl Into<Value>) -> Result<()> {
        self.submit(Command::Set(entity, id.into(), value.into()))
    }

    /// Marks a component written through [`World::get_mut`] or a cursor and
    /// emits `OnSet`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if the entity does not own the component.
    pub fn modified(&mut self, entity: EntityId, id: impl Into<Id>) -> Result<()> {
        self.submit(Command::Modified(entity, id.into()))
    }

    /// Deletes an entity, applying the cleanup policies of every id that
    /// refers to it.
    ///
    /// # Errors
    ///
    /// - `NotAlive` for a dead entity
    /// - `InvalidOperation` for builtins, or when a `Panic` policy refuses
    pub fn delete(&mut self, entity: EntityId) -> Result<()> {
        self.submit(Command::Delete(entity))
    }

    /// Removes every id from an entity.
    ///
    /// # Errors
    ///
    /// Returns `NotAlive` for a dead entity.
    pub fn clear(&mut self, entity: EntityId) -> Result<()> {
        self.submit(Command::Clear(entity))
    }

    /// Deletes every entity holding an id (or an id matching a pattern).
    ///
    /// # Errors
    ///
    /// Returns the first error of a per-entity delete.
    pub fn delete_with(&mut self, id: impl Into<Id>) -> Result<()> {
        self.submit(Command::DeleteWith(id.into()))
    }

    /// Removes an id (or every id matching a pattern) from every holder.
    ///
    /// # Errors
    ///
    /// Only internal errors.
    pub fn remove_all(&mut self, id: impl Into<Id>) -> Result<()> {
        self.submit(Command::RemoveAll(id.into()))
    }

    /// Creates an instance of `base`.
    ///
    /// # Errors
    ///
    /// Returns `NotAlive` if the base is dead.
    pub fn instantiate(&mut self, base: EntityId) -> Result<EntityId> {
        self.store.entities().validate(base)?;
        let instance = self.entity();
        self.add(instance, Id::pair(EntityId::IS_A, base))?;
        Ok(instance)
    }

    /// Sets the singleton value of a component (stored on the component
    /// entity itself).
    ///
    /// # Errors
    ///
    /// See [`World::set`].
    pub fn set_singleton(&mut self, component: EntityId, value: impl Into<Value>) -> Result<()> {
        self.set(component, component, value)
    }

    /// Reads the singleton value of a component.
    #[must_use]
    pub fn get_singleton(&self, component: EntityId) -> Option<&Value> {
        self.get(component, component)
    }

    /// Deletes empty tables (except the root) and unlinks them from every
    /// cache. Returns the number deleted.
    pub fn delete_empty_tables(&mut self) -> usize {
        let deleted = self.store.delete_empty_tables();
        self.sync_tables();
        deleted
    }

    // --- Reads ---

    /// Returns true if the entity has the id, owned or inherited through
    /// `IsA`. Wildcards test for any match.
    #[must_use]
    pub fn has(&self, entity: EntityId, id: impl Into<Id>) -> bool {
        let id = id.into();
        let Some(table) = self.store.table_of(entity) else {
            return false;
        };
        if table.archetype().matching(id).next().is_some() {
            return true;
        }
        !id.is_wildcard()
            && self.store.registry().on_instantiate(id) == OnInstantiate::Inherit
            && self.matcher().up(id, EntityId::IS_A, table).is_some()
    }

    /// Returns true if the entity itself has the id.
    #[must_use]
    pub fn owns(&self, entity: EntityId, id: impl Into<Id>) -> bool {
        self.store.has(entity, id.into())
    }

    /// Reads a value, falling back to the nearest base for inherited
    /// components.
    #[must_use]
    pub fn get(&self, entity: EntityId, id: impl Into<Id>) -> Option<&Value> {
        let id = id.into();
        if let Some(value) = self.store.get(entity, id) {
            return Some(value);
        }
        if self.store.registry().on_instantiate(id) != OnInstantiate::Inherit {
            return None;
        }
        let table = self.store.table_of(entity)?;
        let found = self.matcher().up(id, EntityId::IS_A, table)?;
        match found.source {
            FieldSource::Shared(base) => self.store.get(base, found.id),
            FieldSource::This | FieldSource::NotSet => None,
        }
    }

    /// Reads a value the entity owns.
    #[must_use]
    pub fn get_owned(&self, entity: EntityId, id: impl Into<Id>) -> Option<&Value> {
        self.store.get(entity, id.into())
    }

    /// Writes a value in place. The write is not tracked: call
    /// [`World::modified`] afterwards to stamp it and emit `OnSet`.
    pub fn get_mut(&mut self, entity: EntityId, id: impl Into<Id>) -> Option<&mut Value> {
        self.store.get_mut(entity, id.into())
    }

    /// The `index`-th target of `rel` on the entity.
    #[must_use]
    pub fn target(&self, entity: EntityId, rel: EntityId, index: usize) -> Option<EntityId> {
        let table = self.store.table_of(entity)?;
        let (_, pair) = table
            .archetype()
            .matching(Id::pair(rel, EntityId::WILDCARD))
            .nth(index)?;
        self.store.entities().alive_at(pair.second()?.index())
    }

    /// The `ChildOf` target.
    #[must_use]
    pub fn parent(&self, entity: EntityId) -> Option<EntityId> {
        self.target(entity, EntityId::CHILD_OF, 0)
    }

    /// The ids of an entity.
    #[must_use]
    pub fn type_of(&self, entity: EntityId) -> Option<&Archetype> {
        self.store.table_of(entity).map(Table::archetype)
    }

    /// Opens a reflection cursor on a component value. Writes through the
    /// cursor are untracked, as with [`World::get_mut`].
    ///
    /// # Errors
    ///
    /// Returns `NotAlive` for a dead entity and `InvalidParameter` if the id
    /// is a tag or not owned.
    pub fn cursor(&mut self, entity: EntityId, id: impl Into<Id>) -> Result<Cursor<'_>> {
        let id = id.into();
        self.store.entities().validate(entity)?;
        let ty = self
            .store
            .registry()
            .column_type(id)
            .map(|column| column.ty)
            .ok_or_else(|| Error::invalid_parameter(format!("{id} is a tag and has no value")))?;
        let value = self
            .store
            .get_mut(entity, id)
            .ok_or_else(|| Error::invalid_parameter(format!("{entity} does not own {id}")))?;
        Ok(Cursor::new(value, ty))
    }

    // --- Deferral ---

    /// Starts deferring structural changes. Scopes nest.
    pub fn defer_begin(&mut self) {
        self.defer_depth += 1;
    }

    /// Ends a deferred scope; the outermost one flushes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` without a matching `defer_begin`, or the
    /// first error of the flush.
    pub fn defer_end(&mut self) -> Result<()> {
        if self.defer_depth == 0 {
            return Err(Error::invalid_operation(
                "defer_end without a matching defer_begin",
            ));
        }
        self.defer_depth -= 1;
        self.settle()
    }

    /// Returns true while structural changes are recorded.
    #[must_use]
    pub fn is_deferred(&self) -> bool {
        self.defer_depth > 0
    }

    /// Runs `f` deferred and flushes afterwards.
    ///
    /// # Errors
    ///
    /// Returns the first error of the flush.
    pub fn defer<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> Result<R> {
        self.defer_begin();
        let result = f(self);
        self.defer_end()?;
        Ok(result)
    }

    /// Applies queued commands now.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` while deferred, or the first error of the
    /// flush.
    pub fn flush(&mut self) -> Result<()> {
        if self.is_deferred() {
            return Err(Error::invalid_operation("cannot flush while deferred"));
        }
        self.flush_queue()
    }

    /// Number of queued commands.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.commands.len()
    }

    /// Creates a command buffer for another thread.
    pub fn stage(&mut self) -> Stage {
        let stage = Stage::new(self.next_stage);
        self.next_stage += 1;
        stage
    }

    /// Queues the commands of every stage, in stage order, and flushes
    /// unless deferred.
    ///
    /// # Errors
    ///
    /// Returns the first error of the flush.
    pub fn merge(&mut self, stages: impl IntoIterator<Item = Stage>) -> Result<()> {
        for stage in stages {
            trace!(stage = stage.id(), commands = stage.len(), "stage merged");
            for command in stage.into_commands() {
                self.record(command);
            }
        }
        self.settle()
    }

    fn record(&mut self, command: Command) {
        if self.config.track_stats {
            self.stats.commands_enqueued += 1;
        }
        self.commands.push(command);
    }

    fn submit(&mut self, command: Command) -> Result<()> {
        if self.is_deferred() {
            if let Some(entity) = command.entity() {
                let (operation, id) = (command.name(), command.id());
                self.store
                    .entities()
                    .validate(entity)
                    .map_err(|err| with_context(err, operation, Some(entity), id))?;
            }
            self.record(command);
            return Ok(());
        }
        self.apply(command)?;
        self.settle()
    }

    fn apply(&mut self, command: Command) -> Result<()> {
        let (operation, entity, id) = (command.name(), command.entity(), command.id());
        let result = match command {
            Command::New(e) => self.place(e),
            Command::Add(e, id) => self.add_now(e, id),
            Command::Remove(e, id) => self.remove_now(e, id),
            Command::Set(e, id, value) => self.set_now(e, id, value),
            Command::Modified(e, id) => self.modified_now(e, id),
            Command::Delete(e) => self.delete_now(e),
            Command::Clear(e) => self.clear_now(e),
            Command::DeleteWith(id) => self.delete_with_now(id),
            Command::RemoveAll(id) => self.remove_all_now(id),
            Command::Emit(desc) => self.emit_now(&desc),
        };
        result.map_err(|err| with_context(err, operation, entity, id))
    }

    /// Flushes if nothing holds the queue open.
    fn settle(&mut self) -> Result<()> {
        if self.defer_depth == 0 && !self.flushing && !self.commands.is_empty() {
            self.flush_queue()
        } else {
            Ok(())
        }
    }

    fn flush_queue(&mut self) -> Result<()> {
        if self.flushing {
            return Ok(());
        }
        self.flushing = true;
        let mut first_error = None;
        let mut applied = 0u64;
        loop {
            let batch = self.commands.take();
            if batch.is_empty() {
                break;
            }
            for command in batch {
                if command.entity().is_some_and(|e| self.flush_deleted.contains(&e)) {
                    trace!(command = command.name(), "command for deleted entity skipped");
                    continue;
                }
                applied += 1;
                if let Err(err) = self.apply(command) {
                    warn!(error = %err, "deferred command failed");
                    first_error.get_or_insert(err);
                }
            }
        }
        self.flushing = false;
        self.flush_deleted.clear();
        if self.config.track_stats {
            self.stats.commands_flushed += applied;
        }
        debug!(applied, "command queue flushed");
        first_error.map_or(Ok(()), Err)
    }

    // --- Immediate implementations ---

    fn place(&mut self, entity: EntityId) -> Result<()> {
        if self.store.entities().get_location(entity)?.is_none() {
            self.store.move_entity(entity, TableId::ROOT, &mut |_| None)?;
        }
        Ok(())
    }

    fn add_now(&mut self, entity: EntityId, id: Id) -> Result<()> {
        self.store.entities().validate(entity)?;
        self.check_id(id)?;
        if id.is_pair() && id.first() == EntityId::IS_A {
            return self.instantiate_into(entity, id);
        }
        let src = self.table_id_of(entity);
        let from = src.unwrap_or(TableId::ROOT);
        if self.table(from)?.has(id) {
            return Ok(());
        }
        self.check_acyclic(entity, id)?;
        let replaced = self.store.exclusive_conflict(from, id);
        let dst = self.store.traverse_add(from, id);
        self.sync_tables();

        let mut init = HashMap::new();
        let mut set = Vec::new();
        if let Some(value) = self.inherited_copy(entity, id) {
            init.insert(id, value);
            set.push(id);
        }
        self.move_with_events(entity, src, dst, init, &set)?;
        self.after_pair_added(entity, id, replaced)
    }

    fn set_now(&mut self, entity: EntityId, id: Id, value: Value) -> Result<()> {
        self.store.entities().validate(entity)?;
        self.check_id(id)?;
        let column = self
            .store
            .registry()
            .column_type(id)
            .ok_or_else(|| Error::invalid_parameter(format!("{id} is a tag and carries no value")))?;
        let value = column.ty.coerce(value)?;

        let src = self.table_id_of(entity);
        let from = src.unwrap_or(TableId::ROOT);
        if self.table(from)?.has(id) {
            self.store.set_value(entity, id, value)?;
            self.emit_id(EntityId::ON_SET, id, entity, from, None);
            return Ok(());
        }
        self.check_acyclic(entity, id)?;
        let replaced = self.store.exclusive_conflict(from, id);
        let dst = self.store.traverse_add(from, id);
        self.sync_tables();
        let init = HashMap::from([(id, value)]);
        self.move_with_events(entity, src, dst, init, &[id])?;
        self.after_pair_added(entity, id, replaced)
    }

    fn modified_now(&mut self, entity: EntityId, id: Id) -> Result<()> {
        self.store.entities().validate(entity)?;
        if !self.store.mark_modified(entity, id) {
            return Err(Error::invalid_parameter(format!(
                "{entity} does not own a value for {id}"
            )));
        }
        let table = self.table_id_of(entity).unwrap_or(TableId::ROOT);
        self.emit_id(EntityId::ON_SET, id, entity, table, None);
        Ok(())
    }

    fn remove_now(&mut self, entity: EntityId, id: Id) -> Result<()> {
        self.store.entities().validate(entity)?;
        let Some(from) = self.table_id_of(entity) else {
            return Ok(());
        };
        let table = self.table(from)?;
        let removed: Vec<Id> = table.archetype().matching(id).map(|(_, id)| id).collect();
        if removed.is_empty() {
            return Ok(());
        }
        let dst = if id.is_wildcard() {
            let kept = table
                .archetype()
                .ids()
                .iter()
                .copied()
                .filter(|id| !removed.contains(id))
                .collect();
            self.store.find_or_create(Archetype::from_ids(kept))
        } else {
            self.store.traverse_remove(from, id)
        };
        self.sync_tables();
        self.move_with_events(entity, Some(from), dst, HashMap::new(), &[])?;
        self.unmirror(entity, &removed)
    }

    fn clear_now(&mut self, entity: EntityId) -> Result<()> {
        self.store.entities().validate(entity)?;
        let src = self.table_id_of(entity);
        let removed = match src {
            Some(TableId::ROOT) => return Ok(()),
            Some(table) => self.table(table)?.archetype().ids().to_vec(),
            None => Vec::new(),
        };
        self.move_with_events(entity, src, TableId::ROOT, HashMap::new(), &[])?;
        self.unmirror(entity, &removed)
    }

    /// Adds `(IsA, base)` and copies the base's overridable ids in one move.
    fn instantiate_into(&mut self, entity: EntityId, pair: Id) -> Result<()> {
        let base = pair
            .second()
            .and_then(|b| self.store.entities().alive_at(b.index()))
            .ok_or_else(|| Error::invalid_parameter(format!("{pair} has no live base")))?;
        let src = self.table_id_of(entity);
        let current = self.table(src.unwrap_or(TableId::ROOT))?.archetype().clone();
        if current.contains(pair) {
            return Ok(());
        }
        self.check_acyclic(entity, pair)?;

        let registry = self.store.registry();
        let overrides: Vec<Id> = self
            .store
            .table_of(base)
            .map(|t| {
                t.archetype()
                    .ids()
                    .iter()
                    .copied()
                    .filter(|&id| {
                        !current.contains(id)
                            && !id.first().is_builtin()
                            && registry.on_instantiate(id) == OnInstantiate::Override
                    })
                    .collect()
            })
            .unwrap_or_default();

        let mut init = HashMap::new();
        let mut set = Vec::new();
        for &id in &overrides {
            let copy = registry
                .column_type(id)
                .zip(self.store.get(base, id))
                .map(|(column, value)| column.hooks.copy(value));
            if let Some(value) = copy {
                init.insert(id, value);
                set.push(id);
            }
        }

        let mut ids = current.ids().to_vec();
        ids.push(pair);
        ids.extend(overrides);
        let dst = self.store.find_or_create(Archetype::from_ids(ids));
        self.sync_tables();
        self.move_with_events(entity, src, dst, init, &set)?;
        self.store.entities_mut().set_traversed(base, true);
        trace!(instance = %entity, base = %base, "instantiated");
        Ok(())
    }

    /// Copies the value an instance would otherwise inherit.
    fn inherited_copy(&self, entity: EntityId, id: Id) -> Option<Value> {
        let table = self.store.table_of(entity)?;
        let column = self.store.registry().column_type(id)?;
        let found = self.matcher().up(id, EntityId::IS_A, table)?;
        let FieldSource::Shared(base) = found.source else {
            return None;
        };
        self.store.get(base, found.id).map(|value| column.hooks.copy(value))
    }

    /// Mirrors a symmetric pair onto its target. `replaced` is the pair an
    /// exclusive relationship swapped out in the same move; its mirror is
    /// removed first.
    fn after_pair_added(&mut self, entity: EntityId, id: Id, replaced: Option<Id>) -> Result<()> {
        if let Some(replaced) = replaced {
            self.unmirror(entity, &[replaced])?;
        }
        let (rel, Some(target)) = (id.first(), id.second()) else {
            return Ok(());
        };
        let schema = self.store.registry().relationship(rel);
        let Some(target) = self.store.entities().alive_at(target.index()) else {
            return Ok(());
        };
        if schema.traversable {
            self.store.entities_mut().set_traversed(target, true);
        }
        let mirror = Id::pair(rel, entity);
        if schema.symmetric && target != entity && !self.store.has(target, mirror) {
            self.add_now(target, mirror)?;
        }
        Ok(())
    }

    /// Removes the mirrored halves of removed symmetric pairs.
    fn unmirror(&mut self, entity: EntityId, removed: &[Id]) -> Result<()> {
        for &id in removed {
            let (rel, Some(target)) = (id.first(), id.second()) else {
                continue;
            };
            if !self.store.registry().relationship(rel).symmetric {
                continue;
            }
            let Some(target) = self.store.entities().alive_at(target.index()) else {
                continue;
            };
            let mirror = Id::pair(rel, entity);
            if target != entity && self.store.has(target, mirror) {
                self.remove_now(target, mirror)?;
            }
        }
        Ok(())
    }

    fn check_id(&self, id: Id) -> Result<()> {
        if id.is_wildcard() {
            return Err(Error::invalid_parameter(format!(
                "wildcard {id} cannot be added to an entity"
            )));
        }
        let entities = self.store.entities();
        match (id.entity(), id.second()) {
            (Some(entity), _) => entities.validate(entity),
            (None, Some(second)) => {
                for element in [id.first(), second] {
                    if element.is_null() || entities.alive_at(element.index()).is_none() {
                        return Err(Error::not_alive(element));
                    }
                }
                Ok(())
            }
            (None, None) => Err(Error::invalid_parameter(format!("malformed id {id}"))),
        }
    }

    fn check_acyclic(&self, entity: EntityId, id: Id) -> Result<()> {
        let (rel, Some(target)) = (id.first(), id.second()) else {
            return Ok(());
        };
        if !self.store.registry().relationship(rel).acyclic {
            return Ok(());
        }
        let cycle = || {
            Error::invalid_operation(format!("adding {id} to {entity} would create a cycle"))
        };
        let mut visited = HashSet::new();
        let mut stack = vec![(target.index(), 0usize)];
        while let Some((index, depth)) = stack.pop() {
            if index == entity.index() {
                return Err(cycle());
            }
            if !visited.insert(index) {
                continue;
            }
            if depth >= self.config.max_traversal_depth {
                warn!(entity = %entity, rel = %rel, depth, "traversal depth limit reached");
                continue;
            }
            let Some(table) = self
                .store
                .entities()
                .alive_at(index)
                .and_then(|current| self.store.table_of(current))
            else {
                continue;
            };
            for (_, pair) in table.archetype().matching(Id::pair(rel, EntityId::WILDCARD)) {
                if let Some(next) = pair.second() {
                    stack.push((next.index(), depth + 1));
                }
            }
        }
        Ok(())
    }

    // --- Bookkeeping ---

    pub(crate) fn matcher(&self) -> Matcher<'_> {
        Matcher::new(&self.store, self.config.max_traversal_depth)
    }

    fn table_id_of(&self, entity: EntityId) -> Option<TableId> {
        self.store.entities().location(entity).map(|l| l.table)
    }

    fn table(&self, id: TableId) -> Result<&Table> {
        self.store
            .table(id)
            .ok_or_else(|| Error::internal(format!("{id} is missing from the store")))
    }

    /// Applies table creations and deletions to every query cache.
    fn sync_tables(&mut self) {
        let events = self.store.take_events();
        if events.is_empty() {
            return;
        }
        let matcher = Matcher::new(&self.store, self.config.max_traversal_depth);
        for event in events {
            match event {
                TableEvent::Created(id) => {
                    let Some(table) = self.store.table(id) else {
                        continue;
                    };
                    for cache in self.queries.iter_mut().flatten() {
                        cache.on_table_created(table, &matcher);
                    }
                }
                TableEvent::Deleted(id) => {
                    for cache in self.queries.iter_mut().flatten() {
                        cache.on_table_deleted(id);
                    }
                }
            }
        }
    }

    /// Recomputes queries whose match depends on other entities.
    fn rematch_queries(&mut self) {
        let matcher = Matcher::new(&self.store, self.config.max_traversal_depth);
        let mut rematched = 0u64;
        for cache in self.queries.iter_mut().flatten() {
            if cache.compiled.traverses {
                cache.rematch(&matcher);
                rematched += 1;
            }
        }
        if rematched > 0 {
            trace!(rematched, "queries rematched");
        }
        if self.config.track_stats {
            self.stats.query_rematches += rematched;
        }
    }
}

fn with_context(
    err: Error,
    operation: &'static str,
    entity: Option<EntityId>,
    id: Option<Id>,
) -> Error {
    if err.context.is_some() {
        return err;
    }
    let mut context = ErrorContext::new(operation);
    if let Some(entity) = entity {
        context = context.with_entity(entity);
    }
    if let Some(id) = id {
        context = context.with_id(id);
    }
    err.with_context(context)
}
