//! The table store: table arena, transition graph and move engine.
//!
//! The `TableStore` owns every table in an arena indexed by [`TableId`],
//! together with the [`EntityIndex`], the [`IdIndex`] and the
//! [`ComponentRegistry`]. All structural changes go through it:
//!
//! - `find_or_create` looks tables up by archetype and builds them lazily
//! - `traverse_add` / `traverse_remove` follow (and materialize) edges
//! - `move_entity` moves one row, `move_table` / `delete_rows` work on
//!   whole tables at once
//! - `delete_empty_tables` sweeps tables that have no rows
//!
//! Table creation and deletion are recorded as [`TableEvent`]s for the
//! layer above to drain.

// Allow u32 to usize casts - we target 64-bit systems
#![allow(clippy::cast_possible_truncation)]

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, trace};

use tessera_foundation::{EntityId, Error, Id, Result, Value};

use crate::component::{Archetype, ComponentRegistry};
use crate::entity::{EntityIndex, Location};
use crate::id_index::IdIndex;
use crate::schema::ComponentHooks;
use crate::table::{Carried, Table, TableId};

/// A change to the set of tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TableEvent {
    /// A table was created.
    Created(TableId),
    /// A table was deleted.
    Deleted(TableId),
}

/// Counters maintained by the store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Tables created since the store was built.
    pub tables_created: u64,
    /// Tables deleted by sweeps.
    pub tables_deleted: u64,
    /// Rows moved between tables.
    pub table_moves: u64,
}

/// Archetype storage.
#[derive(Debug)]
pub struct TableStore {
    entities: EntityIndex,
    registry: ComponentRegistry,
    index: IdIndex,
    tables: Vec<Option<Table>>,
    by_type: HashMap<Archetype, TableId>,
    events: Vec<TableEvent>,
    stamp: u64,
    stats: StoreStats,
}

impl Default for TableStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TableStore {
    /// Creates a store with the builtin schemas and the root table.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates a store with room for `capacity` entities.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let mut store = Self {
            entities: EntityIndex::with_capacity(capacity),
            registry: ComponentRegistry::with_builtins(),
            index: IdIndex::new(),
            tables: Vec::new(),
            by_type: HashMap::new(),
            events: Vec::new(),
            stamp: 0,
            stats: StoreStats::default(),
        };
        let root = store.find_or_create(Archetype::new());
        debug_assert_eq!(root, TableId::ROOT);
        store
    }

    // --- Accessors ---

    /// The entity index.
    #[must_use]
    pub fn entities(&self) -> &EntityIndex {
        &self.entities
    }

    /// Mutable access to the entity index.
    pub fn entities_mut(&mut self) -> &mut EntityIndex {
        &mut self.entities
    }

    /// The component registry.
    #[must_use]
    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// Mutable access to the component registry.
    ///
    /// Callers must not change how an id is stored once tables use it.
    pub fn registry_mut(&mut self) -> &mut ComponentRegistry {
        &mut self.registry
    }

    /// The Component/Id Index.
    #[must_use]
    pub fn id_index(&self) -> &IdIndex {
        &self.index
    }

    /// Returns a table by handle.
    #[must_use]
    pub fn table(&self, id: TableId) -> Option<&Table> {
        self.tables.get(id.index()).and_then(Option::as_ref)
    }

    /// Returns a mutable table by handle.
    pub fn table_mut(&mut self, id: TableId) -> Option<&mut Table> {
        self.tables.get_mut(id.index()).and_then(Option::as_mut)
    }

    /// Iterates over all live tables in creation order.
    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.iter().flatten()
    }

    /// Number of live tables, including the root.
    #[must_use]
    pub fn table_count(&self) -> usize {
        self.tables.iter().flatten().count()
    }

    /// Looks up the table of an archetype without creating it.
    #[must_use]
    pub fn find(&self, archetype: &Archetype) -> Option<TableId> {
        self.by_type.get(archetype).copied()
    }

    /// Store counters.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        self.stats
    }

    /// Takes the table events recorded since the last call.
    pub fn take_events(&mut self) -> Vec<TableEvent> {
        std::mem::take(&mut self.events)
    }

    /// Returns a fresh write stamp.
    pub fn next_stamp(&mut self) -> u64 {
        self.stamp += 1;
        self.stamp
    }

    fn set_empty(&mut self, id: TableId, empty: bool) {
        if let Some(table) = self.tables.get(id.index()).and_then(Option::as_ref) {
            self.index.set_table_empty(table, empty);
        }
    }

    fn expect_table(&self, id: TableId) -> &Table {
        match self.table(id) {
            Some(table) => table,
            None => panic!("{id} is referenced but missing from the store"),
        }
    }

    fn expect_table_mut(&mut self, id: TableId) -> &mut Table {
        match self.table_mut(id) {
            Some(table) => table,
            None => panic!("{id} is referenced but missing from the store"),
        }
    }

    // --- Entity lookups ---

    /// Returns the table holding an entity.
    #[must_use]
    pub fn table_of(&self, entity: EntityId) -> Option<&Table> {
        self.entities
            .location(entity)
            .and_then(|loc| self.table(loc.table))
    }

    /// Returns true if the entity's own table contains `id`.
    #[must_use]
    pub fn has(&self, entity: EntityId, id: Id) -> bool {
        self.table_of(entity).is_some_and(|table| table.has(id))
    }

    /// Returns the entity's own value for `id`.
    #[must_use]
    pub fn get(&self, entity: EntityId, id: Id) -> Option<&Value> {
        let loc = self.entities.location(entity)?;
        self.table(loc.table)?.get(id, loc.row())
    }

    /// Returns the entity's own value for `id`, mutably. The write is not
    /// stamped; see [`TableStore::mark_modified`].
    pub fn get_mut(&mut self, entity: EntityId, id: Id) -> Option<&mut Value> {
        let loc = self.entities.location(entity)?;
        self.table_mut(loc.table)?.get_mut(id, loc.row())
    }

    /// Overwrites the entity's own value for `id` and stamps the column.
    ///
    /// # Errors
    ///
    /// Returns `NotAlive` for dead entities and `InvalidParameter` if the
    /// entity has no column for `id`.
    pub fn set_value(&mut self, entity: EntityId, id: Id, value: Value) -> Result<()> {
        let loc = self
            .entities
            .get_location(entity)?
            .ok_or_else(|| Error::invalid_parameter(format!("{entity} has no table")))?;
        let stamp = self.next_stamp();
        let table = self.expect_table_mut(loc.table);
        let column = table
            .column_index(id)
            .ok_or_else(|| Error::invalid_parameter(format!("{entity} has no value for {id}")))?;
        if let Some(slot) = table
            .column_mut(column)
            .and_then(|c| c.values_mut().get_mut(loc.row()))
        {
            *slot = value;
        }
        table.mark_column(column, stamp);
        Ok(())
    }

    /// Stamps the column of `id` in the entity's table as written.
    ///
    /// Returns false if the entity has no column for `id`.
    pub fn mark_modified(&mut self, entity: EntityId, id: Id) -> bool {
        let Some(loc) = self.entities.location(entity) else {
            return false;
        };
        let stamp = self.next_stamp();
        let table = self.expect_table_mut(loc.table);
        match table.column_index(id) {
            Some(column) => {
                table.mark_column(column, stamp);
                true
            }
            None => false,
        }
    }

    /// Stamps a whole column as written.
    pub fn mark_column(&mut self, table: TableId, column: usize) {
        let stamp = self.next_stamp();
        if let Some(table) = self.table_mut(table) {
            table.mark_column(column, stamp);
        }
    }

    // --- Tables and the transition graph ---

    /// Returns the table for an archetype, creating it on first use.
    pub fn find_or_create(&mut self, archetype: Archetype) -> TableId {
        if let Some(&id) = self.by_type.get(&archetype) {
            return id;
        }

        let id = TableId::new(self.tables.len() as u32);
        let stamp = self.next_stamp();
        let registry = &self.registry;
        let mut table = Table::new(id, archetype.clone(), |t| registry.column_type(t), stamp);
        self.index.register_table(&mut table);

        debug!(table = %id, ids = ?archetype.ids(), "table created");
        self.tables.push(Some(table));
        self.by_type.insert(archetype, id);
        self.events.push(TableEvent::Created(id));
        self.stats.tables_created += 1;
        id
    }

    /// Returns the existing id that an exclusive relationship pair would
    /// replace in a table.
    #[must_use]
    pub fn exclusive_conflict(&self, table: TableId, id: Id) -> Option<Id> {
        if !id.is_pair() || !self.registry.relationship(id.first()).exclusive {
            return None;
        }
        let table = self.table(table)?;
        table
            .archetype()
            .matching(Id::pair(id.first(), EntityId::WILDCARD))
            .map(|(_, existing)| existing)
            .find(|&existing| existing != id)
    }

    /// Follows the add edge for `id`, materializing it on first use.
    ///
    /// For an exclusive relationship pair, the destination replaces any
    /// other pair of that relationship, so the swap is a single edge.
    pub fn traverse_add(&mut self, src: TableId, id: Id) -> TableId {
        let table = self.expect_table(src);
        if let Some(dst) = table.add_edge(id) {
            return dst;
        }
        if table.has(id) {
            return src;
        }

        let mut archetype = table.archetype().with(id);
        let replaced = self.exclusive_conflict(src, id);
        if let Some(existing) = replaced {
            archetype = archetype.without(existing);
        }

        let dst = self.find_or_create(archetype);
        self.expect_table_mut(src).set_add_edge(id, dst);
        if replaced.is_none() {
            self.expect_table_mut(dst).set_remove_edge(id, src);
        }
        dst
    }

    /// Follows the remove edge for `id`, materializing it on first use.
    pub fn traverse_remove(&mut self, src: TableId, id: Id) -> TableId {
        let table = self.expect_table(src);
        if let Some(dst) = table.remove_edge(id) {
            return dst;
        }
        if !table.has(id) {
            return src;
        }

        let archetype = table.archetype().without(id);
        let dst = self.find_or_create(archetype);
        self.expect_table_mut(src).set_remove_edge(id, dst);
        self.expect_table_mut(dst).set_add_edge(id, src);
        dst
    }

    // --- Moves ---

    /// Moves an entity into `dst`.
    ///
    /// Values of ids common to both tables are carried over (running the
    /// move hook), added columns take the value from `init` or are
    /// default-constructed, and removed columns are destructed. The vacated
    /// source row is filled by the source's last row.
    ///
    /// Returns false if the entity already lives in `dst`.
    ///
    /// # Errors
    ///
    /// Returns `NotAlive` if the entity is dead.
    pub fn move_entity(
        &mut self,
        entity: EntityId,
        dst: TableId,
        init: &mut dyn FnMut(Id) -> Option<Value>,
    ) -> Result<bool> {
        let src = self.entities.get_location(entity)?;
        if src.is_some_and(|loc| loc.table == dst) {
            return Ok(false);
        }

        let mut carried = match src {
            Some(loc) => self.take_row(loc),
            None => Vec::new(),
        };

        let stamp = self.next_stamp();
        let table = self.expect_table_mut(dst);
        let was_empty = table.is_empty();
        let mut values = Vec::with_capacity(table.columns().len());
        let mut initialized = Vec::new();
        for (c, column) in table.columns().iter().enumerate() {
            let value = match carried.iter().position(|v| v.id == column.id()) {
                Some(pos) => {
                    let mut value = carried.swap_remove(pos).value;
                    column.hooks().on_move(&mut value);
                    value
                }
                None => {
                    initialized.push(c);
                    init(column.id()).unwrap_or_else(|| column.hooks().construct(column.ty()))
                }
            };
            values.push(value);
        }
        let row = table.push_row(entity, values);
        table.mark_structure(stamp);
        for c in initialized {
            table.mark_column(c, stamp);
        }
        if was_empty {
            self.set_empty(dst, false);
        }

        for leftover in carried {
            leftover.hooks.destruct(leftover.value);
        }

        self.entities.set_location(entity, Location::new(dst, row))?;
        self.stats.table_moves += 1;
        trace!(entity = %entity, from = ?src.map(|l| l.table), to = %dst, "entity moved");
        Ok(true)
    }

    /// Removes a row, fixing up the relocated entity, and returns the
    /// row's values.
    fn take_row(&mut self, loc: Location) -> Vec<Carried> {
        let stamp = self.next_stamp();
        let table = self.expect_table_mut(loc.table);
        let (carried, relocated) = table.swap_remove_row(loc.row());
        table.mark_structure(stamp);
        let now_empty = table.is_empty();
        if let Some(moved) = relocated {
            // The relocated entity is alive: it was just read from the table
            let _ = self.entities.set_location(moved, loc);
        }
        if now_empty {
            self.set_empty(loc.table, true);
        }
        carried
    }

    /// Deletes an entity: destructs its values and frees its id.
    ///
    /// # Errors
    ///
    /// Returns `NotAlive` if the entity is dead.
    pub fn delete_entity(&mut self, entity: EntityId) -> Result<()> {
        if let Some(loc) = self.entities.get_location(entity)? {
            for value in self.take_row(loc) {
                value.hooks.destruct(value.value);
            }
        }
        self.entities.destroy(entity)?;
        trace!(entity = %entity, "entity deleted");
        Ok(())
    }

    /// Moves every row of `src` into `dst` in one pass.
    ///
    /// Returns the moved entities in their new row order.
    ///
    /// # Errors
    ///
    /// Returns `NotAlive` if a row holds a stale entity.
    pub fn move_table(
        &mut self,
        src: TableId,
        dst: TableId,
        init: &mut dyn FnMut(EntityId, Id) -> Option<Value>,
    ) -> Result<Vec<EntityId>> {
        if src == dst {
            return Ok(self.expect_table(src).entities().to_vec());
        }
        let stamp = self.next_stamp();
        let table = self.expect_table_mut(src);
        if table.is_empty() {
            return Ok(Vec::new());
        }
        let (entities, columns) = table.drain_rows();
        table.mark_structure(stamp);
        self.set_empty(src, true);

        let mut sources: HashMap<Id, (Arc<dyn ComponentHooks>, std::vec::IntoIter<Value>)> =
            columns
                .into_iter()
                .map(|(id, hooks, values)| (id, (hooks, values.into_iter())))
                .collect();

        let table = self.expect_table_mut(dst);
        let was_empty = table.is_empty();
        let mut rows = Vec::with_capacity(entities.len());
        let column_ids: Vec<Id> = table.columns().iter().map(|c| c.id()).collect();
        let mut initialized = vec![false; column_ids.len()];
        for &entity in &entities {
            let mut values = Vec::with_capacity(column_ids.len());
            for (c, column) in table.columns().iter().enumerate() {
                let carried = sources
                    .get_mut(&column.id())
                    .and_then(|(_, values)| values.next());
                let value = match carried {
                    Some(mut value) => {
                        column.hooks().on_move(&mut value);
                        value
                    }
                    None => {
                        initialized[c] = true;
                        init(entity, column.id())
                            .unwrap_or_else(|| column.hooks().construct(column.ty()))
                    }
                };
                values.push(value);
            }
            rows.push(table.push_row(entity, values));
        }
        table.mark_structure(stamp);
        for (c, fresh) in initialized.into_iter().enumerate() {
            if fresh {
                table.mark_column(c, stamp);
            }
        }
        if was_empty {
            self.set_empty(dst, false);
        }

        for (_, (hooks, values)) in sources {
            for value in values {
                hooks.destruct(value);
            }
        }
        for (&entity, row) in entities.iter().zip(rows) {
            self.entities.set_location(entity, Location::new(dst, row))?;
        }
        self.stats.table_moves += entities.len() as u64;
        debug!(from = %src, to = %dst, count = entities.len(), "table moved");
        Ok(entities)
    }

    /// Deletes every row of a table, destructing values and freeing ids.
    ///
    /// Returns the deleted entities.
    pub fn delete_rows(&mut self, table: TableId) -> Vec<EntityId> {
        let stamp = self.next_stamp();
        let t = self.expect_table_mut(table);
        if t.is_empty() {
            return Vec::new();
        }
        let (entities, columns) = t.drain_rows();
        t.mark_structure(stamp);
        self.set_empty(table, true);

        for (_, hooks, values) in columns {
            for value in values {
                hooks.destruct(value);
            }
        }
        for &entity in &entities {
            // Rows only hold live entities
            let _ = self.entities.destroy(entity);
        }
        debug!(table = %table, count = entities.len(), "table rows deleted");
        entities
    }

    /// Sorts the rows of a table by one column, updating entity locations.
    ///
    /// Reordering counts as a structural change. Returns false if the rows
    /// were already in order.
    pub fn sort_table(
        &mut self,
        table: TableId,
        column: usize,
        compare: &dyn Fn(&Value, &Value) -> Ordering,
    ) -> bool {
        let stamp = self.stamp + 1;
        let Some(t) = self.table_mut(table) else {
            return false;
        };
        if column >= t.columns().len() || !t.sort_rows(column, compare) {
            return false;
        }
        t.mark_structure(stamp);
        let entities = t.entities().to_vec();
        self.stamp = stamp;
        for (row, entity) in entities.into_iter().enumerate() {
            let _ = self
                .entities
                .set_location(entity, Location::new(table, row as u32));
        }
        true
    }

    // --- Sweeping ---

    /// Deletes every empty table except the root.
    ///
    /// Returns the number of tables deleted.
    pub fn delete_empty_tables(&mut self) -> usize {
        let empty: Vec<TableId> = self
            .tables()
            .filter(|t| t.id() != TableId::ROOT && t.is_empty())
            .map(Table::id)
            .collect();
        for &id in &empty {
            self.delete_table(id);
        }
        if !empty.is_empty() {
            debug!(count = empty.len(), "empty tables deleted");
        }
        empty.len()
    }

    fn delete_table(&mut self, id: TableId) {
        let Some(table) = self.tables.get_mut(id.index()).and_then(Option::take) else {
            return;
        };
        self.index.unregister_table(&table);
        self.by_type.remove(table.archetype());
        for other in self.tables.iter_mut().flatten() {
            other.unlink(id);
        }
        self.events.push(TableEvent::Deleted(id));
        self.stats.tables_deleted += 1;
    }
}
