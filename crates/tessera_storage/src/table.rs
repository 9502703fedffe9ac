//! Archetype tables.
//!
//! A [`Table`] stores every entity that has exactly the ids of its
//! [`Archetype`]. Data-carrying ids get a [`Column`]; tags only appear in
//! the archetype. Rows are dense: removing a row swaps the last row into the
//! gap.
//!
//! Each table also keeps:
//! - transition edges to the tables reached by adding or removing one id
//! - write stamps for change detection (one for the row set, one per column)

// Allow u32 to usize casts - we target 64-bit systems
#![allow(clippy::cast_possible_truncation)]

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tessera_foundation::{EntityId, Id, Type, Value};

use crate::component::{Archetype, ColumnType};
use crate::schema::ComponentHooks;

/// Stable handle of a table in the store's arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(u32);

impl TableId {
    /// The table with the empty archetype. It is never deleted.
    pub const ROOT: TableId = TableId(0);

    /// Creates a table id from an arena index.
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the arena index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "table#{}", self.0)
    }
}

/// Values of one data-carrying id, one per row.
#[derive(Clone)]
pub struct Column {
    id: Id,
    ty: Type,
    hooks: Arc<dyn ComponentHooks>,
    values: Vec<Value>,
}

impl Column {
    fn new(id: Id, column_type: ColumnType) -> Self {
        Self {
            id,
            ty: column_type.ty,
            hooks: column_type.hooks,
            values: Vec::new(),
        }
    }

    /// The id stored in this column.
    #[must_use]
    pub fn id(&self) -> Id {
        self.id
    }

    /// The value type of the column.
    #[must_use]
    pub fn ty(&self) -> &Type {
        &self.ty
    }

    /// Lifecycle hooks of the column's component.
    #[must_use]
    pub fn hooks(&self) -> &Arc<dyn ComponentHooks> {
        &self.hooks
    }

    /// Values, indexed by row.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Mutable values, indexed by row.
    pub fn values_mut(&mut self) -> &mut [Value] {
        &mut self.values
    }

    /// Splits the column into its type and mutable values.
    pub fn parts_mut(&mut self) -> (&Type, &mut [Value]) {
        (&self.ty, &mut self.values)
    }
}

impl fmt::Debug for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Column")
            .field("id", &self.id)
            .field("ty", &self.ty)
            .field("values", &self.values)
            .finish_non_exhaustive()
    }
}

/// A value leaving a table, with the hooks needed to move or drop it.
pub(crate) struct Carried {
    pub(crate) id: Id,
    pub(crate) hooks: Arc<dyn ComponentHooks>,
    pub(crate) value: Value,
}

/// Storage for all entities sharing one archetype.
#[derive(Debug)]
pub struct Table {
    id: TableId,
    archetype: Archetype,
    columns: Vec<Column>,
    /// Column of each archetype position, if the id carries data.
    column_map: Vec<Option<usize>>,
    entities: Vec<EntityId>,
    add_edges: HashMap<Id, TableId>,
    remove_edges: HashMap<Id, TableId>,
    /// Write stamps: index 0 is the row set, `i + 1` is column `i`.
    stamps: Vec<u64>,
    /// Keys of the id records listing this table.
    records: Vec<Id>,
}

impl Table {
    pub(crate) fn new(
        id: TableId,
        archetype: Archetype,
        mut column_type: impl FnMut(Id) -> Option<ColumnType>,
        stamp: u64,
    ) -> Self {
        let mut columns = Vec::new();
        let mut column_map = Vec::with_capacity(archetype.len());
        for &type_id in archetype.ids() {
            match column_type(type_id) {
                Some(ct) => {
                    column_map.push(Some(columns.len()));
                    columns.push(Column::new(type_id, ct));
                }
                None => column_map.push(None),
            }
        }
        let stamps = vec![stamp; columns.len() + 1];
        Self {
            id,
            archetype,
            columns,
            column_map,
            entities: Vec::new(),
            add_edges: HashMap::new(),
            remove_edges: HashMap::new(),
            stamps,
            records: Vec::new(),
        }
    }

    /// The table's handle.
    #[must_use]
    pub fn id(&self) -> TableId {
        self.id
    }

    /// The table's id set.
    #[must_use]
    pub fn archetype(&self) -> &Archetype {
        &self.archetype
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns true if the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Entity of each row.
    #[must_use]
    pub fn entities(&self) -> &[EntityId] {
        &self.entities
    }

    /// All data columns.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// A data column by index.
    #[must_use]
    pub fn column(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    /// A mutable data column by index.
    pub fn column_mut(&mut self, index: usize) -> Option<&mut Column> {
        self.columns.get_mut(index)
    }

    /// Returns true if the archetype contains `id`.
    #[must_use]
    pub fn has(&self, id: Id) -> bool {
        self.archetype.contains(id)
    }

    /// Returns the column index of an id, if it carries data here.
    #[must_use]
    pub fn column_index(&self, id: Id) -> Option<usize> {
        self.archetype
            .position(id)
            .and_then(|pos| self.column_map[pos])
    }

    /// Returns the column index of the id at an archetype position.
    #[must_use]
    pub fn column_at(&self, position: usize) -> Option<usize> {
        self.column_map.get(position).copied().flatten()
    }

    /// Returns the value of `id` at `row`.
    #[must_use]
    pub fn get(&self, id: Id, row: usize) -> Option<&Value> {
        self.column_index(id)
            .and_then(|c| self.columns[c].values.get(row))
    }

    /// Returns a mutable value of `id` at `row`.
    pub fn get_mut(&mut self, id: Id, row: usize) -> Option<&mut Value> {
        let c = self.column_index(id)?;
        self.columns[c].values.get_mut(row)
    }

    /// Returns true if the archetype contains the `Prefab` tag.
    #[must_use]
    pub fn is_prefab(&self) -> bool {
        self.archetype.contains(Id::from(EntityId::PREFAB))
    }

    /// Returns true if the archetype contains the `Disabled` tag.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.archetype.contains(Id::from(EntityId::DISABLED))
    }

    // --- Change detection ---

    /// Stamp of the last change to the row set.
    #[must_use]
    pub fn structure_stamp(&self) -> u64 {
        self.stamps[0]
    }

    /// Stamp of the last write to a column.
    #[must_use]
    pub fn column_stamp(&self, column: usize) -> u64 {
        self.stamps.get(column + 1).copied().unwrap_or(0)
    }

    pub(crate) fn mark_structure(&mut self, stamp: u64) {
        self.stamps[0] = stamp;
    }

    pub(crate) fn mark_column(&mut self, column: usize, stamp: u64) {
        if let Some(slot) = self.stamps.get_mut(column + 1) {
            *slot = stamp;
        }
    }

    // --- Transition graph ---

    /// Destination of adding `id`, if the edge was materialized.
    #[must_use]
    pub fn add_edge(&self, id: Id) -> Option<TableId> {
        self.add_edges.get(&id).copied()
    }

    /// Destination of removing `id`, if the edge was materialized.
    #[must_use]
    pub fn remove_edge(&self, id: Id) -> Option<TableId> {
        self.remove_edges.get(&id).copied()
    }

    /// Number of materialized edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.add_edges.len() + self.remove_edges.len()
    }

    pub(crate) fn set_add_edge(&mut self, id: Id, dst: TableId) {
        self.add_edges.insert(id, dst);
    }

    pub(crate) fn set_remove_edge(&mut self, id: Id, dst: TableId) {
        self.remove_edges.insert(id, dst);
    }

    pub(crate) fn unlink(&mut self, target: TableId) {
        self.add_edges.retain(|_, dst| *dst != target);
        self.remove_edges.retain(|_, dst| *dst != target);
    }

    // --- Id index bookkeeping ---

    pub(crate) fn records(&self) -> &[Id] {
        &self.records
    }

    pub(crate) fn set_records(&mut self, records: Vec<Id>) {
        self.records = records;
    }

    // --- Rows ---

    /// Appends a row. `values` holds one value per column, in column order.
    pub(crate) fn push_row(&mut self, entity: EntityId, values: Vec<Value>) -> u32 {
        debug_assert_eq!(values.len(), self.columns.len());
        let row = self.entities.len() as u32;
        self.entities.push(entity);
        for (column, value) in self.columns.iter_mut().zip(values) {
            column.values.push(value);
        }
        row
    }

    /// Removes a row by swapping the last row into its place.
    ///
    /// Returns the row's values and the entity that now occupies `row`, if
    /// one was relocated.
    pub(crate) fn swap_remove_row(&mut self, row: usize) -> (Vec<Carried>, Option<EntityId>) {
        self.entities.swap_remove(row);
        let carried = self
            .columns
            .iter_mut()
            .map(|column| Carried {
                id: column.id,
                hooks: column.hooks.clone(),
                value: column.values.swap_remove(row),
            })
            .collect();
        let relocated = self.entities.get(row).copied();
        (carried, relocated)
    }

    /// Removes every row, returning the entities and per-column values.
    pub(crate) fn drain_rows(&mut self) -> (Vec<EntityId>, Vec<(Id, Arc<dyn ComponentHooks>, Vec<Value>)>) {
        let entities = std::mem::take(&mut self.entities);
        let columns = self
            .columns
            .iter_mut()
            .map(|column| (column.id, column.hooks.clone(), std::mem::take(&mut column.values)))
            .collect();
        (entities, columns)
    }

    /// Reorders rows so that `column` is sorted by `compare`.
    ///
    /// The sort is stable. Returns false if the rows were already in order.
    pub(crate) fn sort_rows(
        &mut self,
        column: usize,
        compare: &dyn Fn(&Value, &Value) -> Ordering,
    ) -> bool {
        let values = &self.columns[column].values;
        let mut order: Vec<usize> = (0..values.len()).collect();
        order.sort_by(|&a, &b| compare(&values[a], &values[b]));
        if order.iter().enumerate().all(|(i, &row)| i == row) {
            return false;
        }
        self.entities = order.iter().map(|&row| self.entities[row]).collect();
        for column in &mut self.columns {
            let mut old: Vec<Option<Value>> = column.values.drain(..).map(Some).collect();
            column.values = order
                .iter()
                .map(|&row| old[row].take().unwrap_or_default())
                .collect();
        }
        true
    }
}
