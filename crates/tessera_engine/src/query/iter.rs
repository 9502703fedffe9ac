//! Query iterators.
//!
//! Both iterators walk a query's cached entries one table (or, for
//! `order_by` queries, one sorted run of rows) at a time:
//!
//! ```text
//! let mut it = world.iter(query)?;
//! while it.next() {
//!     for (row, entity) in it.entities().iter().enumerate() {
//!         let position = &it.field(0)[row];
//!     }
//! }
//! ```
//!
//! Advancing past a result records it as read for change detection unless
//! [`QueryIter::skip`] was called.

use tessera_foundation::{EntityId, Error, Id, Result, Value};
use tessera_storage::{Table, TableStore};

use super::cache::{FieldMatch, FieldSource, QueryCache, Slice, Slices};
use super::term::Term;
use crate::commands::Commands;

/// Read-only iteration over a query's results.
pub struct QueryIter<'w> {
    store: &'w TableStore,
    cache: &'w QueryCache,
    slices: Slices<'w>,
    current: Option<Slice>,
    skipped: bool,
}

impl<'w> QueryIter<'w> {
    pub(crate) fn new(store: &'w TableStore, cache: &'w QueryCache) -> Self {
        Self {
            store,
            cache,
            slices: cache.slices(store),
            current: None,
            skipped: false,
        }
    }

    /// Advances to the next result. Returns false once exhausted; the
    /// iterator can then be dropped or restarted with [`QueryIter::reset`].
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> bool {
        if let Some(done) = self.current.take() {
            if !self.skipped {
                self.cache.sync_entry(done.entry, self.store);
            }
        }
        self.skipped = false;
        match self.slices.next() {
            Some(slice) => {
                self.current = Some(slice);
                true
            }
            None => {
                self.cache.sync_version(self.store);
                false
            }
        }
    }

    /// Restarts iteration from the first result.
    pub fn reset(&mut self) {
        self.slices = self.cache.slices(self.store);
        self.current = None;
        self.skipped = false;
    }

    /// Leaves the current result unread for change detection.
    pub fn skip(&mut self) {
        self.skipped = true;
    }

    /// Returns true if data read by the current result changed since this
    /// query last read it.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.current
            .is_some_and(|s| self.cache.entry_changed(s.entry, self.store))
    }

    fn slice(&self) -> Slice {
        match self.current {
            Some(slice) => slice,
            None => panic!("query iterator accessed before next()"),
        }
    }

    fn fields(&self) -> &'w [FieldMatch] {
        &self.cache.entries[self.slice().entry].fields
    }

    /// The table of the current result.
    ///
    /// # Panics
    ///
    /// Panics if called before [`QueryIter::next`] returned true.
    #[must_use]
    pub fn table(&self) -> &'w Table {
        let table = self.cache.entries[self.slice().entry].table;
        match self.store.table(table) {
            Some(t) => t,
            None => panic!("cached {table} is missing from the store"),
        }
    }

    /// Entities of the current result; empty for queries with only fixed
    /// sources.
    #[must_use]
    pub fn entities(&self) -> &'w [EntityId] {
        if !self.cache.compiled.this_terms {
            return &[];
        }
        let slice = self.slice();
        &self.table().entities()[slice.start..slice.end]
    }

    /// Number of rows in the current result.
    #[must_use]
    pub fn count(&self) -> usize {
        self.entities().len()
    }

    /// Values of term `index`: one per row for self-sourced fields, a single
    /// value for shared fields, empty when not set or a tag.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not a term index.
    #[must_use]
    pub fn field(&self, index: usize) -> &'w [Value] {
        let field = &self.fields()[index];
        let slice = self.slice();
        match (field.source, field.column) {
            (FieldSource::This, Some(column)) => self
                .table()
                .column(column)
                .map(|c| &c.values()[slice.start..slice.end])
                .unwrap_or_default(),
            (FieldSource::Shared(source), Some(column)) => shared_value(self.store, source, column)
                .map(std::slice::from_ref)
                .unwrap_or_default(),
            _ => &[],
        }
    }

    /// Value of term `index` for row `row` of the current result.
    #[must_use]
    pub fn get(&self, index: usize, row: usize) -> Option<&'w Value> {
        let values = self.field(index);
        if self.is_self(index) {
            values.get(row)
        } else {
            values.first()
        }
    }

    /// The concrete id term `index` matched.
    #[must_use]
    pub fn id(&self, index: usize) -> Id {
        self.fields()[index].id
    }

    /// Returns true if term `index` matched on the entity itself.
    #[must_use]
    pub fn is_self(&self, index: usize) -> bool {
        self.fields()[index].source == FieldSource::This
    }

    /// Returns true if term `index` is present.
    #[must_use]
    pub fn is_set(&self, index: usize) -> bool {
        self.fields()[index].is_set()
    }

    /// The entity term `index` matched on, for shared fields.
    #[must_use]
    pub fn src(&self, index: usize) -> Option<EntityId> {
        match self.fields()[index].source {
            FieldSource::Shared(entity) => Some(entity),
            FieldSource::This | FieldSource::NotSet => None,
        }
    }
}

pub(crate) fn shared_value(store: &TableStore, source: EntityId, column: usize) -> Option<&Value> {
    let location = store.entities().location(source)?;
    store
        .table(location.table)?
        .column(column)?
        .values()
        .get(location.row())
}

/// Iteration with write access, handed to the callback of
/// [`World::run`](crate::World::run).
///
/// Fields of `Out`/`InOut` terms on the entity itself can be written in
/// place; structural changes go through [`RunIter::commands`] and are applied
/// when the run ends.
pub struct RunIter<'a> {
    pub(crate) table: &'a mut Table,
    pub(crate) terms: &'a [Term],
    pub(crate) fields: &'a [FieldMatch],
    pub(crate) shared: Vec<Option<Value>>,
    pub(crate) start: usize,
    pub(crate) end: usize,
    pub(crate) this_terms: bool,
    pub(crate) commands: &'a mut Commands,
    pub(crate) skipped: bool,
}

impl RunIter<'_> {
    /// Entities of the current result.
    #[must_use]
    pub fn entities(&self) -> &[EntityId] {
        if !self.this_terms {
            return &[];
        }
        &self.table.entities()[self.start..self.end]
    }

    /// Number of rows in the current result.
    #[must_use]
    pub fn count(&self) -> usize {
        self.entities().len()
    }

    /// Values of term `index`; see [`QueryIter::field`].
    #[must_use]
    pub fn field(&self, index: usize) -> &[Value] {
        let field = &self.fields[index];
        match (field.source, field.column) {
            (FieldSource::This, Some(column)) => self
                .table
                .column(column)
                .map(|c| &c.values()[self.start..self.end])
                .unwrap_or_default(),
            (FieldSource::Shared(_), Some(_)) => self.shared[index]
                .as_ref()
                .map(std::slice::from_ref)
                .unwrap_or_default(),
            _ => &[],
        }
    }

    /// Mutable values of a written self-sourced term.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` unless term `index` is `Out`/`InOut`,
    /// matched on the entity itself, and carries data.
    pub fn field_mut(&mut self, index: usize) -> Result<&mut [Value]> {
        let term = self
            .terms
            .get(index)
            .ok_or_else(|| Error::out_of_range(index, self.terms.len()))?;
        let field = &self.fields[index];
        let column = match (term.writes(), field.source, field.column) {
            (true, FieldSource::This, Some(column)) => column,
            _ => {
                return Err(Error::invalid_operation(format!(
                    "term {index} ({term:?}) is not writable"
                )));
            }
        };
        let (start, end) = (self.start, self.end);
        self.table
            .column_mut(column)
            .map(|c| &mut c.values_mut()[start..end])
            .ok_or_else(|| Error::internal(format!("column {column} missing")))
    }

    /// Value of term `index` for `row`.
    #[must_use]
    pub fn get(&self, index: usize, row: usize) -> Option<&Value> {
        let values = self.field(index);
        if self.fields[index].source == FieldSource::This {
            values.get(row)
        } else {
            values.first()
        }
    }

    /// Mutable value of term `index` for `row`.
    ///
    /// # Errors
    ///
    /// See [`RunIter::field_mut`]; also `OutOfRange` for a bad row.
    pub fn get_mut(&mut self, index: usize, row: usize) -> Result<&mut Value> {
        let values = self.field_mut(index)?;
        let length = values.len();
        values.get_mut(row).ok_or_else(|| Error::out_of_range(row, length))
    }

    /// The concrete id term `index` matched.
    #[must_use]
    pub fn id(&self, index: usize) -> Id {
        self.fields[index].id
    }

    /// Returns true if term `index` is present.
    #[must_use]
    pub fn is_set(&self, index: usize) -> bool {
        self.fields[index].is_set()
    }

    /// The entity term `index` matched on, for shared fields.
    #[must_use]
    pub fn src(&self, index: usize) -> Option<EntityId> {
        match self.fields[index].source {
            FieldSource::Shared(entity) => Some(entity),
            FieldSource::This | FieldSource::NotSet => None,
        }
    }

    /// Command buffer for structural changes, applied after the run.
    pub fn commands(&mut self) -> &mut Commands {
        self.commands
    }

    /// Leaves the current result unread for change detection.
    pub fn skip(&mut self) {
        self.skipped = true;
    }
}
