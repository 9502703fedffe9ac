//! Reverse index from ids to the tables that contain them.
//!
//! Every concrete id used in a table has an [`IdRecord`]. Wildcard patterns
//! (`*`, `(R, *)`, `(*, T)`, `(*, *)`) get records too, so a pattern lookup
//! is a single hash probe; their records additionally enumerate the concrete
//! ids they cover. Records keep a separate empty-table subset, and a record
//! is dropped as soon as no table references its id.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tessera_foundation::Id;

use crate::table::{Table, TableId};

/// Where an id (or the ids matching a pattern) sits inside one table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TableRecord {
    /// The table.
    pub table: TableId,
    /// Archetype position of the first matching id.
    pub index: usize,
    /// Number of matching ids in the archetype.
    pub count: usize,
    /// Column of the first matching id, if it carries data.
    pub column: Option<usize>,
}

/// Table cache of one id or pattern.
#[derive(Clone, Debug)]
pub struct IdRecord {
    id: Id,
    tables: BTreeMap<TableId, TableRecord>,
    empty: BTreeSet<TableId>,
    concrete: BTreeMap<Id, usize>,
}

impl IdRecord {
    fn new(id: Id) -> Self {
        Self {
            id,
            tables: BTreeMap::new(),
            empty: BTreeSet::new(),
            concrete: BTreeMap::new(),
        }
    }

    /// The id or pattern this record indexes.
    #[must_use]
    pub fn id(&self) -> Id {
        self.id
    }

    /// All tables containing the id, empty or not, in creation order.
    pub fn tables(&self) -> impl Iterator<Item = &TableRecord> {
        self.tables.values()
    }

    /// Tables containing the id that have at least one row.
    pub fn non_empty_tables(&self) -> impl Iterator<Item = &TableRecord> {
        self.tables
            .values()
            .filter(|record| !self.empty.contains(&record.table))
    }

    /// Tables containing the id that currently have no rows.
    pub fn empty_tables(&self) -> impl Iterator<Item = TableId> + '_ {
        self.empty.iter().copied()
    }

    /// Number of tables containing the id.
    #[must_use]
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    /// Looks up the position of the id in one table.
    #[must_use]
    pub fn get(&self, table: TableId) -> Option<&TableRecord> {
        self.tables.get(&table)
    }

    /// Concrete ids covered by a wildcard record, in id order.
    ///
    /// For a concrete record this is empty.
    pub fn concrete_ids(&self) -> impl Iterator<Item = Id> + '_ {
        self.concrete.keys().copied()
    }
}

/// The Component/Id Index.
#[derive(Clone, Debug, Default)]
pub struct IdIndex {
    records: HashMap<Id, IdRecord>,
}

impl IdIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the record of an id or pattern.
    ///
    /// `None` means no table contains a matching id, which is a valid
    /// zero-match result.
    #[must_use]
    pub fn record(&self, id: Id) -> Option<&IdRecord> {
        self.records.get(&id)
    }

    /// Returns the table cache for an id or pattern.
    pub fn tables(&self, id: Id) -> impl Iterator<Item = &TableRecord> {
        self.records.get(&id).into_iter().flat_map(IdRecord::tables)
    }

    /// Returns the number of tables containing an id.
    #[must_use]
    pub fn table_count(&self, id: Id) -> usize {
        self.records.get(&id).map_or(0, IdRecord::table_count)
    }

    /// Returns true if some table contains the id.
    #[must_use]
    pub fn is_used(&self, id: Id) -> bool {
        self.records.contains_key(&id)
    }

    /// Enumerates the concrete ids matching a pattern.
    ///
    /// A concrete id yields itself if any table contains it.
    #[must_use]
    pub fn matching_ids(&self, pattern: Id) -> Vec<Id> {
        if !pattern.is_wildcard() {
            return if self.is_used(pattern) {
                vec![pattern]
            } else {
                Vec::new()
            };
        }
        self.records
            .get(&pattern)
            .map(|record| record.concrete_ids().collect())
            .unwrap_or_default()
    }

    /// Returns the number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if no record exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Adds a newly created table to every relevant record.
    ///
    /// The record keys are stored on the table so they can be revisited
    /// when it empties, fills, or is deleted.
    pub fn register_table(&mut self, table: &mut Table) {
        let table_id = table.id();
        let empty = table.is_empty();
        let mut keys: Vec<Id> = Vec::new();

        for (pos, &id) in table.archetype().ids().iter().enumerate() {
            let column = table.column_at(pos);
            let patterns = id.wildcard_patterns();
            for key in std::iter::once(id).chain(patterns.iter().copied()) {
                let record = self
                    .records
                    .entry(key)
                    .or_insert_with(|| IdRecord::new(key));
                if key != id {
                    *record.concrete.entry(id).or_insert(0) += 1;
                }
                match record.tables.get_mut(&table_id) {
                    Some(existing) => existing.count += 1,
                    None => {
                        record.tables.insert(
                            table_id,
                            TableRecord {
                                table: table_id,
                                index: pos,
                                count: 1,
                                column,
                            },
                        );
                        if empty {
                            record.empty.insert(table_id);
                        }
                        keys.push(key);
                    }
                }
            }
        }

        table.set_records(keys);
    }

    /// Removes a table from every record listing it. Records left without
    /// tables are dropped.
    pub fn unregister_table(&mut self, table: &Table) {
        let table_id = table.id();
        for &key in table.records() {
            let Some(record) = self.records.get_mut(&key) else {
                panic!("id record {key} missing for {table_id}");
            };
            record.tables.remove(&table_id);
            record.empty.remove(&table_id);
            if key.is_wildcard() {
                for (_, id) in table.archetype().matching(key) {
                    if let Some(count) = record.concrete.get_mut(&id) {
                        *count -= 1;
                        if *count == 0 {
                            record.concrete.remove(&id);
                        }
                    }
                }
            }
            if record.tables.is_empty() {
                self.records.remove(&key);
            }
        }
    }

    /// Moves a table between the empty and non-empty subsets.
    pub fn set_table_empty(&mut self, table: &Table, empty: bool) {
        let table_id = table.id();
        for key in table.records() {
            if let Some(record) = self.records.get_mut(key) {
                if empty {
                    record.empty.insert(table_id);
                } else {
                    record.empty.remove(&table_id);
                }
            }
        }
    }
}
