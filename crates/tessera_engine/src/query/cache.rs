//! Query caches and the table matcher.
//!
//! A query is compiled once into a term list plus a match plan. The
//! [`Matcher`] tests a table against the terms and produces one
//! `Vec<FieldMatch>` per result (wildcard terms can yield several results
//! per table). A [`QueryCache`] memoizes those results per table and is
//! updated incrementally as tables are created and deleted.

use std::cmp::Ordering as CmpOrdering;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::warn;

use tessera_foundation::{EntityId, Id, Value};
use tessera_storage::{ComponentRegistry, OnInstantiate, Table, TableId, TableStore};

use super::desc::OrderByFn;
use super::term::{Term, TermOper, TermSource};

/// Where a matched field's value lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldSource {
    /// The matched table's own column.
    This,
    /// A single value on another entity, shared by every row.
    Shared(EntityId),
    /// Not present (failed optional term or satisfied negated term).
    NotSet,
}

/// How one term matched a table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FieldMatch {
    /// The concrete id that matched, or the term's id when not set.
    pub id: Id,
    /// Where the value lives.
    pub source: FieldSource,
    /// Column of the id in the source's table, if it carries data.
    pub column: Option<usize>,
}

impl FieldMatch {
    pub(crate) fn not_set(id: Id) -> Self {
        Self {
            id,
            source: FieldSource::NotSet,
            column: None,
        }
    }

    /// Returns true if the field is present.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.source != FieldSource::NotSet
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MatchPlan {
    /// Concrete, required, self-sourced ids only.
    Trivial,
    /// Anything else.
    General,
}

/// A term list ready for matching.
#[derive(Clone, Debug)]
pub(crate) struct Compiled {
    pub(crate) terms: Vec<Term>,
    pub(crate) plan: MatchPlan,
    skip_prefabs: bool,
    skip_disabled: bool,
    /// At least one term is resolved relative to the matched entity.
    pub(crate) this_terms: bool,
    /// Some term reads another entity, so moves of that entity can change
    /// the match.
    pub(crate) traverses: bool,
}

impl Compiled {
    /// Compiles terms. Terms on components that instances inherit are
    /// widened to also look up `IsA`.
    pub(crate) fn new(
        mut terms: Vec<Term>,
        registry: &ComponentRegistry,
        match_prefabs: bool,
        match_disabled: bool,
    ) -> Self {
        for term in &mut terms {
            if term.src == TermSource::This
                && !term.id.is_wildcard()
                && registry.on_instantiate(term.id) == OnInstantiate::Inherit
            {
                term.src = TermSource::SelfUp(EntityId::IS_A);
            }
        }

        let trivial = terms.iter().all(|t| {
            t.src == TermSource::This && t.oper == TermOper::And && !t.id.is_wildcard()
        });
        let mentions = |e: EntityId| terms.iter().any(|t| t.mentions(e));

        Self {
            plan: if trivial { MatchPlan::Trivial } else { MatchPlan::General },
            skip_prefabs: !match_prefabs && !mentions(EntityId::PREFAB),
            skip_disabled: !match_disabled && !mentions(EntityId::DISABLED),
            this_terms: terms.iter().any(|t| t.src.is_this()),
            traverses: terms.iter().any(|t| t.src != TermSource::This),
            terms,
        }
    }

    /// Terms whose id records can seed the initial table scan.
    fn seed_ids(&self) -> impl Iterator<Item = Id> + '_ {
        self.terms
            .iter()
            .filter(|t| t.src == TermSource::This && t.oper == TermOper::And)
            .map(|t| record_key(t.id))
    }
}

/// Maps `_` to `*` so the pattern can be looked up in the id index.
pub(crate) fn record_key(id: Id) -> Id {
    let any = |e: EntityId| {
        if e.index() == EntityId::ANY.index() {
            EntityId::WILDCARD
        } else {
            e
        }
    };
    match id.second() {
        Some(second) => Id::pair(any(id.first()), any(second)),
        None if id == Id::ANY => Id::WILDCARD,
        None => id,
    }
}

/// Tests tables against compiled terms.
#[derive(Clone, Copy)]
pub(crate) struct Matcher<'a> {
    pub(crate) store: &'a TableStore,
    pub(crate) max_depth: usize,
}

impl<'a> Matcher<'a> {
    pub(crate) fn new(store: &'a TableStore, max_depth: usize) -> Self {
        Self { store, max_depth }
    }

    /// Returns every result of matching `table`; empty if it does not match.
    pub(crate) fn match_table(&self, compiled: &Compiled, table: &Table) -> Vec<Vec<FieldMatch>> {
        if compiled.this_terms
            && ((compiled.skip_prefabs && table.is_prefab())
                || (compiled.skip_disabled && table.is_disabled()))
        {
            return Vec::new();
        }

        if compiled.plan == MatchPlan::Trivial {
            if !compiled.terms.iter().all(|t| table.has(t.id)) {
                return Vec::new();
            }
            let fields = compiled
                .terms
                .iter()
                .map(|t| FieldMatch {
                    id: t.id,
                    source: FieldSource::This,
                    column: table.column_index(t.id),
                })
                .collect();
            return vec![fields];
        }

        let mut results: Vec<Vec<FieldMatch>> = vec![Vec::with_capacity(compiled.terms.len())];
        for term in &compiled.terms {
            let candidates = self.candidates(term, table);
            let mut next = Vec::with_capacity(results.len());
            for partial in results {
                match term.oper {
                    TermOper::Optional if candidates.is_empty() => {
                        let mut result = partial;
                        result.push(FieldMatch::not_set(term.id));
                        next.push(result);
                    }
                    TermOper::And | TermOper::Optional => {
                        for candidate in &candidates {
                            let mut result = partial.clone();
                            result.push(*candidate);
                            next.push(result);
                        }
                    }
                    TermOper::Not => {
                        if candidates.is_empty() {
                            let mut result = partial;
                            result.push(FieldMatch::not_set(term.id));
                            next.push(result);
                        }
                    }
                }
            }
            results = next;
            if results.is_empty() {
                break;
            }
        }
        results
    }

    /// Returns true if the table matches at all.
    pub(crate) fn matches(&self, compiled: &Compiled, table: &Table) -> bool {
        !self.match_table(compiled, table).is_empty()
    }

    /// Every way a single term can be satisfied for `table`.
    fn candidates(&self, term: &Term, table: &Table) -> Vec<FieldMatch> {
        // `_` stands for one arbitrary match
        let single = term.id.is_any();
        let mut found = match term.src {
            TermSource::This => Self::owned(term.id, table, FieldSource::This),
            TermSource::Fixed(entity) => match self.store.table_of(entity) {
                Some(source) if self.store.entities().is_alive(entity) => {
                    Self::owned(term.id, source, FieldSource::Shared(entity))
                }
                _ => Vec::new(),
            },
            TermSource::Up(rel) => self.up(term.id, rel, table).into_iter().collect(),
            TermSource::SelfUp(rel) => {
                let own = Self::owned(term.id, table, FieldSource::This);
                if own.is_empty() {
                    self.up(term.id, rel, table).into_iter().collect()
                } else {
                    own
                }
            }
        };
        if single {
            found.truncate(1);
        }
        found
    }

    fn owned(pattern: Id, table: &Table, source: FieldSource) -> Vec<FieldMatch> {
        table
            .archetype()
            .matching(pattern)
            .map(|(pos, id)| FieldMatch {
                id,
                source,
                column: table.column_at(pos),
            })
            .collect()
    }

    /// Finds the nearest ancestor of `table`'s rows along `rel` that owns
    /// an id matching `pattern`.
    pub(crate) fn up(&self, pattern: Id, rel: EntityId, table: &Table) -> Option<FieldMatch> {
        let mut visited = HashSet::new();
        self.up_from(pattern, rel, table, 0, &mut visited)
    }

    fn up_from(
        &self,
        pattern: Id,
        rel: EntityId,
        table: &Table,
        depth: usize,
        visited: &mut HashSet<EntityId>,
    ) -> Option<FieldMatch> {
        if depth >= self.max_depth {
            warn!(depth, rel = %rel, "traversal depth limit reached");
            return None;
        }
        let registry = self.store.registry();
        for (_, pair) in table.archetype().matching(Id::pair(rel, EntityId::WILDCARD)) {
            let Some(target) = pair
                .second()
                .and_then(|t| self.store.entities().alive_at(t.index()))
            else {
                continue;
            };
            if !visited.insert(target) {
                continue;
            }
            let Some(target_table) = self.store.table_of(target) else {
                continue;
            };
            let owned = target_table.archetype().matching(pattern).find(|&(_, id)| {
                rel != EntityId::IS_A || registry.on_instantiate(id) != OnInstantiate::DontInherit
            });
            if let Some((pos, id)) = owned {
                return Some(FieldMatch {
                    id,
                    source: FieldSource::Shared(target),
                    column: target_table.column_at(pos),
                });
            }
            if let Some(found) = self.up_from(pattern, rel, target_table, depth + 1, visited) {
                return Some(found);
            }
        }
        None
    }
}

/// One matched (table, result) pair.
#[derive(Debug)]
pub(crate) struct CacheEntry {
    pub(crate) table: TableId,
    pub(crate) fields: Vec<FieldMatch>,
    /// Stamps observed at the last sync: structure, then each read term.
    monitor: Vec<AtomicU64>,
    /// Structure stamp at the last `order_by` sort.
    sorted_at: u64,
}

impl CacheEntry {
    fn new(table: TableId, fields: Vec<FieldMatch>, reads: usize) -> Self {
        Self {
            table,
            fields,
            monitor: (0..=reads).map(|_| AtomicU64::new(0)).collect(),
            sorted_at: 0,
        }
    }
}

/// A contiguous run of rows of one entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Slice {
    pub(crate) entry: usize,
    pub(crate) start: usize,
    pub(crate) end: usize,
}

/// Lazy walk over the slices of a query.
pub(crate) enum Slices<'a> {
    /// The merged run of a sorted query.
    Sorted(std::slice::Iter<'a, Slice>),
    /// One slice per visible entry, in cache order.
    Entries {
        cache: &'a QueryCache,
        store: &'a TableStore,
        next: usize,
    },
}

impl Iterator for Slices<'_> {
    type Item = Slice;

    fn next(&mut self) -> Option<Slice> {
        match self {
            Self::Sorted(slices) => slices.next().copied(),
            Self::Entries { cache, store, next } => {
                let (cache, store) = (*cache, *store);
                while let Some(entry) = cache.entries.get(*next) {
                    let index = *next;
                    *next += 1;
                    if !cache.is_visible(entry, store) {
                        continue;
                    }
                    let end = if cache.compiled.this_terms {
                        store.table(entry.table).map_or(0, Table::len)
                    } else {
                        0
                    };
                    return Some(Slice {
                        entry: index,
                        start: 0,
                        end,
                    });
                }
                None
            }
        }
    }
}

pub(crate) struct OrderBy {
    pub(crate) id: Id,
    pub(crate) term: usize,
    pub(crate) compare: OrderByFn,
}

/// The cached state of one registered query.
pub(crate) struct QueryCache {
    pub(crate) compiled: Compiled,
    pub(crate) detect_changes: bool,
    match_empty: bool,
    pub(crate) order_by: Option<OrderBy>,
    pub(crate) entries: Vec<CacheEntry>,
    /// Read terms, in monitor order.
    reads: Vec<usize>,
    match_version: u64,
    synced_version: AtomicU64,
    /// Merged row order for `order_by` queries.
    sorted: Vec<Slice>,
    sorted_version: Option<u64>,
}

impl QueryCache {
    pub(crate) fn new(
        compiled: Compiled,
        detect_changes: bool,
        match_empty: bool,
        order_by: Option<OrderBy>,
    ) -> Self {
        let reads = compiled
            .terms
            .iter()
            .enumerate()
            .filter(|(_, t)| t.reads())
            .map(|(i, _)| i)
            .collect();
        Self {
            compiled,
            detect_changes,
            match_empty,
            order_by,
            entries: Vec::new(),
            reads,
            match_version: 0,
            synced_version: AtomicU64::new(0),
            sorted: Vec::new(),
            sorted_version: None,
        }
    }

    pub(crate) fn terms(&self) -> &[Term] {
        &self.compiled.terms
    }

    // --- Matching ---

    /// Fills the cache from the id index, scanning the tables of the
    /// rarest required id.
    pub(crate) fn populate(&mut self, matcher: &Matcher<'_>) {
        let store = matcher.store;
        if !self.compiled.this_terms {
            if let Some(root) = store.table(TableId::ROOT) {
                self.add_table(root, matcher);
            }
            return;
        }

        let seed = self
            .compiled
            .seed_ids()
            .map(|id| (id, store.id_index().table_count(id)))
            .min_by_key(|&(_, count)| count);

        let candidates: Vec<TableId> = match seed {
            Some((id, _)) => store.id_index().tables(id).map(|r| r.table).collect(),
            None => store.tables().map(Table::id).collect(),
        };
        for id in candidates {
            if let Some(table) = store.table(id) {
                self.add_table(table, matcher);
            }
        }
    }

    /// Matches a table and records its results. Returns true if it matched.
    pub(crate) fn add_table(&mut self, table: &Table, matcher: &Matcher<'_>) -> bool {
        if self.entries.iter().any(|e| e.table == table.id()) {
            return false;
        }
        let results = matcher.match_table(&self.compiled, table);
        if results.is_empty() {
            return false;
        }
        for fields in results {
            self.entries
                .push(CacheEntry::new(table.id(), fields, self.reads.len()));
        }
        self.match_version += 1;
        true
    }

    /// Handles a new table.
    pub(crate) fn on_table_created(&mut self, table: &Table, matcher: &Matcher<'_>) -> bool {
        self.compiled.this_terms && self.add_table(table, matcher)
    }

    /// Unlinks every entry of a deleted table.
    pub(crate) fn on_table_deleted(&mut self, table: TableId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.table != table);
        let removed = self.entries.len() != before;
        if removed {
            self.match_version += 1;
        }
        removed
    }

    /// Recomputes every entry. Entries whose match is unchanged keep their
    /// monitors. Returns true if the match set changed.
    pub(crate) fn rematch(&mut self, matcher: &Matcher<'_>) -> bool {
        let old = std::mem::take(&mut self.entries);
        let version = self.match_version;
        self.populate(matcher);
        self.match_version = version;

        let mut changed = old.len() != self.entries.len();
        for entry in &mut self.entries {
            match old
                .iter()
                .find(|o| o.table == entry.table && o.fields == entry.fields)
            {
                Some(previous) => {
                    for (slot, value) in entry.monitor.iter_mut().zip(&previous.monitor) {
                        *slot.get_mut() = value.load(Ordering::Relaxed);
                    }
                    entry.sorted_at = previous.sorted_at;
                }
                None => changed = true,
            }
        }
        if changed {
            self.match_version += 1;
        }
        changed
    }

    // --- Iteration ---

    /// Returns true if iteration visits the entry.
    pub(crate) fn is_visible(&self, entry: &CacheEntry, store: &TableStore) -> bool {
        !self.compiled.this_terms
            || self.match_empty
            || store.table(entry.table).is_some_and(|t| !t.is_empty())
    }

    /// The slices iteration walks, produced lazily. A sorted query replays
    /// its merged run while it is current; otherwise entries are walked in
    /// cache order so results always reflect the tables as they are now.
    pub(crate) fn slices<'a>(&'a self, store: &'a TableStore) -> Slices<'a> {
        if self.order_by.is_some() && !self.needs_sort(store) {
            return Slices::Sorted(self.sorted.iter());
        }
        Slices::Entries {
            cache: self,
            store,
            next: 0,
        }
    }

    /// Returns true if an `order_by` query must re-sort before iterating.
    pub(crate) fn needs_sort(&self, store: &TableStore) -> bool {
        self.order_by.is_some()
            && (self.sorted_version != Some(self.match_version)
                || self.entries.iter().any(|e| self.sort_stamp(e, store) != e.sorted_at))
    }

    fn sort_stamp(&self, entry: &CacheEntry, store: &TableStore) -> u64 {
        let Some(order) = &self.order_by else {
            return 0;
        };
        let Some(table) = store.table(entry.table) else {
            return 0;
        };
        let column = entry.fields[order.term].column.map_or(0, |c| table.column_stamp(c));
        table.structure_stamp().max(column)
    }

    /// Sorts every stale table and rebuilds the merged row order.
    ///
    /// Returns the number of tables that were physically reordered.
    pub(crate) fn sort(&mut self, store: &mut TableStore) -> usize {
        let (term, compare) = match &self.order_by {
            Some(order) => (order.term, order.compare.clone()),
            None => return 0,
        };
        let mut sorted_tables = 0;
        for i in 0..self.entries.len() {
            let entry = &self.entries[i];
            if self.sort_stamp(entry, store) == entry.sorted_at {
                continue;
            }
            let (table, column) = (entry.table, entry.fields[term].column);
            if let Some(column) = column {
                if store.sort_table(table, column, &*compare) {
                    sorted_tables += 1;
                }
            }
            let stamp = self.sort_stamp(&self.entries[i], store);
            self.entries[i].sorted_at = stamp;
        }
        self.sorted = self.merge(store);
        self.sorted_version = Some(self.match_version);
        sorted_tables
    }

    /// Merges the sorted tables into one ordered run of slices. Equal keys
    /// keep entry order.
    fn merge(&self, store: &TableStore) -> Vec<Slice> {
        let Some(order) = &self.order_by else {
            return Vec::new();
        };
        let columns: Vec<(usize, &[Value])> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| self.is_visible(e, store))
            .filter_map(|(i, e)| {
                let table = store.table(e.table)?;
                let column = table.column(e.fields[order.term].column?)?;
                Some((i, column.values()))
            })
            .collect();

        let mut heads = vec![0usize; columns.len()];
        let mut slices: Vec<Slice> = Vec::new();
        loop {
            let mut best: Option<usize> = None;
            for (k, (_, values)) in columns.iter().enumerate() {
                let Some(value) = values.get(heads[k]) else {
                    continue;
                };
                best = match best {
                    Some(b) => {
                        let current = &columns[b].1[heads[b]];
                        if (order.compare)(value, current) == CmpOrdering::Less {
                            Some(k)
                        } else {
                            Some(b)
                        }
                    }
                    None => Some(k),
                };
            }
            let Some(k) = best else {
                break;
            };
            let entry = columns[k].0;
            let row = heads[k];
            heads[k] += 1;
            match slices.last_mut() {
                Some(last) if last.entry == entry && last.end == row => last.end += 1,
                _ => slices.push(Slice {
                    entry,
                    start: row,
                    end: row + 1,
                }),
            }
        }
        slices
    }

    // --- Change detection ---

    fn monitor_values(&self, entry: &CacheEntry, store: &TableStore) -> Vec<u64> {
        let table = store.table(entry.table);
        let structure = if self.compiled.this_terms {
            table.map_or(0, Table::structure_stamp)
        } else {
            0
        };
        let mut values = Vec::with_capacity(self.reads.len() + 1);
        values.push(structure);
        for &term in &self.reads {
            let field = &entry.fields[term];
            let stamp = match (field.source, field.column) {
                (FieldSource::This, Some(column)) => table.map_or(0, |t| t.column_stamp(column)),
                (FieldSource::Shared(source), Some(column)) => store
                    .table_of(source)
                    .map_or(0, |t| t.column_stamp(column)),
                _ => 0,
            };
            values.push(stamp);
        }
        values
    }

    /// Returns true if data read by the entry changed since its last sync.
    pub(crate) fn entry_changed(&self, index: usize, store: &TableStore) -> bool {
        let Some(entry) = self.entries.get(index) else {
            return false;
        };
        self.monitor_values(entry, store)
            .iter()
            .zip(&entry.monitor)
            .any(|(current, seen)| *current != seen.load(Ordering::Relaxed))
    }

    /// Records the entry's current stamps as seen.
    pub(crate) fn sync_entry(&self, index: usize, store: &TableStore) {
        if !self.detect_changes {
            return;
        }
        if let Some(entry) = self.entries.get(index) {
            for (seen, current) in entry.monitor.iter().zip(self.monitor_values(entry, store)) {
                seen.store(current, Ordering::Relaxed);
            }
        }
    }

    /// Records the current match set as seen, along with the entries
    /// iteration skips.
    pub(crate) fn sync_version(&self, store: &TableStore) {
        if !self.detect_changes {
            return;
        }
        self.synced_version.store(self.match_version, Ordering::Relaxed);
        for (index, entry) in self.entries.iter().enumerate() {
            if !self.is_visible(entry, store) {
                self.sync_entry(index, store);
            }
        }
    }

    /// Returns true if the match set or any matched data changed since the
    /// last iteration.
    pub(crate) fn changed(&self, store: &TableStore) -> bool {
        self.synced_version.load(Ordering::Relaxed) != self.match_version
            || (0..self.entries.len()).any(|i| self.entry_changed(i, store))
    }
}
