//! Query registration and iteration.

use tracing::debug;

use tessera_foundation::{EntityId, Error, Result, Value};
use tessera_storage::OnInstantiate;

use super::World;
use crate::query::QueryId;
use crate::query::cache::{Compiled, FieldSource, OrderBy, QueryCache, Slice};
use crate::query::desc::QueryDesc;
use crate::query::iter::{QueryIter, RunIter, shared_value};
use crate::query::term::{TermOper, TermSource};

impl World {
    /// Registers a cached query.
    ///
    /// # Errors
    ///
    /// - `InvalidParameter` for an invalid description, or an `order_by` id
    ///   without values (or inherited)
    /// - `NotAlive` for a dead fixed source
    pub fn query(&mut self, desc: QueryDesc) -> Result<QueryId> {
        desc.validate()?;
        for term in &desc.terms {
            if let TermSource::Fixed(source) = term.src {
                self.store.entities().validate(source)?;
            }
        }
        let registry = self.store.registry();
        let compiled = Compiled::new(desc.terms, registry, desc.match_prefabs, desc.match_disabled);
        let order_by = match desc.order_by {
            Some((id, compare)) => {
                if registry.column_type(id).is_none()
                    || registry.on_instantiate(id) == OnInstantiate::Inherit
                {
                    return Err(Error::invalid_parameter(format!(
                        "order_by id {id} must carry owned values"
                    )));
                }
                let term = compiled
                    .terms
                    .iter()
                    .position(|t| t.id == id && t.oper == TermOper::And)
                    .ok_or_else(|| Error::invalid_parameter(format!("order_by id {id} has no term")))?;
                Some(OrderBy { id, term, compare })
            }
            None => None,
        };

        let fixed: Vec<EntityId> = compiled
            .terms
            .iter()
            .filter_map(|t| match t.src {
                TermSource::Fixed(source) => Some(source),
                _ => None,
            })
            .collect();
        for source in fixed {
            self.store.entities_mut().set_traversed(source, true);
        }

        let mut cache = QueryCache::new(
            compiled,
            desc.detect_changes,
            desc.match_empty_tables,
            order_by,
        );
        cache.populate(&self.matcher());
        let id = QueryId::new(self.queries.len());
        debug!(
            query = id.index(),
            terms = ?cache.terms(),
            plan = ?cache.compiled.plan,
            order_by = ?cache.order_by.as_ref().map(|o| o.id),
            tables = cache.entries.len(),
            "query registered"
        );
        self.queries.push(Some(cache));
        Ok(id)
    }

    /// Unregisters a query. Returns false if it was already removed.
    pub fn remove_query(&mut self, query: QueryId) -> bool {
        let removed = self
            .queries
            .get_mut(query.index())
            .and_then(Option::take)
            .is_some();
        if removed {
            debug!(query = query.index(), "query removed");
        }
        removed
    }

    fn cache(&self, query: QueryId) -> Result<&QueryCache> {
        self.queries
            .get(query.index())
            .and_then(Option::as_ref)
            .ok_or_else(|| Error::invalid_parameter(format!("unknown query {query}")))
    }

    /// Re-sorts an `order_by` query if its tables changed.
    fn sort_query(&mut self, query: QueryId) -> Result<()> {
        let cache = self
            .queries
            .get_mut(query.index())
            .and_then(Option::as_mut)
            .ok_or_else(|| Error::invalid_parameter(format!("unknown query {query}")))?;
        if cache.needs_sort(&self.store) {
            let reordered = cache.sort(&mut self.store);
            debug!(query = query.index(), reordered, "query sorted");
            if self.config.track_stats {
                self.stats.query_sorts += 1;
            }
        }
        Ok(())
    }

    /// Iterates a query, sorting it first if needed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for an unknown query.
    pub fn iter(&mut self, query: QueryId) -> Result<QueryIter<'_>> {
        self.sort_query(query)?;
        let cache = self.cache(query)?;
        Ok(QueryIter::new(&self.store, cache))
    }

    /// Iterates a query through a shared reference; several iterators may
    /// be live at once.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if an `order_by` query must re-sort first
    /// (call [`World::iter`] once), `InvalidParameter` for an unknown query.
    pub fn iter_shared(&self, query: QueryId) -> Result<QueryIter<'_>> {
        let cache = self.cache(query)?;
        if cache.needs_sort(&self.store) {
            return Err(Error::invalid_operation(format!(
                "{query} must be sorted before shared iteration"
            )));
        }
        Ok(QueryIter::new(&self.store, cache))
    }

    /// Runs `f` over each result with write access to `Out`/`InOut` fields.
    ///
    /// The world is deferred for the duration: structural changes go
    /// through [`RunIter::commands`] and are applied when the run ends.
    /// Written columns are stamped for change detection.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for an unknown query, or the first error
    /// of the flush.
    pub fn run(&mut self, query: QueryId, mut f: impl FnMut(&mut RunIter<'_>)) -> Result<()> {
        self.sort_query(query)?;
        self.defer_begin();
        let queued = self.commands.len();
        {
            let Self {
                store,
                queries,
                commands,
                ..
            } = &mut *self;
            if let Some(cache) = queries.get(query.index()).and_then(Option::as_ref) {
                let slices: Vec<Slice> = cache.slices(store).collect();
                for slice in slices {
                    let entry = &cache.entries[slice.entry];
                    let shared: Vec<Option<Value>> = entry
                        .fields
                        .iter()
                        .map(|field| match (field.source, field.column) {
                            (FieldSource::Shared(source), Some(column)) => {
                                shared_value(store, source, column).cloned()
                            }
                            _ => None,
                        })
                        .collect();
                    let Some(table) = store.table_mut(entry.table) else {
                        continue;
                    };
                    let mut it = RunIter {
                        table,
                        terms: cache.terms(),
                        fields: &entry.fields,
                        shared,
                        start: slice.start,
                        end: slice.end,
                        this_terms: cache.compiled.this_terms,
                        commands: &mut *commands,
                        skipped: false,
                    };
                    f(&mut it);
                    let skipped = it.skipped;
                    for (term, field) in cache.terms().iter().zip(&entry.fields) {
                        if let (true, FieldSource::This, Some(column)) =
                            (term.writes(), field.source, field.column)
                        {
                            store.mark_column(entry.table, column);
                        }
                    }
                    if !skipped {
                        cache.sync_entry(slice.entry, store);
                    }
                }
                cache.sync_version(store);
            }
        }
        if self.config.track_stats {
            self.stats.commands_enqueued += (self.commands.len() - queued) as u64;
        }
        self.defer_end()
    }

    /// Returns true if the match set or data read by the query changed
    /// since it was last iterated.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` unless the query detects changes.
    pub fn changed(&self, query: QueryId) -> Result<bool> {
        let cache = self.cache(query)?;
        if !cache.detect_changes {
            return Err(Error::invalid_operation(format!(
                "{query} was registered without detect_changes"
            )));
        }
        Ok(cache.changed(&self.store))
    }

    /// Number of matched entities (zero for queries with only fixed
    /// sources). Wildcard terms count an entity once per matching id.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for an unknown query.
    pub fn count(&self, query: QueryId) -> Result<usize> {
        let cache = self.cache(query)?;
        if !cache.compiled.this_terms {
            return Ok(0);
        }
        Ok(cache.slices(&self.store).map(|s| s.end - s.start).sum())
    }

    /// Returns true if the query has at least one result.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for an unknown query.
    pub fn is_true(&self, query: QueryId) -> Result<bool> {
        let cache = self.cache(query)?;
        let this_terms = cache.compiled.this_terms;
        Ok(cache
            .slices(&self.store)
            .any(|s| !this_terms || s.end > s.start))
    }

    /// The matched entities in iteration order. Does not count as a read
    /// for change detection.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for an unknown query.
    pub fn query_entities(&mut self, query: QueryId) -> Result<Vec<EntityId>> {
        self.sort_query(query)?;
        let cache = self.cache(query)?;
        if !cache.compiled.this_terms {
            return Ok(Vec::new());
        }
        let mut entities = Vec::new();
        for slice in cache.slices(&self.store) {
            if let Some(table) = self.store.table(cache.entries[slice.entry].table) {
                entities.extend_from_slice(&table.entities()[slice.start..slice.end]);
            }
        }
        Ok(entities)
    }

    /// Scans the tables matching `desc` once, calling `f` per result.
    ///
    /// Nothing is registered: tables are picked from the id index, matched,
    /// and walked without monitors, sorting or later updates. Use this for
    /// single-frame scans; register a query for anything repeated.
    ///
    /// # Errors
    ///
    /// - `InvalidParameter` for an invalid description or one with `order_by`
    /// - `NotAlive` for a dead fixed source
    pub fn each(&self, desc: QueryDesc, mut f: impl FnMut(&QueryIter<'_>)) -> Result<()> {
        desc.validate()?;
        if desc.order_by.is_some() {
            return Err(Error::invalid_parameter(
                "order_by needs a registered query",
            ));
        }
        for term in &desc.terms {
            if let TermSource::Fixed(source) = term.src {
                self.store.entities().validate(source)?;
            }
        }
        let compiled = Compiled::new(
            desc.terms,
            self.store.registry(),
            desc.match_prefabs,
            desc.match_disabled,
        );
        let mut scan = QueryCache::new(compiled, false, desc.match_empty_tables, None);
        scan.populate(&self.matcher());

        let mut it = QueryIter::new(&self.store, &scan);
        while it.next() {
            f(&it);
        }
        Ok(())
    }
}
