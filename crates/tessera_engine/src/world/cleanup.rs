//! Deletion and bulk cleanup.
//!
//! Deleting an entity first plans the full cascade (every holder reached
//! through a `Delete` policy) and checks `Panic` policies, so a refused
//! delete leaves the world untouched. Only then are ids stripped, table by
//! table, and entities deleted leaves first.

use std::collections::HashSet;

use tracing::{debug, trace};

use tessera_foundation::{EntityId, Error, Id, Result};
use tessera_storage::{Archetype, OnDelete, TableId};

use super::World;
use crate::query::cache::record_key;

/// The outcome of planning a delete.
struct DeletePlan {
    /// Entities to delete, in discovery order.
    entities: Vec<EntityId>,
    /// Ids to strip from every holder.
    strip: Vec<Id>,
}

impl World {
    pub(super) fn delete_now(&mut self, entity: EntityId) -> Result<()> {
        self.store.entities().validate(entity)?;
        if entity.is_builtin() {
            return Err(Error::invalid_operation(format!(
                "builtin {entity} cannot be deleted"
            )));
        }
        let plan = self.plan_delete(entity)?;
        self.execute(plan)?;
        self.sweep_if_configured();
        Ok(())
    }

    /// Every id that names `entity`, with the policy for its holders.
    fn references(&self, entity: EntityId) -> Vec<(Id, OnDelete)> {
        let index = self.store.id_index();
        let registry = self.store.registry();
        let mut refs = Vec::new();

        let plain = Id::from(entity);
        if index.is_used(plain) {
            refs.push((plain, registry.on_delete(entity)));
        }
        for id in index.matching_ids(Id::pair(entity, EntityId::WILDCARD)) {
            refs.push((id, registry.on_delete(entity)));
        }
        for id in index.matching_ids(Id::pair(EntityId::WILDCARD, entity)) {
            if id.first().index() == entity.index() {
                continue;
            }
            refs.push((id, registry.relationship(id.first()).on_delete_target));
        }
        refs
    }

    /// Entities currently holding `id`.
    fn holders(&self, id: Id) -> Vec<EntityId> {
        self.store
            .id_index()
            .tables(id)
            .filter_map(|record| self.store.table(record.table))
            .flat_map(|table| table.entities().iter().copied())
            .collect()
    }

    fn plan_delete(&self, root: EntityId) -> Result<DeletePlan> {
        let mut seen = HashSet::new();
        let mut entities = Vec::new();
        let mut strip = Vec::new();
        let mut guarded = Vec::new();
        let mut stack = vec![root];
        while let Some(entity) = stack.pop() {
            if !seen.insert(entity) {
                continue;
            }
            entities.push(entity);
            for (id, policy) in self.references(entity) {
                match policy {
                    OnDelete::Remove => strip.push(id),
                    OnDelete::Delete => {
                        stack.extend(self.holders(id).into_iter().filter(|h| !seen.contains(h)));
                    }
                    OnDelete::Panic => guarded.push(id),
                }
            }
        }
        for id in guarded {
            if let Some(holder) = self.holders(id).into_iter().find(|h| !seen.contains(h)) {
                return Err(Error::invalid_operation(format!(
                    "cannot delete {root}: {holder} still holds {id}"
                )));
            }
        }
        strip.sort_unstable();
        strip.dedup();
        Ok(DeletePlan { entities, strip })
    }

    fn execute(&mut self, plan: DeletePlan) -> Result<()> {
        trace!(
            entities = plan.entities.len(),
            stripped = plan.strip.len(),
            "delete planned"
        );
        for id in plan.strip {
            self.remove_all_now(id)?;
        }
        for &entity in plan.entities.iter().rev() {
            if self.store.entities().is_alive(entity) {
                self.delete_single(entity)?;
            }
        }
        Ok(())
    }

    /// Deletes one entity whose references have been dealt with.
    fn delete_single(&mut self, entity: EntityId) -> Result<()> {
        if let Some(table) = self.table_id_of(entity) {
            let ids = self.table(table)?.archetype().ids().to_vec();
            let monitors = self.monitor_changes(Some(table), None);
            for id in ids {
                self.emit_id(EntityId::ON_REMOVE, id, entity, table, None);
            }
            self.fire_monitors(&monitors, false, entity);
        }
        let traversed = self.store.entities().is_traversed(entity);
        self.store.delete_entity(entity)?;
        self.forget(entity);
        self.sync_tables();
        if traversed {
            self.rematch_queries();
        }
        Ok(())
    }

    /// Releases what the world keeps about a deleted entity.
    fn forget(&mut self, entity: EntityId) {
        self.release_name(entity);
        self.store.registry_mut().remove(entity);
        if self.flushing {
            self.flush_deleted.insert(entity);
        }
    }

    pub(super) fn delete_with_now(&mut self, pattern: Id) -> Result<()> {
        let tables: Vec<TableId> = self
            .store
            .id_index()
            .tables(record_key(pattern))
            .map(|record| record.table)
            .collect();
        let mut deleted = 0usize;
        for table in tables {
            let Some(entities) = self.store.table(table).map(|t| t.entities().to_vec()) else {
                continue;
            };
            if entities.is_empty() {
                continue;
            }
            let simple = entities
                .iter()
                .all(|&e| !e.is_builtin() && self.references(e).is_empty());
            if simple {
                deleted += entities.len();
                self.delete_rows_with_events(table, &entities)?;
            } else {
                for entity in entities {
                    if self.store.entities().is_alive(entity) {
                        deleted += 1;
                        self.delete_now(entity)?;
                    }
                }
            }
        }
        debug!(pattern = %pattern, deleted, "delete_with applied");
        self.sweep_if_configured();
        Ok(())
    }

    /// Deletes every row of a table whose entities nothing refers to.
    fn delete_rows_with_events(&mut self, table: TableId, entities: &[EntityId]) -> Result<()> {
        let ids = self.table(table)?.archetype().ids().to_vec();
        let monitors = self.monitor_changes(Some(table), None);
        for &entity in entities {
            for &id in &ids {
                self.emit_id(EntityId::ON_REMOVE, id, entity, table, None);
            }
            self.fire_monitors(&monitors, false, entity);
        }
        let traversed = entities
            .iter()
            .any(|&e| self.store.entities().is_traversed(e));
        for entity in self.store.delete_rows(table) {
            self.forget(entity);
        }
        self.sync_tables();
        if traversed {
            self.rematch_queries();
        }
        Ok(())
    }

    pub(super) fn remove_all_now(&mut self, pattern: Id) -> Result<()> {
        let tables: Vec<TableId> = self
            .store
            .id_index()
            .tables(record_key(pattern))
            .map(|record| record.table)
            .collect();
        for src in tables {
            let Some(table) = self.store.table(src) else {
                continue;
            };
            if table.is_empty() {
                continue;
            }
            let kept: Vec<Id> = table
                .archetype()
                .ids()
                .iter()
                .copied()
                .filter(|id| !id.matches(pattern))
                .collect();
            let dst = self.store.find_or_create(Archetype::from_ids(kept));
            self.sync_tables();
            self.move_table_with_events(src, dst)?;
        }
        trace!(pattern = %pattern, "remove_all applied");
        Ok(())
    }

    fn sweep_if_configured(&mut self) {
        if self.config.auto_sweep_tables && !self.is_deferred() {
            self.delete_empty_tables();
        }
    }
}
