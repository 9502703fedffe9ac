//! Table types and the component registry.
//!
//! An [`Archetype`] is the sorted, duplicate-free id sequence that keys a
//! table. The [`ComponentRegistry`] holds the schemas that decide which ids
//! carry data, how instances inherit them, and relationship traits.

use std::collections::HashMap;
use std::sync::Arc;

use tessera_foundation::{EntityId, Error, Id, Result, Type};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::schema::{
    ComponentHooks, ComponentSchema, OnDelete, OnInstantiate, RelationshipSchema,
};

/// Represents a set of ids an entity has.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Archetype {
    /// Ids, sorted for consistent identity.
    ids: Vec<Id>,
}

impl Archetype {
    /// Creates a new empty archetype.
    #[must_use]
    pub fn new() -> Self {
        Self { ids: Vec::new() }
    }

    /// Creates an archetype from a list of ids in any order.
    #[must_use]
    pub fn from_ids(mut ids: Vec<Id>) -> Self {
        ids.sort_unstable();
        ids.dedup();
        Self { ids }
    }

    /// Returns the ids in this archetype.
    #[must_use]
    pub fn ids(&self) -> &[Id] {
        &self.ids
    }

    /// Returns the number of ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns true for the empty archetype.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Checks if this archetype contains an id.
    #[must_use]
    pub fn contains(&self, id: Id) -> bool {
        self.ids.binary_search(&id).is_ok()
    }

    /// Returns the position of an id.
    #[must_use]
    pub fn position(&self, id: Id) -> Option<usize> {
        self.ids.binary_search(&id).ok()
    }

    /// Returns the ids matching a (possibly wildcard) pattern.
    pub fn matching(&self, pattern: Id) -> impl Iterator<Item = (usize, Id)> + '_ {
        self.ids
            .iter()
            .copied()
            .enumerate()
            .filter(move |(_, id)| id.matches(pattern))
    }

    /// Returns the first pair with relationship `rel`.
    #[must_use]
    pub fn first_target(&self, rel: EntityId) -> Option<Id> {
        self.matching(Id::pair(rel, EntityId::WILDCARD))
            .map(|(_, id)| id)
            .next()
    }

    /// Returns a new archetype with the id added.
    #[must_use]
    pub fn with(&self, id: Id) -> Self {
        match self.ids.binary_search(&id) {
            Ok(_) => self.clone(),
            Err(pos) => {
                let mut ids = self.ids.clone();
                ids.insert(pos, id);
                Self { ids }
            }
        }
    }

    /// Returns a new archetype with the id removed.
    #[must_use]
    pub fn without(&self, id: Id) -> Self {
        let mut ids = self.ids.clone();
        if let Ok(pos) = ids.binary_search(&id) {
            ids.remove(pos);
        }
        Self { ids }
    }

    /// Checks if this archetype contains all ids in another.
    #[must_use]
    pub fn contains_all(&self, other: &[Id]) -> bool {
        other.iter().all(|id| self.contains(*id))
    }

    /// Ids in `self` that `other` lacks.
    pub fn difference<'a>(&'a self, other: &'a Archetype) -> impl Iterator<Item = Id> + 'a {
        self.ids.iter().copied().filter(move |id| !other.contains(*id))
    }
}

/// Resolved value type and hooks for a data-carrying id.
#[derive(Clone)]
pub struct ColumnType {
    /// Type of the values stored for the id.
    pub ty: Type,
    /// Hooks for those values.
    pub hooks: Arc<dyn ComponentHooks>,
}

/// Component and relationship schemas keyed by entity index.
///
/// Pair ids only encode entity indices, so schemas are looked up by index
/// and removed when their entity is deleted.
#[derive(Clone, Debug, Default)]
pub struct ComponentRegistry {
    components: HashMap<u32, ComponentSchema>,
    relationships: HashMap<u32, RelationshipSchema>,
}

impl ComponentRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the builtin schemas.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.relationships.insert(
            EntityId::CHILD_OF.index(),
            RelationshipSchema::child_of(),
        );
        registry
            .relationships
            .insert(EntityId::IS_A.index(), RelationshipSchema::is_a());
        for (entity, name) in [(EntityId::PREFAB, "Prefab"), (EntityId::DISABLED, "Disabled")] {
            registry.components.insert(
                entity.index(),
                ComponentSchema::tag(name).with_on_instantiate(OnInstantiate::DontInherit),
            );
        }
        registry
    }

    /// Registers or replaces a component schema.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for wildcard or builtin entities.
    pub fn insert_component(&mut self, entity: EntityId, schema: ComponentSchema) -> Result<()> {
        Self::check_registrable(entity)?;
        self.components.insert(entity.index(), schema);
        Ok(())
    }

    /// Registers or replaces relationship traits.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for wildcard or builtin entities.
    pub fn insert_relationship(
        &mut self,
        entity: EntityId,
        schema: RelationshipSchema,
    ) -> Result<()> {
        Self::check_registrable(entity)?;
        self.relationships.insert(entity.index(), schema);
        Ok(())
    }

    fn check_registrable(entity: EntityId) -> Result<()> {
        if entity.is_null() || entity.is_builtin() {
            return Err(Error::invalid_parameter(format!(
                "cannot register schema for {entity}"
            )));
        }
        Ok(())
    }

    /// Drops every schema registered for an entity.
    pub fn remove(&mut self, entity: EntityId) {
        self.components.remove(&entity.index());
        self.relationships.remove(&entity.index());
    }

    /// Returns the component schema of an entity.
    #[must_use]
    pub fn component(&self, entity: EntityId) -> Option<&ComponentSchema> {
        self.components.get(&entity.index())
    }

    /// Returns the relationship traits of an entity, or the defaults.
    #[must_use]
    pub fn relationship(&self, entity: EntityId) -> RelationshipSchema {
        self.relationships
            .get(&entity.index())
            .copied()
            .unwrap_or_default()
    }

    /// Returns true if relationship traits were registered for an entity.
    #[must_use]
    pub fn is_relationship(&self, entity: EntityId) -> bool {
        self.relationships.contains_key(&entity.index())
    }

    /// Resolves the value type of an id; `None` means the id is a tag.
    ///
    /// A pair `(R, T)` carries `R`'s type if `R` has one, otherwise `T`'s,
    /// unless `R` is marked as a tag relationship.
    #[must_use]
    pub fn column_type(&self, id: Id) -> Option<ColumnType> {
        let typed = |entity: EntityId| {
            self.component(entity).and_then(|schema| {
                schema.ty.clone().map(|ty| ColumnType {
                    ty,
                    hooks: schema.hooks.clone(),
                })
            })
        };
        match id.second() {
            None => typed(id.first()),
            Some(second) => {
                if self.relationship(id.first()).tag || id.is_wildcard() {
                    return None;
                }
                typed(id.first()).or_else(|| typed(second))
            }
        }
    }

    /// Returns the inheritance policy of an id.
    #[must_use]
    pub fn on_instantiate(&self, id: Id) -> OnInstantiate {
        let first = id.first();
        if id.is_pair() && (first == EntityId::IS_A || first == EntityId::CHILD_OF) {
            return OnInstantiate::DontInherit;
        }
        self.component(first)
            .map_or(OnInstantiate::Override, |schema| schema.on_instantiate)
    }

    /// Returns the cleanup policy for holders of an entity used as an id.
    #[must_use]
    pub fn on_delete(&self, entity: EntityId) -> OnDelete {
        if let Some(rel) = self.relationships.get(&entity.index()) {
            return rel.on_delete;
        }
        self.component(entity)
            .map_or(OnDelete::Remove, |schema| schema.on_delete)
    }

    /// Returns the name registered with a component schema.
    #[must_use]
    pub fn name(&self, entity: EntityId) -> Option<&Arc<str>> {
        self.component(entity).map(|schema| &schema.name)
    }
}
