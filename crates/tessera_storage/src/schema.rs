//! Schema definitions for components and relationships.
//!
//! A component schema says whether an id carries data, how instances
//! inherit it from a base, and which lifecycle hooks run when values are
//! constructed, copied, moved or dropped. A relationship schema holds the
//! traits of a relationship used as the first element of pairs.

use std::fmt;
use std::sync::Arc;

use tessera_foundation::{Type, Value};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Lifecycle hooks for the values of one component.
///
/// Every method has a default, so an implementation only overrides the
/// hooks it cares about.
pub trait ComponentHooks: Send + Sync {
    /// Builds the value a column holds when the component is added without
    /// a value.
    fn construct(&self, ty: &Type) -> Value {
        ty.default_value()
    }

    /// Copies a value, e.g. from a base entity into an instance.
    fn copy(&self, value: &Value) -> Value {
        value.clone()
    }

    /// Called when a value moves to another table.
    fn on_move(&self, _value: &mut Value) {}

    /// Called with the value when the component is removed or its entity is
    /// deleted.
    fn destruct(&self, value: Value) {
        drop(value);
    }
}

/// Hooks used when a component registers none.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultHooks;

impl ComponentHooks for DefaultHooks {}

/// How an instance treats a component of its base.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum OnInstantiate {
    /// Copy the base's value into the instance.
    #[default]
    Override,
    /// Share the base's value; instances read it through `IsA`.
    Inherit,
    /// Neither copied nor visible through `IsA`.
    DontInherit,
}

/// Schema definition for a component or tag.
#[derive(Clone)]
pub struct ComponentSchema {
    /// Component name (e.g. `Position`).
    pub name: Arc<str>,
    /// Value type; `None` for a tag.
    pub ty: Option<Type>,
    /// Inheritance policy for instances.
    pub on_instantiate: OnInstantiate,
    /// What happens to holders when the component entity is deleted.
    pub on_delete: OnDelete,
    /// Lifecycle hooks.
    pub hooks: Arc<dyn ComponentHooks>,
}

impl ComponentSchema {
    /// Creates a data-carrying component schema.
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty: Some(ty),
            on_instantiate: OnInstantiate::Override,
            on_delete: OnDelete::Remove,
            hooks: Arc::new(DefaultHooks),
        }
    }

    /// Creates a tag schema (presence-only, no data).
    #[must_use]
    pub fn tag(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            ty: None,
            on_instantiate: OnInstantiate::Override,
            on_delete: OnDelete::Remove,
            hooks: Arc::new(DefaultHooks),
        }
    }

    /// Sets the inheritance policy.
    #[must_use]
    pub fn with_on_instantiate(mut self, policy: OnInstantiate) -> Self {
        self.on_instantiate = policy;
        self
    }

    /// Sets the cleanup policy applied when the component entity is deleted.
    #[must_use]
    pub fn with_on_delete(mut self, policy: OnDelete) -> Self {
        self.on_delete = policy;
        self
    }

    /// Sets the lifecycle hooks.
    #[must_use]
    pub fn with_hooks(mut self, hooks: impl ComponentHooks + 'static) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    /// Returns true if this is a tag.
    #[must_use]
    pub fn is_tag(&self) -> bool {
        self.ty.is_none()
    }
}

impl fmt::Debug for ComponentSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentSchema")
            .field("name", &self.name)
            .field("ty", &self.ty)
            .field("on_instantiate", &self.on_instantiate)
            .field("on_delete", &self.on_delete)
            .finish_non_exhaustive()
    }
}

/// Schema definition for a relationship.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RelationshipSchema {
    /// An entity has at most one target for this relationship; adding a
    /// second replaces the first in one move.
    pub exclusive: bool,
    /// Adding `(R, B)` to `A` also adds `(R, A)` to `B`.
    pub symmetric: bool,
    /// Adds that would close a cycle are rejected.
    pub acyclic: bool,
    /// Queries and observers may traverse upwards along this relationship.
    pub traversable: bool,
    /// Pairs of this relationship never carry data.
    pub tag: bool,
    /// What happens to holders of `(R, *)` when `R` is deleted.
    pub on_delete: OnDelete,
    /// What happens to holders of `(R, T)` when `T` is deleted.
    pub on_delete_target: OnDelete,
}

impl RelationshipSchema {
    /// Creates a relationship with no traits and `Remove` cleanup.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The `ChildOf` hierarchy relationship.
    #[must_use]
    pub fn child_of() -> Self {
        Self::new()
            .exclusive()
            .acyclic()
            .traversable()
            .tag()
            .with_on_delete_target(OnDelete::Delete)
    }

    /// The `IsA` inheritance relationship.
    #[must_use]
    pub fn is_a() -> Self {
        Self::new().acyclic().traversable().tag()
    }

    /// Marks the relationship exclusive.
    #[must_use]
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    /// Marks the relationship symmetric.
    #[must_use]
    pub fn symmetric(mut self) -> Self {
        self.symmetric = true;
        self
    }

    /// Marks the relationship acyclic.
    #[must_use]
    pub fn acyclic(mut self) -> Self {
        self.acyclic = true;
        self
    }

    /// Marks the relationship traversable. Traversable relationships are
    /// also acyclic.
    #[must_use]
    pub fn traversable(mut self) -> Self {
        self.traversable = true;
        self.acyclic = true;
        self
    }

    /// Marks the relationship as never carrying data.
    #[must_use]
    pub fn tag(mut self) -> Self {
        self.tag = true;
        self
    }

    /// Sets the policy applied when the relationship entity is deleted.
    #[must_use]
    pub fn with_on_delete(mut self, policy: OnDelete) -> Self {
        self.on_delete = policy;
        self
    }

    /// Sets the policy applied when a target is deleted.
    #[must_use]
    pub fn with_on_delete_target(mut self, policy: OnDelete) -> Self {
        self.on_delete_target = policy;
        self
    }
}

/// Cleanup policy applied to holders of an id when an entity it names is
/// deleted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum OnDelete {
    /// Remove the id from every holder.
    #[default]
    Remove,
    /// Delete every holder (cascade).
    Delete,
    /// Refuse the delete.
    Panic,
}
