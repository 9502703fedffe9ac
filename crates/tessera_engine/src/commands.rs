//! Deferred structural commands.
//!
//! While a world is deferred (inside `run`, an observer callback, or an
//! explicit `defer_begin`/`defer_end` scope) structural changes are recorded
//! as [`Command`]s and applied in submission order at the next flush.
//! A [`Stage`] is an owned command buffer that another thread can fill
//! without touching the world; stages are merged at a single flush point.

use std::ops::{Deref, DerefMut};

use tessera_foundation::{EntityId, Id, Value};

use crate::observer::EventDesc;

/// A structural change recorded for a later flush.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Place an entity allocated while deferred into the root table.
    New(EntityId),
    /// Add an id to an entity.
    Add(EntityId, Id),
    /// Remove an id from an entity.
    Remove(EntityId, Id),
    /// Set a component value, adding the component if missing.
    Set(EntityId, Id, Value),
    /// Mark a component as written and emit `OnSet`.
    Modified(EntityId, Id),
    /// Delete an entity, applying cleanup policies.
    Delete(EntityId),
    /// Remove every id from an entity.
    Clear(EntityId),
    /// Delete every entity holding an id.
    DeleteWith(Id),
    /// Strip an id from every holder.
    RemoveAll(Id),
    /// Emit a custom event.
    Emit(EventDesc),
}

impl Command {
    /// The entity a command targets, if it targets one.
    #[must_use]
    pub fn entity(&self) -> Option<EntityId> {
        match self {
            Self::New(e)
            | Self::Add(e, _)
            | Self::Remove(e, _)
            | Self::Set(e, _, _)
            | Self::Modified(e, _)
            | Self::Delete(e)
            | Self::Clear(e) => Some(*e),
            Self::Emit(desc) => desc.entity,
            Self::DeleteWith(_) | Self::RemoveAll(_) => None,
        }
    }

    /// The id a command targets, if it targets one.
    #[must_use]
    pub fn id(&self) -> Option<Id> {
        match self {
            Self::Add(_, id)
            | Self::Remove(_, id)
            | Self::Set(_, id, _)
            | Self::Modified(_, id)
            | Self::DeleteWith(id)
            | Self::RemoveAll(id) => Some(*id),
            Self::New(_) | Self::Delete(_) | Self::Clear(_) | Self::Emit(_) => None,
        }
    }

    /// Short name used in logs and error contexts.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::New(_) => "new",
            Self::Add(..) => "add",
            Self::Remove(..) => "remove",
            Self::Set(..) => "set",
            Self::Modified(..) => "modified",
            Self::Delete(_) => "delete",
            Self::Clear(_) => "clear",
            Self::DeleteWith(_) => "delete_with",
            Self::RemoveAll(_) => "remove_all",
            Self::Emit(_) => "emit",
        }
    }
}

/// An ordered buffer of commands.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Commands {
    queue: Vec<Command>,
}

impl Commands {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a command.
    pub fn push(&mut self, command: Command) {
        self.queue.push(command);
    }

    /// Records adding `id` to `entity`.
    pub fn add(&mut self, entity: EntityId, id: impl Into<Id>) -> &mut Self {
        self.push(Command::Add(entity, id.into()));
        self
    }

    /// Records adding the pair `(rel, target)` to `entity`.
    pub fn add_pair(&mut self, entity: EntityId, rel: EntityId, target: EntityId) -> &mut Self {
        self.add(entity, Id::pair(rel, target))
    }

    /// Records removing `id` from `entity`.
    pub fn remove(&mut self, entity: EntityId, id: impl Into<Id>) -> &mut Self {
        self.push(Command::Remove(entity, id.into()));
        self
    }

    /// Records setting a value.
    pub fn set(&mut self, entity: EntityId, id: impl Into<Id>, value: impl Into<Value>) -> &mut Self {
        self.push(Command::Set(entity, id.into(), value.into()));
        self
    }

    /// Records a modified notification.
    pub fn modified(&mut self, entity: EntityId, id: impl Into<Id>) -> &mut Self {
        self.push(Command::Modified(entity, id.into()));
        self
    }

    /// Records deleting an entity.
    pub fn delete(&mut self, entity: EntityId) -> &mut Self {
        self.push(Command::Delete(entity));
        self
    }

    /// Records clearing an entity.
    pub fn clear(&mut self, entity: EntityId) -> &mut Self {
        self.push(Command::Clear(entity));
        self
    }

    /// Records deleting every holder of `id`.
    pub fn delete_with(&mut self, id: impl Into<Id>) -> &mut Self {
        self.push(Command::DeleteWith(id.into()));
        self
    }

    /// Records stripping `id` from every holder.
    pub fn remove_all(&mut self, id: impl Into<Id>) -> &mut Self {
        self.push(Command::RemoveAll(id.into()));
        self
    }

    /// Records a custom event.
    pub fn emit(&mut self, desc: EventDesc) -> &mut Self {
        self.push(Command::Emit(desc));
        self
    }

    /// Number of recorded commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// The recorded commands in submission order.
    #[must_use]
    pub fn as_slice(&self) -> &[Command] {
        &self.queue
    }

    /// Takes the recorded commands, leaving the buffer empty.
    pub fn take(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.queue)
    }

    /// Appends every command of another buffer.
    pub fn append(&mut self, other: &mut Commands) {
        self.queue.append(&mut other.queue);
    }
}

impl IntoIterator for Commands {
    type Item = Command;
    type IntoIter = std::vec::IntoIter<Command>;

    fn into_iter(self) -> Self::IntoIter {
        self.queue.into_iter()
    }
}

/// A command buffer owned by one worker.
///
/// Stages are created by [`World::stage`](crate::World::stage), filled
/// independently (they are `Send`), and applied with
/// [`World::merge`](crate::World::merge). A stage cannot create entities;
/// allocate them on the world before handing work out.
#[derive(Clone, Debug, Default)]
pub struct Stage {
    id: usize,
    commands: Commands,
}

impl Stage {
    pub(crate) fn new(id: usize) -> Self {
        Self {
            id,
            commands: Commands::new(),
        }
    }

    /// The stage number, unique per world.
    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    /// Consumes the stage, returning its commands.
    #[must_use]
    pub fn into_commands(self) -> Commands {
        self.commands
    }
}

impl Deref for Stage {
    type Target = Commands;

    fn deref(&self) -> &Commands {
        &self.commands
    }
}

impl DerefMut for Stage {
    fn deref_mut(&mut self) -> &mut Commands {
        &mut self.commands
    }
}
