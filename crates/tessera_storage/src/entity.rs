//! Entity lifecycle management with generational indices.
//!
//! The `EntityIndex` allocates entity ids, tracks which generation of each
//! index is alive, and maps live entities to their current table and row.

// Allow u32 to usize casts - we target 64-bit systems
#![allow(clippy::cast_possible_truncation)]

use tessera_foundation::{EntityId, Error, Result};

use crate::table::TableId;

/// Physical location of an entity: a table and a row within it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Location {
    /// The table holding the entity.
    pub table: TableId,
    /// Row of the entity within the table.
    pub row: u32,
}

impl Location {
    /// Creates a location.
    #[must_use]
    pub const fn new(table: TableId, row: u32) -> Self {
        Self { table, row }
    }

    /// Returns the row as an index.
    #[must_use]
    pub const fn row(self) -> usize {
        self.row as usize
    }
}

#[derive(Clone, Debug, Default)]
struct Slot {
    generation: u16,
    alive: bool,
    location: Option<Location>,
    traversed: bool,
}

/// Maps entity ids to locations and tracks liveness.
///
/// Indices are recycled from a free list; a recycled index comes back with
/// its generation bumped, so ids held for a deleted entity stop resolving.
#[derive(Clone, Debug)]
pub struct EntityIndex {
    slots: Vec<Slot>,
    free_list: Vec<u32>,
    live_count: usize,
}

impl Default for EntityIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityIndex {
    /// Creates a new empty index.
    ///
    /// Indices below [`EntityId::FIRST_USER_INDEX`] are reserved: the
    /// allocator never hands them out, but [`ensure`](Self::ensure) can make
    /// them alive.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates an index with room for `capacity` entities.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let reserved = EntityId::FIRST_USER_INDEX as usize;
        let mut slots = Vec::with_capacity(capacity + reserved);
        slots.resize(reserved, Slot::default());
        Self {
            slots,
            free_list: Vec::new(),
            live_count: 0,
        }
    }

    /// Allocates an entity id.
    ///
    /// Reuses indices from the free list when available.
    pub fn allocate(&mut self) -> EntityId {
        self.live_count += 1;

        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.alive = true;
            EntityId::new(index, slot.generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                alive: true,
                ..Slot::default()
            });
            EntityId::new(index, 0)
        }
    }

    /// Makes a specific id alive.
    ///
    /// Used for entities with fixed indices. Unreserved indices skipped over
    /// are pushed onto the free list.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyInUse` if a different generation of the index is
    /// alive.
    pub fn ensure(&mut self, id: EntityId) -> Result<()> {
        let idx = id.index() as usize;
        if idx == 0 {
            return Err(Error::invalid_parameter("cannot ensure the null entity"));
        }
        while self.slots.len() <= idx {
            let skipped = self.slots.len() as u32;
            self.slots.push(Slot::default());
            if (skipped as usize) < idx && skipped >= EntityId::FIRST_USER_INDEX {
                self.free_list.push(skipped);
            }
        }
        let slot = &mut self.slots[idx];
        if slot.alive {
            if slot.generation == id.generation() {
                return Ok(());
            }
            return Err(Error::already_in_use(format!(
                "index {} is alive with generation {}",
                id.index(),
                slot.generation
            )));
        }
        self.free_list.retain(|&i| i != id.index());
        slot.alive = true;
        slot.generation = id.generation();
        self.live_count += 1;
        Ok(())
    }

    /// Frees an entity.
    ///
    /// The generation of the index is bumped and the index is pushed onto
    /// the free list.
    ///
    /// # Errors
    ///
    /// Returns `NotAlive` if the entity is stale or was never allocated.
    pub fn destroy(&mut self, id: EntityId) -> Result<()> {
        self.validate(id)?;

        let slot = &mut self.slots[id.index() as usize];
        slot.alive = false;
        slot.generation = slot.generation.wrapping_add(1);
        slot.location = None;
        slot.traversed = false;
        self.free_list.push(id.index());
        self.live_count -= 1;

        Ok(())
    }

    /// Checks if an entity is alive with exactly this generation.
    #[must_use]
    pub fn is_alive(&self, id: EntityId) -> bool {
        self.slots
            .get(id.index() as usize)
            .is_some_and(|slot| slot.alive && slot.generation == id.generation())
    }

    /// Validates that an entity is alive.
    ///
    /// # Errors
    ///
    /// Returns `NotAlive` if the entity is stale or never existed.
    pub fn validate(&self, id: EntityId) -> Result<()> {
        if self.is_alive(id) {
            Ok(())
        } else {
            Err(Error::not_alive(id))
        }
    }

    /// Returns the live entity currently occupying `index`.
    ///
    /// Pair ids only store indices; this recovers the full id.
    #[must_use]
    pub fn alive_at(&self, index: u32) -> Option<EntityId> {
        self.slots
            .get(index as usize)
            .filter(|slot| slot.alive)
            .map(|slot| EntityId::new(index, slot.generation))
    }

    /// Records the location of a live entity.
    ///
    /// # Errors
    ///
    /// Returns `NotAlive` if the entity is not alive.
    pub fn set_location(&mut self, id: EntityId, location: Location) -> Result<()> {
        self.validate(id)?;
        self.slots[id.index() as usize].location = Some(location);
        Ok(())
    }

    /// Returns the location of a live entity.
    ///
    /// Live entities created in deferred mode have no location until the
    /// queue is flushed.
    ///
    /// # Errors
    ///
    /// Returns `NotAlive` if the entity is not alive.
    pub fn get_location(&self, id: EntityId) -> Result<Option<Location>> {
        self.validate(id)?;
        Ok(self.slots[id.index() as usize].location)
    }

    /// Returns the location, or `None` for dead or unplaced entities.
    #[must_use]
    pub fn location(&self, id: EntityId) -> Option<Location> {
        if self.is_alive(id) {
            self.slots[id.index() as usize].location
        } else {
            None
        }
    }

    /// Marks an entity as a traversal target.
    pub fn set_traversed(&mut self, id: EntityId, traversed: bool) {
        if self.is_alive(id) {
            self.slots[id.index() as usize].traversed = traversed;
        }
    }

    /// Returns true if queries or observers traverse to this entity.
    #[must_use]
    pub fn is_traversed(&self, id: EntityId) -> bool {
        self.is_alive(id) && self.slots[id.index() as usize].traversed
    }

    /// Returns the total number of live entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live_count
    }

    /// Returns true if there are no live entities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live_count == 0
    }

    /// Iterates over all live entity ids.
    pub fn iter(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.alive)
            .map(|(idx, slot)| EntityId::new(idx as u32, slot.generation))
    }

    /// Returns the current generation for an index, if it exists.
    #[must_use]
    pub fn generation(&self, index: u32) -> Option<u16> {
        self.slots.get(index as usize).map(|slot| slot.generation)
    }
}
