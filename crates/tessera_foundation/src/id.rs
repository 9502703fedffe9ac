//! Entity identifiers and component ids.
//!
//! An [`EntityId`] is a 64-bit value: the low 32 bits are a recyclable index,
//! bits 32..48 hold a generation counter that is bumped every time the index
//! is recycled. An [`Id`] is what gets attached to an entity: either a plain
//! entity (a component or tag) or a relationship pair `(first, second)`.
//!
//! # Layout
//!
//! ```text
//! entity: [ flags:16 | generation:16 | index:32 ]
//! pair:   [ PAIR | first index:31     | second index:32 ]
//! ```

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

const INDEX_MASK: u64 = 0xFFFF_FFFF;
const GENERATION_SHIFT: u32 = 32;
const GENERATION_MASK: u64 = 0xFFFF << GENERATION_SHIFT;
const PAIR_FLAG: u64 = 1 << 63;
const FIRST_MASK: u64 = 0x7FFF_FFFF;

/// Entity identifier with a generational index for stale reference detection.
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EntityId(u64);

impl EntityId {
    /// The "no entity" sentinel. Index 0 is never allocated.
    pub const NULL: EntityId = EntityId(0);

    /// Matches any id (or any element of a pair) and yields every match.
    pub const WILDCARD: EntityId = EntityId(1);
    /// Matches any id (or any element of a pair) and yields at most one match.
    pub const ANY: EntityId = EntityId(2);
    /// Hierarchy relationship: `(ChildOf, parent)`.
    pub const CHILD_OF: EntityId = EntityId(3);
    /// Inheritance relationship: `(IsA, base)`.
    pub const IS_A: EntityId = EntityId(4);
    /// Tag for entities that only exist to be instantiated.
    pub const PREFAB: EntityId = EntityId(5);
    /// Tag for entities that queries skip by default.
    pub const DISABLED: EntityId = EntityId(6);
    /// Event emitted after an id is added to an entity.
    pub const ON_ADD: EntityId = EntityId(7);
    /// Event emitted before an id is removed from an entity.
    pub const ON_REMOVE: EntityId = EntityId(8);
    /// Event emitted after a component value is assigned.
    pub const ON_SET: EntityId = EntityId(9);

    /// Builtin entities, in the order the world makes them alive.
    pub const BUILTINS: [EntityId; 9] = [
        Self::WILDCARD,
        Self::ANY,
        Self::CHILD_OF,
        Self::IS_A,
        Self::PREFAB,
        Self::DISABLED,
        Self::ON_ADD,
        Self::ON_REMOVE,
        Self::ON_SET,
    ];

    /// Indices below this value are reserved and never handed out by the
    /// allocator.
    pub const FIRST_USER_INDEX: u32 = 32;

    /// Creates an entity id from an index and a generation.
    #[must_use]
    pub const fn new(index: u32, generation: u16) -> Self {
        Self(((generation as u64) << GENERATION_SHIFT) | index as u64)
    }

    /// Reinterprets a raw 64-bit value.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw 64-bit value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Returns the recyclable index.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn index(self) -> u32 {
        (self.0 & INDEX_MASK) as u32
    }

    /// Returns the generation counter.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn generation(self) -> u16 {
        ((self.0 & GENERATION_MASK) >> GENERATION_SHIFT) as u16
    }

    /// Returns true if this is the null sentinel.
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Returns true if this is one of the two wildcard entities.
    #[must_use]
    pub const fn is_wildcard(self) -> bool {
        self.index() == Self::WILDCARD.index() || self.index() == Self::ANY.index()
    }

    /// Returns true if this entity is one of the builtins.
    #[must_use]
    pub const fn is_builtin(self) -> bool {
        self.index() != 0 && self.index() <= Self::ON_SET.index()
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "EntityId(null)")
        } else {
            write!(f, "EntityId({}v{})", self.index(), self.generation())
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::NULL => write!(f, "null"),
            Self::WILDCARD => write!(f, "*"),
            Self::ANY => write!(f, "_"),
            Self::CHILD_OF => write!(f, "ChildOf"),
            Self::IS_A => write!(f, "IsA"),
            Self::PREFAB => write!(f, "Prefab"),
            Self::DISABLED => write!(f, "Disabled"),
            Self::ON_ADD => write!(f, "OnAdd"),
            Self::ON_REMOVE => write!(f, "OnRemove"),
            Self::ON_SET => write!(f, "OnSet"),
            _ => write!(f, "#{}", self.index()),
        }
    }
}

/// An id that can be attached to an entity: a component, a tag or a pair.
///
/// Ids order by their raw value, so plain ids sort before pairs and pairs
/// with the same relationship are adjacent.
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Id(u64);

impl Id {
    /// The wildcard id `*`.
    pub const WILDCARD: Id = Id(EntityId::WILDCARD.0);
    /// The any id `_`.
    pub const ANY: Id = Id(EntityId::ANY.0);

    /// Creates a relationship pair.
    ///
    /// Only the indices of the two entities are encoded; generations are
    /// resolved against the entity index when the pair elements are needed.
    #[must_use]
    pub const fn pair(first: EntityId, second: EntityId) -> Self {
        let first = first.index() as u64 & FIRST_MASK;
        let second = second.index() as u64;
        Self(PAIR_FLAG | (first << 32) | second)
    }

    /// Reinterprets a raw 64-bit value.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw 64-bit value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Returns true if this id is a pair.
    #[must_use]
    pub const fn is_pair(self) -> bool {
        self.0 & PAIR_FLAG != 0
    }

    /// Returns the entity for a plain id, or `None` for a pair.
    #[must_use]
    pub const fn entity(self) -> Option<EntityId> {
        if self.is_pair() {
            None
        } else {
            Some(EntityId(self.0))
        }
    }

    /// Returns the first element of a pair (generation 0), or the entity
    /// itself for a plain id.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn first(self) -> EntityId {
        if self.is_pair() {
            EntityId::new(((self.0 >> 32) & FIRST_MASK) as u32, 0)
        } else {
            EntityId(self.0)
        }
    }

    /// Returns the second element of a pair (generation 0), or `None` for a
    /// plain id.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn second(self) -> Option<EntityId> {
        if self.is_pair() {
            Some(EntityId::new((self.0 & INDEX_MASK) as u32, 0))
        } else {
            None
        }
    }

    /// Returns true if this id contains a wildcard anywhere.
    #[must_use]
    pub const fn is_wildcard(self) -> bool {
        if self.is_pair() {
            let second = match self.second() {
                Some(s) => s,
                None => EntityId::NULL,
            };
            self.first().is_wildcard() || second.is_wildcard()
        } else {
            EntityId(self.0).is_wildcard()
        }
    }

    /// Returns true if this id is `_` or contains `_`.
    #[must_use]
    pub fn is_any(self) -> bool {
        let is_any = |e: EntityId| e.index() == EntityId::ANY.index();
        is_any(self.first()) || self.second().is_some_and(is_any)
    }

    /// Tests whether this concrete id matches `pattern`.
    ///
    /// A plain `*`/`_` pattern matches every plain id. A pair pattern matches pairs
    /// whose elements equal the pattern's elements, where a wildcard element
    /// matches anything.
    #[must_use]
    pub fn matches(self, pattern: Id) -> bool {
        if self == pattern {
            return true;
        }
        if !pattern.is_pair() {
            return !self.is_pair() && pattern.first().is_wildcard();
        }
        if !self.is_pair() {
            return false;
        }
        let element = |pat: EntityId, actual: EntityId| {
            pat.is_wildcard() || pat.index() == actual.index()
        };
        element(pattern.first(), self.first())
            && match (pattern.second(), self.second()) {
                (Some(p), Some(a)) => element(p, a),
                _ => false,
            }
    }

    /// Returns the wildcard patterns under which this concrete id is indexed.
    ///
    /// For `(R, T)` these are `(R, *)`, `(*, T)` and `(*, *)`; for a plain id
    /// it is `*`.
    #[must_use]
    pub fn wildcard_patterns(self) -> Vec<Id> {
        match self.second() {
            Some(second) => {
                let first = self.first();
                vec![
                    Id::pair(first, EntityId::WILDCARD),
                    Id::pair(EntityId::WILDCARD, second),
                    Id::pair(EntityId::WILDCARD, EntityId::WILDCARD),
                ]
            }
            None => vec![Id::WILDCARD],
        }
    }
}

impl From<EntityId> for Id {
    fn from(entity: EntityId) -> Self {
        Self(entity.0)
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({self})")
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.second() {
            Some(second) => write!(f, "({}, {})", self.first(), second),
            None => write!(f, "{}", self.first()),
        }
    }
}
