//! Query terms.
//!
//! A term names an id, where to look for it (`src`), how it combines with
//! the other terms (`oper`) and how iteration accesses its field (`inout`).

use std::fmt;

use tessera_foundation::{EntityId, Id};

/// Where a term looks for its id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum TermSource {
    /// The entity being matched.
    #[default]
    This,
    /// The nearest ancestor along a traversable relationship.
    Up(EntityId),
    /// The entity itself, falling back to its ancestors.
    SelfUp(EntityId),
    /// A fixed entity.
    Fixed(EntityId),
}

impl TermSource {
    /// The relationship traversed upwards, if any.
    #[must_use]
    pub fn traversal(self) -> Option<EntityId> {
        match self {
            Self::Up(rel) | Self::SelfUp(rel) => Some(rel),
            Self::This | Self::Fixed(_) => None,
        }
    }

    /// Returns true if the term is resolved relative to the matched entity.
    #[must_use]
    pub fn is_this(self) -> bool {
        !matches!(self, Self::Fixed(_))
    }
}

/// How a term combines with the others.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum TermOper {
    /// The id must be present.
    #[default]
    And,
    /// The id must be absent.
    Not,
    /// The id may be present.
    Optional,
}

/// How iteration accesses a term's field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum InOut {
    /// Read access.
    #[default]
    Default,
    /// Read-only.
    In,
    /// Write-only.
    Out,
    /// Read and write.
    InOut,
    /// Matching only; no field access and no change tracking.
    Filter,
}

/// One term of a query or observer filter.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Term {
    /// The id to match. May contain wildcards.
    pub id: Id,
    /// Where to look for the id.
    pub src: TermSource,
    /// How the term combines with the others.
    pub oper: TermOper,
    /// Field access.
    pub inout: InOut,
}

impl Term {
    /// A required term on the matched entity.
    #[must_use]
    pub fn new(id: impl Into<Id>) -> Self {
        Self {
            id: id.into(),
            src: TermSource::This,
            oper: TermOper::And,
            inout: InOut::Default,
        }
    }

    /// A required pair term.
    #[must_use]
    pub fn pair(rel: EntityId, target: EntityId) -> Self {
        Self::new(Id::pair(rel, target))
    }

    /// Looks for the id on ancestors along `rel` only.
    #[must_use]
    pub fn up(mut self, rel: EntityId) -> Self {
        self.src = TermSource::Up(rel);
        self
    }

    /// Looks for the id on the entity, then its ancestors along `rel`.
    #[must_use]
    pub fn self_up(mut self, rel: EntityId) -> Self {
        self.src = TermSource::SelfUp(rel);
        self
    }

    /// Looks for the id on a fixed entity.
    #[must_use]
    pub fn src(mut self, entity: EntityId) -> Self {
        self.src = TermSource::Fixed(entity);
        self
    }

    /// Negates the term.
    #[must_use]
    pub fn not(mut self) -> Self {
        self.oper = TermOper::Not;
        self
    }

    /// Makes the term optional.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.oper = TermOper::Optional;
        self
    }

    /// Sets field access.
    #[must_use]
    pub fn inout(mut self, inout: InOut) -> Self {
        self.inout = inout;
        self
    }

    /// Marks the field written (`InOut`).
    #[must_use]
    pub fn write(self) -> Self {
        self.inout(InOut::InOut)
    }

    /// Marks the term as matching-only.
    #[must_use]
    pub fn filter(self) -> Self {
        self.inout(InOut::Filter)
    }

    /// Returns true if iteration reads the field, so writes to it count as
    /// changes for this query.
    #[must_use]
    pub fn reads(&self) -> bool {
        self.oper != TermOper::Not && matches!(self.inout, InOut::Default | InOut::In | InOut::InOut)
    }

    /// Returns true if iteration may write the field.
    #[must_use]
    pub fn writes(&self) -> bool {
        self.oper != TermOper::Not && matches!(self.inout, InOut::Out | InOut::InOut)
    }

    /// Returns true if a change of this term's id can trigger an observer.
    #[must_use]
    pub fn triggers(&self) -> bool {
        self.oper != TermOper::Not && self.inout != InOut::Filter
    }

    /// Returns true if the term mentions `entity` as its id or a pair
    /// element.
    #[must_use]
    pub fn mentions(&self, entity: EntityId) -> bool {
        self.id.first().index() == entity.index()
            || self.id.second().is_some_and(|s| s.index() == entity.index())
    }
}

impl fmt::Debug for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.oper {
            TermOper::And => {}
            TermOper::Not => write!(f, "!")?,
            TermOper::Optional => write!(f, "?")?,
        }
        write!(f, "{}", self.id)?;
        match self.src {
            TermSource::This => {}
            TermSource::Up(rel) => write!(f, "(up {rel})")?,
            TermSource::SelfUp(rel) => write!(f, "(self|up {rel})")?,
            TermSource::Fixed(e) => write!(f, "({e})")?,
        }
        match self.inout {
            InOut::Default => Ok(()),
            InOut::In => write!(f, " [in]"),
            InOut::Out => write!(f, " [out]"),
            InOut::InOut => write!(f, " [inout]"),
            InOut::Filter => write!(f, " [filter]"),
        }
    }
}

impl From<Id> for Term {
    fn from(id: Id) -> Self {
        Self::new(id)
    }
}

impl From<EntityId> for Term {
    fn from(entity: EntityId) -> Self {
        Self::new(entity)
    }
}
