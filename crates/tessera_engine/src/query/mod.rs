//! Cached queries: term lists, matching, and iteration.

pub(crate) mod cache;
pub mod desc;
pub mod iter;
pub mod term;

use std::fmt;

pub use cache::{FieldMatch, FieldSource};
pub use desc::{OrderByFn, QueryDesc};
pub use iter::{QueryIter, RunIter};
pub use term::{InOut, Term, TermOper, TermSource};

/// Handle of a registered query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryId(u32);

impl QueryId {
    pub(crate) fn new(index: usize) -> Self {
        Self(u32::try_from(index).unwrap_or(u32::MAX))
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "query#{}", self.0)
    }
}
