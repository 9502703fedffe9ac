//! Query descriptions.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use tessera_foundation::{EntityId, Error, Id, Result, Value};

use super::term::{Term, TermOper, TermSource};

/// Comparator used by `order_by`.
pub type OrderByFn = Arc<dyn Fn(&Value, &Value) -> Ordering + Send + Sync>;

/// Builder for a cached query.
///
/// ```
/// use tessera_engine::{QueryDesc, Term, World};
/// use tessera_foundation::Type;
///
/// let mut world = World::new();
/// let position = world.component("Position", Type::Float).unwrap();
/// let velocity = world.component("Velocity", Type::Float).unwrap();
///
/// let query = world
///     .query(QueryDesc::new().with(position).term(Term::new(velocity).write()))
///     .unwrap();
/// assert_eq!(world.count(query).unwrap(), 0);
/// ```
#[derive(Clone, Default)]
pub struct QueryDesc {
    pub(crate) terms: Vec<Term>,
    pub(crate) order_by: Option<(Id, OrderByFn)>,
    pub(crate) detect_changes: bool,
    pub(crate) match_empty_tables: bool,
    pub(crate) match_prefabs: bool,
    pub(crate) match_disabled: bool,
}

impl QueryDesc {
    /// Creates an empty description.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a required term.
    #[must_use]
    pub fn with(self, id: impl Into<Id>) -> Self {
        self.term(Term::new(id))
    }

    /// Adds a negated term.
    #[must_use]
    pub fn without(self, id: impl Into<Id>) -> Self {
        self.term(Term::new(id).not())
    }

    /// Adds an optional term.
    #[must_use]
    pub fn optional(self, id: impl Into<Id>) -> Self {
        self.term(Term::new(id).optional())
    }

    /// Adds a term.
    #[must_use]
    pub fn term(mut self, term: impl Into<Term>) -> Self {
        self.terms.push(term.into());
        self
    }

    /// Orders iteration by the values of `id` using `compare`.
    ///
    /// Equal keys keep their table order.
    #[must_use]
    pub fn order_by(
        mut self,
        id: impl Into<Id>,
        compare: impl Fn(&Value, &Value) -> Ordering + Send + Sync + 'static,
    ) -> Self {
        self.order_by = Some((id.into(), Arc::new(compare)));
        self
    }

    /// Enables [`World::changed`](crate::World::changed) for the query.
    #[must_use]
    pub fn detect_changes(mut self) -> Self {
        self.detect_changes = true;
        self
    }

    /// Iterates tables without rows too.
    #[must_use]
    pub fn match_empty_tables(mut self) -> Self {
        self.match_empty_tables = true;
        self
    }

    /// Matches entities that have `Prefab`.
    #[must_use]
    pub fn match_prefabs(mut self) -> Self {
        self.match_prefabs = true;
        self
    }

    /// Matches entities that have `Disabled`.
    #[must_use]
    pub fn match_disabled(mut self) -> Self {
        self.match_disabled = true;
        self
    }

    /// The terms added so far.
    #[must_use]
    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    /// Validates the description.
    ///
    /// # Errors
    ///
    /// See [`QueryDesc::validate`].
    pub fn build(self) -> Result<Self> {
        self.validate()?;
        Ok(self)
    }

    /// Checks that the terms describe a query that can be matched.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if:
    /// - there are no terms
    /// - a term uses the null id, a null source, or a wildcard relationship
    ///   to traverse
    /// - terms on the matched entity exist but none is required
    /// - a negated term combines a wildcard with upwards traversal
    /// - the `order_by` id is not a required term on the matched entity
    pub fn validate(&self) -> Result<()> {
        if self.terms.is_empty() {
            return Err(Error::invalid_parameter("query has no terms"));
        }

        for term in &self.terms {
            validate_term(term)?;
        }

        let this_terms: Vec<&Term> = self.terms.iter().filter(|t| t.src.is_this()).collect();
        if !this_terms.is_empty() && !this_terms.iter().any(|t| t.oper == TermOper::And) {
            return Err(Error::invalid_parameter(
                "query needs at least one required term on the matched entity",
            ));
        }

        if let Some((id, _)) = &self.order_by {
            let present = self
                .terms
                .iter()
                .any(|t| t.id == *id && t.src == TermSource::This && t.oper == TermOper::And);
            if !present || id.is_wildcard() {
                return Err(Error::invalid_parameter(format!(
                    "order_by id {id} must be a required term on the matched entity"
                )));
            }
        }

        Ok(())
    }
}

/// Checks a single term.
pub(crate) fn validate_term(term: &Term) -> Result<()> {
    let id = term.id;
    if id.first().is_null() || id.second().is_some_and(EntityId::is_null) {
        return Err(Error::invalid_parameter(format!("term {term:?} uses the null id")));
    }
    match term.src {
        TermSource::Fixed(e) if e.is_null() || e.is_wildcard() => {
            return Err(Error::invalid_parameter(format!(
                "term {term:?} needs a concrete source"
            )));
        }
        TermSource::Up(rel) | TermSource::SelfUp(rel) if rel.is_null() || rel.is_wildcard() => {
            return Err(Error::invalid_parameter(format!(
                "term {term:?} traverses a wildcard relationship"
            )));
        }
        _ => {}
    }
    if term.oper == TermOper::Not && id.is_wildcard() && term.src.traversal().is_some() {
        return Err(Error::invalid_parameter(format!(
            "negated wildcard term {term:?} cannot traverse upwards"
        )));
    }
    Ok(())
}

impl fmt::Debug for QueryDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryDesc")
            .field("terms", &self.terms)
            .field("order_by", &self.order_by.as_ref().map(|(id, _)| *id))
            .field("detect_changes", &self.detect_changes)
            .field("match_empty_tables", &self.match_empty_tables)
            .field("match_prefabs", &self.match_prefabs)
            .field("match_disabled", &self.match_disabled)
            .finish()
    }
}
