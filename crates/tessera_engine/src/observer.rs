//! Observers and events.
//!
//! An observer is a filter (the same [`Term`]s queries use), a set of event
//! kinds and a callback. Observers are indexed by `(event, id)` for every
//! triggering term, so an emit only looks at observers that can care about
//! the id that changed. Monitors (`enter`/`leave` a filter) are kept apart:
//! they are evaluated once per move, as a derived `OnAdd`/`OnRemove` pair.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tessera_foundation::{EntityId, Error, Id, Result, Value};
use tessera_storage::{Table, TableId};

use crate::commands::Commands;
use crate::query::cache::{Compiled, FieldMatch, FieldSource, record_key};
use crate::query::desc::validate_term;
use crate::query::term::Term;
use crate::world::World;

/// Observer callback.
pub type ObserverCallback = Arc<dyn Fn(&mut ObserverIter<'_>) + Send + Sync>;

/// Handle of a registered observer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u32);

impl ObserverId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// A custom event.
#[derive(Clone, Debug, PartialEq)]
pub struct EventDesc {
    /// Event kind; any entity, including the builtin `OnAdd`/`OnRemove`/
    /// `OnSet`.
    pub event: EntityId,
    /// Ids the event is about. Empty means `*`.
    pub ids: Vec<Id>,
    /// Entity the event is about.
    pub entity: Option<EntityId>,
    /// Data handed to observers.
    pub payload: Option<Value>,
}

impl EventDesc {
    /// Creates an event of the given kind.
    #[must_use]
    pub fn new(event: EntityId) -> Self {
        Self {
            event,
            ids: Vec::new(),
            entity: None,
            payload: None,
        }
    }

    /// Adds an id.
    #[must_use]
    pub fn id(mut self, id: impl Into<Id>) -> Self {
        self.ids.push(id.into());
        self
    }

    /// Sets the entity.
    #[must_use]
    pub fn entity(mut self, entity: EntityId) -> Self {
        self.entity = Some(entity);
        self
    }

    /// Sets the payload.
    #[must_use]
    pub fn payload(mut self, payload: impl Into<Value>) -> Self {
        self.payload = Some(payload.into());
        self
    }
}

/// Builder for an observer.
#[derive(Clone, Default)]
pub struct ObserverDesc {
    pub(crate) terms: Vec<Term>,
    pub(crate) events: Vec<EntityId>,
    pub(crate) yield_existing: bool,
    pub(crate) monitor: bool,
    pub(crate) callback: Option<ObserverCallback>,
}

impl ObserverDesc {
    /// Creates an empty description.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a term.
    #[must_use]
    pub fn term(mut self, term: impl Into<Term>) -> Self {
        self.terms.push(term.into());
        self
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

    /// Subscribes to an event kind.
    #[must_use]
    pub fn event(mut self, event: EntityId) -> Self {
        if !self.events.contains(&event) {
            self.events.push(event);
        }
        self
    }

    /// Invokes the observer at registration for entities that already
    /// match (`OnAdd` and `OnSet` only).
    #[must_use]
    pub fn yield_existing(mut self) -> Self {
        self.yield_existing = true;
        self
    }

    /// Turns the observer into a monitor: `OnAdd` when an entity starts
    /// matching the filter, `OnRemove` when it stops.
    #[must_use]
    pub fn monitor(mut self) -> Self {
        self.monitor = true;
        self
    }

    /// Sets the callback.
    #[must_use]
    pub fn callback(mut self, f: impl Fn(&mut ObserverIter<'_>) + Send + Sync + 'static) -> Self {
        self.callback = Some(Arc::new(f));
        self
    }

    /// Checks the description.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if there are no terms, no term can
    /// trigger on the observed entity, no event is subscribed (monitors
    /// excepted), or the callback is missing.
    pub fn validate(&self) -> Result<()> {
        if self.terms.is_empty() {
            return Err(Error::invalid_parameter("observer has no terms"));
        }
        for term in &self.terms {
            validate_term(term)?;
        }
        if !self.terms.iter().any(|t| t.triggers() && t.src.is_this()) {
            return Err(Error::invalid_parameter(
                "observer needs a triggering term on the observed entity",
            ));
        }
        if self.events.is_empty() && !self.monitor {
            return Err(Error::invalid_parameter("observer has no events"));
        }
        if self.callback.is_none() {
            return Err(Error::invalid_parameter("observer has no callback"));
        }
        Ok(())
    }
}

impl fmt::Debug for ObserverDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverDesc")
            .field("terms", &self.terms)
            .field("events", &self.events)
            .field("yield_existing", &self.yield_existing)
            .field("monitor", &self.monitor)
            .finish_non_exhaustive()
    }
}

/// A registered observer.
pub(crate) struct Observer {
    pub(crate) compiled: Compiled,
    pub(crate) events: Vec<EntityId>,
    pub(crate) monitor: bool,
    pub(crate) callback: ObserverCallback,
    /// Indices of triggering terms.
    pub(crate) triggers: Vec<usize>,
    /// Relationships traversed by up terms.
    pub(crate) up_rels: Vec<EntityId>,
}

impl Observer {
    pub(crate) fn new(desc: ObserverDesc, compiled: Compiled, callback: ObserverCallback) -> Self {
        let triggers = compiled
            .terms
            .iter()
            .enumerate()
            .filter(|(_, t)| t.triggers() && t.src.is_this())
            .map(|(i, _)| i)
            .collect();
        let mut up_rels: Vec<EntityId> = compiled
            .terms
            .iter()
            .filter_map(|t| t.src.traversal())
            .collect();
        up_rels.sort_unstable();
        up_rels.dedup();
        let events = if desc.monitor {
            vec![EntityId::ON_ADD, EntityId::ON_REMOVE]
        } else {
            desc.events
        };
        Self {
            compiled,
            events,
            monitor: desc.monitor,
            callback,
            triggers,
            up_rels,
        }
    }

    pub(crate) fn observes(&self, event: EntityId) -> bool {
        self.events.contains(&event)
    }

    /// Triggering terms of a result that matched `id` through `source`.
    pub(crate) fn triggered_by(&self, fields: &[FieldMatch], id: Id, source: FieldSource) -> bool {
        self.triggers.iter().any(|&t| {
            let field = &fields[t];
            field.source == source && covers(field.id, id)
        })
    }
}

/// Returns true if a matched id satisfies an emitted (possibly wildcard)
/// id.
pub(crate) fn covers(matched: Id, emitted: Id) -> bool {
    matched == emitted
        || emitted == Id::WILDCARD
        || (emitted.is_wildcard() && matched.matches(emitted))
}

/// All registered observers and their trigger index.
#[derive(Default)]
pub(crate) struct ObserverSet {
    observers: Vec<Option<Observer>>,
    index: HashMap<(EntityId, Id), Vec<ObserverId>>,
    by_event: HashMap<EntityId, Vec<ObserverId>>,
    monitors: Vec<ObserverId>,
    up: usize,
}

impl ObserverSet {
    pub(crate) fn insert(&mut self, observer: Observer) -> ObserverId {
        let id = ObserverId(u32::try_from(self.observers.len()).unwrap_or(u32::MAX));
        if observer.monitor {
            self.monitors.push(id);
        } else {
            for &event in &observer.events {
                self.by_event.entry(event).or_default().push(id);
                for &t in &observer.triggers {
                    let key = record_key(observer.compiled.terms[t].id);
                    let list = self.index.entry((event, key)).or_default();
                    if !list.contains(&id) {
                        list.push(id);
                    }
                }
            }
        }
        if !observer.up_rels.is_empty() {
            self.up += 1;
        }
        self.observers.push(Some(observer));
        id
    }

    pub(crate) fn remove(&mut self, id: ObserverId) -> bool {
        let Some(observer) = self.observers.get_mut(id.index()).and_then(Option::take) else {
            return false;
        };
        self.monitors.retain(|&m| m != id);
        for list in self.index.values_mut().chain(self.by_event.values_mut()) {
            list.retain(|&o| o != id);
        }
        if !observer.up_rels.is_empty() {
            self.up -= 1;
        }
        true
    }

    pub(crate) fn get(&self, id: ObserverId) -> Option<&Observer> {
        self.observers.get(id.index()).and_then(Option::as_ref)
    }

    /// Non-monitor observers subscribed to `event` whose triggers can match
    /// `id`, in registration order.
    pub(crate) fn candidates(&self, event: EntityId, id: Id) -> Vec<ObserverId> {
        let mut found: Vec<ObserverId> = if id.is_wildcard() {
            self.by_event
                .get(&event)
                .into_iter()
                .flatten()
                .copied()
                .filter(|&o| {
                    self.get(o).is_some_and(|obs| {
                        id == Id::WILDCARD
                            || obs.triggers.iter().any(|&t| {
                                let key = record_key(obs.compiled.terms[t].id);
                                key == record_key(id) || key.matches(id)
                            })
                    })
                })
                .collect()
        } else {
            std::iter::once(id)
                .chain(id.wildcard_patterns())
                .filter_map(|key| self.index.get(&(event, key)))
                .flatten()
                .copied()
                .collect()
        };
        found.sort_unstable();
        found.dedup();
        found
    }

    pub(crate) fn monitors(&self) -> &[ObserverId] {
        &self.monitors
    }

    /// Returns true if any observer traverses relationships.
    pub(crate) fn has_up(&self) -> bool {
        self.up > 0
    }

    /// Observers with up terms, in registration order.
    pub(crate) fn up_observers(&self) -> Vec<ObserverId> {
        self.observers
            .iter()
            .enumerate()
            .filter_map(|(i, o)| o.as_ref().filter(|o| !o.up_rels.is_empty()).map(|_| i))
            .map(|i| ObserverId(u32::try_from(i).unwrap_or(u32::MAX)))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.observers.iter().flatten().count()
    }
}

/// What an observer callback sees.
pub struct ObserverIter<'w> {
    pub(crate) world: &'w World,
    pub(crate) event: EntityId,
    pub(crate) event_id: Id,
    pub(crate) entity: Option<EntityId>,
    pub(crate) table: Option<TableId>,
    pub(crate) fields: Vec<FieldMatch>,
    pub(crate) payload: Option<Value>,
    pub(crate) commands: Commands,
}

impl<'w> ObserverIter<'w> {
    /// The world, read-only. Structural changes go through
    /// [`ObserverIter::commands`].
    #[must_use]
    pub fn world(&self) -> &'w World {
        self.world
    }

    /// The event kind.
    #[must_use]
    pub fn event(&self) -> EntityId {
        self.event
    }

    /// The concrete id that triggered the observer.
    #[must_use]
    pub fn event_id(&self) -> Id {
        self.event_id
    }

    /// The entity the event is about.
    #[must_use]
    pub fn entity(&self) -> Option<EntityId> {
        self.entity
    }

    /// The table the filter was evaluated against. For `OnRemove` this is
    /// the table the entity is leaving.
    #[must_use]
    pub fn table(&self) -> Option<&'w Table> {
        self.table.and_then(|t| self.world.store.table(t))
    }

    /// Value of term `index` for the entity.
    #[must_use]
    pub fn field(&self, index: usize) -> Option<&'w Value> {
        let field = self.fields.get(index)?;
        let column = field.column?;
        let store = &self.world.store;
        let (table, row) = match field.source {
            FieldSource::This => {
                let location = store.entities().location(self.entity?)?;
                if Some(location.table) != self.table {
                    return None;
                }
                (location.table, location.row())
            }
            FieldSource::Shared(source) => {
                let location = store.entities().location(source)?;
                (location.table, location.row())
            }
            FieldSource::NotSet => return None,
        };
        store.table(table)?.column(column)?.values().get(row)
    }

    /// The concrete id term `index` matched.
    #[must_use]
    pub fn id(&self, index: usize) -> Option<Id> {
        self.fields.get(index).map(|f| f.id)
    }

    /// Returns true if term `index` is present.
    #[must_use]
    pub fn is_set(&self, index: usize) -> bool {
        self.fields.get(index).is_some_and(FieldMatch::is_set)
    }

    /// The entity term `index` matched on, for shared fields.
    #[must_use]
    pub fn src(&self, index: usize) -> Option<EntityId> {
        match self.fields.get(index)?.source {
            FieldSource::Shared(entity) => Some(entity),
            FieldSource::This | FieldSource::NotSet => None,
        }
    }

    /// Payload of a custom event.
    #[must_use]
    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    /// Command buffer for structural changes, applied after the emit.
    pub fn commands(&mut self) -> &mut Commands {
        &mut self.commands
    }

    pub(crate) fn into_commands(self) -> Commands {
        self.commands
    }
}
