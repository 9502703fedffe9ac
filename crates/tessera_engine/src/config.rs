//! World configuration and runtime counters.

/// Configuration for a [`World`](crate::World).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorldConfig {
    /// Maximum number of relationship hops followed when resolving up
    /// sources, inherited values and event propagation.
    pub max_traversal_depth: usize,

    /// Number of entity slots to reserve up front.
    pub entity_capacity: usize,

    /// Sweep empty tables after bulk deletes.
    pub auto_sweep_tables: bool,

    /// Maintain [`WorldStats`] counters.
    pub track_stats: bool,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            max_traversal_depth: 64,
            entity_capacity: 0,
            auto_sweep_tables: false,
            track_stats: true,
        }
    }
}

impl WorldConfig {
    /// Configuration for large worlds: reserves entity slots and sweeps
    /// empty tables after bulk deletes.
    #[must_use]
    pub fn large(capacity: usize) -> Self {
        Self {
            entity_capacity: capacity,
            auto_sweep_tables: true,
            ..Self::default()
        }
    }

    /// Configuration with counters disabled.
    #[must_use]
    pub fn minimal() -> Self {
        Self {
            track_stats: false,
            ..Self::default()
        }
    }

    /// Builder method to set the traversal depth limit.
    #[must_use]
    pub fn with_max_traversal_depth(mut self, depth: usize) -> Self {
        self.max_traversal_depth = depth;
        self
    }

    /// Builder method to set the entity capacity hint.
    #[must_use]
    pub fn with_entity_capacity(mut self, capacity: usize) -> Self {
        self.entity_capacity = capacity;
        self
    }

    /// Builder method to enable/disable sweeping after bulk deletes.
    #[must_use]
    pub fn with_auto_sweep_tables(mut self, sweep: bool) -> Self {
        self.auto_sweep_tables = sweep;
        self
    }

    /// Builder method to enable/disable counters.
    #[must_use]
    pub fn with_track_stats(mut self, track: bool) -> Self {
        self.track_stats = track;
        self
    }
}

/// Counters describing the work a world has done.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorldStats {
    /// Tables created, including the root table.
    pub tables_created: u64,
    /// Tables deleted by sweeps.
    pub tables_deleted: u64,
    /// Rows moved between tables.
    pub table_moves: u64,
    /// Commands recorded while deferred.
    pub commands_enqueued: u64,
    /// Commands applied by flushes.
    pub commands_flushed: u64,
    /// Observer callback invocations.
    pub observers_invoked: u64,
    /// Query match sets recomputed after a traversed entity moved.
    pub query_rematches: u64,
    /// Sort rebuilds of `order_by` queries.
    pub query_sorts: u64,
}
