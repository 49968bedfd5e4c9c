use std::fmt::{self, Debug};

/// A snapshot of the diagnostic counters of a map.
///
/// The counters are updated with relaxed atomics by whichever thread performs
/// the corresponding step, so a snapshot taken while other threads are
/// mutating the map may be slightly behind. After all threads have finished,
/// the following holds:
///
/// - `migrations_completed <= migrations_started`. Every completed migration
///   replaced the root table exactly once.
/// - `migrations_restarted` counts migrations whose destination table
///   overflowed and that were restarted into a larger destination. A
///   restarted migration does not count as a new start.
/// - `tables_retired` counts tables unlinked from the map and handed to the
///   reclamation queue.
/// - `objects_reclaimed <= objects_retired`. The difference is the number of
///   tables and migration records that are waiting for every thread to pass a
///   quiescent state.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct MapStats {
    migrations_started: u64,
    migrations_completed: u64,
    migrations_restarted: u64,
    tables_retired: u64,
    objects_retired: u64,
    objects_reclaimed: u64,
    capacity: usize,
}

impl Debug for MapStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapStats")
            .field("migrations_started", &self.migrations_started)
            .field("migrations_completed", &self.migrations_completed)
            .field("migrations_restarted", &self.migrations_restarted)
            .field("tables_retired", &self.tables_retired)
            .field("objects_retired", &self.objects_retired)
            .field("objects_reclaimed", &self.objects_reclaimed)
            .field("objects_pending", &self.objects_pending())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl MapStats {
    pub(crate) fn set_migration_counts(
        &mut self,
        started: u64,
        completed: u64,
        restarted: u64,
    ) -> &mut Self {
        self.migrations_started = started;
        self.migrations_completed = completed;
        self.migrations_restarted = restarted;
        self
    }

    pub(crate) fn set_reclamation_counts(
        &mut self,
        tables_retired: u64,
        objects_retired: u64,
        objects_reclaimed: u64,
    ) -> &mut Self {
        self.tables_retired = tables_retired;
        self.objects_retired = objects_retired;
        self.objects_reclaimed = objects_reclaimed;
        self
    }

    pub(crate) fn set_capacity(&mut self, capacity: usize) -> &mut Self {
        self.capacity = capacity;
        self
    }

    /// Number of table migrations that have been started.
    pub fn migrations_started(&self) -> u64 {
        self.migrations_started
    }

    /// Number of table migrations that published a new root table.
    pub fn migrations_completed(&self) -> u64 {
        self.migrations_completed
    }

    /// Number of times a migration had to be restarted because its destination
    /// table overflowed.
    pub fn migrations_restarted(&self) -> u64 {
        self.migrations_restarted
    }

    /// Number of tables that were unlinked and queued for reclamation.
    pub fn tables_retired(&self) -> u64 {
        self.tables_retired
    }

    /// Number of objects (tables and migration records) queued for
    /// reclamation. This is the reclamation generation of the map.
    pub fn objects_retired(&self) -> u64 {
        self.objects_retired
    }

    /// Number of queued objects that have actually been freed.
    pub fn objects_reclaimed(&self) -> u64 {
        self.objects_reclaimed
    }

    /// Number of queued objects that have not been freed yet.
    pub fn objects_pending(&self) -> u64 {
        self.objects_retired.saturating_sub(self.objects_reclaimed)
    }

    /// Number of cells in the root table when the snapshot was taken.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
