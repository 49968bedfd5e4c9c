use super::MapStats;

use crossbeam_utils::atomic::AtomicCell;

/// Migration counters shared by a map and the migrations running on it.
#[derive(Default)]
pub(crate) struct MigrationCounter {
    started: AtomicCell<u64>,
    completed: AtomicCell<u64>,
    restarted: AtomicCell<u64>,
    tables_retired: AtomicCell<u64>,
}

impl MigrationCounter {
    pub(crate) fn record_start(&self) {
        self.started.fetch_add(1);
    }

    pub(crate) fn record_completion(&self, retired_tables: usize) {
        self.completed.fetch_add(1);
        self.tables_retired.fetch_add(retired_tables as u64);
    }

    pub(crate) fn record_restart(&self) {
        self.restarted.fetch_add(1);
    }

    pub(crate) fn snapshot(&self) -> MapStats {
        let mut stats = MapStats::default();
        stats.set_migration_counts(
            self.started.load(),
            self.completed.load(),
            self.restarted.load(),
        );
        stats
    }

    pub(crate) fn tables_retired(&self) -> u64 {
        self.tables_retired.load()
    }
}
