use super::{
    cell::{is_redirect, redirect},
    map::Inner,
    table::{InsertResult, Table},
};
use crate::common::{constants::TABLE_MIGRATION_UNIT_SIZE, key::NULL_HASH};

use std::sync::atomic::{AtomicBool, AtomicIsize, AtomicUsize, Ordering};

use crossbeam_epoch::{Atomic, Guard, Owned, Shared};
use smallvec::SmallVec;

/// Bit 0 of the worker status. Once set, no thread may join the migration.
const END_FLAG: usize = 1;

/// A table being copied, and the cursor over its not yet claimed units.
pub(crate) struct MigrationSource<V> {
    table: Atomic<Table<V>>,
    source_index: AtomicUsize,
}

impl<V> MigrationSource<V> {
    fn new(table: Shared<'_, Table<V>>) -> Self {
        Self {
            table: Atomic::from(table),
            source_index: AtomicUsize::new(0),
        }
    }
}

/// Copies the live cells of one or more source tables into a destination
/// table that nobody else can reach yet.
///
/// Every thread that runs into a `Redirected` cell or an overflow of a source
/// table helps with the copy, a unit of `TABLE_MIGRATION_UNIT_SIZE` cells at a
/// time. The last worker to leave either publishes the destination as the new
/// root, or, if the destination overflowed, replaces this migration with one
/// into a table twice as large.
pub(crate) struct TableMigration<V> {
    sources: SmallVec<[MigrationSource<V>; 2]>,
    destination: Atomic<Table<V>>,
    /// Number of workers times two, plus `END_FLAG`.
    worker_status: AtomicUsize,
    overflowed: AtomicBool,
    units_remaining: AtomicIsize,
}

impl<V> TableMigration<V> {
    pub(crate) fn new_single(source: Shared<'_, Table<V>>, destination: Table<V>) -> Self {
        let mut sources = SmallVec::new();
        sources.push(MigrationSource::new(source));
        Self::new(sources, destination, unsafe { source.deref() }.num_migration_units())
    }

    fn new(
        sources: SmallVec<[MigrationSource<V>; 2]>,
        destination: Table<V>,
        units: usize,
    ) -> Self {
        Self {
            sources,
            destination: Atomic::new(destination),
            worker_status: AtomicUsize::new(0),
            overflowed: AtomicBool::new(false),
            units_remaining: AtomicIsize::new(units as isize),
        }
    }

    /// Frees a migration that was never published, together with its
    /// destination. The sources are left alone.
    pub(crate) fn discard(self: Box<Self>) {
        // Never shared, so the destination has no values either.
        drop(unsafe { self.destination.into_owned() });
    }

    #[cfg(test)]
    pub(crate) fn num_sources(&self) -> usize {
        self.sources.len()
    }

    /// Joins the migration and copies units until none are left, or until the
    /// destination overflows.
    ///
    /// `this` must be the published pointer to `self`.
    pub(crate) fn run<'g>(this: Shared<'g, Self>, inner: &Inner<V>, guard: &'g Guard) {
        let migration = unsafe { this.deref() };

        // Join, unless the end flag is already set.
        let mut status = migration.worker_status.load(Ordering::Relaxed);
        loop {
            if status & END_FLAG != 0 {
                return;
            }
            match migration.worker_status.compare_exchange_weak(
                status,
                status + 2,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(s) => status = s,
            }
        }

        'sources: for source in migration.sources.iter() {
            let table = unsafe { source.table.load(Ordering::Relaxed, guard).deref() };

            loop {
                if migration.worker_status.load(Ordering::Relaxed) & END_FLAG != 0 {
                    break 'sources;
                }
                let start = source
                    .source_index
                    .fetch_add(TABLE_MIGRATION_UNIT_SIZE, Ordering::Relaxed);
                if start >= table.size() {
                    break;
                }

                if !migration.migrate_range(table, start, guard) {
                    // The destination is full. Let the last worker start over.
                    migration.overflowed.store(true, Ordering::Relaxed);
                    migration
                        .worker_status
                        .fetch_or(END_FLAG, Ordering::Relaxed);
                    break 'sources;
                }

                let prev = migration.units_remaining.fetch_sub(1, Ordering::Relaxed);
                debug_assert!(prev > 0);
                if prev == 1 {
                    migration
                        .worker_status
                        .fetch_or(END_FLAG, Ordering::Relaxed);
                    break 'sources;
                }
            }
        }

        // Leave. The last worker finishes the job.
        let prev_status = migration.worker_status.fetch_sub(2, Ordering::AcqRel);
        if prev_status >= 4 {
            return;
        }
        debug_assert_eq!(prev_status, 2 | END_FLAG);

        if migration.overflowed.load(Ordering::Relaxed) {
            migration.restart(this, inner, guard);
        } else {
            migration.publish(this, inner, guard);
        }
    }

    /// Copies the cells `start..start + TABLE_MIGRATION_UNIT_SIZE` of `source`
    /// into the destination and leaves them `Redirected`. Returns `false` if
    /// the destination overflowed.
    fn migrate_range(&self, source: &Table<V>, start: usize, guard: &Guard) -> bool {
        let destination = unsafe { self.destination.load(Ordering::Relaxed, guard).deref() };
        let end = (start + TABLE_MIGRATION_UNIT_SIZE).min(source.size());

        for idx in start..end {
            let cell = source.cell(idx);

            loop {
                let hash = cell.load_hash();
                if hash == NULL_HASH {
                    // An unclaimed cell. Close it for late inserts.
                    match cell.value.compare_exchange(
                        Shared::null(),
                        redirect(),
                        Ordering::AcqRel,
                        Ordering::Acquire,
                        guard,
                    ) {
                        Ok(_) => break,
                        // An earlier, abandoned copy of this table.
                        Err(e) if is_redirect(e.current) => break,
                        // Claimed and written in the meantime. Read it again.
                        Err(_) => continue,
                    }
                }

                let mut value = cell.load_value(guard);
                if is_redirect(value) {
                    break;
                }
                if value.is_null() {
                    match cell.value.compare_exchange(
                        Shared::null(),
                        redirect(),
                        Ordering::AcqRel,
                        Ordering::Acquire,
                        guard,
                    ) {
                        Ok(_) => break,
                        Err(e) if is_redirect(e.current) => break,
                        Err(e) => value = e.current,
                    }
                }

                let dest_cell = match destination.insert_or_find(hash) {
                    InsertResult::InsertedNew(c) => c,
                    InsertResult::AlreadyFound(c) => {
                        debug_assert!(false, "A hash was copied into a destination table twice");
                        c
                    }
                    InsertResult::Overflow(_) => return false,
                };

                // Keep copying until the source value we replace with the
                // redirect is the one the destination holds.
                loop {
                    dest_cell.value.store(value, Ordering::Release);
                    match cell.value.compare_exchange(
                        value,
                        redirect(),
                        Ordering::AcqRel,
                        Ordering::Acquire,
                        guard,
                    ) {
                        Ok(_) => break,
                        Err(e) => {
                            debug_assert!(
                                !is_redirect(e.current),
                                "A cell was redirected by two migrators"
                            );
                            value = e.current;
                        }
                    }
                }
                break;
            }
        }

        true
    }

    /// Makes the destination the new root and retires every source table.
    fn publish<'g>(&self, this: Shared<'g, Self>, inner: &Inner<V>, guard: &'g Guard) {
        let first_source = self.sources[0].table.load(Ordering::Relaxed, guard);
        let destination = self.destination.load(Ordering::Relaxed, guard);

        let result = inner.root.compare_exchange(
            first_source,
            destination,
            Ordering::AcqRel,
            Ordering::Acquire,
            guard,
        );
        assert!(
            result.is_ok(),
            "A migration source was not the root table when it was published"
        );

        let first_source_ref = unsafe { first_source.deref() };
        first_source_ref.job.end(this, guard);

        for source in self.sources.iter() {
            let table = source.table.load(Ordering::Relaxed, guard);
            unsafe { inner.qsbr.enqueue(guard, table) };
        }
        unsafe { inner.qsbr.enqueue(guard, this) };
        inner.counter.record_completion(self.sources.len());

        #[cfg(feature = "logging")]
        log::debug!(
            "{}Published a table of {} cells, retiring {} source table(s)",
            inner.log_prefix(),
            unsafe { destination.deref() }.size(),
            self.sources.len()
        );
    }

    /// Replaces this migration with one into a table twice the size of the
    /// overflowed destination. The overflowed destination becomes one more
    /// source, since some of the cells are already redirected into it.
    fn restart<'g>(&self, this: Shared<'g, Self>, inner: &Inner<V>, guard: &'g Guard) {
        let first_source = unsafe { self.sources[0].table.load(Ordering::Relaxed, guard).deref() };
        debug_assert_eq!(first_source.job.load(guard), this);

        let destination = self.destination.load(Ordering::Relaxed, guard);
        let dest_size = unsafe { destination.deref() }.size();
        let next_size = match dest_size.checked_mul(2) {
            Some(size) => size,
            None => panic!("A leapfrog table cannot grow beyond {dest_size} cells"),
        };

        let mut sources: SmallVec<[MigrationSource<V>; 2]> = self
            .sources
            .iter()
            .map(|s| MigrationSource::new(s.table.load(Ordering::Relaxed, guard)))
            .collect();
        sources.push(MigrationSource::new(destination));

        let units = sources
            .iter()
            .map(|s| unsafe { s.table.load(Ordering::Relaxed, guard).deref() }.num_migration_units())
            .sum();

        let next = TableMigration::new(sources, Table::create_or_abort(next_size), units);
        first_source.job.replace(this, Owned::new(next), guard);

        // The tables now belong to the follow-up migration.
        unsafe { inner.qsbr.enqueue(guard, this) };
        inner.counter.record_restart();

        #[cfg(feature = "logging")]
        log::debug!(
            "{}Destination of {} cells overflowed; restarting the migration into {} cells",
            inner.log_prefix(),
            dest_size,
            next_size
        );
    }
}

#[cfg(test)]
mod tests {
    use super::TableMigration;
    use crate::{
        common::key::KeyTraits,
        leapfrog::{
            cell::{is_redirect, state_of, ValueBox, ValueState},
            map::Inner,
            table::{InsertResult, Table},
        },
    };

    use crossbeam_epoch::{Collector, Owned, Shared};
    use std::sync::atomic::Ordering;

    fn insert(table: &Table<u64>, key: u32, value: u64, guard: &crossbeam_epoch::Guard) {
        match table.insert_or_find(key.hash()) {
            InsertResult::InsertedNew(cell) | InsertResult::AlreadyFound(cell) => {
                let new = Owned::new(ValueBox::new(value)).into_shared(guard);
                let old = cell.value.swap(new, Ordering::AcqRel, guard);
                assert!(old.is_null());
            }
            InsertResult::Overflow(_) => panic!("unexpected overflow"),
        }
    }

    fn value_of(table: &Table<u64>, key: u32, guard: &crossbeam_epoch::Guard) -> Option<u64> {
        let cell = table.find(key.hash())?;
        match state_of(cell.load_value(guard)) {
            ValueState::Present(v) => Some(*v),
            ValueState::Empty => None,
            ValueState::Redirected => panic!("key {key} is redirected"),
        }
    }

    #[test]
    fn single_thread_migration_publishes_destination() {
        let inner = Inner::<u64>::with_table(Table::create(64).unwrap(), None, Some(Collector::new()));
        let guard = &inner.qsbr.pin();

        let root = inner.root.load(Ordering::Acquire, guard);
        let root_ref = unsafe { root.deref() };
        for k in 0..20u32 {
            insert(root_ref, k, k as u64 * 10, guard);
        }

        root_ref.begin_table_migration_to_size(&inner, 128, guard);
        let job = root_ref.job.load(guard);
        assert!(!job.is_null());
        assert_eq!(unsafe { job.deref() }.num_sources(), 1);

        root_ref
            .job
            .participate(guard, |job| TableMigration::run(job, &inner, guard));
        assert!(root_ref.job.is_ended(guard));

        // The old root is fully redirected.
        assert!(root_ref.cells().all(|c| is_redirect(c.load_value(guard))));

        let new_root = inner.root.load(Ordering::Acquire, guard);
        assert_ne!(new_root, root);
        let new_root_ref = unsafe { new_root.deref() };
        assert_eq!(new_root_ref.size(), 128);
        for k in 0..20u32 {
            assert_eq!(value_of(new_root_ref, k, guard), Some(k as u64 * 10));
        }
        assert_eq!(value_of(new_root_ref, 20, guard), None);

        let stats = inner.counter.snapshot();
        assert_eq!(stats.migrations_started(), 1);
        assert_eq!(stats.migrations_completed(), 1);
        assert_eq!(inner.counter.tables_retired(), 1);
    }

    #[test]
    fn overflowing_destination_restarts_with_two_sources() {
        let inner = Inner::<u64>::with_table(Table::create(64).unwrap(), None, Some(Collector::new()));
        let guard = &inner.qsbr.pin();

        let root = inner.root.load(Ordering::Acquire, guard);
        let root_ref = unsafe { root.deref() };
        for k in 0..40u32 {
            insert(root_ref, k, k as u64, guard);
        }

        // Forty live cells cannot fit into eight.
        root_ref.begin_table_migration_to_size(&inner, 8, guard);
        let first = root_ref.job.load(guard);

        let mut runs = Vec::new();
        root_ref.job.participate(guard, |job: Shared<'_, TableMigration<u64>>| {
            runs.push(unsafe { job.deref() }.num_sources());
            TableMigration::run(job, &inner, guard);
        });

        // 8 -> 16 -> 32 -> 64: every restart adds the overflowed destination
        // as one more source.
        assert_eq!(runs, vec![1, 2, 3, 4]);
        assert_ne!(root_ref.job.load(guard), first);

        let new_root_ref = unsafe { inner.root.load(Ordering::Acquire, guard).deref() };
        assert_eq!(new_root_ref.size(), 64);
        for k in 0..40u32 {
            assert_eq!(value_of(new_root_ref, k, guard), Some(k as u64));
        }

        let stats = inner.counter.snapshot();
        assert_eq!(stats.migrations_started(), 1);
        assert_eq!(stats.migrations_restarted(), 3);
        assert_eq!(stats.migrations_completed(), 1);
        assert_eq!(inner.counter.tables_retired(), 4);
    }
}
