use super::{
    cell::{is_redirect, Cell, CellGroup},
    job::JobCoordinator,
    map::Inner,
    migration::TableMigration,
};
use crate::common::{
    constants::{CELLS_IN_USE_SAMPLE, INITIAL_SIZE, LINEAR_SEARCH_LIMIT, TABLE_MIGRATION_UNIT_SIZE},
    error::Error,
    key::NULL_HASH,
};

use std::{alloc::Layout, sync::atomic::Ordering};

use crossbeam_epoch::{Guard, Owned, Shared};
use crossbeam_utils::Backoff;

/// The outcome of [`Table::insert_or_find`].
pub(crate) enum InsertResult<'t, V> {
    /// The cell was claimed for the hash by this call. Its value may still be
    /// `Redirected` if a migration got to the cell first.
    InsertedNew(&'t Cell<V>),
    /// The hash was already present.
    AlreadyFound(&'t Cell<V>),
    /// No free cell within the probe limit. Carries the index just past the
    /// last probed cell.
    Overflow(usize),
}

/// A fixed-size open-addressed array of cells.
///
/// Buckets are linked lists threaded through the cells with one-byte deltas,
/// so that a lookup visits only cells of its own bucket.
pub(crate) struct Table<V> {
    size_mask: usize,
    groups: Box<[CellGroup<V>]>,
    pub(crate) job: JobCoordinator<TableMigration<V>>,
}

impl<V> std::fmt::Debug for Table<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("size", &self.size())
            .finish_non_exhaustive()
    }
}

impl<V> Table<V> {
    /// Allocates a table of `size` unclaimed cells. `size` must be a power of
    /// two no less than 4.
    pub(crate) fn create(size: usize) -> Result<Self, Error> {
        assert!(size.is_power_of_two() && size >= 4);

        let num_groups = size >> 2;
        let mut groups = Vec::new();
        groups
            .try_reserve_exact(num_groups)
            .map_err(|_| Error::AllocationFailed { cells: size })?;
        groups.resize_with(num_groups, CellGroup::default);

        Ok(Self {
            size_mask: size - 1,
            groups: groups.into_boxed_slice(),
            job: JobCoordinator::default(),
        })
    }

    /// Like [`create`](Self::create), but aborts the process if the memory
    /// cannot be allocated.
    pub(crate) fn create_or_abort(size: usize) -> Self {
        match Self::create(size) {
            Ok(table) => table,
            Err(_) => match Layout::array::<CellGroup<V>>(size >> 2) {
                Ok(layout) => std::alloc::handle_alloc_error(layout),
                Err(_) => panic!("A leapfrog table of {size} cells overflows the address space"),
            },
        }
    }

    #[inline]
    pub(crate) fn size(&self) -> usize {
        self.size_mask + 1
    }

    pub(crate) fn num_migration_units(&self) -> usize {
        self.size_mask / TABLE_MIGRATION_UNIT_SIZE + 1
    }

    #[inline]
    fn group(&self, idx: usize) -> &CellGroup<V> {
        &self.groups[(idx & self.size_mask) >> 2]
    }

    /// Returns the cell at `idx`, wrapping around the end of the table.
    #[inline]
    pub(crate) fn cell(&self, idx: usize) -> &Cell<V> {
        &self.group(idx).cells[idx & 3]
    }

    pub(crate) fn find(&self, hash: u64) -> Option<&Cell<V>> {
        debug_assert_ne!(hash, NULL_HASH);

        let mut idx = hash as usize;
        let cell = self.cell(idx);
        match cell.load_hash() {
            h if h == hash => return Some(cell),
            NULL_HASH => return None,
            _ => (),
        }

        let mut delta = self.group(idx).deltas[idx & 3].load(Ordering::Acquire);
        while delta != 0 {
            idx = idx.wrapping_add(delta as usize);
            let cell = self.cell(idx);
            // A linked cell always carries a hash of the same bucket.
            if cell.load_hash() == hash {
                return Some(cell);
            }
            delta = self.group(idx).deltas[(idx & 3) + 4].load(Ordering::Acquire);
        }

        None
    }

    pub(crate) fn insert_or_find(&self, hash: u64) -> InsertResult<'_, V> {
        debug_assert_ne!(hash, NULL_HASH);

        let size_mask = self.size_mask;
        let mut idx = hash as usize;

        let cell = self.cell(idx);
        match claim_or_probe(cell, hash) {
            Ok(()) => return InsertResult::InsertedNew(cell),
            Err(h) if h == hash => return InsertResult::AlreadyFound(cell),
            Err(_) => (),
        }

        let max_idx = idx.wrapping_add(size_mask);
        // The first link of a bucket lives in the head delta of the hashed
        // cell. All further links live in the tail deltas of the chain cells.
        let mut link_level = 0;

        loop {
            let prev_link = &self.group(idx).deltas[(idx & 3) + link_level];
            link_level = 4;

            let delta = prev_link.load(Ordering::Acquire);
            if delta != 0 {
                idx = idx.wrapping_add(delta as usize);
                let cell = self.cell(idx);

                let mut probe_hash = cell.load_hash();
                if probe_hash == NULL_HASH {
                    // Linked, but the claim is not visible yet.
                    let backoff = Backoff::new();
                    while probe_hash == NULL_HASH {
                        backoff.spin();
                        probe_hash = cell.load_hash();
                    }
                }
                debug_assert_eq!((probe_hash ^ hash) as usize & size_mask, 0);

                if probe_hash == hash {
                    return InsertResult::AlreadyFound(cell);
                }
                continue;
            }

            // End of the chain. Probe linearly for a free cell.
            let prev_link_idx = idx;
            debug_assert!(max_idx.wrapping_sub(idx) <= size_mask);
            let mut remaining = max_idx.wrapping_sub(idx).min(LINEAR_SEARCH_LIMIT);

            let mut relinked = false;
            while remaining > 0 {
                remaining -= 1;
                idx = idx.wrapping_add(1);
                let cell = self.cell(idx);

                let probe_hash = match claim_or_probe(cell, hash) {
                    Ok(()) => {
                        prev_link.store(idx.wrapping_sub(prev_link_idx) as u8, Ordering::Release);
                        return InsertResult::InsertedNew(cell);
                    }
                    Err(h) => h,
                };

                let x = probe_hash ^ hash;
                if x == 0 {
                    return InsertResult::AlreadyFound(cell);
                }
                if x as usize & size_mask == 0 {
                    // A cell of this bucket whose owner has not linked it yet.
                    // Link it on its behalf and keep following the chain from
                    // there.
                    prev_link.store(idx.wrapping_sub(prev_link_idx) as u8, Ordering::Release);
                    relinked = true;
                    break;
                }
            }

            if !relinked {
                return InsertResult::Overflow(idx.wrapping_add(1));
            }
        }
    }

    /// Starts migrating this table after an insert overflowed at
    /// `overflow_idx`, unless a migration is already under way.
    ///
    /// The destination is sized from the density of live values among the
    /// cells just before the overflow.
    pub(crate) fn begin_table_migration(&self, inner: &Inner<V>, overflow_idx: usize, guard: &Guard) {
        let mut idx = overflow_idx.wrapping_sub(CELLS_IN_USE_SAMPLE);
        let mut in_use = 0usize;

        for _ in 0..CELLS_IN_USE_SAMPLE {
            let value = self.cell(idx).load_value(guard);
            if is_redirect(value) {
                // Somebody has already started copying this table.
                return;
            }
            if !value.is_null() {
                in_use += 1;
            }
            idx = idx.wrapping_add(1);
        }

        let in_use_ratio = in_use as f64 / CELLS_IN_USE_SAMPLE as f64;
        let estimated_in_use = self.size() as f64 * in_use_ratio;
        let next_size = ((estimated_in_use * 2.0) as usize)
            .checked_next_power_of_two()
            .unwrap_or(self.size())
            .max(INITIAL_SIZE);

        self.begin_table_migration_to_size(inner, next_size, guard);
    }

    pub(crate) fn begin_table_migration_to_size(
        &self,
        inner: &Inner<V>,
        next_size: usize,
        guard: &Guard,
    ) {
        if !self.job.is_vacant(guard) {
            return;
        }

        let this: Shared<'_, Self> = (self as *const Self).into();
        let destination = Self::create_or_abort(next_size);
        let migration = TableMigration::new_single(this, destination);

        match self.job.start(Owned::new(migration), guard) {
            Ok(_) => {
                inner.counter.record_start();

                #[cfg(feature = "logging")]
                log::debug!(
                    "{}Migrating a table of {} cells to {} cells",
                    inner.log_prefix(),
                    self.size(),
                    next_size
                );
            }
            // Another thread published its migration first.
            Err(lost) => lost.into_box().discard(),
        }
    }

    /// Drops every value still present in this table.
    ///
    /// # Safety
    ///
    /// The caller must own the table exclusively, and the values must not be
    /// reachable from any other table.
    pub(crate) unsafe fn drop_values(&self, guard: &Guard) {
        for group in self.groups.iter() {
            for cell in group.cells.iter() {
                let value = cell.value.swap(Shared::null(), Ordering::Relaxed, guard);
                if !value.is_null() && !is_redirect(value) {
                    drop(value.into_owned());
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn cells(&self) -> impl Iterator<Item = &Cell<V>> {
        self.groups.iter().flat_map(|g| g.cells.iter())
    }
}

/// Claims `cell` for `hash` if it is unclaimed. Returns the hash held by the
/// cell otherwise.
#[inline]
fn claim_or_probe<V>(cell: &Cell<V>, hash: u64) -> Result<(), u64> {
    match cell.load_hash() {
        NULL_HASH => cell.claim(hash),
        h => Err(h),
    }
}
