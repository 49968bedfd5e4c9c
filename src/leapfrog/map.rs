use super::{iter::Iter, migration::TableMigration, mutator::Mutator, table::Table};
use crate::{
    common::{
        constants::INITIAL_SIZE,
        error::Error,
        key::{KeyTraits, NULL_HASH},
    },
    reclaim::{Qsbr, QsbrContext},
    stats::{stats_counter::MigrationCounter, MapStats},
    Builder,
};

use std::{
    fmt,
    marker::PhantomData,
    sync::atomic::{self, Ordering},
};

use crossbeam_epoch::{Atomic, Collector, Guard, Shared};

/// The state shared by a map and the migrations running on it.
pub(crate) struct Inner<V> {
    pub(crate) root: Atomic<Table<V>>,
    pub(crate) qsbr: Qsbr,
    pub(crate) counter: MigrationCounter,
    name: Option<String>,
}

impl<V> Inner<V> {
    pub(crate) fn with_table(table: Table<V>, name: Option<String>, collector: Option<Collector>) -> Self {
        Self {
            root: Atomic::new(table),
            qsbr: Qsbr::new(collector),
            counter: MigrationCounter::default(),
            name,
        }
    }

    /// Loads the current root table. The root is never null while the map is
    /// alive.
    #[inline]
    pub(crate) fn root<'g>(&self, guard: &'g Guard) -> &'g Table<V> {
        unsafe { self.root.load_consume(guard).deref() }
    }

    /// Helps with the migration of `table`, if any, until it is done.
    pub(crate) fn participate(&self, table: &Table<V>, guard: &Guard) {
        table
            .job
            .participate(guard, |job| TableMigration::run(job, self, guard));
    }

    #[cfg(feature = "logging")]
    pub(crate) fn log_prefix(&self) -> String {
        self.name
            .as_deref()
            .map(|name| format!("[{name}] "))
            .unwrap_or_default()
    }
}

impl<V> Drop for Inner<V> {
    fn drop(&mut self) {
        let guard = unsafe { crossbeam_epoch::unprotected() };
        atomic::fence(Ordering::Acquire);

        let root = self.root.swap(Shared::null(), Ordering::Relaxed, guard);
        if root.is_null() {
            return;
        }
        let table = unsafe { root.into_owned() };

        // Only a panicking migration worker can leave a job behind on the
        // root. Its destination may already own some of the values, so they
        // are leaked together with it.
        let job = table.job.load(guard);
        if !job.is_null() {
            drop(unsafe { job.into_owned() });
        }

        unsafe { table.drop_values(guard) };
    }
}

/// A lock-free concurrent hash map from integer-like keys to values, using
/// leapfrog probing.
///
/// All methods take `&self` and may be called from any number of threads at
/// once. No method ever blocks on a lock. When an insert finds no free cell
/// near its bucket, the map migrates its entries into a new table. Every
/// thread that runs into the migration helps to copy the entries, and the old
/// table is freed once no thread can still be reading it.
///
/// Keys are stored as their 64-bit hash (see [`KeyTraits`]), so iterating the
/// map yields keys recovered from the hashes.
///
/// # Examples
///
/// ```rust
/// use leapfrog_map::LeapfrogMap;
///
/// use std::sync::Arc;
/// use std::thread;
///
/// let map = Arc::new(LeapfrogMap::<u32, String>::new());
///
/// let threads: Vec<_> = (0..4u32)
///     .map(|i| {
///         let map = Arc::clone(&map);
///         thread::spawn(move || {
///             for key in (i * 1000)..((i + 1) * 1000) {
///                 map.assign(key, format!("value {key}"));
///             }
///         })
///     })
///     .collect();
///
/// threads.into_iter().for_each(|t| t.join().expect("Failed"));
///
/// assert_eq!(map.get(&2500), Some("value 2500".to_string()));
/// assert_eq!(map.erase(&2500), Some("value 2500".to_string()));
/// assert_eq!(map.get(&2500), None);
/// ```
///
/// # Guards
///
/// Methods that return references into the map take a
/// [`Guard`](crossbeam_epoch::Guard). Table memory reachable through the
/// guard stays valid until the guard is dropped. Get a guard with
/// [`guard`](Self::guard), or pin one from a [`QsbrContext`] created with
/// [`create_context`](Self::create_context). Holding a guard for a long time
/// delays the reclamation of retired tables.
pub struct LeapfrogMap<K, V> {
    inner: Inner<V>,
    _marker: PhantomData<fn() -> K>,
}

impl<K, V> fmt::Debug for LeapfrogMap<K, V>
where
    K: KeyTraits,
    V: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeapfrogMap")
            .field("name", &self.inner.name)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<K, V> Default for LeapfrogMap<K, V>
where
    K: KeyTraits,
    V: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> LeapfrogMap<K, V>
where
    K: KeyTraits,
    V: Send + Sync + 'static,
{
    /// Creates a map with a table of the smallest size.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Creates a map whose first table has at least `capacity` cells.
    ///
    /// # Panics
    ///
    /// Panics if the table cannot be allocated. See
    /// [`try_with_capacity`](Self::try_with_capacity).
    pub fn with_capacity(capacity: usize) -> Self {
        Self::builder().initial_capacity(capacity).build()
    }

    /// Creates a map whose first table has at least `capacity` cells, or
    /// returns an error if the table cannot be allocated.
    pub fn try_with_capacity(capacity: usize) -> Result<Self, Error> {
        Self::builder().initial_capacity(capacity).try_build()
    }

    /// Returns a [`Builder`] to configure a map.
    pub fn builder() -> Builder<K, V> {
        Builder::default()
    }

    pub(crate) fn with_everything(
        name: Option<String>,
        initial_capacity: Option<usize>,
        collector: Option<Collector>,
    ) -> Result<Self, Error> {
        let requested = initial_capacity.unwrap_or(INITIAL_SIZE);
        let size = requested
            .max(INITIAL_SIZE)
            .checked_next_power_of_two()
            .ok_or(Error::CapacityOverflow { requested })?;
        let table = Table::create(size)?;

        Ok(Self {
            inner: Inner::with_table(table, name, collector),
            _marker: PhantomData,
        })
    }

    /// Returns the name of this map, if one was given to the builder.
    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// Pins the calling thread and returns a guard usable with this map.
    pub fn guard(&self) -> Guard {
        self.inner.qsbr.pin()
    }

    /// Registers the calling thread with the reclamation queue of this map.
    pub fn create_context(&self) -> QsbrContext {
        self.inner.qsbr.create_context()
    }

    /// Returns the reclamation queue of this map.
    pub fn qsbr(&self) -> &Qsbr {
        &self.inner.qsbr
    }

    /// Returns the number of cells of the current table.
    pub fn capacity(&self) -> usize {
        let guard = &self.guard();
        self.inner.root(guard).size()
    }

    /// Returns a snapshot of the diagnostic counters of this map.
    pub fn stats(&self) -> MapStats {
        let mut stats = self.inner.counter.snapshot();
        stats
            .set_reclamation_counts(
                self.inner.counter.tables_retired(),
                self.inner.qsbr.generation(),
                self.inner.qsbr.reclaimed(),
            )
            .set_capacity(self.capacity());
        stats
    }

    /// Returns a clone of the value for `key`.
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let guard = &self.guard();
        self.get_ref(key, guard).cloned()
    }

    /// Returns a reference to the value for `key`. The reference is valid for
    /// as long as `guard`, even if the entry is replaced or erased.
    pub fn get_ref<'g>(&'g self, key: &K, guard: &'g Guard) -> Option<&'g V> {
        self.find(key, guard).get_value()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        let guard = &self.guard();
        self.get_ref(key, guard).is_some()
    }

    /// Sets the value for `key`, and returns the value it replaced.
    ///
    /// If another thread writes the same key at the same time, the writes are
    /// ordered. The write that lost is treated as if it happened just before
    /// the winning one, so the losing caller gets back its own `value`.
    ///
    /// # Panics
    ///
    /// Panics if `key` is reserved (see [`KeyTraits`]).
    pub fn assign(&self, key: K, value: V) -> Option<V>
    where
        V: Clone,
    {
        let guard = &self.guard();
        self.insert_or_find(key, guard).exchange_value(value)
    }

    /// Same as [`assign`](Self::assign).
    pub fn exchange(&self, key: K, value: V) -> Option<V>
    where
        V: Clone,
    {
        self.assign(key, value)
    }

    /// Removes the value for `key`, and returns it. Erasing a missing key is a
    /// no-op.
    ///
    /// The cell of an erased key stays claimed for that key until the next
    /// migration drops it.
    pub fn erase(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let guard = &self.guard();
        self.find(key, guard).erase_value()
    }

    /// Returns a [`Mutator`] bound to the cell of `key`, claiming a cell if
    /// the key has none yet.
    ///
    /// # Panics
    ///
    /// Panics if `key` is reserved, or if `guard` was pinned from a different
    /// collector than the one of this map.
    pub fn insert_or_find<'g>(&'g self, key: K, guard: &'g Guard) -> Mutator<'g, K, V> {
        self.inner.qsbr.check_guard(guard);
        Mutator::insert_or_find(&self.inner, hash_of(&key), guard)
    }

    /// Returns a [`Mutator`] bound to the cell of `key`, if the key has one.
    ///
    /// # Panics
    ///
    /// Panics if `key` is reserved, or if `guard` was pinned from a different
    /// collector than the one of this map.
    pub fn find<'g>(&'g self, key: &K, guard: &'g Guard) -> Mutator<'g, K, V> {
        self.inner.qsbr.check_guard(guard);
        Mutator::find(&self.inner, hash_of(key), guard)
    }

    /// Returns an iterator over the entries of the current table.
    ///
    /// No other thread may insert into the map while the iterator is in use.
    /// An iterator that runs into a table being migrated panics in debug
    /// builds, and skips the migrated cells otherwise.
    pub fn iter<'g>(&'g self, guard: &'g Guard) -> Iter<'g, K, V> {
        self.inner.qsbr.check_guard(guard);
        Iter::new(self.inner.root(guard), guard)
    }
}

fn hash_of<K: KeyTraits>(key: &K) -> u64 {
    let hash = key.hash();
    assert_ne!(hash, NULL_HASH, "A reserved key cannot be used with a map");
    hash
}

#[cfg(test)]
mod tests {
    use super::LeapfrogMap;
    use crate::{common::error::Error, test_util::Tracked};

    use crossbeam_epoch::Collector;
    use std::sync::{Arc, Barrier};

    #[test]
    fn basic_single_thread() {
        let map = LeapfrogMap::<u32, u32>::new();
        assert_eq!(map.capacity(), 8);

        assert_eq!(map.get(&1), None);
        assert_eq!(map.assign(1, 10), None);
        assert_eq!(map.assign(2, 20), None);
        assert_eq!(map.get(&1), Some(10));
        assert!(map.contains_key(&2));

        assert_eq!(map.assign(1, 11), Some(10));
        assert_eq!(map.exchange(1, 12), Some(11));
        assert_eq!(map.get(&1), Some(12));

        assert_eq!(map.erase(&1), Some(12));
        assert_eq!(map.erase(&1), None);
        assert_eq!(map.get(&1), None);
        assert!(!map.contains_key(&1));
        assert_eq!(map.erase(&3), None);

        assert_eq!(map.assign(1, 13), None);
        assert_eq!(map.get(&1), Some(13));
    }

    #[test]
    fn capacity_is_rounded_up() {
        assert_eq!(LeapfrogMap::<u32, u32>::with_capacity(0).capacity(), 8);
        assert_eq!(LeapfrogMap::<u32, u32>::with_capacity(9).capacity(), 16);
        assert_eq!(LeapfrogMap::<u32, u32>::with_capacity(1024).capacity(), 1024);
    }

    #[test]
    fn capacity_overflow_is_an_error() {
        let result = LeapfrogMap::<u32, u32>::try_with_capacity(usize::MAX);
        assert_eq!(
            result.map(|_| ()),
            Err(Error::CapacityOverflow {
                requested: usize::MAX
            })
        );
    }

    #[test]
    fn grows_while_keeping_every_entry() {
        let map = LeapfrogMap::<u64, u64>::new();

        for k in 0..10_000u64 {
            assert_eq!(map.assign(k, k * 2), None);
        }
        for k in 0..10_000u64 {
            assert_eq!(map.get(&k), Some(k * 2), "key {k}");
        }

        let stats = map.stats();
        assert!(map.capacity() >= 10_000);
        assert!(stats.migrations_completed() >= 3);
        assert!(stats.migrations_completed() <= stats.migrations_started());
        assert!(stats.objects_reclaimed() <= stats.objects_retired());
        assert_eq!(stats.capacity(), map.capacity());
    }

    #[test]
    #[should_panic(expected = "reserved key")]
    fn reserved_key_panics() {
        let map = LeapfrogMap::<u64, u64>::new();
        map.assign(u64::MAX, 0);
    }

    #[test]
    #[should_panic(expected = "different collector")]
    fn guard_from_other_collector_panics() {
        let map = LeapfrogMap::<u32, u32>::builder()
            .collector(Collector::new())
            .build();
        let guard = &crossbeam_epoch::pin();
        let _ = map.get_ref(&1, guard);
    }

    #[test]
    fn values_are_dropped_exactly_once() {
        let live = Tracked::counter();

        {
            let map = LeapfrogMap::<u32, Tracked>::builder()
                .collector(Collector::new())
                .build();

            for k in 0..1000u32 {
                assert!(map.assign(k, Tracked::new(&live, k)).is_none());
            }
            for k in (0..1000u32).step_by(3) {
                assert_eq!(map.assign(k, Tracked::new(&live, k + 1)).map(|t| t.id), Some(k));
            }
            for k in (0..1000u32).step_by(5) {
                assert!(map.erase(&k).is_some());
            }

            // The map holds 800 values. Retired values may or may not have
            // been reclaimed yet.
            assert!(Tracked::live(&live) >= 800);
        }

        // Dropping the map drops its collector, which runs every pending
        // destructor.
        assert_eq!(Tracked::live(&live), 0);
    }

    #[test]
    fn concurrent_growth_keeps_every_entry() {
        const NUM_THREADS: usize = 8;
        const KEYS_PER_THREAD: u32 = 5_000;

        let map = Arc::new(LeapfrogMap::<u32, u32>::new());
        let barrier = Arc::new(Barrier::new(NUM_THREADS));

        let threads: Vec<_> = (0..NUM_THREADS as u32)
            .map(|i| {
                let map = Arc::clone(&map);
                let barrier = Arc::clone(&barrier);

                std::thread::spawn(move || {
                    barrier.wait();
                    for k in (i * KEYS_PER_THREAD)..((i + 1) * KEYS_PER_THREAD) {
                        assert_eq!(map.assign(k, k), None);
                    }
                })
            })
            .collect();

        for result in threads.into_iter().map(|t| t.join()) {
            assert!(result.is_ok());
        }

        for k in 0..(NUM_THREADS as u32 * KEYS_PER_THREAD) {
            assert_eq!(map.get(&k), Some(k), "key {k}");
        }
        assert!(map.stats().migrations_completed() >= 3);
    }
}
