use super::{
    cell::{is_redirect, state_of, Cell, ValueBox, ValueState},
    map::Inner,
    table::{InsertResult, Table},
};
use crate::common::key::KeyTraits;

use std::{fmt, marker::PhantomData, sync::atomic::Ordering};

use crossbeam_epoch::{Guard, Owned, Shared};

/// A handle on the cell of one key, for a read followed by a conditional
/// write without looking the key up twice.
///
/// A mutator caches the value it last observed in the cell. Writes through
/// the mutator compare against that value, so a write that loses a race
/// against another thread is detected and resolved as described on
/// [`exchange_value`](Self::exchange_value) and
/// [`erase_value`](Self::erase_value).
///
/// # Examples
///
/// ```rust
/// use leapfrog_map::LeapfrogMap;
///
/// let map = LeapfrogMap::<u32, u64>::new();
/// let guard = &map.guard();
///
/// let mut mutator = map.insert_or_find(7, guard);
/// if mutator.get_value().is_none() {
///     mutator.exchange_value(1);
/// }
/// assert_eq!(mutator.get_value(), Some(&1));
/// assert_eq!(mutator.key(), 7);
///
/// assert_eq!(map.find(&7, guard).erase_value(), Some(1));
/// ```
pub struct Mutator<'g, K, V> {
    inner: &'g Inner<V>,
    guard: &'g Guard,
    hash: u64,
    table: &'g Table<V>,
    cell: Option<&'g Cell<V>>,
    value: Shared<'g, ValueBox<V>>,
    _marker: PhantomData<fn() -> K>,
}

impl<K: KeyTraits + fmt::Debug, V: fmt::Debug> fmt::Debug for Mutator<'_, K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutator")
            .field("key", &K::dehash(self.hash))
            .field("value", &self.get_value())
            .finish()
    }
}

impl<'g, K, V> Mutator<'g, K, V> {
    fn unresolved(inner: &'g Inner<V>, hash: u64, guard: &'g Guard) -> Self {
        Self {
            inner,
            guard,
            hash,
            table: inner.root(guard),
            cell: None,
            value: Shared::null(),
            _marker: PhantomData,
        }
    }

    pub(crate) fn find(inner: &'g Inner<V>, hash: u64, guard: &'g Guard) -> Self {
        let mut mutator = Self::unresolved(inner, hash, guard);
        mutator.resolve_by_find();
        mutator
    }

    pub(crate) fn insert_or_find(inner: &'g Inner<V>, hash: u64, guard: &'g Guard) -> Self {
        let mut mutator = Self::unresolved(inner, hash, guard);
        mutator.resolve_by_insert();
        mutator
    }

    /// Binds the mutator to the cell of its key in the current root, if
    /// there is one.
    fn resolve_by_find(&mut self) {
        loop {
            self.table = self.inner.root(self.guard);

            match self.table.find(self.hash) {
                None => {
                    self.cell = None;
                    self.value = Shared::null();
                    return;
                }
                Some(cell) => {
                    self.cell = Some(cell);
                    self.value = cell.load_value(self.guard);
                    if !is_redirect(self.value) {
                        return;
                    }
                }
            }

            self.inner.participate(self.table, self.guard);
        }
    }

    /// Binds the mutator to the cell of its key in the current root, claiming
    /// a cell if needed.
    fn resolve_by_insert(&mut self) {
        loop {
            self.table = self.inner.root(self.guard);

            match self.table.insert_or_find(self.hash) {
                InsertResult::InsertedNew(cell) => {
                    // A migration may have redirected the cell already. The
                    // first write will find out.
                    self.cell = Some(cell);
                    self.value = Shared::null();
                    return;
                }
                InsertResult::AlreadyFound(cell) => {
                    self.cell = Some(cell);
                    self.value = cell.load_value(self.guard);
                    if !is_redirect(self.value) {
                        return;
                    }
                }
                InsertResult::Overflow(overflow_idx) => {
                    self.table
                        .begin_table_migration(self.inner, overflow_idx, self.guard);
                }
            }

            self.inner.participate(self.table, self.guard);
        }
    }

    /// Returns the key this mutator is bound to.
    pub fn key(&self) -> K
    where
        K: KeyTraits,
    {
        K::dehash(self.hash)
    }

    /// Returns the value last observed in the cell, without reading the cell
    /// again.
    pub fn get_value(&self) -> Option<&'g V> {
        match state_of(self.value) {
            ValueState::Present(value) => Some(value),
            ValueState::Empty => None,
            ValueState::Redirected => unreachable!("A mutator never caches a redirect"),
        }
    }

    /// Writes `desired` into the cell and returns the value it replaced.
    ///
    /// If another thread changed the cell since the mutator last observed it,
    /// that write wins. This call then behaves as if it had written `desired`
    /// immediately before the other thread: the cell keeps the other value,
    /// which becomes the new cached value, and `Some(desired)` is returned.
    pub fn exchange_value(&mut self, desired: V) -> Option<V>
    where
        V: Clone,
    {
        if self.cell.is_none() {
            self.resolve_by_insert();
        }

        let mut desired = Owned::new(ValueBox::new(desired));

        loop {
            let Some(cell) = self.cell else {
                unreachable!("An inserting mutator is always bound to a cell");
            };

            match cell.value.compare_exchange(
                self.value,
                desired,
                Ordering::AcqRel,
                Ordering::Acquire,
                self.guard,
            ) {
                Ok(new) => {
                    let previous = std::mem::replace(&mut self.value, new);
                    return unsafe { take_retired(previous, self.guard) };
                }
                Err(e) => {
                    desired = e.new;
                    if !is_redirect(e.current) {
                        self.value = e.current;
                        return Some(desired.into_box().value);
                    }
                }
            }

            // The cell was migrated. Help, then retry in the new table.
            self.inner.participate(self.table, self.guard);
            self.resolve_by_insert();
        }
    }

    /// Erases the value of the cell and returns it.
    ///
    /// Returns `None` if the cell was empty, or if another thread changed the
    /// cell since the mutator last observed it. In the latter case that write
    /// wins and becomes the new cached value.
    pub fn erase_value(&mut self) -> Option<V>
    where
        V: Clone,
    {
        loop {
            if self.value.is_null() {
                return None;
            }
            let Some(cell) = self.cell else {
                return None;
            };

            match cell.value.compare_exchange(
                self.value,
                Shared::null(),
                Ordering::AcqRel,
                Ordering::Acquire,
                self.guard,
            ) {
                Ok(_) => {
                    let previous = std::mem::replace(&mut self.value, Shared::null());
                    return unsafe { take_retired(previous, self.guard) };
                }
                Err(e) if !is_redirect(e.current) => {
                    self.value = e.current;
                    return None;
                }
                Err(_) => (),
            }

            self.inner.participate(self.table, self.guard);
            self.resolve_by_find();
        }
    }
}

/// Clones the value of a box that was just unlinked from its cell, and
/// retires the box.
unsafe fn take_retired<V: Clone>(ptr: Shared<'_, ValueBox<V>>, guard: &Guard) -> Option<V> {
    let value = ptr.as_ref().map(|b| b.value.clone());
    if value.is_some() {
        guard.defer_destroy(ptr);
    }
    value
}

#[cfg(test)]
mod tests {
    use crate::LeapfrogMap;

    #[test]
    fn read_then_conditional_write() {
        let map = LeapfrogMap::<i32, String>::new();
        let guard = &map.guard();

        let mut m = map.insert_or_find(-4, guard);
        assert_eq!(m.get_value(), None);
        assert_eq!(m.key(), -4);
        assert_eq!(m.exchange_value("a".into()), None);
        assert_eq!(m.get_value().map(String::as_str), Some("a"));
        assert_eq!(m.exchange_value("b".into()), Some("a".into()));

        assert_eq!(map.get(&-4), Some("b".into()));
    }

    #[test]
    fn stale_mutator_loses_to_the_other_write() {
        let map = LeapfrogMap::<u32, u32>::new();
        let guard = &map.guard();

        let mut stale = map.insert_or_find(1, guard);
        assert_eq!(map.assign(1, 100), None);

        // The other write wins. The stale write is ordered before it.
        assert_eq!(stale.exchange_value(5), Some(5));
        assert_eq!(stale.get_value(), Some(&100));
        assert_eq!(map.get(&1), Some(100));

        // Erasing through a stale mutator loses as well.
        let mut stale = map.find(&1, guard);
        assert_eq!(map.assign(1, 101), Some(100));
        assert_eq!(stale.erase_value(), None);
        assert_eq!(stale.get_value(), Some(&101));

        // Now the mutator is up to date.
        assert_eq!(stale.erase_value(), Some(101));
        assert_eq!(map.get(&1), None);
    }

    #[test]
    fn find_of_missing_key() {
        let map = LeapfrogMap::<u32, u32>::new();
        let guard = &map.guard();

        let mut m = map.find(&9, guard);
        assert_eq!(m.get_value(), None);
        assert_eq!(m.erase_value(), None);

        // A find mutator claims a cell on its first write.
        assert_eq!(m.exchange_value(3), None);
        assert_eq!(map.get(&9), Some(3));
    }

    #[test]
    fn mutator_follows_a_migration() {
        let map = LeapfrogMap::<u32, u32>::new();
        let guard = &map.guard();

        assert_eq!(map.assign(0, 0), None);
        let mut m = map.find(&0, guard);
        let capacity = map.capacity();

        for k in 1..1000 {
            map.assign(k, k);
        }
        assert!(map.capacity() > capacity);

        // The cached cell has been redirected into the new table.
        assert_eq!(m.exchange_value(7), Some(0));
        assert_eq!(map.get(&0), Some(7));
        assert_eq!(m.erase_value(), Some(7));
        assert_eq!(map.get(&0), None);
    }
}
