use super::{
    cell::{state_of, ValueState},
    table::Table,
};
use crate::common::key::{KeyTraits, NULL_HASH};

use std::marker::PhantomData;

use crossbeam_epoch::Guard;

/// An iterator over the entries of a [`LeapfrogMap`][map-struct], in table
/// order.
///
/// The keys are recovered from the hashes stored in the cells with
/// [`KeyTraits::dehash`].
///
/// [map-struct]: ./struct.LeapfrogMap.html
pub struct Iter<'g, K, V> {
    table: &'g Table<V>,
    guard: &'g Guard,
    idx: usize,
    _marker: PhantomData<fn() -> K>,
}

impl<'g, K, V> Iter<'g, K, V> {
    pub(crate) fn new(table: &'g Table<V>, guard: &'g Guard) -> Self {
        Self {
            table,
            guard,
            idx: 0,
            _marker: PhantomData,
        }
    }
}

impl<'g, K: KeyTraits, V> Iterator for Iter<'g, K, V> {
    type Item = (K, &'g V);

    fn next(&mut self) -> Option<Self::Item> {
        while self.idx < self.table.size() {
            let cell = self.table.cell(self.idx);
            self.idx += 1;

            let value = match state_of(cell.load_value(self.guard)) {
                ValueState::Present(value) => value,
                ValueState::Empty => continue,
                ValueState::Redirected => {
                    debug_assert!(false, "A leapfrog map was migrated while being iterated");
                    continue;
                }
            };

            let hash = cell.load_hash();
            debug_assert_ne!(hash, NULL_HASH);
            return Some((K::dehash(hash), value));
        }

        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.table.size() - self.idx))
    }
}

#[cfg(test)]
mod tests {
    use crate::LeapfrogMap;

    #[test]
    fn yields_live_entries() {
        let map = LeapfrogMap::<(i32, i32), u32>::new();
        for x in -10..10 {
            for y in -10..10 {
                map.assign((x, y), (x * 100 + y) as u32);
            }
        }
        for x in -10..10 {
            map.erase(&(x, 0));
        }

        let guard = &map.guard();
        let mut entries: Vec<_> = map.iter(guard).map(|(k, v)| (k, *v)).collect();
        entries.sort_unstable();

        let mut expected: Vec<_> = (-10..10)
            .flat_map(|x| (-10..10).map(move |y| (x, y)))
            .filter(|&(_, y)| y != 0)
            .map(|(x, y)| ((x, y), (x * 100 + y) as u32))
            .collect();
        expected.sort_unstable();

        assert_eq!(entries, expected);
    }

    #[test]
    fn empty_map() {
        let map = LeapfrogMap::<u64, u64>::new();
        let guard = &map.guard();
        assert_eq!(map.iter(guard).count(), 0);
    }
}
