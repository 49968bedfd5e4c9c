use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use crossbeam_epoch::{Atomic, Guard, Shared};

use crate::common::key::NULL_HASH;

/// Set on the null value pointer of a cell that has been copied into a newer
/// table.
pub(crate) const REDIRECT_TAG: usize = 0b001;

/// A heap slot for a value. The alignment leaves room for the redirect tag in
/// the low bits of the cell's value pointer whatever `V` is.
#[repr(align(8))]
#[derive(Debug)]
pub(crate) struct ValueBox<V> {
    pub(crate) value: V,
}

impl<V> ValueBox<V> {
    pub(crate) fn new(value: V) -> Self {
        Self { value }
    }
}

/// The logical state of a cell's value.
#[derive(Debug)]
pub(crate) enum ValueState<'g, V> {
    /// Never written, or erased.
    Empty,
    /// Copied into a newer table. The reader must help finish the migration
    /// and look again in the new root.
    Redirected,
    Present(&'g V),
}

#[inline]
pub(crate) fn is_redirect<V>(ptr: Shared<'_, ValueBox<V>>) -> bool {
    ptr.tag() & REDIRECT_TAG != 0
}

#[inline]
pub(crate) fn redirect<'g, V>() -> Shared<'g, ValueBox<V>> {
    Shared::null().with_tag(REDIRECT_TAG)
}

#[inline]
pub(crate) fn state_of<'g, V>(ptr: Shared<'g, ValueBox<V>>) -> ValueState<'g, V> {
    if is_redirect(ptr) {
        debug_assert!(ptr.is_null());
        return ValueState::Redirected;
    }
    match unsafe { ptr.as_ref() } {
        Some(b) => ValueState::Present(&b.value),
        None => ValueState::Empty,
    }
}

pub(crate) struct Cell<V> {
    pub(crate) hash: AtomicU64,
    pub(crate) value: Atomic<ValueBox<V>>,
}

impl<V> Default for Cell<V> {
    fn default() -> Self {
        Self {
            hash: AtomicU64::new(NULL_HASH),
            value: Atomic::null(),
        }
    }
}

impl<V> Cell<V> {
    #[inline]
    pub(crate) fn load_hash(&self) -> u64 {
        self.hash.load(Ordering::Acquire)
    }

    /// Claims an unused cell for `hash`. Returns the hash found in the cell
    /// when the claim fails.
    #[inline]
    pub(crate) fn claim(&self, hash: u64) -> Result<(), u64> {
        debug_assert_ne!(hash, NULL_HASH);
        self.hash
            .compare_exchange(NULL_HASH, hash, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
    }

    #[inline]
    pub(crate) fn load_value<'g>(&self, guard: &'g Guard) -> Shared<'g, ValueBox<V>> {
        self.value.load_consume(guard)
    }
}

/// Four consecutive cells and their probe chain links.
///
/// `deltas[i]` (for `i` in `0..4`) is the offset from cell `i` to the first
/// link of the bucket that hashes to cell `i`. `deltas[4 + i]` is the offset
/// from cell `i` to the next link of the bucket cell `i` belongs to. A zero
/// delta ends the chain.
pub(crate) struct CellGroup<V> {
    pub(crate) deltas: [AtomicU8; 8],
    pub(crate) cells: [Cell<V>; 4],
}

impl<V> Default for CellGroup<V> {
    fn default() -> Self {
        Self {
            deltas: Default::default(),
            cells: Default::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{is_redirect, redirect, state_of, Cell, ValueBox, ValueState};
    use crate::common::key::NULL_HASH;

    use crossbeam_epoch::{Owned, Shared};
    use std::sync::atomic::Ordering;

    #[test]
    fn value_states() {
        let guard = unsafe { crossbeam_epoch::unprotected() };

        assert!(matches!(
            state_of::<u8>(Shared::null()),
            ValueState::Empty
        ));
        assert!(matches!(state_of::<u8>(redirect()), ValueState::Redirected));
        assert!(is_redirect::<u8>(redirect()));

        let boxed = Owned::new(ValueBox::new(7u8)).into_shared(guard);
        assert!(matches!(state_of(boxed), ValueState::Present(&7)));
        assert!(!is_redirect(boxed));
        unsafe { drop(boxed.into_owned()) };
    }

    #[test]
    fn hash_is_claimed_once() {
        let cell = Cell::<u32>::default();
        assert_eq!(cell.load_hash(), NULL_HASH);
        assert_eq!(cell.claim(17), Ok(()));
        assert_eq!(cell.claim(17), Err(17));
        assert_eq!(cell.claim(23), Err(17));
        assert_eq!(cell.hash.load(Ordering::Relaxed), 17);
    }
}
