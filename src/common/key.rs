//! Key hashing for leapfrog tables.
//!
//! A leapfrog table does not store keys. Each cell stores a 64-bit hash, and
//! the hash function must therefore be a bijection between the key space and
//! the hash space so that equal hashes imply equal keys. The mixing function
//! used here is the 64-bit finalizer of MurmurHash3, which is invertible.

/// The hash value of a cell that has never been claimed.
pub const NULL_HASH: u64 = 0;

/// Converts keys to and from the 64-bit hashes stored in table cells.
///
/// # Contract
///
/// - `hash` must be injective: two different keys must never produce the same
///   hash.
/// - `hash` must never return [`NULL_HASH`] for a key that is used with a map.
///   Implementations for 64-bit wide keys reserve exactly one key for this
///   purpose; see the notes on each implementation.
/// - `dehash(k.hash()) == k` for every usable key `k`.
pub trait KeyTraits: Copy {
    /// Returns the hash stored in the cell that holds this key.
    fn hash(&self) -> u64;

    /// Recovers the key from a hash previously returned by [`KeyTraits::hash`].
    fn dehash(hash: u64) -> Self;
}

#[inline]
pub(crate) fn avalanche(mut h: u64) -> u64 {
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    h ^= h >> 33;
    h
}

#[inline]
pub(crate) fn deavalanche(mut h: u64) -> u64 {
    h ^= h >> 33;
    h = h.wrapping_mul(0x9cb4_b2f8_1293_37db);
    h ^= h >> 33;
    h = h.wrapping_mul(0x4f74_430c_22a5_4005);
    h ^= h >> 33;
    h
}

// Keys narrower than 64 bits are shifted by one so that no key maps to the
// null hash (`avalanche(0) == 0`).
macro_rules! narrow_key_traits {
    ($($t:ty => $unsigned:ty),* $(,)?) => {
        $(
            impl KeyTraits for $t {
                #[inline]
                fn hash(&self) -> u64 {
                    avalanche((*self as $unsigned as u64) + 1)
                }

                #[inline]
                fn dehash(hash: u64) -> Self {
                    deavalanche(hash).wrapping_sub(1) as $unsigned as $t
                }
            }
        )*
    };
}

narrow_key_traits!(u16 => u16, u32 => u32, i16 => u16, i32 => u32);

/// `u64::MAX` is reserved.
impl KeyTraits for u64 {
    #[inline]
    fn hash(&self) -> u64 {
        avalanche(self.wrapping_add(1))
    }

    #[inline]
    fn dehash(hash: u64) -> Self {
        deavalanche(hash).wrapping_sub(1)
    }
}

/// `usize::MAX` is reserved on 64-bit targets.
impl KeyTraits for usize {
    #[inline]
    fn hash(&self) -> u64 {
        (*self as u64).hash()
    }

    #[inline]
    fn dehash(hash: u64) -> Self {
        u64::dehash(hash) as usize
    }
}

const SIGN_BIT: u64 = 1 << 63;

/// `i64::MAX` is reserved.
impl KeyTraits for i64 {
    #[inline]
    fn hash(&self) -> u64 {
        ((*self as u64) ^ SIGN_BIT).hash()
    }

    #[inline]
    fn dehash(hash: u64) -> Self {
        (u64::dehash(hash) ^ SIGN_BIT) as i64
    }
}

/// `isize::MAX` is reserved on 64-bit targets.
impl KeyTraits for isize {
    #[inline]
    fn hash(&self) -> u64 {
        (*self as i64).hash()
    }

    #[inline]
    fn dehash(hash: u64) -> Self {
        i64::dehash(hash) as isize
    }
}

/// A pair of signed coordinates, such as a tile position. The pair
/// `(i32::MAX, i32::MAX)` is reserved.
impl KeyTraits for (i32, i32) {
    #[inline]
    fn hash(&self) -> u64 {
        let col = (self.0 as u32 ^ 0x8000_0000) as u64;
        let row = (self.1 as u32 ^ 0x8000_0000) as u64;
        ((col << 32) | row).hash()
    }

    #[inline]
    fn dehash(hash: u64) -> Self {
        let bits = u64::dehash(hash);
        let col = ((bits >> 32) as u32 ^ 0x8000_0000) as i32;
        let row = (bits as u32 ^ 0x8000_0000) as i32;
        (col, row)
    }
}

#[cfg(test)]
mod tests {
    use super::{avalanche, deavalanche, KeyTraits, NULL_HASH};

    #[test]
    fn avalanche_is_invertible() {
        let mut x = 0x0123_4567_89ab_cdef_u64;
        for _ in 0..10_000 {
            assert_eq!(deavalanche(avalanche(x)), x);
            x = x.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
        }
        assert_eq!(avalanche(0), 0);
    }

    #[test]
    fn narrow_keys_round_trip_without_reservation() {
        for k in [0u32, 1, 42, u32::MAX - 1, u32::MAX] {
            assert_ne!(k.hash(), NULL_HASH);
            assert_eq!(u32::dehash(k.hash()), k);
        }
        for k in [i32::MIN, -1, 0, 1, i32::MAX] {
            assert_ne!(k.hash(), NULL_HASH);
            assert_eq!(i32::dehash(k.hash()), k);
        }
        for k in [0u16, u16::MAX] {
            assert_eq!(u16::dehash(k.hash()), k);
        }
    }

    #[test]
    fn wide_keys_reserve_a_single_key() {
        assert_eq!(u64::MAX.hash(), NULL_HASH);
        assert_eq!(i64::MAX.hash(), NULL_HASH);
        assert_eq!((i32::MAX, i32::MAX).hash(), NULL_HASH);

        for k in [0u64, 1, u64::MAX - 1] {
            assert_ne!(k.hash(), NULL_HASH);
            assert_eq!(u64::dehash(k.hash()), k);
        }
        for k in [i64::MIN, -1, 0, i64::MAX - 1] {
            assert_ne!(k.hash(), NULL_HASH);
            assert_eq!(i64::dehash(k.hash()), k);
        }
    }

    #[test]
    fn tile_coordinates_round_trip() {
        for k in [(0, 0), (-1, -1), (-1, 0), (0, -1), (i32::MIN, i32::MAX), (17, -3)] {
            assert_ne!(k.hash(), NULL_HASH);
            assert_eq!(<(i32, i32)>::dehash(k.hash()), k);
        }
        assert_ne!((1, 0).hash(), (0, 1).hash());
    }
}
