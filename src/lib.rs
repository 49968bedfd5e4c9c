#![warn(clippy::all)]
#![warn(rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! A lock-free, resizable concurrent hash map for integer-like keys.
//!
//! [`LeapfrogMap`] maps keys that can be converted to and from 64-bit hashes
//! (see [`KeyTraits`]) to arbitrary values. Any number of threads can look up,
//! insert, replace and erase entries at the same time without taking a lock.
//! When the table runs out of free cells near a key, the map grows by
//! migrating its entries to a larger table while other threads keep using it.
//! Threads that run into a migration help with it instead of waiting.
//!
//! Retired tables are freed by quiescent-state-based reclamation on top of
//! [`crossbeam-epoch`][crossbeam-epoch]. See the [`reclaim`] module.
//!
//! [crossbeam-epoch]: https://docs.rs/crossbeam-epoch
//!
//! # Examples
//!
//! ```rust
//! use leapfrog_map::LeapfrogMap;
//!
//! // Tiles of a canvas, keyed by their coordinates.
//! let tiles = LeapfrogMap::<(i32, i32), Vec<u8>>::with_capacity(256);
//!
//! tiles.assign((0, 0), vec![0; 16]);
//! tiles.assign((-1, 3), vec![1; 16]);
//!
//! assert_eq!(tiles.get(&(-1, 3)).map(|t| t.len()), Some(16));
//! assert!(tiles.get(&(5, 5)).is_none());
//!
//! let guard = &tiles.guard();
//! let mut keys: Vec<_> = tiles.iter(guard).map(|(k, _)| k).collect();
//! keys.sort_unstable();
//! assert_eq!(keys, vec![(-1, 3), (0, 0)]);
//! ```
//!
//! # Logging
//!
//! With the `logging` feature enabled, table migrations are logged at the
//! `debug` level through the [`log`](https://docs.rs/log) crate.

pub(crate) mod builder;
pub(crate) mod common;
pub(crate) mod leapfrog;
pub mod reclaim;
pub mod stats;

#[cfg(test)]
pub(crate) mod test_util;

pub use builder::Builder;
pub use common::{
    error::Error,
    key::{KeyTraits, NULL_HASH},
};
pub use leapfrog::{iter::Iter, map::LeapfrogMap, mutator::Mutator};
pub use reclaim::{Qsbr, QsbrContext};
pub use stats::MapStats;
