//! A lock-free hash table with leapfrog probing.
//!
//! The table is an array of cells, each holding a 64-bit key hash and an
//! atomic pointer to a boxed value. A cell's hash is claimed once by a CAS from
//! the null hash and never changes afterwards, so the position of a key in a
//! table is fixed for the lifetime of that table. Erasing a key only clears the
//! value pointer.
//!
//! Cells are grouped by four, and each group carries eight one-byte deltas.
//! The cells that belong to one bucket (the cells whose hashes map to the same
//! index) form a linked list: the first four deltas point from a bucket's home
//! cell to the first cell of its list, and the last four point from each list
//! cell to the next one. A lookup therefore "leapfrogs" over cells of other
//! buckets instead of scanning them. An insert that reaches the end of its
//! bucket's list probes linearly for a free cell, up to a fixed distance,
//! claims it and appends it to the list. When no free cell is in reach the
//! insert reports an overflow, and the table is migrated.
//!
//! A migration copies the live cells into a new table that is reachable only
//! from the migration record. The record is published in a slot of the old
//! table, and every thread that runs into the migration joins it and copies
//! units of cells until none are left. Each copied cell has its value pointer
//! replaced with a null pointer carrying a redirect tag; a thread that finds
//! the redirect tag knows that the cell now lives in a newer table. If a write
//! races with the copy of its cell, the copy is repeated with the new value,
//! so that no write is lost. The last worker to leave swaps the root pointer
//! of the map to the new table and retires the old table. Should the new table
//! overflow during the copy, the last worker instead starts a follow-up
//! migration into a table twice as large, which copies from the old table and
//! from the overflowed one.
//!
//! Retired tables and replaced values are freed through `crossbeam-epoch` once
//! no pinned thread can observe them any more.
//!
//! This hash table algorithm follows the Leapfrog map of [Junction], a C++
//! library of concurrent data structures by Jeff Preshing, described in
//! [a blog post on leapfrog probing].
//!
//! [Junction]: https://github.com/preshing/junction
//! [a blog post on leapfrog probing]: https://preshing.com/20160314/leapfrog-probing/

pub(crate) mod cell;
pub(crate) mod iter;
pub(crate) mod job;
pub(crate) mod map;
pub(crate) mod migration;
pub(crate) mod mutator;
pub(crate) mod table;
