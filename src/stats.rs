//! Diagnostic counters of a [`LeapfrogMap`][map-struct].
//!
//! [map-struct]: ../struct.LeapfrogMap.html

mod map_stats;
pub(crate) mod stats_counter;

pub use map_stats::MapStats;
