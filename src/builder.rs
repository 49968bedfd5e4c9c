use crate::{common::error::Error, common::key::KeyTraits, LeapfrogMap};

use std::marker::PhantomData;

use crossbeam_epoch::Collector;

/// Builds a [`LeapfrogMap`][map-struct] with various configuration knobs.
///
/// [map-struct]: ./struct.LeapfrogMap.html
///
/// # Examples
///
/// ```rust
/// use leapfrog_map::Builder;
///
/// let map = Builder::<u32, String>::new()
///     // Start with room for at least 1,000 cells.
///     .initial_capacity(1_000)
///     // Prefix log messages of this map with its name.
///     .name("tiles")
///     .build();
///
/// map.assign(1, "one".to_string());
/// assert_eq!(map.capacity(), 1024);
/// assert_eq!(map.name(), Some("tiles"));
/// ```
///
/// A map can use its own epoch collector, so that its retired tables do not
/// wait for unrelated pinned threads of the process. Guards must then be
/// obtained from the map itself:
///
/// ```rust
/// use leapfrog_map::LeapfrogMap;
/// use crossbeam_epoch::Collector;
///
/// let map = LeapfrogMap::<u64, u64>::builder()
///     .collector(Collector::new())
///     .build();
///
/// let context = map.create_context();
/// {
///     let guard = &context.pin();
///     map.insert_or_find(3, guard).exchange_value(9);
///     assert_eq!(map.get_ref(&3, guard), Some(&9));
/// }
/// map.qsbr().destroy_context(context);
/// ```
pub struct Builder<K, V> {
    name: Option<String>,
    initial_capacity: Option<usize>,
    collector: Option<Collector>,
    map_type: PhantomData<fn() -> (K, V)>,
}

impl<K, V> Default for Builder<K, V> {
    fn default() -> Self {
        Self {
            name: None,
            initial_capacity: None,
            collector: None,
            map_type: PhantomData,
        }
    }
}

impl<K, V> Builder<K, V>
where
    K: KeyTraits,
    V: Send + Sync + 'static,
{
    /// Constructs a new `Builder` with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a `LeapfrogMap<K, V>`.
    ///
    /// # Panics
    ///
    /// Panics if the first table cannot be allocated. Use
    /// [`try_build`](Self::try_build) to handle this case.
    pub fn build(self) -> LeapfrogMap<K, V> {
        match self.try_build() {
            Ok(map) => map,
            Err(e) => panic!("{e}"),
        }
    }

    /// Builds a `LeapfrogMap<K, V>`, or returns an error if the first table
    /// cannot be allocated.
    pub fn try_build(self) -> Result<LeapfrogMap<K, V>, Error> {
        LeapfrogMap::with_everything(self.name, self.initial_capacity, self.collector)
    }
}

impl<K, V> Builder<K, V> {
    /// Sets the name of the map. The name prefixes the log messages of the
    /// map when the `logging` feature is enabled.
    pub fn name(self, name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..self
        }
    }

    /// Sets the initial number of cells of the map. It is rounded up to a
    /// power of two, and to at least 8.
    pub fn initial_capacity(self, capacity: usize) -> Self {
        Self {
            initial_capacity: Some(capacity),
            ..self
        }
    }

    /// Makes the map retire its tables through `collector` instead of the
    /// global collector of `crossbeam-epoch`.
    ///
    /// With a private collector, the guard-less operations (`get`, `assign`,
    /// `erase` and friends) register a new participant on every call. Threads
    /// that make many calls should keep a [`QsbrContext`][ctx] from
    /// `create_context` and pass its guards to `get_ref`, `insert_or_find` and
    /// `find` instead.
    ///
    /// [ctx]: crate::QsbrContext
    pub fn collector(self, collector: Collector) -> Self {
        Self {
            collector: Some(collector),
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Builder;
    use crate::Error;

    use crossbeam_epoch::Collector;

    #[test]
    fn build_with_defaults() {
        let map = Builder::<u32, u32>::new().build();
        assert_eq!(map.capacity(), 8);
        assert_eq!(map.name(), None);
    }

    #[test]
    fn build_with_everything() {
        let map = Builder::<u32, u32>::new()
            .name("named")
            .initial_capacity(100)
            .collector(Collector::new())
            .build();
        assert_eq!(map.capacity(), 128);
        assert_eq!(map.name(), Some("named"));

        map.assign(5, 50);
        assert_eq!(map.get(&5), Some(50));
    }

    #[test]
    fn private_collector_accepts_context_guards() {
        let map = Builder::<u32, u32>::new()
            .collector(Collector::new())
            .build();

        let context = map.create_context();
        {
            let guard = &context.pin();
            for k in 0..200 {
                assert_eq!(map.insert_or_find(k, guard).exchange_value(k * 2), None);
            }
            for k in 0..200 {
                assert_eq!(map.get_ref(&k, guard), Some(&(k * 2)));
                assert_eq!(map.find(&k, guard).get_value(), Some(&(k * 2)));
            }
        }
        map.qsbr().destroy_context(context);

        assert_eq!(map.get(&199), Some(398));
        assert!(map.stats().migrations_completed() >= 1);
    }

    #[test]
    fn try_build_reports_overflow() {
        let result = Builder::<u32, u32>::new()
            .initial_capacity(usize::MAX / 2 + 2)
            .try_build();
        assert!(matches!(result, Err(Error::CapacityOverflow { .. })));
    }

    #[test]
    #[should_panic(expected = "too large")]
    fn build_panics_on_overflow() {
        let _ = Builder::<u32, u32>::new()
            .initial_capacity(usize::MAX)
            .build();
    }
}
