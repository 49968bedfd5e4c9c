use std::sync::{
    atomic::{AtomicIsize, Ordering},
    Arc,
};

/// A value that counts its live instances, clones included.
#[derive(Debug)]
pub(crate) struct Tracked {
    pub(crate) id: u32,
    live: Arc<AtomicIsize>,
}

impl Tracked {
    pub(crate) fn counter() -> Arc<AtomicIsize> {
        Arc::new(AtomicIsize::new(0))
    }

    pub(crate) fn new(live: &Arc<AtomicIsize>, id: u32) -> Self {
        live.fetch_add(1, Ordering::Relaxed);
        Self {
            id,
            live: Arc::clone(live),
        }
    }

    pub(crate) fn live(live: &AtomicIsize) -> isize {
        live.load(Ordering::Relaxed)
    }
}

impl Clone for Tracked {
    fn clone(&self) -> Self {
        Self::new(&self.live, self.id)
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        let prev = self.live.fetch_sub(1, Ordering::Relaxed);
        assert!(prev > 0, "Tracked value {} was dropped twice", self.id);
    }
}
