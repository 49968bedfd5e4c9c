//! Quiescent-state-based reclamation (QSBR) for leapfrog tables.
//!
//! Tables that have been replaced by a migration may still be read by threads
//! that loaded the old root pointer. They are therefore not freed when they
//! are unlinked, but queued here and freed once every registered thread has
//! passed a quiescent state.
//!
//! The bookkeeping is delegated to `crossbeam-epoch`: a [`QsbrContext`] is a
//! registered participant of a [`Collector`], a thread is quiescent whenever
//! it holds no [`Guard`] from its context, and [`Qsbr::update`] is a
//! checkpoint that lets the collector advance and run the destructors whose
//! generation every participant has moved past.

use std::{
    fmt,
    sync::{
        atomic::{self, Ordering},
        Arc,
    },
};

use crossbeam_epoch::{Collector, Guard, LocalHandle, Shared};
use crossbeam_utils::atomic::AtomicCell;

#[derive(Default)]
struct ReclaimCounter {
    enqueued: AtomicCell<u64>,
    reclaimed: AtomicCell<u64>,
}

/// The reclamation queue of a map.
///
/// A map created without an explicit collector shares the global
/// `crossbeam-epoch` collector with the rest of the process, so guards
/// obtained from [`crossbeam_epoch::pin`] can be used with it directly.
pub struct Qsbr {
    collector: Collector,
    is_global: bool,
    counter: Arc<ReclaimCounter>,
}

impl fmt::Debug for Qsbr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Qsbr")
            .field("is_global", &self.is_global)
            .field("generation", &self.generation())
            .field("reclaimed", &self.reclaimed())
            .finish()
    }
}

impl Qsbr {
    pub(crate) fn new(collector: Option<Collector>) -> Self {
        let (collector, is_global) = match collector {
            Some(c) => (c, false),
            None => (crossbeam_epoch::default_collector().clone(), true),
        };

        Self {
            collector,
            is_global,
            counter: Arc::default(),
        }
    }

    /// Registers the calling thread as a participant.
    ///
    /// The context may be kept for as long as the thread uses the map. Guards
    /// pinned from it can be passed to every guard-taking map method.
    pub fn create_context(&self) -> QsbrContext {
        QsbrContext {
            handle: self.collector.register(),
        }
    }

    /// Announces a final quiescent state for `context` and unregisters it.
    pub fn destroy_context(&self, context: QsbrContext) {
        self.update(&context);
    }

    /// A quiescent checkpoint: the thread owning `context` declares that it
    /// holds no reference into any table retired before this call.
    ///
    /// Queued destructors run once every live context has passed such a
    /// checkpoint (or has simply not been pinned) after they were queued.
    pub fn update(&self, context: &QsbrContext) {
        debug_assert!(
            !context.handle.is_pinned(),
            "A QSBR context must not hold a guard at a quiescent checkpoint"
        );
        context.handle.pin().flush();
    }

    /// Number of objects queued for reclamation so far.
    pub fn generation(&self) -> u64 {
        self.counter.enqueued.load()
    }

    /// Number of queued objects that have been freed.
    pub fn reclaimed(&self) -> u64 {
        self.counter.reclaimed.load()
    }

    /// Pins a temporary participant. With a private collector this registers
    /// a new participant each time.
    pub(crate) fn pin(&self) -> Guard {
        if self.is_global {
            crossbeam_epoch::pin()
        } else {
            self.collector.register().pin()
        }
    }

    pub(crate) fn check_guard(&self, guard: &Guard) {
        // `unprotected()` guards have no collector and are only used while
        // the map is exclusively owned.
        if let Some(c) = guard.collector() {
            assert!(
                c == &self.collector,
                "Tried to use a guard from a different collector"
            );
        }
    }

    /// Queues `ptr` to be dropped once no thread can observe it any more.
    ///
    /// # Safety
    ///
    /// `ptr` must be unreachable for every thread that pins a guard after this
    /// call, and must not be queued twice.
    pub(crate) unsafe fn enqueue<T>(&self, guard: &Guard, ptr: Shared<'_, T>) {
        assert!(!ptr.is_null());

        self.counter.enqueued.fetch_add(1);
        let counter = Arc::clone(&self.counter);

        guard.defer_unchecked(move || {
            atomic::fence(Ordering::Acquire);
            drop(ptr.into_owned());
            counter.reclaimed.fetch_add(1);
        });
    }
}

/// A thread's registration with a map's reclamation queue.
///
/// Dropping the context unregisters the thread. Use
/// [`Qsbr::destroy_context`] to also pass a last quiescent checkpoint.
pub struct QsbrContext {
    handle: LocalHandle,
}

impl fmt::Debug for QsbrContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QsbrContext")
            .field("is_pinned", &self.handle.is_pinned())
            .finish()
    }
}

impl QsbrContext {
    /// Pins the thread. Table memory reachable through the returned guard
    /// stays valid until the guard is dropped.
    pub fn pin(&self) -> Guard {
        self.handle.pin()
    }

    /// Returns `true` if a guard of this context is alive.
    pub fn is_pinned(&self) -> bool {
        self.handle.is_pinned()
    }
}
