use std::sync::atomic::Ordering;

use crossbeam_epoch::{Atomic, CompareExchangeError, Guard, Owned, Shared};
use crossbeam_utils::Backoff;

/// Set on the null job pointer once the coordinated work has finished.
const END_TAG: usize = 0b1;

/// A slot through which one unit of expensive work is shared by every thread
/// that runs into it.
///
/// The slot goes through three states: vacant, holding a job (which may be
/// replaced by a follow-up job), and ended. Threads never wait on a lock for
/// the job: they call [`participate`](Self::participate) and execute the job
/// themselves alongside everybody else.
///
/// The coordinator does not own its jobs. Whoever replaces or ends a job is
/// responsible for retiring it.
pub(crate) struct JobCoordinator<J> {
    job: Atomic<J>,
}

impl<J> Default for JobCoordinator<J> {
    fn default() -> Self {
        Self {
            job: Atomic::null(),
        }
    }
}

impl<J> JobCoordinator<J> {
    pub(crate) fn load<'g>(&self, guard: &'g Guard) -> Shared<'g, J> {
        self.job.load(Ordering::Acquire, guard)
    }

    /// Returns `true` if no job has ever been started.
    pub(crate) fn is_vacant(&self, guard: &Guard) -> bool {
        let job = self.load(guard);
        job.is_null() && job.tag() & END_TAG == 0
    }

    #[cfg(test)]
    pub(crate) fn is_ended(&self, guard: &Guard) -> bool {
        self.load(guard).tag() & END_TAG != 0
    }

    /// Publishes the first job of this coordinator. Exactly one of the racing
    /// callers succeeds; the others get their job back.
    pub(crate) fn start<'g>(&self, job: Owned<J>, guard: &'g Guard) -> Result<Shared<'g, J>, Owned<J>> {
        self.job
            .compare_exchange(
                Shared::null(),
                job,
                Ordering::AcqRel,
                Ordering::Acquire,
                guard,
            )
            .map_err(|CompareExchangeError { new, .. }| new)
    }

    /// Replaces the running job with a follow-up job. Only the thread that
    /// finished `current` may call this.
    pub(crate) fn replace<'g>(
        &self,
        current: Shared<'g, J>,
        next: Owned<J>,
        guard: &'g Guard,
    ) -> Shared<'g, J> {
        match self
            .job
            .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire, guard)
        {
            Ok(next) => next,
            Err(_) => panic!("A coordinated job was replaced by a thread that did not finish it"),
        }
    }

    /// Marks the coordinated work as finished. Only the thread that finished
    /// `current` may call this.
    pub(crate) fn end<'g>(&self, current: Shared<'g, J>, guard: &'g Guard) {
        let ended = Shared::null().with_tag(END_TAG);
        let result =
            self.job
                .compare_exchange(current, ended, Ordering::AcqRel, Ordering::Acquire, guard);
        assert!(
            result.is_ok(),
            "A coordinated job was ended by a thread that did not finish it"
        );
    }

    /// Helps with the coordinated work until it has ended.
    ///
    /// `run` is called at most once per job, and returns once there is no
    /// unclaimed work left in that job for this thread. While other threads
    /// are finishing the last pieces of a job, the caller backs off and polls
    /// the slot again; it never blocks on a lock.
    pub(crate) fn participate<'g>(&self, guard: &'g Guard, mut run: impl FnMut(Shared<'g, J>))
    where
        J: 'g,
    {
        let backoff = Backoff::new();
        let mut prev = Shared::null();

        loop {
            let job = self.load(guard);

            if job.is_null() {
                // Ended, or nothing was ever started.
                return;
            }

            if job == prev {
                backoff.snooze();
                continue;
            }

            run(job);
            prev = job;
            backoff.reset();
        }
    }
}
