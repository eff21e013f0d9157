//! Main-loop job queue.
//!
//! Arbitrary callers — including worker threads — hand callbacks to the
//! single-threaded execution domain by queuing jobs here; the main loop
//! drains the queue between I/O cycles. This mutex is the only lock in the
//! core.

use parking_lot::Mutex;

use log::error;

/// Maximum number of jobs queued before the queue is flushed.
pub const JOB_QUEUE_SIZE: usize = 256;

struct Job {
    proc: Box<dyn FnOnce() + Send>,
    owner: usize,
}

/// Bounded FIFO of deferred callbacks with per-owner pruning.
///
/// Each job carries an opaque `owner` token (typically the address or id of
/// the module that queued it) so pending callbacks can be cancelled before
/// their owner is torn down. On overflow the whole queue is flushed and an
/// error is logged; losing queued callbacks is preferred over blocking
/// producers.
#[derive(Default)]
pub struct JobQueue {
    jobs: Mutex<Vec<Job>>,
}

impl JobQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a callback to the queue.
    ///
    /// Callable from any thread. If the queue already holds
    /// [`JOB_QUEUE_SIZE`] entries, everything — including this job — is
    /// discarded and the overflow is logged.
    pub fn queue(&self, owner: usize, proc: impl FnOnce() + Send + 'static) {
        let mut overflow = false;

        {
            let mut jobs = self.jobs.lock();
            if jobs.len() < JOB_QUEUE_SIZE {
                jobs.push(Job { proc: Box::new(proc), owner });
            } else {
                jobs.clear();
                overflow = true;
            }
        }

        if overflow {
            error!("[mainloop] job queue overflow, list flushed");
        }
    }

    /// Removes every pending job queued by `owner`, preserving the FIFO
    /// order of the remainder.
    ///
    /// Must be called before freeing the owning module, or a stale job may
    /// run against freed state.
    pub fn prune(&self, owner: usize) {
        self.jobs.lock().retain(|job| job.owner != owner);
    }

    /// Runs all queued callbacks in FIFO order.
    ///
    /// Each callback is invoked with the queue unlocked, so jobs may queue
    /// further jobs; those run within the same drain.
    pub fn run_all(&self) {
        loop {
            let job = {
                let mut jobs = self.jobs.lock();
                if jobs.is_empty() {
                    break;
                }
                jobs.remove(0)
            };
            (job.proc)();
        }
    }

    /// Number of jobs currently pending.
    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    /// Returns true when no jobs are pending.
    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn jobs_run_in_fifo_order() {
        let queue = JobQueue::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let seen = seen.clone();
            queue.queue(1, move || seen.lock().push(i));
        }

        queue.run_all();
        assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn prune_removes_only_matching_owner() {
        let queue = JobQueue::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for (owner, tag) in [(1, "a"), (2, "b"), (1, "c"), (2, "d")] {
            let seen = seen.clone();
            queue.queue(owner, move || seen.lock().push(tag));
        }

        queue.prune(1);
        queue.run_all();
        assert_eq!(*seen.lock(), vec!["b", "d"]);
    }

    #[test]
    fn overflow_flushes_everything() {
        let queue = JobQueue::new();
        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..JOB_QUEUE_SIZE {
            let ran = ran.clone();
            queue.queue(1, move || {
                ran.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(queue.len(), JOB_QUEUE_SIZE);

        // one past capacity: the whole list goes, the new job included
        let ran2 = ran.clone();
        queue.queue(2, move || {
            ran2.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(queue.len(), 0);

        queue.run_all();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn jobs_arrive_from_other_threads() {
        let queue = Arc::new(JobQueue::new());
        let ran = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|owner| {
                let queue = queue.clone();
                let ran = ran.clone();
                std::thread::spawn(move || {
                    queue.queue(owner, move || {
                        ran.fetch_add(1, Ordering::SeqCst);
                    });
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        queue.run_all();
        assert_eq!(ran.load(Ordering::SeqCst), 4);
    }
}
