//! # Job Queue Family
//!
//! Three interchangeable `JobQueue` implementations share one trait:
//! [`mutex_queue::MutexJobQueue`] (condition-variable FIFO),
//! [`lockfree_queue::LockFreeJobQueue`] (crossbeam-backed MPMC), and
//! [`adaptive_queue::AdaptiveJobQueue`] (switches between the two under
//! observed contention). [`typed_queue::TypedJobQueue`] layers per-priority
//! lanes of any `JobQueue` on top, for pools that route by [`crate::job::JobType`].

pub mod adaptive_queue;
pub mod lockfree_queue;
pub mod mutex_queue;
pub mod typed_queue;

use crate::error::BusError;
use crate::job::Job;
use std::time::Duration;

/// Common interface shared by every queue backend. All methods take `&self`
/// so a queue can be shared behind a plain `Arc` across worker threads
/// without an outer lock.
pub trait JobQueue: Send + Sync {
    /// Enqueue `job`. Fails with `BusError::Stopped` once `stop` has been
    /// called, or `BusError::Overflow` if the queue is bounded and full.
    fn enqueue(&self, job: Job) -> Result<(), BusError>;

    /// Wait up to `timeout` for a job. Returns `None` on timeout or once the
    /// queue has been stopped and drained.
    fn dequeue(&self, timeout: Duration) -> Option<Job>;

    /// Current number of jobs waiting.
    fn size(&self) -> usize;

    /// Stop accepting new jobs. Jobs already enqueued remain dequeuable until
    /// the queue is drained; `enqueue` after `stop` always fails.
    fn stop(&self);

    /// True once `stop` has been called.
    fn is_stopped(&self) -> bool;

    /// Stop this queue and move every pending job into `dest`. Used when a
    /// queue representation is retired (e.g. `AdaptiveJobQueue` switching
    /// between its mutex and lock-free backings).
    fn drain_into(&self, dest: &dyn JobQueue) {
        self.stop();
        while let Some(job) = self.dequeue(Duration::from_millis(0)) {
            let _ = dest.enqueue(job);
        }
    }
}
