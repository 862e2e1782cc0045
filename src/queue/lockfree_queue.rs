//! MPMC queue backed by `crossbeam::queue`. Bounded instances use
//! `ArrayQueue` (a Vyukov-style ring buffer); unbounded instances use
//! `SegQueue` (a segmented Michael-Scott-style list with epoch-based
//! reclamation). Both give crossbeam's own lock-free/wait-free guarantees for
//! free, which is why this crate reuses them instead of hand-rolling an
//! unsafe pointer-chasing queue.

use super::JobQueue;
use crate::error::BusError;
use crate::job::Job;
use crossbeam::queue::{ArrayQueue, SegQueue};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Polling interval used by `dequeue` while waiting for work. Crossbeam's
/// queues expose no blocking wait primitive, so a bounded busy-poll stands in
/// for the mutex queue's condition variable.
const POLL_INTERVAL: Duration = Duration::from_micros(200);

enum Backing {
    Bounded(ArrayQueue<Job>),
    Unbounded(SegQueue<Job>),
}

pub struct LockFreeJobQueue {
    backing: Backing,
    stopped: AtomicBool,
}

impl LockFreeJobQueue {
    pub fn bounded(capacity: usize) -> Self {
        Self {
            backing: Backing::Bounded(ArrayQueue::new(capacity.max(1))),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn unbounded() -> Self {
        Self {
            backing: Backing::Unbounded(SegQueue::new()),
            stopped: AtomicBool::new(false),
        }
    }

    fn pop(&self) -> Option<Job> {
        match &self.backing {
            Backing::Bounded(q) => q.pop(),
            Backing::Unbounded(q) => q.pop(),
        }
    }
}

impl JobQueue for LockFreeJobQueue {
    fn enqueue(&self, job: Job) -> Result<(), BusError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(BusError::Stopped);
        }
        match &self.backing {
            Backing::Bounded(q) => {
                let capacity = q.capacity();
                q.push(job).map_err(|_| BusError::Overflow {
                    depth: capacity,
                    max: capacity,
                })
            }
            Backing::Unbounded(q) => {
                q.push(job);
                Ok(())
            }
        }
    }

    fn dequeue(&self, timeout: Duration) -> Option<Job> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(job) = self.pop() {
                return Some(job);
            }
            if self.stopped.load(Ordering::Acquire) {
                return self.pop();
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now())));
        }
    }

    fn size(&self) -> usize {
        match &self.backing {
            Backing::Bounded(q) => q.len(),
            Backing::Unbounded(q) => q.len(),
        }
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobResult;

    #[test]
    fn unbounded_fifo_order_per_single_producer() {
        let q = LockFreeJobQueue::unbounded();
        q.enqueue(Job::new(|| JobResult::Success).named("a")).unwrap();
        q.enqueue(Job::new(|| JobResult::Success).named("b")).unwrap();
        assert_eq!(q.dequeue(Duration::from_millis(10)).unwrap().name(), Some("a"));
        assert_eq!(q.dequeue(Duration::from_millis(10)).unwrap().name(), Some("b"));
    }

    #[test]
    fn bounded_queue_rejects_past_capacity() {
        let q = LockFreeJobQueue::bounded(1);
        q.enqueue(Job::new(|| JobResult::Success)).unwrap();
        assert!(q.enqueue(Job::new(|| JobResult::Success)).is_err());
    }

    #[test]
    fn dequeue_times_out_on_empty_queue() {
        let q = LockFreeJobQueue::unbounded();
        assert!(q.dequeue(Duration::from_millis(2)).is_none());
    }

    #[test]
    fn enqueue_after_stop_fails() {
        let q = LockFreeJobQueue::unbounded();
        q.stop();
        assert_eq!(q.enqueue(Job::new(|| JobResult::Success)), Err(BusError::Stopped));
    }
}
