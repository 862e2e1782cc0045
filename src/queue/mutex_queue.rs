//! Condition-variable-backed FIFO queue. The baseline implementation every
//! other queue in this family is measured against, and the representation
//! `AdaptiveJobQueue` starts in.

use super::JobQueue;
use crate::error::BusError;
use crate::job::Job;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub struct MutexJobQueue {
    queue: Mutex<VecDeque<Job>>,
    not_empty: Condvar,
    stopped: AtomicBool,
    max_depth: Option<usize>,
}

impl MutexJobQueue {
    pub fn new() -> Self {
        Self::bounded(None)
    }

    /// `max_depth = Some(n)` rejects enqueues once `n` jobs are pending.
    pub fn bounded(max_depth: Option<usize>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
            stopped: AtomicBool::new(false),
            max_depth,
        }
    }

}

impl Default for MutexJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue for MutexJobQueue {
    fn enqueue(&self, job: Job) -> Result<(), BusError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(BusError::Stopped);
        }
        let mut guard = self.queue.lock();
        if let Some(max) = self.max_depth {
            if guard.len() >= max {
                return Err(BusError::Overflow {
                    depth: guard.len(),
                    max,
                });
            }
        }
        guard.push_back(job);
        self.not_empty.notify_one();
        Ok(())
    }

    fn dequeue(&self, timeout: Duration) -> Option<Job> {
        let mut guard = self.queue.lock();
        loop {
            if let Some(job) = guard.pop_front() {
                return Some(job);
            }
            if self.stopped.load(Ordering::Acquire) {
                return None;
            }
            let result = self.not_empty.wait_for(&mut guard, timeout);
            if result.timed_out() {
                return guard.pop_front();
            }
        }
    }

    fn size(&self) -> usize {
        self.queue.lock().len()
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.not_empty.notify_all();
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
    fn fifo_order_is_preserved() {
        let q = MutexJobQueue::new();
        q.enqueue(Job::new(|| JobResult::Success).named("a")).unwrap();
        q.enqueue(Job::new(|| JobResult::Success).named("b")).unwrap();
        let first = q.dequeue(Duration::from_millis(10)).unwrap();
        let second = q.dequeue(Duration::from_millis(10)).unwrap();
        assert_eq!(first.name(), Some("a"));
        assert_eq!(second.name(), Some("b"));
    }

    #[test]
    fn dequeue_times_out_on_empty_queue() {
        let q = MutexJobQueue::new();
        assert!(q.dequeue(Duration::from_millis(5)).is_none());
    }

    #[test]
    fn enqueue_after_stop_fails() {
        let q = MutexJobQueue::new();
        q.stop();
        let result = q.enqueue(Job::new(|| JobResult::Success));
        assert_eq!(result, Err(BusError::Stopped));
    }

    #[test]
    fn bounded_queue_rejects_past_capacity() {
        let q = MutexJobQueue::bounded(Some(1));
        q.enqueue(Job::new(|| JobResult::Success)).unwrap();
        let result = q.enqueue(Job::new(|| JobResult::Success));
        assert_eq!(result, Err(BusError::Overflow { depth: 1, max: 1 }));
    }
}
