//! Queue that starts mutex-backed and transparently switches to the
//! lock-free backing under sustained contention, switching back once
//! contention subsides (with hysteresis, per the design spec's transition
//! policy: `W` consecutive over-threshold windows trip the upgrade, `3W`
//! consecutive under-threshold windows trip the downgrade).

use super::lockfree_queue::LockFreeJobQueue;
use super::mutex_queue::MutexJobQueue;
use super::JobQueue;
use crate::error::BusError;
use crate::job::Job;
use arc_swap::ArcSwap;
use parking_lot::{Mutex as PlMutex, RwLock as PlRwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Tunable thresholds governing the mutex/lock-free transition. `window` is
/// the sample count per observation window; `w_up`/`w_down` are the number
/// of consecutive windows required before committing to a transition in
/// that direction.
#[derive(Debug, Clone, Copy)]
pub struct AdaptiveThresholds {
    pub window: usize,
    pub t_up: Duration,
    pub p_up: usize,
    pub t_down: Duration,
    pub p_down: usize,
    pub w_up: usize,
    pub w_down: usize,
}

impl Default for AdaptiveThresholds {
    fn default() -> Self {
        let w_up = 3;
        Self {
            window: 64,
            t_up: Duration::from_micros(200),
            p_up: 4,
            t_down: Duration::from_micros(50),
            p_down: 2,
            w_up,
            w_down: w_up * 3,
        }
    }
}

pub struct AdaptiveJobQueue {
    active: ArcSwap<dyn JobQueue>,
    is_lock_free: AtomicBool,
    lockfree_capacity: Option<usize>,
    thresholds: AdaptiveThresholds,
    in_flight: AtomicUsize,
    window_count: AtomicUsize,
    window_wait_nanos: AtomicU64,
    window_max_in_flight: AtomicUsize,
    consecutive_high: AtomicUsize,
    consecutive_low: AtomicUsize,
    transition_guard: PlMutex<()>,
    /// Held for read around every `load_full` + `enqueue` pair, and for
    /// write around the swap-and-drain in `transition`. Without it, a
    /// thread that reads `active` as the outgoing representation just
    /// before a transition could still be calling `enqueue` on it after
    /// `transition` has already stopped and drained it, losing the job.
    /// Taking the write lock for the whole transition guarantees no such
    /// enqueue is in flight when the swap happens, and none can start
    /// against the retired representation afterward.
    swap_lock: PlRwLock<()>,
}

impl AdaptiveJobQueue {
    /// `lockfree_capacity`: `Some(n)` switches into a bounded `ArrayQueue` of
    /// size `n`; `None` switches into an unbounded `SegQueue`.
    pub fn new(lockfree_capacity: Option<usize>) -> Self {
        Self::with_thresholds(lockfree_capacity, AdaptiveThresholds::default())
    }

    pub fn with_thresholds(lockfree_capacity: Option<usize>, thresholds: AdaptiveThresholds) -> Self {
        let initial: Arc<dyn JobQueue> = Arc::new(MutexJobQueue::new());
        Self {
            active: ArcSwap::from(initial),
            is_lock_free: AtomicBool::new(false),
            lockfree_capacity,
            thresholds,
            in_flight: AtomicUsize::new(0),
            window_count: AtomicUsize::new(0),
            window_wait_nanos: AtomicU64::new(0),
            window_max_in_flight: AtomicUsize::new(0),
            consecutive_high: AtomicUsize::new(0),
            consecutive_low: AtomicUsize::new(0),
            transition_guard: PlMutex::new(()),
            swap_lock: PlRwLock::new(()),
        }
    }

    /// True if the queue is currently backed by the lock-free representation.
    pub fn is_lock_free(&self) -> bool {
        self.is_lock_free.load(Ordering::Acquire)
    }

    fn record_sample(&self, wait: Duration, in_flight_snapshot: usize) {
        self.window_wait_nanos
            .fetch_add(wait.as_nanos() as u64, Ordering::Relaxed);
        self.window_max_in_flight.fetch_max(in_flight_snapshot, Ordering::Relaxed);

        let count = self.window_count.fetch_add(1, Ordering::AcqRel) + 1;
        if count >= self.thresholds.window {
            self.evaluate_window();
        }
    }

    fn evaluate_window(&self) {
        let Some(_guard) = self.transition_guard.try_lock() else {
            return;
        };
        let count = self.window_count.swap(0, Ordering::AcqRel);
        if count == 0 {
            return;
        }
        let total_wait_nanos = self.window_wait_nanos.swap(0, Ordering::AcqRel);
        let max_in_flight = self.window_max_in_flight.swap(0, Ordering::AcqRel);
        let avg_wait = Duration::from_nanos(total_wait_nanos / count as u64);

        if self.is_lock_free() {
            let low = avg_wait < self.thresholds.t_down && max_in_flight < self.thresholds.p_down;
            if low {
                let streak = self.consecutive_low.fetch_add(1, Ordering::AcqRel) + 1;
                self.consecutive_high.store(0, Ordering::Release);
                if streak >= self.thresholds.w_down {
                    self.transition(false);
                    self.consecutive_low.store(0, Ordering::Release);
                }
            } else {
                self.consecutive_low.store(0, Ordering::Release);
            }
        } else {
            let high = avg_wait > self.thresholds.t_up && max_in_flight > self.thresholds.p_up;
            if high {
                let streak = self.consecutive_high.fetch_add(1, Ordering::AcqRel) + 1;
                self.consecutive_low.store(0, Ordering::Release);
                if streak >= self.thresholds.w_up {
                    self.transition(true);
                    self.consecutive_high.store(0, Ordering::Release);
                }
            } else {
                self.consecutive_high.store(0, Ordering::Release);
            }
        }
    }

    fn transition(&self, to_lock_free: bool) {
        let next: Arc<dyn JobQueue> = if to_lock_free {
            match self.lockfree_capacity {
                Some(capacity) => Arc::new(LockFreeJobQueue::bounded(capacity)),
                None => Arc::new(LockFreeJobQueue::unbounded()),
            }
        } else {
            Arc::new(MutexJobQueue::new())
        };
        // Blocks until every `enqueue` already past its read-lock acquire has
        // returned, so none can still be holding a reference to `old` by the
        // time it's stopped and drained below.
        let _write = self.swap_lock.write();
        let old = self.active.swap(next.clone());
        self.is_lock_free.store(to_lock_free, Ordering::Release);
        old.drain_into(&*next);
    }
}

impl JobQueue for AdaptiveJobQueue {
    fn enqueue(&self, job: Job) -> Result<(), BusError> {
        let in_flight = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        let start = std::time::Instant::now();
        let _read = self.swap_lock.read();
        let active = self.active.load_full();
        let result = active.enqueue(job);
        drop(_read);
        let wait = start.elapsed();
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        self.record_sample(wait, in_flight);
        result
    }

    fn dequeue(&self, timeout: Duration) -> Option<Job> {
        self.active.load_full().dequeue(timeout)
    }

    fn size(&self) -> usize {
        self.active.load_full().size()
    }

    fn stop(&self) {
        self.active.load_full().stop();
    }

    fn is_stopped(&self) -> bool {
        self.active.load_full().is_stopped()
    }
}
