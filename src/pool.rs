//! # Pool & Typed Pool
//!
//! `Pool` owns N workers draining a shared [`JobQueue`]; `TypedPool` owns N
//! workers draining a shared [`TypedJobQueue`], each worker scoped to an
//! `allowed_type_set`. Both expose the same start/stop/submit lifecycle the
//! design spec pins: `stop(graceful=true)` lets every already-enqueued job
//! run to completion; `stop(graceful=false)` drains the queue without
//! executing what's left.

use crate::error::BusError;
use crate::job::{Job, JobType};
use crate::queue::adaptive_queue::AdaptiveJobQueue;
use crate::queue::lockfree_queue::LockFreeJobQueue;
use crate::queue::mutex_queue::MutexJobQueue;
use crate::queue::typed_queue::{PriorityMode, TypedJobQueue};
use crate::queue::JobQueue;
use crate::worker::{JobSource, Worker, WorkerError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Which backend a [`Pool`] provisions its shared queue with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueKind {
    Mutex,
    LockFree,
    #[default]
    Adaptive,
}

/// What `submit` does when the queue is at (or over) its configured
/// high-water mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackpressurePolicy {
    /// Reject the submission with `BusError::Overflow`.
    #[default]
    Fail,
    /// Block the caller, up to a deadline, waiting for room.
    Block(Duration),
    /// Accept the submission anyway, after dropping the oldest pending job
    /// in the lowest-priority non-empty lane. Only meaningful for a typed
    /// pool; for a flat `Pool` this behaves like `Fail` since there is no
    /// priority information to drop by.
    DropLowestPriority,
}

fn build_queue(kind: QueueKind, max_depth: Option<usize>) -> Arc<dyn JobQueue> {
    match kind {
        QueueKind::Mutex => Arc::new(MutexJobQueue::bounded(max_depth)),
        QueueKind::LockFree => match max_depth {
            Some(depth) => Arc::new(LockFreeJobQueue::bounded(depth)),
            None => Arc::new(LockFreeJobQueue::unbounded()),
        },
        QueueKind::Adaptive => Arc::new(AdaptiveJobQueue::new(max_depth)),
    }
}

/// A pool of workers draining one shared, untyped job queue.
pub struct Pool {
    queue: Arc<dyn JobQueue>,
    workers: Vec<Worker>,
    max_depth: Option<usize>,
    backpressure: BackpressurePolicy,
    started: AtomicBool,
}

impl Pool {
    pub fn new(worker_count: usize, kind: QueueKind, max_depth: Option<usize>, backpressure: BackpressurePolicy) -> Self {
        let queue = build_queue(kind, max_depth);
        let on_error: Arc<dyn Fn(WorkerError) + Send + Sync> = Arc::new(|_err: WorkerError| {});
        let workers = (0..worker_count)
            .map(|id| {
                let on_error = Arc::clone(&on_error);
                Worker::spawn(id, Arc::clone(&queue), move |err| (on_error)(err))
            })
            .collect();
        Self {
            queue,
            workers,
            max_depth,
            backpressure,
            started: AtomicBool::new(true),
        }
    }

    /// Construct a pool whose workers report failures to `on_error`.
    pub fn with_error_handler<E>(
        worker_count: usize,
        kind: QueueKind,
        max_depth: Option<usize>,
        backpressure: BackpressurePolicy,
        on_error: E,
    ) -> Self
    where
        E: Fn(WorkerError) + Send + Sync + 'static,
    {
        let queue = build_queue(kind, max_depth);
        let on_error = Arc::new(on_error);
        let workers = (0..worker_count)
            .map(|id| {
                let on_error = Arc::clone(&on_error);
                Worker::spawn(id, Arc::clone(&queue), move |err| (on_error)(err))
            })
            .collect();
        Self {
            queue,
            workers,
            max_depth,
            backpressure,
            started: AtomicBool::new(true),
        }
    }

    pub fn submit(&self, job: Job) -> Result<(), BusError> {
        if !self.started.load(Ordering::Acquire) {
            return Err(BusError::Stopped);
        }
        if let Some(max) = self.max_depth {
            if self.queue.size() >= max {
                return self.handle_backpressure(job, max);
            }
        }
        self.queue.enqueue(job)
    }

    pub fn submit_batch(&self, jobs: Vec<Job>) -> Result<(), BusError> {
        for job in jobs {
            self.submit(job)?;
        }
        Ok(())
    }

    fn handle_backpressure(&self, job: Job, max: usize) -> Result<(), BusError> {
        match self.backpressure {
            BackpressurePolicy::Fail | BackpressurePolicy::DropLowestPriority => Err(BusError::Overflow {
                depth: self.queue.size(),
                max,
            }),
            BackpressurePolicy::Block(deadline) => {
                let start = std::time::Instant::now();
                while self.queue.size() >= max {
                    if start.elapsed() >= deadline {
                        return Err(BusError::Overflow {
                            depth: self.queue.size(),
                            max,
                        });
                    }
                    std::thread::sleep(Duration::from_micros(200));
                }
                self.queue.enqueue(job)
            }
        }
    }

    pub fn queue_size(&self) -> usize {
        self.queue.size()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// `graceful = true`: stop accepting new work but let already-queued jobs
    /// run to completion before joining workers. `graceful = false`: stop the
    /// queue (which refuses new enqueues) and ask workers to exit as soon as
    /// their current job finishes, without draining what's left.
    pub fn stop(&mut self, graceful: bool) {
        self.started.store(false, Ordering::Release);
        if graceful {
            self.queue.stop();
            for worker in &self.workers {
                worker.request_stop();
            }
        } else {
            self.queue.stop();
            while self.queue.dequeue(Duration::from_millis(0)).is_some() {}
            for worker in &self.workers {
                worker.request_stop();
            }
        }
        for worker in &mut self.workers {
            worker.join();
        }
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        if self.started.load(Ordering::Acquire) {
            self.stop(true);
        }
    }
}

struct TypedSource {
    queue: Arc<TypedJobQueue>,
    allowed: Vec<JobType>,
}

impl JobSource for TypedSource {
    fn next_job(&self, timeout: Duration) -> Option<Job> {
        self.queue.dequeue(&self.allowed, timeout)
    }
}

/// A pool of workers draining a shared [`TypedJobQueue`]. Default assignment
/// gives one worker per [`JobType`] plus one floating worker accepting every
/// type, matching the design spec's documented default.
pub struct TypedPool {
    queue: Arc<TypedJobQueue>,
    workers: Vec<Worker>,
    max_depth: Option<usize>,
    backpressure: BackpressurePolicy,
    started: AtomicBool,
}

impl TypedPool {
    pub fn new(priority_mode: PriorityMode, max_depth: Option<usize>, backpressure: BackpressurePolicy) -> Self {
        let queue = Arc::new(TypedJobQueue::new(priority_mode));
        let on_error: Arc<dyn Fn(WorkerError) + Send + Sync> = Arc::new(|_err: WorkerError| {});
        let workers = Self::spawn_workers(&queue, 1, &on_error);
        Self {
            queue,
            workers,
            max_depth,
            backpressure,
            started: AtomicBool::new(true),
        }
    }

    pub fn with_error_handler<E>(
        priority_mode: PriorityMode,
        max_depth: Option<usize>,
        backpressure: BackpressurePolicy,
        on_error: E,
    ) -> Self
    where
        E: Fn(WorkerError) + Send + Sync + 'static,
    {
        let queue = Arc::new(TypedJobQueue::new(priority_mode));
        let on_error = Arc::new(on_error);
        let workers = Self::spawn_workers(&queue, 1, &on_error);
        Self {
            queue,
            workers,
            max_depth,
            backpressure,
            started: AtomicBool::new(true),
        }
    }

    /// Like [`TypedPool::new`], but scales the default "one worker per lane
    /// plus one floating worker" assignment by `workers_per_lane` so the
    /// pool's total worker count tracks a caller-supplied budget (e.g.
    /// `BusConfig::worker_count` divided across `JobType::ALL.len() + 1`
    /// lanes) instead of always spawning exactly six threads.
    pub fn with_worker_count(
        priority_mode: PriorityMode,
        worker_count: usize,
        max_depth: Option<usize>,
        backpressure: BackpressurePolicy,
    ) -> Self {
        let queue = Arc::new(TypedJobQueue::new(priority_mode));
        let on_error: Arc<dyn Fn(WorkerError) + Send + Sync> = Arc::new(|_err: WorkerError| {});
        let workers_per_lane = (worker_count / (JobType::ALL.len() + 1)).max(1);
        let workers = Self::spawn_workers(&queue, workers_per_lane, &on_error);
        Self {
            queue,
            workers,
            max_depth,
            backpressure,
            started: AtomicBool::new(true),
        }
    }

    fn spawn_workers(
        queue: &Arc<TypedJobQueue>,
        workers_per_lane: usize,
        on_error: &Arc<dyn Fn(WorkerError) + Send + Sync>,
    ) -> Vec<Worker> {
        let mut workers = Vec::with_capacity((JobType::ALL.len() + 1) * workers_per_lane);
        let mut next_id = 0usize;
        for job_type in JobType::ALL {
            for _ in 0..workers_per_lane {
                let source = TypedSource {
                    queue: Arc::clone(queue),
                    allowed: vec![job_type],
                };
                let on_error = Arc::clone(on_error);
                workers.push(Worker::spawn(next_id, source, move |err| (on_error)(err)));
                next_id += 1;
            }
        }
        for _ in 0..workers_per_lane {
            let floating_source = TypedSource {
                queue: Arc::clone(queue),
                allowed: JobType::ALL.to_vec(),
            };
            let on_error = Arc::clone(on_error);
            workers.push(Worker::spawn(next_id, floating_source, move |err| (on_error)(err)));
            next_id += 1;
        }
        workers
    }

    pub fn submit(&self, job: Job) -> Result<(), BusError> {
        if !self.started.load(Ordering::Acquire) {
            return Err(BusError::Stopped);
        }
        if let Some(max) = self.max_depth {
            if self.queue.size() >= max {
                return self.handle_backpressure(job, max);
            }
        }
        self.queue.enqueue(job)
    }

    pub fn submit_batch(&self, jobs: Vec<Job>) -> Result<(), BusError> {
        for job in jobs {
            self.submit(job)?;
        }
        Ok(())
    }

    fn handle_backpressure(&self, job: Job, max: usize) -> Result<(), BusError> {
        match self.backpressure {
            BackpressurePolicy::Fail => Err(BusError::Overflow {
                depth: self.queue.size(),
                max,
            }),
            BackpressurePolicy::DropLowestPriority => {
                // Evict the lowest-priority lane's head before admitting the
                // new job, so the queue's total depth never grows past `max`
                // under this policy.
                self.queue.drop_lowest_priority();
                self.queue.enqueue(job)
            }
            BackpressurePolicy::Block(deadline) => {
                let start = std::time::Instant::now();
                while self.queue.size() >= max {
                    if start.elapsed() >= deadline {
                        return Err(BusError::Overflow {
                            depth: self.queue.size(),
                            max,
                        });
                    }
                    std::thread::sleep(Duration::from_micros(200));
                }
                self.queue.enqueue(job)
            }
        }
    }

    pub fn queue_size(&self) -> usize {
        self.queue.size()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Per-worker execution counters, for callers (e.g. `Bus::stats`) that
    /// want true worker-busy utilization rather than just queue depth.
    pub fn worker_stats(&self) -> impl Iterator<Item = &crate::worker::WorkerStats> {
        self.workers.iter().map(Worker::stats)
    }

    pub fn stop(&mut self, graceful: bool) {
        self.started.store(false, Ordering::Release);
        self.queue.stop();
        if !graceful {
            while self.queue.dequeue(&JobType::ALL, Duration::from_millis(0)).is_some() {}
        }
        for worker in &self.workers {
            worker.request_stop();
        }
        for worker in &mut self.workers {
            worker.join();
        }
    }
}

impl Drop for TypedPool {
    fn drop(&mut self) {
        if self.started.load(Ordering::Acquire) {
            self.stop(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobResult;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn pool_executes_submitted_jobs() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut pool = Pool::new(4, QueueKind::Mutex, None, BackpressurePolicy::Fail);
        for _ in 0..20 {
            let counter = Arc::clone(&counter);
            pool.submit(Job::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                JobResult::Success
            }))
            .unwrap();
        }
        pool.stop(true);
        assert_eq!(counter.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn submit_after_stop_fails() {
        let mut pool = Pool::new(2, QueueKind::Mutex, None, BackpressurePolicy::Fail);
        pool.stop(true);
        assert_eq!(pool.submit(Job::new(|| JobResult::Success)), Err(BusError::Stopped));
    }

    #[test]
    fn bounded_pool_fails_fast_on_overflow() {
        let mut pool = Pool::new(0, QueueKind::Mutex, Some(1), BackpressurePolicy::Fail);
        pool.submit(Job::new(|| JobResult::Success)).unwrap();
        let result = pool.submit(Job::new(|| JobResult::Success));
        assert!(matches!(result, Err(BusError::Overflow { .. })));
        pool.stop(false);
    }

    #[test]
    fn typed_pool_executes_across_priorities() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut pool = TypedPool::new(PriorityMode::Strict, None, BackpressurePolicy::Fail);
        for job_type in JobType::ALL {
            let counter = Arc::clone(&counter);
            pool.submit(Job::with_type(job_type, move || {
                counter.fetch_add(1, Ordering::SeqCst);
                JobResult::Success
            }))
            .unwrap();
        }
        std::thread::sleep(Duration::from_millis(100));
        pool.stop(true);
        assert_eq!(counter.load(Ordering::SeqCst), JobType::ALL.len());
    }
}
