//! # Worker
//!
//! A `Worker` owns one OS thread (per the design spec's "parallel OS threads,
//! one per worker" concurrency model — jobs are not cooperatively interleaved
//! within a worker) and repeatedly pulls from a [`JobSource`], executes, and
//! reports. Panics are caught at the [`crate::job::Job::run`] level, so a
//! worker's loop never unwinds because of a misbehaving job.

use crate::job::{Job, JobResult};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Anything a worker can pull jobs from: a bare queue, or a typed queue
/// scoped to an allowed set of job types.
pub trait JobSource: Send + Sync {
    fn next_job(&self, timeout: Duration) -> Option<Job>;
}

impl JobSource for Arc<dyn crate::queue::JobQueue> {
    fn next_job(&self, timeout: Duration) -> Option<Job> {
        self.as_ref().dequeue(timeout)
    }
}

/// How long a worker waits on an empty source before re-checking its stop
/// flag. Small enough to keep `stop` responsive, large enough to avoid
/// busy-spinning an idle worker.
pub const POLL_TIMEOUT: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Created,
    Running,
    Stopping,
    Stopped,
}

impl WorkerState {
    fn from_code(code: u8) -> Self {
        match code {
            0 => WorkerState::Created,
            1 => WorkerState::Running,
            2 => WorkerState::Stopping,
            _ => WorkerState::Stopped,
        }
    }

    fn code(self) -> u8 {
        match self {
            WorkerState::Created => 0,
            WorkerState::Running => 1,
            WorkerState::Stopping => 2,
            WorkerState::Stopped => 3,
        }
    }
}

/// Per-worker execution counters, updated with relaxed atomics from the
/// worker thread and read from any thread for stats reporting.
#[derive(Default)]
pub struct WorkerStats {
    pub executed: AtomicU64,
    pub failed: AtomicU64,
    pub total_wall_time_nanos: AtomicU64,
}

impl WorkerStats {
    pub fn executed(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
    pub fn total_wall_time(&self) -> Duration {
        Duration::from_nanos(self.total_wall_time_nanos.load(Ordering::Relaxed))
    }
}

/// A single job failure or panic, handed to the pool's error callback.
#[derive(Debug, Clone)]
pub struct WorkerError {
    pub worker_id: usize,
    pub job_name: Option<String>,
    pub reason: String,
}

pub struct Worker {
    id: usize,
    state: Arc<AtomicU8>,
    stats: Arc<WorkerStats>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawn a worker thread pulling from `source`. `on_error` is invoked
    /// (on the worker thread) for every failed or panicking job; it must not
    /// block for long, since it runs inline in the worker loop.
    pub fn spawn<S, E>(id: usize, source: S, on_error: E) -> Self
    where
        S: JobSource + 'static,
        E: Fn(WorkerError) + Send + Sync + 'static,
    {
        let state = Arc::new(AtomicU8::new(WorkerState::Created.code()));
        let stats = Arc::new(WorkerStats::default());

        let thread_state = Arc::clone(&state);
        let thread_stats = Arc::clone(&stats);
        let handle = std::thread::Builder::new()
            .name(format!("messaging-core-worker-{id}"))
            .spawn(move || {
                thread_state.store(WorkerState::Running.code(), Ordering::Release);
                loop {
                    if WorkerState::from_code(thread_state.load(Ordering::Acquire)) == WorkerState::Stopping {
                        if let Some(job) = source.next_job(Duration::from_millis(0)) {
                            run_job(id, job, &thread_stats, &on_error);
                            continue;
                        }
                        break;
                    }

                    match source.next_job(POLL_TIMEOUT) {
                        Some(job) => run_job(id, job, &thread_stats, &on_error),
                        None => continue,
                    }
                }
                thread_state.store(WorkerState::Stopped.code(), Ordering::Release);
            })
            .expect("failed to spawn worker thread");

        Self {
            id,
            state,
            stats,
            handle: Some(handle),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_code(self.state.load(Ordering::Acquire))
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Request the worker finish its current job and any already-visible
    /// queued work, then exit. Call [`Worker::join`] afterward to block until
    /// it has actually stopped.
    pub fn request_stop(&self) {
        self.state.store(WorkerState::Stopping.code(), Ordering::Release);
    }

    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run_job<E>(worker_id: usize, job: Job, stats: &WorkerStats, on_error: &E)
where
    E: Fn(WorkerError) + Send + Sync,
{
    let name = job.name().map(str::to_string);
    let start = Instant::now();
    let result = job.run();
    let elapsed = start.elapsed();

    stats.total_wall_time_nanos.fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    match result {
        JobResult::Success => {
            stats.executed.fetch_add(1, Ordering::Relaxed);
        }
        JobResult::Failed { reason } => {
            stats.executed.fetch_add(1, Ordering::Relaxed);
            stats.failed.fetch_add(1, Ordering::Relaxed);
            on_error(WorkerError {
                worker_id,
                job_name: name,
                reason,
            });
        }
    }
}
