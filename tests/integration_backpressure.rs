//! Pool-level backpressure: once a bounded queue is saturated, `submit`
//! rejects further jobs under the `Fail` policy rather than growing without
//! bound, every job admitted before saturation still runs to completion, and
//! a typed pool under `DropLowestPriority` sheds its lowest-priority pending
//! job instead of growing past its configured cap.

use messaging_core::{BackpressurePolicy, BusError, Job, JobResult, JobType, PriorityMode, Pool, QueueKind, TypedPool};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::time::{Duration, Instant};

#[test]
fn overflowing_submissions_fail_while_admitted_jobs_still_complete() {
    let executed = Arc::new(AtomicUsize::new(0));
    // Zero workers: nothing drains the queue while we saturate it, so the
    // first 10 submissions land and the next 5 observe a full queue.
    let mut pool = Pool::new(0, QueueKind::Mutex, Some(10), BackpressurePolicy::Fail);

    let mut accepted = 0;
    let mut rejected = 0;
    for _ in 0..15 {
        let executed = Arc::clone(&executed);
        match pool.submit(Job::new(move || {
            executed.fetch_add(1, Ordering::SeqCst);
            JobResult::Success
        })) {
            Ok(()) => accepted += 1,
            Err(BusError::Overflow { .. }) => rejected += 1,
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!(accepted, 10);
    assert_eq!(rejected, 5);

    // Now let a freshly-started pool with workers drain what was admitted.
    let mut draining_pool = Pool::new(4, QueueKind::Mutex, Some(10), BackpressurePolicy::Fail);
    for _ in 0..10 {
        let executed = Arc::clone(&executed);
        draining_pool
            .submit(Job::new(move || {
                executed.fetch_add(1, Ordering::SeqCst);
                JobResult::Success
            }))
            .unwrap();
    }
    draining_pool.stop(true);
    assert_eq!(executed.load(Ordering::SeqCst), 10);

    pool.stop(false);
}

#[test]
fn block_policy_admits_once_room_frees_up() {
    let barrier = Arc::new(Barrier::new(2));
    let mut pool = Pool::new(
        1,
        QueueKind::Mutex,
        Some(1),
        BackpressurePolicy::Block(Duration::from_secs(2)),
    );

    let worker_barrier = Arc::clone(&barrier);
    pool.submit(Job::new(move || {
        worker_barrier.wait();
        JobResult::Success
    }))
    .unwrap();

    // The single worker is now blocked on the barrier with the queue empty,
    // so this submission has room immediately.
    let executed = Arc::new(AtomicUsize::new(0));
    let executed_clone = Arc::clone(&executed);
    pool.submit(Job::new(move || {
        executed_clone.fetch_add(1, Ordering::SeqCst);
        JobResult::Success
    }))
    .unwrap();

    barrier.wait();
    pool.stop(true);
    assert_eq!(executed.load(Ordering::SeqCst), 1);
}

#[test]
fn drop_lowest_priority_evicts_the_lowest_priority_pending_job() {
    let mut pool = TypedPool::new(PriorityMode::Strict, Some(3), BackpressurePolicy::DropLowestPriority);

    // `TypedPool::new` spawns one worker per lane plus one floating worker
    // (six total). Occupy every one of them with a job that blocks until
    // `release` is set, submitting one at a time and waiting for each to be
    // dequeued before submitting the next, so the queue never approaches
    // `max_depth` during setup.
    let release = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let executed: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let occupying_types = [
        JobType::Background,
        JobType::Low,
        JobType::Normal,
        JobType::High,
        JobType::Realtime,
        JobType::Realtime,
    ];
    for (i, job_type) in occupying_types.into_iter().enumerate() {
        let release = Arc::clone(&release);
        let executed = Arc::clone(&executed);
        let name = format!("occupy-{i}");
        pool.submit(Job::with_type(job_type, move || {
            while !release.load(Ordering::Acquire) {
                std::thread::sleep(Duration::from_millis(1));
            }
            executed.lock().unwrap().push(name);
            JobResult::Success
        }))
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while pool.queue_size() > 0 {
            assert!(Instant::now() < deadline, "worker never dequeued occupying job {i}");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    // Every worker is now blocked, so the queue fills to its cap without
    // anything draining it.
    for i in 0..3 {
        let executed = Arc::clone(&executed);
        let name = format!("low-{i}");
        pool.submit(Job::with_type(JobType::Background, move || {
            executed.lock().unwrap().push(name);
            JobResult::Success
        }))
        .unwrap();
    }
    assert_eq!(pool.queue_size(), 3);

    // The queue is at capacity; this submission must evict the
    // lowest-priority pending job ("low-0", the head of the Background
    // lane) rather than growing the queue past its cap.
    let executed_clone = Arc::clone(&executed);
    pool.submit(Job::with_type(JobType::Realtime, move || {
        executed_clone.lock().unwrap().push("rt-extra".to_string());
        JobResult::Success
    }))
    .unwrap();
    assert_eq!(pool.queue_size(), 3, "drop-then-admit must not grow the queue past its cap");

    release.store(true, Ordering::Release);
    pool.stop(true);

    let executed = executed.lock().unwrap();
    assert!(!executed.contains(&"low-0".to_string()), "the dropped job must never execute");
    assert!(executed.contains(&"low-1".to_string()));
    assert!(executed.contains(&"low-2".to_string()));
    assert!(executed.contains(&"rt-extra".to_string()));
    assert_eq!(
        executed.len(),
        6 + 2 + 1,
        "six occupying jobs plus the two surviving low-priority jobs plus the new realtime job"
    );
}
