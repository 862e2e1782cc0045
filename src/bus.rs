//! # Message Bus
//!
//! `Bus` is the crate's public facade: topic-routed publish/subscribe over a
//! [`TopicRouter`], request/response with deadline-based timeout over the
//! same routing, and an explicit, swappable [`Logger`]/[`MetricsSink`] pair
//! for observability. Every delivery — a matched subscriber invocation, or
//! a reaped request timeout — runs as a [`Job`] on an internal [`TypedPool`],
//! so backpressure, priority, and worker-panic isolation all come from the
//! same scheduler family the rest of the crate is built on.
//!
//! Request/response needs a clock, so unlike the rest of the crate `Bus`
//! assumes it is constructed from within a running Tokio runtime: the
//! deadline reaper is a `tokio::spawn`ed task, not an extra OS thread.

use crate::container::Container;
use crate::error::BusError;
use crate::job::{Job, JobResult};
use crate::logging::{Logger, NoopLogger};
use crate::metrics::{MetricsSink, NoopMetricsSink};
use crate::pool::{BackpressurePolicy, TypedPool};
use crate::queue::typed_queue::PriorityMode;
use crate::router::{SubscriptionId, TopicRouter};
use crate::trace::TraceContext;
use crate::value::Value;
use parking_lot::{Mutex, RwLock};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Reserved value name under which [`Bus::request`] stashes its correlation
/// id, so a replying handler (or a raw `__reply/<id>` publish) can address
/// the matching pending request without a side channel.
pub const CORRELATION_ID_KEY: &str = "__correlation_id";

/// Topic prefix reserved for out-of-band replies: publishing to
/// `__reply/<uuid>` resolves the matching pending request directly instead
/// of going through [`TopicRouter::route`].
pub const REPLY_TOPIC_PREFIX: &str = "__reply/";

/// Identifies one outstanding [`Bus::request`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId(pub Uuid);

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn parse_reply_topic(topic: &str) -> Option<CorrelationId> {
    topic.strip_prefix(REPLY_TOPIC_PREFIX).and_then(|s| Uuid::parse_str(s).ok()).map(CorrelationId)
}

/// A subscriber callback: takes the topic it matched on, the published
/// container (shared read-only across every matched subscriber), and the
/// trace context propagated with the publish. Returning `Err` marks the
/// delivery failed for metrics/logging purposes; it is never surfaced back
/// to the publisher.
pub type Handler = Arc<dyn Fn(&str, Arc<Container>, TraceContext) -> Result<(), BusError> + Send + Sync>;

/// Receipt returned by [`Bus::publish`]: an id for the publish event and how
/// many subscriptions matched at the moment of publishing. A subscriber
/// joining after the fact never sees the message; this crate makes no
/// durability promises (see the design spec's Non-goals).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishReceipt {
    pub message_id: Uuid,
    pub expected_delivery_count: usize,
}

/// A point-in-time snapshot of bus activity, exposed by [`Bus::stats`].
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct BusStats {
    pub published: u64,
    pub delivered: u64,
    pub failed: u64,
    pub pending_requests: usize,
    pub queue_depth: usize,
    /// Fraction of total worker wall-clock time, since bus construction,
    /// spent executing jobs rather than idling. `1.0` means every worker has
    /// been busy continuously.
    pub worker_utilization: f64,
}

impl BusStats {
    pub fn to_json(&self) -> Result<String, BusError> {
        serde_json::to_string(self).map_err(|e| BusError::TypeError(e.to_string()))
    }
}

/// Tunables for a [`Bus`]'s internal scheduler and defaults, constructed
/// directly (all fields are public) or built up field-by-field starting from
/// [`BusConfig::builder`].
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Target total worker count for the internal typed pool; divided across
    /// `JobType::ALL.len() + 1` lanes (see [`TypedPool::with_worker_count`]).
    pub worker_count: usize,
    pub queue_max_depth: Option<usize>,
    pub backpressure_policy: BackpressurePolicy,
    pub priority_mode: PriorityMode,
    pub request_default_timeout: Duration,
    pub max_container_size: usize,
    /// Probability (`[0, 1]`) that a new root trace is marked sampled.
    pub trace_sampling_rate: f64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get(),
            queue_max_depth: Some(100_000),
            backpressure_policy: BackpressurePolicy::Fail,
            priority_mode: PriorityMode::Strict,
            request_default_timeout: Duration::from_secs(30),
            max_container_size: crate::container::DEFAULT_MAX_CONTAINER_SIZE,
            trace_sampling_rate: 1.0,
        }
    }
}

impl BusConfig {
    /// Start from the default configuration and override fields with the
    /// chainable setters below.
    pub fn builder() -> Self {
        Self::default()
    }

    pub fn worker_count(mut self, n: usize) -> Self {
        self.worker_count = n;
        self
    }

    pub fn queue_max_depth(mut self, depth: Option<usize>) -> Self {
        self.queue_max_depth = depth;
        self
    }

    pub fn backpressure_policy(mut self, policy: BackpressurePolicy) -> Self {
        self.backpressure_policy = policy;
        self
    }

    pub fn priority_mode(mut self, mode: PriorityMode) -> Self {
        self.priority_mode = mode;
        self
    }

    pub fn request_default_timeout(mut self, timeout: Duration) -> Self {
        self.request_default_timeout = timeout;
        self
    }

    pub fn max_container_size(mut self, size: usize) -> Self {
        self.max_container_size = size;
        self
    }

    pub fn trace_sampling_rate(mut self, rate: f64) -> Self {
        self.trace_sampling_rate = rate;
        self
    }
}

struct PendingEntry {
    sender: tokio::sync::oneshot::Sender<Result<Container, BusError>>,
    timeout: Duration,
}

type PendingMap = Arc<Mutex<HashMap<CorrelationId, PendingEntry>>>;
type DeadlineHeap = Arc<Mutex<BinaryHeap<Reverse<(Instant, CorrelationId)>>>>;

/// Builds a [`Bus`] with an optional [`Logger`] and [`MetricsSink`]. Both
/// default to their no-op implementations, so `BusBuilder::new(config).build()`
/// is a complete, silent bus.
pub struct BusBuilder {
    config: BusConfig,
    logger: Arc<dyn Logger>,
    metrics_sink: Arc<dyn MetricsSink>,
}

impl BusBuilder {
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            logger: Arc::new(NoopLogger),
            metrics_sink: Arc::new(NoopMetricsSink),
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics_sink = sink;
        self
    }

    pub fn build(self) -> Bus {
        Bus::from_builder(self)
    }
}

/// The message bus. Cheap to share via `Arc<Bus>` across handler closures;
/// every field needed for delivery is itself `Send + Sync`.
pub struct Bus {
    config: BusConfig,
    router: TopicRouter,
    handlers: RwLock<HashMap<SubscriptionId, Handler>>,
    pool: TypedPool,
    logger: Arc<dyn Logger>,
    metrics_sink: Arc<dyn MetricsSink>,
    stopped: AtomicBool,
    published: AtomicU64,
    delivered: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
    pending: PendingMap,
    deadlines: DeadlineHeap,
    pending_count: Arc<AtomicUsize>,
    reaper: Option<tokio::task::JoinHandle<()>>,
    reaper_stop: Arc<AtomicBool>,
    started_at: Instant,
    on_stopped: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
}

impl Bus {
    /// Construct a bus with default collaborators (no-op logger/metrics).
    /// Must be called from within a running Tokio runtime.
    pub fn new(config: BusConfig) -> Self {
        BusBuilder::new(config).build()
    }

    fn from_builder(builder: BusBuilder) -> Self {
        let BusBuilder { config, logger, metrics_sink } = builder;
        let pool = TypedPool::with_worker_count(
            config.priority_mode,
            config.worker_count,
            config.queue_max_depth,
            config.backpressure_policy,
        );

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let deadlines: DeadlineHeap = Arc::new(Mutex::new(BinaryHeap::new()));
        let pending_count = Arc::new(AtomicUsize::new(0));
        let reaper_stop = Arc::new(AtomicBool::new(false));
        let reaper = Some(spawn_reaper(
            Arc::clone(&pending),
            Arc::clone(&deadlines),
            Arc::clone(&pending_count),
            Arc::clone(&reaper_stop),
        ));

        Self {
            config,
            router: TopicRouter::new(),
            handlers: RwLock::new(HashMap::new()),
            pool,
            logger,
            metrics_sink,
            stopped: AtomicBool::new(false),
            published: AtomicU64::new(0),
            delivered: Arc::new(AtomicU64::new(0)),
            failed: Arc::new(AtomicU64::new(0)),
            pending,
            deadlines,
            pending_count,
            reaper,
            reaper_stop,
            started_at: Instant::now(),
            on_stopped: Mutex::new(Vec::new()),
        }
    }

    /// Register `handler` against `pattern` (`/`-separated tokens, `*` and
    /// trailing `#` wildcards; see [`TopicRouter::subscribe`]).
    pub fn subscribe<F>(&self, pattern: &str, handler: F) -> Result<SubscriptionId, BusError>
    where
        F: Fn(&str, Arc<Container>, TraceContext) -> Result<(), BusError> + Send + Sync + 'static,
    {
        let id = self.router.subscribe(pattern)?;
        self.handlers.write().insert(id, Arc::new(handler));
        Ok(id)
    }

    /// Remove a subscription. Returns `false` if `id` was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.handlers.write().remove(&id);
        self.router.unsubscribe(id)
    }

    /// Publish `container` on `topic`. A trace context is extracted from the
    /// container if present (a child span is derived) or minted fresh as a
    /// sampled root; it is injected back into the container and shared,
    /// unmodified, across every matched subscriber's delivery.
    ///
    /// A topic of the form `__reply/<uuid>` bypasses routing entirely and
    /// resolves the matching pending [`Bus::request`] instead — see
    /// [`Bus::reply`] for the direct equivalent.
    pub fn publish(&self, topic: &str, mut container: Container) -> Result<PublishReceipt, BusError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(BusError::Stopped);
        }
        self.published.fetch_add(1, Ordering::Relaxed);

        if let Some(correlation_id) = parse_reply_topic(topic) {
            let delivered = self.complete_request(correlation_id, container);
            return Ok(PublishReceipt {
                message_id: Uuid::new_v4(),
                expected_delivery_count: usize::from(delivered),
            });
        }

        let trace_ctx = match TraceContext::extract(&container) {
            Some(parent) => parent.child(),
            None => TraceContext::root(self.config.trace_sampling_rate),
        };
        trace_ctx.inject(&mut container);
        let container = Arc::new(container);

        let message_id = Uuid::new_v4();
        let sub_ids = self.router.route(topic);
        let expected = sub_ids.len();

        for id in sub_ids {
            let Some(handler) = self.handlers.read().get(&id).cloned() else {
                continue;
            };
            let container = Arc::clone(&container);
            let trace_ctx = trace_ctx.clone();
            let topic_owned = topic.to_string();
            let delivered_counter = Arc::clone(&self.delivered);
            let failed_counter = Arc::clone(&self.failed);
            let logger = Arc::clone(&self.logger);
            let metrics_sink = Arc::clone(&self.metrics_sink);

            let job = Job::new(move || match (handler)(&topic_owned, container, trace_ctx) {
                Ok(()) => {
                    delivered_counter.fetch_add(1, Ordering::Relaxed);
                    metrics_sink.record("bus.delivered", 1.0, &[("topic", &topic_owned)]);
                    JobResult::Success
                }
                Err(e) => {
                    failed_counter.fetch_add(1, Ordering::Relaxed);
                    logger.log(
                        crate::logging::LogLevel::Warn,
                        "subscriber handler failed",
                        &[("topic", &topic_owned), ("reason", &e.to_string())],
                    );
                    metrics_sink.record("bus.handler_error", 1.0, &[("topic", &topic_owned)]);
                    JobResult::Failed { reason: e.to_string() }
                }
            })
            .named(format!("deliver:{topic}"));

            if let Err(e) = self.pool.submit(job) {
                self.failed.fetch_add(1, Ordering::Relaxed);
                self.logger.log(
                    crate::logging::LogLevel::Error,
                    "failed to submit delivery job",
                    &[("topic", topic), ("reason", &e.to_string())],
                );
            }
        }

        Ok(PublishReceipt {
            message_id,
            expected_delivery_count: expected,
        })
    }

    /// Publish `container` on `topic` expecting exactly one reply, either via
    /// [`Bus::reply`] or a publish to `__reply/<correlation id>`. Resolves to
    /// `Err(BusError::NoSubscriber)` immediately if nothing matched `topic`
    /// at publish time, to `Err(BusError::Timeout)` if no reply arrives
    /// within `timeout`, and to `Err(BusError::Cancelled)` if the returned
    /// future is cancelled via [`RequestFuture::cancel`].
    pub fn request(&self, topic: &str, mut container: Container, timeout: Duration) -> RequestFuture {
        if self.stopped.load(Ordering::Acquire) {
            return RequestFuture::immediate(Err(BusError::Stopped));
        }

        let correlation_id = CorrelationId(Uuid::new_v4());
        container.set_value(CORRELATION_ID_KEY, Value::String(correlation_id.to_string()));

        let (tx, rx) = tokio::sync::oneshot::channel();

        match self.publish(topic, container) {
            Ok(receipt) if receipt.expected_delivery_count == 0 => {
                return RequestFuture::immediate(Err(BusError::NoSubscriber));
            }
            Ok(_) => {}
            Err(e) => return RequestFuture::immediate(Err(e)),
        }

        let deadline = Instant::now() + timeout;
        self.pending.lock().insert(correlation_id, PendingEntry { sender: tx, timeout });
        self.deadlines.lock().push(Reverse((deadline, correlation_id)));
        self.pending_count.fetch_add(1, Ordering::Relaxed);

        RequestFuture::pending(correlation_id, rx, Arc::clone(&self.pending), Arc::clone(&self.pending_count))
    }

    /// Like [`Bus::request`], using [`BusConfig::request_default_timeout`].
    pub fn request_with_default_timeout(&self, topic: &str, container: Container) -> RequestFuture {
        self.request(topic, container, self.config.request_default_timeout)
    }

    /// Resolve a pending request directly, bypassing topic routing. Returns
    /// `Err(BusError::TypeError(..))` if no request with `correlation_id` is
    /// outstanding (already replied, timed out, or cancelled).
    pub fn reply(&self, correlation_id: CorrelationId, container: Container) -> Result<(), BusError> {
        if self.complete_request(correlation_id, container) {
            Ok(())
        } else {
            Err(BusError::TypeError(format!("no pending request for correlation id {correlation_id}")))
        }
    }

    fn complete_request(&self, correlation_id: CorrelationId, container: Container) -> bool {
        if let Some(entry) = self.pending.lock().remove(&correlation_id) {
            self.pending_count.fetch_sub(1, Ordering::Relaxed);
            let _ = entry.sender.send(Ok(container));
            true
        } else {
            false
        }
    }

    /// Register a hook run once, synchronously, when [`Bus::stop`] is
    /// called. Hooks run in registration order.
    pub fn on_stopped<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_stopped.lock().push(Box::new(hook));
    }

    pub fn stats(&self) -> BusStats {
        let elapsed = self.started_at.elapsed().as_secs_f64();
        let worker_count = self.pool.worker_count().max(1);
        let worker_utilization = if elapsed > 0.0 {
            (self.total_wall_time_secs() / (elapsed * worker_count as f64)).clamp(0.0, 1.0)
        } else {
            0.0
        };
        BusStats {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            pending_requests: self.pending_count.load(Ordering::Relaxed),
            queue_depth: self.pool.queue_size(),
            worker_utilization,
        }
    }

    fn total_wall_time_secs(&self) -> f64 {
        self.pool.worker_stats().map(|s| s.total_wall_time().as_secs_f64()).sum()
    }

    /// Stop accepting new publishes/requests, cancel the deadline reaper,
    /// reject every still-pending request with `BusError::Cancelled`, stop
    /// the internal pool (`graceful` controls whether already-queued
    /// deliveries finish), and run any [`Bus::on_stopped`] hooks.
    pub fn stop(&mut self, graceful: bool) {
        self.stopped.store(true, Ordering::Release);
        self.reaper_stop.store(true, Ordering::Release);
        if let Some(handle) = self.reaper.take() {
            handle.abort();
        }

        let mut pending = self.pending.lock();
        for (_, entry) in pending.drain() {
            let _ = entry.sender.send(Err(BusError::Cancelled));
        }
        drop(pending);
        self.pending_count.store(0, Ordering::Relaxed);

        self.pool.stop(graceful);

        for hook in self.on_stopped.lock().drain(..) {
            hook();
        }
    }
}

impl Drop for Bus {
    fn drop(&mut self) {
        if !self.stopped.load(Ordering::Acquire) {
            self.stop(true);
        }
    }
}

fn spawn_reaper(pending: PendingMap, deadlines: DeadlineHeap, pending_count: Arc<AtomicUsize>, stop_flag: Arc<AtomicBool>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(20));
        loop {
            ticker.tick().await;
            if stop_flag.load(Ordering::Acquire) {
                break;
            }
            let now = Instant::now();
            loop {
                let expired = {
                    let mut heap = deadlines.lock();
                    match heap.peek() {
                        Some(Reverse((deadline, _))) if *deadline <= now => heap.pop().map(|Reverse((_, id))| id),
                        _ => None,
                    }
                };
                let Some(id) = expired else { break };
                if let Some(entry) = pending.lock().remove(&id) {
                    pending_count.fetch_sub(1, Ordering::Relaxed);
                    let _ = entry.sender.send(Err(BusError::Timeout(entry.timeout)));
                }
            }
        }
    })
}

enum RequestFutureState {
    Immediate(Option<Result<Container, BusError>>),
    Pending {
        correlation_id: CorrelationId,
        rx: tokio::sync::oneshot::Receiver<Result<Container, BusError>>,
        pending: PendingMap,
        pending_count: Arc<AtomicUsize>,
        cancelled: bool,
    },
}

/// The future returned by [`Bus::request`]. In addition to `Future`, it
/// exposes [`RequestFuture::cancel`] so a caller racing it against, say, a
/// shutdown signal can give up on the request without waiting out its
/// timeout.
pub struct RequestFuture {
    state: RequestFutureState,
}

impl RequestFuture {
    fn immediate(result: Result<Container, BusError>) -> Self {
        Self {
            state: RequestFutureState::Immediate(Some(result)),
        }
    }

    fn pending(
        correlation_id: CorrelationId,
        rx: tokio::sync::oneshot::Receiver<Result<Container, BusError>>,
        pending: PendingMap,
        pending_count: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            state: RequestFutureState::Pending {
                correlation_id,
                rx,
                pending,
                pending_count,
                cancelled: false,
            },
        }
    }

    /// The correlation id a still-pending request was assigned. `None` for a
    /// request that resolved immediately (e.g. `NoSubscriber`).
    pub fn correlation_id(&self) -> Option<CorrelationId> {
        match &self.state {
            RequestFutureState::Pending { correlation_id, .. } => Some(*correlation_id),
            RequestFutureState::Immediate(_) => None,
        }
    }

    /// Cancel a still-pending request. Idempotent; a no-op on an already
    /// resolved or already-cancelled future. The next poll (or the only
    /// poll, if called before the first one) resolves to
    /// `Err(BusError::Cancelled)`.
    pub fn cancel(&mut self) {
        if let RequestFutureState::Pending {
            correlation_id,
            pending,
            pending_count,
            cancelled,
            ..
        } = &mut self.state
        {
            if pending.lock().remove(correlation_id).is_some() {
                pending_count.fetch_sub(1, Ordering::Relaxed);
            }
            *cancelled = true;
        }
    }
}

impl Future for RequestFuture {
    type Output = Result<Container, BusError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            RequestFutureState::Immediate(slot) => Poll::Ready(slot.take().expect("RequestFuture polled after completion")),
            RequestFutureState::Pending { rx, cancelled, .. } => {
                if *cancelled {
                    return Poll::Ready(Err(BusError::Cancelled));
                }
                match Pin::new(rx).poll(cx) {
                    Poll::Ready(Ok(result)) => Poll::Ready(result),
                    Poll::Ready(Err(_)) => Poll::Ready(Err(BusError::Cancelled)),
                    Poll::Pending => Poll::Pending,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn test_bus() -> Bus {
        BusBuilder::new(BusConfig::builder().worker_count(4)).build()
    }

    #[tokio::test]
    async fn publish_delivers_to_matching_subscriber() {
        let bus = test_bus();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        bus.subscribe("sensor/*/temp", move |_topic, _container, _trace| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

        let receipt = bus.publish("sensor/room1/temp", Container::new()).unwrap();
        assert_eq!(receipt.expected_delivery_count, 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_reports_zero_expected() {
        let bus = test_bus();
        let receipt = bus.publish("nobody/listening", Container::new()).unwrap();
        assert_eq!(receipt.expected_delivery_count, 0);
    }

    #[tokio::test]
    async fn request_without_subscriber_resolves_no_subscriber() {
        let bus = test_bus();
        let result = bus.request("nobody/listening", Container::new(), Duration::from_millis(50)).await;
        assert_eq!(result, Err(BusError::NoSubscriber));
    }

    #[tokio::test]
    async fn request_times_out_without_a_reply() {
        let bus = test_bus();
        bus.subscribe("echo", |_topic, _container, _trace| Ok(())).unwrap();
        let result = bus.request("echo", Container::new(), Duration::from_millis(50)).await;
        assert_eq!(result, Err(BusError::Timeout(Duration::from_millis(50))));
    }

    #[tokio::test]
    async fn request_resolves_when_handler_replies() {
        let bus = Arc::new(test_bus());
        let bus_for_handler = Arc::clone(&bus);
        bus.subscribe("echo", move |_topic, container, _trace| {
            let correlation_id = container.get_value(CORRELATION_ID_KEY).to_string_value().unwrap();
            let correlation_id = CorrelationId(Uuid::parse_str(&correlation_id).unwrap());
            let mut reply = Container::new();
            reply.add("echoed", Value::Bool(true));
            bus_for_handler.reply(correlation_id, reply)
        })
        .unwrap();

        let mut request = Container::new();
        request.add("ping", Value::Bool(true));
        let result = bus.request("echo", request, Duration::from_secs(1)).await.unwrap();
        assert_eq!(result.get_value("echoed"), Value::Bool(true));
    }

    #[tokio::test]
    async fn cancelled_request_resolves_cancelled() {
        let bus = test_bus();
        bus.subscribe("echo", |_topic, _container, _trace| Ok(())).unwrap();
        let mut fut = bus.request("echo", Container::new(), Duration::from_secs(5));
        fut.cancel();
        assert_eq!(fut.await, Err(BusError::Cancelled));
    }

    #[tokio::test]
    async fn reply_to_unknown_correlation_id_errors() {
        let bus = test_bus();
        let result = bus.reply(CorrelationId(Uuid::new_v4()), Container::new());
        assert!(matches!(result, Err(BusError::TypeError(_))));
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = test_bus();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        let id = bus
            .subscribe("topic", move |_topic, _container, _trace| {
                seen_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        assert!(bus.unsubscribe(id));

        let receipt = bus.publish("topic", Container::new()).unwrap();
        assert_eq!(receipt.expected_delivery_count, 0);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn reply_topic_convention_resolves_pending_request() {
        let bus = test_bus();
        bus.subscribe("ping", |_topic, _container, _trace| Ok(())).unwrap();

        let request_fut = bus.request("ping", Container::new(), Duration::from_secs(1));
        let correlation_id = request_fut.correlation_id().unwrap();

        let mut reply = Container::new();
        reply.add("ok", Value::Bool(true));
        let receipt = bus.publish(&format!("{REPLY_TOPIC_PREFIX}{correlation_id}"), reply).unwrap();
        assert_eq!(receipt.expected_delivery_count, 1);

        let result = request_fut.await.unwrap();
        assert_eq!(result.get_value("ok"), Value::Bool(true));
    }

    #[tokio::test]
    async fn stats_reflect_published_and_delivered_counts() {
        let bus = test_bus();
        bus.subscribe("topic", |_topic, _container, _trace| Ok(())).unwrap();
        bus.publish("topic", Container::new()).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let stats = bus.stats();
        assert_eq!(stats.published, 1);
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test]
    async fn stopped_bus_rejects_new_publishes() {
        let mut bus = test_bus();
        bus.stop(true);
        assert_eq!(bus.publish("topic", Container::new()), Err(BusError::Stopped));
    }
}
