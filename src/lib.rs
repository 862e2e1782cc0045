//! # Messaging Core
//!
//! A typed value container with a deterministic wire format, a lock-free
//! job/worker scheduler family, and a topic-routed pub/sub message bus with
//! request/response and trace propagation built on top of it.
//!
//! The dependency order mirrors the module list below: `value` and
//! `container` have no internal dependencies; `job`/`queue`/`worker`/`pool`
//! build the scheduler independently of the container format; `router` and
//! `trace` are pure data structures consumed by `bus`, which ties everything
//! together behind a single facade.

pub mod bus;
pub mod container;
pub mod error;
pub mod job;
pub mod logging;
pub mod metrics;
pub mod pool;
pub mod queue;
pub mod router;
pub mod sync_container;
pub mod trace;
pub mod value;
pub mod worker;

pub use bus::{Bus, BusBuilder, BusConfig, BusStats, CorrelationId, Handler, PublishReceipt, RequestFuture};
pub use container::{Container, Header};
pub use error::{BusError, BusResult};
pub use job::{Job, JobResult, JobType};
pub use logging::{LogLevel, Logger, NoopLogger, TracingLogger};
pub use metrics::{MetricsSink, NoopMetricsSink, TracingMetricsSink};
pub use pool::{BackpressurePolicy, Pool, QueueKind, TypedPool};
pub use queue::typed_queue::PriorityMode;
pub use router::{SubscriptionId, TopicRouter};
pub use sync_container::ThreadSafeContainer;
pub use trace::TraceContext;
pub use value::Value;

/// The current version of the crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
