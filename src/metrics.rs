//! # Metrics Sink Collaborator
//!
//! `MetricsSink` is the design spec's second optional collaborator hook:
//! embedders can register one at `Bus` construction to receive named,
//! labeled gauge/counter observations (published/delivered/failed counts,
//! queue depth, request latency) without the crate depending on any
//! particular metrics backend. The crate never aggregates or exports these
//! itself — `Bus::stats()` (see [`crate::bus`]) is the separate, synchronous
//! snapshot API for querying current counters directly.

/// A single metric observation: `name` identifies the series, `value` is the
/// observation (a count, a gauge level, a duration in seconds), and `labels`
/// carries dimensional tags (e.g. `[("topic", "sensor/room1/temp")]`).
pub trait MetricsSink: Send + Sync {
    fn record(&self, name: &str, value: f64, labels: &[(&str, &str)]);
}

/// The default `MetricsSink` used when none is registered: drops every call.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn record(&self, _name: &str, _value: f64, _labels: &[(&str, &str)]) {}
}

/// A `MetricsSink` that re-emits every observation as a `tracing` event,
/// useful for embedders who already scrape structured log output rather
/// than running a dedicated metrics backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn record(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        let joined = labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(" ");
        tracing::info!(metric = name, value, labels = %joined, "metric recorded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_sink_accepts_any_call_without_panicking() {
        let sink = NoopMetricsSink;
        sink.record("bus.published", 1.0, &[("topic", "sensor/room1/temp")]);
    }
}
