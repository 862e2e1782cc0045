//! # Trace Context
//!
//! `TraceContext` is a W3C-trace-context-shaped identifier triple
//! (`trace_id`/`span_id`/`parent_span_id`) carried alongside every delivered
//! message so handlers can correlate work across subscribers and, eventually,
//! across process boundaries via the out-of-scope transport. Construction is
//! the only place randomness enters: once created, a context is an immutable
//! value threaded through `publish`/`request`/handler invocation by clone.

use rand::RngCore;
use std::collections::HashMap;

/// A 128-bit trace identifier, matching the width of a W3C `traceparent`
/// trace-id field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceId(pub u128);

impl TraceId {
    fn random() -> Self {
        let mut rng = rand::thread_rng();
        let hi = rng.next_u64() as u128;
        let lo = rng.next_u64() as u128;
        TraceId((hi << 64) | lo)
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// A 64-bit span identifier, unique (with overwhelming probability) per span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanId(pub u64);

impl SpanId {
    fn random() -> Self {
        SpanId(rand::thread_rng().next_u64())
    }
}

impl std::fmt::Display for SpanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Identifiers and sampling state propagated with a message, plus an
/// open-ended string baggage map for application-defined correlation data.
///
/// A root context (no parent) is created with [`TraceContext::root`]; every
/// subsequent hop derives a child via [`TraceContext::child`], which keeps
/// `trace_id` and `sampled` fixed while minting a fresh `span_id` and
/// recording the prior span as `parent_span_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceContext {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub parent_span_id: Option<SpanId>,
    pub sampled: bool,
    pub baggage: HashMap<String, String>,
}

/// Reserved container value names used to inject/extract a [`TraceContext`].
/// Chosen with a `__` prefix so they never collide with ordinary application
/// value names within the same container.
pub const TRACE_ID_KEY: &str = "__trace_id";
pub const SPAN_ID_KEY: &str = "__span_id";
pub const PARENT_SPAN_ID_KEY: &str = "__parent_span_id";
pub const SAMPLED_KEY: &str = "__sampled";
pub const BAGGAGE_PREFIX: &str = "__baggage_";

impl TraceContext {
    /// A new root context: random trace id, random span id, no parent.
    /// `sampling_rate` is the probability (`[0, 1]`) that the root is
    /// sampled; unsampled contexts still propagate (so descendants agree on
    /// the decision) but may be treated as lower priority by a backend.
    pub fn root(sampling_rate: f64) -> Self {
        let sampled = sampling_rate >= 1.0 || rand::thread_rng().next_u64() as f64 / u64::MAX as f64 < sampling_rate;
        Self {
            trace_id: TraceId::random(),
            span_id: SpanId::random(),
            parent_span_id: None,
            sampled,
            baggage: HashMap::new(),
        }
    }

    /// Derive a child span: same trace id and sampling decision, fresh span
    /// id, parent set to this context's span id. Baggage is inherited.
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id,
            span_id: SpanId::random(),
            parent_span_id: Some(self.span_id),
            sampled: self.sampled,
            baggage: self.baggage.clone(),
        }
    }

    pub fn with_baggage(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.baggage.insert(key.into(), value.into());
        self
    }

    /// Write this context's fields into `container` under the reserved
    /// names, so it survives the container's own serialize/deserialize
    /// round trip and travels with the message across the (out-of-scope)
    /// wire transport.
    pub fn inject(&self, container: &mut crate::container::Container) {
        use crate::value::Value;
        container.set_value(TRACE_ID_KEY, Value::String(self.trace_id.to_string()));
        container.set_value(SPAN_ID_KEY, Value::String(self.span_id.to_string()));
        if let Some(parent) = self.parent_span_id {
            container.set_value(PARENT_SPAN_ID_KEY, Value::String(parent.to_string()));
        }
        container.set_value(SAMPLED_KEY, Value::Bool(self.sampled));
        for (k, v) in &self.baggage {
            container.set_value(format!("{BAGGAGE_PREFIX}{k}"), Value::String(v.clone()));
        }
    }

    /// Recover a context previously written by [`TraceContext::inject`].
    /// Returns `None` if the container carries no `__trace_id`/`__span_id`
    /// pair (i.e. it was never part of a traced flow).
    pub fn extract(container: &crate::container::Container) -> Option<Self> {
        let trace_id = container.get_value(TRACE_ID_KEY);
        let span_id = container.get_value(SPAN_ID_KEY);
        if trace_id.is_null() || span_id.is_null() {
            return None;
        }
        let trace_id = TraceId(u128::from_str_radix(&trace_id.to_string_value().ok()?, 16).ok()?);
        let span_id = SpanId(u64::from_str_radix(&span_id.to_string_value().ok()?, 16).ok()?);
        let parent_span_id = {
            let v = container.get_value(PARENT_SPAN_ID_KEY);
            if v.is_null() {
                None
            } else {
                u64::from_str_radix(&v.to_string_value().ok()?, 16).ok().map(SpanId)
            }
        };
        let sampled = container.get_value(SAMPLED_KEY).to_bool().unwrap_or(true);
        let mut baggage = HashMap::new();
        for (name, value) in container.iter() {
            if let Some(key) = name.strip_prefix(BAGGAGE_PREFIX) {
                if let Ok(s) = value.to_string_value() {
                    baggage.insert(key.to_string(), s);
                }
            }
        }
        Some(Self {
            trace_id,
            span_id,
            parent_span_id,
            sampled,
            baggage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Container;

    #[test]
    fn child_shares_trace_id_with_new_span_id() {
        let root = TraceContext::root(1.0);
        let child = root.child();
        assert_eq!(child.trace_id, root.trace_id);
        assert_ne!(child.span_id, root.span_id);
        assert_eq!(child.parent_span_id, Some(root.span_id));
    }

    #[test]
    fn sampling_rate_zero_never_samples() {
        let ctx = TraceContext::root(0.0);
        assert!(!ctx.sampled);
    }

    #[test]
    fn sampling_rate_one_always_samples() {
        let ctx = TraceContext::root(1.0);
        assert!(ctx.sampled);
    }

    #[test]
    fn inject_then_extract_round_trips() {
        let ctx = TraceContext::root(1.0).with_baggage("user", "alice");
        let mut container = Container::new();
        ctx.inject(&mut container);

        let extracted = TraceContext::extract(&container).unwrap();
        assert_eq!(extracted.trace_id, ctx.trace_id);
        assert_eq!(extracted.span_id, ctx.span_id);
        assert_eq!(extracted.sampled, ctx.sampled);
        assert_eq!(extracted.baggage.get("user"), Some(&"alice".to_string()));
    }

    #[test]
    fn extract_returns_none_without_trace_fields() {
        let container = Container::new();
        assert!(TraceContext::extract(&container).is_none());
    }

    #[test]
    fn span_ids_are_distinct_across_many_samples() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..10_000 {
            let ctx = TraceContext::root(1.0);
            assert!(seen.insert(ctx.span_id));
        }
    }
}
