//! # Unified Error Type
//!
//! This module defines [`BusError`], the single error enum returned from every
//! fallible public entry point in the crate: container (de)serialization, value
//! conversion, queue submission, pool lifecycle, and bus pub/sub/request-response
//! operations all funnel into the same small set of variants from §7 of the
//! design spec.
//!
//! Internal plumbing that has its own fallible steps (JSON encoding, queue
//! bookkeeping) maps its native error type into one of these variants at the
//! point where it would otherwise cross a public API boundary, rather than
//! exposing `serde_json::Error` or similar directly.

use thiserror::Error;

/// The unified error type for container, scheduler, and bus operations.
///
/// Each variant corresponds to one of the error kinds enumerated in the design
/// spec's error-handling table. `HandlerError` is notably never *returned* to a
/// publisher — subscriber failures are isolated by the pool and only surfaced
/// through the `Logger`/`MetricsSink` collaborators — but it is still a variant
/// here because `Worker` needs a uniform type to record against its own error
/// counters and hand to those collaborators.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BusError {
    /// A serialized container blob was malformed.
    #[error("parse error at position {position}: {reason}")]
    ParseError {
        /// Byte offset into the input at which parsing failed.
        position: usize,
        /// Human-readable description of the failure.
        reason: String,
    },

    /// A value conversion was requested that the source type cannot satisfy.
    #[error("type error: {0}")]
    TypeError(String),

    /// The operation targeted a pool or bus that has already been stopped.
    #[error("operation attempted on a stopped pool or bus")]
    Stopped,

    /// A queue rejected an enqueue because it is at capacity and the
    /// configured backpressure policy is `Fail`.
    #[error("queue is at capacity ({depth}/{max})")]
    Overflow {
        /// Current queue depth at the time of rejection.
        depth: usize,
        /// Configured maximum depth.
        max: usize,
    },

    /// A request exceeded its deadline before a reply arrived.
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// A request or job was explicitly cancelled, or cancelled implicitly by
    /// shutdown.
    #[error("operation was cancelled")]
    Cancelled,

    /// A `request` was published but matched zero subscribers.
    #[error("no subscriber matched the requested topic")]
    NoSubscriber,

    /// A subscriber handler panicked or returned an error. Recorded for
    /// metrics/logging purposes; never propagated to a publisher.
    #[error("handler error: {0}")]
    HandlerError(String),

    /// A container or payload exceeded the configured size limit.
    #[error("payload of {actual} bytes exceeds the configured limit of {limit} bytes")]
    SizeLimitExceeded {
        /// Actual encoded size in bytes.
        actual: usize,
        /// Configured maximum in bytes.
        limit: usize,
    },
}

/// Convenience alias used throughout the public API.
pub type BusResult<T> = Result<T, BusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_are_stable() {
        assert_eq!(BusError::Stopped.to_string(), "operation attempted on a stopped pool or bus");
        assert_eq!(
            BusError::NoSubscriber.to_string(),
            "no subscriber matched the requested topic"
        );
        assert_eq!(
            BusError::Overflow { depth: 12, max: 10 }.to_string(),
            "queue is at capacity (12/10)"
        );
    }
}
