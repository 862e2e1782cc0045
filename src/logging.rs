//! # Logger Collaborator
//!
//! `Logger` is the optional, embedder-facing hook from the design spec's
//! collaborator interfaces: `bus` routes every handler-failure/lifecycle
//! event it would otherwise log through this trait instead of a global
//! `tracing` subscriber, so a caller can wire it straight to `tracing` (via
//! [`TracingLogger`]) or to its own sink, without this crate assuming either
//! one is in scope.

use std::fmt;

/// Severity of a [`Logger::log`] call, ordered low to high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// An explicit, non-global logging sink a `Bus` may be constructed with.
/// Implementations must not block for long — `log` is called inline from
/// worker threads handling message delivery.
pub trait Logger: Send + Sync {
    fn log(&self, level: LogLevel, message: &str, fields: &[(&str, &str)]);
}

/// The default `Logger` used when none is registered: drops every call.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn log(&self, _level: LogLevel, _message: &str, _fields: &[(&str, &str)]) {}
}

/// A `Logger` that re-emits every call as a `tracing` event at the matching
/// level, for embedders who want the collaborator seam wired straight back
/// into the crate's own instrumentation rather than a separate sink.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, level: LogLevel, message: &str, fields: &[(&str, &str)]) {
        let joined = fields
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(" ");
        match level {
            LogLevel::Trace => tracing::trace!(fields = %joined, "{message}"),
            LogLevel::Debug => tracing::debug!(fields = %joined, "{message}"),
            LogLevel::Info => tracing::info!(fields = %joined, "{message}"),
            LogLevel::Warn => tracing::warn!(fields = %joined, "{message}"),
            LogLevel::Error => tracing::error!(fields = %joined, "{message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_logger_accepts_any_call_without_panicking() {
        let logger = NoopLogger;
        logger.log(LogLevel::Error, "boom", &[("worker_id", "3")]);
    }

    #[test]
    fn level_ordering_matches_severity() {
        assert!(LogLevel::Error > LogLevel::Warn);
        assert!(LogLevel::Warn > LogLevel::Info);
        assert!(LogLevel::Info > LogLevel::Debug);
        assert!(LogLevel::Debug > LogLevel::Trace);
    }
}
