//! Metrics recorder capability.
//!
//! Components take an injected recorder instead of touching process-global
//! metrics state, so tests can substitute their own.

use std::time::Duration;

/// Sink for operational counters and timings.
pub trait MetricsRecorder: Send + Sync {
    /// Bump a named counter by one.
    fn increment_counter(&self, name: &str);

    /// Record how long a named operation took.
    fn observe_duration(&self, name: &str, duration: Duration);
}

/// Recorder that discards everything.
#[allow(dead_code)] // Used by tests and available as a wiring default
pub struct NoopMetricsRecorder;

impl MetricsRecorder for NoopMetricsRecorder {
    fn increment_counter(&self, _name: &str) {}

    fn observe_duration(&self, _name: &str, _duration: Duration) {}
}

/// Recorder that emits metrics as structured log records.
pub struct LogMetricsRecorder;

impl MetricsRecorder for LogMetricsRecorder {
    fn increment_counter(&self, name: &str) {
        tracing::debug!(metric = name, "counter += 1");
    }

    fn observe_duration(&self, name: &str, duration: Duration) {
        tracing::debug!(metric = name, duration_ms = duration.as_millis() as u64, "timing");
    }
}
