//! Metrics declaration and initialization.

use std::time::Duration;

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
lazy_static! {
    // Request lifecycle metrics

    /// Track number of requests started.
    pub static ref REQUESTS_STARTED: &'static str = {
        metrics::describe_counter!(
            "fetchbox_requests_started_total",
            "Total number of network requests started."
        );
        "fetchbox_requests_started_total"
    };
    /// Track number of requests completed, labelled by outcome.
    pub static ref REQUESTS_COMPLETED: &'static str = {
        metrics::describe_counter!(
            "fetchbox_requests_completed_total",
            "Total number of requests completed, by outcome."
        );
        "fetchbox_requests_completed_total"
    };
    /// Track number of completions dropped because the request had already completed.
    pub static ref COMPLETIONS_DROPPED: &'static str = {
        metrics::describe_counter!(
            "fetchbox_completions_dropped_total",
            "Total number of duplicate or late completions dropped."
        );
        "fetchbox_completions_dropped_total"
    };
    /// Histogram of pipeline processing duration.
    pub static ref PIPELINE_DURATION: &'static str = {
        metrics::describe_histogram!(
            "fetchbox_pipeline_duration_seconds",
            metrics::Unit::Seconds,
            "Duration of response pipeline processing in seconds."
        );
        "fetchbox_pipeline_duration_seconds"
    };

    // Offload manager metrics

    /// Track number of offload tasks spawned.
    pub static ref OFFLOAD_TASKS_SPAWNED: &'static str = {
        metrics::describe_counter!(
            "fetchbox_offload_tasks_spawned_total",
            "Total number of offload tasks spawned."
        );
        "fetchbox_offload_tasks_spawned_total"
    };
    /// Track number of offload tasks finished, however they ended.
    pub static ref OFFLOAD_TASKS_FINISHED: &'static str = {
        metrics::describe_counter!(
            "fetchbox_offload_tasks_finished_total",
            "Total number of offload tasks that finished, were abandoned or panicked."
        );
        "fetchbox_offload_tasks_finished_total"
    };
    /// Track number of offload tasks that timed out.
    pub static ref OFFLOAD_TASKS_TIMEOUT: &'static str = {
        metrics::describe_counter!(
            "fetchbox_offload_tasks_timeout_total",
            "Total number of offload tasks that timed out."
        );
        "fetchbox_offload_tasks_timeout_total"
    };
    /// Track number of offload tasks deduplicated (skipped).
    pub static ref OFFLOAD_TASKS_DEDUPLICATED: &'static str = {
        metrics::describe_counter!(
            "fetchbox_offload_tasks_deduplicated_total",
            "Total number of offload tasks deduplicated (skipped because already in flight)."
        );
        "fetchbox_offload_tasks_deduplicated_total"
    };
    /// Gauge of currently active offload tasks.
    pub static ref OFFLOAD_TASKS_ACTIVE: &'static str = {
        metrics::describe_gauge!(
            "fetchbox_offload_tasks_active",
            "Number of currently active offload tasks."
        );
        "fetchbox_offload_tasks_active"
    };
    /// Histogram of offload task duration.
    pub static ref OFFLOAD_TASK_DURATION: &'static str = {
        metrics::describe_histogram!(
            "fetchbox_offload_task_duration_seconds",
            metrics::Unit::Seconds,
            "Duration of offload tasks in seconds."
        );
        "fetchbox_offload_task_duration_seconds"
    };
}

/// Outcome label for completed requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// New data arrived.
    Success,
    /// The server confirmed the existing data.
    NotModified,
    /// The request failed.
    Failure,
    /// The request was cancelled.
    Cancelled,
}

impl Outcome {
    /// Label value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::NotModified => "not_modified",
            Outcome::Failure => "failure",
            Outcome::Cancelled => "cancelled",
        }
    }
}

/// Record a network request start.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_request_started(method: &str) {
    metrics::counter!(*REQUESTS_STARTED, "method" => method.to_string()).increment(1);
}

/// Record a request completion broadcast.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_request_completed(outcome: Outcome) {
    metrics::counter!(*REQUESTS_COMPLETED, "outcome" => outcome.as_str()).increment(1);
}

/// Record a dropped duplicate or late completion.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_completion_dropped() {
    metrics::counter!(*COMPLETIONS_DROPPED).increment(1);
}

/// Record how long the pipeline took for one response.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_pipeline_duration(duration: Duration) {
    metrics::histogram!(*PIPELINE_DURATION).record(duration.as_secs_f64());
}

/// Record an offloaded task being queued.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_offload_spawned(kind: &str) {
    metrics::counter!(*OFFLOAD_TASKS_SPAWNED, "kind" => kind.to_string()).increment(1);
    metrics::gauge!(*OFFLOAD_TASKS_ACTIVE, "kind" => kind.to_string()).increment(1.0);
}

/// Record an offloaded task leaving the manager.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_offload_finished(kind: &str) {
    metrics::counter!(*OFFLOAD_TASKS_FINISHED, "kind" => kind.to_string()).increment(1);
    metrics::gauge!(*OFFLOAD_TASKS_ACTIVE, "kind" => kind.to_string()).decrement(1.0);
}

/// Record an entity task skipped because one was already in flight.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_offload_deduplicated(kind: &str) {
    metrics::counter!(*OFFLOAD_TASKS_DEDUPLICATED, "kind" => kind.to_string()).increment(1);
}

/// Record an offloaded task cancelled by its timeout policy.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_offload_timeout(kind: &str) {
    metrics::counter!(*OFFLOAD_TASKS_TIMEOUT, "kind" => kind.to_string()).increment(1);
}

/// Record how long an offloaded task ran.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_offload_duration(kind: &str, duration: Duration) {
    metrics::histogram!(*OFFLOAD_TASK_DURATION, "kind" => kind.to_string())
        .record(duration.as_secs_f64());
}

/// No-op version when metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_request_started(_method: &str) {}

/// No-op version when metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_request_completed(_outcome: Outcome) {}

/// No-op version when metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_completion_dropped() {}

/// No-op version when metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_pipeline_duration(_duration: Duration) {}

/// No-op version when metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_offload_spawned(_kind: &str) {}

/// No-op version when metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_offload_finished(_kind: &str) {}

/// No-op version when metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_offload_deduplicated(_kind: &str) {}

/// No-op version when metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_offload_timeout(_kind: &str) {}

/// No-op version when metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_offload_duration(_kind: &str, _duration: Duration) {}
