//! Request progress estimation.
//!
//! Transports rarely know everything about a transfer up front, so
//! [`RequestProgress`] blends three phases into one number in `[0, 1]`:
//!
//! - **upload** - request body bytes sent, when the request has a body;
//! - **latency** - time spent waiting for the first response byte, estimated
//!   from elapsed time since it has no natural end;
//! - **download** - response bytes received, measured against the expected
//!   size when known and estimated otherwise.
//!
//! The reported value never decreases, and [`RequestProgress::complete`]
//! pins it to exactly `1.0` no matter what the transport last reported.

use std::time::Duration;

use crate::transport::TransferMetrics;

const UPLOAD_WEIGHT: f64 = 0.3;
const LATENCY_WEIGHT: f64 = 0.1;
const LATENCY_SCALE_SECS: f64 = 2.5;
const UNKNOWN_SIZE_SCALE_BYTES: f64 = 64.0 * 1024.0;

/// Monotonic progress tracker for one request.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RequestProgress {
    value: f64,
    completed: bool,
}

impl RequestProgress {
    /// New tracker at `0.0`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current progress in `[0, 1]`.
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Returns `true` once [`complete`](Self::complete) was called.
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Folds in a new transfer sample and returns the updated value.
    ///
    /// Samples taken after completion are ignored.
    pub fn update(&mut self, metrics: TransferMetrics, elapsed: Duration) -> f64 {
        if !self.completed {
            self.value = self.value.max(estimate(metrics, elapsed)).clamp(0.0, 1.0);
        }
        self.value
    }

    /// Marks the request finished; progress becomes exactly `1.0`.
    pub fn complete(&mut self) {
        self.completed = true;
        self.value = 1.0;
    }
}

fn estimate(metrics: TransferMetrics, elapsed: Duration) -> f64 {
    let has_body = metrics.request_bytes_total.is_some_and(|total| total > 0);
    let upload_weight = if has_body { UPLOAD_WEIGHT } else { 0.0 };
    let download_weight = 1.0 - upload_weight - LATENCY_WEIGHT;

    let upload = match metrics.request_bytes_total {
        Some(total) if total > 0 => fraction(metrics.request_bytes_sent, total),
        _ => 1.0,
    };

    let response_started =
        metrics.response_bytes_received > 0 || metrics.response_bytes_total.is_some();
    let latency = if response_started {
        1.0
    } else if upload < 1.0 {
        0.0
    } else {
        1.0 - (-elapsed.as_secs_f64() / LATENCY_SCALE_SECS).exp()
    };

    let download = match metrics.response_bytes_total {
        Some(0) => 1.0,
        Some(total) => fraction(metrics.response_bytes_received, total),
        None => {
            let received = metrics.response_bytes_received as f64;
            received / (received + UNKNOWN_SIZE_SCALE_BYTES)
        }
    };

    upload_weight * upload + LATENCY_WEIGHT * latency + download_weight * download
}

fn fraction(done: u64, total: u64) -> f64 {
    (done as f64 / total as f64).min(1.0)
}
