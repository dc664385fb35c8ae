//! Test support for fetchbox.
//!
//! - [`StubProvider`] - scripted networking provider with held calls
//! - [`ManualClock`] - clock moved by hand for staleness tests
//! - [`RecordingObserver`] - observer that records resource events
//! - [`tracing`] - log event capture
//! - [`settle`] / [`test_service`] - coordination context helpers
//!
//! The integration tests for `fetchbox` live in this crate's `tests/`.

mod clock;
mod observer;
mod provider;
pub mod tracing;

use std::future::Future;

use fetchbox::{Service, ServiceBuilder};

pub use clock::ManualClock;
pub use observer::RecordingObserver;
pub use provider::{PendingCall, StubProvider, response, status, transport_failure};

/// Base URL of services built by [`test_service`].
pub const BASE_URL: &str = "https://api.test/v1";

/// Service builder wired to `provider` and `clock` under [`BASE_URL`].
pub fn test_service_builder(provider: &StubProvider, clock: &ManualClock) -> ServiceBuilder {
    Service::builder()
        .base_url(BASE_URL)
        .provider(provider.clone())
        .clock(clock.clone())
}

/// Service wired to `provider` and `clock` with default configuration.
pub fn test_service(provider: &StubProvider, clock: &ManualClock) -> Service {
    test_service_builder(provider, clock).build().unwrap()
}

/// Runs `future` as the coordination context.
pub async fn run_local<F: Future>(future: F) -> F::Output {
    fetchbox::context::run_local(future).await
}

/// Lets local and offloaded tasks run until they have nothing left to do
/// right now.
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}
