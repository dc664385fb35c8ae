#![warn(missing_docs)]
//! # fetchbox-core
//!
//! Core types for the fetchbox resource cache.
//!
//! This crate holds everything that does not depend on the coordination
//! context: the data a resource remembers, the way raw transport results
//! become typed outcomes, and the pipeline that transforms them. All types
//! here are `Send + Sync` so they can cross to background tasks freely.
//!
//! ## Overview
//!
//! - [`Entity`] - immutable snapshot of successfully fetched content
//! - [`Response`] / [`ResponseInfo`] - success or [`RequestError`], plus
//!   whether the data is fresh
//! - [`classify`] - turns a [`TransportOutcome`] into a [`ResponseInfo`]
//! - [`pipeline`] - ordered transform and cache stages
//! - [`NetworkingProvider`] - the pluggable HTTP transport contract
//! - [`RequestProgress`] - monotonic progress estimation
//! - [`Clock`] - time source for timestamps and staleness
//!
//! The stateful layer ([`Request`], [`Resource`], [`Service`]) lives in the
//! `fetchbox` crate.
//!
//! [`Request`]: https://docs.rs/fetchbox/latest/fetchbox/request/struct.Request.html
//! [`Resource`]: https://docs.rs/fetchbox/latest/fetchbox/resource/struct.Resource.html
//! [`Service`]: https://docs.rs/fetchbox/latest/fetchbox/service/struct.Service.html

pub mod classify;
pub mod clock;
pub mod entity;
pub mod error;
pub mod headers;
pub mod pipeline;
pub mod progress;
pub mod response;
pub mod transport;

pub use classify::classify;
pub use clock::{Clock, SystemClock};
pub use entity::{Content, ContentType, DEFAULT_CONTENT_TYPE, Entity};
pub use error::{
    ErrorCause, ErrorKind, RequestError, SharedError, TransportError, TransportErrorKind,
    status_message,
};
pub use headers::Headers;
pub use pipeline::{Pipeline, StageKey};
pub use progress::RequestProgress;
pub use response::{Response, ResponseInfo};
pub use transport::{
    NetworkingProvider, RequestDescriptor, RequestNetworking, TransferCounters, TransferMetrics,
    TransportCompletion, TransportOutcome,
};
#[doc(hidden)]
pub use smol_str::SmolStr;
