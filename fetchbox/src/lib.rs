#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

/// Per-resource configuration.
///
/// Provides [`Configuration`](config::Configuration), the
/// [`ConfigResolver`](config::ConfigResolver) trait and the default
/// pattern-based resolver, [`PatternConfig`](config::PatternConfig).
pub mod config;

/// The coordination context all resource and request state lives on.
pub mod context;

/// Error types for service construction and configuration.
pub mod error;

/// Metrics collection for request observability.
///
/// When the `metrics` feature is enabled, this module provides counters
/// and histograms for:
/// - Requests started and completed, by outcome
/// - Dropped duplicate or late completions
/// - Pipeline duration and offloaded task counts
pub mod metrics;

/// Running pipeline and cache work off the coordination context.
///
/// Pipeline stages and entity caches may be slow, so they run as tokio
/// tasks managed by the [`OffloadManager`](offload::OffloadManager), whose
/// results are awaited back on the coordination context.
pub mod offload;

/// Freshness policy: when loaded data or errors go stale.
pub mod policy;

pub mod request;
pub mod resource;
pub mod service;

pub use config::{ConfigResolver, Configuration, PatternConfig, RequestDecorator, UrlMatcher, UrlPattern};
pub use error::{ConfigError, ServiceError};
pub use policy::FreshnessPolicy;
pub use request::{ChainAction, Request, RequestPhase};
pub use resource::{DataSource, ObserverId, Resource, ResourceEvent, ResourceObserver};
pub use service::{Service, ServiceBuilder};

pub use fetchbox_core::{
    Clock, Content, ContentType, DEFAULT_CONTENT_TYPE, Entity, ErrorCause, ErrorKind, Headers,
    NetworkingProvider, Pipeline, RequestDescriptor, RequestError, RequestNetworking, Response,
    ResponseInfo, StageKey, SystemClock, TransferCounters, TransferMetrics, TransportCompletion,
    TransportError, TransportErrorKind, TransportOutcome,
};

/// Response pipeline building blocks.
///
/// Re-exports from [`fetchbox-core`](fetchbox_core::pipeline): stages,
/// transformers and entity caches.
pub mod pipeline {
    pub use fetchbox_core::pipeline::*;
}

/// The `fetchbox` prelude.
///
/// ```rust
/// use fetchbox::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        ChainAction, Entity, Request, RequestError, Resource, ResourceEvent, ResponseInfo,
        Service,
    };
}
