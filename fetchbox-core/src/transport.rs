//! Networking provider contracts.
//!
//! fetchbox does not speak HTTP itself. A [`NetworkingProvider`] receives a
//! [`RequestDescriptor`], performs it however it likes (on any thread) and
//! reports back exactly once through the [`TransportCompletion`] it was
//! handed. The returned [`RequestNetworking`] handle lets the caller cancel
//! the call and sample transfer progress.
//!
//! Providers are expected to deliver one outcome per started call. The core
//! does not trust that: duplicate deliveries are dropped, and a provider that
//! drops every completion handle without delivering fails the request.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use http::Method;
use serde::Serialize;
use url::Url;

use crate::error::TransportError;
use crate::headers::Headers;

/// Everything a provider needs to perform one HTTP call.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    /// HTTP method.
    pub method: Method,
    /// Absolute URL.
    pub url: Url,
    /// Request headers.
    pub headers: Headers,
    /// Request body, if any.
    pub body: Option<Bytes>,
}

impl RequestDescriptor {
    /// Creates a descriptor with no headers or body.
    pub fn new(method: Method, url: Url) -> Self {
        RequestDescriptor {
            method,
            url,
            headers: Headers::new(),
            body: None,
        }
    }

    /// Sets a header, replacing any previous value.
    pub fn header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the body and its `Content-Type`.
    pub fn body(&mut self, body: impl Into<Bytes>, content_type: &str) -> &mut Self {
        self.body = Some(body.into());
        self.headers.insert("Content-Type", content_type);
        self
    }

    /// Sets a UTF-8 text body.
    pub fn text_body(&mut self, text: impl Into<String>) -> &mut Self {
        self.body(text.into(), "text/plain; charset=utf-8")
    }

    /// Serializes `value` as the JSON body.
    pub fn json_body<T: Serialize + ?Sized>(
        &mut self,
        value: &T,
    ) -> Result<&mut Self, serde_json::Error> {
        let body = serde_json::to_vec(value)?;
        Ok(self.body(body, "application/json"))
    }

    /// Sets an `application/x-www-form-urlencoded` body.
    pub fn form_body<'a, I>(&mut self, params: I) -> &mut Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params)
            .finish();
        self.body(encoded, "application/x-www-form-urlencoded")
    }
}

/// Raw result of one transport call.
#[derive(Debug, Clone, Default)]
pub struct TransportOutcome {
    /// HTTP status, if a response arrived.
    pub status: Option<u16>,
    /// Response headers.
    pub headers: Headers,
    /// Response body.
    pub body: Option<Bytes>,
    /// Networking failure, if any.
    pub error: Option<TransportError>,
}

impl TransportOutcome {
    /// An HTTP response.
    pub fn response(status: u16, headers: Headers, body: impl Into<Bytes>) -> Self {
        TransportOutcome {
            status: Some(status),
            headers,
            body: Some(body.into()),
            error: None,
        }
    }

    /// A networking failure with no response.
    pub fn failure(error: TransportError) -> Self {
        TransportOutcome {
            error: Some(error),
            ..TransportOutcome::default()
        }
    }
}

/// Handle a provider uses to report the outcome of a call.
///
/// Cheap to clone and safe to move to any thread; delivery hops back onto
/// the coordination context that owns the request.
#[derive(Clone)]
pub struct TransportCompletion {
    deliver: Arc<dyn Fn(TransportOutcome) + Send + Sync>,
}

impl TransportCompletion {
    /// Wraps a delivery function.
    pub fn new<F>(deliver: F) -> Self
    where
        F: Fn(TransportOutcome) + Send + Sync + 'static,
    {
        TransportCompletion {
            deliver: Arc::new(deliver),
        }
    }

    /// Reports the outcome of the call.
    pub fn complete(&self, outcome: TransportOutcome) {
        (self.deliver)(outcome)
    }
}

impl fmt::Debug for TransportCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TransportCompletion")
    }
}

/// Bytes transferred so far by one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferMetrics {
    /// Request body bytes sent.
    pub request_bytes_sent: u64,
    /// Total request body size, if known.
    pub request_bytes_total: Option<u64>,
    /// Response body bytes received.
    pub response_bytes_received: u64,
    /// Expected response body size, if known.
    pub response_bytes_total: Option<u64>,
}

const UNKNOWN: u64 = u64::MAX;

/// Lock-free transfer counters a provider can update from its own task.
#[derive(Debug)]
pub struct TransferCounters {
    request_bytes_sent: AtomicU64,
    request_bytes_total: AtomicU64,
    response_bytes_received: AtomicU64,
    response_bytes_total: AtomicU64,
}

impl Default for TransferCounters {
    fn default() -> Self {
        TransferCounters {
            request_bytes_sent: AtomicU64::new(0),
            request_bytes_total: AtomicU64::new(UNKNOWN),
            response_bytes_received: AtomicU64::new(0),
            response_bytes_total: AtomicU64::new(UNKNOWN),
        }
    }
}

impl TransferCounters {
    /// Records the full request body as sent.
    pub fn request_sent(&self, bytes: u64) {
        self.request_bytes_total.store(bytes, Ordering::Relaxed);
        self.request_bytes_sent.store(bytes, Ordering::Relaxed);
    }

    /// Records the expected response size.
    pub fn expect_response(&self, total: Option<u64>) {
        self.response_bytes_total
            .store(total.unwrap_or(UNKNOWN), Ordering::Relaxed);
    }

    /// Adds received response bytes.
    pub fn received(&self, bytes: u64) {
        self.response_bytes_received
            .fetch_add(bytes, Ordering::Relaxed);
    }

    /// Current counter values.
    pub fn snapshot(&self) -> TransferMetrics {
        let known = |value: u64| (value != UNKNOWN).then_some(value);
        TransferMetrics {
            request_bytes_sent: self.request_bytes_sent.load(Ordering::Relaxed),
            request_bytes_total: known(self.request_bytes_total.load(Ordering::Relaxed)),
            response_bytes_received: self.response_bytes_received.load(Ordering::Relaxed),
            response_bytes_total: known(self.response_bytes_total.load(Ordering::Relaxed)),
        }
    }
}

/// Control handle for one in-flight transport call.
pub trait RequestNetworking: Send + Sync {
    /// Asks the transport to abort. Best-effort: a response may still arrive.
    fn cancel(&self);

    /// Bytes transferred so far.
    fn transfer_metrics(&self) -> TransferMetrics {
        TransferMetrics::default()
    }
}

/// Pluggable HTTP transport.
///
/// # Example
///
/// ```
/// use fetchbox_core::{
///     Headers, NetworkingProvider, RequestDescriptor, RequestNetworking,
///     TransportCompletion, TransportOutcome,
/// };
///
/// struct Echo;
/// struct Done;
///
/// impl RequestNetworking for Done {
///     fn cancel(&self) {}
/// }
///
/// impl NetworkingProvider for Echo {
///     fn start_request(
///         &self,
///         request: RequestDescriptor,
///         completion: TransportCompletion,
///     ) -> Box<dyn RequestNetworking> {
///         let body = request.url.to_string();
///         completion.complete(TransportOutcome::response(200, Headers::new(), body));
///         Box::new(Done)
///     }
/// }
/// ```
pub trait NetworkingProvider: Send + Sync {
    /// Starts the call described by `request` and reports through `completion`.
    fn start_request(
        &self,
        request: RequestDescriptor,
        completion: TransportCompletion,
    ) -> Box<dyn RequestNetworking>;
}

impl<P> NetworkingProvider for Arc<P>
where
    P: NetworkingProvider + ?Sized,
{
    fn start_request(
        &self,
        request: RequestDescriptor,
        completion: TransportCompletion,
    ) -> Box<dyn RequestNetworking> {
        self.as_ref().start_request(request, completion)
    }
}
