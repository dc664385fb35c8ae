//! Networking provider backed by reqwest-middleware.

use std::sync::Arc;

use bytes::BytesMut;
use fetchbox_core::{
    Headers, NetworkingProvider, RequestDescriptor, RequestNetworking, TransferCounters,
    TransferMetrics, TransportCompletion, TransportError, TransportErrorKind, TransportOutcome,
};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::{Instrument, debug, debug_span};

/// [`NetworkingProvider`] that runs each call as a tokio task.
///
/// The client may carry any reqwest middleware (retries, tracing, auth).
/// The full response body is read before completion; transfer progress is
/// reported while it streams in.
///
/// # Example
///
/// ```no_run
/// use fetchbox_reqwest::ReqwestProvider;
///
/// let service = fetchbox::Service::builder()
///     .base_url("https://api.example.com")
///     .provider(ReqwestProvider::new(reqwest::Client::new()))
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ReqwestProvider {
    client: ClientWithMiddleware,
    runtime: Option<Handle>,
}

impl ReqwestProvider {
    /// Provider using a plain reqwest client.
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_middleware(ClientBuilder::new(client).build())
    }

    /// Provider using a client with middleware.
    pub fn with_middleware(client: ClientWithMiddleware) -> Self {
        ReqwestProvider {
            client,
            runtime: None,
        }
    }

    /// Runs calls on `runtime` instead of the runtime current when the
    /// request starts.
    pub fn on_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }
}

impl Default for ReqwestProvider {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

impl NetworkingProvider for ReqwestProvider {
    fn start_request(
        &self,
        request: RequestDescriptor,
        completion: TransportCompletion,
    ) -> Box<dyn RequestNetworking> {
        let counters = Arc::new(TransferCounters::default());
        let span = debug_span!("reqwest_call", method = %request.method, url = %request.url);
        let call = execute(self.client.clone(), request, counters.clone());
        let task = async move { completion.complete(call.await) }.instrument(span);

        let handle = match &self.runtime {
            Some(runtime) => runtime.spawn(task),
            None => tokio::spawn(task),
        };
        Box::new(ReqwestCall {
            task: handle.abort_handle(),
            counters,
        })
    }
}

struct ReqwestCall {
    task: AbortHandle,
    counters: Arc<TransferCounters>,
}

impl RequestNetworking for ReqwestCall {
    fn cancel(&self) {
        debug!("Aborting reqwest call");
        self.task.abort();
    }

    fn transfer_metrics(&self) -> TransferMetrics {
        self.counters.snapshot()
    }
}

async fn execute(
    client: ClientWithMiddleware,
    request: RequestDescriptor,
    counters: Arc<TransferCounters>,
) -> TransportOutcome {
    let mut builder = client.request(request.method, request.url);
    for (name, value) in request.headers.iter() {
        builder = builder.header(name, value);
    }
    if let Some(body) = request.body {
        counters.request_sent(body.len() as u64);
        builder = builder.body(body);
    }

    let mut response = match builder.send().await {
        Ok(response) => response,
        Err(error) => return TransportOutcome::failure(transport_error(error)),
    };

    let status = response.status().as_u16();
    let headers = Headers::from(response.headers());
    counters.expect_response(response.content_length());

    let mut body = BytesMut::new();
    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                counters.received(chunk.len() as u64);
                body.extend_from_slice(&chunk);
            }
            Ok(None) => break,
            Err(error) => {
                return TransportOutcome {
                    status: Some(status),
                    headers,
                    body: None,
                    error: Some(TransportError::from_error(TransportErrorKind::Body, error)),
                };
            }
        }
    }
    TransportOutcome::response(status, headers, body.freeze())
}

fn transport_error(error: reqwest_middleware::Error) -> TransportError {
    match error {
        reqwest_middleware::Error::Reqwest(error) => {
            let kind = if error.is_timeout() {
                TransportErrorKind::Timeout
            } else if error.is_connect() {
                TransportErrorKind::Connect
            } else if error.is_body() || error.is_decode() {
                TransportErrorKind::Body
            } else {
                TransportErrorKind::Other
            };
            TransportError::from_error(kind, error)
        }
        reqwest_middleware::Error::Middleware(error) => {
            TransportError::new(TransportErrorKind::Other, format!("{error:#}"))
        }
    }
}
