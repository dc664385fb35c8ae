//! Scriptable networking provider.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use fetchbox_core::{
    Headers, NetworkingProvider, RequestDescriptor, RequestNetworking, TransferCounters,
    TransferMetrics, TransportCompletion, TransportError, TransportErrorKind, TransportOutcome,
};
use http::Method;

/// Builds a successful outcome with a `Content-Type` header.
pub fn response(status: u16, content_type: &str, body: impl Into<Bytes>) -> TransportOutcome {
    let mut headers = Headers::new();
    headers.insert("Content-Type", content_type);
    TransportOutcome::response(status, headers, body)
}

/// Builds an outcome with just a status and an empty body.
pub fn status(status: u16) -> TransportOutcome {
    TransportOutcome::response(status, Headers::new(), Bytes::new())
}

/// Builds a transport failure.
pub fn transport_failure(message: &str) -> TransportOutcome {
    TransportOutcome::failure(TransportError::new(TransportErrorKind::Connect, message))
}

struct Route {
    method: Method,
    path: String,
    once: VecDeque<TransportOutcome>,
    always: Option<TransportOutcome>,
}

#[derive(Default)]
struct StubState {
    routes: Vec<Route>,
    requests: Vec<RequestDescriptor>,
    pending: Vec<PendingCall>,
}

impl StubState {
    fn route(&mut self, method: Method, path: &str) -> &mut Route {
        let index = match self
            .routes
            .iter()
            .position(|route| route.method == method && route.path == path)
        {
            Some(index) => index,
            None => {
                self.routes.push(Route {
                    method,
                    path: path.to_owned(),
                    once: VecDeque::new(),
                    always: None,
                });
                self.routes.len() - 1
            }
        };
        &mut self.routes[index]
    }

    fn next_outcome(&mut self, request: &RequestDescriptor) -> Option<TransportOutcome> {
        let route = self
            .routes
            .iter_mut()
            .find(|route| route.method == request.method && route.path == request.url.path())?;
        route.once.pop_front().or_else(|| route.always.clone())
    }
}

/// A call the provider is holding until the test completes it.
#[derive(Clone)]
pub struct PendingCall {
    request: RequestDescriptor,
    completion: TransportCompletion,
    cancelled: Arc<AtomicBool>,
    counters: Arc<TransferCounters>,
}

impl PendingCall {
    /// What was requested.
    pub fn request(&self) -> &RequestDescriptor {
        &self.request
    }

    /// Delivers `outcome`. May be called more than once to mimic a
    /// misbehaving transport.
    pub fn respond(&self, outcome: TransportOutcome) {
        self.completion.complete(outcome);
    }

    /// Returns `true` once the request asked the transport to abort.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Transfer counters reported as progress.
    pub fn counters(&self) -> &TransferCounters {
        &self.counters
    }
}

struct StubNetworking {
    cancelled: Arc<AtomicBool>,
    counters: Arc<TransferCounters>,
}

impl RequestNetworking for StubNetworking {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn transfer_metrics(&self) -> TransferMetrics {
        self.counters.snapshot()
    }
}

/// [`NetworkingProvider`] answering from scripted routes.
///
/// Requests matching a route (method and URL path) complete immediately
/// with its outcome; everything else is held as a [`PendingCall`] the test
/// completes by hand.
#[derive(Clone, Default)]
pub struct StubProvider {
    state: Arc<Mutex<StubState>>,
}

impl StubProvider {
    /// Creates a provider with no routes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers every matching request with `outcome`.
    pub fn respond(&self, method: Method, path: &str, outcome: TransportOutcome) -> &Self {
        self.state.lock().unwrap().route(method, path).always = Some(outcome);
        self
    }

    /// Answers the next matching request with `outcome`, ahead of any
    /// [`respond`](Self::respond) route.
    pub fn respond_once(&self, method: Method, path: &str, outcome: TransportOutcome) -> &Self {
        self.state
            .lock()
            .unwrap()
            .route(method, path)
            .once
            .push_back(outcome);
        self
    }

    /// Every request started so far, in order.
    pub fn requests(&self) -> Vec<RequestDescriptor> {
        self.state.lock().unwrap().requests.clone()
    }

    /// Number of requests started so far.
    pub fn request_count(&self) -> usize {
        self.state.lock().unwrap().requests.len()
    }

    /// Calls still held by the provider, oldest first.
    pub fn pending(&self) -> Vec<PendingCall> {
        self.state.lock().unwrap().pending.clone()
    }

    /// The most recent held call.
    pub fn last_pending(&self) -> Option<PendingCall> {
        self.state.lock().unwrap().pending.last().cloned()
    }

    /// Forgets every held call without answering it.
    pub fn drop_pending(&self) {
        self.state.lock().unwrap().pending.clear();
    }
}

impl NetworkingProvider for StubProvider {
    fn start_request(
        &self,
        request: RequestDescriptor,
        completion: TransportCompletion,
    ) -> Box<dyn RequestNetworking> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(TransferCounters::default());

        let mut state = self.state.lock().unwrap();
        state.requests.push(request.clone());
        match state.next_outcome(&request) {
            Some(outcome) => completion.complete(outcome),
            None => state.pending.push(PendingCall {
                request,
                completion,
                cancelled: cancelled.clone(),
                counters: counters.clone(),
            }),
        }

        Box::new(StubNetworking {
            cancelled,
            counters,
        })
    }
}
