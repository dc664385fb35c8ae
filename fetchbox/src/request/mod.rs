//! One asynchronous fetch attempt and its lifecycle.
//!
//! ```text
//! NotStarted ──start()──▶ InProgress ──response──▶ Completed
//!     │                        │
//!     └────────cancel()────────┴──────────────────▶ Completed (cancelled)
//! ```
//!
//! A [`Request`] broadcasts exactly one [`ResponseInfo`] to its completion
//! callbacks. Cancellation broadcasts immediately and wins against any late
//! transport response; later outcomes (late, duplicate, or from a provider
//! that delivers twice) are dropped with a log entry.
//!
//! Requests are handles: clones share state, and equality is identity.
//! They live on the [coordination context](crate::context) and must be
//! started and awaited there.
//!
//! ## Kinds
//!
//! - network requests, created by [`Resource::request`](crate::Resource::request)
//!   and [`Resource::load`](crate::Resource::load)
//! - [`Request::hardwired`] and [`Request::failed`], which complete with a
//!   fixed outcome once started
//! - [`Request::chained`], which decides what to do after another request
//!   completes

mod chain;
pub(crate) mod network;
mod state;

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use fetchbox_core::{
    Clock, Entity, RequestError, Response, ResponseInfo, SystemClock,
};
use tokio::sync::oneshot;
use tracing::{debug, warn};

pub use chain::ChainAction;

use crate::metrics::{self, Outcome};
use chain::ChainRecipe;
use network::NetworkRecipe;
use state::{Broadcast, RequestState};

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Where a request is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    /// Created but not started.
    NotStarted,
    /// Started and waiting for an outcome.
    InProgress,
    /// An outcome (possibly a cancellation) has been broadcast.
    Completed,
}

enum RequestKind {
    Network(NetworkRecipe),
    Hardwired(ResponseInfo),
    Chained(ChainRecipe),
}

pub(crate) struct RequestInner {
    id: u64,
    kind: RequestKind,
    clock: Arc<dyn Clock>,
    state: RefCell<RequestState>,
}

/// Handle to one fetch attempt.
#[derive(Clone)]
pub struct Request {
    inner: Rc<RequestInner>,
}

impl Request {
    fn from_kind(kind: RequestKind, clock: Arc<dyn Clock>) -> Request {
        Request {
            inner: Rc::new(RequestInner {
                id: NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed),
                kind,
                clock,
                state: RefCell::new(RequestState::default()),
            }),
        }
    }

    pub(crate) fn network(recipe: NetworkRecipe, clock: Arc<dyn Clock>) -> Request {
        Request::from_kind(RequestKind::Network(recipe), clock)
    }

    /// Request that completes with `info` once started, without touching
    /// the network.
    ///
    /// Timestamps it creates (a cancellation, say) come from the system
    /// clock; use [`hardwired_with_clock`](Self::hardwired_with_clock) to
    /// follow a service's clock.
    pub fn hardwired(info: ResponseInfo) -> Request {
        Request::hardwired_with_clock(info, Arc::new(SystemClock))
    }

    /// Like [`hardwired`](Self::hardwired), timestamped by `clock`.
    pub fn hardwired_with_clock(info: ResponseInfo, clock: Arc<dyn Clock>) -> Request {
        Request::from_kind(RequestKind::Hardwired(info), clock)
    }

    /// Request that fails with `error` once started.
    pub fn failed(error: RequestError) -> Request {
        Request::hardwired(ResponseInfo::new(error))
    }

    /// Like [`failed`](Self::failed), timestamped by `clock`.
    pub fn failed_with_clock(error: RequestError, clock: Arc<dyn Clock>) -> Request {
        Request::hardwired_with_clock(ResponseInfo::new(error), clock)
    }

    /// Clock this request timestamps its own outcomes with.
    ///
    /// Network requests use their service's clock, and chained and repeated
    /// requests inherit it.
    pub fn clock(&self) -> Arc<dyn Clock> {
        self.inner.clock.clone()
    }

    /// Unique identifier, used in logs.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Starts the request.
    ///
    /// Starting a request that was cancelled first does nothing: the
    /// cancellation has already been broadcast.
    ///
    /// # Panics
    ///
    /// Panics if the request was already started, or when called outside a
    /// [coordination context](crate::context).
    pub fn start(&self) -> &Self {
        {
            let mut state = self.inner.state.borrow_mut();
            if state.started {
                panic!("Request {} started twice", self.inner.id);
            }
            state.started = true;
            if state.completion.is_some() {
                state.underlying_completed = true;
                drop(state);
                debug!(
                    request_id = self.inner.id,
                    "Request cancelled before start; not starting it"
                );
                return self;
            }
        }

        match &self.inner.kind {
            RequestKind::Network(recipe) => network::start(self, recipe),
            RequestKind::Hardwired(info) => {
                let request = self.clone();
                let info = info.clone();
                tokio::task::spawn_local(async move {
                    request.mark_underlying_completed();
                    request.broadcast(info);
                });
            }
            RequestKind::Chained(chain) => chain::start(self, chain),
        }
        self
    }

    /// Cancels the request.
    ///
    /// Everyone waiting on the request receives a cancellation failure at
    /// once. The transport is asked to abort, but may still deliver a
    /// response; it is dropped. Cancelling a completed request does nothing.
    pub fn cancel(&self) {
        if self.is_completed() {
            debug!(
                request_id = self.inner.id,
                "cancel() on completed request; ignoring"
            );
            return;
        }

        let (networking, chained_to) = {
            let state = self.inner.state.borrow();
            (state.networking.clone(), state.chained_to.clone())
        };
        self.broadcast(ResponseInfo::cancellation(self.now()));

        if let Some(networking) = networking {
            networking.cancel();
        }
        if let Some(current) = chained_to {
            current.cancel();
        }
    }

    /// Starts a brand-new request built the same way as this one.
    ///
    /// The new request shares no state with this one.
    pub fn repeated(&self) -> Request {
        let request = self.fresh_copy();
        request.start();
        request
    }

    fn fresh_copy(&self) -> Request {
        let kind = match &self.inner.kind {
            RequestKind::Network(recipe) => RequestKind::Network(recipe.clone()),
            RequestKind::Hardwired(info) => RequestKind::Hardwired(info.clone()),
            RequestKind::Chained(chain) => RequestKind::Chained(chain.fresh_copy()),
        };
        Request::from_kind(kind, self.inner.clock.clone())
    }

    /// Creates a request that runs this one, then lets `action` decide the
    /// outcome.
    ///
    /// The returned request is not started. Starting it starts this request
    /// too if needed. Cancelling it cancels whichever request it is waiting on.
    ///
    /// ```no_run
    /// # use fetchbox::{ChainAction, Request};
    /// # fn chain(login: Request, fetch_profile: impl Fn() -> Request + 'static) -> Request {
    /// login.chained(move |info| {
    ///     if info.response.is_success() {
    ///         ChainAction::PassTo(fetch_profile())
    ///     } else {
    ///         ChainAction::UseThisResponse
    ///     }
    /// })
    /// # }
    /// ```
    pub fn chained<F>(&self, action: F) -> Request
    where
        F: Fn(&ResponseInfo) -> ChainAction + 'static,
    {
        let recipe = ChainRecipe::new(self.clone(), Rc::new(action));
        Request::from_kind(RequestKind::Chained(recipe), self.inner.clock.clone())
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> RequestPhase {
        self.inner.state.borrow().phase()
    }

    /// Returns `true` once an outcome has been broadcast.
    pub fn is_completed(&self) -> bool {
        self.inner.state.borrow().completion.is_some()
    }

    /// The broadcast outcome, once completed.
    pub fn response(&self) -> Option<ResponseInfo> {
        self.inner.state.borrow().completion.clone()
    }

    /// Progress in `[0, 1]`; exactly `1.0` once completed.
    pub fn progress(&self) -> f64 {
        self.inner.state.borrow().progress.value()
    }

    /// Returns `true` once the underlying work is over: the transport
    /// delivered (or dropped) its outcome, or start was skipped because the
    /// request had been cancelled.
    pub fn underlying_network_request_completed(&self) -> bool {
        self.inner.state.borrow().underlying_completed
    }

    /// Calls `callback` with the outcome, immediately if already completed.
    pub fn on_completion<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(&ResponseInfo) + 'static,
    {
        let completion = self.inner.state.borrow().completion.clone();
        match completion {
            Some(info) => callback(&info),
            None => self
                .inner
                .state
                .borrow_mut()
                .completion_callbacks
                .push(Box::new(callback)),
        }
        self
    }

    /// Calls `callback` with the entity if the request succeeds.
    pub fn on_success<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(&Entity) + 'static,
    {
        self.on_completion(move |info| {
            if let Response::Success(entity) = &info.response {
                callback(entity);
            }
        })
    }

    /// Calls `callback` if the request succeeds with fresh data.
    pub fn on_new_data<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(&Entity) + 'static,
    {
        self.on_completion(move |info| match &info.response {
            Response::Success(entity) if info.is_new => callback(entity),
            _ => {}
        })
    }

    /// Calls `callback` if the server confirmed the existing data.
    pub fn on_not_modified<F>(&self, callback: F) -> &Self
    where
        F: FnOnce() + 'static,
    {
        self.on_completion(move |info| {
            if info.response.is_success() && !info.is_new {
                callback();
            }
        })
    }

    /// Calls `callback` if the request fails, including by cancellation.
    pub fn on_failure<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(&RequestError) + 'static,
    {
        self.on_completion(move |info| {
            if let Response::Failure(error) = &info.response {
                callback(error);
            }
        })
    }

    /// Calls `callback` whenever progress advances, and with `1.0` on
    /// completion (immediately if already completed).
    pub fn on_progress<F>(&self, callback: F) -> &Self
    where
        F: Fn(f64) + 'static,
    {
        if self.is_completed() {
            callback(1.0);
        } else {
            self.inner
                .state
                .borrow_mut()
                .progress_callbacks
                .push(Rc::new(callback));
        }
        self
    }

    /// Waits for the outcome.
    ///
    /// Does not start the request.
    pub async fn wait(&self) -> ResponseInfo {
        let (sender, receiver) = oneshot::channel();
        self.on_completion(move |info| {
            let _ = sender.send(info.clone());
        });
        match receiver.await {
            Ok(info) => info,
            Err(_) => ResponseInfo::cancellation(self.now()),
        }
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    fn mark_underlying_completed(&self) {
        self.inner.state.borrow_mut().underlying_completed = true;
    }

    /// Broadcasts `info` to every completion callback, unless an outcome
    /// was already broadcast.
    fn broadcast(&self, info: ResponseInfo) {
        let Broadcast {
            completion,
            progress,
        } = {
            let mut state = self.inner.state.borrow_mut();
            if let Some(existing) = &state.completion {
                self.log_dropped(existing, &info);
                metrics::record_completion_dropped();
                return;
            }
            state.record_completion(info.clone())
        };

        metrics::record_request_completed(outcome_of(&info));
        for callback in progress {
            callback(1.0);
        }
        for callback in completion {
            callback(&info);
        }
    }

    fn log_dropped(&self, existing: &ResponseInfo, dropped: &ResponseInfo) {
        if existing.is_cancellation() {
            debug!(
                request_id = self.inner.id,
                dropped = ?dropped.response,
                "Request already cancelled; dropping late response"
            );
        } else {
            warn!(
                request_id = self.inner.id,
                existing = ?existing.response,
                dropped = ?dropped.response,
                "Request already completed; dropping duplicate response"
            );
        }
    }

    fn sample_progress(&self, elapsed: Duration) {
        let networking = self.inner.state.borrow().networking.clone();
        let metrics = networking
            .map(|networking| networking.transfer_metrics())
            .unwrap_or_default();
        let update = self
            .inner
            .state
            .borrow_mut()
            .update_progress(metrics, elapsed);
        if let Some((value, callbacks)) = update {
            for callback in callbacks {
                callback(value);
            }
        }
    }
}

fn outcome_of(info: &ResponseInfo) -> Outcome {
    match &info.response {
        Response::Success(_) if info.is_new => Outcome::Success,
        Response::Success(_) => Outcome::NotModified,
        Response::Failure(error) if error.is_cancellation() => Outcome::Cancelled,
        Response::Failure(_) => Outcome::Failure,
    }
}

impl PartialEq for Request {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Request {}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.inner.kind {
            RequestKind::Network(_) => "network",
            RequestKind::Hardwired(_) => "hardwired",
            RequestKind::Chained(_) => "chained",
        };
        f.debug_struct("Request")
            .field("id", &self.inner.id)
            .field("kind", &kind)
            .field("phase", &self.phase())
            .finish()
    }
}
