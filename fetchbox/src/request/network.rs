//! Network-backed requests.
//!
//! The provider runs the call wherever it likes and reports through a
//! [`TransportCompletion`], which only pushes the outcome into a channel.
//! A local task on the coordination context receives it, classifies it,
//! sends it through the pipeline on the offload manager and broadcasts the
//! result. A second local task samples transfer progress.

use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::time::Duration;

use fetchbox_core::{
    Entity, NetworkingProvider, Pipeline, RequestDescriptor, RequestError, RequestNetworking,
    ResponseInfo, TransportCompletion, TransportOutcome, classify,
};
use http::Method;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;
use url::Url;

use super::{Request, RequestInner};
use crate::metrics;
use crate::offload::OffloadManager;

const MIN_PROGRESS_INTERVAL: Duration = Duration::from_millis(1);

/// Everything needed to build and run a network request, reusable by
/// [`Request::repeated`].
#[derive(Clone)]
pub(crate) struct NetworkRecipe {
    pub(crate) build: Rc<dyn Fn() -> RequestDescriptor>,
    pub(crate) provider: Arc<dyn NetworkingProvider>,
    pub(crate) pipeline: Arc<Pipeline>,
    pub(crate) offload: OffloadManager,
    /// Entity a `304 Not Modified` refers to.
    pub(crate) prior_entity: Rc<dyn Fn() -> Option<Entity>>,
    /// URL entity caches are keyed by.
    pub(crate) cache_url: Url,
    pub(crate) progress_interval: Duration,
}

pub(super) fn start(request: &Request, recipe: &NetworkRecipe) {
    let descriptor = (recipe.build)();
    let method = descriptor.method.clone();
    debug!(
        request_id = request.id(),
        method = %descriptor.method,
        url = %descriptor.url,
        "Starting request"
    );
    metrics::record_request_started(method.as_str());

    let (sender, receiver) = mpsc::unbounded_channel();
    let completion = TransportCompletion::new(move |outcome| {
        let _ = sender.send(outcome);
    });
    let networking: Rc<dyn RequestNetworking> =
        Rc::from(recipe.provider.start_request(descriptor, completion));
    request.inner.state.borrow_mut().networking = Some(networking);

    tokio::task::spawn_local(drive(request.clone(), recipe.clone(), method, receiver));
    tokio::task::spawn_local(report_progress(
        Rc::downgrade(&request.inner),
        recipe.progress_interval,
    ));
}

async fn drive(
    request: Request,
    recipe: NetworkRecipe,
    method: Method,
    mut receiver: UnboundedReceiver<TransportOutcome>,
) {
    let first = receiver.recv().await;
    request.mark_underlying_completed();

    match first {
        None if request.is_completed() => {}
        None => {
            debug!(
                request_id = request.id(),
                "Networking provider dropped the request without an outcome"
            );
            request.broadcast(ResponseInfo::new(RequestError::provider_disconnected(
                request.now(),
            )));
        }
        Some(outcome) if request.is_completed() => {
            request.broadcast(classify(outcome, None, request.now()));
        }
        Some(outcome) => {
            let prior = (recipe.prior_entity)();
            let info = classify(outcome, prior.as_ref(), request.now());
            let info = process(&recipe, &method, info, &request).await;
            request.broadcast(info);
        }
    }

    // Providers that deliver more than once: the guard drops the extras.
    let weak = Rc::downgrade(&request.inner);
    drop(request);
    while let Some(outcome) = receiver.recv().await {
        let Some(inner) = weak.upgrade() else {
            break;
        };
        let request = Request { inner };
        request.broadcast(classify(outcome, None, request.now()));
    }
}

async fn process(
    recipe: &NetworkRecipe,
    method: &Method,
    info: ResponseInfo,
    request: &Request,
) -> ResponseInfo {
    if !info.is_new {
        return info;
    }
    let pipeline = recipe.pipeline.clone();
    let started = Instant::now();
    let processed = if *method == Method::GET {
        let url = recipe.cache_url.clone();
        recipe
            .offload
            .run("pipeline", async move {
                pipeline.process_and_cache(info, &url).await
            })
            .await
    } else {
        recipe
            .offload
            .run("pipeline", async move { pipeline.process(info) })
            .await
    };
    metrics::record_pipeline_duration(started.elapsed());

    processed.unwrap_or_else(|error| {
        ResponseInfo::new(RequestError::offload_failure(
            error.to_string(),
            request.now(),
        ))
    })
}

async fn report_progress(request: Weak<RequestInner>, interval: Duration) {
    let started = Instant::now();
    let mut ticker = tokio::time::interval(interval.max(MIN_PROGRESS_INTERVAL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let Some(inner) = request.upgrade() else {
            break;
        };
        let request = Request { inner };
        if request.is_completed() {
            break;
        }
        request.sample_progress(started.elapsed());
    }
}
