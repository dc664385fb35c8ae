use std::rc::Rc;

use fetchbox_core::ResponseInfo;

use super::{Request, RequestPhase};

/// What a chained request does once the request it waits on completes.
#[derive(Debug)]
pub enum ChainAction {
    /// Broadcast the completed request's outcome as-is.
    UseThisResponse,
    /// Broadcast a different outcome.
    UseResponse(ResponseInfo),
    /// Wait on another request and broadcast its outcome.
    ///
    /// The request is started if it has not been already.
    PassTo(Request),
}

type ChainFn = Rc<dyn Fn(&ResponseInfo) -> ChainAction>;

#[derive(Clone)]
pub(super) struct ChainRecipe {
    upstream: Request,
    action: ChainFn,
}

impl ChainRecipe {
    pub(super) fn new(upstream: Request, action: ChainFn) -> Self {
        ChainRecipe { upstream, action }
    }

    /// Same chain over an unstarted copy of the upstream request.
    pub(super) fn fresh_copy(&self) -> Self {
        ChainRecipe {
            upstream: self.upstream.fresh_copy(),
            action: self.action.clone(),
        }
    }
}

pub(super) fn start(request: &Request, chain: &ChainRecipe) {
    request.inner.state.borrow_mut().chained_to = Some(chain.upstream.clone());
    if chain.upstream.phase() == RequestPhase::NotStarted {
        chain.upstream.start();
    }

    let request = request.clone();
    let action = chain.action.clone();
    chain.upstream.on_completion(move |info| {
        if request.is_completed() {
            return;
        }
        match action(info) {
            ChainAction::UseThisResponse => finish(&request, info.clone()),
            ChainAction::UseResponse(substitute) => finish(&request, substitute),
            ChainAction::PassTo(next) => pass_to(&request, next),
        }
    });
}

fn pass_to(request: &Request, next: Request) {
    request.inner.state.borrow_mut().chained_to = Some(next.clone());
    if next.phase() == RequestPhase::NotStarted {
        next.start();
    }
    let request = request.clone();
    next.on_completion(move |info| {
        if !request.is_completed() {
            finish(&request, info.clone());
        }
    });
}

fn finish(request: &Request, info: ResponseInfo) {
    request.mark_underlying_completed();
    request.broadcast(info);
}
