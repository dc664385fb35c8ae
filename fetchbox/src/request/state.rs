use std::mem;
use std::rc::Rc;
use std::time::Duration;

use fetchbox_core::{RequestNetworking, RequestProgress, ResponseInfo, TransferMetrics};

use super::{Request, RequestPhase};

pub(super) type CompletionCallback = Box<dyn FnOnce(&ResponseInfo)>;
pub(super) type ProgressCallback = Rc<dyn Fn(f64)>;

/// Mutable part of a request. Only touched on the coordination context.
#[derive(Default)]
pub(super) struct RequestState {
    pub(super) started: bool,
    /// The one broadcast outcome. `Some` means completed.
    pub(super) completion: Option<ResponseInfo>,
    pub(super) underlying_completed: bool,
    pub(super) networking: Option<Rc<dyn RequestNetworking>>,
    /// Request a chain is currently waiting on.
    pub(super) chained_to: Option<Request>,
    pub(super) progress: RequestProgress,
    pub(super) completion_callbacks: Vec<CompletionCallback>,
    pub(super) progress_callbacks: Vec<ProgressCallback>,
}

/// Callbacks to run once a completion has been recorded.
pub(super) struct Broadcast {
    pub(super) completion: Vec<CompletionCallback>,
    pub(super) progress: Vec<ProgressCallback>,
}

impl RequestState {
    pub(super) fn phase(&self) -> RequestPhase {
        match (self.started, &self.completion) {
            (_, Some(_)) => RequestPhase::Completed,
            (true, None) => RequestPhase::InProgress,
            (false, None) => RequestPhase::NotStarted,
        }
    }

    /// Records the outcome and hands back every callback waiting for it.
    ///
    /// Callers must have checked that no completion is recorded yet.
    pub(super) fn record_completion(&mut self, info: ResponseInfo) -> Broadcast {
        debug_assert!(self.completion.is_none());
        self.completion = Some(info);
        self.progress.complete();
        self.networking = None;
        self.chained_to = None;
        Broadcast {
            completion: mem::take(&mut self.completion_callbacks),
            progress: mem::take(&mut self.progress_callbacks),
        }
    }

    /// Folds in a transfer sample; returns the new value and the callbacks
    /// to notify when it changed.
    pub(super) fn update_progress(
        &mut self,
        metrics: TransferMetrics,
        elapsed: Duration,
    ) -> Option<(f64, Vec<ProgressCallback>)> {
        if self.completion.is_some() {
            return None;
        }
        let before = self.progress.value();
        let after = self.progress.update(metrics, elapsed);
        (after > before).then(|| (after, self.progress_callbacks.clone()))
    }
}
