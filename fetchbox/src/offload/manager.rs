//! The offload manager.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Instant;

use dashmap::DashMap;
use smol_str::SmolStr;
use thiserror::Error;
use tokio::sync::{Semaphore, oneshot};
use tracing::{Instrument, debug, info_span, warn};

use super::policy::{OffloadConfig, TimeoutPolicy};
use crate::metrics;

/// Identifies an offloaded task.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OffloadKey {
    /// Cache work for one resource, keyed by its URL. Deduplicated.
    Entity(SmolStr),
    /// Any other task: its kind (`"pipeline"`, `"cache_remove"`) and a
    /// sequence number.
    Task {
        /// Kind of work, used as the log and metrics label.
        kind: SmolStr,
        /// Sequence number within the manager.
        id: u64,
    },
}

impl OffloadKey {
    fn kind(&self) -> &str {
        match self {
            OffloadKey::Entity(_) => "entity",
            OffloadKey::Task { kind, .. } => kind,
        }
    }
}

/// Error returned when an offloaded task produced no result.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OffloadError {
    /// The task panicked or was cancelled by its timeout policy.
    #[error("offloaded task {key:?} finished without a result")]
    Abandoned {
        /// Key of the abandoned task.
        key: OffloadKey,
    },
}

/// Output of a task started with [`OffloadManager::run`].
///
/// Resolves once the task has finished, on whatever context awaits it.
#[derive(Debug)]
pub struct OffloadResult<T> {
    key: OffloadKey,
    receiver: oneshot::Receiver<T>,
}

impl<T> OffloadResult<T> {
    /// Key the task runs under.
    pub fn key(&self) -> &OffloadKey {
        &self.key
    }
}

impl<T> Future for OffloadResult<T> {
    type Output = Result<T, OffloadError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.receiver).poll(cx).map(|result| {
            result.map_err(|_| OffloadError::Abandoned {
                key: this.key.clone(),
            })
        })
    }
}

#[derive(Debug)]
struct Shared {
    config: OffloadConfig,
    in_flight: DashMap<OffloadKey, ()>,
    next_id: AtomicU64,
    limiter: Option<Arc<Semaphore>>,
}

/// Removes its key from the in-flight table however the task ends.
struct InFlight {
    shared: Arc<Shared>,
    key: OffloadKey,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.shared.in_flight.remove(&self.key);
        metrics::record_offload_finished(self.key.kind());
    }
}

/// Runs pipeline and entity cache work off the coordination context.
///
/// Tasks run on the tokio runtime. Entity tasks are deduplicated while in
/// flight, concurrency can be capped and slow tasks are handled according to
/// the [`TimeoutPolicy`].
#[derive(Clone, Debug)]
pub struct OffloadManager {
    shared: Arc<Shared>,
}

impl OffloadManager {
    /// Creates a manager.
    pub fn new(config: OffloadConfig) -> Self {
        let limiter = config
            .max_concurrent_tasks
            .map(|max| Arc::new(Semaphore::new(max.max(1))));
        OffloadManager {
            shared: Arc::new(Shared {
                config,
                in_flight: DashMap::new(),
                next_id: AtomicU64::new(0),
                limiter,
            }),
        }
    }

    /// The configuration this manager was built with.
    pub fn config(&self) -> &OffloadConfig {
        &self.shared.config
    }

    fn task_key(&self, kind: impl Into<SmolStr>) -> OffloadKey {
        OffloadKey::Task {
            kind: kind.into(),
            id: self.shared.next_id.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Starts a fire-and-forget task of `kind`.
    pub fn spawn<F>(&self, kind: impl Into<SmolStr>, task: F) -> OffloadKey
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let key = self.task_key(kind);
        self.launch(key.clone(), task);
        key
    }

    /// Starts `task` and returns a future for its output.
    ///
    /// The task runs whether or not the result is awaited.
    pub fn run<F, T>(&self, kind: impl Into<SmolStr>, task: F) -> OffloadResult<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let key = self.task_key(kind);
        let (sender, receiver) = oneshot::channel();
        self.launch(key.clone(), async move {
            let _ = sender.send(task.await);
        });
        OffloadResult { key, receiver }
    }

    /// Like [`run`](Self::run) under an explicit key.
    ///
    /// Returns `None` when deduplication is on and an [`OffloadKey::Entity`]
    /// task with the same key is still running.
    pub fn run_with_key<F, T>(&self, key: OffloadKey, task: F) -> Option<OffloadResult<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if self.shared.config.deduplicate
            && matches!(key, OffloadKey::Entity(_))
            && self.is_in_flight(&key)
        {
            debug!(?key, "Task already in flight; skipping");
            metrics::record_offload_deduplicated(key.kind());
            return None;
        }

        let (sender, receiver) = oneshot::channel();
        self.launch(key.clone(), async move {
            let _ = sender.send(task.await);
        });
        Some(OffloadResult { key, receiver })
    }

    /// Returns `true` while a task with `key` is running or queued.
    pub fn is_in_flight(&self, key: &OffloadKey) -> bool {
        self.shared.in_flight.contains_key(key)
    }

    /// Number of tasks running or queued.
    pub fn active_task_count(&self) -> usize {
        self.shared.in_flight.len()
    }

    /// Waits until no task is running or queued.
    pub async fn wait_idle(&self) {
        while !self.shared.in_flight.is_empty() {
            tokio::task::yield_now().await;
        }
    }

    fn launch<F>(&self, key: OffloadKey, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.shared.in_flight.insert(key.clone(), ());
        metrics::record_offload_spawned(key.kind());

        let guard = InFlight {
            shared: self.shared.clone(),
            key: key.clone(),
        };
        let limiter = self.shared.limiter.clone();
        let timeout_policy = self.shared.config.timeout_policy;
        let span = info_span!("offload_task", kind = key.kind(), key = ?key);

        tokio::spawn(
            async move {
                let _guard = guard;
                let _permit = match limiter {
                    Some(limiter) => limiter.acquire_owned().await.ok(),
                    None => None,
                };
                let started = Instant::now();
                match timeout_policy {
                    TimeoutPolicy::None => task.await,
                    TimeoutPolicy::Cancel(limit) => {
                        if tokio::time::timeout(limit, task).await.is_err() {
                            warn!(
                                ?key,
                                limit_ms = limit.as_millis(),
                                "Offload task cancelled due to timeout"
                            );
                            metrics::record_offload_timeout(key.kind());
                        }
                    }
                    TimeoutPolicy::Warn(limit) => {
                        task.await;
                        let elapsed = started.elapsed();
                        if elapsed > limit {
                            warn!(
                                ?key,
                                elapsed_ms = elapsed.as_millis(),
                                threshold_ms = limit.as_millis(),
                                "Offload task exceeded timeout threshold"
                            );
                        }
                    }
                }
                metrics::record_offload_duration(key.kind(), started.elapsed());
            }
            .instrument(span),
        );
    }
}

impl Default for OffloadManager {
    fn default() -> Self {
        OffloadManager::new(OffloadConfig::default())
    }
}
