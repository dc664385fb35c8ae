//! Response transformation pipeline.
//!
//! A [`Pipeline`] is an ordered list of stages. Each stage holds zero or
//! more [`ResponseTransformer`]s and optionally an [`EntityCache`] that
//! remembers the stage's output:
//!
//! ```text
//! raw data ─▶ decoding ─▶ parsing ─▶ model ─▶ cleanup
//!                │            │
//!             (cache)      (cache)
//! ```
//!
//! ## Processing rules
//!
//! - Each stage receives exactly the output of the previous one.
//! - Once a response has failed, transformers that do not
//!   [observe errors](ResponseTransformer::observes_errors) are skipped, so
//!   the failure reaches the end of the chain untouched.
//! - Responses reusing prior data (`is_new == false`, the `304` case) bypass
//!   the pipeline entirely: reused data is never transformed or cached twice.
//!
//! ## Caching
//!
//! [`Pipeline::process_and_cache`] writes each stage's successful output to
//! that stage's cache. [`Pipeline::cached_entity`] looks for the most
//! processed cached entity (last stage first) and replays the remaining
//! stages over it.

mod cache;
mod transformer;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use smol_str::SmolStr;
use tracing::{debug, warn};
use url::Url;

pub use cache::{CacheError, CacheResult, EntityCache, MemoryCache};
pub use transformer::{
    ContentTransformer, ContentTypeMatcher, ErrorObserver, InputTypeMismatchAction,
    ResponseTransformer, TransformError, json_decoder, json_model, text_decoder,
};

use crate::entity::Entity;
use crate::response::{Response, ResponseInfo};

/// Name of a pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StageKey {
    /// Bytes exactly as the transport delivered them.
    RawData,
    /// Bytes decoded into text or another intermediate form.
    Decoding,
    /// Intermediate form parsed into a generic structure such as JSON.
    Parsing,
    /// Generic structure mapped onto application models.
    Model,
    /// Final adjustments after the model is built.
    Cleanup,
    /// Application-defined stage.
    Custom(SmolStr),
}

impl StageKey {
    /// Stage order used by new pipelines.
    pub fn default_order() -> Vec<StageKey> {
        vec![
            StageKey::RawData,
            StageKey::Decoding,
            StageKey::Parsing,
            StageKey::Model,
            StageKey::Cleanup,
        ]
    }
}

impl fmt::Display for StageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageKey::RawData => f.write_str("raw_data"),
            StageKey::Decoding => f.write_str("decoding"),
            StageKey::Parsing => f.write_str("parsing"),
            StageKey::Model => f.write_str("model"),
            StageKey::Cleanup => f.write_str("cleanup"),
            StageKey::Custom(name) => f.write_str(name),
        }
    }
}

/// One stage: transformers applied in order, plus an optional cache.
#[derive(Clone, Default)]
pub struct PipelineStage {
    transformers: Vec<Arc<dyn ResponseTransformer>>,
    cache: Option<Arc<dyn EntityCache>>,
}

impl PipelineStage {
    /// Appends a transformer.
    pub fn add<T>(&mut self, transformer: T) -> &mut Self
    where
        T: ResponseTransformer + 'static,
    {
        self.transformers.push(Arc::new(transformer));
        self
    }

    /// Appends an already shared transformer.
    pub fn add_shared(&mut self, transformer: Arc<dyn ResponseTransformer>) -> &mut Self {
        self.transformers.push(transformer);
        self
    }

    /// Appends a transformer that only runs for matching content types.
    ///
    /// Patterns are globs such as `text/*` or `*/json`.
    pub fn add_for_content_types<T, I, S>(
        &mut self,
        transformer: T,
        content_types: I,
    ) -> Result<&mut Self, regex::Error>
    where
        T: ResponseTransformer + 'static,
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let matcher = ContentTypeMatcher::new(content_types, Arc::new(transformer))?;
        Ok(self.add(matcher))
    }

    /// Drops every transformer in this stage.
    pub fn remove_transformers(&mut self) -> &mut Self {
        self.transformers.clear();
        self
    }

    /// Sets or clears the stage cache.
    pub fn set_cache(&mut self, cache: Option<Arc<dyn EntityCache>>) -> &mut Self {
        self.cache = cache;
        self
    }

    /// The stage cache, if any.
    pub fn cache(&self) -> Option<&Arc<dyn EntityCache>> {
        self.cache.as_ref()
    }

    /// Number of transformers.
    pub fn len(&self) -> usize {
        self.transformers.len()
    }

    /// Returns `true` if the stage has no transformers.
    pub fn is_empty(&self) -> bool {
        self.transformers.is_empty()
    }

    fn process(&self, mut response: Response) -> Response {
        for transformer in &self.transformers {
            if response.is_success() || transformer.observes_errors() {
                response = transformer.process(response);
            }
        }
        response
    }
}

impl fmt::Debug for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineStage")
            .field("transformers", &self.transformers.len())
            .field("cache", &self.cache.as_ref().map(|cache| cache.name().to_owned()))
            .finish()
    }
}

/// Ordered set of [`PipelineStage`]s.
///
/// # Example
///
/// ```
/// use fetchbox_core::pipeline::{Pipeline, StageKey, json_model};
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct User {
///     name: String,
/// }
///
/// let mut pipeline = Pipeline::standard();
/// pipeline.stage_mut(StageKey::Model).add(json_model::<User>());
/// assert_eq!(pipeline.stage(&StageKey::Model).map(|stage| stage.len()), Some(1));
/// ```
#[derive(Clone, Debug)]
pub struct Pipeline {
    order: Vec<StageKey>,
    stages: HashMap<StageKey, PipelineStage>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Pipeline {
            order: StageKey::default_order(),
            stages: HashMap::new(),
        }
    }
}

impl Pipeline {
    /// Empty pipeline with the default stage order.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pipeline with text decoding for `text/*` and JSON parsing for
    /// `*/json` and `*/*+json`.
    pub fn standard() -> Self {
        let mut pipeline = Pipeline::new();
        pipeline
            .stage_mut(StageKey::Decoding)
            .add(ContentTypeMatcher::from_static(
                &["text/*"],
                Arc::new(text_decoder()),
            ));
        pipeline
            .stage_mut(StageKey::Parsing)
            .add(ContentTypeMatcher::from_static(
                &["*/json", "*/*+json"],
                Arc::new(json_decoder()),
            ));
        pipeline
    }

    /// Current stage order.
    pub fn order(&self) -> &[StageKey] {
        &self.order
    }

    /// Replaces the stage order.
    ///
    /// Stages left out of `order` keep their configuration but are not run.
    pub fn set_order(&mut self, order: Vec<StageKey>) -> &mut Self {
        self.order = order;
        self
    }

    /// The stage named `key`, if it was ever configured.
    pub fn stage(&self, key: &StageKey) -> Option<&PipelineStage> {
        self.stages.get(key)
    }

    /// The stage named `key`, created empty if needed.
    ///
    /// A custom stage that is not yet part of the order is appended to it.
    pub fn stage_mut(&mut self, key: StageKey) -> &mut PipelineStage {
        if !self.order.contains(&key) {
            self.order.push(key.clone());
        }
        self.stages.entry(key).or_default()
    }

    /// Drops every transformer in every stage, keeping caches.
    pub fn remove_all_transformers(&mut self) -> &mut Self {
        for stage in self.stages.values_mut() {
            stage.remove_transformers();
        }
        self
    }

    /// Detaches every stage cache.
    pub fn remove_all_caches(&mut self) -> &mut Self {
        for stage in self.stages.values_mut() {
            stage.set_cache(None);
        }
        self
    }

    /// Returns `true` if any stage in the order has a cache.
    pub fn has_caches(&self) -> bool {
        self.ordered_stages().any(|stage| stage.cache.is_some())
    }

    fn ordered_stages(&self) -> impl Iterator<Item = &PipelineStage> + '_ {
        self.order.iter().filter_map(|key| self.stages.get(key))
    }

    /// Runs every stage over `info`.
    pub fn process(&self, info: ResponseInfo) -> ResponseInfo {
        if !info.is_new {
            return info;
        }
        let response = self
            .ordered_stages()
            .fold(info.response, |response, stage| stage.process(response));
        ResponseInfo::new(response)
    }

    /// Runs every stage over `info`, writing successful stage output to
    /// stage caches for the resource at `url`.
    ///
    /// Cache failures are logged and otherwise ignored.
    pub async fn process_and_cache(&self, info: ResponseInfo, url: &Url) -> ResponseInfo {
        if !info.is_new {
            return info;
        }
        let mut response = info.response;
        for (key, stage) in self.keyed_stages() {
            response = stage.process(response);
            if let (Response::Success(entity), Some(cache)) = (&response, &stage.cache) {
                write_to_cache(cache.as_ref(), entity, url, key).await;
            }
        }
        ResponseInfo::new(response)
    }

    /// Most processed cached entity for `url`, with the stages after its
    /// cache replayed over it.
    ///
    /// Returns `None` when no cache has an entry or replaying fails.
    pub async fn cached_entity(&self, url: &Url) -> Option<Entity> {
        let stages: Vec<_> = self.keyed_stages().collect();
        for (index, (key, stage)) in stages.iter().enumerate().rev() {
            let Some(cache) = &stage.cache else {
                continue;
            };
            let Some(cache_key) = cache.key(url) else {
                continue;
            };
            let entity = match cache.read_entity(&cache_key).await {
                Ok(Some(entity)) => entity,
                Ok(None) => continue,
                Err(error) => {
                    warn!(stage = %key, cache = cache.name(), %url, error = %error, "entity cache read failed");
                    continue;
                }
            };
            debug!(stage = %key, cache = cache.name(), %url, "entity cache hit");
            let replayed = stages[index + 1..]
                .iter()
                .fold(Response::Success(entity), |response, (_, stage)| {
                    stage.process(response)
                });
            return match replayed {
                Response::Success(entity) => Some(entity),
                Response::Failure(error) => {
                    debug!(stage = %key, %url, error = %error, "cached entity rejected by later stages");
                    None
                }
            };
        }
        None
    }

    /// Removes cached entries for `url` from every stage cache.
    pub async fn remove_cache_entries(&self, url: &Url) {
        for (key, stage) in self.keyed_stages() {
            let Some(cache) = &stage.cache else {
                continue;
            };
            let Some(cache_key) = cache.key(url) else {
                continue;
            };
            if let Err(error) = cache.remove_entity(&cache_key).await {
                warn!(stage = %key, cache = cache.name(), %url, error = %error, "entity cache remove failed");
            }
        }
    }

    fn keyed_stages(&self) -> impl Iterator<Item = (&StageKey, &PipelineStage)> + '_ {
        self.order
            .iter()
            .filter_map(|key| self.stages.get(key).map(|stage| (key, stage)))
    }
}

async fn write_to_cache(cache: &dyn EntityCache, entity: &Entity, url: &Url, stage: &StageKey) {
    let Some(key) = cache.key(url) else {
        return;
    };
    if let Err(error) = cache.write_entity(entity, &key).await {
        warn!(%stage, cache = cache.name(), %url, error = %error, "entity cache write failed");
    }
}
