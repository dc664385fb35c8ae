//! Response transformers.
//!
//! A [`ResponseTransformer`] maps one [`Response`] to another. Most
//! transformers only care about successful content; [`ContentTransformer`]
//! handles the boilerplate of pulling typed content out of an entity,
//! replacing it with the transformed value and turning transform errors into
//! pipeline-stage failures.
//!
//! ## Standard transformers
//!
//! - [`text_decoder`] - `Bytes` to `String`, honouring the charset
//! - [`json_decoder`] - `Bytes` to [`serde_json::Value`]
//! - [`json_model`] - [`serde_json::Value`] to any `DeserializeOwned` type

use std::any::type_name;
use std::error::Error as StdError;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use bytes::Bytes;
use regex::{Regex, RegexBuilder};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::entity::Entity;
use crate::error::{RequestError, SharedError};
use crate::response::Response;

/// One step of a pipeline stage.
pub trait ResponseTransformer: Send + Sync {
    /// Transforms a response.
    fn process(&self, response: Response) -> Response;

    /// Whether this transformer wants to see failures.
    ///
    /// Transformers that return `false` (the default) are skipped once the
    /// response has failed, so the first failure short-circuits the chain.
    fn observes_errors(&self) -> bool {
        false
    }
}

impl<F> ResponseTransformer for F
where
    F: Fn(Response) -> Response + Send + Sync,
{
    fn process(&self, response: Response) -> Response {
        self(response)
    }
}

/// Transformer that sees failures and may substitute a different response.
///
/// # Example
///
/// ```
/// use fetchbox_core::{Entity, Response};
/// use fetchbox_core::pipeline::ErrorObserver;
///
/// // Serve a placeholder whenever the fetch failed.
/// let fallback = ErrorObserver::new(|response| match response {
///     Response::Failure(error) => {
///         Response::Success(Entity::binary("placeholder", error.timestamp))
///     }
///     success => success,
/// });
/// # let _ = fallback;
/// ```
pub struct ErrorObserver<F> {
    process: F,
}

impl<F> ErrorObserver<F>
where
    F: Fn(Response) -> Response + Send + Sync,
{
    /// Wraps a function that receives both successes and failures.
    pub fn new(process: F) -> Self {
        ErrorObserver { process }
    }
}

impl<F> ResponseTransformer for ErrorObserver<F>
where
    F: Fn(Response) -> Response + Send + Sync,
{
    fn process(&self, response: Response) -> Response {
        (self.process)(response)
    }

    fn observes_errors(&self) -> bool {
        true
    }
}

/// Error returned by content transform functions.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct TransformError {
    message: String,
    #[source]
    source: Option<SharedError>,
}

impl TransformError {
    /// Error with just a message.
    pub fn new(message: impl Into<String>) -> Self {
        TransformError {
            message: message.into(),
            source: None,
        }
    }

    /// Error wrapping an underlying cause, using its message.
    pub fn from_error<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        TransformError {
            message: error.to_string(),
            source: Some(Arc::new(error)),
        }
    }
}

/// What a [`ContentTransformer`] does with content of an unexpected type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputTypeMismatchAction {
    /// Fail the response.
    #[default]
    Error,
    /// Pass the response through untouched.
    Skip,
    /// Pass through if the content already has the output type, else fail.
    SkipIfOutputTypeMatches,
}

/// Transformer over entity content of type `I`, producing `O`.
pub struct ContentTransformer<I, O, F> {
    transform: F,
    mismatch: InputTypeMismatchAction,
    _marker: PhantomData<fn(&I) -> O>,
}

impl<I, O, F> ContentTransformer<I, O, F>
where
    I: 'static,
    O: Send + Sync + 'static,
    F: Fn(&I, &Entity) -> Result<O, TransformError> + Send + Sync,
{
    /// Wraps a content transform function.
    pub fn new(transform: F) -> Self {
        ContentTransformer {
            transform,
            mismatch: InputTypeMismatchAction::default(),
            _marker: PhantomData,
        }
    }

    /// Sets how content of the wrong input type is handled.
    pub fn on_input_type_mismatch(self, mismatch: InputTypeMismatchAction) -> Self {
        ContentTransformer { mismatch, ..self }
    }

    fn mismatch(&self, entity: Entity) -> Response {
        let pass = match self.mismatch {
            InputTypeMismatchAction::Skip => true,
            InputTypeMismatchAction::SkipIfOutputTypeMatches => {
                entity.typed_content::<O>().is_some()
            }
            InputTypeMismatchAction::Error => false,
        };
        if pass {
            Response::Success(entity)
        } else {
            let message = format!(
                "Cannot parse server response: expected {} content",
                type_name::<I>()
            );
            Response::Failure(RequestError::pipeline_stage(
                message,
                None,
                entity.timestamp(),
            ))
        }
    }
}

impl<I, O, F> ResponseTransformer for ContentTransformer<I, O, F>
where
    I: 'static,
    O: Send + Sync + 'static,
    F: Fn(&I, &Entity) -> Result<O, TransformError> + Send + Sync,
{
    fn process(&self, response: Response) -> Response {
        let entity = match response {
            Response::Success(entity) => entity,
            failure => return failure,
        };
        let Some(input) = entity.typed_content::<I>() else {
            return self.mismatch(entity);
        };
        match (self.transform)(input, &entity) {
            Ok(output) => Response::Success(entity.replacing_content(output, entity.timestamp())),
            Err(error) => Response::Failure(RequestError::pipeline_stage(
                error.message,
                error.source,
                entity.timestamp(),
            )),
        }
    }
}

impl<I, O, F> fmt::Debug for ContentTransformer<I, O, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentTransformer")
            .field("input", &type_name::<I>())
            .field("output", &type_name::<O>())
            .field("mismatch", &self.mismatch)
            .finish()
    }
}

/// Restricts a transformer to entities whose content type matches a pattern.
///
/// Patterns are globs where `*` matches anything except `/`, so `text/*`
/// matches every text type and `*/json` every JSON type. Matching ignores case.
pub struct ContentTypeMatcher {
    patterns: Regex,
    delegate: Arc<dyn ResponseTransformer>,
}

impl ContentTypeMatcher {
    /// Applies `delegate` only to content types matching one of `patterns`.
    pub fn new<I, S>(
        patterns: I,
        delegate: Arc<dyn ResponseTransformer>,
    ) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(ContentTypeMatcher {
            patterns: content_type_regex(patterns)?,
            delegate,
        })
    }

    /// Like [`new`](Self::new) for patterns known at compile time.
    ///
    /// # Panics
    ///
    /// Panics if the patterns do not compile, which only a pattern list
    /// large enough to exceed the regex size limit can cause.
    pub fn from_static(patterns: &[&'static str], delegate: Arc<dyn ResponseTransformer>) -> Self {
        Self::new(patterns, delegate).expect(STATIC_PATTERN_ERROR)
    }

    /// Returns `true` if `content_type` matches.
    pub fn matches(&self, content_type: &str) -> bool {
        self.patterns.is_match(content_type)
    }
}

impl ResponseTransformer for ContentTypeMatcher {
    fn process(&self, response: Response) -> Response {
        match &response {
            Response::Success(entity) if self.matches(entity.content_type()) => {
                self.delegate.process(response)
            }
            _ => response,
        }
    }
}

const STATIC_PATTERN_ERROR: &str = "static content type patterns always compile";

fn content_type_regex<I, S>(patterns: I) -> Result<Regex, regex::Error>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let alternatives: Vec<String> = patterns
        .into_iter()
        .map(|pattern| {
            pattern
                .as_ref()
                .split('*')
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join("[^/]*")
        })
        .collect();
    RegexBuilder::new(&format!("^(?:{})$", alternatives.join("|")))
        .case_insensitive(true)
        .build()
}

/// Decodes `Bytes` into a `String` using the entity's charset.
///
/// Supports UTF-8 (the default), US-ASCII and ISO-8859-1.
pub fn text_decoder() -> impl ResponseTransformer {
    ContentTransformer::new(|bytes: &Bytes, entity: &Entity| decode_text(bytes, entity.charset()))
        .on_input_type_mismatch(InputTypeMismatchAction::SkipIfOutputTypeMatches)
}

fn decode_text(bytes: &Bytes, charset: Option<&str>) -> Result<String, TransformError> {
    let charset = charset.unwrap_or("utf-8").to_ascii_lowercase();
    match charset.as_str() {
        "utf-8" | "utf8" => String::from_utf8(bytes.to_vec()).map_err(TransformError::from_error),
        "us-ascii" | "ascii" if bytes.is_ascii() => {
            Ok(bytes.iter().map(|&byte| char::from(byte)).collect())
        }
        "us-ascii" | "ascii" => Err(TransformError::new("Invalid US-ASCII text")),
        "iso-8859-1" | "latin1" | "latin-1" => {
            Ok(bytes.iter().map(|&byte| char::from(byte)).collect())
        }
        other => Err(TransformError::new(format!(
            "Unsupported text encoding: {other}"
        ))),
    }
}

/// Parses `Bytes` as JSON into a [`serde_json::Value`].
pub fn json_decoder() -> impl ResponseTransformer {
    ContentTransformer::new(|bytes: &Bytes, _: &Entity| {
        serde_json::from_slice::<serde_json::Value>(bytes).map_err(TransformError::from_error)
    })
    .on_input_type_mismatch(InputTypeMismatchAction::SkipIfOutputTypeMatches)
}

/// Deserializes a [`serde_json::Value`] into `T`.
pub fn json_model<T>() -> impl ResponseTransformer
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    ContentTransformer::new(|value: &serde_json::Value, _: &Entity| {
        T::deserialize(value).map_err(TransformError::from_error)
    })
    .on_input_type_mismatch(InputTypeMismatchAction::SkipIfOutputTypeMatches)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde::Deserialize;

    use super::*;
    use crate::error::ErrorKind;
    use crate::headers::Headers;

    fn bytes_entity(body: &'static [u8], content_type: &str) -> Response {
        let headers: Headers = [("Content-Type", content_type)].into_iter().collect();
        Response::Success(Entity::new(Bytes::from_static(body), headers, Utc::now()))
    }

    #[test]
    fn text_decoder_honours_charset() {
        let response = text_decoder().process(bytes_entity(
            b"caf\xe9",
            "text/plain; charset=ISO-8859-1",
        ));
        let entity = response.entity().unwrap();
        assert_eq!(entity.typed_content::<String>().unwrap(), "café");
    }

    #[test]
    fn text_decoder_rejects_unknown_charset() {
        let response = text_decoder().process(bytes_entity(b"x", "text/plain; charset=koi8-r"));
        let error = response.error().unwrap();
        assert_eq!(error.kind(), ErrorKind::PipelineStage);
        assert_eq!(error.user_message, "Unsupported text encoding: koi8-r");
    }

    #[test]
    fn json_decoder_reports_parse_errors() {
        let response = json_decoder().process(bytes_entity(b"{nope", "application/json"));
        assert_eq!(response.error().unwrap().kind(), ErrorKind::PipelineStage);
    }

    #[test]
    fn json_model_decodes_typed_content() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct User {
            name: String,
        }

        let parsed = json_decoder().process(bytes_entity(br#"{"name":"ann"}"#, "application/json"));
        let modelled = json_model::<User>().process(parsed);
        let user = modelled.entity().unwrap().typed_content::<User>().unwrap();
        assert_eq!(user.name, "ann");
    }

    #[test]
    fn mismatch_actions() {
        let strict = ContentTransformer::new(|value: &u32, _: &Entity| Ok(value + 1));
        let skipping = ContentTransformer::new(|value: &u32, _: &Entity| Ok(value + 1))
            .on_input_type_mismatch(InputTypeMismatchAction::Skip);
        let response = bytes_entity(b"1", "text/plain");

        assert!(!strict.process(response.clone()).is_success());
        assert!(skipping.process(response).is_success());
    }

    #[test]
    fn skip_if_output_type_matches() {
        let decoder = text_decoder();
        let already_text = Response::Success(Entity::with_content_type(
            "ready".to_owned(),
            "text/plain",
            Utc::now(),
        ));
        assert!(decoder.process(already_text).is_success());

        let number = Response::Success(Entity::with_content_type(7u8, "text/plain", Utc::now()));
        assert!(!decoder.process(number).is_success());
    }

    #[test]
    fn content_type_globs() {
        let matcher = ContentTypeMatcher::new(["text/*", "*/json", "*/*+json"], Arc::new(text_decoder()))
                .unwrap();
        assert!(matcher.matches("text/plain"));
        assert!(matcher.matches("application/json"));
        assert!(matcher.matches("application/vnd.api+json"));
        assert!(matcher.matches("TEXT/HTML"));
        assert!(!matcher.matches("image/png"));
        assert!(!matcher.matches("text/plain/extra"));
    }

    #[test]
    fn content_type_matcher_leaves_other_types_alone() {
        let matcher = ContentTypeMatcher::new(["text/*"], Arc::new(text_decoder())).unwrap();
        let response = matcher.process(bytes_entity(b"\x89PNG", "image/png"));
        assert!(response.entity().unwrap().typed_content::<Bytes>().is_some());
    }
}
