//! Typed request outcomes.
//!
//! - [`Response`] - success with an [`Entity`] or failure with a [`RequestError`]
//! - [`ResponseInfo`] - a response plus whether it carries freshly fetched data
//!
//! ## Fresh vs reused data
//!
//! A `304 Not Modified` answer reuses the entity the client already had.
//! Such a response is marked `is_new == false`; the pipeline skips it
//! entirely so reused data is never transformed or written to caches twice.

use chrono::{DateTime, Utc};

use crate::entity::Entity;
use crate::error::RequestError;

/// Outcome of a request: data or an error.
#[derive(Debug, Clone)]
pub enum Response {
    /// The request produced an entity.
    Success(Entity),
    /// The request failed.
    Failure(RequestError),
}

impl Response {
    /// Returns `true` for [`Response::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, Response::Success(_))
    }

    /// The entity, if this is a success.
    pub fn entity(&self) -> Option<&Entity> {
        match self {
            Response::Success(entity) => Some(entity),
            Response::Failure(_) => None,
        }
    }

    /// The error, if this is a failure.
    pub fn error(&self) -> Option<&RequestError> {
        match self {
            Response::Success(_) => None,
            Response::Failure(error) => Some(error),
        }
    }

    /// When the underlying data or error was produced.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Response::Success(entity) => entity.timestamp(),
            Response::Failure(error) => error.timestamp,
        }
    }
}

impl From<Entity> for Response {
    fn from(entity: Entity) -> Self {
        Response::Success(entity)
    }
}

impl From<RequestError> for Response {
    fn from(error: RequestError) -> Self {
        Response::Failure(error)
    }
}

impl From<Result<Entity, RequestError>> for Response {
    fn from(result: Result<Entity, RequestError>) -> Self {
        match result {
            Ok(entity) => Response::Success(entity),
            Err(error) => Response::Failure(error),
        }
    }
}

/// A [`Response`] together with its freshness flag.
#[derive(Debug, Clone)]
pub struct ResponseInfo {
    /// The outcome.
    pub response: Response,
    /// `false` when the entity was reused after a `304 Not Modified`.
    pub is_new: bool,
}

impl ResponseInfo {
    /// Freshly produced response.
    pub fn new(response: impl Into<Response>) -> Self {
        ResponseInfo {
            response: response.into(),
            is_new: true,
        }
    }

    /// Response reusing previously known data.
    pub fn not_modified(entity: Entity) -> Self {
        ResponseInfo {
            response: Response::Success(entity),
            is_new: false,
        }
    }

    /// Cancellation outcome.
    pub fn cancellation(timestamp: DateTime<Utc>) -> Self {
        ResponseInfo::new(RequestError::cancelled(timestamp))
    }

    /// Returns `true` if this outcome reports a cancellation.
    pub fn is_cancellation(&self) -> bool {
        self.response
            .error()
            .is_some_and(RequestError::is_cancellation)
    }
}
