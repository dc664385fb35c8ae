//! Error types delivered through request completion.
//!
//! Every way a request can fail ends up as a [`RequestError`] in the
//! completion broadcast, never as a panic or an unhandled error:
//!
//! | Failure | `cause` | `http_status_code` |
//! |---------|---------|--------------------|
//! | networking layer error | [`ErrorCause::TransportFailure`] | if a response arrived |
//! | 4xx / 5xx status | `None` | `Some(status)` |
//! | 304 without local data | [`ErrorCause::NoLocalDataFor304`] | `Some(304)` |
//! | pipeline stage rejected the data | [`ErrorCause::PipelineStage`] | `None` |
//! | request cancelled | [`ErrorCause::RequestCancelled`] | `None` |
//!
//! [`RequestError::user_message`] is always populated so callers can show
//! something without inspecting the cause.

use std::error::Error as StdError;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::entity::Entity;

/// Shareable boxed error.
pub type SharedError = Arc<dyn StdError + Send + Sync>;

/// Broad category of a [`TransportError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportErrorKind {
    /// Could not connect to the remote host.
    Connect,
    /// The transport gave up waiting.
    Timeout,
    /// The response body could not be read.
    Body,
    /// Anything else.
    #[default]
    Other,
}

/// Error reported by a networking provider.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransportError {
    message: String,
    kind: TransportErrorKind,
    #[source]
    source: Option<SharedError>,
}

impl TransportError {
    /// Creates a transport error with a message and no underlying source.
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        TransportError {
            message: message.into(),
            kind,
            source: None,
        }
    }

    /// Wraps an underlying error, reusing its message.
    pub fn from_error<E>(kind: TransportErrorKind, error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        TransportError {
            message: error.to_string(),
            kind,
            source: Some(Arc::new(error)),
        }
    }

    /// Error category.
    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    /// Message suitable for display.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Underlying reason a request failed.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum ErrorCause {
    /// The networking layer failed.
    #[error(transparent)]
    TransportFailure(#[from] TransportError),

    /// The server answered `304 Not Modified` but there is no local data to reuse.
    #[error("server returned 304 Not Modified, but no local data is available")]
    NoLocalDataFor304,

    /// A pipeline stage could not process the response.
    #[error("pipeline stage failed: {message}")]
    PipelineStage {
        /// What went wrong.
        message: String,
        /// The stage's own error, if it had one.
        #[source]
        source: Option<SharedError>,
    },

    /// The request was cancelled before it completed.
    #[error("request cancelled")]
    RequestCancelled,

    /// The networking provider dropped the request without delivering an outcome.
    #[error("networking provider dropped the request without responding")]
    ProviderDisconnected,

    /// Background work for the request failed to run to completion.
    #[error("background task failed: {0}")]
    OffloadFailure(String),
}

/// Coarse classification of a [`RequestError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Networking-layer failure.
    Transport,
    /// Non-success HTTP status.
    HttpStatus,
    /// `304` with nothing to reuse.
    NoLocalDataFor304,
    /// Pipeline stage failure.
    PipelineStage,
    /// Cancellation.
    Cancelled,
    /// Provider misbehaved or background work failed.
    Internal,
}

/// Failure outcome of a request.
#[derive(Debug, Clone, Error)]
#[error("{user_message}")]
pub struct RequestError {
    /// Human-readable description; always populated.
    pub user_message: String,
    /// HTTP status code, if the failure came with a response.
    pub http_status_code: Option<u16>,
    /// Underlying cause, if any.
    #[source]
    pub cause: Option<ErrorCause>,
    /// Error response body, if the server sent one.
    pub entity: Option<Entity>,
    /// When the error occurred.
    pub timestamp: DateTime<Utc>,
}

impl RequestError {
    /// Creates an error with an explicit message and cause.
    pub fn new(
        user_message: impl Into<String>,
        cause: Option<ErrorCause>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        RequestError {
            user_message: user_message.into(),
            http_status_code: None,
            cause,
            entity: None,
            timestamp,
        }
    }

    /// Error for a non-success HTTP status, optionally carrying the error body.
    pub fn from_status(status: u16, entity: Option<Entity>, timestamp: DateTime<Utc>) -> Self {
        RequestError {
            user_message: status_message(status),
            http_status_code: Some(status),
            cause: None,
            entity,
            timestamp,
        }
    }

    /// Error for a transport failure.
    ///
    /// The message is the transport's own, or the phrase for `status` when
    /// that is blank and a status arrived.
    pub fn from_transport(
        error: TransportError,
        status: Option<u16>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let user_message = match status {
            _ if !error.message().trim().is_empty() => error.message().to_owned(),
            Some(status) => status_message(status),
            None => GENERIC_FAILURE_MESSAGE.to_owned(),
        };
        RequestError {
            http_status_code: status,
            ..RequestError::new(
                user_message,
                Some(ErrorCause::TransportFailure(error)),
                timestamp,
            )
        }
    }

    /// Error for a `304 Not Modified` with no prior entity.
    pub fn no_local_data_for_304(timestamp: DateTime<Utc>) -> Self {
        RequestError {
            http_status_code: Some(304),
            ..RequestError::new(
                "No data available",
                Some(ErrorCause::NoLocalDataFor304),
                timestamp,
            )
        }
    }

    /// Error a pipeline stage reports when it rejects a response.
    pub fn pipeline_stage(
        message: impl Into<String>,
        source: Option<SharedError>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let message = message.into();
        RequestError::new(
            message.clone(),
            Some(ErrorCause::PipelineStage { message, source }),
            timestamp,
        )
    }

    /// Outcome delivered to everyone waiting on a cancelled request.
    pub fn cancelled(timestamp: DateTime<Utc>) -> Self {
        RequestError::new(
            "Request cancelled",
            Some(ErrorCause::RequestCancelled),
            timestamp,
        )
    }

    /// Error for a provider that never delivered an outcome.
    pub fn provider_disconnected(timestamp: DateTime<Utc>) -> Self {
        RequestError::new(
            GENERIC_FAILURE_MESSAGE,
            Some(ErrorCause::ProviderDisconnected),
            timestamp,
        )
    }

    /// Error for background work that panicked or timed out.
    pub fn offload_failure(message: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        RequestError::new(
            GENERIC_FAILURE_MESSAGE,
            Some(ErrorCause::OffloadFailure(message.into())),
            timestamp,
        )
    }

    /// Returns `true` if this error only reports a cancellation.
    pub fn is_cancellation(&self) -> bool {
        matches!(self.cause, Some(ErrorCause::RequestCancelled))
    }

    /// Coarse classification of the failure.
    pub fn kind(&self) -> ErrorKind {
        match &self.cause {
            Some(ErrorCause::TransportFailure(_)) => ErrorKind::Transport,
            Some(ErrorCause::NoLocalDataFor304) => ErrorKind::NoLocalDataFor304,
            Some(ErrorCause::PipelineStage { .. }) => ErrorKind::PipelineStage,
            Some(ErrorCause::RequestCancelled) => ErrorKind::Cancelled,
            Some(ErrorCause::ProviderDisconnected) | Some(ErrorCause::OffloadFailure(_)) => {
                ErrorKind::Internal
            }
            None if self.http_status_code.is_some() => ErrorKind::HttpStatus,
            None => ErrorKind::Internal,
        }
    }
}

const GENERIC_FAILURE_MESSAGE: &str = "Request failed";

/// User-facing phrase for an HTTP status code.
///
/// Uses the canonical reason phrase in sentence case (`404` gives
/// `"Not found"`), falling back to a generic message for unknown codes.
pub fn status_message(status: u16) -> String {
    http::StatusCode::from_u16(status)
        .ok()
        .and_then(|status| status.canonical_reason())
        .map(sentence_case)
        .unwrap_or_else(|| format!("{GENERIC_FAILURE_MESSAGE} (HTTP {status})"))
}

fn sentence_case(phrase: &str) -> String {
    let lower = phrase.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => lower,
    }
}
