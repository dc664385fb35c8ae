//! Turning raw transport outcomes into typed responses.
//!
//! [`classify`] is the single place that decides whether a transport result
//! is data or an error:
//!
//! - a transport error, or a status of 400 and above, is a failure;
//! - `304 Not Modified` reuses the prior entity (`is_new == false`), or fails
//!   with [`ErrorCause::NoLocalDataFor304`](crate::ErrorCause::NoLocalDataFor304)
//!   when there is nothing to reuse;
//! - anything else becomes a fresh entity built from the body and headers.

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::entity::Entity;
use crate::error::RequestError;
use crate::response::ResponseInfo;
use crate::transport::TransportOutcome;

const NOT_MODIFIED: u16 = 304;
const FIRST_ERROR_STATUS: u16 = 400;

/// Classifies a transport outcome.
///
/// `prior` is the entity the requesting resource currently holds; it is
/// only consulted for `304` responses. `now` stamps whatever is created.
///
/// # Example
///
/// ```
/// use fetchbox_core::{classify, Headers, TransportOutcome};
/// use chrono::Utc;
///
/// let outcome = TransportOutcome::response(404, Headers::new(), "missing");
/// let info = classify(outcome, None, Utc::now());
/// let error = info.response.error().unwrap();
/// assert_eq!(error.http_status_code, Some(404));
/// assert_eq!(error.user_message, "Not found");
/// ```
pub fn classify(
    outcome: TransportOutcome,
    prior: Option<&Entity>,
    now: DateTime<Utc>,
) -> ResponseInfo {
    let TransportOutcome {
        status,
        headers,
        body,
        error,
    } = outcome;

    if let Some(error) = error {
        return ResponseInfo::new(RequestError::from_transport(error, status, now));
    }

    match status {
        Some(status) if status >= FIRST_ERROR_STATUS => {
            let entity = body
                .filter(|body| !body.is_empty())
                .map(|body| Entity::new(body, headers, now));
            ResponseInfo::new(RequestError::from_status(status, entity, now))
        }
        Some(NOT_MODIFIED) => match prior {
            Some(entity) => ResponseInfo::not_modified(entity.clone()),
            None => ResponseInfo::new(RequestError::no_local_data_for_304(now)),
        },
        _ => ResponseInfo::new(Entity::new(body.unwrap_or_else(Bytes::new), headers, now)),
    }
}
