use chrono::{DateTime, TimeDelta, Utc};
use fetchbox_core::{Entity, RequestError};

use crate::policy::FreshnessPolicy;
use crate::request::Request;

/// Mutable state of one resource. Only touched on the coordination context.
#[derive(Debug, Default)]
pub(super) struct ResourceState {
    pub(super) latest_data: Option<Entity>,
    pub(super) latest_error: Option<RequestError>,
    /// One-shot: forces the next `load_if_needed` to load. Survives cancelled loads.
    pub(super) invalidated: bool,
    /// An entity cache read was issued and may still be applied.
    pub(super) pending_cache_read: bool,
    pub(super) load_requests: Vec<Request>,
    pub(super) all_requests: Vec<Request>,
}

impl ResourceState {
    /// The later of the data and error timestamps.
    pub(super) fn timestamp(&self) -> Option<DateTime<Utc>> {
        let data = self.latest_data.as_ref().map(Entity::timestamp);
        let error = self.latest_error.as_ref().map(|error| error.timestamp);
        data.max(error)
    }

    pub(super) fn is_up_to_date(&self, policy: &FreshnessPolicy, now: DateTime<Utc>) -> bool {
        if self.invalidated {
            return false;
        }
        let Some(timestamp) = self.timestamp() else {
            return false;
        };
        let max_age = if self.latest_error.is_some() {
            policy.retry_time
        } else {
            policy.expiration_time
        };
        let max_age = TimeDelta::from_std(max_age).unwrap_or(TimeDelta::MAX);
        now - timestamp <= max_age
    }

    /// Removes the request with `id`; returns `false` if it was not tracked.
    pub(super) fn untrack(requests: &mut Vec<Request>, id: u64) -> bool {
        match requests.iter().position(|tracked| tracked.id() == id) {
            Some(index) => {
                requests.remove(index);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn at(seconds: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + seconds, 0).unwrap()
    }

    fn policy() -> FreshnessPolicy {
        FreshnessPolicy::builder()
            .expiration_time(Duration::from_secs(30))
            .retry_time(Duration::from_secs(5))
            .build()
    }

    #[test]
    fn never_loaded_is_stale() {
        assert!(!ResourceState::default().is_up_to_date(&policy(), at(0)));
    }

    #[test]
    fn data_expires_after_expiration_time() {
        let state = ResourceState {
            latest_data: Some(Entity::binary("x", at(0))),
            ..Default::default()
        };
        assert!(state.is_up_to_date(&policy(), at(30)));
        assert!(!state.is_up_to_date(&policy(), at(31)));
    }

    #[test]
    fn errors_use_retry_time_from_the_later_timestamp() {
        let state = ResourceState {
            latest_data: Some(Entity::binary("x", at(0))),
            latest_error: Some(RequestError::from_status(500, None, at(20))),
            ..Default::default()
        };
        assert_eq!(state.timestamp(), Some(at(20)));
        assert!(state.is_up_to_date(&policy(), at(25)));
        assert!(!state.is_up_to_date(&policy(), at(26)));
    }

    #[test]
    fn invalidated_is_never_up_to_date() {
        let state = ResourceState {
            latest_data: Some(Entity::binary("x", at(0))),
            invalidated: true,
            ..Default::default()
        };
        assert!(!state.is_up_to_date(&policy(), at(1)));
    }
}
