use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default time before successfully loaded data is considered stale.
pub const DEFAULT_EXPIRATION_TIME: Duration = Duration::from_secs(30);
/// Default time before a failed load may be retried.
pub const DEFAULT_RETRY_TIME: Duration = Duration::from_secs(1);
/// Default interval between progress reports.
pub const DEFAULT_PROGRESS_REPORTING_INTERVAL: Duration = Duration::from_millis(50);

/// Staleness and progress settings for a resource.
///
/// Durations are written in humantime format when (de)serialized:
///
/// ```
/// use std::time::Duration;
/// use fetchbox::policy::FreshnessPolicy;
///
/// let policy: FreshnessPolicy =
///     serde_json::from_str(r#"{ "expiration_time": "5m", "retry_time": "10s" }"#).unwrap();
/// assert_eq!(policy.expiration_time, Duration::from_secs(300));
/// assert_eq!(policy.retry_time, Duration::from_secs(10));
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct FreshnessPolicy {
    /// How long loaded data stays fresh (e.g. "30s", "5m").
    #[serde(default = "default_expiration_time", with = "humantime_serde")]
    pub expiration_time: Duration,
    /// How long after a failure before loading again is warranted.
    #[serde(default = "default_retry_time", with = "humantime_serde")]
    pub retry_time: Duration,
    /// How often request progress is sampled and reported.
    #[serde(
        default = "default_progress_reporting_interval",
        with = "humantime_serde"
    )]
    pub progress_reporting_interval: Duration,
}

fn default_expiration_time() -> Duration {
    DEFAULT_EXPIRATION_TIME
}

fn default_retry_time() -> Duration {
    DEFAULT_RETRY_TIME
}

fn default_progress_reporting_interval() -> Duration {
    DEFAULT_PROGRESS_REPORTING_INTERVAL
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self {
            expiration_time: DEFAULT_EXPIRATION_TIME,
            retry_time: DEFAULT_RETRY_TIME,
            progress_reporting_interval: DEFAULT_PROGRESS_REPORTING_INTERVAL,
        }
    }
}

impl FreshnessPolicy {
    /// Create a new builder for FreshnessPolicy.
    pub fn builder() -> FreshnessPolicyBuilder {
        FreshnessPolicyBuilder::default()
    }
}

/// Builder for [`FreshnessPolicy`].
#[derive(Debug, Clone, Default)]
pub struct FreshnessPolicyBuilder {
    policy: FreshnessPolicy,
}

impl FreshnessPolicyBuilder {
    /// Set the expiration time.
    pub fn expiration_time(mut self, duration: Duration) -> Self {
        self.policy.expiration_time = duration;
        self
    }

    /// Set the retry time.
    pub fn retry_time(mut self, duration: Duration) -> Self {
        self.policy.retry_time = duration;
        self
    }

    /// Set the progress reporting interval.
    pub fn progress_reporting_interval(mut self, interval: Duration) -> Self {
        self.policy.progress_reporting_interval = interval;
        self
    }

    /// Build the FreshnessPolicy.
    pub fn build(self) -> FreshnessPolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_use_defaults() {
        let policy: FreshnessPolicy = serde_json::from_str("{}").unwrap();
        assert_eq!(policy, FreshnessPolicy::default());
    }

    #[test]
    fn serializes_as_humantime() {
        let policy = FreshnessPolicy::builder()
            .expiration_time(Duration::from_secs(90))
            .build();
        let json = serde_json::to_value(policy).unwrap();
        assert_eq!(json["expiration_time"], "1m 30s");
        assert_eq!(json["progress_reporting_interval"], "50ms");
    }
}
