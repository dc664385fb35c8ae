//! Offload configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What to do with an offloaded task that runs too long.
///
/// Deserializes from `"none"`, `{ "cancel": "5s" }` or `{ "warn": "500ms" }`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPolicy {
    /// Let the task run until it finishes.
    #[default]
    None,
    /// Abandon the task after the duration.
    ///
    /// A request whose pipeline is abandoned fails with
    /// [`ErrorCause::OffloadFailure`](fetchbox_core::ErrorCause::OffloadFailure).
    Cancel(#[serde(with = "humantime_serde")] Duration),
    /// Log a warning once the task finishes if it took longer than the
    /// duration.
    Warn(#[serde(with = "humantime_serde")] Duration),
}

/// Configuration for the [`OffloadManager`](super::OffloadManager).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OffloadConfig {
    /// Cap on tasks running at once; `None` means unlimited.
    pub max_concurrent_tasks: Option<usize>,
    /// Handling of slow tasks.
    pub timeout_policy: TimeoutPolicy,
    /// Skip an entity cache read while one for the same resource is running.
    pub deduplicate: bool,
}

impl Default for OffloadConfig {
    fn default() -> Self {
        OffloadConfig {
            max_concurrent_tasks: None,
            timeout_policy: TimeoutPolicy::None,
            deduplicate: true,
        }
    }
}

impl OffloadConfig {
    /// Creates a builder starting from the defaults.
    pub fn builder() -> OffloadConfigBuilder {
        OffloadConfigBuilder::default()
    }
}

/// Builder for [`OffloadConfig`].
#[derive(Debug, Clone, Default)]
pub struct OffloadConfigBuilder {
    config: OffloadConfig,
}

impl OffloadConfigBuilder {
    /// Caps concurrently running tasks.
    pub fn max_concurrent_tasks(mut self, max: usize) -> Self {
        self.config.max_concurrent_tasks = Some(max);
        self
    }

    /// Sets the handling of slow tasks.
    pub fn timeout_policy(mut self, policy: TimeoutPolicy) -> Self {
        self.config.timeout_policy = policy;
        self
    }

    /// Abandons tasks that run longer than `duration`.
    pub fn timeout(self, duration: Duration) -> Self {
        self.timeout_policy(TimeoutPolicy::Cancel(duration))
    }

    /// Turns deduplication of entity cache reads on or off.
    pub fn deduplicate(mut self, enabled: bool) -> Self {
        self.config.deduplicate = enabled;
        self
    }

    /// Finishes the configuration.
    pub fn build(self) -> OffloadConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_with_humantime_durations() {
        let config: OffloadConfig = serde_json::from_str(
            r#"{ "max_concurrent_tasks": 4, "timeout_policy": { "cancel": "5s" } }"#,
        )
        .unwrap();
        assert_eq!(config.max_concurrent_tasks, Some(4));
        assert_eq!(config.timeout_policy, TimeoutPolicy::Cancel(Duration::from_secs(5)));
        assert!(config.deduplicate);
    }

    #[test]
    fn unit_policy_is_a_plain_string() {
        let policy: TimeoutPolicy = serde_json::from_str(r#""none""#).unwrap();
        assert_eq!(policy, TimeoutPolicy::None);
    }
}
