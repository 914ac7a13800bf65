//! Engine configuration.
//!
//! Every field has a default, so an empty JSON object (or a missing `engine`
//! section in a workflow file) yields [`EngineConfig::default`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What happens when an agent fails (after retries).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Store the failure under the task's name and keep going. A failed
    /// decision task routes on the `"failed"` outcome, if its table has one.
    #[default]
    Record,
    /// Stop the run with `EngineError::NodeExecution`.
    Abort,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One invocation at a time, in ready-queue order.
    #[default]
    Sequential,
    /// Independent ready tasks are invoked together; results are still
    /// applied in ready-queue order.
    Concurrent,
}

/// Tuning knobs for the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub failure_policy: FailurePolicy,
    pub mode: ExecutionMode,
    /// Upper bound on task invocations per run. `None` disables the guard,
    /// in which case a decision loop that never halts runs forever.
    pub max_steps: Option<usize>,
    /// Maximum number of times a retryable agent failure will be retried.
    pub max_retries: u32,
    /// Base delay for exponential back-off between retries.
    #[serde(rename = "retry_base_delay_ms", with = "millis")]
    pub retry_base_delay: Duration,
    /// Per-invocation time limit.
    #[serde(rename = "task_timeout_ms", with = "opt_millis")]
    pub task_timeout: Option<Duration>,
    /// How long in-flight invocations may keep running after cancellation.
    #[serde(rename = "cancel_grace_ms", with = "millis")]
    pub cancel_grace: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::Record,
            mode: ExecutionMode::Sequential,
            max_steps: Some(10_000),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(100),
            task_timeout: None,
            cancel_grace: Duration::ZERO,
        }
    }
}

impl EngineConfig {
    /// Back-off before retry number `attempt` (1-based).
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        self.retry_base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

mod opt_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(d).map(|ms| ms.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_object_yields_defaults() {
        let config: EngineConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn fields_use_millisecond_names() {
        let config: EngineConfig = serde_json::from_value(json!({
            "failure_policy": "abort",
            "mode": "concurrent",
            "max_steps": null,
            "retry_base_delay_ms": 20,
            "task_timeout_ms": 1500
        }))
        .unwrap();

        assert_eq!(config.failure_policy, FailurePolicy::Abort);
        assert_eq!(config.mode, ExecutionMode::Concurrent);
        assert_eq!(config.max_steps, None);
        assert_eq!(config.retry_base_delay, Duration::from_millis(20));
        assert_eq!(config.task_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn retry_delay_doubles() {
        let config = EngineConfig::default();
        assert_eq!(config.retry_delay(1), Duration::from_millis(100));
        assert_eq!(config.retry_delay(2), Duration::from_millis(200));
        assert_eq!(config.retry_delay(4), Duration::from_millis(800));
    }
}
