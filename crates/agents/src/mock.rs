//! `MockAgent` — a test double for `Agent`.
//!
//! Useful in unit and integration tests where a real agent implementation is
//! either unavailable or irrelevant.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::{Agent, AgentError, TaskContext};

/// Behaviour injected into `MockAgent` at construction time.
pub enum MockBehaviour {
    /// Return a specific JSON value.
    ReturnValue(Value),
    /// Return the values in order, repeating the last one once exhausted.
    Sequence(Vec<Value>),
    /// Return the input unchanged.
    Echo,
    /// Fail with a `Retryable` error `failures` times, then return `value`.
    FlakyThen { failures: usize, value: Value },
    /// Fail with a `Retryable` error.
    FailRetryable(String),
    /// Fail with a `Fatal` error.
    FailFatal(String),
}

/// One recorded invocation.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub input: Value,
    pub context: BTreeMap<String, Value>,
}

/// A mock agent that records every call it receives and returns a
/// programmer-specified result.
pub struct MockAgent {
    /// Label used in test assertions.
    pub name: String,
    /// What the agent will do when `invoke` is called.
    pub behaviour: MockBehaviour,
    /// All calls seen by this agent (in call order).
    pub calls: Arc<Mutex<Vec<MockCall>>>,
}

impl MockAgent {
    fn with(name: impl Into<String>, behaviour: MockBehaviour) -> Self {
        Self {
            name: name.into(),
            behaviour,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock that always succeeds with the given value.
    pub fn returning(name: impl Into<String>, value: Value) -> Self {
        Self::with(name, MockBehaviour::ReturnValue(value))
    }

    /// Create a mock that walks through `values`, one per call.
    pub fn sequence(name: impl Into<String>, values: Vec<Value>) -> Self {
        Self::with(name, MockBehaviour::Sequence(values))
    }

    /// Create a mock that returns whatever it was given.
    pub fn echo(name: impl Into<String>) -> Self {
        Self::with(name, MockBehaviour::Echo)
    }

    /// Create a mock that fails retryably `failures` times before succeeding.
    pub fn flaky(name: impl Into<String>, failures: usize, value: Value) -> Self {
        Self::with(name, MockBehaviour::FlakyThen { failures, value })
    }

    /// Create a mock that always fails with a `Fatal` error.
    pub fn failing_fatal(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with(name, MockBehaviour::FailFatal(msg.into()))
    }

    /// Create a mock that always fails with a `Retryable` error.
    pub fn failing_retryable(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with(name, MockBehaviour::FailRetryable(msg.into()))
    }

    /// Number of times this agent has been invoked.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Snapshot of every recorded call.
    pub fn recorded(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Agent for MockAgent {
    async fn invoke(&self, input: Value, ctx: &TaskContext) -> Result<Value, AgentError> {
        let call_index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(MockCall {
                input: input.clone(),
                context: ctx.context.clone(),
            });
            calls.len() - 1
        };

        match &self.behaviour {
            MockBehaviour::ReturnValue(v) => Ok(v.clone()),
            MockBehaviour::Sequence(values) => Ok(values
                .get(call_index)
                .or_else(|| values.last())
                .cloned()
                .unwrap_or(Value::Null)),
            MockBehaviour::Echo => Ok(input),
            MockBehaviour::FlakyThen { failures, value } => {
                if call_index < *failures {
                    Err(AgentError::Retryable(format!(
                        "{} attempt {} failed",
                        self.name,
                        call_index + 1
                    )))
                } else {
                    Ok(value.clone())
                }
            }
            MockBehaviour::FailRetryable(msg) => Err(AgentError::Retryable(msg.clone())),
            MockBehaviour::FailFatal(msg)     => Err(AgentError::Fatal(msg.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn sequence_repeats_last_value() {
        let agent = MockAgent::sequence("seq", vec![json!("retry"), json!("done")]);
        let ctx = TaskContext::detached("seq");

        assert_eq!(agent.invoke(json!(null), &ctx).await, Ok(json!("retry")));
        assert_eq!(agent.invoke(json!(null), &ctx).await, Ok(json!("done")));
        assert_eq!(agent.invoke(json!(null), &ctx).await, Ok(json!("done")));
        assert_eq!(agent.call_count(), 3);
    }

    #[tokio::test]
    async fn flaky_recovers_after_failures() {
        let agent = MockAgent::flaky("flaky", 2, json!({ "ok": true }));
        let ctx = TaskContext::detached("flaky");

        assert!(agent.invoke(json!(1), &ctx).await.unwrap_err().is_retryable());
        assert!(agent.invoke(json!(2), &ctx).await.unwrap_err().is_retryable());
        assert_eq!(agent.invoke(json!(3), &ctx).await, Ok(json!({ "ok": true })));

        let inputs: Vec<Value> = agent.recorded().into_iter().map(|c| c.input).collect();
        assert_eq!(inputs, vec![json!(1), json!(2), json!(3)]);
    }

    #[tokio::test]
    async fn fatal_mock_is_not_retryable() {
        let agent = MockAgent::failing_fatal("boom", "broken");
        let err = agent
            .invoke(json!({}), &TaskContext::detached("boom"))
            .await
            .unwrap_err();
        assert_eq!(err, AgentError::Fatal("broken".into()));
        assert!(!err.is_retryable());
    }
}
