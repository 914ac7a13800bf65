//! The `Agent` trait — the contract every executor must fulfil.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::AgentError;

/// Per-invocation context handed to an agent.
///
/// Defined here (in the agents crate) so both the engine and individual agent
/// implementations can import it without a circular dependency.
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// ID of the current workflow run.
    pub run_id: uuid::Uuid,
    /// Name of the workflow being run.
    pub workflow: String,
    /// Name of the task being executed.
    pub task: String,
    /// Free-text description of the task.
    pub description: String,
    /// Free-text contract for what the task should produce.
    pub expected_output: String,
    /// Initial input supplied when the run was started.
    pub initial_input: Value,
    /// Outputs of the tasks listed in the task's `context`, keyed by name.
    pub context: BTreeMap<String, Value>,
}

impl TaskContext {
    /// A context for invoking an agent outside of a workflow run.
    pub fn detached(task: impl Into<String>) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4(),
            workflow: String::new(),
            task: task.into(),
            description: String::new(),
            expected_output: String::new(),
            initial_input: Value::Null,
            context: BTreeMap::new(),
        }
    }
}

/// The core executor trait.
///
/// The engine treats an agent as opaque: it hands over an input and reads back
/// a JSON value. For decision tasks that value is the outcome label.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Execute one task. `input` is the run's initial input for start tasks,
    /// otherwise the output of the task that activated this one.
    async fn invoke(&self, input: Value, ctx: &TaskContext) -> Result<Value, AgentError>;
}
