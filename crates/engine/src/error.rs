//! Engine-level error types.

use thiserror::Error;

use crate::store::ResultStore;

/// Errors raised while turning a [`Workflow`](crate::Workflow) into a
/// [`WorkflowGraph`](crate::WorkflowGraph). All of them are fatal and are
/// reported before any task executes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// Two or more tasks share the same name.
    #[error("duplicate task name: '{0}'")]
    DuplicateNode(String),

    /// A transition or context entry names a task that doesn't exist.
    #[error("task '{referenced_by}' references unknown task '{missing}'")]
    DanglingReference {
        missing: String,
        referenced_by: String,
    },

    /// No task is flagged `is_start`.
    #[error("workflow has no start task")]
    NoStartNode,

    /// A task declares both static successors and a decision table.
    #[error("task '{0}' declares both `next` and `conditions`")]
    ConflictingTransitions(String),

    /// A decision task with no outcomes can never route anywhere.
    #[error("task '{0}' has an empty decision table")]
    EmptyDecisionTable(String),
}

/// Errors produced while running a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    // ------ Setup errors ------

    /// A task's agent key has no entry in the registry.
    #[error("task '{task}' uses agent '{agent}', which is not registered")]
    UnknownAgent { task: String, agent: String },

    // ------ Execution errors ------

    /// A task was scheduled before one of its context tasks produced a result.
    #[error("task '{task}' needs the result of '{missing}', which has not run yet")]
    MissingContext { task: String, missing: String },

    /// A decision task produced an outcome its table has no entry for.
    #[error("task '{task}' produced outcome '{outcome}', which its decision table does not handle")]
    UnknownOutcome { task: String, outcome: String },

    /// The run executed more tasks than `max_steps` allows.
    #[error("step limit of {limit} exceeded")]
    StepLimitExceeded { limit: usize },

    /// An agent failed and the engine is configured to abort.
    #[error("task '{task}' failed: {message}")]
    NodeExecution { task: String, message: String },

    /// The run was cancelled by the caller.
    #[error("run cancelled")]
    Cancelled,

    /// `run_blocking` could not start its runtime.
    #[error("failed to start async runtime: {0}")]
    Runtime(String),
}

/// A failed run: the error that stopped it plus every result recorded
/// before it stopped.
#[derive(Debug, Error)]
#[error("workflow run failed")]
pub struct RunFailure {
    #[source]
    pub error: EngineError,
    pub partial: ResultStore,
}

impl RunFailure {
    pub(crate) fn new(error: EngineError, partial: ResultStore) -> Self {
        Self { error, partial }
    }
}
