//! `engine` crate — task-graph data model, graph validation, the result store,
//! and the execution engine.

pub mod config;
pub mod error;
pub mod executor;
pub mod graph;
pub mod models;
pub mod store;

pub use config::{EngineConfig, ExecutionMode, FailurePolicy};
pub use error::{EngineError, GraphError, RunFailure};
pub use executor::{AgentRegistry, WorkflowExecutor, FAILED_OUTCOME};
pub use graph::{NodeId, WorkflowGraph};
pub use models::{Route, TaskNode, Workflow};
pub use store::{ResultStore, TaskOutput, TaskRecord};
