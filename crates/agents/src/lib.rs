//! `agents` crate — the `Agent` trait, its context, and built-in agents.
//!
//! Every executor bound to a task must implement [`Agent`]. The engine crate
//! dispatches execution through this trait object.

pub mod builtin;
pub mod error;
pub mod mock;
pub mod traits;

pub use builtin::AgentSpec;
pub use error::AgentError;
pub use traits::{Agent, TaskContext};
