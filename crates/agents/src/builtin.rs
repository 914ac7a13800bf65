//! Built-in agents that can be declared in a workflow file.
//!
//! ```json
//! { "kind": "field", "path": "incident.severity" }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::{Agent, AgentError, TaskContext};

/// Declarative description of a built-in agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentSpec {
    /// Always returns `value`.
    Constant { value: Value },
    /// Returns its input unchanged.
    Echo,
    /// Returns the value at a dot-separated `path`, read from the input or,
    /// when `context` is set, from that task's gathered output.
    Field {
        path: String,
        #[serde(default)]
        context: Option<String>,
    },
    /// Returns `outputs` one per invocation, repeating the last. Each run
    /// (by `TaskContext::run_id`) starts again from the first output.
    Script { outputs: Vec<Value> },
    /// Always fails.
    Fail {
        message: String,
        #[serde(default)]
        retryable: bool,
    },
}

impl AgentSpec {
    /// Instantiate the agent described by this spec.
    ///
    /// # Errors
    /// [`AgentError::InvalidSpec`] if the spec cannot produce a usable agent.
    pub fn build(&self) -> Result<Arc<dyn Agent>, AgentError> {
        let agent: Arc<dyn Agent> = match self {
            Self::Constant { value } => Arc::new(ConstantAgent(value.clone())),
            Self::Echo => Arc::new(EchoAgent),
            Self::Field { path, context } => {
                if path.is_empty() {
                    return Err(AgentError::InvalidSpec("field path is empty".into()));
                }
                Arc::new(FieldAgent {
                    path: path.clone(),
                    context: context.clone(),
                })
            }
            Self::Script { outputs } => {
                if outputs.is_empty() {
                    return Err(AgentError::InvalidSpec("script has no outputs".into()));
                }
                Arc::new(ScriptAgent {
                    outputs: outputs.clone(),
                    cursors: Mutex::new(HashMap::new()),
                })
            }
            Self::Fail { message, retryable } => Arc::new(FailAgent {
                message: message.clone(),
                retryable: *retryable,
            }),
        };
        Ok(agent)
    }
}

struct ConstantAgent(Value);

#[async_trait]
impl Agent for ConstantAgent {
    async fn invoke(&self, _input: Value, _ctx: &TaskContext) -> Result<Value, AgentError> {
        Ok(self.0.clone())
    }
}

struct EchoAgent;

#[async_trait]
impl Agent for EchoAgent {
    async fn invoke(&self, input: Value, _ctx: &TaskContext) -> Result<Value, AgentError> {
        Ok(input)
    }
}

struct FieldAgent {
    path: String,
    context: Option<String>,
}

#[async_trait]
impl Agent for FieldAgent {
    async fn invoke(&self, input: Value, ctx: &TaskContext) -> Result<Value, AgentError> {
        let source = match &self.context {
            Some(name) => ctx.context.get(name).ok_or_else(|| {
                AgentError::Fatal(format!("task '{name}' is not in the gathered context"))
            })?,
            None => &input,
        };

        extract_path(source, &self.path).cloned().ok_or_else(|| {
            AgentError::Fatal(format!("no value at path '{}'", self.path))
        })
    }
}

struct ScriptAgent {
    outputs: Vec<Value>,
    /// Next step per run.
    cursors: Mutex<HashMap<Uuid, usize>>,
}

#[async_trait]
impl Agent for ScriptAgent {
    async fn invoke(&self, _input: Value, ctx: &TaskContext) -> Result<Value, AgentError> {
        let step = {
            let mut cursors = self.cursors.lock().unwrap_or_else(PoisonError::into_inner);
            let cursor = cursors.entry(ctx.run_id).or_insert(0);
            let step = *cursor;
            *cursor += 1;
            step
        };
        let index = step.min(self.outputs.len() - 1);
        debug!(task = %ctx.task, step, "script agent emitting output {index}");
        Ok(self.outputs[index].clone())
    }
}

struct FailAgent {
    message: String,
    retryable: bool,
}

#[async_trait]
impl Agent for FailAgent {
    async fn invoke(&self, _input: Value, _ctx: &TaskContext) -> Result<Value, AgentError> {
        if self.retryable {
            Err(AgentError::Retryable(self.message.clone()))
        } else {
            Err(AgentError::Fatal(self.message.clone()))
        }
    }
}

/// Walk a dot-separated path through objects (by key) and arrays (by index).
fn extract_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, part| match current {
        Value::Array(items) => part.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => current.get(part),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extract_path_walks_objects_and_arrays() {
        let value = json!({ "incident": { "units": [{ "id": "u1" }, { "id": "u2" }] } });

        assert_eq!(extract_path(&value, "incident.units.1.id"), Some(&json!("u2")));
        assert_eq!(extract_path(&value, "incident.missing"), None);
        assert_eq!(extract_path(&value, "incident.units.x"), None);
    }

    #[test]
    fn spec_deserializes_from_tagged_json() {
        let spec: AgentSpec =
            serde_json::from_value(json!({ "kind": "field", "path": "severity" })).unwrap();
        assert_eq!(
            spec,
            AgentSpec::Field { path: "severity".into(), context: None }
        );

        let spec: AgentSpec =
            serde_json::from_value(json!({ "kind": "fail", "message": "down" })).unwrap();
        assert_eq!(spec, AgentSpec::Fail { message: "down".into(), retryable: false });
    }

    #[test]
    fn empty_script_is_rejected() {
        let err = AgentSpec::Script { outputs: vec![] }.build().err();
        assert!(matches!(err, Some(AgentError::InvalidSpec(_))));
    }

    #[tokio::test]
    async fn field_agent_reads_input_or_context() {
        let ctx = {
            let mut ctx = TaskContext::detached("dispatch");
            ctx.context.insert("triage".into(), json!({ "unit": "ambulance-7" }));
            ctx
        };

        let from_input = AgentSpec::Field { path: "severity".into(), context: None }
            .build()
            .unwrap();
        assert_eq!(
            from_input.invoke(json!({ "severity": "low" }), &ctx).await,
            Ok(json!("low"))
        );

        let from_context = AgentSpec::Field {
            path: "unit".into(),
            context: Some("triage".into()),
        }
        .build()
        .unwrap();
        assert_eq!(from_context.invoke(json!(null), &ctx).await, Ok(json!("ambulance-7")));

        let missing = from_input.invoke(json!({}), &ctx).await.unwrap_err();
        assert!(matches!(missing, AgentError::Fatal(_)));
    }

    #[tokio::test]
    async fn script_agent_repeats_last_output() {
        let agent = AgentSpec::Script { outputs: vec![json!("retry"), json!("done")] }
            .build()
            .unwrap();
        let ctx = TaskContext::detached("optimize");

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(agent.invoke(Value::Null, &ctx).await.unwrap());
        }
        assert_eq!(seen, vec![json!("retry"), json!("done"), json!("done")]);
    }

    #[tokio::test]
    async fn script_agent_restarts_for_each_run() {
        let agent = AgentSpec::Script { outputs: vec![json!("retry"), json!("done")] }
            .build()
            .unwrap();
        let first = TaskContext::detached("optimize");
        let second = TaskContext::detached("optimize");

        assert_eq!(agent.invoke(Value::Null, &first).await, Ok(json!("retry")));
        assert_eq!(agent.invoke(Value::Null, &first).await, Ok(json!("done")));
        assert_eq!(agent.invoke(Value::Null, &second).await, Ok(json!("retry")));
        assert_eq!(agent.invoke(Value::Null, &first).await, Ok(json!("done")));
    }

    #[tokio::test]
    async fn fail_agent_honours_retryable_flag() {
        let ctx = TaskContext::detached("broken");
        let retryable = AgentSpec::Fail { message: "later".into(), retryable: true }
            .build()
            .unwrap();
        assert_eq!(
            retryable.invoke(Value::Null, &ctx).await,
            Err(AgentError::Retryable("later".into()))
        );
    }
}
