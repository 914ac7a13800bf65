//! Workflow execution engine.
//!
//! `WorkflowExecutor` is the central orchestrator:
//! 1. Checks that every task's agent is registered.
//! 2. Seeds a FIFO ready queue with the start tasks.
//! 3. Pops ready tasks, gathers their context from the result store and
//!    dispatches them via `Agent`.
//! 4. Records each result and enqueues successors: the static `next` list for
//!    plain tasks, the route selected by the output for decision tasks.
//! 5. Handles `AgentError::Retryable` (up to `max_retries`) and applies the
//!    configured `FailurePolicy` to anything that still fails.
//!
//! Cycles are not detected. A decision loop that never reaches a halting
//! outcome is a workflow bug; `max_steps` turns it into
//! `EngineError::StepLimitExceeded` instead of an endless run.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use agents::{Agent, TaskContext};

use crate::config::{EngineConfig, ExecutionMode, FailurePolicy};
use crate::error::{EngineError, RunFailure};
use crate::graph::{NodeId, WorkflowGraph};
use crate::store::{ResultStore, TaskOutput};

/// Outcome label a failed decision task routes on under `FailurePolicy::Record`.
pub const FAILED_OUTCOME: &str = "failed";

// ---------------------------------------------------------------------------
// Agent registry
// ---------------------------------------------------------------------------

/// Maps agent keys (as used in `TaskNode::agent`) to implementations.
pub type AgentRegistry = HashMap<String, Arc<dyn Agent>>;

// ---------------------------------------------------------------------------
// Internal run state
// ---------------------------------------------------------------------------

/// An entry of the ready queue: a task plus the input it will receive.
#[derive(Debug, Clone)]
struct Activation {
    node: NodeId,
    input: Value,
}

/// A task whose context has been gathered and is ready to invoke.
struct Prepared {
    node: NodeId,
    input: Value,
    agent: Arc<dyn Agent>,
    ctx: TaskContext,
}

type Invocation = Result<Value, String>;

// ---------------------------------------------------------------------------
// WorkflowExecutor
// ---------------------------------------------------------------------------

/// Runs validated workflow graphs against a set of agents.
///
/// The executor holds no per-run state: one instance can drive any number of
/// runs, concurrently or not, over the same or different graphs.
pub struct WorkflowExecutor {
    registry: AgentRegistry,
    config: EngineConfig,
}

impl WorkflowExecutor {
    /// Create a new executor.
    pub fn new(registry: AgentRegistry, config: EngineConfig) -> Self {
        Self { registry, config }
    }

    /// Run the workflow to completion and return its result store.
    ///
    /// `initial_input` is handed to start tasks only; it defaults to `null`.
    ///
    /// # Errors
    /// A [`RunFailure`] carrying the [`EngineError`] that stopped the run and
    /// the results recorded before it stopped.
    pub async fn run(
        &self,
        graph: &WorkflowGraph,
        initial_input: Option<Value>,
    ) -> Result<ResultStore, RunFailure> {
        self.run_with_cancel(graph, initial_input, CancellationToken::new())
            .await
    }

    /// Synchronous variant of [`run`](Self::run) with identical semantics.
    ///
    /// Drives the run on a private current-thread runtime, so it must not be
    /// called from inside an async context.
    pub fn run_blocking(
        &self,
        graph: &WorkflowGraph,
        initial_input: Option<Value>,
    ) -> Result<ResultStore, RunFailure> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| {
                RunFailure::new(EngineError::Runtime(e.to_string()), ResultStore::new())
            })?;
        runtime.block_on(self.run(graph, initial_input))
    }

    /// Like [`run`](Self::run), stopping with [`EngineError::Cancelled`] once
    /// `cancel` fires.
    ///
    /// In-flight invocations get `cancel_grace` to finish; those that do are
    /// recorded, the rest are abandoned without a store entry.
    pub async fn run_with_cancel(
        &self,
        graph: &WorkflowGraph,
        initial_input: Option<Value>,
        cancel: CancellationToken,
    ) -> Result<ResultStore, RunFailure> {
        let run_id = Uuid::new_v4();
        self.drive(graph, initial_input.unwrap_or(Value::Null), cancel, run_id)
            .await
    }

    #[instrument(
        name = "workflow_run",
        skip_all,
        fields(workflow = %graph.name(), %run_id)
    )]
    async fn drive(
        &self,
        graph: &WorkflowGraph,
        initial_input: Value,
        cancel: CancellationToken,
        run_id: Uuid,
    ) -> Result<ResultStore, RunFailure> {
        let mut store = ResultStore::new();

        if let Err(e) = self.check_agents(graph) {
            error!("{e}");
            return Err(RunFailure::new(e, store));
        }

        let mut queue: VecDeque<Activation> = graph
            .start_nodes()
            .iter()
            .map(|&node| Activation { node, input: initial_input.clone() })
            .collect();

        info!(
            "executing {} tasks from {} start task(s) ({:?} mode)",
            graph.len(),
            queue.len(),
            self.config.mode
        );

        let mut steps = 0usize;

        while !queue.is_empty() {
            if cancel.is_cancelled() {
                warn!("run cancelled with {} task(s) still queued", queue.len());
                return Err(RunFailure::new(EngineError::Cancelled, store));
            }

            // ------------------------------------------------------------------
            // Pick the next batch, bounded by the step budget.
            // ------------------------------------------------------------------
            let budget = match self.config.max_steps {
                Some(limit) if steps >= limit => {
                    error!("step limit of {limit} exceeded");
                    return Err(RunFailure::new(
                        EngineError::StepLimitExceeded { limit },
                        store,
                    ));
                }
                Some(limit) => limit - steps,
                None => usize::MAX,
            };
            let take = self.batch_len(graph, &store, &queue).min(budget);
            steps += take;

            // ------------------------------------------------------------------
            // Gather context for each task in the batch.
            // ------------------------------------------------------------------
            let mut batch = Vec::with_capacity(take);
            for activation in queue.drain(..take) {
                match self.prepare(graph, &store, activation, &initial_input, run_id) {
                    Ok(prepared) => batch.push(prepared),
                    Err(e) => {
                        error!("{e}");
                        return Err(RunFailure::new(e, store));
                    }
                }
            }

            // ------------------------------------------------------------------
            // Invoke, then apply results in queue order.
            // ------------------------------------------------------------------
            let (results, cancelled) = self.invoke_batch(&batch, &cancel).await;

            if cancelled {
                let mut abandoned = 0;
                for (prepared, result) in batch.iter().zip(results) {
                    match result {
                        Some(result) => {
                            store.record(&graph.get(prepared.node).name, to_output(result))
                        }
                        None => abandoned += 1,
                    }
                }
                warn!("run cancelled; abandoned {abandoned} in-flight invocation(s)");
                return Err(RunFailure::new(EngineError::Cancelled, store));
            }

            for (prepared, result) in batch.into_iter().zip(results) {
                // Every slot is filled when the batch was not cancelled.
                let result = result.unwrap_or_else(|| Err("invocation abandoned".into()));
                if let Err(e) = self.apply(graph, &mut store, &mut queue, prepared.node, result) {
                    error!("{e}");
                    return Err(RunFailure::new(e, store));
                }
            }
        }

        info!("workflow '{}' finished after {steps} step(s)", graph.name());
        Ok(store)
    }

    // -----------------------------------------------------------------------
    // Internal: scheduling helpers.
    // -----------------------------------------------------------------------

    fn check_agents(&self, graph: &WorkflowGraph) -> Result<(), EngineError> {
        match graph.iter().find(|(_, t)| !self.registry.contains_key(&t.agent)) {
            Some((_, task)) => Err(EngineError::UnknownAgent {
                task: task.name.clone(),
                agent: task.agent.clone(),
            }),
            None => Ok(()),
        }
    }

    /// How many queued activations may be invoked together.
    ///
    /// Sequential mode always takes one. Concurrent mode takes the longest
    /// queue prefix in which no task appears twice and every task after the
    /// first has its whole `context` already in the store, produced by none
    /// of the prefix members. A task with missing context therefore only ever
    /// heads a batch, and fails there after everything queued before it ran.
    fn batch_len(
        &self,
        graph: &WorkflowGraph,
        store: &ResultStore,
        queue: &VecDeque<Activation>,
    ) -> usize {
        if self.config.mode == ExecutionMode::Sequential {
            return queue.len().min(1);
        }

        let mut members: HashSet<NodeId> = HashSet::new();
        for activation in queue {
            let ready = members.is_empty()
                || graph.context_of(activation.node).iter().all(|dep| {
                    !members.contains(dep) && store.contains(&graph.get(*dep).name)
                });
            if !ready || !members.insert(activation.node) {
                break;
            }
        }
        members.len()
    }

    fn prepare(
        &self,
        graph: &WorkflowGraph,
        store: &ResultStore,
        activation: Activation,
        initial_input: &Value,
        run_id: Uuid,
    ) -> Result<Prepared, EngineError> {
        let task = graph.get(activation.node);

        let mut context = BTreeMap::new();
        for &dep in graph.context_of(activation.node) {
            let dep_name = &graph.get(dep).name;
            let record = store.get(dep_name).ok_or_else(|| EngineError::MissingContext {
                task: task.name.clone(),
                missing: dep_name.clone(),
            })?;
            context.insert(dep_name.clone(), record.output.to_value());
        }

        let agent = self.registry.get(&task.agent).cloned().ok_or_else(|| {
            EngineError::UnknownAgent {
                task: task.name.clone(),
                agent: task.agent.clone(),
            }
        })?;

        Ok(Prepared {
            node: activation.node,
            input: activation.input,
            agent,
            ctx: TaskContext {
                run_id,
                workflow: graph.name().to_owned(),
                task: task.name.clone(),
                description: task.description.clone(),
                expected_output: task.expected_output.clone(),
                initial_input: initial_input.clone(),
                context,
            },
        })
    }

    /// Record one result and enqueue the tasks it activates.
    fn apply(
        &self,
        graph: &WorkflowGraph,
        store: &mut ResultStore,
        queue: &mut VecDeque<Activation>,
        node: NodeId,
        result: Invocation,
    ) -> Result<(), EngineError> {
        let task = graph.get(node);

        let (outcome, handoff) = match result {
            Ok(output) => {
                store.record(&task.name, TaskOutput::Completed { output: output.clone() });
                info!("task '{}' succeeded", task.name);
                (outcome_label(&output), output)
            }
            Err(message) => {
                let failure = TaskOutput::Failed { error: message.clone() };
                let handoff = failure.to_value();
                store.record(&task.name, failure);

                if self.config.failure_policy == FailurePolicy::Abort {
                    return Err(EngineError::NodeExecution {
                        task: task.name.clone(),
                        message,
                    });
                }
                warn!("task '{}' failed, recorded and continuing: {message}", task.name);
                (Ok(FAILED_OUTCOME.to_owned()), handoff)
            }
        };

        let successors = if graph.is_decision(node) {
            let label = outcome.map_err(|rendered| EngineError::UnknownOutcome {
                task: task.name.clone(),
                outcome: rendered,
            })?;
            let targets = graph.successors(node, &label).ok_or_else(|| {
                EngineError::UnknownOutcome {
                    task: task.name.clone(),
                    outcome: label.clone(),
                }
            })?;
            if targets.is_empty() {
                info!("task '{}' routed '{label}' to halt", task.name);
            } else {
                info!(
                    "task '{}' routed '{label}' to {:?}",
                    task.name,
                    targets.iter().map(|&t| &graph.get(t).name).collect::<Vec<_>>()
                );
            }
            targets
        } else {
            graph.successors(node, "").unwrap_or_default()
        };

        queue.extend(successors.iter().map(|&next| Activation {
            node: next,
            input: handoff.clone(),
        }));
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internal: invocation.
    // -----------------------------------------------------------------------

    /// Invoke every prepared task concurrently.
    ///
    /// Returns one slot per task (in batch order) and whether the run was
    /// cancelled. After cancellation, slots of invocations that did not finish
    /// within `cancel_grace` stay `None`.
    async fn invoke_batch(
        &self,
        batch: &[Prepared],
        cancel: &CancellationToken,
    ) -> (Vec<Option<Invocation>>, bool) {
        let mut results: Vec<Option<Invocation>> = vec![None; batch.len()];
        let mut pending: FuturesUnordered<_> = batch
            .iter()
            .enumerate()
            .map(|(i, prepared)| async move { (i, self.invoke_with_retry(prepared).await) })
            .collect();

        loop {
            tokio::select! {
                biased;
                next = pending.next() => match next {
                    Some((i, result)) => results[i] = Some(result),
                    None => return (results, false),
                },
                _ = cancel.cancelled() => break,
            }
        }

        let grace = tokio::time::sleep(self.config.cancel_grace);
        tokio::pin!(grace);
        loop {
            tokio::select! {
                biased;
                next = pending.next() => match next {
                    Some((i, result)) => results[i] = Some(result),
                    None => break,
                },
                _ = &mut grace => break,
            }
        }
        (results, true)
    }

    /// Execute a single task with retry and timeout handling.
    async fn invoke_with_retry(&self, prepared: &Prepared) -> Invocation {
        let task = &prepared.ctx.task;
        let mut attempts = 0u32;

        loop {
            debug!("invoking task '{task}' (attempt {})", attempts + 1);
            let invocation = prepared.agent.invoke(prepared.input.clone(), &prepared.ctx);
            let result = match self.config.task_timeout {
                Some(limit) => match tokio::time::timeout(limit, invocation).await {
                    Ok(result) => result,
                    Err(_) => return Err(format!("timed out after {limit:?}")),
                },
                None => invocation.await,
            };

            match result {
                Ok(output) => return Ok(output),

                Err(e) if e.is_retryable() => {
                    attempts += 1;
                    if attempts > self.config.max_retries {
                        return Err(format!(
                            "exceeded retry limit of {}: {e}",
                            self.config.max_retries
                        ));
                    }

                    let delay = self.config.retry_delay(attempts);
                    warn!(
                        "task '{}' {} (attempt {}/{}), retrying in {:?}",
                        task, e, attempts, self.config.max_retries, delay
                    );
                    tokio::time::sleep(delay).await;
                }

                Err(e) => return Err(e.to_string()),
            }
        }
    }
}

fn to_output(result: Invocation) -> TaskOutput {
    match result {
        Ok(output) => TaskOutput::Completed { output },
        Err(error) => TaskOutput::Failed { error },
    }
}

/// The decision-table key an output matches: strings verbatim, booleans and
/// numbers by their JSON text. Anything else matches no key; the `Err` carries
/// its rendering for the error report.
fn outcome_label(output: &Value) -> Result<String, String> {
    match output {
        Value::String(s) => Ok(s.clone()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn outcome_label_matches_scalars_only() {
        assert_eq!(outcome_label(&json!("ongoing")), Ok("ongoing".into()));
        assert_eq!(outcome_label(&json!(true)), Ok("true".into()));
        assert_eq!(outcome_label(&json!(3)), Ok("3".into()));
        assert_eq!(outcome_label(&json!(null)), Err("null".into()));
        assert_eq!(outcome_label(&json!({ "a": 1 })), Err(r#"{"a":1}"#.into()));
    }
}
