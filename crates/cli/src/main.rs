//! `taskflow` CLI entry-point.
//!
//! Available sub-commands:
//! - `validate` — check a workflow file and print its transitions.
//! - `run`      — execute a workflow file and print the result store as JSON.
//!
//! A workflow file is JSON: the workflow itself (`name`, `tasks`), the
//! built-in agents its tasks use (`agents`), and optional engine settings
//! (`engine`).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use agents::AgentSpec;
use engine::{
    AgentRegistry, EngineConfig, ExecutionMode, FailurePolicy, Route, Workflow, WorkflowExecutor,
    WorkflowGraph,
};

#[derive(Parser)]
#[command(
    name = "taskflow",
    about = "Declarative task-graph workflow engine",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a workflow definition file.
    Validate {
        /// Path to the workflow JSON file.
        path: PathBuf,
    },
    /// Run a workflow definition file.
    Run {
        /// Path to the workflow JSON file.
        path: PathBuf,
        /// Initial input handed to the start tasks (JSON; bare text is taken
        /// as a string).
        #[arg(long)]
        input: Option<String>,
        /// Maximum number of task invocations (0 disables the guard).
        #[arg(long)]
        max_steps: Option<usize>,
        /// Abort on the first task failure instead of recording it.
        #[arg(long)]
        fail_fast: bool,
        /// Invoke independent ready tasks concurrently.
        #[arg(long)]
        concurrent: bool,
        /// Per-invocation time limit in milliseconds.
        #[arg(long)]
        task_timeout_ms: Option<u64>,
    },
}

/// On-disk workflow file.
#[derive(Debug, Deserialize)]
struct WorkflowFile {
    #[serde(flatten)]
    workflow: Workflow,
    #[serde(default)]
    agents: BTreeMap<String, AgentSpec>,
    #[serde(default)]
    engine: EngineConfig,
}

impl WorkflowFile {
    fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("invalid workflow file {}", path.display()))
    }

    fn registry(&self) -> Result<AgentRegistry> {
        self.agents
            .iter()
            .map(|(key, spec)| {
                let agent = spec
                    .build()
                    .with_context(|| format!("agent '{key}' is misconfigured"))?;
                Ok((key.clone(), agent))
            })
            .collect()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Validate { path } => {
            let file = WorkflowFile::load(&path)?;
            match WorkflowGraph::build(file.workflow) {
                Ok(graph) => {
                    println!(
                        "✅ Workflow '{}' is valid: {} tasks.",
                        graph.name(),
                        graph.len()
                    );
                    if !graph.description().is_empty() {
                        println!("   {}", graph.description());
                    }
                    print_transitions(&graph);
                    let missing: Vec<&str> = graph
                        .agents()
                        .into_iter()
                        .filter(|a| !file.agents.contains_key(*a))
                        .collect();
                    if !missing.is_empty() {
                        println!("⚠️  Agents not declared in this file: {missing:?}");
                    }
                }
                Err(e) => {
                    eprintln!("❌ Validation failed: {e}");
                    std::process::exit(1);
                }
            }
        }
        Command::Run {
            path,
            input,
            max_steps,
            fail_fast,
            concurrent,
            task_timeout_ms,
        } => {
            let file = WorkflowFile::load(&path)?;
            let registry = file.registry()?;

            let mut config = file.engine.clone();
            if let Some(limit) = max_steps {
                config.max_steps = (limit > 0).then_some(limit);
            }
            if fail_fast {
                config.failure_policy = FailurePolicy::Abort;
            }
            if concurrent {
                config.mode = ExecutionMode::Concurrent;
            }
            if let Some(ms) = task_timeout_ms {
                config.task_timeout = Some(Duration::from_millis(ms));
            }

            let graph = WorkflowGraph::build(file.workflow)
                .with_context(|| format!("invalid workflow in {}", path.display()))?;
            let input = input.map(|raw| parse_input(&raw));

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, cancelling run");
                    on_signal.cancel();
                }
            });

            info!("Running workflow '{}'", graph.name());
            let executor = WorkflowExecutor::new(registry, config);
            match executor.run_with_cancel(&graph, input, cancel).await {
                Ok(store) => {
                    println!("{}", serde_json::to_string_pretty(&store)?);
                }
                Err(failure) => {
                    eprintln!("❌ Run failed: {}", failure.error);
                    println!("{}", serde_json::to_string_pretty(&failure.partial)?);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}

fn parse_input(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()))
}

fn print_transitions(graph: &WorkflowGraph) {
    for (_, task) in graph.iter() {
        let marker = if task.is_start { "▶" } else { " " };
        println!("{marker} {} [agent: {}]", task.name, task.agent);

        if !task.context.is_empty() {
            println!("    context: {}", task.context.join(", "));
        }
        match &task.conditions {
            Some(table) => {
                for (outcome, route) in table {
                    let target = match route {
                        Route::Halt => "(end)".to_owned(),
                        Route::Next(names) => names.join(", "),
                    };
                    println!("    on '{outcome}' → {target}");
                }
            }
            None if task.next.is_empty() => println!("    → (end)"),
            None => println!("    → {}", task.next.join(", ")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn workflow_file_parses_agents_and_engine_settings() {
        let file: WorkflowFile = serde_json::from_value(json!({
            "name": "emergency",
            "tasks": [
                { "name": "router", "agent": "triage", "is_start": true,
                  "conditions": { "low": "dispatcher", "critical": ["dispatcher", "monitor"] } },
                { "name": "dispatcher", "agent": "echo" },
                { "name": "monitor", "agent": "echo" }
            ],
            "agents": {
                "triage": { "kind": "field", "path": "severity" },
                "echo": { "kind": "echo" }
            },
            "engine": { "failure_policy": "abort", "max_steps": 50 }
        }))
        .unwrap();

        assert_eq!(file.workflow.tasks.len(), 3);
        assert_eq!(file.engine.failure_policy, FailurePolicy::Abort);
        assert_eq!(file.engine.max_steps, Some(50));
        assert_eq!(file.registry().unwrap().len(), 2);
    }

    #[test]
    fn input_falls_back_to_plain_string() {
        assert_eq!(parse_input(r#"{"severity":"low"}"#), json!({ "severity": "low" }));
        assert_eq!(parse_input("hello world"), json!("hello world"));
    }

    #[tokio::test]
    async fn bundled_demos_validate_and_run() {
        for raw in [
            include_str!("../../../demos/emergency_response.json"),
            include_str!("../../../demos/retry_loop.json"),
        ] {
            let file: WorkflowFile = serde_json::from_str(raw).unwrap();
            let registry = file.registry().unwrap();
            let graph = WorkflowGraph::build(file.workflow).unwrap();
            let store = WorkflowExecutor::new(registry, file.engine)
                .run(&graph, Some(json!({ "severity": "critical" })))
                .await
                .unwrap();
            assert!(store.failures().is_empty());
        }
    }

    #[tokio::test]
    async fn repeated_runs_of_one_registry_agree() {
        let file: WorkflowFile =
            serde_json::from_str(include_str!("../../../demos/emergency_response.json")).unwrap();
        let registry = file.registry().unwrap();
        let graph = WorkflowGraph::build(file.workflow).unwrap();
        let executor = WorkflowExecutor::new(registry, file.engine);
        let input = json!({ "severity": "critical" });

        let first = executor.run(&graph, Some(input.clone())).await.unwrap();
        let second = executor.run(&graph, Some(input)).await.unwrap();

        assert_eq!(first.names(), second.names());
        for name in first.names() {
            assert_eq!(first.get(name).unwrap().runs, second.get(name).unwrap().runs);
            assert_eq!(first.output(name), second.output(name));
        }
    }

    #[tokio::test]
    async fn declared_agents_drive_the_severity_router() {
        let file: WorkflowFile = serde_json::from_value(json!({
            "name": "emergency",
            "tasks": [
                { "name": "router", "agent": "triage", "is_start": true,
                  "conditions": { "low": "dispatcher", "critical": ["dispatcher", "monitor"] } },
                { "name": "dispatcher", "agent": "dispatch", "context": ["router"] },
                { "name": "monitor", "agent": "dispatch" }
            ],
            "agents": {
                "triage": { "kind": "field", "path": "severity" },
                "dispatch": { "kind": "constant", "value": "units sent" }
            }
        }))
        .unwrap();

        let registry = file.registry().unwrap();
        let graph = WorkflowGraph::build(file.workflow).unwrap();
        let store = WorkflowExecutor::new(registry, file.engine)
            .run(&graph, Some(json!({ "severity": "low" })))
            .await
            .unwrap();

        assert_eq!(store.names(), vec!["router", "dispatcher"]);
        assert_eq!(store.output("router"), Some(&json!("low")));
    }
}
