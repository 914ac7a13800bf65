//! Per-run result store.
//!
//! Maps each task name to its most recent result. Iteration follows the order
//! in which tasks first completed; re-running a task overwrites its entry in
//! place and bumps its `runs` counter but does not move it. Earlier outputs of
//! a re-run task are not kept.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{json, Value};

/// What a task produced.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutput {
    Completed { output: Value },
    Failed { error: String },
}

impl TaskOutput {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// The value handed to downstream tasks: the output itself, or
    /// `{"status": "failed", "error": …}` for a failure.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Completed { output } => output.clone(),
            Self::Failed { error } => json!({ "status": "failed", "error": error }),
        }
    }
}

/// One store entry.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TaskRecord {
    #[serde(flatten)]
    pub output: TaskOutput,
    /// How many times the task ran in this run.
    pub runs: u32,
    pub completed_at: DateTime<Utc>,
}

/// Results of one workflow run, keyed by task name.
///
/// Not synchronised; the engine writes it from a single task.
#[derive(Debug, Clone, Default)]
pub struct ResultStore {
    entries: Vec<(String, TaskRecord)>,
    index: HashMap<String, usize>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a result, overwriting any earlier one for the same task.
    pub fn record(&mut self, task: &str, output: TaskOutput) {
        let completed_at = Utc::now();
        match self.index.get(task) {
            Some(&i) => {
                let record = &mut self.entries[i].1;
                record.output = output;
                record.runs += 1;
                record.completed_at = completed_at;
            }
            None => {
                self.index.insert(task.to_owned(), self.entries.len());
                self.entries.push((
                    task.to_owned(),
                    TaskRecord { output, runs: 1, completed_at },
                ));
            }
        }
    }

    pub fn get(&self, task: &str) -> Option<&TaskRecord> {
        self.index.get(task).map(|&i| &self.entries[i].1)
    }

    /// The output of a task that completed successfully.
    pub fn output(&self, task: &str) -> Option<&Value> {
        match self.get(task).map(|r| &r.output) {
            Some(TaskOutput::Completed { output }) => Some(output),
            _ => None,
        }
    }

    pub fn contains(&self, task: &str) -> bool {
        self.index.contains_key(task)
    }

    /// Every entry, in first-completion order.
    pub fn all(&self) -> impl Iterator<Item = (&str, &TaskRecord)> {
        self.entries.iter().map(|(name, record)| (name.as_str(), record))
    }

    /// Task names, in first-completion order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names of tasks whose latest result is a failure.
    pub fn failures(&self) -> Vec<&str> {
        self.all()
            .filter(|(_, r)| r.output.is_failed())
            .map(|(name, _)| name)
            .collect()
    }
}

impl Serialize for ResultStore {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, record) in &self.entries {
            map.serialize_entry(name, record)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(value: Value) -> TaskOutput {
        TaskOutput::Completed { output: value }
    }

    #[test]
    fn keeps_first_completion_order_and_latest_output() {
        let mut store = ResultStore::new();
        store.record("a", completed(json!("retry")));
        store.record("b", completed(json!(1)));
        store.record("a", completed(json!("done")));

        assert_eq!(store.names(), vec!["a", "b"]);
        assert_eq!(store.output("a"), Some(&json!("done")));
        assert_eq!(store.get("a").unwrap().runs, 2);
        assert_eq!(store.get("b").unwrap().runs, 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn failures_are_entries_without_output() {
        let mut store = ResultStore::new();
        store.record("fetch", TaskOutput::Failed { error: "timeout".into() });

        assert!(store.contains("fetch"));
        assert_eq!(store.output("fetch"), None);
        assert_eq!(store.failures(), vec!["fetch"]);
        assert_eq!(
            store.get("fetch").unwrap().output.to_value(),
            json!({ "status": "failed", "error": "timeout" })
        );
    }

    #[test]
    fn serializes_as_ordered_map() {
        let mut store = ResultStore::new();
        store.record("z", completed(json!("first")));
        store.record("a", TaskOutput::Failed { error: "boom".into() });

        let value = serde_json::to_value(&store).unwrap();
        assert_eq!(value["z"]["status"], "completed");
        assert_eq!(value["z"]["output"], "first");
        assert_eq!(value["z"]["runs"], 1);
        assert_eq!(value["a"]["status"], "failed");
        assert_eq!(value["a"]["error"], "boom");

        let text = serde_json::to_string(&store).unwrap();
        assert!(text.find("\"z\"").unwrap() < text.find("\"a\"").unwrap());
    }
}
