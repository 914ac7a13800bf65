//! Core domain models for the workflow engine.
//!
//! These types are the declarative source of truth for what a workflow looks
//! like. They serialise to/from the workflow files read by the CLI and are
//! turned into a validated [`WorkflowGraph`](crate::WorkflowGraph) before any
//! task runs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Route
// ---------------------------------------------------------------------------

/// Where a decision task goes for one outcome.
///
/// Serialised as a single task name, a list of names, or `""` / `null` / `[]`
/// for [`Route::Halt`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RouteRepr", into = "RouteRepr")]
pub enum Route {
    /// The branch ends here.
    Halt,
    /// Activate these tasks, in order.
    Next(Vec<String>),
}

impl Route {
    /// Route to a single task.
    pub fn to(name: impl Into<String>) -> Self {
        Self::Next(vec![name.into()])
    }

    /// Route to several tasks, activated in the given order.
    pub fn to_all<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from(RouteRepr::Many(names.into_iter().map(Into::into).collect()))
    }

    /// Task names this route activates (empty for `Halt`).
    pub fn targets(&self) -> &[String] {
        match self {
            Self::Halt => &[],
            Self::Next(names) => names,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RouteRepr {
    One(String),
    Many(Vec<String>),
    Null,
}

impl From<RouteRepr> for Route {
    fn from(repr: RouteRepr) -> Self {
        match repr {
            RouteRepr::One(name) if name.is_empty() => Route::Halt,
            RouteRepr::One(name) => Route::Next(vec![name]),
            RouteRepr::Many(names) if names.is_empty() => Route::Halt,
            RouteRepr::Many(names) => Route::Next(names),
            RouteRepr::Null => Route::Halt,
        }
    }
}

impl From<Route> for RouteRepr {
    fn from(route: Route) -> Self {
        match route {
            Route::Halt => RouteRepr::One(String::new()),
            Route::Next(mut names) if names.len() == 1 => RouteRepr::One(names.remove(0)),
            Route::Next(names) => RouteRepr::Many(names),
        }
    }
}

// ---------------------------------------------------------------------------
// TaskNode
// ---------------------------------------------------------------------------

/// A single task in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskNode {
    /// Unique identifier within this workflow (referenced by transitions).
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub expected_output: String,
    /// Registry key of the agent that executes this task.
    pub agent: String,
    /// Eligible to run first, with no predecessor.
    #[serde(default)]
    pub is_start: bool,
    /// Tasks activated unconditionally once this one completes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub next: Vec<String>,
    /// Decision table: outcome label → route. Present only on decision tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<BTreeMap<String, Route>>,
    /// Tasks whose outputs are gathered and handed to the agent.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<String>,
}

impl TaskNode {
    /// A plain, non-start task with no transitions.
    pub fn new(name: impl Into<String>, agent: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            expected_output: String::new(),
            agent: agent.into(),
            is_start: false,
            next: Vec::new(),
            conditions: None,
            context: Vec::new(),
        }
    }

    pub fn start(mut self) -> Self {
        self.is_start = true;
        self
    }

    pub fn describe(
        mut self,
        description: impl Into<String>,
        expected_output: impl Into<String>,
    ) -> Self {
        self.description = description.into();
        self.expected_output = expected_output.into();
        self
    }

    /// Append static successors.
    pub fn then<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.next.extend(names.into_iter().map(Into::into));
        self
    }

    /// Add one decision-table entry, turning this into a decision task.
    pub fn on(mut self, outcome: impl Into<String>, route: Route) -> Self {
        self.conditions
            .get_or_insert_with(BTreeMap::new)
            .insert(outcome.into(), route);
        self
    }

    pub fn with_context<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.context.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn is_decision(&self) -> bool {
        self.conditions.is_some()
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// A complete, not yet validated, workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub tasks: Vec<TaskNode>,
}

impl Workflow {
    pub fn new(name: impl Into<String>, tasks: Vec<TaskNode>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            tasks,
        }
    }
}
