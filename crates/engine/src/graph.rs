//! Workflow graph construction — run this before executing a workflow.
//!
//! Rules enforced:
//! 1. Task names must be unique within the workflow.
//! 2. Every name in `next`, in a decision-table route, or in `context` must
//!    refer to a task of the same workflow.
//! 3. A task uses either `next` or `conditions`, and a decision table is
//!    never empty.
//! 4. At least one task is flagged `is_start`.
//!
//! Cycles are allowed. Tasks are stored in an arena addressed by [`NodeId`],
//! so a task that routes back to an earlier one is just an index lookup.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::GraphError;
use crate::models::{Route, TaskNode, Workflow};

/// Index of a task inside a [`WorkflowGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
enum Transitions {
    Static(Vec<NodeId>),
    /// Outcome label → activated tasks (empty for a halting route).
    Decision(BTreeMap<String, Vec<NodeId>>),
}

/// A validated, immutable workflow.
///
/// Build it once with [`WorkflowGraph::build`] and share it (by reference or
/// `Arc`) across as many runs as needed.
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    name: String,
    description: String,
    tasks: Vec<TaskNode>,
    index: HashMap<String, NodeId>,
    transitions: Vec<Transitions>,
    context: Vec<Vec<NodeId>>,
    starts: Vec<NodeId>,
}

impl WorkflowGraph {
    /// Validate the workflow and compile its transitions.
    ///
    /// # Errors
    /// - [`GraphError::DuplicateNode`] if two tasks share a name.
    /// - [`GraphError::DanglingReference`] if a task references a missing one.
    /// - [`GraphError::ConflictingTransitions`] / [`GraphError::EmptyDecisionTable`]
    ///   for malformed transition rules.
    /// - [`GraphError::NoStartNode`] if no task is a start task.
    pub fn build(workflow: Workflow) -> Result<Self, GraphError> {
        let Workflow { name, description, tasks } = workflow;

        // -------------------------------------------------------------------
        // 1. Ensure task names are unique
        // -------------------------------------------------------------------
        let mut index: HashMap<String, NodeId> = HashMap::with_capacity(tasks.len());
        for (i, task) in tasks.iter().enumerate() {
            if index.insert(task.name.clone(), NodeId(i)).is_some() {
                return Err(GraphError::DuplicateNode(task.name.clone()));
            }
        }

        let resolve = |name: &str, referenced_by: &str| -> Result<NodeId, GraphError> {
            index.get(name).copied().ok_or_else(|| GraphError::DanglingReference {
                missing: name.to_owned(),
                referenced_by: referenced_by.to_owned(),
            })
        };

        // -------------------------------------------------------------------
        // 2 + 3. Resolve transitions and context references
        // -------------------------------------------------------------------
        let mut transitions = Vec::with_capacity(tasks.len());
        let mut context = Vec::with_capacity(tasks.len());

        for task in &tasks {
            let compiled = match &task.conditions {
                Some(_) if !task.next.is_empty() => {
                    return Err(GraphError::ConflictingTransitions(task.name.clone()));
                }
                Some(table) if table.is_empty() => {
                    return Err(GraphError::EmptyDecisionTable(task.name.clone()));
                }
                Some(table) => {
                    let mut routes = BTreeMap::new();
                    for (outcome, route) in table {
                        let targets: Vec<NodeId> = match route {
                            Route::Halt => Vec::new(),
                            Route::Next(names) => names
                                .iter()
                                .map(|n| resolve(n, &task.name))
                                .collect::<Result<_, _>>()?,
                        };
                        routes.insert(outcome.clone(), targets);
                    }
                    Transitions::Decision(routes)
                }
                None => Transitions::Static(
                    task.next
                        .iter()
                        .map(|n| resolve(n, &task.name))
                        .collect::<Result<_, _>>()?,
                ),
            };
            transitions.push(compiled);

            context.push(
                task.context
                    .iter()
                    .map(|n| resolve(n, &task.name))
                    .collect::<Result<Vec<_>, _>>()?,
            );
        }

        // -------------------------------------------------------------------
        // 4. Collect start tasks in declaration order
        // -------------------------------------------------------------------
        let starts: Vec<NodeId> = tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.is_start)
            .map(|(i, _)| NodeId(i))
            .collect();

        if starts.is_empty() {
            return Err(GraphError::NoStartNode);
        }

        Ok(Self {
            name,
            description,
            tasks,
            index,
            transitions,
            context,
            starts,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Look a task up by name.
    pub fn node(&self, name: &str) -> Option<NodeId> {
        self.index.get(name).copied()
    }

    /// The task definition behind an id.
    ///
    /// # Panics
    /// If `id` was not produced by this graph.
    pub fn get(&self, id: NodeId) -> &TaskNode {
        &self.tasks[id.0]
    }

    /// Start tasks, in declaration order.
    pub fn start_nodes(&self) -> &[NodeId] {
        &self.starts
    }

    /// Tasks in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &TaskNode)> {
        self.tasks.iter().enumerate().map(|(i, t)| (NodeId(i), t))
    }

    pub fn is_decision(&self, id: NodeId) -> bool {
        matches!(self.transitions[id.0], Transitions::Decision(_))
    }

    /// Tasks whose results `id` needs before it may run.
    pub fn context_of(&self, id: NodeId) -> &[NodeId] {
        &self.context[id.0]
    }

    /// Tasks activated after `id` completes.
    ///
    /// Plain tasks ignore `outcome` and return their static successors. For a
    /// decision task the outcome selects the route: an empty slice means the
    /// branch halts, `None` means the outcome is not in the table.
    pub fn successors(&self, id: NodeId, outcome: &str) -> Option<&[NodeId]> {
        match &self.transitions[id.0] {
            Transitions::Static(next) => Some(next),
            Transitions::Decision(routes) => routes.get(outcome).map(Vec::as_slice),
        }
    }

    /// The closed set of outcome labels a decision task accepts (empty for a
    /// plain task).
    pub fn outcomes(&self, id: NodeId) -> impl Iterator<Item = &str> {
        let routes = match &self.transitions[id.0] {
            Transitions::Decision(routes) => Some(routes),
            Transitions::Static(_) => None,
        };
        routes.into_iter().flat_map(|r| r.keys().map(String::as_str))
    }

    /// Distinct agent keys used by the graph, in first-use order.
    pub fn agents(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.tasks
            .iter()
            .map(|t| t.agent.as_str())
            .filter(|a| seen.insert(*a))
            .collect()
    }
}
