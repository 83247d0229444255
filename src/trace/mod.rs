//! Execution trace snapshots.
//!
//! Every task carries a point-in-time [`ShallowTrace`] (identity, state,
//! timestamps, result summary) and a set of typed relationship edges to other
//! tasks. A [`Trace`] is the transitive closure reachable from one task at
//! the moment of the call. Relationship edges are written during graph
//! construction and while the scheduler runs a task, so a trace taken from a
//! running plan may observe a partial graph; that is fine, snapshots are
//! advisory.
//!
//! Edges are stored on one side only (the parent records `ParentOf`, the
//! successor records `SuccessorOf`), which keeps the graph acyclic in memory
//! while still letting consumers reconstruct both directions.

use crate::task::{TaskHandle, TaskState};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};

/// The kind of an edge between two tasks in a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Relationship {
    /// The owner ran the other task as a child.
    ParentOf,
    /// The owner was constructed over the other task and will run it
    /// (recorded at composition time, before any scheduling).
    PotentialParentOf,
    /// The owner was scheduled after the other task terminated.
    SuccessorOf,
    /// The other task is a timer the owner armed.
    TimerOf,
    /// The other task is a side effect hanging off the owner.
    SideEffectOf,
}

/// A typed edge from the owning task to another task.
#[derive(Clone)]
pub struct Related {
    /// The kind of the edge.
    pub relationship: Relationship,
    /// The task on the far end.
    pub task: TaskHandle,
}

impl Related {
    /// Creates a new edge.
    #[must_use]
    pub fn new(relationship: Relationship, task: TaskHandle) -> Self {
        Self { relationship, task }
    }
}

impl std::fmt::Debug for Related {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} -> {}", self.relationship, self.task.name())
    }
}

/// Immutable snapshot of a single task's identity and status.
#[derive(Debug, Clone, Serialize)]
pub struct ShallowTrace {
    /// Unique task id.
    pub id: u64,
    /// Human-readable task name.
    pub name: String,
    /// Lifecycle state at snapshot time.
    pub state: TaskState,
    /// Whether the task is system-internal plumbing.
    pub system_hidden: bool,
    /// Scheduling priority.
    pub priority: i32,
    /// When the task was enqueued (epoch milliseconds).
    pub scheduled_at: Option<u64>,
    /// When the task body started (epoch milliseconds).
    pub started_at: Option<u64>,
    /// When the task reached a terminal state (epoch milliseconds).
    pub ended_at: Option<u64>,
    /// Debug rendering of the value, or the error text, once terminal.
    pub result_summary: Option<String>,
}

/// A directed, typed edge between two task ids in a [`Trace`].
#[derive(Debug, Clone, Serialize)]
pub struct TraceEdge {
    /// Id of the task that owns the edge.
    pub from: u64,
    /// Id of the task on the far end.
    pub to: u64,
    /// Edge kind.
    pub relationship: Relationship,
}

/// The reachable portion of a task graph, as shallow-trace nodes plus typed
/// edges.
#[derive(Debug, Clone, Serialize)]
pub struct Trace {
    /// One snapshot per reachable task.
    pub nodes: Vec<ShallowTrace>,
    /// All relationship edges between reachable tasks.
    pub edges: Vec<TraceEdge>,
}

impl Trace {
    /// Collects the transitive closure reachable from `root` via
    /// relationship edges.
    #[must_use]
    pub fn collect(root: &TaskHandle) -> Self {
        let mut nodes = Vec::new();
        let mut edges = Vec::new();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();

        visited.insert(root.id());
        queue.push_back(root.clone());

        while let Some(task) = queue.pop_front() {
            nodes.push(task.shallow_trace());
            for related in task.relationships() {
                edges.push(TraceEdge {
                    from: task.id(),
                    to: related.task.id(),
                    relationship: related.relationship,
                });
                if visited.insert(related.task.id()) {
                    queue.push_back(related.task);
                }
            }
        }

        Self { nodes, edges }
    }

    /// Looks up a node snapshot by task name.
    #[must_use]
    pub fn node_named(&self, name: &str) -> Option<&ShallowTrace> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Returns true if the trace contains an edge of the given kind between
    /// the two ids.
    #[must_use]
    pub fn has_edge(&self, from: u64, to: u64, relationship: Relationship) -> bool {
        self.edges
            .iter()
            .any(|e| e.from == from && e.to == to && e.relationship == relationship)
    }

    /// Serializes the trace to a JSON string.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Truncates a debug rendering to keep trace snapshots bounded.
pub(crate) fn summarize(text: String) -> String {
    const MAX: usize = 100;
    if text.len() <= MAX {
        text
    } else {
        let cut = text
            .char_indices()
            .take_while(|(i, _)| *i < MAX)
            .last()
            .map_or(0, |(i, c)| i + c.len_utf8());
        format!("{}…", &text[..cut])
    }
}
