//! Structured logging for plan execution.
//!
//! All task lifecycle events flow through a [`TaskLogger`] so they carry the
//! owning plan's identity. Events are emitted via `tracing`; the library
//! never writes to stdout or stderr directly.

use crate::task::TaskHandle;
use tracing::{debug, trace};

/// Emits task lifecycle events scoped to one plan.
#[derive(Debug, Clone)]
pub struct TaskLogger {
    plan_id: u64,
}

impl TaskLogger {
    /// Creates a logger for the given plan.
    #[must_use]
    pub(crate) const fn new(plan_id: u64) -> Self {
        Self { plan_id }
    }

    /// Creates a logger not tied to any plan, for driving tasks outside an
    /// engine (tests, custom contexts).
    #[must_use]
    pub fn detached() -> Self {
        Self { plan_id: 0 }
    }

    /// Logs that a task was enqueued.
    pub fn task_scheduled(&self, task: &TaskHandle) {
        trace!(
            plan_id = self.plan_id,
            task_id = task.id(),
            task = %task.name(),
            priority = task.priority(),
            "task scheduled"
        );
    }

    /// Logs that a task body is about to run.
    pub fn task_started(&self, task: &TaskHandle) {
        debug!(
            plan_id = self.plan_id,
            task_id = task.id(),
            task = %task.name(),
            "task started"
        );
    }

    /// Logs that a task reached a terminal state.
    pub fn task_ended(&self, task: &TaskHandle, success: bool) {
        debug!(
            plan_id = self.plan_id,
            task_id = task.id(),
            task = %task.name(),
            success,
            "task ended"
        );
    }

    /// Logs that the plan finished draining.
    pub(crate) fn plan_ended(&self) {
        debug!(plan_id = self.plan_id, "plan ended");
    }
}
