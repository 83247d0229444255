//! The scheduling capability handed to a running task body.
//!
//! A task body receives `&mut dyn Context` and may only affect the plan
//! through it: schedule a task now, schedule one after a set of
//! predecessors terminates, or arm a timer. The engine implements this
//! trait; the task core only consumes it, so alternative schedulers can be
//! substituted in tests.
//!
//! Guarantees any implementation must provide: among tasks that become
//! ready simultaneously, higher priority dispatches first; equal priorities
//! dispatch in enqueue order.

use crate::task::TaskHandle;
use std::time::Duration;

/// How a barrier releases its target task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterMode {
    /// Schedule the target once all predecessors are terminal, in any state.
    Always,
    /// Schedule the target only if every predecessor resolved successfully;
    /// otherwise cancel it.
    SideEffect,
}

/// The capability surface a task body uses to schedule further work.
pub trait Context: Send {
    /// Schedules a task for execution, subject to priority ordering.
    ///
    /// Scheduling a task that has already been scheduled (or is terminal)
    /// is a no-op, so diamond-shaped graphs may hand the same upstream task
    /// to several downstream drivers.
    fn run(&mut self, task: &TaskHandle);

    /// Schedules `task` once every predecessor has reached a terminal
    /// state. Prefer the [`ContextExt::after`] sugar over calling this
    /// directly.
    fn run_after(&mut self, predecessors: &[TaskHandle], task: &TaskHandle, mode: AfterMode);

    /// Arms a wall-clock timer that schedules `task` after `delay`, unless
    /// the plan finishes first.
    fn create_timer(&mut self, delay: Duration, task: &TaskHandle);
}

/// Fluent barrier construction: `ctx.after(&[a, b]).run(&c)`.
pub trait ContextExt: Context {
    /// Starts a barrier on the given predecessors.
    fn after(&mut self, predecessors: &[TaskHandle]) -> PendingRunner<'_, Self> {
        PendingRunner {
            ctx: self,
            predecessors: predecessors.to_vec(),
        }
    }
}

impl<C: Context + ?Sized> ContextExt for C {}

/// A barrier under construction; consumed by [`run`](Self::run) or
/// [`run_side_effect`](Self::run_side_effect).
pub struct PendingRunner<'a, C: Context + ?Sized> {
    ctx: &'a mut C,
    predecessors: Vec<TaskHandle>,
}

impl<C: Context + ?Sized> PendingRunner<'_, C> {
    /// Schedules `task` once all predecessors terminate, in any state.
    pub fn run(self, task: &TaskHandle) {
        self.ctx.run_after(&self.predecessors, task, AfterMode::Always);
    }

    /// Schedules `task` only if all predecessors complete successfully; if
    /// any predecessor fails or is cancelled, `task` is cancelled instead.
    pub fn run_side_effect(self, task: &TaskHandle) {
        self.ctx
            .run_after(&self.predecessors, task, AfterMode::SideEffect);
    }
}
