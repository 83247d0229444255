//! Per-plan scheduling state and the dispatch loop.
//!
//! One plan is one engine run of a root task graph. The plan owns a
//! priority ready-queue and a pending-task counter; every scheduled task
//! registers a terminal listener that decrements the counter, and the
//! dispatch loop exits once the counter is zero with an empty queue. The
//! root task completing does *not* end the plan: side-effect subtrees keep
//! draining. What ends a plan is quiescence.
//!
//! Barriers (`after`) reserve their target task immediately (so the plan
//! cannot quiesce underneath them) and release it when the last
//! predecessor settles. Side-effect barriers release only on all-success;
//! otherwise the target is cancelled with the early-finish error.

use crate::context::{AfterMode, Context};
use crate::engine::queue::{ReadyEntry, ReadyQueue};
use crate::engine::timer::TimerHandle;
use crate::error::Error;
use crate::logging::TaskLogger;
use crate::task::TaskHandle;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

struct PlanQueue {
    ready: ReadyQueue,
    done: bool,
}

/// Shared state of one running plan.
pub(crate) struct PlanShared {
    id: u64,
    queue: Mutex<PlanQueue>,
    work: Condvar,
    pending: AtomicUsize,
    timer: TimerHandle,
    logger: TaskLogger,
}

impl PlanShared {
    pub(crate) fn new(id: u64, timer: TimerHandle) -> Arc<Self> {
        Arc::new(Self {
            id,
            queue: Mutex::new(PlanQueue {
                ready: ReadyQueue::new(),
                done: false,
            }),
            work: Condvar::new(),
            pending: AtomicUsize::new(0),
            timer,
            logger: TaskLogger::new(id),
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Reserves a task in this plan: one Created→Scheduled transition, one
    /// pending slot, one terminal listener to release it. Returns false if
    /// the task was already scheduled somewhere (or is terminal).
    fn reserve(plan: &Arc<Self>, task: &TaskHandle) -> bool {
        if !task.mark_scheduled() {
            return false;
        }
        plan.pending.fetch_add(1, Ordering::AcqRel);
        plan.logger.task_scheduled(task);
        let released = Arc::clone(plan);
        task.on_terminal(Box::new(move |_success| {
            released.task_settled();
        }));
        true
    }

    fn task_settled(&self) {
        let previous = self.pending.fetch_sub(1, Ordering::AcqRel);
        if previous == 1 {
            // Last pending task: wake the dispatcher so it can observe
            // quiescence.
            let _guard = self.queue.lock();
            self.work.notify_all();
        }
    }

    /// Schedules a task for immediate dispatch (subject to priority).
    pub(crate) fn schedule(
        plan: &Arc<Self>,
        task: &TaskHandle,
        parent: Option<TaskHandle>,
        predecessors: Vec<TaskHandle>,
    ) {
        if !Self::reserve(plan, task) {
            return;
        }
        Self::push_ready(plan, task, parent, predecessors);
    }

    /// Enqueues an already-reserved task.
    fn push_ready(
        plan: &Arc<Self>,
        task: &TaskHandle,
        parent: Option<TaskHandle>,
        predecessors: Vec<TaskHandle>,
    ) {
        let mut queue = plan.queue.lock();
        if queue.done {
            drop(queue);
            task.cancel(Error::early_finish());
            return;
        }
        queue.ready.push(task.clone(), parent, predecessors);
        plan.work.notify_all();
    }

    /// Registers a barrier: `task` is released once every predecessor is
    /// terminal. In side-effect mode a failed or cancelled predecessor
    /// cancels the target instead.
    pub(crate) fn schedule_after(
        plan: &Arc<Self>,
        predecessors: &[TaskHandle],
        task: &TaskHandle,
        mode: AfterMode,
        parent: Option<TaskHandle>,
    ) {
        if predecessors.is_empty() {
            Self::schedule(plan, task, parent, Vec::new());
            return;
        }
        if !Self::reserve(plan, task) {
            return;
        }
        let remaining = Arc::new(AtomicUsize::new(predecessors.len()));
        let any_failed = Arc::new(AtomicBool::new(false));
        let preds: Vec<TaskHandle> = predecessors.to_vec();
        for pred in predecessors {
            let plan = Arc::clone(plan);
            let task = task.clone();
            let remaining = Arc::clone(&remaining);
            let any_failed = Arc::clone(&any_failed);
            let parent = parent.clone();
            let preds = preds.clone();
            pred.on_terminal(Box::new(move |success| {
                if !success {
                    any_failed.store(true, Ordering::Release);
                }
                if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    if mode == AfterMode::SideEffect && any_failed.load(Ordering::Acquire) {
                        task.cancel(Error::early_finish());
                    } else {
                        Self::push_ready(&plan, &task, parent, preds);
                    }
                }
            }));
        }
    }

    /// Entry point for the timer thread: a fired timer schedules its target
    /// unless the plan already finished.
    pub(crate) fn fire_timer(plan: &Arc<Self>, task: &TaskHandle) {
        let done = plan.queue.lock().done;
        if done {
            task.cancel(Error::early_finish());
        } else {
            Self::schedule(plan, task, None, Vec::new());
        }
    }

    /// Runs the plan to quiescence: pending count zero and an empty queue.
    pub(crate) fn dispatch_loop(plan: &Arc<Self>) {
        loop {
            let entry = Self::next_entry(plan);
            let Some(entry) = entry else { break };
            trace!(
                plan_id = plan.id,
                task_id = entry.task.id(),
                "dispatching"
            );
            let mut ctx = PlanContext {
                plan: Arc::clone(plan),
                current: entry.task.clone(),
            };
            entry
                .task
                .context_run(&mut ctx, &plan.logger, entry.parent.as_ref(), &entry.predecessors);
        }
        plan.timer.cancel_plan(plan.id);
        plan.logger.plan_ended();
    }

    fn next_entry(plan: &Arc<Self>) -> Option<ReadyEntry> {
        let mut queue = plan.queue.lock();
        loop {
            if let Some(entry) = queue.ready.pop() {
                return Some(entry);
            }
            if plan.pending.load(Ordering::Acquire) == 0 {
                // Quiescent. Marking done under the same lock closes the
                // race with a timer firing into a finished plan.
                queue.done = true;
                return None;
            }
            plan.work.wait(&mut queue);
        }
    }
}

/// The [`Context`] implementation handed to task bodies by the dispatch
/// loop. Tracks the currently-running task as the parent of whatever it
/// schedules.
pub(crate) struct PlanContext {
    plan: Arc<PlanShared>,
    current: TaskHandle,
}

impl Context for PlanContext {
    fn run(&mut self, task: &TaskHandle) {
        PlanShared::schedule(&self.plan, task, Some(self.current.clone()), Vec::new());
    }

    fn run_after(&mut self, predecessors: &[TaskHandle], task: &TaskHandle, mode: AfterMode) {
        PlanShared::schedule_after(
            &self.plan,
            predecessors,
            task,
            mode,
            Some(self.current.clone()),
        );
    }

    fn create_timer(&mut self, delay: Duration, task: &TaskHandle) {
        self.current
            .add_related(crate::trace::Relationship::TimerOf, task.clone());
        self.plan
            .timer
            .arm(Arc::clone(&self.plan), task.clone(), delay);
    }
}
