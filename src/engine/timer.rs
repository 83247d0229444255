//! The engine's timer thread.
//!
//! One thread per engine services a min-heap of `(deadline, task, plan)`
//! entries. When a deadline passes, the target task is handed back to its
//! plan for scheduling. When a plan finishes, its unfired entries are
//! removed and their target tasks cancelled with the early-finish error,
//! so timers never hold a finished plan's tasks alive.

use crate::engine::plan::PlanShared;
use crate::error::Error;
use crate::task::TaskHandle;
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::trace;

struct TimerEntry {
    deadline: Instant,
    seq: u64,
    plan: Arc<PlanShared>,
    task: TaskHandle,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for a min-heap: earliest deadline first.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct TimerState {
    heap: BinaryHeap<TimerEntry>,
    next_seq: u64,
    shutdown: bool,
}

struct TimerShared {
    state: Mutex<TimerState>,
    cond: Condvar,
}

/// Cheap-clone handle used by plans to arm and cancel timers.
#[derive(Clone)]
pub(crate) struct TimerHandle {
    shared: Arc<TimerShared>,
}

impl TimerHandle {
    /// Arms a timer: after `delay`, `task` is scheduled into `plan`.
    pub(crate) fn arm(&self, plan: Arc<PlanShared>, task: TaskHandle, delay: Duration) {
        let mut state = self.shared.state.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        trace!(task_id = task.id(), delay_ms = delay.as_millis() as u64, "timer armed");
        state.heap.push(TimerEntry {
            deadline: Instant::now() + delay,
            seq,
            plan,
            task,
        });
        self.shared.cond.notify_all();
    }

    /// Removes all entries belonging to `plan_id` and cancels their target
    /// tasks with the early-finish error.
    pub(crate) fn cancel_plan(&self, plan_id: u64) {
        let removed = {
            let mut state = self.shared.state.lock();
            let entries = std::mem::take(&mut state.heap).into_vec();
            let (stale, keep): (Vec<_>, Vec<_>) =
                entries.into_iter().partition(|e| e.plan.id() == plan_id);
            state.heap = BinaryHeap::from(keep);
            stale
        };
        for entry in removed {
            entry.task.cancel(Error::early_finish());
        }
    }
}

/// The timer worker thread, owned by the engine.
pub(crate) struct TimerThread {
    handle: TimerHandle,
    worker: Option<JoinHandle<()>>,
}

impl TimerThread {
    /// Spawns the worker thread.
    pub(crate) fn spawn(thread_name: String) -> Self {
        let shared = Arc::new(TimerShared {
            state: Mutex::new(TimerState {
                heap: BinaryHeap::new(),
                next_seq: 0,
                shutdown: false,
            }),
            cond: Condvar::new(),
        });
        let loop_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(thread_name)
            .spawn(move || Self::run(&loop_shared))
            .expect("failed to spawn timer thread");
        Self {
            handle: TimerHandle { shared },
            worker: Some(worker),
        }
    }

    fn run(shared: &TimerShared) {
        let mut state = shared.state.lock();
        loop {
            if state.shutdown {
                break;
            }
            let now = Instant::now();
            let next_deadline = state.heap.peek().map(|e| e.deadline);
            match next_deadline {
                Some(deadline) if deadline <= now => {
                    if let Some(entry) = state.heap.pop() {
                        drop(state);
                        trace!(task_id = entry.task.id(), "timer fired");
                        PlanShared::fire_timer(&entry.plan, &entry.task);
                        state = shared.state.lock();
                    }
                }
                Some(deadline) => {
                    let _ = shared.cond.wait_until(&mut state, deadline);
                }
                None => {
                    shared.cond.wait(&mut state);
                }
            }
        }
        // Cancel whatever never fired so waiting plans can drain.
        let stale = std::mem::take(&mut state.heap).into_vec();
        drop(state);
        for entry in stale {
            entry.task.cancel(Error::early_finish());
        }
    }

    /// Returns a cheap handle for arming timers.
    pub(crate) fn handle(&self) -> TimerHandle {
        self.handle.clone()
    }

    /// Stops and joins the worker thread. Idempotent.
    pub(crate) fn shutdown(&mut self) {
        {
            let mut state = self.handle.shared.state.lock();
            state.shutdown = true;
        }
        self.handle.shared.cond.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for TimerThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}
