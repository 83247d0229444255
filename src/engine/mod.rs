//! The engine: worker threads, timers and plan dispatch.
//!
//! An [`Engine`] owns a pool of dispatch threads, a timer thread and a
//! blocking pool. [`Engine::run`] hands a root task to a fresh plan; the
//! plan's dispatch loop occupies one worker until the graph quiesces. The
//! task core never sees any of this — it interacts with the plan purely
//! through the [`Context`](crate::context::Context) trait.

mod blocking;
mod config;
mod plan;
mod queue;
mod timer;

pub use config::{
    ConfigError, EngineBuilder, EngineConfig, ENV_BLOCKING_THREADS, ENV_THREAD_NAME_PREFIX,
    ENV_WORKER_THREADS,
};

use crate::task::factory::Executor;
use crate::task::{Task, TaskValue};
use blocking::WorkerPool;
use parking_lot::{Condvar, Mutex};
use plan::PlanShared;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use timer::TimerThread;
use tracing::debug;

struct PlanCounter {
    count: Mutex<usize>,
    idle: Condvar,
}

impl PlanCounter {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            count: Mutex::new(0),
            idle: Condvar::new(),
        })
    }

    fn enter(&self) {
        *self.count.lock() += 1;
    }

    fn exit(&self) {
        let mut count = self.count.lock();
        *count -= 1;
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    fn wait_idle(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.idle.wait(&mut count);
        }
    }
}

/// Executes task plans on a pool of worker threads.
///
/// Dropping the engine shuts it down: it waits for running plans to drain,
/// then joins the timer and worker threads.
pub struct Engine {
    workers: Arc<WorkerPool>,
    blocking: Arc<WorkerPool>,
    timer: TimerThread,
    active: Arc<PlanCounter>,
    next_plan_id: AtomicU64,
}

impl Engine {
    /// Starts an engine with the default configuration.
    pub fn new() -> Result<Self, ConfigError> {
        EngineBuilder::new().build()
    }

    pub(crate) fn with_config(config: EngineConfig) -> Self {
        let prefix = &config.thread_name_prefix;
        debug!(
            workers = config.worker_threads,
            blocking = config.blocking_threads,
            "engine starting"
        );
        Self {
            workers: Arc::new(WorkerPool::new(
                &format!("{prefix}-plan"),
                config.worker_threads,
            )),
            blocking: Arc::new(WorkerPool::new(
                &format!("{prefix}-blocking"),
                config.blocking_threads,
            )),
            timer: TimerThread::spawn(format!("{prefix}-timer")),
            active: PlanCounter::new(),
            next_plan_id: AtomicU64::new(1),
        }
    }

    /// Runs `task` as the root of a new plan.
    ///
    /// Returns immediately; observe completion through the task's promise
    /// (e.g. [`Task::get`]). The plan keeps running until the whole graph
    /// quiesces — side-effect subtrees drain even after the root settles.
    pub fn run<T: TaskValue>(&self, task: &Task<T>) {
        let plan_id = self.next_plan_id.fetch_add(1, Ordering::Relaxed);
        let plan = PlanShared::new(plan_id, self.timer.handle());
        PlanShared::schedule(&plan, &task.handle(), None, Vec::new());

        self.active.enter();
        let active = Arc::clone(&self.active);
        let submitted = self.workers.submit(Box::new(move || {
            PlanShared::dispatch_loop(&plan);
            active.exit();
        }));
        if !submitted {
            self.active.exit();
        }
    }

    /// The executor backing [`Task::blocking`]: a fixed pool separate from
    /// the plan dispatch threads.
    #[must_use]
    pub fn executor(&self) -> Arc<dyn Executor> {
        Arc::clone(&self.blocking) as Arc<dyn Executor>
    }

    /// Waits for running plans to drain, then stops all engine threads.
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        self.active.wait_idle();
        self.timer.shutdown();
        self.workers.shutdown();
        self.blocking.shutdown();
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("active_plans", &*self.active.count.lock())
            .finish_non_exhaustive()
    }
}
