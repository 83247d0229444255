//! The task abstraction: a promise plus the body that will settle it.
//!
//! A [`Task`] is both a node in a composition graph and a handle to its
//! eventual result. Tasks are built by factories ([`factory`]), composed
//! with combinators ([`combinator`], [`par`]), and executed by a scheduler
//! through the reserved `context_run` entry point. The task's own promise
//! settles exactly once, from whichever of {body completion, wrapper commit,
//! cancellation} gets there first.
//!
//! Lifecycle: `Created → Scheduled → Running → {Done, Failed, Cancelled}`,
//! monotone. Priority is mutable only in `Created`. A task is run at most
//! once; repeated scheduling attempts are no-ops so the same upstream task
//! can feed several downstream drivers.

pub mod combinator;
pub mod factory;
pub mod par;
pub mod wrapper;

use crate::context::Context;
use crate::error::{Error, ErrorKind, Result};
use crate::logging::TaskLogger;
use crate::promise::{Promise, PromiseResult, SettablePromise};
use crate::trace::{summarize, Related, Relationship, ShallowTrace, Trace};
use crate::task::wrapper::{compose, ContextRunWrapper};
use parking_lot::Mutex;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

/// Lowest allowed task priority.
pub const MIN_PRIORITY: i32 = i32::MIN / 2;
/// Highest allowed task priority. Timeout timers run at this priority.
pub const MAX_PRIORITY: i32 = i32::MAX / 2;
/// The priority tasks are created with.
pub const DEFAULT_PRIORITY: i32 = 0;

/// Bounds required of a task's value type: results are fanned out to
/// listeners by clone, cross threads, and render into trace summaries.
pub trait TaskValue: Clone + Send + std::fmt::Debug + 'static {}

impl<T: Clone + Send + std::fmt::Debug + 'static> TaskValue for T {}

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// A unique identifier for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TaskId(u64);

impl TaskId {
    fn next() -> Self {
        Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw numeric id.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Task lifecycle state. Terminal states are `Done`, `Failed`, `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TaskState {
    /// Constructed, not yet handed to a scheduler.
    Created,
    /// Enqueued (or reserved by a barrier), not yet running.
    Scheduled,
    /// Body invoked; promise not yet settled.
    Running,
    /// Promise resolved with a value.
    Done,
    /// Promise failed with a non-cancellation error.
    Failed,
    /// Promise failed with a cancellation error.
    Cancelled,
}

impl TaskState {
    /// Returns true for `Done`, `Failed` and `Cancelled`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

struct Lifecycle {
    state: TaskState,
    priority: i32,
    scheduled_at: Option<u64>,
    started_at: Option<u64>,
    ended_at: Option<u64>,
}

/// Type-erased metadata shared by every task.
struct TaskCore {
    id: TaskId,
    name: String,
    hidden: bool,
    lifecycle: Mutex<Lifecycle>,
    relationships: Mutex<Vec<Related>>,
}

impl TaskCore {
    fn new(name: String, hidden: bool) -> Self {
        Self {
            id: TaskId::next(),
            name,
            hidden,
            lifecycle: Mutex::new(Lifecycle {
                state: TaskState::Created,
                priority: DEFAULT_PRIORITY,
                scheduled_at: None,
                started_at: None,
                ended_at: None,
            }),
            relationships: Mutex::new(Vec::new()),
        }
    }

    fn state(&self) -> TaskState {
        self.lifecycle.lock().state
    }

    fn priority(&self) -> i32 {
        self.lifecycle.lock().priority
    }

    fn set_priority(&self, priority: i32) -> Result<bool> {
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
            return Err(Error::new(ErrorKind::InvalidArgument)
                .with_context(format!("priority {priority} out of range")));
        }
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state != TaskState::Created {
            return Ok(false);
        }
        lifecycle.priority = priority;
        Ok(true)
    }

    /// Created → Scheduled. Returns false from any other state, which is
    /// what makes repeated `run` calls no-ops.
    fn mark_scheduled(&self) -> bool {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state != TaskState::Created {
            return false;
        }
        lifecycle.state = TaskState::Scheduled;
        lifecycle.scheduled_at = Some(epoch_millis());
        true
    }

    /// Created|Scheduled → Running. Returns false once terminal or already
    /// running, enforcing run-at-most-once.
    fn begin_run(&self) -> bool {
        let mut lifecycle = self.lifecycle.lock();
        if !matches!(lifecycle.state, TaskState::Created | TaskState::Scheduled) {
            return false;
        }
        lifecycle.state = TaskState::Running;
        lifecycle.started_at = Some(epoch_millis());
        true
    }

    fn complete(&self, terminal: TaskState) {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state.is_terminal() {
            return;
        }
        lifecycle.state = terminal;
        lifecycle.ended_at = Some(epoch_millis());
    }

    fn add_related(&self, relationship: Relationship, task: TaskHandle) {
        self.relationships.lock().push(Related::new(relationship, task));
    }
}

type TaskBody<T> = Box<dyn FnOnce(&mut dyn Context) -> Promise<T> + Send>;

struct TaskInner<T> {
    core: TaskCore,
    promise: SettablePromise<T>,
    body: Mutex<Option<TaskBody<T>>>,
    wrapper: Mutex<Option<Box<dyn ContextRunWrapper<T> + Send>>>,
}

/// The type-erased view of a task used by schedulers, barriers and trace
/// edges. Implemented by `TaskInner<T>` for every value type.
pub(crate) trait TaskNode: Send + Sync {
    fn id(&self) -> TaskId;
    fn name(&self) -> &str;
    fn priority(&self) -> i32;
    fn state(&self) -> TaskState;
    fn system_hidden(&self) -> bool;
    fn mark_scheduled(&self) -> bool;
    fn cancel(&self, reason: Error) -> bool;
    fn on_terminal(&self, listener: Box<dyn FnOnce(bool) + Send>);
    fn add_related(&self, relationship: Relationship, task: TaskHandle);
    fn relationships(&self) -> Vec<Related>;
    fn shallow_trace(&self) -> ShallowTrace;
    fn context_run(
        &self,
        this: &TaskHandle,
        ctx: &mut dyn Context,
        logger: &TaskLogger,
        parent: Option<&TaskHandle>,
        predecessors: &[TaskHandle],
    );
}

impl<T: TaskValue> TaskNode for TaskInner<T> {
    fn id(&self) -> TaskId {
        self.core.id
    }

    fn name(&self) -> &str {
        &self.core.name
    }

    fn priority(&self) -> i32 {
        self.core.priority()
    }

    fn state(&self) -> TaskState {
        self.core.state()
    }

    fn system_hidden(&self) -> bool {
        self.core.hidden
    }

    fn mark_scheduled(&self) -> bool {
        self.core.mark_scheduled()
    }

    fn cancel(&self, reason: Error) -> bool {
        let error = if reason.is_cancelled() {
            reason
        } else {
            Error::cancelled().with_source(reason)
        };
        self.promise.fail(error)
    }

    fn on_terminal(&self, listener: Box<dyn FnOnce(bool) + Send>) {
        self.promise
            .promise()
            .on_terminal(move |res| listener(res.is_ok()));
    }

    fn add_related(&self, relationship: Relationship, task: TaskHandle) {
        self.core.add_related(relationship, task);
    }

    fn relationships(&self) -> Vec<Related> {
        self.core.relationships.lock().clone()
    }

    fn shallow_trace(&self) -> ShallowTrace {
        let (state, priority, scheduled_at, started_at, ended_at) = {
            let lifecycle = self.core.lifecycle.lock();
            (
                lifecycle.state,
                lifecycle.priority,
                lifecycle.scheduled_at,
                lifecycle.started_at,
                lifecycle.ended_at,
            )
        };
        let result_summary = self.promise.promise().result().map(|res| match res {
            Ok(value) => summarize(format!("{value:?}")),
            Err(error) => summarize(error.to_string()),
        });
        ShallowTrace {
            id: self.core.id.raw(),
            name: self.core.name.clone(),
            state,
            system_hidden: self.core.hidden,
            priority,
            scheduled_at,
            started_at,
            ended_at,
            result_summary,
        }
    }

    fn context_run(
        &self,
        this: &TaskHandle,
        ctx: &mut dyn Context,
        logger: &TaskLogger,
        parent: Option<&TaskHandle>,
        predecessors: &[TaskHandle],
    ) {
        if !self.core.begin_run() {
            return;
        }
        for pred in predecessors {
            self.core.add_related(Relationship::SuccessorOf, pred.clone());
        }
        if let Some(parent) = parent {
            parent.add_related(Relationship::ParentOf, this.clone());
        }
        logger.task_started(this);
        {
            let logger = logger.clone();
            let this = this.clone();
            self.promise
                .promise()
                .on_terminal(move |res| logger.task_ended(&this, res.is_ok()));
        }

        let wrapper = self.wrapper.lock().take();
        if let Some(w) = &wrapper {
            w.before(ctx);
        }

        let body = self.body.lock().take();
        let body_promise = match body {
            Some(body) => match catch_unwind(AssertUnwindSafe(|| body(ctx))) {
                Ok(promise) => promise,
                Err(payload) => Promise::failed(Error::from_panic(payload)),
            },
            None => Promise::failed(
                Error::new(ErrorKind::Internal).with_context("task body already consumed"),
            ),
        };

        let final_promise = match wrapper {
            Some(w) => w.after(ctx, body_promise),
            None => body_promise,
        };

        let settable = self.promise.clone();
        final_promise.on_terminal(move |res| {
            settable.settle(res.clone());
        });
    }
}

/// A cheap-clone, type-erased reference to a task.
///
/// This is the currency of the [`Context`] API and of trace relationship
/// edges. Equality and hashing are by task id.
#[derive(Clone)]
pub struct TaskHandle {
    node: Arc<dyn TaskNode>,
}

impl TaskHandle {
    /// Returns the raw numeric task id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.node.id().raw()
    }

    /// Returns the task name.
    #[must_use]
    pub fn name(&self) -> String {
        self.node.name().to_string()
    }

    /// Returns the task priority.
    #[must_use]
    pub fn priority(&self) -> i32 {
        self.node.priority()
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.node.state()
    }

    /// Returns true once the task is in a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.node.state().is_terminal()
    }

    /// Returns the system-hidden trace flag.
    #[must_use]
    pub fn system_hidden(&self) -> bool {
        self.node.system_hidden()
    }

    /// Cancels the task. See [`Task::cancel`].
    pub fn cancel(&self, reason: Error) -> bool {
        self.node.cancel(reason)
    }

    /// Returns a point-in-time snapshot of the task.
    #[must_use]
    pub fn shallow_trace(&self) -> ShallowTrace {
        self.node.shallow_trace()
    }

    /// Returns the task's relationship edges.
    #[must_use]
    pub fn relationships(&self) -> Vec<Related> {
        self.node.relationships()
    }

    /// Collects the trace graph reachable from this task.
    #[must_use]
    pub fn trace(&self) -> Trace {
        Trace::collect(self)
    }

    pub(crate) fn mark_scheduled(&self) -> bool {
        self.node.mark_scheduled()
    }

    pub(crate) fn on_terminal(&self, listener: Box<dyn FnOnce(bool) + Send>) {
        self.node.on_terminal(listener);
    }

    pub(crate) fn add_related(&self, relationship: Relationship, task: TaskHandle) {
        self.node.add_related(relationship, task);
    }

    /// Runs the task. Reserved for schedulers; user code never calls this.
    pub(crate) fn context_run(
        &self,
        ctx: &mut dyn Context,
        logger: &TaskLogger,
        parent: Option<&TaskHandle>,
        predecessors: &[TaskHandle],
    ) {
        self.node.context_run(self, ctx, logger, parent, predecessors);
    }
}

impl PartialEq for TaskHandle {
    fn eq(&self, other: &Self) -> bool {
        self.node.id() == other.node.id()
    }
}

impl Eq for TaskHandle {}

impl std::hash::Hash for TaskHandle {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.node.id().hash(state);
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TaskHandle({} {:?})", self.node.id(), self.node.name())
    }
}

/// A deferred computation that carries its eventual result.
///
/// Cheaply clonable; clones share the same underlying task. Construct tasks
/// with the factories in [`factory`] and compose them with the methods in
/// [`combinator`].
pub struct Task<T> {
    inner: Arc<TaskInner<T>>,
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.inner.core.id)
            .field("name", &self.inner.core.name)
            .field("state", &self.inner.core.state())
            .finish()
    }
}

impl<T: TaskValue> Task<T> {
    /// The fundamental constructor: a named task whose body receives the
    /// scheduling context and returns the promise backing the result.
    pub(crate) fn from_body(
        name: impl Into<String>,
        hidden: bool,
        body: impl FnOnce(&mut dyn Context) -> Promise<T> + Send + 'static,
    ) -> Self {
        let inner = Arc::new(TaskInner {
            core: TaskCore::new(name.into(), hidden),
            promise: SettablePromise::new(),
            body: Mutex::new(Some(Box::new(body))),
            wrapper: Mutex::new(None),
        });
        // The task's own state mirrors its promise. Weak, because the
        // listener lives inside the promise the task owns.
        let weak: Weak<TaskInner<T>> = Arc::downgrade(&inner);
        inner.promise.promise().on_terminal(move |res| {
            if let Some(inner) = weak.upgrade() {
                let terminal = match res {
                    Ok(_) => TaskState::Done,
                    Err(e) if e.is_cancelled() => TaskState::Cancelled,
                    Err(_) => TaskState::Failed,
                };
                inner.core.complete(terminal);
            }
        });
        Self { inner }
    }

    /// Returns the task name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.core.name
    }

    /// Returns the task priority.
    #[must_use]
    pub fn priority(&self) -> i32 {
        self.inner.core.priority()
    }

    /// Overrides the priority. Higher-priority tasks dispatch before
    /// lower-priority ones that became ready at the same time.
    ///
    /// Returns `Ok(false)` once the task has left the `Created` state, and
    /// `Err(InvalidArgument)` if `priority` is outside
    /// `[MIN_PRIORITY, MAX_PRIORITY]`.
    pub fn set_priority(&self, priority: i32) -> Result<bool> {
        self.inner.core.set_priority(priority)
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.inner.core.state()
    }

    /// Returns true once the task is terminal.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.inner.core.state().is_terminal()
    }

    /// Returns true if the task failed (cancellation counts as failure).
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.inner.promise.promise().is_failed()
    }

    /// Cancels the task if it has not already settled.
    ///
    /// The task fails with the designated cancellation error (carrying
    /// `reason` as its source unless `reason` is itself a cancellation).
    /// Returns true on the call that performed the transition. Downstream
    /// tasks observe the cancellation through their promise links; upstream
    /// tasks are unaffected.
    pub fn cancel(&self, reason: Error) -> bool {
        TaskNode::cancel(&*self.inner, reason)
    }

    /// Returns a read handle to the result promise.
    #[must_use]
    pub fn promise(&self) -> Promise<T> {
        self.inner.promise.promise()
    }

    /// Blocks until the task settles and returns its result.
    #[must_use]
    pub fn get(&self) -> PromiseResult<T> {
        self.inner.promise.promise().wait()
    }

    /// Returns the type-erased handle used by schedulers and traces.
    #[must_use]
    pub fn handle(&self) -> TaskHandle {
        TaskHandle {
            node: Arc::clone(&self.inner) as Arc<dyn TaskNode>,
        }
    }

    /// Returns a point-in-time snapshot of this task.
    #[must_use]
    pub fn shallow_trace(&self) -> ShallowTrace {
        self.inner.shallow_trace()
    }

    /// Returns this task's relationship edges.
    #[must_use]
    pub fn relationships(&self) -> Vec<Related> {
        TaskNode::relationships(&*self.inner)
    }

    /// Collects the trace graph reachable from this task.
    #[must_use]
    pub fn trace(&self) -> Trace {
        Trace::collect(&self.handle())
    }

    /// Composes `wrapper` outside any existing run wrappers: its `before`
    /// runs first and its `after` runs last.
    ///
    /// Returns false (and installs nothing) once execution has begun.
    pub fn wrap_context_run(&self, wrapper: Box<dyn ContextRunWrapper<T> + Send>) -> bool {
        let lifecycle = self.inner.core.lifecycle.lock();
        if !matches!(lifecycle.state, TaskState::Created | TaskState::Scheduled) {
            return false;
        }
        let mut slot = self.inner.wrapper.lock();
        *slot = Some(match slot.take() {
            Some(existing) => compose(wrapper, existing),
            None => wrapper,
        });
        true
    }
}
