//! Factories for leaf tasks.
//!
//! Every factory comes in a default-named flavor (`value`, `callable`, …)
//! and a `_named` flavor that sets the name shown in traces. Bodies run on
//! the plan's dispatch thread; work that would block belongs in
//! [`blocking`](Task::blocking), which offloads to a caller-supplied
//! [`Executor`].

use crate::context::Context;
use crate::error::Error;
use crate::promise::{Promise, SettablePromise};
use crate::task::{Task, TaskValue};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Something that can run a job on another thread.
///
/// The engine's blocking pool implements this; tests may substitute their
/// own (an inline executor, a rayon bridge, …).
pub trait Executor: Send + Sync {
    /// Executes the job, eventually, on some thread.
    fn execute(&self, job: Box<dyn FnOnce() + Send>);
}

/// Creates a `Task<()>` that runs `action` for its side effect.
/// Equivalent to [`action_named`] with the name `"action"`.
#[must_use]
pub fn action(action: impl FnOnce() + Send + 'static) -> Task<()> {
    action_named("action", action)
}

/// Creates a named `Task<()>` that runs `action` for its side effect.
#[must_use]
pub fn action_named(name: impl Into<String>, action: impl FnOnce() + Send + 'static) -> Task<()> {
    Task::from_body(name, false, move |_ctx| {
        action();
        Promise::resolved(())
    })
}

impl<T: TaskValue> Task<T> {
    /// Creates a task that completes with `value`.
    #[must_use]
    pub fn value(value: T) -> Self {
        Self::value_named("value", value)
    }

    /// Creates a named task that completes with `value`.
    #[must_use]
    pub fn value_named(name: impl Into<String>, value: T) -> Self {
        Self::callable_named(name, move || value)
    }

    /// Creates a task that fails with `error`.
    #[must_use]
    pub fn failure(error: Error) -> Self {
        Self::failure_named("failure", error)
    }

    /// Creates a named task that fails with `error`.
    #[must_use]
    pub fn failure_named(name: impl Into<String>, error: Error) -> Self {
        Self::from_body(name, false, move |_ctx| Promise::failed(error))
    }

    /// Creates a task that completes with the return value of `f`.
    ///
    /// A panic in `f` fails the task with a `Panicked` error.
    #[must_use]
    pub fn callable(f: impl FnOnce() -> T + Send + 'static) -> Self {
        Self::callable_named("callable", f)
    }

    /// Creates a named task that completes with the return value of `f`.
    #[must_use]
    pub fn callable_named(name: impl Into<String>, f: impl FnOnce() -> T + Send + 'static) -> Self {
        Self::from_body(name, false, move |_ctx| Promise::resolved(f()))
    }

    /// Creates a task whose body receives the scheduling [`Context`] and
    /// returns the promise backing the result. `system_hidden` marks the
    /// node as plumbing in traces.
    ///
    /// This is the primitive every combinator is built on.
    #[must_use]
    pub fn async_ctx(
        name: impl Into<String>,
        body: impl FnOnce(&mut dyn Context) -> Promise<T> + Send + 'static,
        system_hidden: bool,
    ) -> Self {
        Self::from_body(name, system_hidden, body)
    }

    /// Creates a task from a callable that returns a promise, ignoring the
    /// context.
    #[must_use]
    pub fn async_callable(
        name: impl Into<String>,
        f: impl FnOnce() -> Promise<T> + Send + 'static,
        system_hidden: bool,
    ) -> Self {
        Self::from_body(name, system_hidden, move |_ctx| f())
    }

    /// Creates a task that runs `f` on `executor` and completes with its
    /// return value. Equivalent to [`blocking_named`](Self::blocking_named)
    /// with the name `"blocking"`.
    #[must_use]
    pub fn blocking(f: impl FnOnce() -> T + Send + 'static, executor: &Arc<dyn Executor>) -> Self {
        Self::blocking_named("blocking", f, executor)
    }

    /// Creates a named task that runs `f` on `executor`.
    ///
    /// The task body only submits the job and suspends on a settable
    /// promise; completion is reported from the executor's thread. A panic
    /// in `f` fails the task with a `Panicked` error.
    #[must_use]
    pub fn blocking_named(
        name: impl Into<String>,
        f: impl FnOnce() -> T + Send + 'static,
        executor: &Arc<dyn Executor>,
    ) -> Self {
        let executor = Arc::clone(executor);
        Self::from_body(name, false, move |_ctx| {
            let promise = SettablePromise::new();
            let dst = promise.clone();
            executor.execute(Box::new(move || match catch_unwind(AssertUnwindSafe(f)) {
                Ok(value) => {
                    dst.done(value);
                }
                Err(payload) => {
                    dst.fail(Error::from_panic(payload));
                }
            }));
            promise.promise()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::logging::TaskLogger;
    use crate::task::{TaskHandle, TaskState};
    use std::time::Duration;

    struct DriveContext {
        logger: TaskLogger,
    }

    impl Context for DriveContext {
        fn run(&mut self, task: &TaskHandle) {
            if task.mark_scheduled() {
                let logger = self.logger.clone();
                task.context_run(self, &logger, None, &[]);
            }
        }

        fn run_after(
            &mut self,
            _preds: &[TaskHandle],
            _task: &TaskHandle,
            _mode: crate::context::AfterMode,
        ) {
            unimplemented!("not used by factory tests");
        }

        fn create_timer(&mut self, _delay: Duration, _task: &TaskHandle) {}
    }

    fn drive<T: TaskValue>(task: &Task<T>) {
        let mut ctx = DriveContext {
            logger: TaskLogger::detached(),
        };
        ctx.run(&task.handle());
    }

    #[test]
    fn value_factory() {
        let t = Task::value_named("ten", 10);
        assert_eq!(t.name(), "ten");
        drive(&t);
        assert_eq!(t.get().expect("value"), 10);
    }

    #[test]
    fn default_names() {
        assert_eq!(Task::value(1).name(), "value");
        assert_eq!(Task::<i32>::callable(|| 1).name(), "callable");
        assert_eq!(Task::<i32>::failure(Error::user("x")).name(), "failure");
        assert_eq!(action(|| {}).name(), "action");
    }

    #[test]
    fn failure_factory() {
        let t: Task<i32> = Task::failure_named("bad", Error::user("broken input"));
        drive(&t);
        assert_eq!(t.state(), TaskState::Failed);
        let err = t.promise().error().expect("error");
        assert_eq!(err.kind(), ErrorKind::User);
    }

    #[test]
    fn callable_panic_becomes_failure() {
        let t: Task<i32> = Task::callable(|| panic!("arithmetic error"));
        drive(&t);
        let err = t.promise().error().expect("error");
        assert_eq!(err.kind(), ErrorKind::Panicked);
    }

    #[test]
    fn action_runs_for_effect() {
        let hit = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let h = Arc::clone(&hit);
        let t = action_named("poke", move || h.store(true, std::sync::atomic::Ordering::SeqCst));
        drive(&t);
        assert!(hit.load(std::sync::atomic::Ordering::SeqCst));
        assert!(t.get().is_ok());
    }

    #[test]
    fn blocking_runs_on_executor() {
        struct InlineExecutor;
        impl Executor for InlineExecutor {
            fn execute(&self, job: Box<dyn FnOnce() + Send>) {
                job();
            }
        }
        let executor: Arc<dyn Executor> = Arc::new(InlineExecutor);
        let t = Task::blocking_named("read", || "contents".to_string(), &executor);
        drive(&t);
        assert_eq!(t.get().expect("value"), "contents");
    }

    #[test]
    fn blocking_panic_becomes_failure() {
        struct InlineExecutor;
        impl Executor for InlineExecutor {
            fn execute(&self, job: Box<dyn FnOnce() + Send>) {
                job();
            }
        }
        let executor: Arc<dyn Executor> = Arc::new(InlineExecutor);
        let t: Task<i32> = Task::blocking(|| panic!("io failure"), &executor);
        drive(&t);
        assert_eq!(
            t.promise().error().expect("error").kind(),
            ErrorKind::Panicked
        );
    }
}
