//! Composable decorators around task execution, and the timeout wrapper
//! built on them.
//!
//! A [`ContextRunWrapper`] brackets the reserved run path: `before` fires
//! ahead of the task body and may schedule auxiliary tasks (a timer, say);
//! `after` receives the promise the body returned and yields the promise
//! that backs the task's result. Wrappers compose; the outermost wrapper's
//! `before` runs first and its `after` runs last.
//!
//! The timeout wrapper is the canonical use. It substitutes a fresh result
//! promise and races two committers for it: a `MAX_PRIORITY` timer task and
//! the body's completion listener. A single atomic flag decides the winner;
//! the loser's outcome is ignored, so a body that completes after the
//! deadline cannot resurrect an already-failed result.

use crate::context::Context;
use crate::error::Error;
use crate::promise::{Promise, SettablePromise};
use crate::task::factory;
use crate::task::{Task, TaskValue, MAX_PRIORITY};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A decorator around the reserved run path of one task.
pub trait ContextRunWrapper<T>: Send {
    /// Called before the task body runs. May schedule auxiliary tasks.
    fn before(&self, ctx: &mut dyn Context);

    /// Receives the promise returned by the body (or by an inner wrapper)
    /// and returns the promise that must back the task's result.
    fn after(&self, ctx: &mut dyn Context, promise: Promise<T>) -> Promise<T>;
}

struct Composed<T> {
    outer: Box<dyn ContextRunWrapper<T> + Send>,
    inner: Box<dyn ContextRunWrapper<T> + Send>,
}

impl<T> ContextRunWrapper<T> for Composed<T> {
    fn before(&self, ctx: &mut dyn Context) {
        self.outer.before(ctx);
        self.inner.before(ctx);
    }

    fn after(&self, ctx: &mut dyn Context, promise: Promise<T>) -> Promise<T> {
        let promise = self.inner.after(ctx, promise);
        self.outer.after(ctx, promise)
    }
}

/// Composes two wrappers with `outer` outside `inner`.
pub(crate) fn compose<T: 'static>(
    outer: Box<dyn ContextRunWrapper<T> + Send>,
    inner: Box<dyn ContextRunWrapper<T> + Send>,
) -> Box<dyn ContextRunWrapper<T> + Send> {
    Box::new(Composed { outer, inner })
}

/// The timeout decorator: first committer between the timer and the body
/// wins the result promise.
pub struct TimeoutRunWrapper<T> {
    result: SettablePromise<T>,
    committed: Arc<AtomicBool>,
    duration: Duration,
    error: Error,
}

impl<T: TaskValue> TimeoutRunWrapper<T> {
    /// Creates a timeout wrapper that fails with `error` after `duration`.
    #[must_use]
    pub fn new(duration: Duration, error: Error) -> Self {
        Self {
            result: SettablePromise::new(),
            committed: Arc::new(AtomicBool::new(false)),
            duration,
            error,
        }
    }
}

impl<T: TaskValue> ContextRunWrapper<T> for TimeoutRunWrapper<T> {
    fn before(&self, ctx: &mut dyn Context) {
        let committed = Arc::clone(&self.committed);
        let result = self.result.clone();
        let error = self.error.clone();
        let timer_task = factory::action_named("timeoutTimer", move || {
            if committed
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                result.fail(error);
            }
        });
        // The timer must beat anything else that becomes ready with it.
        let _ = timer_task.set_priority(MAX_PRIORITY);
        ctx.create_timer(self.duration, &timer_task.handle());
    }

    fn after(&self, _ctx: &mut dyn Context, promise: Promise<T>) -> Promise<T> {
        let committed = Arc::clone(&self.committed);
        let result = self.result.clone();
        promise.on_terminal(move |res| {
            if committed
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                result.settle(res.clone());
            }
        });
        self.result.promise()
    }
}

impl<T: TaskValue> Task<T> {
    /// Fails this task with the designated timeout error unless it settles
    /// within `duration` of starting to run.
    ///
    /// The wrapper is installed in place and the task itself is returned.
    /// The deadline is measured from dispatch; a body that keeps running
    /// past it is abandoned, not cancelled.
    #[must_use]
    pub fn with_timeout(self, duration: Duration) -> Self {
        self.wrap_context_run(Box::new(TimeoutRunWrapper::new(duration, Error::timeout())));
        self
    }
}
