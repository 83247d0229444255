//! Functional composition of tasks.
//!
//! Every combinator builds its graph eagerly: the returned task's body
//! closes over the upstream task handle, schedules it in the same context,
//! and wires promises together. Failure semantics:
//!
//! - `map`, `flat_map`, `and_then` short-circuit: an upstream failure (or
//!   cancellation) becomes the derived task's failure, untransformed.
//! - `recover`, `recover_with`, `fall_back_to` intercept failures;
//!   `fall_back_to` restores the *original* error if the fallback fails.
//! - `with_try` never fails: it reifies the result as a value.
//! - `with_side_effect` isolates its subtree: the side effect runs only
//!   after upstream success and its outcome never reaches the main chain.
//!
//! A panicking user closure fails the derived task with a `Panicked` error;
//! the upstream result is never mutated.

use crate::context::{Context, ContextExt};
use crate::error::{Error, ErrorKind};
use crate::promise::{propagate_result, Promise, PromiseResult, SettablePromise};
use crate::task::{Task, TaskValue};
use crate::trace::Relationship;
use std::panic::{catch_unwind, AssertUnwindSafe};

fn internal(context: &'static str) -> Error {
    Error::new(ErrorKind::Internal).with_context(context)
}

impl<T: TaskValue> Task<T> {
    /// Generalized transform: runs this task, then settles the derived task
    /// by applying `propagator` to the terminal result. The building block
    /// for `map`, `and_then`, `recover` and `with_try`.
    #[must_use]
    pub fn apply_named<R: TaskValue>(
        &self,
        desc: impl Into<String>,
        propagator: impl FnOnce(&PromiseResult<T>) -> PromiseResult<R> + Send + 'static,
    ) -> Task<R> {
        let that = self.clone();
        let derived = Task::async_ctx(
            desc,
            move |ctx: &mut dyn Context| {
                let result = SettablePromise::new();
                let dst = result.clone();
                that.promise().on_terminal(move |res| {
                    let out = catch_unwind(AssertUnwindSafe(|| propagator(res)))
                        .unwrap_or_else(|payload| Err(Error::from_panic(payload)));
                    dst.settle(out);
                });
                ctx.run(&that.handle());
                result.promise()
            },
            false,
        );
        derived
            .handle()
            .add_related(Relationship::PotentialParentOf, self.handle());
        derived
    }

    /// Transforms a successful result with `f`. Upstream failure passes
    /// through untouched; a panic in `f` fails the derived task.
    #[must_use]
    pub fn map<R: TaskValue>(&self, f: impl FnOnce(T) -> R + Send + 'static) -> Task<R> {
        self.map_named("map", f)
    }

    /// [`map`](Self::map) with a trace description.
    #[must_use]
    pub fn map_named<R: TaskValue>(
        &self,
        desc: impl Into<String>,
        f: impl FnOnce(T) -> R + Send + 'static,
    ) -> Task<R> {
        self.apply_named(desc, move |res| match res {
            Ok(value) => Ok(f(value.clone())),
            Err(error) => Err(error.clone()),
        })
    }

    /// Chains a task-returning function onto a successful result. The inner
    /// task runs in the same context and its result becomes the derived
    /// result. On upstream failure `f` is not called.
    #[must_use]
    pub fn flat_map<R: TaskValue>(
        &self,
        f: impl FnOnce(T) -> Task<R> + Send + 'static,
    ) -> Task<R> {
        self.flat_map_named("flatMap", f)
    }

    /// [`flat_map`](Self::flat_map) with a trace description.
    #[must_use]
    pub fn flat_map_named<R: TaskValue>(
        &self,
        desc: impl Into<String>,
        f: impl FnOnce(T) -> Task<R> + Send + 'static,
    ) -> Task<R> {
        let desc = desc.into();
        let runner_name = desc.clone();
        let that = self.clone();
        let derived = Task::async_ctx(
            desc,
            move |context: &mut dyn Context| {
                let result = SettablePromise::new();
                let upstream = that.clone();
                let dst = result.clone();
                let runner: Task<R> = Task::async_ctx(
                    runner_name,
                    move |ctx: &mut dyn Context| match upstream.promise().result() {
                        Some(Ok(value)) => {
                            match catch_unwind(AssertUnwindSafe(|| f(value))) {
                                Ok(inner) => {
                                    propagate_result(&inner.promise(), &dst);
                                    ctx.run(&inner.handle());
                                    inner.promise()
                                }
                                Err(payload) => {
                                    let error = Error::from_panic(payload);
                                    dst.fail(error.clone());
                                    Promise::failed(error)
                                }
                            }
                        }
                        Some(Err(error)) => {
                            dst.fail(error.clone());
                            Promise::failed(error)
                        }
                        None => {
                            let error = internal("flatMap ran before its input settled");
                            dst.fail(error.clone());
                            Promise::failed(error)
                        }
                    },
                    true,
                );
                context.after(&[that.handle()]).run(&runner.handle());
                context.run(&that.handle());
                result.promise()
            },
            true,
        );
        derived
            .handle()
            .add_related(Relationship::PotentialParentOf, self.handle());
        derived
    }

    /// Observes a successful value without changing it. The consumer's
    /// return is discarded; a panic fails the derived task.
    #[must_use]
    pub fn and_then(&self, consumer: impl FnOnce(T) + Send + 'static) -> Task<T> {
        self.and_then_named("andThen", consumer)
    }

    /// [`and_then`](Self::and_then) with a trace description.
    #[must_use]
    pub fn and_then_named(
        &self,
        desc: impl Into<String>,
        consumer: impl FnOnce(T) + Send + 'static,
    ) -> Task<T> {
        self.apply_named(desc, move |res| match res {
            Ok(value) => {
                consumer(value.clone());
                Ok(value.clone())
            }
            Err(error) => Err(error.clone()),
        })
    }

    /// Schedules `task` after this task terminates (in any state) and
    /// yields `task`'s result verbatim.
    #[must_use]
    pub fn and_then_task<R: TaskValue>(&self, task: Task<R>) -> Task<R> {
        self.and_then_task_named("andThen", task)
    }

    /// [`and_then_task`](Self::and_then_task) with a trace description.
    #[must_use]
    pub fn and_then_task_named<R: TaskValue>(
        &self,
        desc: impl Into<String>,
        task: Task<R>,
    ) -> Task<R> {
        let that = self.clone();
        let next_handle = task.handle();
        let next = task.clone();
        let derived = Task::async_ctx(
            desc,
            move |context: &mut dyn Context| {
                let result = SettablePromise::new();
                context.after(&[that.handle()]).run(&next.handle());
                propagate_result(&next.promise(), &result);
                context.run(&that.handle());
                result.promise()
            },
            true,
        );
        derived
            .handle()
            .add_related(Relationship::PotentialParentOf, self.handle());
        derived
            .handle()
            .add_related(Relationship::PotentialParentOf, next_handle);
        derived
    }

    /// Attaches a fire-and-forget subtree: after this task succeeds,
    /// `f(value)` produces a task that is scheduled as a side effect. The
    /// derived task completes with this task's result as soon as this task
    /// settles; the side effect's outcome is never propagated. If this task
    /// fails or is cancelled, the side effect never runs.
    #[must_use]
    pub fn with_side_effect<S: TaskValue>(
        &self,
        f: impl FnOnce(T) -> Task<S> + Send + 'static,
    ) -> Task<T> {
        self.with_side_effect_named("withSideEffect", f)
    }

    /// [`with_side_effect`](Self::with_side_effect) with a trace
    /// description.
    #[must_use]
    pub fn with_side_effect_named<S: TaskValue>(
        &self,
        desc: impl Into<String>,
        f: impl FnOnce(T) -> Task<S> + Send + 'static,
    ) -> Task<T> {
        let desc = desc.into();
        let wrapper_name = desc.clone();
        let that = self.clone();
        let derived = Task::async_ctx(
            desc,
            move |context: &mut dyn Context| {
                let upstream = that.clone();
                let wrapper: Task<()> = Task::async_ctx(
                    wrapper_name,
                    move |ctx: &mut dyn Context| match upstream.promise().result() {
                        Some(Ok(value)) => match catch_unwind(AssertUnwindSafe(|| f(value))) {
                            Ok(side) => {
                                let done = SettablePromise::new();
                                let signal = done.clone();
                                side.promise().on_terminal(move |res| match res {
                                    Ok(_) => {
                                        signal.done(());
                                    }
                                    Err(error) => {
                                        signal.fail(error.clone());
                                    }
                                });
                                ctx.run(&side.handle());
                                done.promise()
                            }
                            Err(payload) => Promise::failed(Error::from_panic(payload)),
                        },
                        _ => Promise::failed(internal(
                            "side effect scheduled without successful predecessor",
                        )),
                    },
                    true,
                );
                wrapper
                    .handle()
                    .add_related(Relationship::SideEffectOf, that.handle());
                context
                    .after(&[that.handle()])
                    .run_side_effect(&wrapper.handle());
                context.run(&that.handle());
                that.promise()
            },
            true,
        );
        derived
            .handle()
            .add_related(Relationship::PotentialParentOf, self.handle());
        derived
    }

    /// Attaches an existing task as a side effect of this task's success.
    #[must_use]
    pub fn with_side_effect_task<S: TaskValue>(&self, side: Task<S>) -> Task<T> {
        self.with_side_effect_task_named("withSideEffect", side)
    }

    /// [`with_side_effect_task`](Self::with_side_effect_task) with a trace
    /// description.
    #[must_use]
    pub fn with_side_effect_task_named<S: TaskValue>(
        &self,
        desc: impl Into<String>,
        side: Task<S>,
    ) -> Task<T> {
        let that = self.clone();
        let side_handle = side.handle();
        side_handle.add_related(Relationship::SideEffectOf, self.handle());
        let derived = Task::async_ctx(
            desc,
            move |context: &mut dyn Context| {
                context
                    .after(&[that.handle()])
                    .run_side_effect(&side_handle);
                context.run(&that.handle());
                that.promise()
            },
            true,
        );
        derived
            .handle()
            .add_related(Relationship::PotentialParentOf, self.handle());
        derived
    }

    /// Recovers from failure (including cancellation) with a plain value
    /// computed by `f`. On success `f` is not called.
    #[must_use]
    pub fn recover(&self, f: impl FnOnce(Error) -> T + Send + 'static) -> Task<T> {
        self.recover_named("recover", f)
    }

    /// [`recover`](Self::recover) with a trace description.
    #[must_use]
    pub fn recover_named(
        &self,
        desc: impl Into<String>,
        f: impl FnOnce(Error) -> T + Send + 'static,
    ) -> Task<T> {
        self.apply_named(desc, move |res| match res {
            Ok(value) => Ok(value.clone()),
            Err(error) => Ok(f(error.clone())),
        })
    }

    /// Recovers from failure with a task produced by `f`; that task runs in
    /// the same context and its result (success *or* failure) becomes the
    /// derived result.
    #[must_use]
    pub fn recover_with(&self, f: impl FnOnce(Error) -> Task<T> + Send + 'static) -> Task<T> {
        self.recover_with_named("recoverWith", f)
    }

    /// [`recover_with`](Self::recover_with) with a trace description.
    #[must_use]
    pub fn recover_with_named(
        &self,
        desc: impl Into<String>,
        f: impl FnOnce(Error) -> Task<T> + Send + 'static,
    ) -> Task<T> {
        let desc = desc.into();
        let recovery_name = desc.clone();
        let that = self.clone();
        let derived = Task::async_ctx(
            desc,
            move |context: &mut dyn Context| {
                let result = SettablePromise::new();
                let upstream = that.clone();
                let dst = result.clone();
                let recovery: Task<T> = Task::async_ctx(
                    recovery_name,
                    move |ctx: &mut dyn Context| match upstream.promise().result() {
                        Some(Err(error)) => {
                            match catch_unwind(AssertUnwindSafe(|| f(error))) {
                                Ok(fallback) => {
                                    propagate_result(&fallback.promise(), &dst);
                                    ctx.run(&fallback.handle());
                                    fallback.promise()
                                }
                                Err(payload) => {
                                    let error = Error::from_panic(payload);
                                    dst.fail(error.clone());
                                    Promise::failed(error)
                                }
                            }
                        }
                        Some(Ok(value)) => {
                            dst.done(value.clone());
                            Promise::resolved(value)
                        }
                        None => {
                            let error = internal("recovery ran before its input settled");
                            dst.fail(error.clone());
                            Promise::failed(error)
                        }
                    },
                    true,
                );
                context.after(&[that.handle()]).run(&recovery.handle());
                context.run(&that.handle());
                result.promise()
            },
            true,
        );
        derived
            .handle()
            .add_related(Relationship::PotentialParentOf, self.handle());
        derived
    }

    /// Like [`recover_with`](Self::recover_with), but if the fallback task
    /// itself fails, the derived task fails with the *original* error.
    #[must_use]
    pub fn fall_back_to(&self, f: impl FnOnce(Error) -> Task<T> + Send + 'static) -> Task<T> {
        self.fall_back_to_named("fallBackTo", f)
    }

    /// [`fall_back_to`](Self::fall_back_to) with a trace description.
    #[must_use]
    pub fn fall_back_to_named(
        &self,
        desc: impl Into<String>,
        f: impl FnOnce(Error) -> Task<T> + Send + 'static,
    ) -> Task<T> {
        self.recover_with_named(desc, move |original: Error| {
            let restored = original.clone();
            f(original).apply_named("restoreFailure", move |res| match res {
                Ok(value) => Ok(value.clone()),
                Err(_) => Err(restored),
            })
        })
    }

    /// Reifies the result: the derived task always succeeds, yielding
    /// `Ok(value)` or `Err(error)` as its value.
    #[must_use]
    pub fn with_try(&self) -> Task<PromiseResult<T>> {
        self.with_try_named("withTry")
    }

    /// [`with_try`](Self::with_try) with a trace description.
    #[must_use]
    pub fn with_try_named(&self, desc: impl Into<String>) -> Task<PromiseResult<T>> {
        self.apply_named(desc, |res| Ok(res.clone()))
    }
}
