//! Parallel fan-out: run N tasks in one context, collect a tuple.
//!
//! `parN` builds a single composite task that schedules all of its inputs
//! and subscribes to their promises. The composite resolves with the tuple
//! of values once every input succeeds, and fails with the first failure
//! observed. Siblings of a failed input are not cancelled; they keep
//! running and the plan drains them.

use crate::context::Context;
use crate::promise::SettablePromise;
use crate::task::{Task, TaskValue};
use crate::trace::Relationship;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

macro_rules! par_tasks {
    ($(#[$doc:meta])* $fname:ident, $desc:literal, $count:expr, $( $T:ident : $t:ident ),+ ) => {
        $(#[$doc])*
        #[must_use]
        pub fn $fname<$($T),+>( $($t: Task<$T>),+ ) -> Task<($($T,)+)>
        where
            $($T: TaskValue,)+
        {
            let handles = vec![$($t.handle()),+];
            let children = ($($t,)+);
            let composite = Task::async_ctx(
                $desc,
                move |ctx: &mut dyn Context| {
                    let result = SettablePromise::new();
                    let remaining = Arc::new(AtomicUsize::new($count));
                    let ($($t,)+) = children;
                    let all = ($($t.clone(),)+);
                    let try_finish = {
                        let dst = result.clone();
                        let all = all.clone();
                        Arc::new(move || {
                            let ($($t,)+) = all.clone();
                            let values = ($(
                                match $t.promise().result() {
                                    Some(Ok(value)) => value,
                                    _ => return,
                                },
                            )+);
                            dst.done(values);
                        })
                    };
                    $(
                        {
                            let dst = result.clone();
                            let remaining = Arc::clone(&remaining);
                            let try_finish = Arc::clone(&try_finish);
                            $t.promise().on_terminal(move |res| {
                                if let Err(error) = res {
                                    // First failure wins the composite.
                                    dst.fail(error.clone());
                                }
                                if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                                    try_finish();
                                }
                            });
                        }
                    )+
                    $( ctx.run(&$t.handle()); )+
                    result.promise()
                },
                false,
            );
            for child in &handles {
                composite
                    .handle()
                    .add_related(Relationship::PotentialParentOf, child.clone());
            }
            composite
        }
    };
}

par_tasks!(
    /// Runs two tasks in parallel and collects both values.
    par2, "par2", 2, T1: t1, T2: t2
);
par_tasks!(
    /// Runs three tasks in parallel and collects all values.
    par3, "par3", 3, T1: t1, T2: t2, T3: t3
);
par_tasks!(
    /// Runs four tasks in parallel and collects all values.
    par4, "par4", 4, T1: t1, T2: t2, T3: t3, T4: t4
);
par_tasks!(
    /// Runs five tasks in parallel and collects all values.
    par5, "par5", 5, T1: t1, T2: t2, T3: t3, T4: t4, T5: t5
);
par_tasks!(
    /// Runs six tasks in parallel and collects all values.
    par6, "par6", 6, T1: t1, T2: t2, T3: t3, T4: t4, T5: t5, T6: t6
);
par_tasks!(
    /// Runs seven tasks in parallel and collects all values.
    par7, "par7", 7, T1: t1, T2: t2, T3: t3, T4: t4, T5: t5, T6: t6, T7: t7
);
par_tasks!(
    /// Runs eight tasks in parallel and collects all values.
    par8, "par8", 8, T1: t1, T2: t2, T3: t3, T4: t4, T5: t5, T6: t6, T7: t7, T8: t8
);
par_tasks!(
    /// Runs nine tasks in parallel and collects all values.
    par9, "par9", 9, T1: t1, T2: t2, T3: t3, T4: t4, T5: t5, T6: t6, T7: t7, T8: t8, T9: t9
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::AfterMode;
    use crate::error::Error;
    use crate::logging::TaskLogger;
    use crate::task::{TaskHandle, TaskState};
    use std::time::Duration;

    struct RunOnlyContext {
        logger: TaskLogger,
    }

    impl Context for RunOnlyContext {
        fn run(&mut self, task: &TaskHandle) {
            if task.mark_scheduled() {
                let logger = self.logger.clone();
                task.context_run(self, &logger, None, &[]);
            }
        }

        fn run_after(&mut self, _p: &[TaskHandle], _t: &TaskHandle, _m: AfterMode) {
            unimplemented!("par graphs only use run");
        }

        fn create_timer(&mut self, _d: Duration, _t: &TaskHandle) {}
    }

    fn drive<T: TaskValue>(task: &Task<T>) {
        let mut ctx = RunOnlyContext {
            logger: TaskLogger::detached(),
        };
        ctx.run(&task.handle());
    }

    #[test]
    fn par2_collects_both_values() {
        let t = par2(Task::value(1), Task::value_named("greeting", "hi".to_string()));
        assert_eq!(t.name(), "par2");
        drive(&t);
        let (a, b) = t.get().expect("tuple");
        assert_eq!(a, 1);
        assert_eq!(b, "hi");
    }

    #[test]
    fn par_fails_with_first_error_and_siblings_finish() {
        let ok1 = Task::value(1);
        let ok2 = Task::value_named("a", "a".to_string());
        let bad: Task<i32> = Task::failure(Error::user("third input broken"));
        let t = par3(ok1.clone(), ok2.clone(), bad);
        drive(&t);

        let err = t.promise().error().expect("composite failed");
        assert_eq!(err.context(), Some("third input broken"));
        // Siblings were not cancelled by the failure.
        assert_eq!(ok1.state(), TaskState::Done);
        assert_eq!(ok2.state(), TaskState::Done);
    }

    #[test]
    fn par_records_potential_parent_edges() {
        let a = Task::value(1);
        let b = Task::value(2);
        let t = par2(a.clone(), b.clone());
        let related: Vec<_> = t
            .relationships()
            .into_iter()
            .filter(|r| r.relationship == Relationship::PotentialParentOf)
            .collect();
        assert_eq!(related.len(), 2);
        assert!(related.iter().any(|r| r.task == a.handle()));
        assert!(related.iter().any(|r| r.task == b.handle()));
    }

    #[test]
    fn par9_collects_all() {
        let t = par9(
            Task::value(1),
            Task::value(2),
            Task::value(3),
            Task::value(4),
            Task::value(5),
            Task::value(6),
            Task::value(7),
            Task::value(8),
            Task::value(9),
        );
        drive(&t);
        let tuple = t.get().expect("tuple");
        assert_eq!(tuple.8, 9);
        assert_eq!(tuple.0 + tuple.4, 6);
    }
}
