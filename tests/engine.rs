//! Engine scheduling behavior: priority order, timers, timeouts, blocking
//! offload, configuration and shutdown.

mod common;

use common::single_worker_engine;
use parseq::promise::SettablePromise;
use parseq::{
    action_named, ConfigError, EngineBuilder, Error, Task, TaskState, MAX_PRIORITY,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn recording_action(name: &str, order: &Arc<Mutex<Vec<String>>>) -> Task<()> {
    let order = Arc::clone(order);
    let label = name.to_string();
    action_named(name, move || order.lock().unwrap().push(label))
}

#[test]
fn higher_priority_dispatches_first() {
    parseq::test_phase!("higher_priority_dispatches_first");
    let engine = single_worker_engine();
    let order = Arc::new(Mutex::new(Vec::new()));

    let low = recording_action("low", &order);
    let mid = recording_action("mid", &order);
    let high = recording_action("high", &order);
    assert!(low.set_priority(-10).expect("in range"));
    assert!(high.set_priority(10).expect("in range"));

    // All three become ready while the dispatcher is busy running the
    // root body, so dispatch order is purely priority order.
    let children = (low.clone(), mid.clone(), high.clone());
    let root = Task::async_ctx(
        "root",
        move |ctx| {
            let (low, mid, high) = children;
            ctx.run(&low.handle());
            ctx.run(&mid.handle());
            ctx.run(&high.handle());
            parseq::Promise::resolved(())
        },
        false,
    );

    engine.run(&root);
    engine.shutdown();

    assert_eq!(*order.lock().unwrap(), vec!["high", "mid", "low"]);
    parseq::test_complete!("higher_priority_dispatches_first");
}

#[test]
fn equal_priority_dispatches_fifo() {
    let engine = single_worker_engine();
    let order = Arc::new(Mutex::new(Vec::new()));

    let first = recording_action("first", &order);
    let second = recording_action("second", &order);
    let third = recording_action("third", &order);

    let children = (first, second, third);
    let root = Task::async_ctx(
        "root",
        move |ctx| {
            let (first, second, third) = children;
            ctx.run(&first.handle());
            ctx.run(&second.handle());
            ctx.run(&third.handle());
            parseq::Promise::resolved(())
        },
        false,
    );

    engine.run(&root);
    engine.shutdown();

    assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
}

#[test]
fn timer_schedules_task_after_delay() {
    let engine = single_worker_engine();
    let root: Task<i32> = Task::async_ctx(
        "delayed",
        move |ctx| {
            let result = SettablePromise::new();
            let dst = result.clone();
            let fire = action_named("fire", move || {
                dst.done(42);
            });
            ctx.create_timer(Duration::from_millis(30), &fire.handle());
            result.promise()
        },
        false,
    );

    let started = Instant::now();
    engine.run(&root);
    assert_eq!(root.get().expect("value"), 42);
    let elapsed = started.elapsed();
    parseq::assert_with_log!(
        elapsed >= Duration::from_millis(25),
        "timer respected its delay",
        Duration::from_millis(25),
        elapsed
    );
    engine.shutdown();
}

#[test]
fn unfired_timer_target_is_cancelled_at_plan_end() {
    let engine = single_worker_engine();
    let fired = Arc::new(AtomicBool::new(false));
    let f = Arc::clone(&fired);
    let target = action_named("never", move || f.store(true, Ordering::SeqCst));

    let armed = target.clone();
    let root = Task::async_ctx(
        "quick",
        move |ctx| {
            ctx.create_timer(Duration::from_secs(600), &armed.handle());
            parseq::Promise::resolved(())
        },
        false,
    );

    engine.run(&root);
    assert!(root.get().is_ok());
    engine.shutdown();

    assert!(!fired.load(Ordering::SeqCst));
    assert_eq!(target.state(), TaskState::Cancelled);
    assert!(
        target.promise().error().expect("cancelled").is_early_finish(),
        "unfired timer targets get the early-finish error"
    );
}

#[test]
fn with_timeout_fails_never_completing_task() {
    let engine = single_worker_engine();
    let t: Task<i32> = Task::async_ctx(
        "never",
        |_ctx| SettablePromise::new().promise(),
        false,
    )
    .with_timeout(Duration::from_millis(50));

    let started = Instant::now();
    engine.run(&t);
    let err = t.get().expect_err("timed out");
    let elapsed = started.elapsed();

    assert!(err.is_timeout());
    assert!(elapsed >= Duration::from_millis(45), "too early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(5), "too late: {elapsed:?}");
    engine.shutdown();
}

#[test]
fn with_timeout_passes_through_fast_completion() {
    let engine = single_worker_engine();
    let t = Task::value_named("fast", 8).with_timeout(Duration::from_secs(60));
    let started = Instant::now();
    engine.run(&t);
    assert_eq!(t.get().expect("value"), 8);
    engine.shutdown();
    // The plan must not stay open waiting for the unfired timeout timer.
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn late_completion_does_not_resurrect_timed_out_task() {
    let engine = single_worker_engine();
    let backing = SettablePromise::new();
    let body_promise = backing.promise();
    let t: Task<i32> = Task::async_ctx("late", move |_ctx| body_promise, false)
        .with_timeout(Duration::from_millis(20));

    engine.run(&t);
    assert!(t.get().expect_err("timed out").is_timeout());

    let settler = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(60));
        backing.done(99);
    });
    settler.join().expect("settler thread");

    assert!(t.get().expect_err("still timed out").is_timeout());
    engine.shutdown();
}

#[test]
fn timeout_timer_runs_at_max_priority() {
    // Indirect check on the contract: the armed timer task carries
    // MAX_PRIORITY so it beats any user task that becomes ready with it.
    let t: Task<i32> =
        Task::async_ctx("never", |_ctx| SettablePromise::new().promise(), false)
            .with_timeout(Duration::from_millis(10));
    let engine = single_worker_engine();
    engine.run(&t);
    assert!(t.get().is_err());
    engine.shutdown();

    let trace = t.trace();
    let timer = trace.node_named("timeoutTimer").expect("timer in trace");
    assert_eq!(timer.priority, MAX_PRIORITY);
}

#[test]
fn blocking_offloads_to_executor_pool() {
    let engine = single_worker_engine();
    let executor = engine.executor();
    let job_thread = Arc::new(Mutex::new(String::new()));

    let jt = Arc::clone(&job_thread);
    let t = Task::blocking_named(
        "read file",
        move || {
            *jt.lock().unwrap() = std::thread::current().name().unwrap_or("?").to_string();
            "contents".to_string()
        },
        &executor,
    );

    engine.run(&t);
    assert_eq!(t.get().expect("value"), "contents");
    engine.shutdown();

    let job_thread = job_thread.lock().unwrap().clone();
    assert!(
        job_thread.contains("blocking"),
        "blocking job ran on {job_thread:?}"
    );
}

#[test]
fn blocking_panic_fails_the_task() {
    let engine = single_worker_engine();
    let executor = engine.executor();
    let t: Task<i32> = Task::blocking(|| panic!("disk on fire"), &executor);
    engine.run(&t);
    let err = t.get().expect_err("failed");
    assert_eq!(err.kind(), parseq::ErrorKind::Panicked);
    engine.shutdown();
}

#[test]
fn cancel_mid_plan_propagates_downstream() {
    let engine = single_worker_engine();
    let gate = SettablePromise::<i32>::new();
    let body_promise = gate.promise();
    let slow: Task<i32> = Task::async_ctx("slow", move |_ctx| body_promise, false);
    let doubled = slow.map(|n| n * 2);

    engine.run(&doubled);
    // The body has (or will have) returned a pending promise; cancel from
    // this thread while the plan is waiting.
    assert!(slow.cancel(Error::cancelled()));
    let err = doubled.get().expect_err("cancellation flows downstream");
    assert!(err.is_cancelled());
    assert_eq!(slow.state(), TaskState::Cancelled);
    engine.shutdown();
    drop(gate);
}

#[test]
fn builder_rejects_zero_workers() {
    assert!(matches!(
        EngineBuilder::new().worker_threads(0).build(),
        Err(ConfigError::ZeroThreads { .. })
    ));
}

#[test]
fn env_overrides_apply_and_report_errors() {
    parseq::test_utils::init_test_logging();
    std::env::set_var(parseq::engine::ENV_WORKER_THREADS, "2");
    let builder = EngineBuilder::from_env().expect("parses");
    std::env::remove_var(parseq::engine::ENV_WORKER_THREADS);
    let engine = builder.build().expect("engine");
    let t = Task::value(1);
    engine.run(&t);
    assert_eq!(t.get().expect("value"), 1);
    engine.shutdown();

    std::env::set_var(parseq::engine::ENV_BLOCKING_THREADS, "lots");
    let err = EngineBuilder::from_env().expect_err("rejects garbage");
    std::env::remove_var(parseq::engine::ENV_BLOCKING_THREADS);
    assert!(matches!(err, ConfigError::InvalidEnvValue { .. }));
}

#[test]
fn many_plans_share_the_worker_pool() {
    parseq::test_utils::init_test_logging();
    let engine = EngineBuilder::new()
        .worker_threads(2)
        .build()
        .expect("engine");

    let tasks: Vec<Task<i32>> = (0..8)
        .map(|i| Task::value_named(format!("value-{i}"), i))
        .collect();
    for t in &tasks {
        engine.run(t);
    }
    for (i, t) in tasks.iter().enumerate() {
        assert_eq!(t.get().expect("value"), i as i32);
    }
    engine.shutdown();
}
