//! ParSeq: an asynchronous task-composition engine.
//!
//! # Overview
//!
//! A [`Task`] is a deferred computation that is also the handle to its
//! eventual result: a node in a DAG and a promise in one. Tasks compose
//! through functional combinators — `map`, `flat_map`, parallel fan-out,
//! `recover`, `with_timeout`, `with_side_effect` — into larger tasks, and
//! an [`Engine`] executes the resulting graph with a priority scheduler,
//! recording every composition relationship into an inspectable trace.
//!
//! # Core Guarantees
//!
//! - **Single assignment**: a task's promise settles at most once; whoever
//!   commits first (body, timeout timer, cancellation) wins
//! - **Failure transparency**: non-recovery combinators propagate upstream
//!   errors unchanged; recovery combinators intercept them explicitly
//! - **Isolated side effects**: a side-effect subtree can never change the
//!   result of the chain it hangs off
//! - **Priority dispatch**: among simultaneously-ready tasks, higher
//!   priority runs first; ties dispatch in enqueue order
//! - **Observable execution**: shallow traces and relationship graphs are
//!   available at any time, including mid-run
//!
//! # Module Structure
//!
//! - [`promise`]: single-assignment result cells and listeners
//! - [`task`]: the task base, factories, combinators, parallel fan-out
//! - [`context`]: the scheduling capability surface consumed by task bodies
//! - [`engine`]: worker threads, per-plan priority queues, timers
//! - [`trace`]: shallow traces, relationship edges, trace graphs
//! - [`error`]: the crate-wide error taxonomy
//! - [`logging`]: plan-scoped structured logging over `tracing`
//! - [`test_utils`]: logging setup and assertion macros for tests
//!
//! # Example
//!
//! ```
//! use parseq::{Engine, Task};
//!
//! let engine = Engine::new().expect("engine");
//! let greeting = Task::value_named("who", "world")
//!     .map_named("greet", |w| format!("hello, {w}"));
//! engine.run(&greeting);
//! assert_eq!(greeting.get().expect("value"), "hello, world");
//! engine.shutdown();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod context;
pub mod engine;
pub mod error;
pub mod logging;
pub mod promise;
pub mod task;
pub mod test_utils;
pub mod trace;

pub use context::{AfterMode, Context, ContextExt, PendingRunner};
pub use engine::{ConfigError, Engine, EngineBuilder, EngineConfig};
pub use error::{Error, ErrorKind, Result, ResultExt};
pub use logging::TaskLogger;
pub use promise::{propagate_result, Promise, PromiseResult, SettablePromise};
pub use task::factory::{action, action_named, Executor};
pub use task::par::{par2, par3, par4, par5, par6, par7, par8, par9};
pub use task::wrapper::{ContextRunWrapper, TimeoutRunWrapper};
pub use task::{
    Task, TaskHandle, TaskState, TaskValue, DEFAULT_PRIORITY, MAX_PRIORITY, MIN_PRIORITY,
};
pub use trace::{Related, Relationship, ShallowTrace, Trace, TraceEdge};
