//! Shared helpers for the integration suites.

use parseq::test_utils::init_test_logging;
use parseq::{Engine, EngineBuilder};

/// Logging + a single-worker engine, the deterministic setup used by most
/// scenarios (one dispatch thread means priority order is observable).
pub fn single_worker_engine() -> Engine {
    init_test_logging();
    EngineBuilder::new()
        .worker_threads(1)
        .blocking_threads(2)
        .thread_name_prefix("parseq-test")
        .build()
        .expect("engine")
}
