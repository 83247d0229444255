//! Shared helpers for tests.
//!
//! Provides consistent tracing-based logging initialization plus the
//! phase/assertion macros used across the unit and integration suites.

use std::sync::Once;
use tracing_subscriber::fmt::format::FmtSpan;

static INIT_LOGGING: Once = Once::new();

/// Initialize test logging with trace-level output.
///
/// Safe to call multiple times; only initializes once.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(false)
            .try_init();
    });
}

/// Marks the start of a named test.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        ::tracing::info!(test = $name, "==== test start ====");
    };
}

/// Marks a section within a test.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        ::tracing::info!(section = $name, "---- section ----");
    };
}

/// Marks the successful end of a named test.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        ::tracing::info!(test = $name, "==== test complete ====");
    };
}

/// Asserts a condition, logging expected/actual values on both paths.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {
        if $cond {
            ::tracing::debug!(expected = ?$expected, actual = ?$actual, "ok: {}", $msg);
        } else {
            ::tracing::error!(
                expected = ?$expected,
                actual = ?$actual,
                "assertion failed: {}",
                $msg
            );
            panic!(
                "assertion failed: {} (expected {:?}, actual {:?})",
                $msg, $expected, $actual
            );
        }
    };
}
