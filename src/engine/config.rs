//! Engine configuration and builder.
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic** — values set via builder methods (`worker_threads(4)`)
//! 2. **Environment variables** — `PARSEQ_*` values applied by
//!    [`EngineBuilder::from_env`]
//! 3. **Defaults** — [`EngineConfig::default`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `PARSEQ_WORKER_THREADS` | `usize` | `worker_threads` |
//! | `PARSEQ_BLOCKING_THREADS` | `usize` | `blocking_threads` |
//! | `PARSEQ_THREAD_NAME_PREFIX` | `String` | `thread_name_prefix` |

use crate::engine::Engine;
use std::thread;
use thiserror::Error as ThisError;

/// Environment variable name for the plan worker count.
pub const ENV_WORKER_THREADS: &str = "PARSEQ_WORKER_THREADS";
/// Environment variable name for the blocking pool size.
pub const ENV_BLOCKING_THREADS: &str = "PARSEQ_BLOCKING_THREADS";
/// Environment variable name for the thread name prefix.
pub const ENV_THREAD_NAME_PREFIX: &str = "PARSEQ_THREAD_NAME_PREFIX";

/// Errors raised while assembling an engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum ConfigError {
    /// An environment variable was set to an unparseable value.
    #[error("invalid value for {var}: {value:?}")]
    InvalidEnvValue {
        /// The offending variable name.
        var: &'static str,
        /// The raw value found in the environment.
        value: String,
    },
    /// A thread count was configured as zero.
    #[error("{setting} must be nonzero")]
    ZeroThreads {
        /// Which setting was zero.
        setting: &'static str,
    },
}

/// Tunables for an [`Engine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of threads dispatching plans. Each concurrently-running plan
    /// occupies one for its lifetime.
    pub worker_threads: usize,
    /// Number of threads in the pool backing [`Engine::executor`].
    pub blocking_threads: usize,
    /// Prefix for engine thread names.
    pub thread_name_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_threads: thread::available_parallelism().map_or(4, usize::from),
            blocking_threads: 4,
            thread_name_prefix: "parseq".to_string(),
        }
    }
}

/// Builder for constructing an engine with custom configuration.
#[derive(Debug, Clone, Default)]
pub struct EngineBuilder {
    config: EngineConfig,
}

impl EngineBuilder {
    /// Creates a builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder with defaults overridden by `PARSEQ_*` environment
    /// variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut builder = Self::new();
        if let Some(n) = read_env_usize(ENV_WORKER_THREADS)? {
            builder.config.worker_threads = n;
        }
        if let Some(n) = read_env_usize(ENV_BLOCKING_THREADS)? {
            builder.config.blocking_threads = n;
        }
        if let Ok(prefix) = std::env::var(ENV_THREAD_NAME_PREFIX) {
            builder.config.thread_name_prefix = prefix;
        }
        Ok(builder)
    }

    /// Sets the number of plan dispatch threads.
    #[must_use]
    pub fn worker_threads(mut self, n: usize) -> Self {
        self.config.worker_threads = n;
        self
    }

    /// Sets the blocking pool size.
    #[must_use]
    pub fn blocking_threads(mut self, n: usize) -> Self {
        self.config.blocking_threads = n;
        self
    }

    /// Sets the thread name prefix.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    /// Validates the configuration and starts an engine.
    pub fn build(self) -> Result<Engine, ConfigError> {
        if self.config.worker_threads == 0 {
            return Err(ConfigError::ZeroThreads {
                setting: "worker_threads",
            });
        }
        if self.config.blocking_threads == 0 {
            return Err(ConfigError::ZeroThreads {
                setting: "blocking_threads",
            });
        }
        Ok(Engine::with_config(self.config))
    }
}

fn read_env_usize(var: &'static str) -> Result<Option<usize>, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnvValue { var, value: raw }),
        Err(_) => Ok(None),
    }
}
