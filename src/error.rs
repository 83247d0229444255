//! Error types and error handling strategy.
//!
//! Failures flow along the same promise links as values, so the error type
//! must be cheap to clone and carry enough structure for combinators to
//! dispatch on it:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Cancellation and timeout are distinguished kinds, not sentinel strings
//! - Panics in user closures are caught and converted to `Panicked` errors

use core::fmt;
use std::any::Any;
use std::sync::Arc;

/// The kind of a task failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Error produced by user code.
    User,
    /// A user closure panicked while a combinator was invoking it.
    Panicked,
    /// The task was cancelled.
    Cancelled,
    /// The task was abandoned by the plan machinery (unfired timer target,
    /// side-effect task whose predecessor failed, or a task handed to an
    /// already-finished plan).
    EarlyFinish,
    /// A task wrapped with a timeout did not complete in time.
    Timeout,
    /// An argument was rejected at a construction site (e.g. priority out
    /// of range).
    InvalidArgument,
    /// Internal invariant violation (bug).
    Internal,
}

/// The main error type carried by failed promises.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    context: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
            source: None,
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns true if this error represents cancellation (including the
    /// early-finish flavor used by the plan machinery).
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled | ErrorKind::EarlyFinish)
    }

    /// Returns true if this error is the early-finish cancellation.
    #[must_use]
    pub const fn is_early_finish(&self) -> bool {
        matches!(self.kind, ErrorKind::EarlyFinish)
    }

    /// Returns true if this error is the designated timeout error.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::Timeout)
    }

    /// Adds context text to the error.
    #[must_use]
    pub fn with_context(mut self, ctx: impl Into<String>) -> Self {
        self.context = Some(ctx.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Returns the context text, if any.
    #[must_use]
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Creates a user error with a message.
    #[must_use]
    pub fn user(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::User).with_context(message)
    }

    /// Creates the designated cancellation error.
    #[must_use]
    pub const fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled)
    }

    /// Creates the designated timeout error.
    #[must_use]
    pub const fn timeout() -> Self {
        Self::new(ErrorKind::Timeout)
    }

    /// Creates the designated early-finish error.
    #[must_use]
    pub const fn early_finish() -> Self {
        Self::new(ErrorKind::EarlyFinish)
    }

    /// Converts a caught panic payload into a `Panicked` error.
    #[must_use]
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic of unknown type".to_string()
        };
        Self::new(ErrorKind::Panicked).with_context(message)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(ctx) = &self.context {
            write!(f, ": {ctx}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Attach a context string on error.
    fn context(self, ctx: impl Into<String>) -> Result<T>;
    /// Attach context computed lazily on error.
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for core::result::Result<T, E> {
    fn context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(ctx))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| e.into().with_context(f()))
    }
}

/// A specialized Result type for task operations.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[derive(Debug)]
    struct Underlying;

    impl fmt::Display for Underlying {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "underlying")
        }
    }

    impl std::error::Error for Underlying {}

    #[test]
    fn display_without_context() {
        let err = Error::new(ErrorKind::Timeout);
        assert_eq!(err.to_string(), "Timeout");
    }

    #[test]
    fn display_with_context() {
        let err = Error::user("division by zero");
        assert_eq!(err.to_string(), "User: division by zero");
    }

    #[test]
    fn source_chain_is_exposed() {
        let err = Error::new(ErrorKind::User)
            .with_context("outer")
            .with_source(Underlying);
        let source = err.source().expect("source missing");
        assert_eq!(source.to_string(), "underlying");
    }

    #[test]
    fn predicates_match_kind() {
        assert!(Error::cancelled().is_cancelled());
        assert!(Error::early_finish().is_cancelled());
        assert!(Error::early_finish().is_early_finish());
        assert!(!Error::cancelled().is_early_finish());
        assert!(Error::timeout().is_timeout());
        assert!(!Error::timeout().is_cancelled());
    }

    #[test]
    fn from_panic_extracts_str_payload() {
        let payload = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        let err = Error::from_panic(payload);
        assert_eq!(err.kind(), ErrorKind::Panicked);
        assert_eq!(err.context(), Some("boom"));
    }

    #[test]
    fn from_panic_extracts_string_payload() {
        let n = 7;
        let payload = std::panic::catch_unwind(|| panic!("bad value {n}")).unwrap_err();
        let err = Error::from_panic(payload);
        assert_eq!(err.context(), Some("bad value 7"));
    }

    #[test]
    fn result_ext_adds_context() {
        let res: core::result::Result<(), Error> = Err(Error::new(ErrorKind::Internal));
        let err = res.context("while linking promises").expect_err("expected err");
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.to_string(), "Internal: while linking promises");
    }
}
