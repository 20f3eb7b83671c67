use std::{fmt::Write as _, sync::Arc};

use thiserror::Error;

/// Crate-wide error type.
///
/// Construction-time failures (`BadParameter`, `NotFound`, `AlreadyExists`,
/// `NotImplemented`) abort building an action tree. `Retryable` marks transient
/// failures that long-running loops retry with backoff, and `Aggregate` keeps
/// every failure collected from independent operations.
///
/// Errors are cheap to clone so a failure can both be recorded on an
/// execution context and returned to the caller.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("bad parameter: {0}")]
    BadParameter(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("retryable: {0}")]
    Retryable(String),

    #[error("{0}")]
    Aggregate(AggregateError),

    #[error("cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("parse error at line {line}, column {column}: {message}")]
    Parse {
        message: String,
        line: usize,
        column: usize,
    },

    #[error("exit with code {0}")]
    Exit(i32),

    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("watch error: {0}")]
    Watch(Arc<notify::Error>),

    #[error("JSON error: {0}")]
    Json(Arc<serde_json::Error>),

    #[error("{message}")]
    Wrapped {
        message: String,
        #[source]
        source: Box<Error>,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

pub type RuntimeResult<T> = Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

impl From<notify::Error> for Error {
    fn from(err: notify::Error) -> Self {
        Error::Watch(Arc::new(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(Arc::new(err))
    }
}

/// Several independent failures combined without discarding any of them.
#[derive(Debug, Clone)]
pub struct AggregateError {
    pub errors: Vec<Error>,
}

impl std::fmt::Display for AggregateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} errors occurred: ", self.errors.len())?;
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

impl Error {
    pub fn bad_parameter<S: Into<String>>(message: S) -> Self {
        Error::BadParameter(message.into())
    }

    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Error::NotFound(message.into())
    }

    pub fn already_exists<S: Into<String>>(message: S) -> Self {
        Error::AlreadyExists(message.into())
    }

    pub fn not_implemented<S: Into<String>>(message: S) -> Self {
        Error::NotImplemented(message.into())
    }

    pub fn retryable<S: Into<String>>(message: S) -> Self {
        Error::Retryable(message.into())
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Error::Internal(message.into())
    }

    /// Adds context to an error while keeping it reachable through `source()`.
    pub fn wrap<S: Into<String>>(self, message: S) -> Self {
        Error::Wrapped {
            message: message.into(),
            source: Box::new(self),
        }
    }

    /// Combines collected errors: none yields `None`, a single error is
    /// returned as is, more than one becomes `Aggregate`.
    pub fn aggregate(mut errors: Vec<Error>) -> Option<Error> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Error::Aggregate(AggregateError { errors })),
        }
    }

    /// The innermost error, looking through `Wrapped` layers.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Wrapped { source, .. } => source.root_cause(),
            other => other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.root_cause(), Error::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self.root_cause(), Error::AlreadyExists(_))
    }

    pub fn is_bad_parameter(&self) -> bool {
        matches!(self.root_cause(), Error::BadParameter(_))
    }

    pub fn is_not_implemented(&self) -> bool {
        matches!(self.root_cause(), Error::NotImplemented(_))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.root_cause(), Error::Retryable(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.root_cause(), Error::Cancelled)
    }

    /// Debug-style report with the full causal chain, used for uncaught
    /// top-level errors.
    pub fn report(&self) -> String {
        let mut out = format!("ERROR: {}", self);
        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(cause) = source {
            let _ = write!(out, "\n{:indent$}caused by: {}", "", cause, indent = depth * 2);
            source = cause.source();
            depth += 1;
        }
        if let Error::Aggregate(agg) = self.root_cause() {
            for (i, err) in agg.errors.iter().enumerate() {
                let _ = write!(out, "\n  [{}] {}", i + 1, err.report().replace('\n', "\n  "));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_collapses() {
        assert!(Error::aggregate(vec![]).is_none());

        let single = Error::aggregate(vec![Error::not_found("x")]).unwrap();
        assert!(single.is_not_found());

        let many = Error::aggregate(vec![Error::not_found("x"), Error::bad_parameter("y")]).unwrap();
        match many {
            Error::Aggregate(agg) => assert_eq!(agg.errors.len(), 2),
            other => panic!("expected aggregate, got {other:?}"),
        }
    }

    #[test]
    fn test_wrap_keeps_kind() {
        let err = Error::already_exists("x").wrap("defining x");
        assert!(err.is_already_exists());
        assert_eq!(err.to_string(), "defining x");
    }

    #[test]
    fn test_report_walks_chain() {
        let err = Error::not_found("plugin").wrap("setup").wrap("script");
        let report = err.report();
        assert!(report.starts_with("ERROR: script"));
        assert!(report.contains("caused by: setup"));
        assert!(report.contains("caused by: not found: plugin"));
    }
}
