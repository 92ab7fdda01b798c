// packages/engine/src/utils/errors.rs
//! Engine error taxonomy
//!
//! Every failure the engine can produce maps onto one [`ErrorKind`]. The
//! HTTP layer only ever looks at the kind and [`EngineError::public_message`];
//! raw runtime details stay in the logs.

use std::time::Duration;
use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors produced by the execution engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed or missing request fields
    #[error("validation failed: {0}")]
    Validation(String),

    /// Image missing or runtime unreachable
    #[error("container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    /// Volume or container preparation failed
    #[error("setup failed: {0}")]
    SetupFailed(String),

    /// No idle container in the pool. Never surfaced past the fallback policy.
    #[error("no containers available")]
    PoolExhausted,

    /// Execute step did not finish before the deadline
    #[error("operation timed out after {0:?}")]
    ExecutionTimeout(Duration),

    /// Admission denied by quota or concurrency cap
    #[error("too many requests")]
    ThrottleRejected,

    /// Container or volume removal failed. Logged, never returned to callers.
    #[error("cleanup failed: {0}")]
    CleanupFailed(String),

    /// Container started but the run could not be completed
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("container runtime error: {0}")]
    Runtime(#[from] bollard::errors::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Coarse error classes used for status mapping and metrics labels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    RuntimeUnavailable,
    Setup,
    PoolExhausted,
    Timeout,
    Throttled,
    Cleanup,
    Execution,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::RuntimeUnavailable => "runtime_unavailable",
            ErrorKind::Setup => "setup",
            ErrorKind::PoolExhausted => "pool_exhausted",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Throttled => "throttled",
            ErrorKind::Cleanup => "cleanup",
            ErrorKind::Execution => "execution",
            ErrorKind::Internal => "internal",
        }
    }
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_) => ErrorKind::Validation,
            EngineError::RuntimeUnavailable(_) => ErrorKind::RuntimeUnavailable,
            EngineError::SetupFailed(_) => ErrorKind::Setup,
            EngineError::PoolExhausted => ErrorKind::PoolExhausted,
            EngineError::ExecutionTimeout(_) => ErrorKind::Timeout,
            EngineError::ThrottleRejected => ErrorKind::Throttled,
            EngineError::CleanupFailed(_) => ErrorKind::Cleanup,
            EngineError::ExecutionFailed(_) => ErrorKind::Execution,
            EngineError::Runtime(_) => ErrorKind::Execution,
            EngineError::Config(_) | EngineError::Io(_) | EngineError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Message safe to hand back to the submitter of a run
    pub fn public_message(&self) -> String {
        match self {
            EngineError::Validation(msg) => msg.clone(),
            EngineError::RuntimeUnavailable(_) => "container runtime unavailable".to_string(),
            EngineError::SetupFailed(_) => "failed to prepare execution environment".to_string(),
            EngineError::PoolExhausted => self.to_string(),
            EngineError::ExecutionTimeout(d) => {
                format!("operation timed out after {}", format_duration(*d))
            }
            EngineError::ThrottleRejected => "too many requests".to_string(),
            EngineError::CleanupFailed(_) => "cleanup failed".to_string(),
            EngineError::ExecutionFailed(_) | EngineError::Runtime(_) => {
                "execution failed".to_string()
            }
            EngineError::Config(_) | EngineError::Io(_) | EngineError::Internal(_) => {
                "internal error".to_string()
            }
        }
    }

    /// Wrap a runtime failure that happened while preparing a run
    pub fn setup(err: impl std::fmt::Display) -> Self {
        EngineError::SetupFailed(err.to_string())
    }
}

/// Human readable duration, e.g. `1.204s` or `830ms`
pub fn format_duration(d: Duration) -> String {
    if d.as_secs() > 0 {
        format!("{:.3}s", d.as_secs_f64())
    } else {
        format!("{}ms", d.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(EngineError::ThrottleRejected.kind(), ErrorKind::Throttled);
        assert_eq!(
            EngineError::ExecutionTimeout(Duration::from_secs(1)).kind(),
            ErrorKind::Timeout
        );
        assert_eq!(
            EngineError::Validation("Filename is required".into()).kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn test_public_message_hides_internals() {
        let err = EngineError::SetupFailed("mkdir /srv/shared/abc: permission denied".into());
        assert!(!err.public_message().contains("/srv/shared"));

        let err = EngineError::Validation("Invalid filename".into());
        assert_eq!(err.public_message(), "Invalid filename");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(830)), "830ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.500s");
    }
}
