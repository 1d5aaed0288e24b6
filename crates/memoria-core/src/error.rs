//! Stable error taxonomy for the façade and every layer beneath it.

use std::fmt;

/// The result type used across the crate.
pub type Result<T> = std::result::Result<T, EngineError>;

/// A stable error kind, the same across every binding (CLI, MCP, dashboard).
///
/// Every public operation returns this type or a success value rather than
/// panicking or raising across an abstraction boundary.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Bad input: empty content, importance out of range, illegal profile
    /// name, oversized content. User fault, never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// An id, profile, or cluster does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate profile name, active-profile delete attempt, default-profile
    /// delete attempt.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Database constraint violation; the operation was rolled back.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// An optional dependency (community detection, embedding provider) is
    /// absent; the caller is told which feature degraded.
    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(&'static str),

    /// Cooperative cancellation was requested and honored.
    #[error("cancelled: {0}")]
    Cancelled(&'static str),

    /// Persistence failure.
    #[error("io error: {0}")]
    Io(String),

    /// Invariant violation that should never occur; logged with context.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Stable exit code for the CLI binding (§6 of the specification).
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::Validation(_) => 2,
            EngineError::NotFound(_) => 3,
            EngineError::Conflict(_) => 4,
            EngineError::Integrity(_) => 5,
            EngineError::DependencyUnavailable(_) => 5,
            EngineError::Cancelled(_) => 6,
            EngineError::Io(_) => 5,
            EngineError::Internal(_) => 1,
        }
    }

    /// Short, stable kind name for structured logging and dashboard events.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::NotFound(_) => "not_found",
            EngineError::Conflict(_) => "conflict",
            EngineError::Integrity(_) => "integrity",
            EngineError::DependencyUnavailable(_) => "dependency_unavailable",
            EngineError::Cancelled(_) => "cancelled",
            EngineError::Io(_) => "io",
            EngineError::Internal(_) => "internal",
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Io(e.to_string())
    }
}

impl From<crate::storage::StorageError> for EngineError {
    fn from(e: crate::storage::StorageError) -> Self {
        use crate::storage::StorageError as S;
        match e {
            S::NotFound(msg) => EngineError::NotFound(msg),
            S::Validation(msg) => EngineError::Validation(msg),
            S::Conflict(msg) => EngineError::Conflict(msg),
            S::Integrity(msg) => EngineError::Integrity(msg),
            S::Io(msg) => EngineError::Io(msg),
            S::Database(err) => database_error_to_engine(&err),
            S::Init(msg) => EngineError::Internal(msg),
        }
    }
}

fn database_error_to_engine(err: &rusqlite::Error) -> EngineError {
    if let rusqlite::Error::SqliteFailure(sqlite_err, msg) = err {
        use rusqlite::ErrorCode::*;
        match sqlite_err.code {
            ConstraintViolation => {
                return EngineError::Integrity(
                    msg.clone().unwrap_or_else(|| sqlite_err.to_string()),
                );
            }
            _ => {}
        }
    }
    EngineError::Io(err.to_string())
}

/// A lightweight cooperative cancellation flag, shared across threads.
///
/// Long-running operations (`build_graph`, `learn_patterns`, `backup`) accept
/// one of these and check it between major phases; on cancellation the
/// operation rolls back to the last committed state instead of leaving
/// partial results.
#[derive(Clone, Default)]
pub struct CancellationToken {
    flag: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Returns `Err(Cancelled)` if cancellation was requested, otherwise `Ok(())`.
    pub fn check(&self, phase: &'static str) -> Result<()> {
        if self.is_cancelled() {
            Err(EngineError::Cancelled(phase))
        } else {
            Ok(())
        }
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
