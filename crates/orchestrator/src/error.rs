use testgrid_core::error::CoreError;
use testgrid_runner::RunnerError;

/// Top-level error type for the orchestrator's public operations.
///
/// Wraps [`CoreError`] for validation failures and [`RunnerError`] for
/// pool/backend failures, and adds orchestration-specific variants.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// The submission was malformed; the caller must fix and resubmit.
    #[error(transparent)]
    Config(#[from] CoreError),

    /// The caller-supplied id collides with an existing execution
    /// (pending, running, or terminal).
    #[error("Duplicate execution id: {0}")]
    DuplicateId(String),

    /// A pool or backend failure.
    #[error(transparent)]
    Runner(#[from] RunnerError),

    /// The overall execution deadline elapsed. Distinct from a worker
    /// failure so callers can tell "ran and failed" from "never finished".
    #[error("Execution deadline exceeded after {0}ms")]
    DeadlineExceeded(u64),

    /// The orchestrator no longer accepts submissions.
    #[error("Orchestrator is shutting down")]
    ShuttingDown,
}

/// Convenience alias for orchestrator operation results.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
