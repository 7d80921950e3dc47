//! The worker execution contract.
//!
//! Defines [`RunnerBackend`], the trait every concrete runner runtime
//! implements, along with [`RunReport`] and [`RunnerError`]. The
//! orchestrator never talks to a runtime directly; it goes through the
//! pool, which delegates here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use testgrid_core::execution::ExecutionRequest;
use testgrid_core::types::RunnerId;

/// Structured result reported by a runner for one successful attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Runner-produced result data (parsed output when available).
    pub result: serde_json::Value,
    /// Wall-clock duration of the attempt in milliseconds.
    pub duration_ms: u64,
}

/// Capability contract for a runner runtime.
///
/// A backend must report exactly one of {success + report, failure +
/// error} per `execute` call and must support a best-effort abort
/// signal. Implementations are shared behind `Arc<dyn RunnerBackend>`.
#[async_trait]
pub trait RunnerBackend: Send + Sync {
    /// Prepare the runner identified by `runner` for work.
    ///
    /// For container-style runtimes this launches the instance; backends
    /// that launch per attempt may treat it as a registration no-op.
    async fn provision(&self, runner: RunnerId) -> Result<(), RunnerError>;

    /// Execute one attempt of `request` on the given runner.
    ///
    /// The per-attempt timeout in `request.configuration` is enforced by
    /// the backend; the overall execution deadline is the orchestrator's.
    async fn execute(
        &self,
        runner: RunnerId,
        request: &ExecutionRequest,
    ) -> Result<RunReport, RunnerError>;

    /// Signal the runner to abort the named execution, best effort.
    async fn abort(&self, runner: RunnerId, execution_id: &str) -> Result<(), RunnerError>;

    /// Tear the runner down and free its resources.
    async fn terminate(&self, runner: RunnerId) -> Result<(), RunnerError>;
}

/// Errors reported by runner backends and the pool.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// Provisioning a new runner failed. Transient; retried by the
    /// autoscale loop on its next tick.
    #[error("Failed to provision runner: {0}")]
    Provision(String),

    /// Launching an attempt failed before the payload ran. Transient.
    #[error("Failed to launch attempt: {0}")]
    Launch(String),

    /// The attempt exceeded its per-attempt timeout. Transient.
    #[error("Attempt timed out after {elapsed_ms}ms")]
    AttemptTimedOut { elapsed_ms: u64 },

    /// The runner acknowledged an abort signal.
    #[error("Attempt aborted")]
    Aborted,

    /// The runner rejected the payload as malformed. Not retried.
    #[error("Payload rejected: {0}")]
    Rejected(String),

    /// The payload ran and reported failure. Not retried.
    #[error("Run failed with exit code {exit_code}: {stderr}")]
    Failed { exit_code: i32, stderr: String },

    /// The pool has no live runner with this id.
    #[error("Runner {0} not found or not connected")]
    UnknownRunner(RunnerId),
}

impl RunnerError {
    /// Whether the retry policy may re-attempt after this error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Provision(_) | Self::Launch(_) | Self::AttemptTimedOut { .. }
        )
    }
}
