//! Local subprocess runner backend.
//!
//! Runs each attempt as a child process of a configured runner command.
//! The opaque test payload is piped to the child's stdin, the execution
//! configuration is exposed through `TESTGRID_*` environment variables,
//! and stdout is parsed as JSON when possible. `kill_on_drop(true)`
//! ensures the child dies with the attempt future, so a dropped or
//! timed-out attempt cannot leak a process.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use testgrid_core::execution::ExecutionRequest;
use testgrid_core::types::RunnerId;

use crate::backend::{RunReport, RunnerBackend, RunnerError};

/// Maximum stdout or stderr size captured per stream (10 MiB).
///
/// Output exceeding this limit is truncated to prevent memory exhaustion
/// from extremely verbose test runs.
const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Runner backend that executes payloads as local child processes.
pub struct ProcessBackend {
    /// Program and arguments of the runner command.
    command: Vec<String>,
    /// Abort tokens for in-flight attempts, keyed by execution id.
    aborts: RwLock<HashMap<String, CancellationToken>>,
}

impl ProcessBackend {
    /// Create a backend that invokes `command` for each attempt.
    ///
    /// The first element is the program, the rest are arguments.
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            aborts: RwLock::new(HashMap::new()),
        }
    }

    fn build_command(&self, request: &ExecutionRequest) -> Result<Command, RunnerError> {
        let program = self
            .command
            .first()
            .ok_or_else(|| RunnerError::Launch("Runner command is empty".to_string()))?;

        let mut cmd = Command::new(program);
        cmd.args(&self.command[1..]);

        let config = &request.configuration;
        cmd.env("TESTGRID_EXECUTION_ID", &request.id)
            .env("TESTGRID_BROWSER", &config.browser)
            .env("TESTGRID_HEADLESS", config.headless.to_string())
            .env(
                "TESTGRID_VIEWPORT",
                format!("{}x{}", config.viewport.width, config.viewport.height),
            );
        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        Ok(cmd)
    }
}

#[async_trait]
impl RunnerBackend for ProcessBackend {
    async fn provision(&self, runner: RunnerId) -> Result<(), RunnerError> {
        // Processes are launched per attempt; provisioning is bookkeeping only.
        tracing::debug!(runner, "Process runner registered");
        Ok(())
    }

    async fn execute(
        &self,
        runner: RunnerId,
        request: &ExecutionRequest,
    ) -> Result<RunReport, RunnerError> {
        let mut cmd = self.build_command(request)?;
        let attempt_timeout = Duration::from_millis(request.configuration.attempt_timeout_ms);

        let abort = CancellationToken::new();
        self.aborts
            .write()
            .await
            .insert(request.id.clone(), abort.clone());

        let result = run_attempt(&mut cmd, &request.payload, attempt_timeout, &abort).await;

        self.aborts.write().await.remove(&request.id);

        if let Err(e) = &result {
            tracing::debug!(runner, execution_id = %request.id, error = %e, "Attempt ended with error");
        }
        result
    }

    async fn abort(&self, runner: RunnerId, execution_id: &str) -> Result<(), RunnerError> {
        if let Some(token) = self.aborts.read().await.get(execution_id) {
            token.cancel();
            tracing::debug!(runner, execution_id, "Abort signalled to attempt");
        }
        Ok(())
    }

    async fn terminate(&self, runner: RunnerId) -> Result<(), RunnerError> {
        tracing::debug!(runner, "Process runner released");
        Ok(())
    }
}

/// Spawn the attempt process, pipe the payload to stdin, capture output,
/// and enforce the per-attempt timeout and the abort signal.
async fn run_attempt(
    cmd: &mut Command,
    payload: &str,
    attempt_timeout: Duration,
    abort: &CancellationToken,
) -> Result<RunReport, RunnerError> {
    // `kill_on_drop(true)` ensures the child is killed when the attempt
    // future is dropped (timeout, abort, overall deadline).
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let start = Instant::now();

    let mut child = cmd
        .spawn()
        .map_err(|e| RunnerError::Launch(e.to_string()))?;

    // Write the payload to stdin, then close it. Best-effort; if the
    // process closes stdin early, ignore the error.
    if let Some(mut stdin) = child.stdin.take() {
        let _ = stdin.write_all(payload.as_bytes()).await;
        drop(stdin);
    }

    // Take stdout/stderr handles and read them in spawned tasks so we can
    // still call `child.wait()` (which borrows `&mut child`).
    let stdout_handle = child.stdout.take();
    let stderr_handle = child.stderr.take();

    let stdout_task = tokio::spawn(async move { read_stream(stdout_handle).await });
    let stderr_task = tokio::spawn(async move { read_stream(stderr_handle).await });

    let status = tokio::select! {
        _ = abort.cancelled() => {
            // Dropping `child` kills the process via kill_on_drop.
            return Err(RunnerError::Aborted);
        }
        wait_result = tokio::time::timeout(attempt_timeout, child.wait()) => {
            match wait_result {
                Ok(Ok(status)) => status,
                Ok(Err(e)) => return Err(RunnerError::Launch(e.to_string())),
                Err(_elapsed) => {
                    return Err(RunnerError::AttemptTimedOut {
                        elapsed_ms: start.elapsed().as_millis() as u64,
                    });
                }
            }
        }
    };

    let duration_ms = start.elapsed().as_millis() as u64;
    let stdout_bytes = stdout_task.await.unwrap_or_default();
    let stderr_bytes = stderr_task.await.unwrap_or_default();
    let stdout = String::from_utf8_lossy(&stdout_bytes).into_owned();
    let stderr = String::from_utf8_lossy(&stderr_bytes).into_owned();

    let exit_code = status.code().unwrap_or(-1);
    if exit_code != 0 {
        return Err(RunnerError::Failed { exit_code, stderr });
    }

    // Prefer structured output; fall back to raw stdout.
    let result = serde_json::from_str(stdout.trim())
        .unwrap_or_else(|_| serde_json::Value::String(stdout.trim().to_string()));

    Ok(RunReport {
        result,
        duration_ms,
    })
}

/// Read an entire output stream into a byte buffer, capped at [`MAX_OUTPUT_BYTES`].
async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut h) = handle {
        let _ = (&mut h)
            .take(MAX_OUTPUT_BYTES as u64)
            .read_to_end(&mut buf)
            .await;
    }
    buf
}
