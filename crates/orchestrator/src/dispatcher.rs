//! Execution dispatch loop.
//!
//! Polls the priority queue every `poll_interval` and matches ready
//! requests with pool runners. Each dispatched execution runs in its own
//! task that races the attempt loop against the overall deadline and the
//! per-execution cancellation token; the status table's compare-and-
//! transition guarantees exactly one finalization and exactly one runner
//! release per execution.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use testgrid_core::execution::ExecutionRequest;
use testgrid_core::scheduling::ExecutionState;
use testgrid_core::types::RunnerId;
use testgrid_events::{ExecutionEvent, NotificationHub};
use testgrid_runner::{RunReport, RunnerError, RunnerPool};

use crate::error::OrchestratorError;
use crate::queue::{PriorityQueue, QueuedEntry};
use crate::table::StatusTable;

/// Per-execution cancellation tokens, keyed by execution id.
///
/// Shared between the dispatcher (which registers them) and
/// `cancel_execution` (which fires them).
pub type CancelRegistry = Arc<RwLock<HashMap<String, CancellationToken>>>;

/// What ended the running phase of one execution.
enum ExecutionOutcome {
    /// The attempt loop reported a result or a final error.
    Reported(Result<RunReport, RunnerError>),
    /// The overall deadline fired first.
    DeadlineExceeded,
    /// The per-execution cancellation token fired first.
    Interrupted,
}

/// Background execution dispatcher.
///
/// A single long-lived task that drains the queue into pool runners.
/// Multiple executions run concurrently; the loop itself never blocks on
/// one of them.
pub struct Dispatcher {
    queue: Arc<PriorityQueue>,
    pool: Arc<RunnerPool>,
    table: Arc<StatusTable>,
    hub: Arc<NotificationHub>,
    cancel_tokens: CancelRegistry,
    master: CancellationToken,
    poll_interval: Duration,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<PriorityQueue>,
        pool: Arc<RunnerPool>,
        table: Arc<StatusTable>,
        hub: Arc<NotificationHub>,
        cancel_tokens: CancelRegistry,
        master: CancellationToken,
        poll_interval: Duration,
    ) -> Self {
        Self {
            queue,
            pool,
            table,
            hub,
            cancel_tokens,
            master,
            poll_interval,
        }
    }

    /// Run the dispatch loop until the master token is triggered.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Dispatch loop started",
        );

        loop {
            tokio::select! {
                _ = self.master.cancelled() => {
                    tracing::info!("Dispatch loop shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.try_dispatch().await;
                }
            }
        }
    }

    /// One dispatch cycle: drain the queue while the pool has capacity.
    ///
    /// On pool-busy the dequeued entry is restored to the front of its
    /// priority band and the cycle backs off until the next tick; a
    /// request is never lost or silently dropped.
    async fn try_dispatch(self: &Arc<Self>) {
        loop {
            let Some(entry) = self.queue.dequeue_next().await else {
                return;
            };

            match self.pool.acquire(&entry.request.id).await {
                Ok(Some(runner)) => {
                    let dispatcher = Arc::clone(self);
                    tokio::spawn(async move {
                        dispatcher.run_execution(entry, runner).await;
                    });
                }
                Ok(None) => {
                    tracing::trace!(execution_id = %entry.request.id, "Pool busy; backing off");
                    self.queue.restore(entry).await;
                    return;
                }
                Err(e) => {
                    // Transient provisioning failure: the request stays
                    // queued and the cycle retries next tick.
                    tracing::warn!(
                        execution_id = %entry.request.id,
                        error = %e,
                        "Runner acquisition failed; will retry",
                    );
                    self.queue.restore(entry).await;
                    return;
                }
            }
        }
    }

    /// Drive one execution from dispatch to its terminal state.
    async fn run_execution(self: Arc<Self>, entry: QueuedEntry, runner: RunnerId) {
        let request = entry.request;
        let id = request.id.clone();

        // Register the cancel signal before the running transition so a
        // cancel arriving right after submission can always reach us.
        let exec_cancel = self.master.child_token();
        self.cancel_tokens
            .write()
            .await
            .insert(id.clone(), exec_cancel.clone());

        if self.table.mark_running(&id).await.is_none() {
            // Finalized while queued (cancelled): hand the runner back.
            self.pool.release(runner).await;
            self.cancel_tokens.write().await.remove(&id);
            return;
        }

        self.hub
            .broadcast(ExecutionEvent::new(id.clone(), ExecutionState::Running))
            .await;
        tracing::info!(
            execution_id = %id,
            runner,
            priority = request.priority,
            "Execution dispatched",
        );

        let overall = Duration::from_millis(request.timeout_ms);
        let outcome = tokio::select! {
            _ = exec_cancel.cancelled() => ExecutionOutcome::Interrupted,
            _ = tokio::time::sleep(overall) => ExecutionOutcome::DeadlineExceeded,
            result = attempt_loop(&self.pool, runner, &request) => {
                ExecutionOutcome::Reported(result)
            }
        };

        match outcome {
            ExecutionOutcome::Reported(Ok(report)) => {
                let detail = serde_json::json!({"duration_ms": report.duration_ms});
                if self
                    .table
                    .finalize(&id, ExecutionState::Completed, None, Some(report.result))
                    .await
                {
                    self.hub
                        .broadcast(
                            ExecutionEvent::new(id.clone(), ExecutionState::Completed)
                                .with_detail(detail),
                        )
                        .await;
                    tracing::info!(execution_id = %id, "Execution completed");
                }
                self.pool.release(runner).await;
            }
            ExecutionOutcome::Reported(Err(e)) => {
                if self
                    .table
                    .finalize(&id, ExecutionState::Failed, Some(e.to_string()), None)
                    .await
                {
                    self.hub
                        .broadcast(
                            ExecutionEvent::new(id.clone(), ExecutionState::Failed)
                                .with_detail(serde_json::json!({"error": e.to_string()})),
                        )
                        .await;
                    tracing::warn!(execution_id = %id, error = %e, "Execution failed");
                }
                self.pool.release(runner).await;
            }
            ExecutionOutcome::DeadlineExceeded => {
                let error = OrchestratorError::DeadlineExceeded(request.timeout_ms).to_string();
                if self
                    .table
                    .finalize(&id, ExecutionState::TimedOut, Some(error), None)
                    .await
                {
                    self.hub
                        .broadcast(
                            ExecutionEvent::new(id.clone(), ExecutionState::TimedOut)
                                .with_detail(serde_json::json!({"timeout_ms": request.timeout_ms})),
                        )
                        .await;
                    tracing::warn!(
                        execution_id = %id,
                        timeout_ms = request.timeout_ms,
                        "Execution timed out",
                    );
                }
                // The in-flight attempt future is already dropped; ask the
                // runner to abort whatever is left, best effort.
                self.pool.abort(runner, &id).await;
            }
            ExecutionOutcome::Interrupted => {
                // An external cancel usually finalized the record already;
                // this covers interruption via the master token during
                // shutdown, where this task is the only finalizer left.
                if self
                    .table
                    .finalize(&id, ExecutionState::Cancelled, None, None)
                    .await
                {
                    self.hub
                        .broadcast(ExecutionEvent::new(id.clone(), ExecutionState::Cancelled))
                        .await;
                    tracing::info!(execution_id = %id, "Execution cancelled");
                }
                self.pool.abort(runner, &id).await;
            }
        }

        // Deregistered last: an empty registry means every dispatched
        // execution has been finalized and its runner handed back, which
        // is what shutdown waits on.
        self.cancel_tokens.write().await.remove(&id);
    }
}

/// Run attempts until one succeeds, a non-transient error occurs, or the
/// retry budget is exhausted.
///
/// The budget counts additional attempts after the first; the overall
/// deadline keeps running across retries and is enforced by the caller.
async fn attempt_loop(
    pool: &RunnerPool,
    runner: RunnerId,
    request: &ExecutionRequest,
) -> Result<RunReport, RunnerError> {
    let budget = request.configuration.retries;
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match pool.execute(runner, request).await {
            Ok(report) => return Ok(report),
            Err(e) if e.is_transient() && attempt <= budget => {
                tracing::warn!(
                    execution_id = %request.id,
                    attempt,
                    budget,
                    error = %e,
                    "Transient attempt failure; retrying",
                );
            }
            Err(e) => return Err(e),
        }
    }
}
