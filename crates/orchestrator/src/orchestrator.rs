//! Top-level execution orchestrator.
//!
//! [`Orchestrator`] composes the priority queue, the runner pool, the
//! status table, and the notification hub, and owns the dispatch and
//! autoscale background loops. Created once via [`Orchestrator::start`];
//! the returned `Arc` can be cheaply cloned into whatever request layer
//! fronts the service.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use testgrid_core::execution::ExecutionRequest;
use testgrid_core::scheduling::ExecutionState;
use testgrid_events::{ExecutionEvent, NotificationHub};
use testgrid_runner::{RunnerBackend, RunnerPool};

use crate::autoscaler;
use crate::config::OrchestratorConfig;
use crate::dispatcher::{CancelRegistry, Dispatcher};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::queue::PriorityQueue;
use crate::table::{ExecutionRecord, StatusTable};

/// Point-in-time view of queue and execution counts.
///
/// Computed on demand from the queue and the status table; under
/// concurrency the buckets are eventually consistent, but
/// `waiting + active` never under-counts pending-or-running executions.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct QueueStats {
    /// Queued, not yet dispatched.
    pub waiting: usize,
    /// Currently running on a runner.
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub timed_out: usize,
}

/// Coordinates execution intake, dispatch, monitoring, and scaling.
pub struct Orchestrator {
    queue: Arc<PriorityQueue>,
    pool: Arc<RunnerPool>,
    table: Arc<StatusTable>,
    hub: Arc<NotificationHub>,
    cancel_tokens: CancelRegistry,
    /// Master cancellation token; cancelled during shutdown. Per-execution
    /// tokens are children, so shutdown interrupts in-flight executions.
    master: CancellationToken,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    stopped: AtomicBool,
    drain_timeout: std::time::Duration,
}

impl Orchestrator {
    /// Build the component graph, warm the pool to its floor, and spawn
    /// the dispatch and autoscale loops.
    pub async fn start(config: OrchestratorConfig, backend: Arc<dyn RunnerBackend>) -> Arc<Self> {
        let queue = Arc::new(PriorityQueue::new());
        let pool = Arc::new(RunnerPool::new(backend, config.pool_config()));
        let table = Arc::new(StatusTable::new());
        let hub = Arc::new(NotificationHub::new());
        let cancel_tokens: CancelRegistry = Arc::new(RwLock::new(HashMap::new()));
        let master = CancellationToken::new();

        pool.ensure_min().await;

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&queue),
            Arc::clone(&pool),
            Arc::clone(&table),
            Arc::clone(&hub),
            Arc::clone(&cancel_tokens),
            master.clone(),
            config.dispatch_interval,
        ));
        let dispatch_task = tokio::spawn(dispatcher.run());

        let autoscale_task = tokio::spawn(autoscaler::run(
            Arc::clone(&queue),
            Arc::clone(&pool),
            config.min_runners,
            config.max_runners,
            config.autoscale_interval,
            master.clone(),
        ));

        Arc::new(Self {
            queue,
            pool,
            table,
            hub,
            cancel_tokens,
            master,
            tasks: Mutex::new(vec![dispatch_task, autoscale_task]),
            stopped: AtomicBool::new(false),
            drain_timeout: config.drain_timeout,
        })
    }

    /// Accept a new execution request.
    ///
    /// Fills a blank id with a v4 UUID, validates the configuration,
    /// creates the `pending` status record, and enqueues the request.
    /// Returns the effective execution id.
    pub async fn submit_execution(
        &self,
        mut request: ExecutionRequest,
    ) -> OrchestratorResult<String> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(OrchestratorError::ShuttingDown);
        }

        request.validate()?;
        request.ensure_id();
        let id = request.id.clone();

        // The table is the system-wide id authority: it covers queued,
        // running, and terminal executions alike.
        let submitted_at = self.table.create(&id).await?;
        self.queue.enqueue(request, submitted_at).await?;

        self.hub
            .broadcast(ExecutionEvent::new(id.clone(), ExecutionState::Pending))
            .await;
        tracing::info!(execution_id = %id, "Execution submitted");
        Ok(id)
    }

    /// Cancel a pending or running execution.
    ///
    /// Returns `true` if this call performed the cancellation; `false`
    /// for unknown ids and executions that are already terminal (calling
    /// twice returns `true` then `false`).
    pub async fn cancel_execution(&self, id: &str) -> bool {
        let Some(record) = self.table.get(id).await else {
            return false;
        };
        if record.state.is_terminal() {
            return false;
        }

        // Drop the queued entry if it has not been dispatched yet; a
        // `false` here just means the dispatcher got there first.
        self.queue.remove(id).await;

        if !self
            .table
            .finalize(id, ExecutionState::Cancelled, None, None)
            .await
        {
            // A completion path won the race after our state read.
            return false;
        }

        // Signal the execution task, if one is running. Its bookkeeping
        // (runner abort and release) proceeds without blocking us.
        if let Some(token) = self.cancel_tokens.read().await.get(id) {
            token.cancel();
        }

        self.hub
            .broadcast(ExecutionEvent::new(id.to_string(), ExecutionState::Cancelled))
            .await;
        tracing::info!(execution_id = %id, "Execution cancelled");
        true
    }

    /// Look up the status record for one execution.
    pub async fn execution_status(&self, id: &str) -> Option<ExecutionRecord> {
        self.table.get(id).await
    }

    /// All executions that have not reached a terminal state.
    pub async fn active_executions(&self) -> Vec<ExecutionRecord> {
        self.table.active().await
    }

    /// Current queue and execution counts.
    pub async fn queue_stats(&self) -> QueueStats {
        let waiting = self.queue.len().await;
        let counts = self.table.counts().await;
        QueueStats {
            waiting,
            active: counts.running,
            completed: counts.completed,
            failed: counts.failed,
            cancelled: counts.cancelled,
            timed_out: counts.timed_out,
        }
    }

    /// Attach an observer to the execution event stream.
    ///
    /// Events published before the subscription are not replayed.
    pub async fn subscribe(
        &self,
        subscriber_id: String,
    ) -> mpsc::UnboundedReceiver<ExecutionEvent> {
        self.hub.subscribe(subscriber_id).await
    }

    /// The notification hub, for observer management.
    pub fn hub(&self) -> &NotificationHub {
        &self.hub
    }

    /// Idempotent shutdown: stop the loops, interrupt in-flight
    /// executions, drain the pool, and close the hub.
    ///
    /// Individual teardown failures are logged and swallowed so one stuck
    /// runner cannot block full shutdown.
    pub async fn cleanup(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            tracing::debug!("Cleanup already performed");
            return;
        }
        tracing::info!("Orchestrator shutting down");

        // Cancelling the master token stops both loops and, through the
        // child tokens, interrupts every in-flight execution task.
        self.master.cancel();

        let mut tasks = self.tasks.lock().await;
        for handle in tasks.drain(..) {
            if tokio::time::timeout(self.drain_timeout, handle).await.is_err() {
                tracing::warn!("Background task did not stop within the drain timeout");
            }
        }

        // In-flight execution tasks deregister from the cancel registry
        // once they have finalized their record and handed the runner
        // back; wait for that, bounded by the drain timeout.
        let settled = tokio::time::timeout(self.drain_timeout, async {
            while !self.cancel_tokens.read().await.is_empty() {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await;
        if settled.is_err() {
            tracing::warn!("In-flight executions did not settle within the drain timeout");
        }

        self.pool.shutdown().await;
        self.hub.shutdown().await;
        tracing::info!("Orchestrator shutdown complete");
    }
}
