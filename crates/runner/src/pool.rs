//! Runner pool lifecycle management.
//!
//! [`RunnerPool`] owns every live runner: it hands idle runners to the
//! dispatch loop, provisions new ones while below the configured maximum,
//! returns released runners to idle, and tears down excess idle capacity
//! when the autoscale loop asks it to. The pool exclusively owns runner
//! lifecycle; callers only hold a runner id for the duration of one
//! execution.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use testgrid_core::autoscale::ScalePlan;
use testgrid_core::execution::ExecutionRequest;
use testgrid_core::types::RunnerId;

use crate::backend::{RunReport, RunnerBackend, RunnerError};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Sizing and timing knobs for the pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Idle floor the autoscaler never tears below.
    pub min_runners: usize,
    /// Hard ceiling on concurrently live runners.
    pub max_runners: usize,
    /// How long a runner must sit idle before it becomes a teardown
    /// candidate.
    pub idle_grace: Duration,
    /// How long to wait for a runner to acknowledge an abort before it is
    /// force-terminated.
    pub abort_grace: Duration,
    /// Per-runner teardown wait during shutdown.
    pub drain_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_runners: 1,
            max_runners: 4,
            idle_grace: Duration::from_secs(30),
            abort_grace: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(5),
        }
    }
}

// ---------------------------------------------------------------------------
// Runner bookkeeping
// ---------------------------------------------------------------------------

/// Lifecycle state of one pooled runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    /// Being launched; occupies a capacity slot but cannot take work yet.
    Provisioning,
    /// Live and available for assignment.
    Idle,
    /// Executing one assigned execution.
    Assigned,
    /// Selected for teardown; no longer assignable.
    Draining,
    /// Torn down. Terminated runners leave the pool map.
    Terminated,
}

/// Internal bookkeeping for a single runner.
struct ManagedRunner {
    state: RunnerState,
    assigned_execution: Option<String>,
    idle_since: Option<Instant>,
}

/// Point-in-time pool counts used by the autoscale loop.
#[derive(Debug, Clone, Copy)]
pub struct PoolCounts {
    /// Runners not in the terminated state.
    pub active: usize,
    /// Runners currently idle.
    pub idle: usize,
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

/// Manages the set of live runners backing execution dispatch.
///
/// Designed to be wrapped in `Arc` and shared between the dispatch loop,
/// the autoscale loop, and cancellation handling.
pub struct RunnerPool {
    backend: Arc<dyn RunnerBackend>,
    config: PoolConfig,
    runners: RwLock<HashMap<RunnerId, ManagedRunner>>,
    next_id: std::sync::atomic::AtomicU64,
}

impl RunnerPool {
    /// Create an empty pool over the given backend.
    pub fn new(backend: Arc<dyn RunnerBackend>, config: PoolConfig) -> Self {
        Self {
            backend,
            config,
            runners: RwLock::new(HashMap::new()),
            next_id: std::sync::atomic::AtomicU64::new(1),
        }
    }

    /// Provision runners until the pool reaches its configured floor.
    ///
    /// Called once at startup; provision failures are logged and left for
    /// the autoscale loop to retry.
    pub async fn ensure_min(&self) {
        loop {
            let active = self.runners.read().await.len();
            if active >= self.config.min_runners {
                return;
            }
            if let Err(e) = self.provision_one(None).await {
                tracing::warn!(error = %e, "Initial runner provisioning failed");
                return;
            }
        }
    }

    /// Attempt to hand out a runner for `execution_id`.
    ///
    /// Prefers an idle runner; provisions a new one while below
    /// `max_runners`; returns `Ok(None)` (busy) at capacity. Never blocks
    /// the caller beyond one provisioning round-trip.
    pub async fn acquire(&self, execution_id: &str) -> Result<Option<RunnerId>, RunnerError> {
        {
            let mut runners = self.runners.write().await;
            if let Some((id, runner)) = runners
                .iter_mut()
                .find(|(_, r)| r.state == RunnerState::Idle)
            {
                runner.state = RunnerState::Assigned;
                runner.assigned_execution = Some(execution_id.to_string());
                runner.idle_since = None;
                return Ok(Some(*id));
            }
            if runners.len() >= self.config.max_runners {
                return Ok(None);
            }
        }
        // Below capacity with nothing idle: grow by one.
        let id = self.provision_one(Some(execution_id.to_string())).await?;
        Ok(Some(id))
    }

    /// Execute one attempt of `request` on an acquired runner.
    pub async fn execute(
        &self,
        runner: RunnerId,
        request: &ExecutionRequest,
    ) -> Result<RunReport, RunnerError> {
        if !self.runners.read().await.contains_key(&runner) {
            return Err(RunnerError::UnknownRunner(runner));
        }
        self.backend.execute(runner, request).await
    }

    /// Return a runner to the idle set.
    ///
    /// Unknown ids (already terminated) are a logged no-op so completion
    /// paths racing a teardown stay harmless.
    pub async fn release(&self, runner: RunnerId) {
        let mut runners = self.runners.write().await;
        match runners.get_mut(&runner) {
            Some(managed) => {
                let released_from = managed.assigned_execution.take();
                managed.state = RunnerState::Idle;
                managed.idle_since = Some(Instant::now());
                tracing::debug!(runner, execution = ?released_from, "Runner returned to idle");
            }
            None => {
                tracing::debug!(runner, "Release for unknown runner ignored");
            }
        }
    }

    /// Signal the runner to abort `execution_id`, then release it.
    ///
    /// A runner that does not acknowledge within the abort grace period is
    /// force-terminated instead of returning to the idle set.
    pub async fn abort(&self, runner: RunnerId, execution_id: &str) {
        let acked = tokio::time::timeout(
            self.config.abort_grace,
            self.backend.abort(runner, execution_id),
        )
        .await;

        match acked {
            Ok(Ok(())) => self.release(runner).await,
            Ok(Err(e)) => {
                tracing::warn!(runner, execution_id, error = %e, "Abort failed; terminating runner");
                self.terminate(runner).await;
            }
            Err(_elapsed) => {
                tracing::warn!(runner, execution_id, "Abort not acknowledged; terminating runner");
                self.terminate(runner).await;
            }
        }
    }

    /// Number of runners not in the terminated state.
    pub async fn active_count(&self) -> usize {
        self.runners.read().await.len()
    }

    /// Snapshot of active and idle counts under one lock acquisition.
    pub async fn counts(&self) -> PoolCounts {
        let runners = self.runners.read().await;
        PoolCounts {
            active: runners.len(),
            idle: runners
                .values()
                .filter(|r| r.state == RunnerState::Idle)
                .count(),
        }
    }

    /// Apply one autoscale decision.
    ///
    /// Provision failures are logged and retried on a later tick rather
    /// than propagated; teardown honors the idle grace period.
    pub async fn apply(&self, plan: ScalePlan) {
        match plan {
            ScalePlan::Hold => {}
            ScalePlan::ProvisionUp(n) => {
                for _ in 0..n {
                    if self.runners.read().await.len() >= self.config.max_runners {
                        break;
                    }
                    match self.provision_one(None).await {
                        Ok(id) => tracing::info!(runner = id, "Scaled up"),
                        Err(e) => {
                            tracing::warn!(error = %e, "Scale-up provisioning failed");
                            break;
                        }
                    }
                }
            }
            ScalePlan::TearDownIdle(n) => {
                let candidates = self.drain_candidates(n).await;
                for id in candidates {
                    tracing::info!(runner = id, "Scaling down idle runner");
                    self.terminate(id).await;
                }
            }
        }
    }

    /// Tear down every runner and clear the pool. Safe to call repeatedly;
    /// individual teardown failures are logged, never propagated, so one
    /// stuck runner cannot block shutdown.
    pub async fn shutdown(&self) {
        let drained: Vec<RunnerId> = {
            let mut runners = self.runners.write().await;
            runners.drain().map(|(id, _)| id).collect()
        };
        if drained.is_empty() {
            return;
        }

        tracing::info!(count = drained.len(), "Draining runner pool");
        for id in drained {
            match tokio::time::timeout(self.config.drain_timeout, self.backend.terminate(id)).await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(runner = id, error = %e, "Runner teardown failed"),
                Err(_elapsed) => tracing::warn!(runner = id, "Runner teardown timed out"),
            }
        }
        tracing::info!("Runner pool drained");
    }

    // ---- private helpers ----

    /// Reserve a slot, provision via the backend, and finalize the state.
    ///
    /// The placeholder entry occupies capacity while the backend call is
    /// in flight so concurrent acquires cannot overshoot `max_runners`.
    async fn provision_one(&self, assign_to: Option<String>) -> Result<RunnerId, RunnerError> {
        let id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        self.runners.write().await.insert(
            id,
            ManagedRunner {
                state: RunnerState::Provisioning,
                assigned_execution: None,
                idle_since: None,
            },
        );

        match self.backend.provision(id).await {
            Ok(()) => {
                let mut runners = self.runners.write().await;
                // The entry can be gone if shutdown drained mid-provision.
                if let Some(managed) = runners.get_mut(&id) {
                    match assign_to {
                        Some(execution_id) => {
                            managed.state = RunnerState::Assigned;
                            managed.assigned_execution = Some(execution_id);
                        }
                        None => {
                            managed.state = RunnerState::Idle;
                            managed.idle_since = Some(Instant::now());
                        }
                    }
                }
                tracing::debug!(runner = id, "Runner provisioned");
                Ok(id)
            }
            Err(e) => {
                self.runners.write().await.remove(&id);
                Err(e)
            }
        }
    }

    /// Select up to `limit` idle runners past the grace period and mark
    /// them draining.
    async fn drain_candidates(&self, limit: usize) -> Vec<RunnerId> {
        let mut runners = self.runners.write().await;
        let grace = self.config.idle_grace;
        let mut selected = Vec::new();
        for (id, runner) in runners.iter_mut() {
            if selected.len() >= limit {
                break;
            }
            let grace_elapsed = runner
                .idle_since
                .map(|t| t.elapsed() >= grace)
                .unwrap_or(false);
            if runner.state == RunnerState::Idle && grace_elapsed {
                runner.state = RunnerState::Draining;
                selected.push(*id);
            }
        }
        selected
    }

    /// Remove a runner from the pool and tear it down via the backend.
    async fn terminate(&self, runner: RunnerId) {
        self.runners.write().await.remove(&runner);
        match tokio::time::timeout(self.config.drain_timeout, self.backend.terminate(runner)).await
        {
            Ok(Ok(())) => tracing::debug!(runner, "Runner terminated"),
            Ok(Err(e)) => tracing::warn!(runner, error = %e, "Runner teardown failed"),
            Err(_elapsed) => tracing::warn!(runner, "Runner teardown timed out"),
        }
    }
}
