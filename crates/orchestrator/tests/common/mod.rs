//! Shared test fixtures: a scriptable mock runner backend and helpers.
//!
//! The mock interprets the opaque payload string to decide its behaviour,
//! standing in for a real container runtime:
//!
//! - `"ok"` (or anything unrecognized) — succeed immediately.
//! - `"sleep:<ms>"` — succeed after a delay.
//! - `"hang"` — never finish on its own.
//! - `"fail"` — report a worker failure (non-transient).
//! - `"reject"` — reject the payload as malformed (non-transient).
//! - `"flaky:<n>"` — fail transiently `n` times, then succeed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use testgrid_core::execution::ExecutionRequest;
use testgrid_core::scheduling::ExecutionState;
use testgrid_core::types::RunnerId;
use testgrid_orchestrator::{ExecutionRecord, Orchestrator, OrchestratorConfig};
use testgrid_runner::{RunReport, RunnerBackend, RunnerError};

#[derive(Default)]
pub struct MockBackend {
    pub provisioned: AtomicUsize,
    pub terminated: AtomicUsize,
    pub aborted: AtomicUsize,
    attempts: Mutex<HashMap<String, u32>>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl RunnerBackend for MockBackend {
    async fn provision(&self, _runner: RunnerId) -> Result<(), RunnerError> {
        self.provisioned.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn execute(
        &self,
        _runner: RunnerId,
        request: &ExecutionRequest,
    ) -> Result<RunReport, RunnerError> {
        let payload = request.payload.as_str();

        if let Some(ms) = payload.strip_prefix("sleep:") {
            let ms: u64 = ms.parse().expect("sleep payload wants milliseconds");
            tokio::time::sleep(Duration::from_millis(ms)).await;
            return Ok(passed_report());
        }

        if let Some(n) = payload.strip_prefix("flaky:") {
            let n: u32 = n.parse().expect("flaky payload wants a count");
            let attempt = {
                let mut attempts = self.attempts.lock().unwrap();
                let entry = attempts.entry(request.id.clone()).or_insert(0);
                *entry += 1;
                *entry
            };
            if attempt <= n {
                return Err(RunnerError::Launch("runner crashed".to_string()));
            }
            return Ok(passed_report());
        }

        match payload {
            "hang" => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(passed_report())
            }
            "fail" => Err(RunnerError::Failed {
                exit_code: 1,
                stderr: "assertion failed".to_string(),
            }),
            "reject" => Err(RunnerError::Rejected("malformed payload".to_string())),
            _ => Ok(passed_report()),
        }
    }

    async fn abort(&self, _runner: RunnerId, _execution_id: &str) -> Result<(), RunnerError> {
        self.aborted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn terminate(&self, _runner: RunnerId) -> Result<(), RunnerError> {
        self.terminated.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn passed_report() -> RunReport {
    RunReport {
        result: serde_json::json!({"passed": 1, "failed": 0}),
        duration_ms: 1,
    }
}

/// Fast-cycling configuration for tests.
pub fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        min_runners: 0,
        max_runners: 2,
        dispatch_interval: Duration::from_millis(20),
        autoscale_interval: Duration::from_millis(20),
        idle_grace: Duration::from_millis(50),
        abort_grace: Duration::from_millis(200),
        drain_timeout: Duration::from_millis(500),
        runner_command: vec!["unused".to_string()],
    }
}

/// Start an orchestrator over a fresh mock backend.
pub async fn start_mock(config: OrchestratorConfig) -> (Arc<MockBackend>, Arc<Orchestrator>) {
    let backend = MockBackend::new();
    let orchestrator = Orchestrator::start(config, backend.clone()).await;
    (backend, orchestrator)
}

/// Build a request with the given payload and defaults everywhere else.
pub fn request(payload: &str) -> ExecutionRequest {
    ExecutionRequest::new(payload)
}

/// Poll until the execution reaches `state` or the deadline passes.
pub async fn wait_for_state(
    orchestrator: &Orchestrator,
    id: &str,
    state: ExecutionState,
    deadline: Duration,
) -> ExecutionRecord {
    let poll = Duration::from_millis(10);
    let start = std::time::Instant::now();
    loop {
        if let Some(record) = orchestrator.execution_status(id).await {
            if record.state == state {
                return record;
            }
        }
        if start.elapsed() > deadline {
            let current = orchestrator.execution_status(id).await.map(|r| r.state);
            panic!("{id} did not reach {state:?} within {deadline:?} (currently {current:?})");
        }
        tokio::time::sleep(poll).await;
    }
}
