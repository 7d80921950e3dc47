//! Integration tests for the orchestrator's public operations.
//!
//! All tests run against the scriptable mock backend in `common`; each
//! test starts its own orchestrator with fast loop intervals.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use assert_matches::assert_matches;

use common::{request, start_mock, test_config, wait_for_state};
use testgrid_core::scheduling::{ExecutionState, PRIORITY_NORMAL};
use testgrid_orchestrator::OrchestratorError;

// ---------------------------------------------------------------------------
// Test: submission is accepted and dispatch is asynchronous
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_returns_pending_before_dispatch() {
    // A long dispatch interval guarantees the read happens before the
    // first dispatch cycle that could see this request.
    let mut config = test_config();
    config.dispatch_interval = Duration::from_millis(200);
    let (_backend, orchestrator) = start_mock(config).await;

    let id = orchestrator.submit_execution(request("ok")).await.unwrap();

    let record = orchestrator.execution_status(&id).await.unwrap();
    assert_eq!(record.state, ExecutionState::Pending);
    assert!(record.started_at.is_none());

    wait_for_state(&orchestrator, &id, ExecutionState::Completed, Duration::from_secs(2)).await;
    orchestrator.cleanup().await;
}

// ---------------------------------------------------------------------------
// Test: a blank id becomes a v4 UUID
// ---------------------------------------------------------------------------

#[tokio::test]
async fn blank_id_becomes_v4_uuid() {
    let (_backend, orchestrator) = start_mock(test_config()).await;

    let mut submission = request("ok");
    submission.id = String::new();

    let id = orchestrator.submit_execution(submission).await.unwrap();

    let parsed = uuid::Uuid::parse_str(&id).expect("generated id should be a UUID");
    assert_eq!(parsed.get_version_num(), 4);

    let record = orchestrator.execution_status(&id).await.unwrap();
    assert!(matches!(
        record.state,
        ExecutionState::Pending | ExecutionState::Running | ExecutionState::Completed
    ));
    orchestrator.cleanup().await;
}

// ---------------------------------------------------------------------------
// Test: defaults fill omitted priority
// ---------------------------------------------------------------------------

#[tokio::test]
async fn omitted_priority_defaults_to_normal() {
    let submission: testgrid_core::ExecutionRequest =
        serde_json::from_str(r#"{"payload": "ok", "id": ""}"#).unwrap();
    assert_eq!(submission.priority, PRIORITY_NORMAL);
}

// ---------------------------------------------------------------------------
// Test: invalid configuration is rejected before enqueueing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_browser_engine_rejected() {
    let (_backend, orchestrator) = start_mock(test_config()).await;

    let mut submission = request("ok");
    submission.id = "bad-config".to_string();
    submission.configuration.browser = "netscape".to_string();

    let err = orchestrator.submit_execution(submission).await.unwrap_err();
    assert_matches!(err, OrchestratorError::Config(_));

    // Rejected before any record was created.
    assert!(orchestrator.execution_status("bad-config").await.is_none());
    orchestrator.cleanup().await;
}

// ---------------------------------------------------------------------------
// Test: duplicate ids are rejected across the whole lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn duplicate_id_rejected_even_after_completion() {
    let (_backend, orchestrator) = start_mock(test_config()).await;

    let mut submission = request("ok");
    submission.id = "dup-1".to_string();
    orchestrator.submit_execution(submission.clone()).await.unwrap();

    // Still pending or running: duplicate.
    let err = orchestrator.submit_execution(submission.clone()).await.unwrap_err();
    assert_matches!(err, OrchestratorError::DuplicateId(ref id) if id == "dup-1");

    // Terminal records keep their id reserved.
    wait_for_state(&orchestrator, "dup-1", ExecutionState::Completed, Duration::from_secs(2)).await;
    let err = orchestrator.submit_execution(submission).await.unwrap_err();
    assert_matches!(err, OrchestratorError::DuplicateId(_));
    orchestrator.cleanup().await;
}

// ---------------------------------------------------------------------------
// Test: a successful run records the worker result
// ---------------------------------------------------------------------------

#[tokio::test]
async fn completed_execution_carries_result() {
    let (_backend, orchestrator) = start_mock(test_config()).await;

    let id = orchestrator.submit_execution(request("ok")).await.unwrap();
    let record =
        wait_for_state(&orchestrator, &id, ExecutionState::Completed, Duration::from_secs(2)).await;

    assert_eq!(record.result.unwrap()["passed"], 1);
    assert!(record.error.is_none());
    assert!(record.started_at.is_some());
    assert!(record.finished_at.is_some());
    orchestrator.cleanup().await;
}

// ---------------------------------------------------------------------------
// Test: worker failure ends the execution failed with the error recorded
// ---------------------------------------------------------------------------

#[tokio::test]
async fn worker_failure_records_error() {
    let (_backend, orchestrator) = start_mock(test_config()).await;

    let id = orchestrator.submit_execution(request("fail")).await.unwrap();
    let record =
        wait_for_state(&orchestrator, &id, ExecutionState::Failed, Duration::from_secs(2)).await;

    assert!(record.error.unwrap().contains("assertion failed"));
    assert!(record.result.is_none());
    orchestrator.cleanup().await;
}

// ---------------------------------------------------------------------------
// Test: transient failures are retried within the configured budget
// ---------------------------------------------------------------------------

#[tokio::test]
async fn transient_failures_retried_to_success() {
    let (_backend, orchestrator) = start_mock(test_config()).await;

    let mut submission = request("flaky:2");
    submission.configuration.retries = 2;

    let id = orchestrator.submit_execution(submission).await.unwrap();
    wait_for_state(&orchestrator, &id, ExecutionState::Completed, Duration::from_secs(2)).await;
    orchestrator.cleanup().await;
}

#[tokio::test]
async fn exhausted_retry_budget_fails() {
    let (_backend, orchestrator) = start_mock(test_config()).await;

    let mut submission = request("flaky:3");
    submission.configuration.retries = 1;

    let id = orchestrator.submit_execution(submission).await.unwrap();
    let record =
        wait_for_state(&orchestrator, &id, ExecutionState::Failed, Duration::from_secs(2)).await;
    assert!(record.error.unwrap().contains("runner crashed"));
    orchestrator.cleanup().await;
}

#[tokio::test]
async fn rejected_payload_is_not_retried() {
    let (_backend, orchestrator) = start_mock(test_config()).await;

    let mut submission = request("reject");
    submission.configuration.retries = 5;

    let id = orchestrator.submit_execution(submission).await.unwrap();
    let record =
        wait_for_state(&orchestrator, &id, ExecutionState::Failed, Duration::from_secs(2)).await;
    assert!(record.error.unwrap().contains("malformed payload"));
    orchestrator.cleanup().await;
}

// ---------------------------------------------------------------------------
// Test: the overall deadline wins over a runaway payload
// ---------------------------------------------------------------------------

#[tokio::test]
async fn runaway_payload_times_out() {
    let (backend, orchestrator) = start_mock(test_config()).await;

    let mut submission = request("hang");
    submission.timeout_ms = 300;

    let id = orchestrator.submit_execution(submission).await.unwrap();
    let record =
        wait_for_state(&orchestrator, &id, ExecutionState::TimedOut, Duration::from_secs(3)).await;

    // Timed out, not failed or completed, and the runner was told to abort.
    assert!(record.error.unwrap().contains("deadline exceeded"));
    assert!(backend.aborted.load(Ordering::SeqCst) >= 1);
    orchestrator.cleanup().await;
}

// ---------------------------------------------------------------------------
// Test: cancel while pending removes the request from the queue
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_three_pending_empties_the_queue() {
    // Slow dispatch so all three stay pending long enough to cancel.
    let mut config = test_config();
    config.dispatch_interval = Duration::from_millis(500);
    let (_backend, orchestrator) = start_mock(config).await;

    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(orchestrator.submit_execution(request("ok")).await.unwrap());
    }

    for id in &ids {
        assert!(orchestrator.cancel_execution(id).await);
    }

    for id in &ids {
        let record = orchestrator.execution_status(id).await.unwrap();
        assert_eq!(record.state, ExecutionState::Cancelled);
    }

    let stats = orchestrator.queue_stats().await;
    assert_eq!(stats.waiting, 0);
    assert_eq!(stats.cancelled, 3);
    orchestrator.cleanup().await;
}

// ---------------------------------------------------------------------------
// Test: cancel is idempotent — true, then false, state unchanged
// ---------------------------------------------------------------------------

#[tokio::test]
async fn double_cancel_returns_true_then_false() {
    let (_backend, orchestrator) = start_mock(test_config()).await;

    let id = orchestrator.submit_execution(request("hang")).await.unwrap();
    wait_for_state(&orchestrator, &id, ExecutionState::Running, Duration::from_secs(2)).await;

    assert!(orchestrator.cancel_execution(&id).await);
    assert!(!orchestrator.cancel_execution(&id).await);

    let record = orchestrator.execution_status(&id).await.unwrap();
    assert_eq!(record.state, ExecutionState::Cancelled);
    orchestrator.cleanup().await;
}

#[tokio::test]
async fn cancel_unknown_id_returns_false() {
    let (_backend, orchestrator) = start_mock(test_config()).await;

    assert!(!orchestrator.cancel_execution("ghost").await);
    orchestrator.cleanup().await;
}

// ---------------------------------------------------------------------------
// Test: cancelling a running execution frees its runner for new work
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_running_releases_the_runner() {
    let mut config = test_config();
    config.max_runners = 1;
    let (_backend, orchestrator) = start_mock(config).await;

    let hanging = orchestrator.submit_execution(request("hang")).await.unwrap();
    wait_for_state(&orchestrator, &hanging, ExecutionState::Running, Duration::from_secs(2)).await;

    // The single runner is busy; a second submission must wait...
    let follow_up = orchestrator.submit_execution(request("ok")).await.unwrap();

    // ...until the hanging execution is cancelled.
    assert!(orchestrator.cancel_execution(&hanging).await);
    wait_for_state(&orchestrator, &follow_up, ExecutionState::Completed, Duration::from_secs(2))
        .await;
    orchestrator.cleanup().await;
}

// ---------------------------------------------------------------------------
// Test: queue stats never under-count pending and running work
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stats_cover_freshly_submitted_requests() {
    let mut config = test_config();
    config.dispatch_interval = Duration::from_millis(200);
    let (_backend, orchestrator) = start_mock(config).await;

    for priority in [1, 10, 1, 10, 5] {
        let mut submission = request("ok");
        submission.priority = priority;
        orchestrator.submit_execution(submission).await.unwrap();
    }

    let stats = orchestrator.queue_stats().await;
    assert!(
        stats.waiting + stats.active >= 5,
        "expected at least 5 waiting+active, got {stats:?}"
    );
    orchestrator.cleanup().await;
}

// ---------------------------------------------------------------------------
// Test: dispatch order respects priority once capacity frees up
// ---------------------------------------------------------------------------

#[tokio::test]
async fn higher_priority_dispatches_first_when_capacity_frees() {
    let mut config = test_config();
    config.max_runners = 1;
    let (_backend, orchestrator) = start_mock(config).await;

    let mut events = orchestrator.subscribe("observer".to_string()).await;

    // Occupy the only runner.
    let mut blocker = request("sleep:150");
    blocker.id = "blocker".to_string();
    blocker.priority = 10;
    orchestrator.submit_execution(blocker).await.unwrap();
    wait_for_state(&orchestrator, "blocker", ExecutionState::Running, Duration::from_secs(2)).await;

    // Queue a low-priority request before a high-priority one.
    let mut low = request("ok");
    low.id = "low".to_string();
    low.priority = 1;
    orchestrator.submit_execution(low).await.unwrap();

    let mut high = request("ok");
    high.id = "high".to_string();
    high.priority = 10;
    orchestrator.submit_execution(high).await.unwrap();

    wait_for_state(&orchestrator, "low", ExecutionState::Completed, Duration::from_secs(3)).await;

    // Collect the order in which executions entered Running.
    let mut running_order = Vec::new();
    while let Ok(event) = events.try_recv() {
        if event.state == ExecutionState::Running {
            running_order.push(event.execution_id);
        }
    }
    assert_eq!(running_order, ["blocker", "high", "low"]);
    orchestrator.cleanup().await;
}

// ---------------------------------------------------------------------------
// Test: observers see per-execution events in lifecycle order
// ---------------------------------------------------------------------------

#[tokio::test]
async fn observer_sees_lifecycle_in_order() {
    let (_backend, orchestrator) = start_mock(test_config()).await;

    let mut events = orchestrator.subscribe("observer".to_string()).await;

    let id = orchestrator.submit_execution(request("ok")).await.unwrap();

    for expected in [
        ExecutionState::Pending,
        ExecutionState::Running,
        ExecutionState::Completed,
    ] {
        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("event should arrive in time")
            .expect("stream should stay open");
        assert_eq!(event.execution_id, id);
        assert_eq!(event.state, expected);
    }
    orchestrator.cleanup().await;
}

// ---------------------------------------------------------------------------
// Test: active_executions lists exactly the non-terminal records
// ---------------------------------------------------------------------------

#[tokio::test]
async fn active_executions_tracks_non_terminal_records() {
    let (_backend, orchestrator) = start_mock(test_config()).await;

    let first = orchestrator.submit_execution(request("hang")).await.unwrap();
    let second = orchestrator.submit_execution(request("hang")).await.unwrap();
    wait_for_state(&orchestrator, &first, ExecutionState::Running, Duration::from_secs(2)).await;
    wait_for_state(&orchestrator, &second, ExecutionState::Running, Duration::from_secs(2)).await;

    assert_eq!(orchestrator.active_executions().await.len(), 2);

    orchestrator.cancel_execution(&first).await;
    orchestrator.cancel_execution(&second).await;
    assert!(orchestrator.active_executions().await.is_empty());
    orchestrator.cleanup().await;
}

// ---------------------------------------------------------------------------
// Test: cleanup is idempotent and closes the intake
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cleanup_is_idempotent_and_stops_intake() {
    let (_backend, orchestrator) = start_mock(test_config()).await;

    orchestrator.submit_execution(request("ok")).await.unwrap();
    orchestrator.cleanup().await;
    orchestrator.cleanup().await;

    let err = orchestrator.submit_execution(request("ok")).await.unwrap_err();
    assert_matches!(err, OrchestratorError::ShuttingDown);
}

// ---------------------------------------------------------------------------
// Test: cleanup interrupts in-flight executions and drains runners
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cleanup_interrupts_running_executions() {
    let (backend, orchestrator) = start_mock(test_config()).await;

    let id = orchestrator.submit_execution(request("hang")).await.unwrap();
    wait_for_state(&orchestrator, &id, ExecutionState::Running, Duration::from_secs(2)).await;

    orchestrator.cleanup().await;

    // The interrupted execution must not be left running.
    let record = orchestrator.execution_status(&id).await.unwrap();
    assert_eq!(record.state, ExecutionState::Cancelled);
    assert!(backend.provisioned.load(Ordering::SeqCst) >= 1);
}
