//! The execution status table.
//!
//! Owned exclusively by the orchestrator; every state change goes through
//! the compare-and-transition methods here, which enforce the core state
//! machine at a single site. Whichever completion path (result, deadline,
//! cancel) transitions first wins; the losers observe `false` and become
//! no-ops.

use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::RwLock;

use testgrid_core::scheduling::{state_machine, ExecutionState};
use testgrid_core::types::Timestamp;

use crate::error::OrchestratorError;

/// Mutable lifecycle record for one execution.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub id: String,
    pub state: ExecutionState,
    pub submitted_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
    pub error: Option<String>,
    pub result: Option<serde_json::Value>,
}

/// Per-state counts derived from the table.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusCounts {
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub timed_out: usize,
}

/// Thread-safe map of execution id to its lifecycle record.
pub struct StatusTable {
    entries: RwLock<HashMap<String, ExecutionRecord>>,
}

impl StatusTable {
    /// Create a new, empty table.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Create a `Pending` record for a newly accepted execution.
    ///
    /// Returns the submission timestamp, or `DuplicateId` if the id is
    /// already present in any state.
    pub async fn create(&self, id: &str) -> Result<Timestamp, OrchestratorError> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(id) {
            return Err(OrchestratorError::DuplicateId(id.to_string()));
        }
        let submitted_at = chrono::Utc::now();
        entries.insert(
            id.to_string(),
            ExecutionRecord {
                id: id.to_string(),
                state: ExecutionState::Pending,
                submitted_at,
                started_at: None,
                finished_at: None,
                error: None,
                result: None,
            },
        );
        Ok(submitted_at)
    }

    /// Transition `Pending -> Running` and stamp `started_at`.
    ///
    /// Returns the start timestamp if this call won the transition, or
    /// `None` if the execution was already finalized (e.g. cancelled
    /// between dequeue and dispatch).
    pub async fn mark_running(&self, id: &str) -> Option<Timestamp> {
        let mut entries = self.entries.write().await;
        let record = entries.get_mut(id)?;
        if !state_machine::can_transition(record.state, ExecutionState::Running) {
            return None;
        }
        let started_at = chrono::Utc::now();
        record.state = ExecutionState::Running;
        record.started_at = Some(started_at);
        Some(started_at)
    }

    /// Transition to a terminal state, stamping `finished_at` and the
    /// outcome fields.
    ///
    /// Returns `true` if this call performed the transition; `false` if
    /// the record is unknown or already terminal (the no-op contract for
    /// racing completion paths).
    pub async fn finalize(
        &self,
        id: &str,
        state: ExecutionState,
        error: Option<String>,
        result: Option<serde_json::Value>,
    ) -> bool {
        debug_assert!(state.is_terminal());
        let mut entries = self.entries.write().await;
        let Some(record) = entries.get_mut(id) else {
            return false;
        };
        if !state_machine::can_transition(record.state, state) {
            return false;
        }
        record.state = state;
        record.finished_at = Some(chrono::Utc::now());
        record.error = error;
        record.result = result;
        true
    }

    /// Look up one record.
    pub async fn get(&self, id: &str) -> Option<ExecutionRecord> {
        self.entries.read().await.get(id).cloned()
    }

    /// All non-terminal records.
    pub async fn active(&self) -> Vec<ExecutionRecord> {
        self.entries
            .read()
            .await
            .values()
            .filter(|r| !r.state.is_terminal())
            .cloned()
            .collect()
    }

    /// Per-state counts for queue statistics.
    pub async fn counts(&self) -> StatusCounts {
        let entries = self.entries.read().await;
        let mut counts = StatusCounts::default();
        for record in entries.values() {
            match record.state {
                ExecutionState::Pending => {}
                ExecutionState::Running => counts.running += 1,
                ExecutionState::Completed => counts.completed += 1,
                ExecutionState::Failed => counts.failed += 1,
                ExecutionState::Cancelled => counts.cancelled += 1,
                ExecutionState::TimedOut => counts.timed_out += 1,
            }
        }
        counts
    }
}

impl Default for StatusTable {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
