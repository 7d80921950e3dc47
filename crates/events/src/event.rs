//! The execution lifecycle event envelope.

use serde::{Deserialize, Serialize};
use testgrid_core::scheduling::ExecutionState;
use testgrid_core::types::Timestamp;

/// A lifecycle event for one execution.
///
/// Constructed via [`ExecutionEvent::new`] and enriched with
/// [`with_detail`](ExecutionEvent::with_detail). Subscribers that attach
/// after an event was published do not receive it; there is no replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionEvent {
    /// Id of the execution this event belongs to.
    pub execution_id: String,

    /// The state the execution entered.
    pub state: ExecutionState,

    /// When the event was created (UTC).
    pub timestamp: Timestamp,

    /// Free-form JSON payload carrying event-specific data
    /// (error message, result summary, ...).
    pub detail: serde_json::Value,
}

impl ExecutionEvent {
    /// Create a new event with an empty detail object.
    pub fn new(execution_id: impl Into<String>, state: ExecutionState) -> Self {
        Self {
            execution_id: execution_id.into(),
            state,
            timestamp: chrono::Utc::now(),
            detail: serde_json::Value::Object(Default::default()),
        }
    }

    /// Set the JSON detail payload for the event.
    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }
}
