//! Testgrid execution orchestrator.
//!
//! Exposes the core building blocks (config, error taxonomy, priority
//! queue, status table, dispatch and autoscale loops) so integration
//! tests and the binary entrypoint can both access them. The top-level
//! entry point is [`Orchestrator`], which composes a [`queue::PriorityQueue`],
//! a [`testgrid_runner::RunnerPool`], and a
//! [`testgrid_events::NotificationHub`].

pub mod autoscaler;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod orchestrator;
pub mod queue;
pub mod table;

pub use config::OrchestratorConfig;
pub use error::{OrchestratorError, OrchestratorResult};
pub use orchestrator::{Orchestrator, QueueStats};
pub use table::ExecutionRecord;
