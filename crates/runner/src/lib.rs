//! Runner pool and worker execution contract for the testgrid platform.
//!
//! A *runner* is an isolated worker instance that executes one test
//! payload at a time. This crate provides:
//!
//! - [`RunnerBackend`] — the capability contract any concrete runtime
//!   (local subprocess, container runtime, cluster API) implements.
//! - [`ProcessBackend`] — a local subprocess backend used by the daemon
//!   binary and the integration tests.
//! - [`RunnerPool`] — lifecycle bookkeeping, acquire/release, and
//!   provisioning/teardown of runners sized to demand.

pub mod backend;
pub mod pool;
pub mod process;

pub use backend::{RunReport, RunnerBackend, RunnerError};
pub use pool::{PoolConfig, RunnerPool, RunnerState};
pub use process::ProcessBackend;
