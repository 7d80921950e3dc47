//! Periodic pool autoscaling.
//!
//! A control loop, not an event handler: once per tick it snapshots queue
//! depth and pool counts, asks [`testgrid_core::autoscale::plan`] for a
//! decision, and applies it. Because the body is awaited to completion
//! before the next tick, at most one scaling decision is ever in flight.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use testgrid_core::autoscale::{self, ScalePlan};
use testgrid_runner::RunnerPool;

use crate::queue::PriorityQueue;

/// Run the autoscale loop until `cancel` is triggered.
///
/// Provision failures inside `apply` are logged by the pool and retried
/// on the next tick; the loop itself never terminates on error.
pub async fn run(
    queue: Arc<PriorityQueue>,
    pool: Arc<RunnerPool>,
    min_runners: usize,
    max_runners: usize,
    interval: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(
        min_runners,
        max_runners,
        interval_ms = interval.as_millis() as u64,
        "Autoscale loop started",
    );

    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Autoscale loop shutting down");
                break;
            }
            _ = ticker.tick() => {
                let demand = queue.len().await;
                let counts = pool.counts().await;
                let plan = autoscale::plan(
                    demand,
                    counts.active,
                    counts.idle,
                    min_runners,
                    max_runners,
                );
                if plan != ScalePlan::Hold {
                    tracing::debug!(
                        demand,
                        active = counts.active,
                        idle = counts.idle,
                        ?plan,
                        "Autoscale decision",
                    );
                }
                pool.apply(plan).await;
            }
        }
    }
}
