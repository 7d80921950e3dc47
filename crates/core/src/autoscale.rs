//! Pure pool-sizing decision logic.
//!
//! The periodic autoscale loop in the orchestrator gathers a snapshot of
//! queue depth and pool counts, calls [`plan`], and applies the result.
//! Keeping the decision pure means one scaling decision per tick and a
//! state machine that can be tested without a runtime.

// ---------------------------------------------------------------------------
// Scale plan
// ---------------------------------------------------------------------------

/// Outcome of one autoscale evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalePlan {
    /// Provision this many additional runners.
    ProvisionUp(usize),
    /// Tear down up to this many idle runners (grace period permitting).
    TearDownIdle(usize),
    /// No change this tick.
    Hold,
}

/// Decide how the pool should change for the observed snapshot.
///
/// - `demand` — number of queued (not yet dispatched) executions.
/// - `active` — runners not in the terminated state.
/// - `idle` — runners currently idle (a subset of `active`).
///
/// Demand already covered by idle runners does not trigger provisioning;
/// the dispatch loop will assign those runners directly. With zero demand,
/// idle runners beyond `min_runners` become teardown candidates.
pub fn plan(
    demand: usize,
    active: usize,
    idle: usize,
    min_runners: usize,
    max_runners: usize,
) -> ScalePlan {
    if demand > 0 {
        let uncovered = demand.saturating_sub(idle);
        let headroom = max_runners.saturating_sub(active);
        let grow = uncovered.min(headroom);
        if grow > 0 {
            return ScalePlan::ProvisionUp(grow);
        }
        return ScalePlan::Hold;
    }

    let excess = idle.saturating_sub(min_runners);
    if excess > 0 {
        ScalePlan::TearDownIdle(excess)
    } else {
        ScalePlan::Hold
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
