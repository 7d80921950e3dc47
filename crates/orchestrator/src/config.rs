use std::time::Duration;

use testgrid_runner::PoolConfig;

/// Orchestrator configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Idle floor the autoscaler never tears below.
    pub min_runners: usize,
    /// Hard ceiling on concurrently live runners.
    pub max_runners: usize,
    /// Dispatch loop polling interval.
    pub dispatch_interval: Duration,
    /// Autoscale loop tick interval.
    pub autoscale_interval: Duration,
    /// How long a runner must sit idle before scale-down may reap it.
    pub idle_grace: Duration,
    /// Grace period for a runner to acknowledge an abort signal.
    pub abort_grace: Duration,
    /// Per-runner and per-task teardown wait during shutdown.
    pub drain_timeout: Duration,
    /// Runner command for the local process backend (binary only).
    pub runner_command: Vec<String>,
}

impl OrchestratorConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                          | Default            |
    /// |----------------------------------|--------------------|
    /// | `TESTGRID_MIN_RUNNERS`           | `1`                |
    /// | `TESTGRID_MAX_RUNNERS`           | `4`                |
    /// | `TESTGRID_DISPATCH_INTERVAL_MS`  | `250`              |
    /// | `TESTGRID_AUTOSCALE_INTERVAL_MS` | `1000`             |
    /// | `TESTGRID_IDLE_GRACE_SECS`       | `30`               |
    /// | `TESTGRID_ABORT_GRACE_SECS`      | `5`                |
    /// | `TESTGRID_DRAIN_TIMEOUT_SECS`    | `5`                |
    /// | `TESTGRID_RUNNER_CMD`            | `testgrid-runner`  |
    pub fn from_env() -> Self {
        let min_runners: usize = env_parsed("TESTGRID_MIN_RUNNERS", "1");
        let max_runners: usize = env_parsed("TESTGRID_MAX_RUNNERS", "4");

        let dispatch_interval =
            Duration::from_millis(env_parsed("TESTGRID_DISPATCH_INTERVAL_MS", "250"));
        let autoscale_interval =
            Duration::from_millis(env_parsed("TESTGRID_AUTOSCALE_INTERVAL_MS", "1000"));
        let idle_grace = Duration::from_secs(env_parsed("TESTGRID_IDLE_GRACE_SECS", "30"));
        let abort_grace = Duration::from_secs(env_parsed("TESTGRID_ABORT_GRACE_SECS", "5"));
        let drain_timeout = Duration::from_secs(env_parsed("TESTGRID_DRAIN_TIMEOUT_SECS", "5"));

        let runner_command: Vec<String> = std::env::var("TESTGRID_RUNNER_CMD")
            .unwrap_or_else(|_| "testgrid-runner".into())
            .split_whitespace()
            .map(str::to_string)
            .collect();

        Self {
            min_runners,
            max_runners,
            dispatch_interval,
            autoscale_interval,
            idle_grace,
            abort_grace,
            drain_timeout,
            runner_command,
        }
    }

    /// Derive the pool-facing slice of this configuration.
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            min_runners: self.min_runners,
            max_runners: self.max_runners,
            idle_grace: self.idle_grace,
            abort_grace: self.abort_grace,
            drain_timeout: self.drain_timeout,
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            min_runners: 1,
            max_runners: 4,
            dispatch_interval: Duration::from_millis(250),
            autoscale_interval: Duration::from_secs(1),
            idle_grace: Duration::from_secs(30),
            abort_grace: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(5),
            runner_command: vec!["testgrid-runner".to_string()],
        }
    }
}

fn env_parsed<T: std::str::FromStr>(var: &str, default: &str) -> T
where
    T::Err: std::fmt::Debug,
{
    std::env::var(var)
        .unwrap_or_else(|_| default.into())
        .parse()
        .unwrap_or_else(|e| panic!("{var} must be a valid value: {e:?}"))
}
