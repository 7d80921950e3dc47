//! Execution request model, defaults, and validation.
//!
//! An [`ExecutionRequest`] is immutable once accepted by the orchestrator.
//! The payload is an opaque test description; this crate never parses it.
//! Validation follows the closed-set constant style of the rest of `core`:
//! unknown values are rejected with [`CoreError::Validation`] before the
//! request is queued.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::CoreError;
use crate::scheduling::{DEFAULT_ATTEMPT_TIMEOUT_MS, DEFAULT_TIMEOUT_MS, PRIORITY_NORMAL};

// ---------------------------------------------------------------------------
// Browser engines
// ---------------------------------------------------------------------------

/// Chromium-family engines (Chrome, Edge).
pub const BROWSER_CHROMIUM: &str = "chromium";
/// Gecko engine (Firefox).
pub const BROWSER_FIREFOX: &str = "firefox";
/// WebKit engine (Safari).
pub const BROWSER_WEBKIT: &str = "webkit";

/// All supported browser engine selectors.
pub const VALID_BROWSER_ENGINES: &[&str] = &[BROWSER_CHROMIUM, BROWSER_FIREFOX, BROWSER_WEBKIT];

// ---------------------------------------------------------------------------
// Viewport
// ---------------------------------------------------------------------------

/// Hard ceiling on either viewport dimension.
const MAX_VIEWPORT_DIM: u32 = 16_384;

/// Browser viewport dimensions in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

// ---------------------------------------------------------------------------
// Execution configuration
// ---------------------------------------------------------------------------

/// Per-execution configuration bag.
///
/// Missing fields deserialize to the documented defaults; a negative
/// `retries` value is clamped to 0 at the serde boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Browser engine selector; must be one of [`VALID_BROWSER_ENGINES`].
    #[serde(default = "default_browser")]
    pub browser: String,

    #[serde(default)]
    pub viewport: Viewport,

    #[serde(default = "default_headless")]
    pub headless: bool,

    /// Per-attempt timeout, distinct from the overall execution timeout.
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,

    /// Number of additional attempts permitted after a transient failure.
    #[serde(default, deserialize_with = "clamp_retries")]
    pub retries: u32,

    #[serde(default)]
    pub parallel: bool,

    /// Environment overrides passed to the runner, in declaration order.
    #[serde(default)]
    pub env: Vec<(String, String)>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            browser: default_browser(),
            viewport: Viewport::default(),
            headless: default_headless(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
            retries: 0,
            parallel: false,
            env: Vec::new(),
        }
    }
}

impl ExecutionConfig {
    /// Validate the configuration against the supported closed sets.
    pub fn validate(&self) -> Result<(), CoreError> {
        validate_browser_engine(&self.browser)?;

        if self.viewport.width == 0 || self.viewport.height == 0 {
            return Err(CoreError::Validation(
                "Viewport dimensions must be positive".to_string(),
            ));
        }
        if self.viewport.width > MAX_VIEWPORT_DIM || self.viewport.height > MAX_VIEWPORT_DIM {
            return Err(CoreError::Validation(format!(
                "Viewport dimensions must not exceed {MAX_VIEWPORT_DIM}"
            )));
        }
        if self.attempt_timeout_ms == 0 {
            return Err(CoreError::Validation(
                "attempt_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_browser() -> String {
    BROWSER_CHROMIUM.to_string()
}

fn default_headless() -> bool {
    true
}

fn default_attempt_timeout_ms() -> u64 {
    DEFAULT_ATTEMPT_TIMEOUT_MS
}

/// Accept signed input for `retries` and clamp negatives to 0.
fn clamp_retries<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = i64::deserialize(deserializer)?;
    Ok(raw.max(0).min(u32::MAX as i64) as u32)
}

/// Validate that a browser engine selector is one of the known constants.
pub fn validate_browser_engine(engine: &str) -> Result<(), CoreError> {
    if VALID_BROWSER_ENGINES.contains(&engine) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "Invalid browser engine '{engine}'. Must be one of: {}",
            VALID_BROWSER_ENGINES.join(", ")
        )))
    }
}

// ---------------------------------------------------------------------------
// Execution request
// ---------------------------------------------------------------------------

/// One request to run a test payload to completion or terminal failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Caller-supplied identifier. Blank values are replaced with a
    /// generated v4 UUID at submission.
    #[serde(default)]
    pub id: String,

    /// Opaque foreign identifiers; not validated semantically here.
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub scenario_id: String,
    #[serde(default)]
    pub user_id: String,

    /// Opaque executable test description.
    pub payload: String,

    #[serde(default)]
    pub configuration: ExecutionConfig,

    /// Higher values are served sooner.
    #[serde(default = "default_priority")]
    pub priority: i32,

    /// Overall wall-clock budget, dominating the per-attempt timeout.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_priority() -> i32 {
    PRIORITY_NORMAL
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

impl ExecutionRequest {
    /// Build a request with defaults for everything except the payload.
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            project_id: String::new(),
            scenario_id: String::new(),
            user_id: String::new(),
            payload: payload.into(),
            configuration: ExecutionConfig::default(),
            priority: PRIORITY_NORMAL,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    /// Fill a blank id with a generated v4 UUID. Returns the effective id.
    pub fn ensure_id(&mut self) -> &str {
        if self.id.trim().is_empty() {
            self.id = uuid::Uuid::new_v4().to_string();
        }
        &self.id
    }

    /// Validate the request before it is accepted.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.timeout_ms == 0 {
            return Err(CoreError::Validation(
                "timeout_ms must be positive".to_string(),
            ));
        }
        self.configuration.validate()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
