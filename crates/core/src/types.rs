/// Execution identifiers are caller-supplied opaque strings; blank ids are
/// replaced with a generated v4 UUID at submission.
pub type ExecutionId = String;

/// Runner identifiers are pool-assigned and monotonically increasing.
pub type RunnerId = u64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
