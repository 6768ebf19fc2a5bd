use thiserror::Error;

/// Canonical Wavefront error taxonomy used across crates.
///
/// Classification guidance:
/// - [`WaveError::Internal`]: scheduler/planner invariant violations (stage
///   not scheduled, exchange source missing). Fatal and non-retriable; these
///   indicate a bug in dependency-order scheduling, not a runtime condition.
/// - [`WaveError::Cluster`]: worker/transport failures (worker unreachable,
///   RPC error, non-OK remote status, no workers available). The whole query
///   fails; the caller may resubmit the statement, the scheduler never
///   retries on its own.
/// - [`WaveError::Planning`]: query shape/name/type issues discovered before
///   scheduling (unknown table, malformed plan).
/// - [`WaveError::Cancelled`]: query aborted by an explicit cancel request
///   or client disconnect.
/// - [`WaveError::InvalidConfig`]: configuration/catalog contract violations.
/// - [`WaveError::Unsupported`]: valid request for behavior intentionally
///   unimplemented in the current version.
///
/// Construction-time contract violations (empty hash keys, scheduling a
/// stage with an empty worker list) are programming errors and fail fast
/// with assertions instead of returning a variant.
#[derive(Debug, Error)]
pub enum WaveError {
    /// Scheduler/planner invariant violation. Surfaced to the submission
    /// boundary as an internal error; never retried locally.
    #[error("internal error: {0}")]
    Internal(String),

    /// Cluster or transport failure while talking to compute/meta nodes.
    #[error("cluster error: {0}")]
    Cluster(String),

    /// Query planning/fragmentation failures.
    ///
    /// Examples:
    /// - unknown table or column in a scan node
    /// - plan fragment referencing a dropped catalog entry
    #[error("planning error: {0}")]
    Planning(String),

    /// Query cancelled by user or protocol-layer request.
    #[error("query cancelled: {0}")]
    Cancelled(String),

    /// Invalid or inconsistent configuration/catalog state.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Valid request for a feature/shape not implemented in current version.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Transparent std IO failures.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Standard Wavefront result alias.
pub type Result<T> = std::result::Result<T, WaveError>;
