//! Failure taxonomy for probing operations
//!
//! Sprint 3: fatal vs recovered split
//!
//! Only the fatal classes live here. Recoverable conditions (unresolved
//! breakpoints, out-of-scope variables, exhausted search depth, declaration
//! lookup misses) are modeled as ordinary values in their modules and never
//! surface as errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LocalizerError {
    /// The target process could not be spawned at all.
    #[error("failed to launch target: {message}")]
    LaunchFailure { message: String },

    /// The target never became attachable; no partial session exists.
    #[error("target did not become attachable within {timeout_ms} ms")]
    ConnectionFailure { timeout_ms: u64 },

    /// The target died while a session was open.
    #[error("target process exited mid-session (status {status:?})")]
    ProcessFailure { status: Option<i32> },

    /// The wire protocol was violated (framing, correlation, unexpected reply).
    #[error("debug wire protocol: {0}")]
    Protocol(#[from] crate::wire::WireError),

    /// Session used in a state that does not permit the operation.
    #[error("session is {state} but {operation} requires {required}")]
    SessionState {
        state: &'static str,
        operation: &'static str,
        required: &'static str,
    },
}
