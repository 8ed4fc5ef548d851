//! Errors that reject an execution before any process exists.
//!
//! Everything that happens once the process is running (non-zero exit,
//! timeout, cancellation, transform failure) settles as an
//! [`ExecutionResult`](crate::coordinator::ExecutionResult) instead.

use crate::sandbox::SandboxError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    /// Another execution is in flight. Nothing is queued; retry later.
    #[error("an execution is already in progress")]
    Busy,
    /// The sandbox could not write the entry file or start the process.
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

impl ExecutionError {
    pub fn is_busy(&self) -> bool {
        matches!(self, ExecutionError::Busy)
    }
}
