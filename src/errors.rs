//! Caller-visible failures of remote execution.

use thiserror::Error;

/// A request the kernel did not complete successfully.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutionFailure {
    /// The remote code raised.
    #[error("kernel execution raised {name}: {value}")]
    Error {
        name: String,
        value: String,
        traceback: Vec<String>,
    },
    /// The kernel aborted the request, or its reply could not be read.
    #[error("kernel execution was aborted")]
    Abort,
}

impl ExecutionFailure {
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Abort)
    }
}

/// Streamed output did not have the expected shape.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("streamed output violated its expected shape: {collected_outputs:?}")]
pub struct StreamIntegrityError {
    pub collected_outputs: Vec<String>,
}
