use thiserror::Error;

use crate::storage::StorageError;
use crate::transport::TransportError;

/// Errors raised while driving a job
///
/// A handler-reported FAILED status is not an error: it comes back as an
/// `ExtractResult` carrying a logged `FatalError`. These variants cover a
/// broken handler, unreachable collaborators and the round ceiling.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("remote handler call failed: {0}")]
    Handler(#[from] TransportError),

    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),

    #[error("handler broke the job protocol: {0}")]
    ContractViolation(String),

    #[error("no cached session state under key: {0}")]
    SessionNotFound(String),

    #[error("protocol exceeded max rounds ({rounds})")]
    MaxRoundsExceeded { rounds: u32 },

    #[error("failed to decode job result: {0}")]
    Decode(#[from] serde_json::Error),
}

impl JobError {
    pub(crate) fn contract(message: impl Into<String>) -> Self {
        JobError::ContractViolation(message.into())
    }
}
