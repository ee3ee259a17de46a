use crate::consts::cli::{EXIT_RUNTIME, EXIT_USAGE};
use crate::gateway::error::GatewayError;
use crate::job::{JobHandle, JobStatus};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Bad arguments or a call made in the wrong job state.
    #[error("{0}")]
    Usage(String),

    #[error("result type {type_id:?} is not available for job {handle}")]
    NotFound { handle: JobHandle, type_id: String },

    /// Network or service failure; never retried.
    #[error(transparent)]
    Transport(#[from] GatewayError),

    #[error("job {handle} ended with status {status}")]
    JobFailed { handle: JobHandle, status: JobStatus },

    #[error("gave up waiting for job {handle}: {reason}")]
    Cancelled { handle: JobHandle, reason: String },

    /// Cancellation arrived before a batch record was submitted.
    #[error("record {index} was not submitted: cancelled")]
    NotSubmitted { index: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl ClientError {
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }

    /// 1 for anything the user can fix on the command line, 2 otherwise.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) | Self::NotFound { .. } | Self::Config(_) => EXIT_USAGE,
            _ => EXIT_RUNTIME,
        }
    }

    pub fn is_usage(&self) -> bool {
        self.exit_code() == EXIT_USAGE
    }
}
