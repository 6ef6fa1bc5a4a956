//! Error types for the buildfarm coordinator.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The worker could not be reached over the network.
    #[error("worker unreachable: {0}")]
    WorkerUnreachable(String),

    /// The worker answered, but its response could not be understood.
    #[error("malformed worker response: {0}")]
    MalformedResponse(String),

    /// The worker's host could not be resumed for a fresh build.
    #[error("cannot resume worker host: {0}")]
    CannotResume(String),

    /// The worker reported a state that contradicts the store's notion of
    /// what it should be doing.
    #[error("worker state mismatch: expected {expected}, got {actual}")]
    StateMismatch { expected: String, actual: String },

    #[error("store error: {0}")]
    Store(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Expected operational failures are logged tersely and routed straight
    /// to failure assessment. Anything else is a probable bug and gets a
    /// full trace in the log.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            Error::WorkerUnreachable(_)
                | Error::MalformedResponse(_)
                | Error::CannotResume(_)
                | Error::StateMismatch { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
