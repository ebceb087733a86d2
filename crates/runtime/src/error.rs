use thiserror::Error;

use crate::model::ModelError;

#[derive(Debug, Error)]
pub enum Error {
    /// The tool host could not be started or its catalog fetched.
    #[error("connection error: {0}")]
    Connection(String),

    /// The tool host went away in the middle of a run.
    #[error("transport lost: {0}")]
    TransportLost(String),

    #[error("model service unavailable: {0}")]
    ModelServiceUnavailable(String),

    /// The model replied with something the loop cannot act on.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
}

impl From<ModelError> for Error {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::EmptyReply => Self::ProtocolViolation(err.to_string()),
            other => Self::ModelServiceUnavailable(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
