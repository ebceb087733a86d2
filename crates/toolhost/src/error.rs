//! Tool host client errors.

use crate::protocol::JsonRpcError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to spawn tool host: {0}")]
    Spawn(std::io::Error),

    #[error("tool host I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("tool host exited unexpectedly")]
    ServerExited,

    #[error("connection to tool host is closed")]
    Closed,

    #[error("timeout waiting for response")]
    Timeout,

    #[error("failed to encode or decode message: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("JSON-RPC error: {0}")]
    JsonRpc(#[from] JsonRpcError),

    #[error("output too large: {size} bytes (max {max})")]
    OutputTooLarge { size: usize, max: usize },
}

impl Error {
    /// Whether the connection itself can no longer be trusted.
    ///
    /// Anything that isn't a transport failure is a problem with one reply,
    /// and the next request on the same connection may still succeed.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Spawn(_) | Self::Io(_) | Self::ServerExited | Self::Closed
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
