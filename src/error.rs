//! Failures surfaced through a transfer's future.
//!
//! Protocol-level failures are not errors here: a transport breakdown still
//! resolves the future successfully with a status-0 response. These variants
//! cover the cases where no response can be produced at all.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The caller cancelled the transfer before it finished.
    #[error("task cancelled")]
    Cancelled,
    /// The client stopped while the transfer was queued or in flight.
    #[error("client stopped while task in the pool")]
    Stopped,
    /// The transport rejected an option or the multiplex refused the handle.
    #[error("transport: {0}")]
    Transport(String),
}

impl From<curl::Error> for ClientError {
    fn from(e: curl::Error) -> Self {
        ClientError::Transport(e.to_string())
    }
}

impl From<curl::MultiError> for ClientError {
    fn from(e: curl::MultiError) -> Self {
        ClientError::Transport(e.to_string())
    }
}
