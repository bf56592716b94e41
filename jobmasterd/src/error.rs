//! Remote error taxonomy surfaced to protocol clients.

use thiserror::Error;

/// Errors that cross the wire back to the caller. Everything else is
/// an internal failure handled by the connection loop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// Task or attempt absent under its resolved parent, or a command
    /// target that does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Delegation-token operations. Always returned, never attempted.
    #[error("{0}")]
    Unsupported(String),

    /// Generic remote failure, including the deliberately unhandled
    /// absent-job case on task/attempt-resolving read paths.
    #[error("{0}")]
    Remote(String),

    /// Caller denied by the service authorization policy.
    #[error("client {0} is not authorized to use the job client protocol")]
    Forbidden(String),
}

impl RemoteError {
    pub fn code(&self) -> &'static str {
        match self {
            RemoteError::NotFound(_) => "E_NOT_FOUND",
            RemoteError::Unsupported(_) => "E_UNSUPPORTED",
            RemoteError::Remote(_) => "E_REMOTE",
            RemoteError::Forbidden(_) => "E_FORBIDDEN",
        }
    }
}
