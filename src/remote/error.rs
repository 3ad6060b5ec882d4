//! Remote transport and command error types

use thiserror::Error;

/// Error types for session transport
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// A remote command that did not succeed.
///
/// Transport failures are reported with exit code -1.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("command exited with code {exit_code}: {stderr}")]
pub struct CommandError {
    pub exit_code: i32,
    pub stderr: String,
}

impl CommandError {
    pub fn new(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stderr: stderr.into(),
        }
    }
}

impl From<RemoteError> for CommandError {
    fn from(err: RemoteError) -> Self {
        Self::new(-1, err.to_string())
    }
}

/// Failure to obtain a session for a node
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("{address} did not answer the reachability probe")]
    Unreachable { address: String },

    #[error("could not connect to {address} after {attempts} attempts: {last_error}")]
    Exhausted {
        address: String,
        attempts: u32,
        last_error: String,
    },

    #[error("connection to {address} cancelled")]
    Cancelled { address: String },
}
