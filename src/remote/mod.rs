//! Remote session abstraction and the SSH backend

pub mod client;
pub mod command;
pub mod error;
pub mod ssh_client;
pub mod templates;

use async_trait::async_trait;
use std::fmt;

pub use client::SshClientConfig;
pub use command::{is_listening, is_locked, PackageState, RemoteCommand};
pub use error::{CommandError, ConnectionError, RemoteError};
pub use ssh_client::SshBackend;
pub use templates::EgressServiceConfig;

/// Raw result of one remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: 0,
        }
    }

    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code,
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Where and as whom to open a session
#[derive(Clone, PartialEq, Eq)]
pub struct SessionTarget {
    pub address: String,
    pub port: u16,
    pub user: String,
    pub credential: String,
}

impl fmt::Debug for SessionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTarget")
            .field("address", &self.address)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("credential", &"<redacted>")
            .finish()
    }
}

/// An open authenticated session on one node
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Run a command and capture its output
    async fn run(&self, command: &RemoteCommand) -> Result<CommandOutput, RemoteError>;

    /// Release the session
    async fn close(&self) -> Result<(), RemoteError>;

    /// Release without waiting; called when a session is dropped unclosed
    fn release(&self) {}
}

/// Opens sessions; the seam between the engine and the network
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    async fn open(&self, target: &SessionTarget) -> Result<Box<dyn RemoteSession>, RemoteError>;

    /// Cheap reachability check performed before authenticating
    async fn probe(&self, address: &str) -> bool;
}
