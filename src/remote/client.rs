//! SSH client configuration

use crate::core::SshSettings;
use std::path::PathBuf;

/// Configuration for the SSH client
#[derive(Debug, Clone)]
pub struct SshClientConfig {
    /// Path to the ssh executable
    pub ssh_path: String,

    /// Path to the sshpass executable used for password logins
    pub sshpass_path: String,

    /// Timeout for establishing a session in seconds
    pub connect_timeout_secs: u64,

    /// Timeout for a single remote command in seconds
    pub command_timeout_secs: u64,

    /// Directory holding multiplexing control sockets
    pub control_dir: PathBuf,

    /// Idle lifetime of a control master in seconds
    pub control_persist_secs: u64,
}

impl Default for SshClientConfig {
    fn default() -> Self {
        Self::from_settings(&SshSettings::default())
    }
}

impl SshClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: &SshSettings) -> Self {
        Self {
            ssh_path: settings.ssh_path.clone(),
            sshpass_path: settings.sshpass_path.clone(),
            connect_timeout_secs: settings.connect_timeout_secs,
            command_timeout_secs: settings.command_timeout_secs,
            control_dir: settings
                .control_dir
                .clone()
                .unwrap_or_else(|| std::env::temp_dir().join("relaychain-ssh")),
            control_persist_secs: settings.control_persist_secs,
        }
    }

    pub fn with_ssh_path(mut self, ssh_path: String) -> Self {
        self.ssh_path = ssh_path;
        self
    }

    pub fn with_command_timeout(mut self, timeout_secs: u64) -> Self {
        self.command_timeout_secs = timeout_secs;
        self
    }

    pub fn with_control_dir(mut self, control_dir: PathBuf) -> Self {
        self.control_dir = control_dir;
        self
    }
}
