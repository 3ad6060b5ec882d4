//! SSH subprocess backend - drives the system `ssh` client

use crate::remote::{
    CommandOutput, RemoteBackend, RemoteCommand, RemoteError, RemoteSession, SessionTarget,
    SshClientConfig,
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

/// Exit status ssh reserves for its own failures
const SSH_ERROR_EXIT: i32 = 255;

/// Opens multiplexed SSH sessions through the system client.
///
/// Password logins go through `sshpass -e`, so the credential only travels in
/// the child's environment. Every session gets its own control socket; the
/// first command starts the master and later commands reuse it.
#[derive(Debug, Clone)]
pub struct SshBackend {
    config: SshClientConfig,
}

impl SshBackend {
    pub fn new(config: SshClientConfig) -> Self {
        Self { config }
    }

    #[cfg(test)]
    pub fn config(&self) -> &SshClientConfig {
        &self.config
    }
}

#[async_trait]
impl RemoteBackend for SshBackend {
    async fn open(&self, target: &SessionTarget) -> Result<Box<dyn RemoteSession>, RemoteError> {
        tokio::fs::create_dir_all(&self.config.control_dir)
            .await
            .map_err(|e| RemoteError::Internal(format!("Failed to create control dir: {}", e)))?;

        let session = SshSession {
            target: target.clone(),
            control_path: self
                .config
                .control_dir
                .join(Uuid::new_v4().simple().to_string()),
            config: self.config.clone(),
        };

        debug!("Opening SSH session to {}@{}", target.user, target.address);
        let output = session
            .invoke("true", self.config.connect_timeout_secs + 5)
            .await
            .map_err(|e| match e {
                RemoteError::Transport(msg) => RemoteError::Connect(msg),
                other => other,
            })?;

        if !output.is_success() {
            return Err(RemoteError::Connect(format!(
                "login exited with code {}: {}",
                output.exit_code,
                output.stderr.trim()
            )));
        }

        Ok(Box::new(session))
    }

    async fn probe(&self, address: &str) -> bool {
        let result = timeout(
            Duration::from_secs(5),
            Command::new("ping")
                .args(["-c", "1", "-W", "2", address])
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .status(),
        )
        .await;

        match result {
            Ok(Ok(status)) => status.success(),
            Ok(Err(e)) => {
                warn!("Failed to run ping for {}: {}", address, e);
                false
            }
            Err(_) => false,
        }
    }
}

/// One multiplexed session identified by its control socket
#[derive(Debug, Clone)]
struct SshSession {
    target: SessionTarget,
    control_path: PathBuf,
    config: SshClientConfig,
}

impl SshSession {
    /// Base command: `sshpass -e ssh` for password logins, plain `ssh` otherwise
    fn base_command(&self) -> Command {
        let mut command = if self.target.credential.is_empty() {
            let mut command = Command::new(&self.config.ssh_path);
            command.args(["-o", "BatchMode=yes"]);
            command
        } else {
            let mut command = Command::new(&self.config.sshpass_path);
            command
                .arg("-e")
                .arg(&self.config.ssh_path)
                .env("SSHPASS", &self.target.credential);
            command
        };
        command.args(ssh_options(&self.config, &self.control_path));
        command.arg("-p").arg(self.target.port.to_string());
        command.stdin(Stdio::null()).kill_on_drop(true);
        command
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.target.user, self.target.address)
    }

    async fn invoke(&self, script: &str, timeout_secs: u64) -> Result<CommandOutput, RemoteError> {
        let mut command = self.base_command();
        command.arg(self.destination()).arg("--").arg(script);

        let output = timeout(Duration::from_secs(timeout_secs), command.output())
            .await
            .map_err(|_| RemoteError::Timeout(timeout_secs))?
            .map_err(|e| RemoteError::Internal(format!("Failed to execute ssh: {}", e)))?;

        let exit_code = output.status.code().unwrap_or(-1);
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if exit_code == SSH_ERROR_EXIT {
            return Err(RemoteError::Transport(format!(
                "ssh to {} failed: {}",
                self.target.address,
                stderr.trim()
            )));
        }

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr,
            exit_code,
        })
    }
}

fn ssh_options(config: &SshClientConfig, control_path: &Path) -> Vec<String> {
    vec![
        "-o".to_string(),
        "StrictHostKeyChecking=accept-new".to_string(),
        "-o".to_string(),
        format!("ConnectTimeout={}", config.connect_timeout_secs),
        "-o".to_string(),
        "ControlMaster=auto".to_string(),
        "-o".to_string(),
        format!("ControlPersist={}", config.control_persist_secs),
        "-o".to_string(),
        format!("ControlPath={}", control_path.display()),
        "-o".to_string(),
        "LogLevel=ERROR".to_string(),
    ]
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn run(&self, command: &RemoteCommand) -> Result<CommandOutput, RemoteError> {
        debug!("Running {} on {}", command.name(), self.target.address);
        let output = self
            .invoke(&command.render(), self.config.command_timeout_secs)
            .await?;
        debug!(
            "{} on {} exited with {} ({} bytes of output)",
            command.name(),
            self.target.address,
            output.exit_code,
            output.stdout.len()
        );
        Ok(output)
    }

    async fn close(&self) -> Result<(), RemoteError> {
        let mut command = Command::new(&self.config.ssh_path);
        command
            .args(ssh_options(&self.config, &self.control_path))
            .args(["-O", "exit"])
            .arg(self.destination())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match timeout(Duration::from_secs(10), command.status()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(RemoteError::Internal(format!("Failed to stop ssh master: {}", e))),
            Err(_) => Err(RemoteError::Timeout(10)),
        }
    }

    /// Stop the control master from a background task
    fn release(&self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime to release session to {}", self.target.address);
            return;
        };
        let session = self.clone();
        handle.spawn(async move {
            if let Err(e) = session.close().await {
                warn!("Failed to release session to {}: {}", session.target.address, e);
            }
        });
    }
}
