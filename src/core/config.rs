//! Orchestrator configuration from YAML

use crate::core::SkipPolicy;
use crate::execution::{RetryPolicy, SchedulingStrategy};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level orchestrator configuration loaded from YAML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// SSH transport settings
    pub ssh: SshSettings,

    /// Retry policy for opening sessions during provisioning
    pub connect: RetryPolicy,

    /// Retry policy for opening sessions during teardown
    pub teardown_connect: RetryPolicy,

    /// Package installer settings
    pub install: InstallSettings,

    /// Ping nodes before authenticating
    pub reachability_probe: bool,

    /// Treat skipped nodes as errors
    pub strict: bool,

    /// How phase-one node processing is scheduled
    pub strategy: SchedulingStrategy,

    /// Scrub shell history and temp/log files once a node is provisioned
    pub scrub_traces_after_provision: bool,

    /// Forwarding relay container settings (intermediate nodes)
    pub relay: RelaySettings,

    /// Egress service settings (terminal node)
    pub egress: EgressSettings,

    /// Hosts file settings
    pub hosts: HostsSettings,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            ssh: SshSettings::default(),
            connect: RetryPolicy::fixed(5, Duration::from_secs(5)),
            teardown_connect: RetryPolicy::fixed(3, Duration::from_secs(2)),
            install: InstallSettings::default(),
            reachability_probe: true,
            strict: false,
            strategy: SchedulingStrategy::Sequential,
            scrub_traces_after_provision: false,
            relay: RelaySettings::default(),
            egress: EgressSettings::default(),
            hosts: HostsSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshSettings {
    /// Login user when a node does not name one
    pub user: String,
    pub port: u16,
    pub connect_timeout_secs: u64,
    /// Upper bound for a single remote command
    pub command_timeout_secs: u64,
    pub ssh_path: String,
    pub sshpass_path: String,
    /// Directory for multiplexing control sockets (defaults to the temp dir)
    pub control_dir: Option<PathBuf>,
    /// Lifetime of an idle control master
    pub control_persist_secs: u64,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            user: "root".to_string(),
            port: 22,
            connect_timeout_secs: 10,
            command_timeout_secs: 600,
            ssh_path: "ssh".to_string(),
            sshpass_path: "sshpass".to_string(),
            control_dir: None,
            control_persist_secs: 600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallSettings {
    pub max_attempts: u32,
    /// Wait between attempts while the package manager is locked
    pub lock_interval_ms: u64,
}

impl Default for InstallSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            lock_interval_ms: 5_000,
        }
    }
}

impl InstallSettings {
    pub fn lock_interval(&self) -> Duration {
        Duration::from_millis(self.lock_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    /// Container image of the forwarding relay
    pub image: String,
    /// Package providing the container runtime
    pub runtime_package: String,
    /// Service restarted when the runtime is already installed
    pub runtime_service: String,
    /// Directory holding the compose project
    pub compose_dir: String,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            image: "nadoo/glider".to_string(),
            runtime_package: "docker-compose".to_string(),
            runtime_service: "docker".to_string(),
            compose_dir: "/opt/relaychain".to_string(),
        }
    }
}

impl RelaySettings {
    pub fn compose_file(&self) -> String {
        format!("{}/docker-compose.yml", self.compose_dir.trim_end_matches('/'))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EgressSettings {
    pub package: String,
    /// Unit shipped by the package; disabled so it does not hold the port
    pub default_unit: String,
    /// Templated unit name without the instance part
    pub unit_template: String,
    /// Instance name; also the config file stem
    pub instance: String,
    pub config_dir: String,
    pub binary: String,
    pub local_port: u16,
    pub timeout_secs: u64,
    pub fast_open: bool,
    pub reuse_port: bool,
    pub no_delay: bool,
}

impl Default for EgressSettings {
    fn default() -> Self {
        Self {
            package: "shadowsocks-libev".to_string(),
            default_unit: "shadowsocks-libev".to_string(),
            unit_template: "shadowsocks-libev-server@".to_string(),
            instance: "config".to_string(),
            config_dir: "/etc/shadowsocks-libev".to_string(),
            binary: "/usr/bin/ss-server".to_string(),
            local_port: 1080,
            timeout_secs: 60,
            fast_open: true,
            reuse_port: true,
            no_delay: true,
        }
    }
}

impl EgressSettings {
    /// Name of the enabled unit instance
    pub fn unit(&self) -> String {
        format!("{}{}", self.unit_template, self.instance)
    }

    /// Path of the templated unit file
    pub fn unit_file(&self) -> String {
        format!("/etc/systemd/system/{}.service", self.unit_template)
    }

    pub fn config_file(&self) -> String {
        format!("{}/{}.json", self.config_dir.trim_end_matches('/'), self.instance)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostsSettings {
    pub path: String,
    pub backup_path: String,
    /// Comment appended to every line this tool adds
    pub tag: String,
}

impl Default for HostsSettings {
    fn default() -> Self {
        Self {
            path: "/etc/hosts".to_string(),
            backup_path: "/etc/hosts.bak.relaychain".to_string(),
            tag: "relaychain".to_string(),
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: OrchestratorConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if given, else from the default location if it exists,
    /// else fall back to defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }
        match Self::default_path() {
            Some(default) if default.exists() => Self::from_file(default),
            _ => Ok(Self::default()),
        }
    }

    /// `<config_dir>/relaychain/config.yaml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("relaychain").join("config.yaml"))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.connect.max_attempts == 0 {
            anyhow::bail!("connect.max_attempts must be at least 1");
        }
        if self.teardown_connect.max_attempts == 0 {
            anyhow::bail!("teardown_connect.max_attempts must be at least 1");
        }
        if self.install.max_attempts == 0 {
            anyhow::bail!("install.max_attempts must be at least 1");
        }
        if self.ssh.user.trim().is_empty() {
            anyhow::bail!("ssh.user must not be empty");
        }
        if self.ssh.port == 0 {
            anyhow::bail!("ssh.port must be between 1 and 65535");
        }
        if self.ssh.command_timeout_secs == 0 {
            anyhow::bail!("ssh.command_timeout_secs must be positive");
        }
        if self.relay.compose_dir.trim_end_matches('/').is_empty() {
            anyhow::bail!("relay.compose_dir must not be the filesystem root");
        }
        Ok(())
    }

    /// How skipped nodes count towards the overall status
    pub fn skip_policy(&self) -> SkipPolicy {
        if self.strict {
            SkipPolicy::Strict
        } else {
            SkipPolicy::Lenient
        }
    }
}
