//! Files written to nodes: relay compose project, egress config and unit

use crate::core::{EgressSettings, RelayConfig, RelaySettings};
use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Serialize)]
struct ComposeFile {
    version: String,
    services: BTreeMap<String, ComposeService>,
}

#[derive(Debug, Serialize)]
struct ComposeService {
    image: String,
    container_name: String,
    restart: String,
    ports: Vec<String>,
    command: Vec<String>,
}

/// Compose project for an intermediate node's forwarding relay.
///
/// The relay listens on the configured port and forwards to the same port on
/// `next_hop`, using the shared secret and cipher on both legs.
pub fn relay_compose_file(settings: &RelaySettings, relay: &RelayConfig, next_hop: &str) -> Result<String> {
    let method = relay.cipher.relay_name();
    let listen = format!("ss://{}:{}@:{}", method, relay.secret, relay.port);
    let forward = format!("ss://{}:{}@{}:{}", method, relay.secret, host_part(next_hop), relay.port);

    let service = ComposeService {
        image: settings.image.clone(),
        container_name: "relaychain-relay".to_string(),
        restart: "always".to_string(),
        ports: vec![
            format!("{0}:{0}/tcp", relay.port),
            format!("{0}:{0}/udp", relay.port),
        ],
        command: vec![
            "-verbose".to_string(),
            "-listen".to_string(),
            listen,
            "-forward".to_string(),
            forward,
        ],
    };

    let mut services = BTreeMap::new();
    services.insert("relay".to_string(), service);
    let file = ComposeFile {
        version: "3".to_string(),
        services,
    };
    Ok(serde_yaml::to_string(&file)?)
}

fn host_part(address: &str) -> String {
    if address.contains(':') {
        format!("[{}]", address)
    } else {
        address.to_string()
    }
}

/// Egress service configuration document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EgressServiceConfig {
    pub server: Vec<String>,
    pub mode: String,
    pub server_port: u16,
    pub local_port: u16,
    pub password: String,
    pub timeout: u64,
    pub fast_open: bool,
    pub reuse_port: bool,
    pub no_delay: bool,
    pub method: String,
}

impl EgressServiceConfig {
    pub fn new(settings: &EgressSettings, relay: &RelayConfig) -> Self {
        Self {
            server: vec!["::0".to_string(), "0.0.0.0".to_string()],
            mode: "tcp_and_udp".to_string(),
            server_port: relay.port,
            local_port: settings.local_port,
            password: relay.secret.clone(),
            timeout: settings.timeout_secs,
            fast_open: settings.fast_open,
            reuse_port: settings.reuse_port,
            no_delay: settings.no_delay,
            method: relay.cipher.egress_name().to_string(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Templated systemd unit running one egress instance per config file
pub fn egress_unit_file(settings: &EgressSettings) -> String {
    format!(
        "[Unit]
Description=Relay chain egress service for %I
After=network-online.target
Wants=network-online.target

[Service]
Type=simple
CapabilityBoundingSet=CAP_NET_BIND_SERVICE
AmbientCapabilities=CAP_NET_BIND_SERVICE
ExecStart={binary} -c {dir}/%i.json
Restart=on-failure
RestartSec=3

[Install]
WantedBy=multi-user.target
",
        binary = settings.binary,
        dir = settings.config_dir.trim_end_matches('/')
    )
}
